use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::providers::ChatMessage;

/// How much reasoning a reasoning-family model should spend. `Off` forces the
/// standard path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Off,
    Low,
    #[default]
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasoningEffort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown reasoning effort: {other}")),
        }
    }
}

/// Which upstream call shape a dispatch used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallPath {
    /// `POST /responses` with a reasoning effort.
    Reasoning,
    /// `POST /chat/completions`.
    Standard,
}

impl CallPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reasoning => "reasoning",
            Self::Standard => "standard",
        }
    }

    /// Upstream route, as recorded in the call log.
    pub fn route(&self) -> &'static str {
        match self {
            Self::Reasoning => "/responses",
            Self::Standard => "/chat/completions",
        }
    }
}

/// A message as sent by a client. Entries without a role or content are dropped
/// before dispatch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<Value>,
}

impl InboundMessage {
    #[cfg(test)]
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            content: Some(Value::String(content.to_string())),
        }
    }

    fn to_wire(&self) -> Option<ChatMessage> {
        let role = self.role.as_deref().map(str::trim).filter(|r| !r.is_empty())?;
        let content = match self.content.as_ref()? {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Some(ChatMessage::new(role, content))
    }
}

/// An inbound chat request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Unrecognised values are treated as absent.
    #[serde(default, deserialize_with = "lenient_effort")]
    pub reasoning_effort: Option<ReasoningEffort>,
}

impl ChatRequest {
    /// The requested model, if a non-blank one was given.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref().map(str::trim).filter(|m| !m.is_empty())
    }

    /// Messages to send upstream: the trimmed system prompt first (if any),
    /// then every well-formed client message in order.
    pub fn wire_messages(&self) -> Vec<ChatMessage> {
        let system = self
            .system_prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| ChatMessage::new("system", p));

        system
            .into_iter()
            .chain(self.messages.iter().filter_map(InboundMessage::to_wire))
            .collect()
    }
}

fn lenient_effort<'de, D>(deserializer: D) -> Result<Option<ReasoningEffort>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) => match s.parse() {
            Ok(effort) => Some(effort),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring reasoning effort");
                None
            }
        },
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_wire_messages_prepends_trimmed_system_prompt() {
        let request: ChatRequest = serde_json::from_value(json!({
            "systemPrompt": "  Be brief.  ",
            "messages": [
                {"role": "user", "content": "Hi"},
                {"content": "no role"},
                {"role": "assistant"},
                {"role": "user", "content": 42}
            ]
        }))
        .unwrap();

        assert_eq!(
            request.wire_messages(),
            vec![
                ChatMessage::new("system", "Be brief."),
                ChatMessage::new("user", "Hi"),
                ChatMessage::new("user", "42"),
            ]
        );
    }

    #[test]
    fn test_blank_system_prompt_and_model_ignored() {
        let request: ChatRequest = serde_json::from_value(json!({
            "systemPrompt": "   ",
            "model": " ",
            "messages": [{"role": "user", "content": "Hi"}]
        }))
        .unwrap();

        assert_eq!(request.wire_messages().len(), 1);
        assert_eq!(request.model(), None);
    }

    #[test]
    fn test_reasoning_effort_parsing() {
        let parse = |v: Value| -> Option<ReasoningEffort> {
            serde_json::from_value::<ChatRequest>(json!({"reasoningEffort": v}))
                .unwrap()
                .reasoning_effort
        };

        assert_eq!(parse(json!("off")), Some(ReasoningEffort::Off));
        assert_eq!(parse(json!("HIGH")), Some(ReasoningEffort::High));
        assert_eq!(parse(json!("extreme")), None);
        assert_eq!(parse(json!(3)), None);
        assert_eq!(parse(Value::Null), None);
    }

    #[test]
    fn test_empty_body_defaults() {
        let request: ChatRequest = serde_json::from_value(json!({})).unwrap();
        assert!(request.messages.is_empty());
        assert!(request.reasoning_effort.is_none());
    }
}
