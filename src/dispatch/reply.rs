//! Reply and usage normalisation across the two call shapes.

use serde::Serialize;
use serde_json::Value;

use super::CallPath;

/// Token usage in one shape regardless of path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Pull the reply text out of an upstream body. Empty when none is present.
pub fn extract_reply(path: CallPath, body: &Value) -> String {
    let reply = match path {
        CallPath::Reasoning => reasoning_reply(body),
        CallPath::Standard => body["choices"][0]["message"]["content"].as_str(),
    };
    reply.unwrap_or_default().to_string()
}

/// Responses API: the `output_text` shortcut, else the first text segment
/// nested in `output[].content[]`.
fn reasoning_reply(body: &Value) -> Option<&str> {
    if let Some(text) = body["output_text"].as_str()
        && !text.is_empty()
    {
        return Some(text);
    }

    body["output"]
        .as_array()?
        .iter()
        .filter_map(|item| item["content"].as_array())
        .flatten()
        .find(|segment| matches!(segment["type"].as_str(), Some("output_text" | "text")))
        .and_then(|segment| segment["text"].as_str())
}

/// Normalise `usage`. Chat Completions reports `prompt_tokens` /
/// `completion_tokens`; the Responses API reports `input_tokens` /
/// `output_tokens`. A missing total is the sum of the other two.
pub fn extract_usage(body: &Value) -> Option<Usage> {
    let usage = body.get("usage")?.as_object()?;
    let field = |names: &[&str]| names.iter().find_map(|n| usage.get(*n)?.as_u64());

    let prompt = field(&["prompt_tokens", "input_tokens"]);
    let completion = field(&["completion_tokens", "output_tokens"]);
    let total = field(&["total_tokens"]);

    if prompt.is_none() && completion.is_none() && total.is_none() {
        return None;
    }

    let prompt_tokens = prompt.unwrap_or(0);
    let completion_tokens = completion.unwrap_or(0);
    Some(Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens: total.unwrap_or(prompt_tokens + completion_tokens),
    })
}
