//! Prompt library and conversation archive handlers used by the browser client.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use super::api::{ApiError, OkResponse};
use crate::{
    AppState,
    conversations::{ConversationError, SaveConversation},
    prompts::{DefaultPrompt, Prompt, PromptError},
};

impl From<PromptError> for ApiError {
    fn from(err: PromptError) -> Self {
        if err.is_client_error() {
            Self::bad_request(err.to_string())
        } else {
            tracing::error!(error = %err, "Prompt storage failed");
            Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<ConversationError> for ApiError {
    fn from(err: ConversationError) -> Self {
        tracing::error!(error = %err, "Conversation save failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

/// Body for saving a named or default prompt.
#[derive(Debug, Default, Deserialize)]
pub struct PromptBody {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PromptListResponse {
    pub prompts: Vec<Prompt>,
}

pub async fn list_prompts(State(state): State<AppState>) -> Json<PromptListResponse> {
    Json(PromptListResponse {
        prompts: state.prompts.list().await,
    })
}

#[derive(Debug, Serialize)]
pub struct SavedPromptResponse {
    pub ok: bool,
    pub prompt: Prompt,
}

pub async fn save_prompt(
    State(state): State<AppState>,
    payload: Result<Json<PromptBody>, JsonRejection>,
) -> Result<Json<SavedPromptResponse>, ApiError> {
    let Json(body) = payload?;
    let prompt = state
        .prompts
        .save(body.name.as_deref(), body.content)
        .await?;
    Ok(Json(SavedPromptResponse { ok: true, prompt }))
}

pub async fn delete_prompt(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    state.prompts.delete(&name).await?;
    Ok(Json(OkResponse { ok: true }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultPromptResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    pub default_prompt: Option<DefaultPrompt>,
}

pub async fn get_default_prompt(State(state): State<AppState>) -> Json<DefaultPromptResponse> {
    Json(DefaultPromptResponse {
        ok: None,
        default_prompt: state.prompts.default_prompt().await,
    })
}

pub async fn set_default_prompt(
    State(state): State<AppState>,
    payload: Result<Json<PromptBody>, JsonRejection>,
) -> Result<Json<DefaultPromptResponse>, ApiError> {
    let Json(body) = payload?;
    let record = state
        .prompts
        .set_default(body.name.as_deref(), body.content)
        .await?;
    Ok(Json(DefaultPromptResponse {
        ok: Some(true),
        default_prompt: Some(record),
    }))
}

#[derive(Debug, Serialize)]
pub struct SavedConversationResponse {
    pub ok: bool,
    /// Saved file, relative to the storage directory.
    pub path: String,
}

pub async fn save_conversation(
    State(state): State<AppState>,
    payload: Result<Json<SaveConversation>, JsonRejection>,
) -> Result<Json<SavedConversationResponse>, ApiError> {
    let Json(request) = payload?;
    let path = state.conversations.save(&request).await?;
    Ok(Json(SavedConversationResponse { ok: true, path }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_error_status_mapping() {
        let err = ApiError::from(PromptError::MissingName);
        assert_eq!(err.to_string(), "400 Bad Request: Name is required");

        let err = ApiError::from(PromptError::Io {
            path: "prompts.json".into(),
            source: std::io::Error::other("disk full"),
        });
        assert!(err.to_string().starts_with("500"));
    }

    #[test]
    fn test_default_prompt_response_shape() {
        let json = serde_json::to_value(DefaultPromptResponse {
            ok: None,
            default_prompt: None,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"defaultPrompt": null}));
    }
}
