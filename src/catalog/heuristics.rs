//! Model-id naming heuristics.
//!
//! The upstream model listing carries ids only, so chat support and reasoning
//! support are inferred from naming conventions. Both predicates can give false
//! negatives for new families until the patterns are updated.

use once_cell::sync::Lazy;
use regex::Regex;

/// `o1`, `o3-mini`, `o4-mini-2025-04-16`, ...
static O_FAMILY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^o\d+(-|$)").expect("valid regex"));

/// Substrings marking ids that share a chat family prefix but are not chat models.
const NON_CHAT_MARKERS: &[&str] = &[
    "audio",
    "realtime",
    "transcribe",
    "tts",
    "image",
    "embedding",
    "moderation",
    "search",
    "dall-e",
    "whisper",
];

/// Whether `id` names a chat-completion model.
pub fn is_chat_model(id: &str) -> bool {
    let id = id.trim().to_ascii_lowercase();
    let chat_family =
        id.starts_with("gpt-") || id.starts_with("chatgpt-") || O_FAMILY.is_match(&id);

    chat_family && !NON_CHAT_MARKERS.iter().any(|m| id.contains(m))
}

/// Whether `id` belongs to a reasoning model family (`o*`, `gpt-5*`).
pub fn is_reasoning_model(id: &str) -> bool {
    let id = id.trim().to_ascii_lowercase();
    O_FAMILY.is_match(&id) || id.starts_with("gpt-5")
}
