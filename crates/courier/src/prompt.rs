//! Normalization of inbound chat submissions into a typed [`Prompt`].
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{BrokerError, BrokerResult};
use crate::models::message::Message;
use crate::models::role::Role;

const DEFAULT_IMAGE_MIME: &str = "image/png";

/// The raw fields of a chat submission, before any decoding
#[derive(Debug, Clone, Default)]
pub struct RawSubmission {
    pub content: Option<String>,
    pub image_base64: Option<String>,
}

impl RawSubmission {
    pub fn new<S: Into<String>>(content: S) -> Self {
        Self {
            content: Some(content.into()),
            image_base64: None,
        }
    }

    pub fn with_image<S: Into<String>>(mut self, image_base64: S) -> Self {
        self.image_base64 = Some(image_base64.into());
        self
    }
}

/// One normalized user submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub content: Value,
    /// The submitted base64 image, verbatim. Empty when no image was sent.
    pub multimodal_image: String,
}

/// An inline image ready to be attached to a model message
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAttachment {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

/// Typed view of a prompt's content
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatCommand {
    pub message: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl ChatCommand {
    /// Conversation so far, ending with the new user message
    pub fn to_messages(&self, image: Option<&ImageAttachment>) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .history
            .iter()
            .map(|entry| match entry.role {
                Role::User => Message::user().with_text(&entry.content),
                Role::Assistant => Message::assistant().with_text(&entry.content),
            })
            .collect();

        let mut current = Message::user().with_text(&self.message);
        if let Some(image) = image {
            current = current.with_image(&image.data, &image.mime_type);
        }
        messages.push(current);
        messages
    }
}

impl Prompt {
    pub fn has_image(&self) -> bool {
        !self.multimodal_image.is_empty()
    }

    /// The inline image, split out of an optional `data:<mime>;base64,` prefix
    pub fn image(&self) -> Option<ImageAttachment> {
        if !self.has_image() {
            return None;
        }
        let (mime_type, data) = split_data_url(&self.multimodal_image);
        Some(ImageAttachment {
            data: data.to_string(),
            mime_type: mime_type.unwrap_or(DEFAULT_IMAGE_MIME).to_string(),
        })
    }

    pub fn command(&self) -> BrokerResult<ChatCommand> {
        serde_json::from_value(self.content.clone())
            .map_err(|e| BrokerError::malformed(format!("content is not a chat command: {}", e)))
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.content.get("threadId").and_then(Value::as_str)
    }
}

/// Normalize a raw submission. Pure; never touches the network.
pub fn normalize(raw: RawSubmission) -> BrokerResult<Prompt> {
    let content = raw
        .content
        .ok_or_else(|| BrokerError::malformed("missing `content` field"))?;

    let content: Value = serde_json::from_str(&content)
        .map_err(|e| BrokerError::malformed(format!("`content` is not valid JSON: {}", e)))?;

    let multimodal_image = raw.image_base64.unwrap_or_default();
    if !multimodal_image.is_empty() {
        let (_, data) = split_data_url(&multimodal_image);
        STANDARD
            .decode(data)
            .map_err(|e| BrokerError::malformed(format!("image is not valid base64: {}", e)))?;
    }

    Ok(Prompt {
        content,
        multimodal_image,
    })
}

/// Optional mime type and the trimmed base64 payload
fn split_data_url(value: &str) -> (Option<&str>, &str) {
    let value = value.trim();
    if let Some(rest) = value.strip_prefix("data:") {
        if let Some((header, data)) = rest.split_once(',') {
            let mime = header.strip_suffix(";base64").unwrap_or(header);
            let mime = (!mime.is_empty()).then_some(mime);
            return (mime, data.trim());
        }
    }
    (None, value)
}
