//! Resolution of artifact references into downloadable payloads.
use std::path::Path;
use std::sync::Arc;

pub mod store;

pub use store::{ArtifactStore, ByteStream, LocalArtifactStore, StoredObject};

use crate::errors::{BrokerError, BrokerResult};
use store::{is_plain_segment, ORIGINAL_FILENAME};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type for a file name, by its lowercased extension
pub fn content_type_for(name: &str) -> &'static str {
    let extension = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("xls") => "application/vnd.ms-excel",
        Some("zip") => "application/zip",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// Strip characters that would break out of a quoted header parameter
pub fn sanitize_filename(name: &str) -> String {
    name.chars().filter(|c| *c != '"').collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Inline,
    Attachment,
}

impl Disposition {
    /// Images render in place; everything else downloads
    pub fn for_content_type(content_type: &str) -> Self {
        if content_type.starts_with("image/") {
            Disposition::Inline
        } else {
            Disposition::Attachment
        }
    }

    pub fn header_value(&self, filename: &str) -> String {
        let kind = match self {
            Disposition::Inline => "inline",
            Disposition::Attachment => "attachment",
        };
        format!("{}; filename=\"{}\"", kind, sanitize_filename(filename))
    }
}

pub struct ArtifactPayload {
    pub body: ByteStream,
    pub content_type: String,
    pub disposition: Disposition,
    pub filename: String,
    pub content_length: Option<u64>,
}

impl ArtifactPayload {
    fn from_object(object: StoredObject, name: &str) -> Self {
        let content_type = object
            .content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| content_type_for(name).to_string());
        let filename = object
            .metadata
            .get(ORIGINAL_FILENAME)
            .filter(|f| !f.is_empty())
            .map(|f| sanitize_filename(f))
            .unwrap_or_else(|| sanitize_filename(name));

        Self {
            disposition: Disposition::for_content_type(&content_type),
            body: object.body,
            content_type,
            filename,
            content_length: object.content_length,
        }
    }

    pub fn content_disposition(&self) -> String {
        self.disposition.header_value(&self.filename)
    }
}

#[derive(Clone)]
pub struct ArtifactResolver {
    store: Arc<dyn ArtifactStore>,
}

impl ArtifactResolver {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    pub async fn resolve_by_thread_and_name(
        &self,
        thread_id: &str,
        name: &str,
    ) -> BrokerResult<ArtifactPayload> {
        let object = self
            .store
            .open_thread_object(thread_id, name)
            .await
            .map_err(|e| {
                tracing::debug!(thread_id, name, error = %e, "thread artifact lookup failed");
                BrokerError::not_found(format!(
                    "Artifact '{}' not found for thread '{}'",
                    name, thread_id
                ))
            })?
            .ok_or_else(|| {
                BrokerError::not_found(format!(
                    "Artifact '{}' not found for thread '{}'",
                    name, thread_id
                ))
            })?;

        Ok(ArtifactPayload::from_object(object, name))
    }

    pub async fn resolve_by_id(&self, file_id: &str) -> BrokerResult<ArtifactPayload> {
        if file_id.is_empty() {
            return Err(BrokerError::malformed("File id is required"));
        }
        if !is_plain_segment(file_id) {
            return Err(BrokerError::not_found(format!("File '{}' not found", file_id)));
        }

        let object = self
            .store
            .open_file(file_id)
            .await?
            .ok_or_else(|| BrokerError::not_found(format!("File '{}' not found", file_id)))?;

        Ok(ArtifactPayload::from_object(object, file_id))
    }
}
