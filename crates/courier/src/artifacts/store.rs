use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Metadata key for the name a file was uploaded under
pub const ORIGINAL_FILENAME: &str = "filename";

/// An object opened for reading. The body is not read until polled.
pub struct StoredObject {
    pub body: ByteStream,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub metadata: HashMap<String, String>,
}

impl std::fmt::Debug for StoredObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredObject")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Where artifacts live. `Ok(None)` means the object does not exist.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn open_thread_object(&self, thread_id: &str, name: &str) -> Result<Option<StoredObject>>;

    async fn open_file(&self, file_id: &str) -> Result<Option<StoredObject>>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileMeta {
    filename: Option<String>,
    content_type: Option<String>,
}

/// Artifacts on the local filesystem.
///
/// ```text
/// <root>/threads/<thread_id>/<name>
/// <root>/files/<file_id>
/// <root>/files/<file_id>.meta.json   {"filename": ..., "contentType": ...}
/// ```
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

/// True for a single relative path segment: never `..`, `.`, a root, a prefix
/// or anything containing a separator
pub fn is_plain_segment(segment: &str) -> bool {
    let mut components = Path::new(segment).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !segment.contains(['/', '\\'])
}

fn checked_segment(segment: &str) -> Result<&str> {
    if is_plain_segment(segment) {
        Ok(segment)
    } else {
        Err(anyhow!("invalid artifact path segment: {:?}", segment))
    }
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn open_path(&self, path: &Path) -> Result<Option<(File, u64)>> {
        let file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("open {}", path.display())),
        };
        let meta = file
            .metadata()
            .await
            .with_context(|| format!("stat {}", path.display()))?;
        if !meta.is_file() {
            return Ok(None);
        }
        Ok(Some((file, meta.len())))
    }

    async fn read_meta(&self, path: &Path) -> Result<FileMeta> {
        match tokio::fs::read(path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .with_context(|| format!("parse metadata {}", path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(FileMeta::default()),
            Err(e) => Err(e).with_context(|| format!("read metadata {}", path.display())),
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn open_thread_object(&self, thread_id: &str, name: &str) -> Result<Option<StoredObject>> {
        let path = self
            .root
            .join("threads")
            .join(checked_segment(thread_id)?)
            .join(checked_segment(name)?);

        Ok(self.open_path(&path).await?.map(|(file, len)| StoredObject {
            body: ReaderStream::new(file).boxed(),
            content_type: None,
            content_length: Some(len),
            metadata: HashMap::new(),
        }))
    }

    async fn open_file(&self, file_id: &str) -> Result<Option<StoredObject>> {
        let files = self.root.join("files");
        let file_id = checked_segment(file_id)?;
        let Some((file, len)) = self.open_path(&files.join(file_id)).await? else {
            return Ok(None);
        };

        let meta = self
            .read_meta(&files.join(format!("{}.meta.json", file_id)))
            .await?;
        let mut metadata = HashMap::new();
        if let Some(filename) = meta.filename {
            metadata.insert(ORIGINAL_FILENAME.to_string(), filename);
        }

        Ok(Some(StoredObject {
            body: ReaderStream::new(file).boxed(),
            content_type: meta.content_type,
            content_length: Some(len),
            metadata,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use tempfile::TempDir;

    async fn collect(object: StoredObject) -> Vec<u8> {
        let chunks: Vec<Bytes> = object.body.try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn test_thread_object_streams_contents() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("threads/t1")).unwrap();
        std::fs::write(dir.path().join("threads/t1/report.csv"), "a,b\n1,2\n").unwrap();

        let store = LocalArtifactStore::new(dir.path());
        let object = store
            .open_thread_object("t1", "report.csv")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(object.content_length, Some(8));
        assert!(object.content_type.is_none());
        assert_eq!(collect(object).await, b"a,b\n1,2\n");
    }

    #[tokio::test]
    async fn test_file_with_metadata() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("files")).unwrap();
        std::fs::write(dir.path().join("files/f-1"), [0u8, 1, 2]).unwrap();
        std::fs::write(
            dir.path().join("files/f-1.meta.json"),
            r#"{"filename":"q3 \"final\".xlsx","contentType":"application/vnd.ms-excel"}"#,
        )
        .unwrap();

        let store = LocalArtifactStore::new(dir.path());
        let object = store.open_file("f-1").await.unwrap().unwrap();

        assert_eq!(object.content_type.as_deref(), Some("application/vnd.ms-excel"));
        assert_eq!(
            object.metadata.get(ORIGINAL_FILENAME).map(String::as_str),
            Some("q3 \"final\".xlsx")
        );
        assert_eq!(collect(object).await, vec![0u8, 1, 2]);
    }

    #[tokio::test]
    async fn test_missing_objects_are_none() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path());

        assert!(store.open_file("abc").await.unwrap().is_none());
        assert!(store
            .open_thread_object("t1", "missing.png")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_rejects_escaping_segments() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path().join("root"));

        assert!(store.open_file("..").await.is_err());
        assert!(store.open_file("../secret").await.is_err());
        assert!(store.open_thread_object("t1", "/etc/passwd").await.is_err());
        assert!(store.open_thread_object("..", "x").await.is_err());
    }
}
