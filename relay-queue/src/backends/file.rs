use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use relay_common::internal;
use serde::Deserialize;
use tokio::fs;

use crate::{
    QueueError,
    message::QueuedMessage,
    store::{BlobStore, RecordStore},
    types::{JobId, MessageKey},
};

const TEMP_PREFIX: &str = ".tmp_";
const DELETED_SUFFIX: &str = ".deleted";

/// Reject paths that climb out of where they are pointed
fn validate_path(path: &Path) -> Result<(), String> {
    if path
        .components()
        .any(|component| component == std::path::Component::ParentDir)
    {
        return Err(format!(
            "Queue path cannot contain '..' components: {}",
            path.display()
        ));
    }

    Ok(())
}

/// Write `data` next to `path` under a temporary name, then move it into place
///
/// Every write gets its own temporary file, so concurrent writers of one path
/// never share one; the last rename wins.
async fn write_atomic(path: &Path, data: &[u8]) -> crate::Result<()> {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!("{TEMP_PREFIX}{filename}.{}", ulid::Ulid::new()));

    fs::write(&temp, data).await?;
    fs::rename(&temp, path).await?;

    Ok(())
}

/// Remove leftovers of interrupted writes and deletes
fn sweep(dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if name.starts_with(TEMP_PREFIX) || name.ends_with(DELETED_SUFFIX) {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }

    Ok(removed)
}

/// File-backed record store
///
/// Each job is one bincode file, `<job id>.bin`, in a single directory.
/// Writes go to a temporary file and are renamed into place so a crash never
/// leaves a half-written record behind. Deletes rename to `.deleted` first.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    path: PathBuf,
}

impl Default for FileRecordStore {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/spool/relay/queue"),
        }
    }
}

impl<'de> Deserialize<'de> for FileRecordStore {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Helper {
            path: PathBuf,
        }

        let helper = Helper::deserialize(deserializer)?;
        validate_path(&helper.path).map_err(serde::de::Error::custom)?;

        Ok(Self { path: helper.path })
    }
}

impl FileRecordStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the queue directory if needed and clear out debris from a crash
    ///
    /// # Errors
    ///
    /// If the directory cannot be created, is not a directory, or cannot be swept
    pub fn init(&self) -> crate::Result<()> {
        internal!("Initialising record store at {}", self.path.display());

        if !self.path.try_exists()? {
            internal!("{} does not exist, creating...", self.path.display());
            std::fs::create_dir_all(&self.path)?;
        } else if !self.path.is_dir() {
            return Err(QueueError::Io(std::io::Error::new(
                ErrorKind::NotADirectory,
                format!("Expected {} to be a directory", self.path.display()),
            )));
        }

        let removed = sweep(&self.path)?;
        if removed > 0 {
            internal!(
                level = INFO,
                "Removed {removed} stale temporary files from {}",
                self.path.display()
            );
        }

        Ok(())
    }

    fn record_path(&self, id: &JobId) -> PathBuf {
        self.path.join(id.filename())
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    #[tracing::instrument(level = tracing::Level::DEBUG, skip(self), fields(id = %id))]
    async fn lookup(&self, id: &JobId) -> crate::Result<QueuedMessage> {
        let content = match fs::read(self.record_path(id)).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(QueueError::NotFound(*id));
            }
            Err(err) => return Err(err.into()),
        };

        let (message, _) = bincode::serde::decode_from_slice::<QueuedMessage, _>(
            &content,
            bincode::config::standard(),
        )
        .map_err(crate::SerializationError::from)?;

        Ok(message)
    }

    #[tracing::instrument(level = tracing::Level::DEBUG, skip(self, message), fields(id = %message.id))]
    async fn save(&self, message: &QueuedMessage) -> crate::Result<()> {
        let encoded = bincode::serde::encode_to_vec(message, bincode::config::standard())
            .map_err(crate::SerializationError::from)?;

        write_atomic(&self.record_path(&message.id), &encoded).await
    }

    #[tracing::instrument(level = tracing::Level::DEBUG, skip(self), fields(id = %id))]
    async fn delete(&self, id: &JobId) -> crate::Result<()> {
        let path = self.record_path(id);
        let deleted = self.path.join(format!("{}{DELETED_SUFFIX}", id.filename()));

        match fs::rename(&path, &deleted).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(QueueError::NotFound(*id));
            }
            Err(err) => return Err(err.into()),
        }

        // Left for the next init sweep if this fails
        fs::remove_file(&deleted).await?;

        internal!(level = DEBUG, "Deleted record {id}");

        Ok(())
    }

    async fn list(&self) -> crate::Result<Vec<JobId>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if !filename.starts_with(TEMP_PREFIX)
                && let Some(id) = JobId::from_filename(&filename)
            {
                ids.push(id);
            }
        }

        ids.sort();

        Ok(ids)
    }
}

/// File-backed blob store
///
/// Blobs are stored at `<root>/<first two hex chars>/<key>`, so identical
/// message bodies share a single file.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    path: PathBuf,
}

impl Default for FileBlobStore {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/spool/relay/blobs"),
        }
    }
}

impl<'de> Deserialize<'de> for FileBlobStore {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Helper {
            path: PathBuf,
        }

        let helper = Helper::deserialize(deserializer)?;
        validate_path(&helper.path).map_err(serde::de::Error::custom)?;

        Ok(Self { path: helper.path })
    }
}

impl FileBlobStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// # Errors
    ///
    /// If the blob directory cannot be created
    pub fn init(&self) -> crate::Result<()> {
        internal!("Initialising blob store at {}", self.path.display());
        std::fs::create_dir_all(&self.path)?;
        Ok(())
    }

    fn blob_path(&self, key: &MessageKey) -> PathBuf {
        let key = key.as_str();
        self.path.join(&key[..2]).join(key)
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    #[tracing::instrument(level = tracing::Level::DEBUG, skip(self), fields(key = %key))]
    async fn get(&self, key: &MessageKey) -> crate::Result<Vec<u8>> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Err(QueueError::Unavailable(format!(
                "blob store root {} is missing",
                self.path.display()
            )));
        }

        match fs::read(self.blob_path(key)).await {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(QueueError::BlobNotFound(key.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    #[tracing::instrument(level = tracing::Level::DEBUG, skip(self, data), fields(size = data.len()))]
    async fn put(&self, data: &[u8]) -> crate::Result<MessageKey> {
        let key = MessageKey::for_content(data);
        let path = self.blob_path(&key);

        if fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(key);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        write_atomic(&path, data).await?;

        Ok(key)
    }
}
