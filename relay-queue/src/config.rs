use std::sync::Arc;

use serde::Deserialize;

use crate::{
    backends::{FileBlobStore, FileRecordStore, MemoryBlobStore, MemoryRecordStore},
    store::{BlobStore, RecordStore},
};

/// Where queued jobs and raw messages are kept
///
/// File-backed, in RON:
/// ```ron
/// spool: File(
///     records: (path: "/var/spool/relay/queue"),
///     blobs: (path: "/var/spool/relay/blobs"),
/// ),
/// ```
///
/// Memory-backed, for development (nothing survives a restart):
/// ```ron
/// spool: Memory,
/// ```
#[derive(Debug, Clone, Deserialize)]
pub enum SpoolConfig {
    File {
        #[serde(default)]
        records: FileRecordStore,
        #[serde(default)]
        blobs: FileBlobStore,
    },
    Memory,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self::File {
            records: FileRecordStore::default(),
            blobs: FileBlobStore::default(),
        }
    }
}

impl SpoolConfig {
    /// Build the configured stores, creating directories as needed
    ///
    /// # Errors
    ///
    /// If a file-backed store cannot be initialised
    pub fn into_stores(self) -> crate::Result<(Arc<dyn RecordStore>, Arc<dyn BlobStore>)> {
        match self {
            Self::File { records, blobs } => {
                records.init()?;
                blobs.init()?;
                Ok((Arc::new(records), Arc::new(blobs)))
            }
            Self::Memory => Ok((
                Arc::new(MemoryRecordStore::new()),
                Arc::new(MemoryBlobStore::new()),
            )),
        }
    }
}
