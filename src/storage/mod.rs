//! Download directory layout on the local filesystem
//!
//! Every job writes into its own directory `{root}/{job_id}`, so a
//! cancelled or abandoned attempt can be discarded without touching others.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::job::JobId;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid job directory name: {0}")]
    InvalidKey(String),

    #[error("Storage IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone)]
pub struct DownloadRoot {
    root: PathBuf,
}

impl DownloadRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn job_dir(&self, id: &JobId) -> Result<PathBuf> {
        let name = id.as_str();
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', '\0'])
        {
            return Err(StorageError::InvalidKey(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    /// Create the job directory, returning its path
    pub async fn prepare(&self, id: &JobId) -> Result<PathBuf> {
        let dir = self.job_dir(id)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StorageError::Io {
                path: dir.clone(),
                source,
            })?;
        Ok(dir)
    }

    /// Remove the job directory and everything in it; returns whether it existed
    pub async fn discard(&self, id: &JobId) -> Result<bool> {
        let dir = self.job_dir(id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::debug!(job_id = %id, path = %dir.display(), "Discarded job directory");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StorageError::Io { path: dir, source }),
        }
    }
}
