//! Storage errors.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("no tile config for year {0}")]
    NotFound(i32),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed tile config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("result has no '{0}' layer")]
    MissingLayer(String),
}

impl StorageError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
