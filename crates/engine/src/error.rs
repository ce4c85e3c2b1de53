use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading volumes, resolving covers or maintaining the
/// thumbnail store.
#[derive(Debug, Error)]
pub enum Error {
    /// A directory or file could not be read or written.
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A page or cover image could not be decoded.
    #[error("decode image {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// A thumbnail could not be re-encoded for the disk tier.
    #[error("encode thumbnail: {0}")]
    Encode(#[source] image::ImageError),

    /// The external archive tool is missing or failed.
    #[error("extract archive {}: {reason}", path.display())]
    Extraction { path: PathBuf, reason: String },

    /// A disk-tier metadata record could not be (de)serialized.
    #[error("thumbnail metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn extraction(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Extraction {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
