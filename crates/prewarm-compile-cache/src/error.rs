use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::fs::PermissionScope;

pub type Result<T> = std::result::Result<T, CompileCacheError>;

/// Failures that disable the cache. Per-entry read and write problems never surface here; they
/// are logged and turn into misses or skipped writes.
#[derive(Debug, Error)]
pub enum CompileCacheError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("{scope} access to {} is not permitted", path.display())]
    PermissionDenied {
        scope: PermissionScope,
        path: PathBuf,
    },
}
