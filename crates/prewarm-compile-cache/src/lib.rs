//! On-disk cache of compiled module code.
//!
//! Each cached artifact lives at `<base>/<version-tag>/<key>.cache` and starts with a
//! [`CacheHeader`] recording the size and hash of both the source it was compiled from and the
//! payload itself. A file is only trusted when all four match; anything else is a miss, never an
//! error.

#![forbid(unsafe_code)]

mod builtin;
mod config;
mod entry;
mod error;
mod fs;
mod header;
mod key;
mod maintenance;
mod store;

pub use crate::builtin::BuiltinCodeCache;
pub use crate::config::{
    CompileCacheConfig, DEFAULT_PERSIST_WORKERS, ENV_CACHE_DIR, ENV_DISABLE_CACHE,
    ENV_PERSIST_WORKERS,
};
pub use crate::entry::{CacheMiss, CompileCacheEntry, EntryState};
pub use crate::error::{CompileCacheError, Result};
pub use crate::fs::{AllowAll, CacheFs, PermissionCheck, PermissionScope, StdFs, TempFile};
pub use crate::header::{CacheHeader, CACHE_MAGIC, HEADER_LEN};
pub use crate::key::{CacheKey, ModuleKind};
pub use crate::maintenance::{clean_stale_versions, list_cache_dir, CacheFileInfo, CacheFileStatus};
pub use crate::store::{CacheStats, CompileCacheStore, PersistReport, SaveOutcome};
