use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::key::{CacheKey, ModuleKind};

/// Lifecycle of a [`CompileCacheEntry`].
///
/// `Uninitialized -> LookupMiss | LookupHit -> Accepted | Rejected -> Refreshed -> Persisted`.
/// A `Persisted` entry goes back to `Refreshed` if the engine later hands it a new artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Uninitialized,
    /// No usable artifact on disk.
    LookupMiss,
    /// A validated artifact was loaded from disk.
    LookupHit,
    /// The engine consumed the loaded artifact.
    Accepted,
    /// The engine refused the loaded artifact.
    Rejected,
    /// A freshly produced artifact is waiting to be written.
    Refreshed,
    Persisted,
}

/// Why a lookup did not produce a usable artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheMiss {
    NotFound,
    Unreadable(io::ErrorKind),
    TruncatedHeader,
    BadMagic(u32),
    CodeSizeMismatch { expected: u32, found: u32 },
    CodeHashMismatch { expected: u32, found: u32 },
    CacheSizeMismatch { expected: u32, found: usize },
    CacheHashMismatch { expected: u32, found: u32 },
}

impl fmt::Display for CacheMiss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "no cache file"),
            Self::Unreadable(kind) => write!(f, "cache file unreadable: {kind}"),
            Self::TruncatedHeader => write!(f, "cache file shorter than its header"),
            Self::BadMagic(found) => write!(f, "bad magic {found:#010x}"),
            Self::CodeSizeMismatch { expected, found } => {
                write!(f, "code size mismatch: {found} != {expected}")
            }
            Self::CodeHashMismatch { expected, found } => {
                write!(f, "code hash mismatch: {found:08x} != {expected:08x}")
            }
            Self::CacheSizeMismatch { expected, found } => {
                write!(f, "cache size mismatch: {found} != {expected}")
            }
            Self::CacheHashMismatch { expected, found } => {
                write!(f, "cache hash mismatch: {found:08x} != {expected:08x}")
            }
        }
    }
}

/// One module's slot in the compile cache.
#[derive(Debug)]
pub struct CompileCacheEntry {
    pub(crate) key: CacheKey,
    pub(crate) kind: ModuleKind,
    pub(crate) code_size: u32,
    pub(crate) code_hash: u32,
    pub(crate) cache: Option<Vec<u8>>,
    pub(crate) cache_hash: u32,
    pub(crate) source_filename: String,
    pub(crate) cache_filename: PathBuf,
    pub(crate) refreshed: bool,
    pub(crate) state: EntryState,
    pub(crate) miss: Option<CacheMiss>,
}

impl CompileCacheEntry {
    pub(crate) fn new(
        key: CacheKey,
        kind: ModuleKind,
        code_size: u32,
        code_hash: u32,
        source_filename: &str,
        cache_filename: PathBuf,
    ) -> Self {
        Self {
            key,
            kind,
            code_size,
            code_hash,
            cache: None,
            cache_hash: 0,
            source_filename: source_filename.to_string(),
            cache_filename,
            refreshed: false,
            state: EntryState::Uninitialized,
            miss: None,
        }
    }

    pub fn key(&self) -> CacheKey {
        self.key
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    pub fn code_size(&self) -> u32 {
        self.code_size
    }

    pub fn code_hash(&self) -> u32 {
        self.code_hash
    }

    /// The cached artifact, if one was loaded or produced.
    pub fn cache(&self) -> Option<&[u8]> {
        self.cache.as_deref()
    }

    /// An owned copy for handing to the engine, which takes ownership of its input.
    pub fn copy_cache(&self) -> Option<Vec<u8>> {
        self.cache.clone()
    }

    pub fn source_filename(&self) -> &str {
        &self.source_filename
    }

    pub fn cache_filename(&self) -> &Path {
        &self.cache_filename
    }

    /// Whether the payload changed since it was last read from or written to disk.
    pub fn is_refreshed(&self) -> bool {
        self.refreshed
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    /// Reason the last disk lookup missed, if it did.
    pub fn miss_reason(&self) -> Option<&CacheMiss> {
        self.miss.as_ref()
    }
}
