use std::path::{Path, PathBuf};

/// Base directory for the compile cache. Unset means no caching.
pub const ENV_CACHE_DIR: &str = "PREWARM_COMPILE_CACHE";
/// Any non-empty value turns the cache off even if a directory is configured.
pub const ENV_DISABLE_CACHE: &str = "PREWARM_DISABLE_COMPILE_CACHE";
/// Thread count used when persisting entries.
pub const ENV_PERSIST_WORKERS: &str = "PREWARM_COMPILE_CACHE_WORKERS";

pub const DEFAULT_PERSIST_WORKERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileCacheConfig {
    pub dir: Option<PathBuf>,
    pub disabled: bool,
    pub persist_workers: usize,
}

impl Default for CompileCacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            disabled: false,
            persist_workers: DEFAULT_PERSIST_WORKERS,
        }
    }
}

impl CompileCacheConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the same variables as [`CompileCacheConfig::from_env`] through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let dir = lookup(ENV_CACHE_DIR)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let disabled = lookup(ENV_DISABLE_CACHE).is_some_and(|v| !v.is_empty());
        let persist_workers = match lookup(ENV_PERSIST_WORKERS) {
            None => DEFAULT_PERSIST_WORKERS,
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) => n.max(1),
                Err(_) => {
                    tracing::warn!(
                        var = ENV_PERSIST_WORKERS,
                        value = %raw,
                        "ignoring invalid worker count"
                    );
                    DEFAULT_PERSIST_WORKERS
                }
            },
        };
        Self {
            dir,
            disabled,
            persist_workers,
        }
    }

    /// The directory to enable, or `None` when caching is off.
    pub fn effective_dir(&self) -> Option<&Path> {
        if self.disabled {
            return None;
        }
        self.dir.as_deref()
    }
}
