use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use prewarm_registry::{content_hash, VersionTag};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config::CompileCacheConfig;
use crate::entry::{CacheMiss, CompileCacheEntry, EntryState};
use crate::error::{CompileCacheError, Result};
use crate::fs::{AllowAll, CacheFs, PermissionCheck, PermissionScope, StdFs};
use crate::header::{CacheHeader, CACHE_MAGIC, HEADER_LEN};
use crate::key::{CacheKey, ModuleKind};

/// What [`CompileCacheStore::maybe_save`] did with an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The entry already holds an artifact the engine accepted.
    Kept,
    /// First artifact for this entry.
    Initialized,
    /// Replaced an artifact the engine rejected.
    Refreshed,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PersistReport {
    pub written: Vec<CacheKey>,
    /// Entries with nothing new to write.
    pub skipped: usize,
    pub failed: Vec<(CacheKey, String)>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub lookups: u64,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
}

/// Process-wide compile cache.
///
/// Disabled until [`CompileCacheStore::enable`] succeeds; while disabled every lookup returns
/// `None` and nothing touches the disk.
pub struct CompileCacheStore {
    fs: Arc<dyn CacheFs>,
    permissions: Arc<dyn PermissionCheck>,
    cache_dir: Option<PathBuf>,
    entries: HashMap<CacheKey, CompileCacheEntry>,
    stats: CacheStats,
}

impl fmt::Debug for CompileCacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompileCacheStore")
            .field("cache_dir", &self.cache_dir)
            .field("entries", &self.entries.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Default for CompileCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CompileCacheStore {
    pub fn new() -> Self {
        Self::with_collaborators(Arc::new(StdFs), Arc::new(AllowAll))
    }

    pub fn with_collaborators(
        fs: Arc<dyn CacheFs>,
        permissions: Arc<dyn PermissionCheck>,
    ) -> Self {
        Self {
            fs,
            permissions,
            cache_dir: None,
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Builds a store with the real file system and enables it as `config` asks. Failures are
    /// logged and leave the cache disabled.
    pub fn from_config(config: &CompileCacheConfig, tag: &VersionTag) -> Self {
        let mut store = Self::new();
        store.enable_from_config(config, tag);
        store
    }

    pub fn enable_from_config(
        &mut self,
        config: &CompileCacheConfig,
        tag: &VersionTag,
    ) -> Option<PathBuf> {
        let base = config.effective_dir()?;
        match self.enable(base, tag) {
            Ok(dir) => Some(dir),
            Err(err) => {
                warn!(dir = %base.display(), error = %err, "compile cache disabled");
                None
            }
        }
    }

    /// Resolves `<base_dir>/<version tag>`, creating it if needed, and turns caching on.
    pub fn enable(&mut self, base_dir: &Path, tag: &VersionTag) -> Result<PathBuf> {
        let dir = base_dir.join(tag.dir_name());
        for scope in [PermissionScope::FileSystemRead, PermissionScope::FileSystemWrite] {
            if !self.permissions.is_granted(scope, &dir) {
                return Err(CompileCacheError::PermissionDenied { scope, path: dir });
            }
        }
        self.fs.create_dir_all(&dir)?;
        let dir = self.fs.canonicalize(&dir)?;

        if self.cache_dir.as_ref() != Some(&dir) {
            self.entries.clear();
        }
        debug!(dir = %dir.display(), tag = %tag, "compile cache enabled");
        self.cache_dir = Some(dir.clone());
        Ok(dir)
    }

    pub fn is_enabled(&self) -> bool {
        self.cache_dir.is_some()
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, key: CacheKey) -> Option<&CompileCacheEntry> {
        self.entries.get(&key)
    }

    /// Returns the entry for `filename`, loading it from disk when there is no in-memory entry
    /// for the same source. Returns `None` when the cache is disabled.
    pub fn get_or_insert(
        &mut self,
        source: &str,
        filename: &str,
        kind: ModuleKind,
    ) -> Option<&CompileCacheEntry> {
        let dir = self.cache_dir.as_deref()?;
        let Ok(code_size) = u32::try_from(source.len()) else {
            debug!(filename, len = source.len(), "source too large for compile cache");
            return None;
        };
        let code_hash = content_hash(&[source.as_bytes()]);
        let key = CacheKey::new(filename, kind);
        self.stats.lookups += 1;

        let in_memory = self
            .entries
            .get(&key)
            .is_some_and(|e| e.code_size == code_size && e.code_hash == code_hash);
        if in_memory {
            self.stats.memory_hits += 1;
            debug!(%key, filename, %kind, "compile cache entry already in memory");
            return self.entries.get(&key);
        }

        let mut entry = CompileCacheEntry::new(
            key,
            kind,
            code_size,
            code_hash,
            filename,
            dir.join(key.file_name()),
        );
        match read_cache_file(&*self.fs, &entry.cache_filename, code_size, code_hash) {
            Ok((payload, cache_hash)) => {
                debug!(
                    %key,
                    filename,
                    %kind,
                    path = %entry.cache_filename.display(),
                    size = payload.len(),
                    "compile cache hit"
                );
                entry.cache = Some(payload);
                entry.cache_hash = cache_hash;
                entry.state = EntryState::LookupHit;
                self.stats.disk_hits += 1;
            }
            Err(miss) => {
                debug!(
                    %key,
                    filename,
                    %kind,
                    path = %entry.cache_filename.display(),
                    reason = %miss,
                    "compile cache miss"
                );
                entry.state = EntryState::LookupMiss;
                entry.miss = Some(miss);
                self.stats.misses += 1;
            }
        }
        self.entries.insert(key, entry);
        self.entries.get(&key)
    }

    /// Called after the engine compiled the module for `key`. Produces a new artifact unless
    /// the entry already holds one that was not `rejected`. Returns `None` for unknown keys.
    pub fn maybe_save(
        &mut self,
        key: CacheKey,
        rejected: bool,
        produce: impl FnOnce() -> Vec<u8>,
    ) -> Option<SaveOutcome> {
        let entry = self.entries.get_mut(&key)?;
        if entry.cache.is_some() && !rejected {
            if entry.state == EntryState::LookupHit {
                entry.state = EntryState::Accepted;
            }
            debug!(
                %key,
                filename = %entry.source_filename,
                "keeping compile cache entry"
            );
            return Some(SaveOutcome::Kept);
        }

        let outcome = if entry.cache.is_some() {
            entry.state = EntryState::Rejected;
            SaveOutcome::Refreshed
        } else {
            SaveOutcome::Initialized
        };
        let payload = produce();
        debug!(
            %key,
            filename = %entry.source_filename,
            kind = %entry.kind,
            size = payload.len(),
            "{} compile cache entry",
            if outcome == SaveOutcome::Initialized {
                "initializing"
            } else {
                "refreshing"
            }
        );
        entry.cache_hash = content_hash(&[&payload]);
        entry.cache = Some(payload);
        entry.refreshed = true;
        entry.state = EntryState::Refreshed;
        Some(outcome)
    }

    /// Writes every refreshed entry to disk, one at a time.
    pub fn persist(&mut self) -> PersistReport {
        let (jobs, skipped) = self.pending_writes();
        let fs = &*self.fs;
        let results: Vec<_> = jobs.iter().map(|job| (job.key, job.run(fs))).collect();
        drop(jobs);
        self.apply_results(results, skipped)
    }

    /// Like [`CompileCacheStore::persist`], with writes spread over at most `max_workers`
    /// threads. Each entry still goes through its own temp file and rename.
    pub fn persist_parallel(&mut self, max_workers: usize) -> PersistReport {
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(max_workers.max(1))
            .thread_name(|i| format!("prewarm-cache-{i}"))
            .build()
        {
            Ok(pool) => pool,
            Err(err) => {
                warn!(error = %err, "failed to start compile cache writers; persisting serially");
                return self.persist();
            }
        };

        let (jobs, skipped) = self.pending_writes();
        let fs = &*self.fs;
        let results: Vec<_> =
            pool.install(|| jobs.par_iter().map(|job| (job.key, job.run(fs))).collect());
        drop(jobs);
        self.apply_results(results, skipped)
    }

    fn pending_writes(&self) -> (Vec<WriteJob<'_>>, usize) {
        let mut jobs = Vec::new();
        let mut skipped = 0;
        for entry in self.entries.values() {
            let Some(payload) = entry.cache.as_deref().filter(|_| entry.refreshed) else {
                skipped += 1;
                continue;
            };
            jobs.push(WriteJob {
                key: entry.key,
                target: &entry.cache_filename,
                code_size: entry.code_size,
                code_hash: entry.code_hash,
                cache_hash: entry.cache_hash,
                payload,
            });
        }
        jobs.sort_by_key(|job| job.key);
        (jobs, skipped)
    }

    fn apply_results(
        &mut self,
        results: Vec<(CacheKey, io::Result<()>)>,
        skipped: usize,
    ) -> PersistReport {
        let mut report = PersistReport {
            skipped,
            ..PersistReport::default()
        };
        for (key, result) in results {
            let Some(entry) = self.entries.get_mut(&key) else {
                continue;
            };
            match result {
                Ok(()) => {
                    debug!(%key, path = %entry.cache_filename.display(), "persisted compile cache entry");
                    entry.refreshed = false;
                    entry.state = EntryState::Persisted;
                    report.written.push(key);
                }
                Err(err) => {
                    warn!(
                        %key,
                        path = %entry.cache_filename.display(),
                        error = %err,
                        "failed to persist compile cache entry"
                    );
                    report.failed.push((key, err.to_string()));
                }
            }
        }
        report
    }
}

struct WriteJob<'a> {
    key: CacheKey,
    target: &'a Path,
    code_size: u32,
    code_hash: u32,
    cache_hash: u32,
    payload: &'a [u8],
}

impl WriteJob<'_> {
    fn run(&self, fs: &dyn CacheFs) -> io::Result<()> {
        let cache_size = u32::try_from(self.payload.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "cache payload exceeds 4 GiB")
        })?;
        let header = CacheHeader::new(self.code_size, self.code_hash, cache_size, self.cache_hash);
        let dir = self.target.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "cache file has no parent directory")
        })?;

        let mut tmp = fs.create_temp(dir)?;
        tmp.write_all(&header.to_bytes())?;
        tmp.write_all(self.payload)?;
        tmp.flush()?;
        tmp.persist(self.target)
    }
}

fn read_cache_file(
    fs: &dyn CacheFs,
    path: &Path,
    code_size: u32,
    code_hash: u32,
) -> std::result::Result<(Vec<u8>, u32), CacheMiss> {
    let mut file = fs.open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => CacheMiss::NotFound,
        kind => CacheMiss::Unreadable(kind),
    })?;

    let mut raw = [0u8; HEADER_LEN];
    file.read_exact(&mut raw).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => CacheMiss::TruncatedHeader,
        kind => CacheMiss::Unreadable(kind),
    })?;
    let header = CacheHeader::from_bytes(&raw);
    if header.magic != CACHE_MAGIC {
        return Err(CacheMiss::BadMagic(header.magic));
    }
    if header.code_size != code_size {
        return Err(CacheMiss::CodeSizeMismatch {
            expected: code_size,
            found: header.code_size,
        });
    }
    if header.code_hash != code_hash {
        return Err(CacheMiss::CodeHashMismatch {
            expected: code_hash,
            found: header.code_hash,
        });
    }

    // One byte past the declared size is enough to detect trailing data.
    let mut payload = Vec::with_capacity(4096);
    file.take(u64::from(header.cache_size) + 1)
        .read_to_end(&mut payload)
        .map_err(|e| CacheMiss::Unreadable(e.kind()))?;
    if payload.len() != header.cache_size as usize {
        return Err(CacheMiss::CacheSizeMismatch {
            expected: header.cache_size,
            found: payload.len(),
        });
    }
    let cache_hash = content_hash(&[&payload]);
    if cache_hash != header.cache_hash {
        return Err(CacheMiss::CacheHashMismatch {
            expected: header.cache_hash,
            found: cache_hash,
        });
    }
    Ok((payload, cache_hash))
}
