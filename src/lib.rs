//! Startup acceleration for a scripting runtime host.
//!
//! [`Prewarm`] ties together the pieces a host needs at process start: the finalized external
//! reference table, the deserializers for snapshotted bindings, the on-disk compile cache and
//! the code caches of built-in modules restored from a snapshot.
//!
//! ```no_run
//! use prewarm::{
//!     DeserializerRegistry, ExternalReferenceRegistry, ModuleKind, Prewarm, PrewarmConfig,
//! };
//!
//! # fn main() -> prewarm::Result<()> {
//! let mut prewarm = Prewarm::new(
//!     PrewarmConfig::from_env(),
//!     ExternalReferenceRegistry::new(),
//!     DeserializerRegistry::new(),
//! )?;
//! let source = "module.exports = 42;";
//! let entry = prewarm.get_or_insert_compile_cache_entry(source, "/app/index.js", ModuleKind::CommonJs);
//! if let Some(key) = entry.map(|e| e.key()) {
//!     prewarm.maybe_save_compile_cache(key, false, || b"compiled".to_vec());
//! }
//! prewarm.persist_compile_cache();
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

use prewarm_registry::{VersionTag, TOOLCHAIN_VERSION};
use thiserror::Error;
use tracing::{debug, info};

pub use prewarm_compile_cache::{
    BuiltinCodeCache, CacheKey, CompileCacheConfig, CompileCacheEntry, CompileCacheError,
    CompileCacheStore, ModuleKind, PersistReport, SaveOutcome,
};
pub use prewarm_registry::{
    ExternalReference, ExternalReferenceRegistry, FinalizedReferences, RegistryError,
};
pub use prewarm_serdes::{DecodeError, TaggedReader, TaggedWriter};
pub use prewarm_snapshot::{
    BindingKind, BindingRef, BlobIdentity, BuildOptions, CodeCacheInfo, DeserializerRegistry,
    EnvState, RuntimeSource, RuntimeState, SnapshotData, SnapshotError, Snapshottable,
};

#[derive(Debug, Error)]
pub enum PrewarmError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

pub type Result<T> = std::result::Result<T, PrewarmError>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrewarmConfig {
    pub compile_cache: CompileCacheConfig,
    pub build: BuildOptions,
    /// Identifies the engine's code cache format; part of the compile cache directory name and
    /// of the snapshot identity.
    pub engine_cache_tag: u32,
    /// Version of the embedding runtime, stamped into snapshot blobs. Defaults to this crate's
    /// version.
    pub runtime_version: Option<String>,
}

impl PrewarmConfig {
    /// Compile cache settings from the environment, everything else at defaults.
    pub fn from_env() -> Self {
        Self {
            compile_cache: CompileCacheConfig::from_env(),
            ..Self::default()
        }
    }
}

pub struct Prewarm {
    config: PrewarmConfig,
    references: FinalizedReferences,
    deserializers: DeserializerRegistry,
    compile_cache: CompileCacheStore,
    builtin_code_cache: BuiltinCodeCache,
}

impl std::fmt::Debug for Prewarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prewarm")
            .field("config", &self.config)
            .field("references", &self.references.len())
            .field("compile_cache", &self.compile_cache)
            .field("builtin_code_cache", &self.builtin_code_cache.len())
            .finish_non_exhaustive()
    }
}

impl Prewarm {
    /// Finalizes `references` and enables the compile cache when `config` names a directory.
    /// A cache directory that cannot be used leaves the cache disabled; it is not an error.
    pub fn new(
        config: PrewarmConfig,
        mut references: ExternalReferenceRegistry,
        deserializers: DeserializerRegistry,
    ) -> Result<Self> {
        let references = references.finalize()?;
        let tag = VersionTag::current(config.engine_cache_tag);
        let compile_cache = CompileCacheStore::from_config(&config.compile_cache, &tag);
        info!(
            references = references.len(),
            compile_cache = ?compile_cache.cache_dir(),
            "prewarm initialized"
        );
        Ok(Self {
            config,
            references,
            deserializers,
            compile_cache,
            builtin_code_cache: BuiltinCodeCache::new(),
        })
    }

    /// Replaces the compile cache, e.g. with one backed by custom collaborators.
    pub fn with_compile_cache(mut self, store: CompileCacheStore) -> Self {
        self.compile_cache = store;
        self
    }

    pub fn config(&self) -> &PrewarmConfig {
        &self.config
    }

    pub fn external_references(&self) -> &FinalizedReferences {
        &self.references
    }

    pub fn deserializers(&self) -> &DeserializerRegistry {
        &self.deserializers
    }

    pub fn compile_cache(&self) -> &CompileCacheStore {
        &self.compile_cache
    }

    pub fn compile_cache_mut(&mut self) -> &mut CompileCacheStore {
        &mut self.compile_cache
    }

    pub fn builtin_code_cache(&self) -> &BuiltinCodeCache {
        &self.builtin_code_cache
    }

    pub fn get_or_insert_compile_cache_entry(
        &mut self,
        source: &str,
        filename: &str,
        kind: ModuleKind,
    ) -> Option<&CompileCacheEntry> {
        self.compile_cache.get_or_insert(source, filename, kind)
    }

    pub fn maybe_save_compile_cache(
        &mut self,
        key: CacheKey,
        rejected: bool,
        produce: impl FnOnce() -> Vec<u8>,
    ) -> Option<SaveOutcome> {
        self.compile_cache.maybe_save(key, rejected, produce)
    }

    /// Writes refreshed compile cache entries using the configured worker count. Failures are
    /// reported per entry.
    pub fn persist_compile_cache(&mut self) -> PersistReport {
        self.compile_cache
            .persist_parallel(self.config.compile_cache.persist_workers)
    }

    /// The identity stamped into blobs built here and required of blobs loaded here.
    pub fn snapshot_identity(&self) -> BlobIdentity {
        let version = self
            .config
            .runtime_version
            .as_deref()
            .unwrap_or(TOOLCHAIN_VERSION);
        BlobIdentity::for_runtime(version, self.config.engine_cache_tag)
    }

    pub fn build_snapshot_data<S: RuntimeSource + ?Sized>(
        &self,
        source: &mut S,
    ) -> Result<SnapshotData> {
        let data = prewarm_snapshot::SnapshotBuilder::new(&self.references, self.config.build)
            .build(source)?;
        Ok(data)
    }

    /// Builds a snapshot of `source` and encodes it as a blob stamped with
    /// [`Prewarm::snapshot_identity`].
    pub fn build_snapshot<S: RuntimeSource + ?Sized>(&self, source: &mut S) -> Result<Vec<u8>> {
        let blob = self
            .build_snapshot_data(source)?
            .to_blob_as(&self.snapshot_identity())?;
        Ok(blob)
    }

    /// Restores runtime state from a snapshot blob. Blobs from another runtime version or
    /// engine build are rejected before any binding is deserialized. Code caches embedded in
    /// the blob also become available through [`Prewarm::builtin_code_cache`].
    pub fn load_snapshot(&mut self, bytes: &[u8]) -> Result<RuntimeState> {
        let state = prewarm_snapshot::SnapshotLoader::new(&self.references, &self.deserializers)
            .expecting(self.snapshot_identity())
            .load(bytes)?;
        self.builtin_code_cache.extend(
            state
                .code_cache
                .iter()
                .map(|(id, data)| (id.to_string(), data.to_vec())),
        );
        debug!(
            builtin_code_cache = self.builtin_code_cache.len(),
            "merged snapshot code cache"
        );
        Ok(state)
    }
}
