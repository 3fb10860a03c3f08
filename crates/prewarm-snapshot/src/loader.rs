use std::any::Any;
use std::fmt;

use prewarm_compile_cache::BuiltinCodeCache;
use prewarm_registry::FinalizedReferences;
use tracing::debug;

use crate::binding::{BindingKind, DeserializerRegistry};
use crate::data::{EnvState, SnapshotData};
use crate::error::Result;
use crate::format::BlobIdentity;

pub struct RestoredBinding {
    pub kind: BindingKind,
    pub id: u64,
    pub data_index: u64,
    pub object: Box<dyn Any + Send>,
}

impl fmt::Debug for RestoredBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestoredBinding")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("data_index", &self.data_index)
            .finish_non_exhaustive()
    }
}

/// Runtime state reconstructed from a snapshot, ready to hand to the engine.
#[derive(Debug)]
pub struct RuntimeState {
    pub engine_blob: Vec<u8>,
    /// Must be installed in the engine before it decodes `engine_blob`.
    pub external_references: FinalizedReferences,
    pub isolate_data_indices: Vec<u64>,
    pub builtin_modules: Vec<String>,
    pub env: EnvState,
    pub bindings: Vec<RestoredBinding>,
    pub code_cache: BuiltinCodeCache,
}

pub struct SnapshotLoader<'a> {
    references: &'a FinalizedReferences,
    deserializers: &'a DeserializerRegistry,
    expected: BlobIdentity,
}

impl<'a> SnapshotLoader<'a> {
    pub fn new(
        references: &'a FinalizedReferences,
        deserializers: &'a DeserializerRegistry,
    ) -> Self {
        Self {
            references,
            deserializers,
            expected: BlobIdentity::current(),
        }
    }

    /// Accept blobs stamped with `identity` instead of this build's.
    pub fn expecting(mut self, identity: BlobIdentity) -> Self {
        self.expected = identity;
        self
    }

    pub fn load(&self, bytes: &[u8]) -> Result<RuntimeState> {
        let data = SnapshotData::from_blob_expecting(bytes, &self.expected)?;
        self.restore(data)
    }

    /// Rebuilds runtime state from already decoded snapshot data.
    pub fn restore(&self, data: SnapshotData) -> Result<RuntimeState> {
        let SnapshotData {
            engine_blob,
            isolate_data_indices,
            env_info,
            code_cache,
        } = data;

        let mut bindings = Vec::with_capacity(env_info.bindings.len());
        for info in env_info.bindings {
            let (kind, object) = self
                .deserializers
                .deserialize(&info.type_name, info.payload)?;
            bindings.push(RestoredBinding {
                kind,
                id: info.id,
                data_index: info.index,
                object,
            });
        }

        let mut builtin_code_cache = BuiltinCodeCache::new();
        builtin_code_cache.extend(code_cache.into_iter().map(|info| (info.id, info.data)));

        debug!(
            bindings = bindings.len(),
            modules = env_info.builtin_modules.len(),
            code_cache = builtin_code_cache.len(),
            "restored snapshot"
        );
        Ok(RuntimeState {
            engine_blob,
            external_references: self.references.clone(),
            isolate_data_indices,
            builtin_modules: env_info.builtin_modules,
            env: env_info.state,
            bindings,
            code_cache: builtin_code_cache,
        })
    }
}
