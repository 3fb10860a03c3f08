use prewarm_registry::FinalizedReferences;
use tracing::debug;

use crate::binding::{serialize_binding, Snapshottable};
use crate::data::{BindingInfo, CodeCacheInfo, EnvSerializeInfo, EnvState, SnapshotData};
use crate::error::Result;
use crate::inspect::format_size;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Recompile every built-in module and embed the resulting code caches.
    pub embed_code_cache: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            embed_code_cache: true,
        }
    }
}

/// A binding the runtime wants captured, with the engine data slot that holds it.
pub struct BindingRef<'a> {
    pub data_index: u64,
    pub object: &'a dyn Snapshottable,
}

/// The live runtime a snapshot is taken from.
pub trait RuntimeSource {
    fn bindings(&self) -> Vec<BindingRef<'_>>;
    fn builtin_module_ids(&self) -> Vec<String>;
    fn env_state(&self) -> EnvState;
    fn isolate_data_indices(&mut self) -> Vec<u64>;
    /// Compiles every built-in module from scratch and returns the fresh code caches.
    fn compile_builtin_modules(&mut self) -> Result<Vec<CodeCacheInfo>>;
    /// Serializes the engine heap. Native pointers must be encoded as indices into
    /// `references`.
    fn create_engine_blob(&mut self, references: &FinalizedReferences) -> Result<Vec<u8>>;
}

pub struct SnapshotBuilder<'a> {
    references: &'a FinalizedReferences,
    options: BuildOptions,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(references: &'a FinalizedReferences, options: BuildOptions) -> Self {
        Self {
            references,
            options,
        }
    }

    pub fn build<S: RuntimeSource + ?Sized>(&self, source: &mut S) -> Result<SnapshotData> {
        let isolate_data_indices = source.isolate_data_indices();

        let bindings = source
            .bindings()
            .iter()
            .enumerate()
            .map(|(id, binding)| {
                let (kind, payload) = serialize_binding(binding.object)?;
                Ok(BindingInfo {
                    type_name: kind.type_name().to_string(),
                    id: id as u64,
                    index: binding.data_index,
                    payload,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(count = bindings.len(), "serialized bindings");

        let env_info = EnvSerializeInfo {
            bindings,
            builtin_modules: source.builtin_module_ids(),
            state: source.env_state(),
        };

        let code_cache = if self.options.embed_code_cache {
            let code_cache = source.compile_builtin_modules()?;
            for info in &code_cache {
                debug!(id = %info.id, size = %format_size(info.data.len()), "embedding code cache");
            }
            code_cache
        } else {
            Vec::new()
        };

        let engine_blob = source.create_engine_blob(self.references)?;
        debug!(
            engine_blob = %format_size(engine_blob.len()),
            references = self.references.len(),
            code_cache = code_cache.len(),
            "built snapshot"
        );

        Ok(SnapshotData {
            engine_blob,
            isolate_data_indices,
            env_info,
            code_cache,
        })
    }
}
