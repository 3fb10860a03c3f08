//! Startup snapshots: a single versioned, checksummed blob holding the engine heap image,
//! serialized native bindings, environment counters and embedded code caches.
//!
//! [`SnapshotBuilder`] captures a [`RuntimeSource`]; [`SnapshotLoader`] validates a blob
//! against the running build and rebuilds a [`RuntimeState`] from it.

#![forbid(unsafe_code)]

mod binding;
mod builder;
mod data;
mod error;
mod format;
mod inspect;
mod loader;

pub use crate::binding::{BindingKind, DeserializerRegistry, Snapshottable};
pub use crate::builder::{BindingRef, BuildOptions, RuntimeSource, SnapshotBuilder};
pub use crate::data::{
    AsyncHooksInfo, BindingInfo, CodeCacheInfo, EnvSerializeInfo, EnvState, ImmediateInfo,
    PerformanceStateInfo, PropInfo, SnapshotData, TickInfo,
};
pub use crate::error::{Result, SnapshotError};
pub use crate::format::{BlobIdentity, CHECKSUM_LEN, SNAPSHOT_MAGIC};
pub use crate::inspect::{
    format_size, inspect_snapshot, inspect_snapshot_against, SnapshotSummary,
};
pub use crate::loader::{RestoredBinding, RuntimeState, SnapshotLoader};
