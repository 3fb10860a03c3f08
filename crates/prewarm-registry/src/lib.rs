//! Stable identities shared by the compile cache and the startup snapshot: content hashes,
//! the runtime version tag, and the table of native addresses an engine heap may reference.

mod external_refs;
mod hash;
mod version;

pub use crate::external_refs::{
    ExternalReference, ExternalReferenceRegistry, FinalizedReferences, RegistryError,
};
pub use crate::hash::{content_hash, content_hash_with, to_hex, Checksum, Crc32};
pub use crate::version::{VersionTag, TARGET_ARCH, TOOLCHAIN_VERSION};
