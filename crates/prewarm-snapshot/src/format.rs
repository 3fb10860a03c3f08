use prewarm_registry::{TARGET_ARCH, TOOLCHAIN_VERSION};

/// `"PWSNAP01"` read as a little-endian `u64`. The trailing digits are the layout revision:
/// any change to the record order below must bump it.
///
/// ```text
/// magic            u64
/// version          string
/// arch             string
/// engine_blob      byte vector
/// isolate_indices  u64 vector
/// env_info         EnvSerializeInfo
/// code_cache       CodeCacheInfo vector
/// checksum         u32 over everything above
/// ```
pub const SNAPSHOT_MAGIC: u64 = u64::from_le_bytes(*b"PWSNAP01");

pub const CHECKSUM_LEN: usize = 4;

pub(crate) const MAX_IDENTITY_LEN: usize = 256;
pub(crate) const MAX_NAME_LEN: usize = 64 * 1024;

/// The build a blob belongs to. Blobs only load into the exact same version and architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobIdentity {
    pub version: String,
    pub arch: String,
}

impl BlobIdentity {
    pub fn current() -> Self {
        Self {
            version: TOOLCHAIN_VERSION.to_string(),
            arch: TARGET_ARCH.to_string(),
        }
    }

    /// Identity of a host runtime build on this architecture. The engine's cache tag is part
    /// of the version so that blobs never cross engine builds.
    pub fn for_runtime(runtime_version: &str, engine_tag: u32) -> Self {
        Self {
            version: format!("{runtime_version}+engine.{engine_tag:08x}"),
            arch: TARGET_ARCH.to_string(),
        }
    }
}

impl Default for BlobIdentity {
    fn default() -> Self {
        Self::current()
    }
}
