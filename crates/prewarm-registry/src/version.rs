use std::fmt;

use crate::hash::{content_hash, to_hex};

/// Version of this runtime build. Snapshots and compile caches from other builds are rejected.
pub const TOOLCHAIN_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const TARGET_ARCH: &str = std::env::consts::ARCH;

/// Everything that makes compiled artifacts from one runtime unusable by another.
///
/// The compile cache keeps one subdirectory per tag so that different runtime builds, engine
/// flag sets and users can share a base directory without trampling each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionTag {
    pub toolchain: String,
    pub arch: String,
    /// Opaque tag supplied by the engine; changes with engine version and code-affecting flags.
    pub engine_tag: u32,
    pub user: Option<u32>,
}

impl VersionTag {
    pub fn current(engine_tag: u32) -> Self {
        Self {
            toolchain: TOOLCHAIN_VERSION.to_string(),
            arch: TARGET_ARCH.to_string(),
            engine_tag,
            user: effective_user_id(),
        }
    }

    pub fn hash(&self) -> u32 {
        // Length prefixes keep ("1.0", "1x86") and ("1.01", "x86") apart.
        let toolchain_len = (self.toolchain.len() as u64).to_le_bytes();
        let arch_len = (self.arch.len() as u64).to_le_bytes();
        let user = self.user.map(u32::to_le_bytes);
        content_hash(&[
            &self.engine_tag.to_le_bytes()[..],
            &toolchain_len[..],
            self.toolchain.as_bytes(),
            &arch_len[..],
            self.arch.as_bytes(),
            user.as_ref().map_or(&[][..], |u| &u[..]),
        ])
    }

    pub fn dir_name(&self) -> String {
        to_hex(self.hash())
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir_name())
    }
}

#[cfg(unix)]
fn effective_user_id() -> Option<u32> {
    // SAFETY: geteuid has no preconditions and cannot fail.
    Some(unsafe { libc::geteuid() })
}

#[cfg(not(unix))]
fn effective_user_id() -> Option<u32> {
    None
}
