use std::fmt;

use crate::data::Preamble;
use crate::error::Result;
use crate::format::BlobIdentity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub identity: BlobIdentity,
    /// Whether a loader expecting the identity passed to [`inspect_snapshot_against`] (this
    /// build's for [`inspect_snapshot`]) would accept the blob.
    pub compatible: bool,
    pub total_size: usize,
    pub engine_blob_size: usize,
    pub isolate_data_indices: usize,
    /// `(type name, payload size)` per binding.
    pub bindings: Vec<(String, usize)>,
    pub builtin_modules: Vec<String>,
    /// `(module id, size)` per embedded code cache.
    pub code_cache: Vec<(String, usize)>,
}

/// Validates a blob's magic and checksum and summarizes its contents without running any
/// deserializer. Blobs from other builds are summarized too; see
/// [`SnapshotSummary::compatible`].
pub fn inspect_snapshot(bytes: &[u8]) -> Result<SnapshotSummary> {
    inspect_snapshot_against(bytes, &BlobIdentity::current())
}

pub fn inspect_snapshot_against(
    bytes: &[u8],
    expected: &BlobIdentity,
) -> Result<SnapshotSummary> {
    let preamble = Preamble::parse(bytes)?;
    preamble.verify_checksum()?;
    let data = preamble.decode_body()?;
    let identity = preamble.identity;

    Ok(SnapshotSummary {
        compatible: identity == *expected,
        identity,
        total_size: bytes.len(),
        engine_blob_size: data.engine_blob.len(),
        isolate_data_indices: data.isolate_data_indices.len(),
        bindings: data
            .env_info
            .bindings
            .into_iter()
            .map(|b| (b.type_name, b.payload.len()))
            .collect(),
        builtin_modules: data.env_info.builtin_modules,
        code_cache: data
            .code_cache
            .into_iter()
            .map(|c| (c.id, c.data.len()))
            .collect(),
    })
}

/// Human-readable byte count: `512B`, `1.50KB`, `3.00MB`, `1.25GB`.
pub fn format_size(bytes: usize) -> String {
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{bytes}B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2}{}", UNITS[unit])
}

impl fmt::Display for SnapshotSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "version: {}", self.identity.version)?;
        writeln!(f, "arch: {}", self.identity.arch)?;
        writeln!(
            f,
            "compatible: {}",
            if self.compatible { "yes" } else { "no" }
        )?;
        writeln!(f, "size: {}", format_size(self.total_size))?;
        writeln!(f, "engine blob: {}", format_size(self.engine_blob_size))?;
        writeln!(f, "isolate data indices: {}", self.isolate_data_indices)?;
        writeln!(f, "bindings: {}", self.bindings.len())?;
        for (name, size) in &self.bindings {
            writeln!(f, "  {name} ({})", format_size(*size))?;
        }
        writeln!(f, "builtin modules: {}", self.builtin_modules.len())?;
        writeln!(f, "code cache: {}", self.code_cache.len())?;
        for (id, size) in &self.code_cache {
            writeln!(f, "  {id} ({})", format_size(*size))?;
        }
        Ok(())
    }
}
