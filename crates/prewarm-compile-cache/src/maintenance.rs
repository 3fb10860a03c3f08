use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use prewarm_registry::VersionTag;
use tracing::{debug, info};

use crate::header::{CacheHeader, CACHE_MAGIC, HEADER_LEN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheFileStatus {
    /// Header parsed and the payload length matches it. The payload hash is not checked.
    Valid(CacheHeader),
    BadMagic(u32),
    Truncated,
    Unreadable(io::ErrorKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheFileInfo {
    pub path: PathBuf,
    pub size: u64,
    pub status: CacheFileStatus,
}

/// Describes every `*.cache` file in one version directory, sorted by file name.
pub fn list_cache_dir(dir: &Path) -> io::Result<Vec<CacheFileInfo>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("cache") {
            continue;
        }
        let size = entry.metadata()?.len();
        let status = inspect_file(&path, size);
        out.push(CacheFileInfo { path, size, status });
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

fn inspect_file(path: &Path, size: u64) -> CacheFileStatus {
    let mut raw = [0u8; HEADER_LEN];
    let read = fs::File::open(path).and_then(|mut f| f.read_exact(&mut raw));
    match read {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return CacheFileStatus::Truncated,
        Err(e) => return CacheFileStatus::Unreadable(e.kind()),
    }
    let header = CacheHeader::from_bytes(&raw);
    if header.magic != CACHE_MAGIC {
        return CacheFileStatus::BadMagic(header.magic);
    }
    if size != HEADER_LEN as u64 + u64::from(header.cache_size) {
        return CacheFileStatus::Truncated;
    }
    CacheFileStatus::Valid(header)
}

/// Removes version directories under `base_dir` other than `keep`'s. Only directories named
/// like a version tag (eight hex digits) that hold nothing but cache files and leftover temp
/// files are touched. Returns the removed paths.
pub fn clean_stale_versions(base_dir: &Path, keep: &VersionTag) -> io::Result<Vec<PathBuf>> {
    let keep = keep.dir_name();
    let mut removed = Vec::new();
    for entry in fs::read_dir(base_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !is_version_dir_name(name) || name == keep {
            debug!(name, "keeping cache directory");
            continue;
        }
        let path = entry.path();
        if !holds_only_cache_files(&path)? {
            debug!(path = %path.display(), "skipping directory with foreign entries");
            continue;
        }
        fs::remove_dir_all(&path)?;
        info!(path = %path.display(), "removed stale compile cache directory");
        removed.push(path);
    }
    removed.sort();
    Ok(removed)
}

fn holds_only_cache_files(dir: &Path) -> io::Result<bool> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            return Ok(false);
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            return Ok(false);
        };
        if !is_cache_artifact_name(name) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn is_cache_artifact_name(name: &str) -> bool {
    name.ends_with(".cache") || (name.starts_with(".prewarm-") && name.ends_with(".tmp"))
}

fn is_version_dir_name(name: &str) -> bool {
    name.len() == 8 && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
