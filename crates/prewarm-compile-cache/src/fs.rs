use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Kind of access the cache asks the embedder's permission model for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionScope {
    FileSystemRead,
    FileSystemWrite,
}

impl fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FileSystemRead => "file system read",
            Self::FileSystemWrite => "file system write",
        })
    }
}

pub trait PermissionCheck: Send + Sync {
    fn is_granted(&self, scope: PermissionScope, path: &Path) -> bool;
}

/// Grants everything; the default when no permission model is active.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl PermissionCheck for AllowAll {
    fn is_granted(&self, _scope: PermissionScope, _path: &Path) -> bool {
        true
    }
}

/// A file being written next to its final location. Dropping it without calling
/// [`TempFile::persist`] must leave the destination untouched.
pub trait TempFile: Write + Send {
    /// Atomically replaces `target` with this file's contents.
    fn persist(self: Box<Self>, target: &Path) -> io::Result<()>;
}

/// File system operations used by the cache.
pub trait CacheFs: Send + Sync {
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;
    /// Creates an anonymous temporary file inside `dir`.
    fn create_temp(&self, dir: &Path) -> io::Result<Box<dyn TempFile>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StdFs;

impl CacheFs for StdFs {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(path)
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(path)?))
    }

    fn create_temp(&self, dir: &Path) -> io::Result<Box<dyn TempFile>> {
        let file = tempfile::Builder::new()
            .prefix(".prewarm-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        Ok(Box::new(StdTempFile(file)))
    }
}

struct StdTempFile(tempfile::NamedTempFile);

impl Write for StdTempFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl TempFile for StdTempFile {
    fn persist(self: Box<Self>, target: &Path) -> io::Result<()> {
        self.0.persist(target).map(|_| ()).map_err(|e| e.error)
    }
}
