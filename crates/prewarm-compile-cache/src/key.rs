use std::fmt;

use prewarm_registry::{content_hash, to_hex};

/// How a module's source is wrapped before compilation. The same file compiled both ways
/// produces different code, so the kind is part of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModuleKind {
    CommonJs = 0,
    Esm = 1,
}

impl ModuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CommonJs => "CommonJS",
            Self::Esm => "ESM",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a cache slot: hash of the module kind and source filename.
///
/// The source content is deliberately not part of the key; it is validated against the
/// header instead, so an edited file reuses (and overwrites) its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(pub u32);

impl CacheKey {
    pub fn new(filename: &str, kind: ModuleKind) -> Self {
        Self(content_hash(&[&[kind as u8], filename.as_bytes()]))
    }

    pub fn file_name(self) -> String {
        format!("{}.cache", to_hex(self.0))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_hex(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_filename_both_affect_the_key() {
        let cjs = CacheKey::new("/app/index.js", ModuleKind::CommonJs);
        assert_eq!(cjs, CacheKey::new("/app/index.js", ModuleKind::CommonJs));
        assert_ne!(cjs, CacheKey::new("/app/index.js", ModuleKind::Esm));
        assert_ne!(cjs, CacheKey::new("/app/other.js", ModuleKind::CommonJs));
    }

    #[test]
    fn file_name_is_hex_with_extension() {
        assert_eq!(CacheKey(0xab).file_name(), "000000ab.cache");
    }
}
