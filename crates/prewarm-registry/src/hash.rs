/// A 32-bit streaming checksum.
pub trait Checksum: Default {
    fn update(&mut self, bytes: &[u8]);
    fn finish(self) -> u32;
}

/// IEEE CRC-32, the default content hash.
#[derive(Default)]
pub struct Crc32(crc32fast::Hasher);

impl Checksum for Crc32 {
    fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    fn finish(self) -> u32 {
        self.0.finalize()
    }
}

/// Hashes the concatenation of `parts` with [`Crc32`].
pub fn content_hash(parts: &[&[u8]]) -> u32 {
    content_hash_with::<Crc32>(parts)
}

pub fn content_hash_with<C: Checksum>(parts: &[&[u8]]) -> u32 {
    let mut hasher = C::default();
    for part in parts {
        hasher.update(part);
    }
    hasher.finish()
}

/// Fixed-width lowercase hex, used for cache directory and file names.
pub fn to_hex(value: u32) -> String {
    format!("{value:08x}")
}
