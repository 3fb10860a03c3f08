/// `"PWCC"` read as a little-endian `u32`.
pub const CACHE_MAGIC: u32 = u32::from_le_bytes(*b"PWCC");

pub const HEADER_LEN: usize = 20;

/// Fixed 20-byte prefix of every cache file: five little-endian `u32`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheHeader {
    pub magic: u32,
    pub code_size: u32,
    pub code_hash: u32,
    pub cache_size: u32,
    pub cache_hash: u32,
}

impl CacheHeader {
    pub fn new(code_size: u32, code_hash: u32, cache_size: u32, cache_hash: u32) -> Self {
        Self {
            magic: CACHE_MAGIC,
            code_size,
            code_hash,
            cache_size,
            cache_hash,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let fields = [
            self.magic,
            self.code_size,
            self.code_hash,
            self.cache_size,
            self.cache_hash,
        ];
        for (chunk, field) in out.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&field.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8; HEADER_LEN]) -> Self {
        let field = |i: usize| {
            u32::from_le_bytes([
                bytes[i * 4],
                bytes[i * 4 + 1],
                bytes[i * 4 + 2],
                bytes[i * 4 + 3],
            ])
        };
        Self {
            magic: field(0),
            code_size: field(1),
            code_hash: field(2),
            cache_size: field(3),
            cache_hash: field(4),
        }
    }
}
