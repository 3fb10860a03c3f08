use std::io::{Read, Write};

use crate::error::{RecordError, Result};

/// Upper bound for a single length-prefixed string.
pub const MAX_STRING_LEN: usize = 16 * 1024 * 1024;
/// Upper bound for a single counted byte vector.
pub const MAX_BYTES_LEN: usize = 1024 * 1024 * 1024;
/// Upper bound for the element count of a counted record vector.
pub const MAX_VECTOR_COUNT: usize = 1 << 20;

/// A fixed-layout value that can be written to and read back from a record stream.
///
/// Fields are encoded in declaration order with no tags or padding, so the layout of an
/// implementation must never change without changing the surrounding format version.
pub trait Record: Sized {
    fn encode<W: Write + ?Sized>(&self, w: &mut W) -> Result<()>;
    fn decode<R: Read + ?Sized>(r: &mut R) -> Result<Self>;
}

pub trait WriteRecordExt: Write {
    fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_all(&[v])?;
        Ok(())
    }

    fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_u8(u8::from(v))
    }

    fn write_u32_le(&mut self, v: u32) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_i32_le(&mut self, v: i32) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_u64_le(&mut self, v: u64) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_i64_le(&mut self, v: i64) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_f64_le(&mut self, v: f64) -> Result<()> {
        self.write_all(&v.to_bits().to_le_bytes())?;
        Ok(())
    }

    /// Element counts and byte lengths are always written as `u64`.
    fn write_count(&mut self, count: usize) -> Result<()> {
        let count: u64 = count
            .try_into()
            .map_err(|_| RecordError::Corrupt("count does not fit in u64"))?;
        self.write_u64_le(count)
    }

    /// Writes `len`, the raw bytes, then a trailing NUL. `len` excludes the terminator.
    fn write_string(&mut self, s: &str) -> Result<()> {
        self.write_count(s.len())?;
        self.write_all(s.as_bytes())?;
        self.write_u8(0)
    }

    fn write_byte_vec(&mut self, bytes: &[u8]) -> Result<()> {
        tracing::trace!(len = bytes.len(), "write byte vector");
        self.write_count(bytes.len())?;
        self.write_all(bytes)?;
        Ok(())
    }

    fn write_u64_vec(&mut self, values: &[u64]) -> Result<()> {
        tracing::trace!(count = values.len(), "write u64 vector");
        self.write_count(values.len())?;
        for v in values {
            self.write_u64_le(*v)?;
        }
        Ok(())
    }

    fn write_string_vec(&mut self, values: &[String]) -> Result<()> {
        tracing::trace!(count = values.len(), "write string vector");
        self.write_count(values.len())?;
        for v in values {
            self.write_string(v)?;
        }
        Ok(())
    }

    fn write_record<T: Record>(&mut self, value: &T) -> Result<()> {
        value.encode(self)
    }

    fn write_record_vec<T: Record>(&mut self, values: &[T]) -> Result<()> {
        tracing::trace!(
            count = values.len(),
            ty = std::any::type_name::<T>(),
            "write record vector"
        );
        self.write_count(values.len())?;
        for v in values {
            v.encode(self)?;
        }
        Ok(())
    }
}

impl<T: Write + ?Sized> WriteRecordExt for T {}

pub trait ReadRecordExt: Read {
    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(RecordError::Corrupt("invalid bool")),
        }
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_i32_le(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_u64_le(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_i64_le(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    fn read_f64_le(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64_le()?))
    }

    /// Reads a `u64` count and rejects anything above `limit` before allocating for it.
    fn read_count(&mut self, limit: usize) -> Result<usize> {
        let raw = self.read_u64_le()?;
        match usize::try_from(raw) {
            Ok(count) if count <= limit => Ok(count),
            _ => Err(RecordError::TooLong { len: raw, limit }),
        }
    }

    fn read_exact_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| RecordError::OutOfMemory { len })?;
        buf.resize(len, 0);
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_string(&mut self, max_len: usize) -> Result<String> {
        let len = self.read_count(max_len)?;
        let bytes = self.read_exact_vec(len)?;
        if self.read_u8()? != 0 {
            return Err(RecordError::Corrupt("string is missing its NUL terminator"));
        }
        Ok(String::from_utf8(bytes)?)
    }

    fn read_byte_vec(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let len = self.read_count(max_len)?;
        tracing::trace!(len, "read byte vector");
        self.read_exact_vec(len)
    }

    fn read_u64_vec(&mut self, max_count: usize) -> Result<Vec<u64>> {
        let count = self.read_count(max_count)?;
        tracing::trace!(count, "read u64 vector");
        let mut out = Vec::new();
        out.try_reserve_exact(count)
            .map_err(|_| RecordError::OutOfMemory { len: count.saturating_mul(8) })?;
        for _ in 0..count {
            out.push(self.read_u64_le()?);
        }
        Ok(out)
    }

    fn read_string_vec(&mut self, max_count: usize, max_len: usize) -> Result<Vec<String>> {
        let count = self.read_count(max_count)?;
        tracing::trace!(count, "read string vector");
        let mut out = Vec::new();
        out.try_reserve_exact(count)
            .map_err(|_| RecordError::OutOfMemory { len: count })?;
        for _ in 0..count {
            out.push(self.read_string(max_len)?);
        }
        Ok(out)
    }

    fn read_record<T: Record>(&mut self) -> Result<T> {
        T::decode(self)
    }

    fn read_record_vec<T: Record>(&mut self, max_count: usize) -> Result<Vec<T>> {
        let count = self.read_count(max_count)?;
        tracing::trace!(
            count,
            ty = std::any::type_name::<T>(),
            "read record vector"
        );
        let mut out = Vec::new();
        out.try_reserve_exact(count)
            .map_err(|_| RecordError::OutOfMemory { len: count })?;
        for _ in 0..count {
            out.push(T::decode(self)?);
        }
        Ok(out)
    }
}

impl<T: Read + ?Sized> ReadRecordExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Debug, Clone, PartialEq)]
    struct Sample {
        name: String,
        id: u64,
        ratio: f64,
    }

    impl Record for Sample {
        fn encode<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
            w.write_string(&self.name)?;
            w.write_u64_le(self.id)?;
            w.write_f64_le(self.ratio)
        }

        fn decode<R: Read + ?Sized>(r: &mut R) -> Result<Self> {
            Ok(Self {
                name: r.read_string(MAX_STRING_LEN)?,
                id: r.read_u64_le()?,
                ratio: r.read_f64_le()?,
            })
        }
    }

    #[test]
    fn string_layout_is_count_bytes_nul() {
        let mut buf = Vec::new();
        buf.write_string("ab").unwrap();
        assert_eq!(buf, [2, 0, 0, 0, 0, 0, 0, 0, b'a', b'b', 0]);
    }

    #[test]
    fn empty_string_is_allowed() {
        let mut buf = Vec::new();
        buf.write_string("").unwrap();
        assert_eq!(buf.len(), 9);
        assert_eq!(Cursor::new(buf).read_string(MAX_STRING_LEN).unwrap(), "");
    }

    #[test]
    fn string_without_terminator_is_corrupt() {
        let mut buf = Vec::new();
        buf.write_string("ab").unwrap();
        *buf.last_mut().unwrap() = b'!';
        let err = Cursor::new(buf).read_string(MAX_STRING_LEN).unwrap_err();
        assert!(matches!(err, RecordError::Corrupt(_)));
    }

    #[test]
    fn record_vectors_preserve_order() {
        let values = vec![
            Sample {
                name: "first".into(),
                id: 1,
                ratio: 0.5,
            },
            Sample {
                name: String::new(),
                id: u64::MAX,
                ratio: -3.25,
            },
        ];
        let mut buf = Vec::new();
        buf.write_record_vec(&values).unwrap();
        let mut r = Cursor::new(buf);
        let decoded: Vec<Sample> = r.read_record_vec(MAX_VECTOR_COUNT).unwrap();
        assert_eq!(decoded, values);
        assert_eq!(r.position() as usize, r.get_ref().len());
    }

    #[test]
    fn oversized_count_is_rejected_before_allocation() {
        let mut buf = Vec::new();
        buf.write_u64_le(u64::MAX).unwrap();
        let err = Cursor::new(buf).read_byte_vec(MAX_BYTES_LEN).unwrap_err();
        assert!(matches!(err, RecordError::TooLong { len: u64::MAX, .. }));
    }

    #[test]
    fn truncated_vector_reports_io_error() {
        let mut buf = Vec::new();
        buf.write_u64_vec(&[1, 2, 3]).unwrap();
        buf.truncate(buf.len() - 1);
        let err = Cursor::new(buf).read_u64_vec(MAX_VECTOR_COUNT).unwrap_err();
        assert!(matches!(err, RecordError::Io(_)));
    }

    #[test]
    fn read_exact_vec_allocation_failure_returns_error() {
        let mut cursor = Cursor::new(Vec::new());
        let err = cursor.read_exact_vec(usize::MAX).unwrap_err();
        assert!(matches!(err, RecordError::OutOfMemory { .. }));
    }

    #[test]
    fn invalid_bool_is_corrupt() {
        let err = Cursor::new(vec![2u8]).read_bool().unwrap_err();
        assert!(matches!(err, RecordError::Corrupt(_)));
    }
}
