//! Binary encodings used to persist runtime state.
//!
//! Two formats live here:
//!
//! - [`TaggedWriter`] / [`TaggedReader`]: a self-describing stream where every value carries a
//!   type tag and values can be grouped into named, nested entries. Decoding problems are
//!   accumulated as [`DecodeError`]s instead of aborting, and [`TaggedReader::dump`] can linearize
//!   any stream (including a corrupt one) into readable text.
//! - [`WriteRecordExt`] / [`ReadRecordExt`]: dense fixed-layout records (counted vectors,
//!   length-prefixed strings, raw little-endian scalars) for large blobs where diagnosability
//!   matters less than size.

mod error;
mod record;
mod tagged;

pub use crate::error::{RecordError, Result};
pub use crate::record::{
    ReadRecordExt, Record, WriteRecordExt, MAX_BYTES_LEN, MAX_STRING_LEN, MAX_VECTOR_COUNT,
};
pub use crate::tagged::{
    DecodeError, DumpReport, HandleKind, Tag, TaggedReader, TaggedWriter, EMPTY_INDEX,
};
