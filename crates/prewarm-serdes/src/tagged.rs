//! Tagged value stream.
//!
//! Wire layout, all integers little-endian:
//!
//! ```text
//! value      := tag:u8 payload
//! Bool       := [2] u8                 (nonzero is true)
//! Int32      := [3] i32
//! Int64      := [4] i64
//! Uint32     := [5] u32
//! Uint64     := [6] u64
//! Index      := [7] u64                (u64::MAX is the empty index)
//! String     := [8] Uint64(len) bytes  (no terminator)
//! EntryStart := [0] String(name)
//! EntryEnd   := [1]
//! handle     := [9 | 10] Index
//! ```

use std::fmt::Write as _;

use thiserror::Error;

/// Sentinel index meaning "no object".
pub const EMPTY_INDEX: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    EntryStart = 0,
    EntryEnd = 1,
    Bool = 2,
    Int32 = 3,
    Int64 = 4,
    Uint32 = 5,
    Uint64 = 6,
    Index = 7,
    String = 8,
    ContextIndependentObject = 9,
    Object = 10,
}

impl Tag {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::EntryStart,
            1 => Self::EntryEnd,
            2 => Self::Bool,
            3 => Self::Int32,
            4 => Self::Int64,
            5 => Self::Uint32,
            6 => Self::Uint64,
            7 => Self::Index,
            8 => Self::String,
            9 => Self::ContextIndependentObject,
            10 => Self::Object,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::EntryStart => "EntryStart",
            Self::EntryEnd => "EntryEnd",
            Self::Bool => "Bool",
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::Uint32 => "Uint32",
            Self::Uint64 => "Uint64",
            Self::Index => "Index",
            Self::String => "String",
            Self::ContextIndependentObject => "ContextIndependentObject",
            Self::Object => "Object",
        }
    }
}

fn raw_tag_name(raw: u8) -> String {
    match Tag::from_u8(raw) {
        Some(tag) => tag.name().to_string(),
        None => format!("(unknown tag {raw})"),
    }
}

/// Which table an object handle indexes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// Shared across every context of the runtime.
    ContextIndependent,
    /// Bound to the context being serialized.
    ContextDependent,
}

impl HandleKind {
    pub fn tag(self) -> Tag {
        match self {
            Self::ContextIndependent => Tag::ContextIndependentObject,
            Self::ContextDependent => Tag::Object,
        }
    }
}

/// A problem found while writing or reading a tagged stream.
///
/// Renders as `At [<offset>] <entry>:<entry>: <message>`; with no open entries the path is
/// empty and two spaces separate the offset from the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("At [{offset}] {} {message}", render_path(.entry_path))]
pub struct DecodeError {
    pub offset: usize,
    pub entry_path: Vec<String>,
    pub message: String,
}

fn render_path(path: &[String]) -> String {
    path.iter().fold(String::new(), |mut out, name| {
        out.push_str(name);
        out.push(':');
        out
    })
}

#[derive(Debug, Default)]
struct StreamState {
    offset: usize,
    entry_stack: Vec<String>,
    errors: Vec<DecodeError>,
}

impl StreamState {
    fn error(&mut self, message: impl Into<String>) -> DecodeError {
        let err = DecodeError {
            offset: self.offset,
            entry_path: self.entry_stack.clone(),
            message: message.into(),
        };
        self.errors.push(err.clone());
        err
    }
}

#[derive(Debug, Default)]
pub struct TaggedWriter {
    storage: Vec<u8>,
    state: StreamState,
}

impl TaggedWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: Vec::with_capacity(capacity),
            state: StreamState::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Number of entries opened but not yet closed.
    pub fn depth(&self) -> usize {
        self.state.entry_stack.len()
    }

    pub fn errors(&self) -> &[DecodeError] {
        &self.state.errors
    }

    /// Records a failure that the caller detected while producing values.
    pub fn add_error(&mut self, message: impl Into<String>) -> DecodeError {
        self.state.error(message)
    }

    fn write_raw(&mut self, bytes: &[u8]) {
        self.storage.extend_from_slice(bytes);
        self.state.offset += bytes.len();
    }

    fn write_tag(&mut self, tag: Tag) {
        self.write_raw(&[tag as u8]);
    }

    pub fn start_entry(&mut self, name: &str) {
        self.write_tag(Tag::EntryStart);
        self.write_string(name);
        self.state.entry_stack.push(name.to_string());
    }

    /// Closes the innermost entry. With nothing open, records an error and writes nothing.
    pub fn end_entry(&mut self) {
        if self.state.entry_stack.pop().is_none() {
            self.state.error("Attempting to end entry on empty stack");
            return;
        }
        self.write_tag(Tag::EntryEnd);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_tag(Tag::Bool);
        self.write_raw(&[u8::from(value)]);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_tag(Tag::Int32);
        self.write_raw(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.write_tag(Tag::Int64);
        self.write_raw(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_tag(Tag::Uint32);
        self.write_raw(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_tag(Tag::Uint64);
        self.write_raw(&value.to_le_bytes());
    }

    pub fn write_index(&mut self, value: u64) {
        self.write_tag(Tag::Index);
        self.write_raw(&value.to_le_bytes());
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_tag(Tag::String);
        // usize -> u64 is lossless on every supported target.
        self.write_u64(value.len() as u64);
        self.write_raw(value.as_bytes());
    }

    /// Writes an object handle. `None` is encoded as [`EMPTY_INDEX`].
    pub fn write_handle(&mut self, kind: HandleKind, index: Option<u64>) {
        self.write_tag(kind.tag());
        self.write_index(index.unwrap_or(EMPTY_INDEX));
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.storage
    }

    /// Returns the encoded stream, or every error recorded while writing it. Unclosed entries
    /// count as an error.
    pub fn into_checked_bytes(mut self) -> Result<Vec<u8>, Vec<DecodeError>> {
        if !self.state.entry_stack.is_empty() {
            self.state.error("Entries left on snapshot stack");
        }
        if self.state.errors.is_empty() {
            Ok(self.storage)
        } else {
            Err(self.state.errors)
        }
    }
}

/// Output of [`TaggedReader::dump`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpReport {
    pub text: String,
    pub errors: Vec<DecodeError>,
}

#[derive(Debug)]
pub struct TaggedReader {
    storage: Vec<u8>,
    state: StreamState,
}

impl TaggedReader {
    pub fn new(storage: Vec<u8>) -> Self {
        Self {
            storage,
            state: StreamState::default(),
        }
    }

    pub fn position(&self) -> usize {
        self.state.offset
    }

    pub fn remaining(&self) -> usize {
        self.storage.len().saturating_sub(self.state.offset)
    }

    pub fn entry_path(&self) -> &[String] {
        &self.state.entry_stack
    }

    pub fn errors(&self) -> &[DecodeError] {
        &self.state.errors
    }

    pub fn add_error(&mut self, message: impl Into<String>) -> DecodeError {
        self.state.error(message)
    }

    fn read_raw<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let start = self.state.offset;
        let Some(bytes) = self.storage.get(start..start.saturating_add(N)) else {
            return Err(self.state.error("Unexpected end of input"));
        };
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        self.state.offset += N;
        Ok(out)
    }

    fn read_tag(&mut self, expected: Tag) -> Result<(), DecodeError> {
        let [raw] = self.read_raw::<1>()?;
        if raw != expected as u8 {
            return Err(self.state.error(format!(
                "Unexpected tag {} (expected {})",
                raw_tag_name(raw),
                expected.name()
            )));
        }
        Ok(())
    }

    /// Raw tag byte at the cursor, without consuming it.
    pub fn peek_tag(&self) -> Option<u8> {
        self.storage.get(self.state.offset).copied()
    }

    /// Opens an entry. When `expected` is given the stored name must match it.
    pub fn start_read_entry(&mut self, expected: Option<&str>) -> Result<String, DecodeError> {
        self.read_tag(Tag::EntryStart)?;
        let name = self.read_string()?;
        if let Some(expected) = expected {
            if name != expected {
                return Err(self.state.error(format!(
                    "Unexpected entry {name} (expected {expected})"
                )));
            }
        }
        self.state.entry_stack.push(name.clone());
        Ok(name)
    }

    pub fn end_read_entry(&mut self) -> Result<(), DecodeError> {
        self.read_tag(Tag::EntryEnd)?;
        if self.state.entry_stack.pop().is_none() {
            return Err(self.state.error("Attempting to end entry on empty stack"));
        }
        Ok(())
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        self.read_tag(Tag::Bool)?;
        let [v] = self.read_raw::<1>()?;
        Ok(v != 0)
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.read_tag(Tag::Int32)?;
        Ok(i32::from_le_bytes(self.read_raw()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        self.read_tag(Tag::Int64)?;
        Ok(i64::from_le_bytes(self.read_raw()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.read_tag(Tag::Uint32)?;
        Ok(u32::from_le_bytes(self.read_raw()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        self.read_tag(Tag::Uint64)?;
        Ok(u64::from_le_bytes(self.read_raw()?))
    }

    pub fn read_index(&mut self) -> Result<u64, DecodeError> {
        self.read_tag(Tag::Index)?;
        Ok(u64::from_le_bytes(self.read_raw()?))
    }

    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        self.read_tag(Tag::String)?;
        let len = self.read_u64()?;
        let start = self.state.offset;
        let end = usize::try_from(len)
            .ok()
            .and_then(|len| start.checked_add(len))
            .filter(|end| *end <= self.storage.len());
        let Some(end) = end else {
            return Err(self.state.error("Unexpected end of input"));
        };
        let Ok(value) = std::str::from_utf8(&self.storage[start..end]) else {
            return Err(self.state.error("Invalid UTF-8 in string"));
        };
        let value = value.to_string();
        self.state.offset = end;
        Ok(value)
    }

    /// Reads an object handle; [`EMPTY_INDEX`] decodes as `None`.
    pub fn read_handle(&mut self, kind: HandleKind) -> Result<Option<u64>, DecodeError> {
        self.read_tag(kind.tag())?;
        let index = self.read_index()?;
        Ok((index != EMPTY_INDEX).then_some(index))
    }

    /// Verifies that every entry was closed and all input consumed, then releases the buffer.
    pub fn finish(&mut self) -> Result<(), DecodeError> {
        if !self.state.entry_stack.is_empty() {
            return Err(self.state.error("Entries left on snapshot stack"));
        }
        if self.state.offset != self.storage.len() {
            return Err(self.state.error("Unexpected data at end of snapshot"));
        }
        self.storage = Vec::new();
        self.state = StreamState::default();
        Ok(())
    }

    /// Linearizes the whole stream into one line per value, indented by entry depth.
    ///
    /// Decoding starts at offset 0 and stops at the first error. The cursor, entry stack and
    /// error list are restored afterwards, so dumping never disturbs an in-progress read.
    pub fn dump(&mut self) -> DumpReport {
        let saved = std::mem::take(&mut self.state);
        let width = decimal_width(self.storage.len());
        let mut text = String::new();

        while self.state.offset < self.storage.len() && self.state.errors.is_empty() {
            let Some(raw) = self.peek_tag() else {
                break;
            };
            let _ = write!(text, "{:>width$} ", self.state.offset);
            for _ in 0..self.state.entry_stack.len() {
                text.push_str("  ");
            }
            if let Some(line) = self.dump_value(raw) {
                text.push_str(&line);
                text.push('\n');
            }
        }

        let errors = std::mem::replace(&mut self.state, saved).errors;
        if !errors.is_empty() {
            let _ = write!(text, "\n{} errors found:\n", errors.len());
            for err in &errors {
                let _ = writeln!(text, "- {err}");
            }
        }
        DumpReport { text, errors }
    }

    fn dump_value(&mut self, raw: u8) -> Option<String> {
        let Some(tag) = Tag::from_u8(raw) else {
            self.state.error(format!("Unknown tag {raw}"));
            return Some(raw_tag_name(raw));
        };
        match tag {
            Tag::EntryStart => self
                .start_read_entry(None)
                .ok()
                .map(|name| format!("StartEntry: [{name}]")),
            Tag::EntryEnd => self.end_read_entry().ok().map(|()| "EndEntry".to_string()),
            Tag::Bool => self.read_bool().ok().map(|v| format!("Bool: {v}")),
            Tag::Int32 => self.read_i32().ok().map(|v| format!("Int32: {v}")),
            Tag::Int64 => self.read_i64().ok().map(|v| format!("Int64: {v}")),
            Tag::Uint32 => self.read_u32().ok().map(|v| format!("Uint32: {v}")),
            Tag::Uint64 => self.read_u64().ok().map(|v| format!("Uint64: {v}")),
            Tag::Index => self
                .read_index()
                .ok()
                .map(|v| format!("Index: {}", render_index(v))),
            Tag::String => self.read_string().ok().map(|v| format!("String: {v:?}")),
            Tag::ContextIndependentObject | Tag::Object => {
                let kind = if tag == Tag::Object {
                    HandleKind::ContextDependent
                } else {
                    HandleKind::ContextIndependent
                };
                self.read_handle(kind).ok().map(|index| {
                    format!(
                        "{}: {}",
                        tag.name(),
                        index.map_or_else(|| "(empty)".to_string(), |i| i.to_string())
                    )
                })
            }
        }
    }
}

fn render_index(index: u64) -> String {
    if index == EMPTY_INDEX {
        "(empty)".to_string()
    } else {
        index.to_string()
    }
}

fn decimal_width(n: usize) -> usize {
    n.checked_ilog10().map_or(1, |d| d as usize + 1)
}
