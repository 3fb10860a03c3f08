use std::io::{Read, Write};

use prewarm_registry::{content_hash, to_hex};
use prewarm_serdes::{
    ReadRecordExt, Record, WriteRecordExt, MAX_BYTES_LEN, MAX_VECTOR_COUNT,
};
use tracing::{debug, trace};

use crate::error::{Result, SnapshotError};
use crate::format::{BlobIdentity, CHECKSUM_LEN, MAX_IDENTITY_LEN, MAX_NAME_LEN, SNAPSHOT_MAGIC};

/// A named slot in one of the engine's data tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropInfo {
    pub name: String,
    pub id: u64,
    pub index: u64,
}

impl Record for PropInfo {
    fn encode<W: Write + ?Sized>(&self, w: &mut W) -> prewarm_serdes::Result<()> {
        w.write_string(&self.name)?;
        w.write_u64_le(self.id)?;
        w.write_u64_le(self.index)
    }

    fn decode<R: Read + ?Sized>(r: &mut R) -> prewarm_serdes::Result<Self> {
        Ok(Self {
            name: r.read_string(MAX_NAME_LEN)?,
            id: r.read_u64_le()?,
            index: r.read_u64_le()?,
        })
    }
}

/// A snapshotted native binding: its kind name, slot, and tagged-stream payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingInfo {
    pub type_name: String,
    pub id: u64,
    pub index: u64,
    pub payload: Vec<u8>,
}

impl Record for BindingInfo {
    fn encode<W: Write + ?Sized>(&self, w: &mut W) -> prewarm_serdes::Result<()> {
        w.write_string(&self.type_name)?;
        w.write_u64_le(self.id)?;
        w.write_u64_le(self.index)?;
        w.write_byte_vec(&self.payload)
    }

    fn decode<R: Read + ?Sized>(r: &mut R) -> prewarm_serdes::Result<Self> {
        Ok(Self {
            type_name: r.read_string(MAX_NAME_LEN)?,
            id: r.read_u64_le()?,
            index: r.read_u64_le()?,
            payload: r.read_byte_vec(MAX_BYTES_LEN)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AsyncHooksInfo {
    pub async_ids_stack: u64,
    pub fields: u64,
    pub async_id_fields: u64,
    pub js_execution_async_resources: u64,
    pub native_execution_async_resources: Vec<u64>,
}

impl Record for AsyncHooksInfo {
    fn encode<W: Write + ?Sized>(&self, w: &mut W) -> prewarm_serdes::Result<()> {
        w.write_u64_le(self.async_ids_stack)?;
        w.write_u64_le(self.fields)?;
        w.write_u64_le(self.async_id_fields)?;
        w.write_u64_le(self.js_execution_async_resources)?;
        w.write_u64_vec(&self.native_execution_async_resources)
    }

    fn decode<R: Read + ?Sized>(r: &mut R) -> prewarm_serdes::Result<Self> {
        Ok(Self {
            async_ids_stack: r.read_u64_le()?,
            fields: r.read_u64_le()?,
            async_id_fields: r.read_u64_le()?,
            js_execution_async_resources: r.read_u64_le()?,
            native_execution_async_resources: r.read_u64_vec(MAX_VECTOR_COUNT)?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickInfo {
    pub fields: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImmediateInfo {
    pub fields: u64,
}

macro_rules! single_field_record {
    ($ty:ty) => {
        impl Record for $ty {
            fn encode<W: Write + ?Sized>(&self, w: &mut W) -> prewarm_serdes::Result<()> {
                w.write_u64_le(self.fields)
            }

            fn decode<R: Read + ?Sized>(r: &mut R) -> prewarm_serdes::Result<Self> {
                Ok(Self {
                    fields: r.read_u64_le()?,
                })
            }
        }
    };
}

single_field_record!(TickInfo);
single_field_record!(ImmediateInfo);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerformanceStateInfo {
    pub root: u64,
    pub milestones: u64,
    pub observers: u64,
}

impl Record for PerformanceStateInfo {
    fn encode<W: Write + ?Sized>(&self, w: &mut W) -> prewarm_serdes::Result<()> {
        w.write_u64_le(self.root)?;
        w.write_u64_le(self.milestones)?;
        w.write_u64_le(self.observers)
    }

    fn decode<R: Read + ?Sized>(r: &mut R) -> prewarm_serdes::Result<Self> {
        Ok(Self {
            root: r.read_u64_le()?,
            milestones: r.read_u64_le()?,
            observers: r.read_u64_le()?,
        })
    }
}

/// Environment counters and handles, everything in the env record after the binding and
/// module lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvState {
    pub async_hooks: AsyncHooksInfo,
    pub tick_info: TickInfo,
    pub immediate_info: ImmediateInfo,
    pub performance_state: PerformanceStateInfo,
    pub stream_base_state: u64,
    pub should_abort_on_uncaught_toggle: u64,
    pub persistent_templates: Vec<PropInfo>,
    pub persistent_values: Vec<PropInfo>,
    pub context: u64,
}

impl Record for EnvState {
    fn encode<W: Write + ?Sized>(&self, w: &mut W) -> prewarm_serdes::Result<()> {
        w.write_record(&self.async_hooks)?;
        w.write_record(&self.tick_info)?;
        w.write_record(&self.immediate_info)?;
        w.write_record(&self.performance_state)?;
        w.write_u64_le(self.stream_base_state)?;
        w.write_u64_le(self.should_abort_on_uncaught_toggle)?;
        w.write_record_vec(&self.persistent_templates)?;
        w.write_record_vec(&self.persistent_values)?;
        w.write_u64_le(self.context)
    }

    fn decode<R: Read + ?Sized>(r: &mut R) -> prewarm_serdes::Result<Self> {
        Ok(Self {
            async_hooks: r.read_record()?,
            tick_info: r.read_record()?,
            immediate_info: r.read_record()?,
            performance_state: r.read_record()?,
            stream_base_state: r.read_u64_le()?,
            should_abort_on_uncaught_toggle: r.read_u64_le()?,
            persistent_templates: r.read_record_vec(MAX_VECTOR_COUNT)?,
            persistent_values: r.read_record_vec(MAX_VECTOR_COUNT)?,
            context: r.read_u64_le()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSerializeInfo {
    pub bindings: Vec<BindingInfo>,
    pub builtin_modules: Vec<String>,
    pub state: EnvState,
}

impl Record for EnvSerializeInfo {
    fn encode<W: Write + ?Sized>(&self, w: &mut W) -> prewarm_serdes::Result<()> {
        w.write_record_vec(&self.bindings)?;
        w.write_string_vec(&self.builtin_modules)?;
        w.write_record(&self.state)
    }

    fn decode<R: Read + ?Sized>(r: &mut R) -> prewarm_serdes::Result<Self> {
        Ok(Self {
            bindings: r.read_record_vec(MAX_VECTOR_COUNT)?,
            builtin_modules: r.read_string_vec(MAX_VECTOR_COUNT, MAX_NAME_LEN)?,
            state: r.read_record()?,
        })
    }
}

/// Compiled code for one built-in module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeCacheInfo {
    pub id: String,
    pub data: Vec<u8>,
}

impl Record for CodeCacheInfo {
    fn encode<W: Write + ?Sized>(&self, w: &mut W) -> prewarm_serdes::Result<()> {
        w.write_string(&self.id)?;
        w.write_byte_vec(&self.data)
    }

    fn decode<R: Read + ?Sized>(r: &mut R) -> prewarm_serdes::Result<Self> {
        Ok(Self {
            id: r.read_string(MAX_NAME_LEN)?,
            data: r.read_byte_vec(MAX_BYTES_LEN)?,
        })
    }
}

/// Everything a startup snapshot carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotData {
    /// Opaque engine heap image.
    pub engine_blob: Vec<u8>,
    pub isolate_data_indices: Vec<u64>,
    pub env_info: EnvSerializeInfo,
    pub code_cache: Vec<CodeCacheInfo>,
}

impl SnapshotData {
    pub fn to_blob(&self) -> Result<Vec<u8>> {
        self.to_blob_as(&BlobIdentity::current())
    }

    /// Encodes the blob stamped with `identity` instead of this build's.
    pub fn to_blob_as(&self, identity: &BlobIdentity) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.write_u64_le(SNAPSHOT_MAGIC)?;
        out.write_string(&identity.version)?;
        out.write_string(&identity.arch)?;
        out.write_byte_vec(&self.engine_blob)?;
        out.write_u64_vec(&self.isolate_data_indices)?;
        out.write_record(&self.env_info)?;
        out.write_record_vec(&self.code_cache)?;
        let checksum = content_hash(&[&out]);
        out.write_u32_le(checksum)?;
        debug!(
            size = out.len(),
            checksum = %to_hex(checksum),
            "encoded snapshot blob"
        );
        Ok(out)
    }

    pub fn from_blob(bytes: &[u8]) -> Result<Self> {
        Self::from_blob_expecting(bytes, &BlobIdentity::current())
    }

    /// Decodes a blob, failing unless it was stamped with `expected`. The identity check runs
    /// before the checksum and before any section is decoded.
    pub fn from_blob_expecting(bytes: &[u8], expected: &BlobIdentity) -> Result<Self> {
        let preamble = Preamble::parse(bytes)?;
        if preamble.identity.version != expected.version {
            return Err(SnapshotError::VersionMismatch {
                expected: expected.version.clone(),
                found: preamble.identity.version,
            });
        }
        if preamble.identity.arch != expected.arch {
            return Err(SnapshotError::ArchMismatch {
                expected: expected.arch.clone(),
                found: preamble.identity.arch,
            });
        }
        preamble.verify_checksum()?;
        decode_sections(preamble.body)
    }
}

/// The fixed prefix of a blob plus the byte ranges needed to finish decoding it.
pub(crate) struct Preamble<'a> {
    pub(crate) identity: BlobIdentity,
    content: &'a [u8],
    body: &'a [u8],
    stored_checksum: u32,
}

impl<'a> Preamble<'a> {
    pub(crate) fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < 8 + CHECKSUM_LEN {
            return Err(SnapshotError::Corrupt("snapshot is shorter than its header"));
        }
        let (content, mut trailer) = bytes.split_at(bytes.len() - CHECKSUM_LEN);

        let mut r = content;
        let magic = r.read_u64_le()?;
        if magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidMagic { found: magic });
        }
        let version = r.read_string(MAX_IDENTITY_LEN)?;
        let arch = r.read_string(MAX_IDENTITY_LEN)?;
        trace!(%version, %arch, "read snapshot identity");

        Ok(Self {
            identity: BlobIdentity { version, arch },
            content,
            body: r,
            stored_checksum: trailer.read_u32_le()?,
        })
    }

    pub(crate) fn verify_checksum(&self) -> Result<()> {
        let computed = content_hash(&[self.content]);
        if computed != self.stored_checksum {
            return Err(SnapshotError::ChecksumMismatch {
                stored: self.stored_checksum,
                computed,
            });
        }
        Ok(())
    }

    pub(crate) fn decode_body(&self) -> Result<SnapshotData> {
        decode_sections(self.body)
    }
}

fn decode_sections(mut r: &[u8]) -> Result<SnapshotData> {
    let engine_blob = r.read_byte_vec(MAX_BYTES_LEN)?;
    trace!(len = engine_blob.len(), "read engine blob");
    let isolate_data_indices = r.read_u64_vec(MAX_VECTOR_COUNT)?;
    let env_info: EnvSerializeInfo = r.read_record()?;
    trace!(
        bindings = env_info.bindings.len(),
        modules = env_info.builtin_modules.len(),
        "read env info"
    );
    let code_cache = r.read_record_vec(MAX_VECTOR_COUNT)?;
    if !r.is_empty() {
        return Err(SnapshotError::Corrupt("trailing data after code cache"));
    }
    Ok(SnapshotData {
        engine_blob,
        isolate_data_indices,
        env_info,
        code_cache,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SnapshotData {
        SnapshotData {
            engine_blob: vec![0xaa; 33],
            isolate_data_indices: vec![1, 2, 3],
            env_info: EnvSerializeInfo {
                bindings: vec![BindingInfo {
                    type_name: "fs_binding_data".into(),
                    id: 0,
                    index: 4,
                    payload: vec![1, 2],
                }],
                builtin_modules: vec!["fs".into(), "path".into()],
                state: EnvState {
                    async_hooks: AsyncHooksInfo {
                        native_execution_async_resources: vec![9, 8],
                        ..AsyncHooksInfo::default()
                    },
                    tick_info: TickInfo { fields: 5 },
                    persistent_values: vec![PropInfo {
                        name: "primordials".into(),
                        id: 1,
                        index: 7,
                    }],
                    context: 11,
                    ..EnvState::default()
                },
            },
            code_cache: vec![CodeCacheInfo {
                id: "internal/bootstrap".into(),
                data: vec![3; 10],
            }],
        }
    }

    #[test]
    fn blob_round_trips() {
        let data = sample();
        let blob = data.to_blob().unwrap();
        assert_eq!(&blob[..8], b"PWSNAP01");
        assert_eq!(SnapshotData::from_blob(&blob).unwrap(), data);
    }

    #[test]
    fn env_record_starts_with_bindings_then_modules() {
        let info = sample().env_info;
        let mut encoded = Vec::new();
        encoded.write_record(&info).unwrap();
        let mut r = &encoded[..];
        assert_eq!(r.read_u64_le().unwrap(), 1);
        assert_eq!(r.read_string(MAX_NAME_LEN).unwrap(), "fs_binding_data");
        r.read_u64_le().unwrap();
        r.read_u64_le().unwrap();
        r.read_byte_vec(MAX_BYTES_LEN).unwrap();
        assert_eq!(
            r.read_string_vec(MAX_VECTOR_COUNT, MAX_NAME_LEN).unwrap(),
            ["fs", "path"]
        );
    }

    #[test]
    fn trailing_bytes_before_checksum_are_rejected() {
        let data = sample();
        let mut blob = data.to_blob().unwrap();
        blob.truncate(blob.len() - CHECKSUM_LEN);
        blob.push(0);
        let checksum = content_hash(&[&blob]);
        blob.extend_from_slice(&checksum.to_le_bytes());
        assert!(matches!(
            SnapshotData::from_blob(&blob),
            Err(SnapshotError::Corrupt(_))
        ));
    }
}
