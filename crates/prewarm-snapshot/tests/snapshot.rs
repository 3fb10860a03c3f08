use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use prewarm_registry::{ExternalReference, ExternalReferenceRegistry, FinalizedReferences};
use prewarm_serdes::{DecodeError, TaggedReader, TaggedWriter};
use prewarm_snapshot::{
    inspect_snapshot, inspect_snapshot_against, BindingKind, BindingRef, BlobIdentity,
    BuildOptions, CodeCacheInfo, DeserializerRegistry, EnvState, Result, RuntimeSource,
    SnapshotBuilder, SnapshotError, SnapshotLoader, Snapshottable, TickInfo,
};
use proptest::prelude::*;

#[derive(Debug, PartialEq)]
struct FsBinding {
    open_files: u32,
    cwd: String,
}

impl Snapshottable for FsBinding {
    fn type_name(&self) -> &str {
        "fs_binding_data"
    }

    fn serialize(&self, writer: &mut TaggedWriter) {
        writer.write_u32(self.open_files);
        writer.write_string(&self.cwd);
    }
}

#[derive(Debug, PartialEq)]
struct HeapStats {
    fields: Vec<i64>,
}

impl Snapshottable for HeapStats {
    fn type_name(&self) -> &str {
        "v8_binding_data"
    }

    fn serialize(&self, writer: &mut TaggedWriter) {
        writer.write_u64(self.fields.len() as u64);
        for field in &self.fields {
            writer.write_i64(*field);
        }
    }
}

struct TcpWrap;

impl Snapshottable for TcpWrap {
    fn type_name(&self) -> &str {
        "tcp_wrap"
    }
}

fn read_fs(reader: &mut TaggedReader) -> std::result::Result<FsBinding, DecodeError> {
    Ok(FsBinding {
        open_files: reader.read_u32()?,
        cwd: reader.read_string()?,
    })
}

fn read_heap(reader: &mut TaggedReader) -> std::result::Result<HeapStats, DecodeError> {
    let len = reader.read_u64()?;
    let fields = (0..len).map(|_| reader.read_i64()).collect::<std::result::Result<_, _>>()?;
    Ok(HeapStats { fields })
}

struct FakeRuntime {
    fs: FsBinding,
    heap: HeapStats,
    extra: Option<TcpWrap>,
    compiled: usize,
}

impl FakeRuntime {
    fn new() -> Self {
        Self {
            fs: FsBinding {
                open_files: 3,
                cwd: "/srv/app".into(),
            },
            heap: HeapStats {
                fields: vec![-1, 0, 42],
            },
            extra: None,
            compiled: 0,
        }
    }
}

fn native_a() -> u32 {
    1
}

fn native_b() -> u32 {
    2
}

impl RuntimeSource for FakeRuntime {
    fn bindings(&self) -> Vec<BindingRef<'_>> {
        let mut bindings = vec![
            BindingRef {
                data_index: 10,
                object: &self.fs,
            },
            BindingRef {
                data_index: 11,
                object: &self.heap,
            },
        ];
        if let Some(extra) = &self.extra {
            bindings.push(BindingRef {
                data_index: 12,
                object: extra,
            });
        }
        bindings
    }

    fn builtin_module_ids(&self) -> Vec<String> {
        vec!["fs".into(), "internal/bootstrap/node".into()]
    }

    fn env_state(&self) -> EnvState {
        EnvState {
            tick_info: TickInfo { fields: 7 },
            context: 99,
            ..EnvState::default()
        }
    }

    fn isolate_data_indices(&mut self) -> Vec<u64> {
        vec![0, 1, 2, 3]
    }

    fn compile_builtin_modules(&mut self) -> Result<Vec<CodeCacheInfo>> {
        self.compiled += 1;
        Ok(self
            .builtin_module_ids()
            .into_iter()
            .map(|id| CodeCacheInfo {
                data: id.as_bytes().repeat(4),
                id,
            })
            .collect())
    }

    fn create_engine_blob(&mut self, references: &FinalizedReferences) -> Result<Vec<u8>> {
        let index = references
            .index_of(ExternalReference::from_ptr(native_b as *const ()))
            .ok_or_else(|| SnapshotError::Runtime("native_b is not registered".into()))?;
        Ok((index as u64).to_le_bytes().to_vec())
    }
}

fn references() -> FinalizedReferences {
    let mut registry = ExternalReferenceRegistry::new();
    registry
        .register_group(
            "fs",
            [
                ExternalReference::from_ptr(native_a as *const ()),
                ExternalReference::from_ptr(native_b as *const ()),
            ],
        )
        .unwrap();
    registry.finalize().unwrap()
}

fn deserializers() -> DeserializerRegistry {
    let mut registry = DeserializerRegistry::new();
    registry
        .register(BindingKind::FsBindingData, read_fs)
        .unwrap();
    registry
        .register(BindingKind::V8BindingData, read_heap)
        .unwrap();
    registry
}

fn build_blob(runtime: &mut FakeRuntime, refs: &FinalizedReferences) -> Vec<u8> {
    SnapshotBuilder::new(refs, BuildOptions::default())
        .build(runtime)
        .unwrap()
        .to_blob()
        .unwrap()
}

#[test]
fn build_then_load_restores_runtime_state() {
    let refs = references();
    let mut runtime = FakeRuntime::new();
    let blob = build_blob(&mut runtime, &refs);
    assert_eq!(runtime.compiled, 1);

    let deserializers = deserializers();
    let state = SnapshotLoader::new(&refs, &deserializers)
        .load(&blob)
        .unwrap();

    assert_eq!(state.engine_blob, 1u64.to_le_bytes());
    assert_eq!(state.external_references.as_slice(), refs.as_slice());
    assert_eq!(state.isolate_data_indices, [0, 1, 2, 3]);
    assert_eq!(state.builtin_modules, ["fs", "internal/bootstrap/node"]);
    assert_eq!(state.env.tick_info.fields, 7);
    assert_eq!(state.env.context, 99);

    assert_eq!(state.bindings.len(), 2);
    let fs = &state.bindings[0];
    assert_eq!((fs.kind, fs.id, fs.data_index), (BindingKind::FsBindingData, 0, 10));
    assert_eq!(fs.object.downcast_ref::<FsBinding>(), Some(&runtime.fs));
    let heap = &state.bindings[1];
    assert_eq!((heap.kind, heap.id, heap.data_index), (BindingKind::V8BindingData, 1, 11));
    assert_eq!(heap.object.downcast_ref::<HeapStats>(), Some(&runtime.heap));

    assert_eq!(state.code_cache.len(), 2);
    assert_eq!(state.code_cache.get("fs"), Some(&b"fsfsfsfs"[..]));
}

#[test]
fn code_cache_embedding_can_be_skipped() {
    let refs = references();
    let mut runtime = FakeRuntime::new();
    let data = SnapshotBuilder::new(
        &refs,
        BuildOptions {
            embed_code_cache: false,
        },
    )
    .build(&mut runtime)
    .unwrap();
    assert!(data.code_cache.is_empty());
    assert_eq!(runtime.compiled, 0);
}

#[test]
fn unsupported_binding_fails_the_build() {
    let refs = references();
    let mut runtime = FakeRuntime::new();
    runtime.extra = Some(TcpWrap);
    let err = SnapshotBuilder::new(&refs, BuildOptions::default())
        .build(&mut runtime)
        .unwrap_err();
    assert!(matches!(err, SnapshotError::UnsupportedBinding(name) if name == "tcp_wrap"));
}

#[test]
fn version_mismatch_is_rejected_before_any_deserializer_runs() {
    let refs = references();
    let mut runtime = FakeRuntime::new();
    let data = SnapshotBuilder::new(&refs, BuildOptions::default())
        .build(&mut runtime)
        .unwrap();
    let blob = data
        .to_blob_as(&BlobIdentity {
            version: "0.0.0-other".into(),
            ..BlobIdentity::current()
        })
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let mut deserializers = DeserializerRegistry::new();
    for kind in BindingKind::ALL {
        let calls = calls.clone();
        deserializers
            .register(kind, move |_: &mut TaggedReader| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
    }

    let err = SnapshotLoader::new(&refs, &deserializers)
        .load(&blob)
        .unwrap_err();
    assert!(matches!(
        err,
        SnapshotError::VersionMismatch { ref found, .. } if found == "0.0.0-other"
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let state = SnapshotLoader::new(&refs, &deserializers)
        .expecting(BlobIdentity {
            version: "0.0.0-other".into(),
            ..BlobIdentity::current()
        })
        .load(&blob);
    // The placeholder deserializers leave payload fields unread.
    assert!(matches!(state, Err(SnapshotError::Deserialize { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn arch_mismatch_is_rejected() {
    let blob = prewarm_snapshot::SnapshotData::default()
        .to_blob_as(&BlobIdentity {
            arch: "riscv-imaginary".into(),
            ..BlobIdentity::current()
        })
        .unwrap();
    let err = prewarm_snapshot::SnapshotData::from_blob(&blob).unwrap_err();
    assert!(matches!(err, SnapshotError::ArchMismatch { .. }));
}

#[test]
fn corrupted_blobs_are_rejected() {
    let refs = references();
    let blob = build_blob(&mut FakeRuntime::new(), &refs);
    let deserializers = deserializers();
    let loader = SnapshotLoader::new(&refs, &deserializers);

    let mut bad_magic = blob.clone();
    bad_magic[0] ^= 0xff;
    assert!(matches!(
        loader.load(&bad_magic),
        Err(SnapshotError::InvalidMagic { .. })
    ));

    let mut bad_body = blob.clone();
    let last_body_byte = bad_body.len() - 5;
    bad_body[last_body_byte] ^= 0x01;
    assert!(matches!(
        loader.load(&bad_body),
        Err(SnapshotError::ChecksumMismatch { .. })
    ));

    let mut bad_trailer = blob.clone();
    *bad_trailer.last_mut().unwrap() ^= 0x80;
    assert!(matches!(
        loader.load(&bad_trailer),
        Err(SnapshotError::ChecksumMismatch { .. })
    ));

    assert!(matches!(
        loader.load(&blob[..6]),
        Err(SnapshotError::Corrupt(_))
    ));
}

#[test]
fn unknown_embedder_type_is_fatal() {
    let refs = references();
    let mut data = SnapshotBuilder::new(&refs, BuildOptions::default())
        .build(&mut FakeRuntime::new())
        .unwrap();
    data.env_info.bindings[1].type_name = "tty_wrap".into();

    let deserializers = deserializers();
    let err = SnapshotLoader::new(&refs, &deserializers)
        .restore(data)
        .unwrap_err();
    assert!(matches!(err, SnapshotError::UnknownType(name) if name == "tty_wrap"));
}

#[test]
fn missing_deserializer_is_fatal() {
    let refs = references();
    let blob = build_blob(&mut FakeRuntime::new(), &refs);
    let mut deserializers = DeserializerRegistry::new();
    deserializers
        .register(BindingKind::FsBindingData, read_fs)
        .unwrap();
    let err = SnapshotLoader::new(&refs, &deserializers)
        .load(&blob)
        .unwrap_err();
    assert!(matches!(
        err,
        SnapshotError::MissingDeserializer("v8_binding_data")
    ));
}

#[test]
fn inspect_summarizes_foreign_blobs() {
    let refs = references();
    let data = SnapshotBuilder::new(&refs, BuildOptions::default())
        .build(&mut FakeRuntime::new())
        .unwrap();
    let blob = data
        .to_blob_as(&BlobIdentity {
            version: "9.9.9".into(),
            arch: "sparc".into(),
        })
        .unwrap();

    let summary = inspect_snapshot(&blob).unwrap();
    assert!(!summary.compatible);
    assert_eq!(summary.identity.version, "9.9.9");
    assert_eq!(summary.total_size, blob.len());
    assert_eq!(summary.engine_blob_size, 8);
    assert_eq!(summary.isolate_data_indices, 4);
    assert_eq!(summary.bindings.len(), 2);
    assert_eq!(summary.bindings[0].0, "fs_binding_data");
    assert_eq!(summary.code_cache[0], ("fs".to_string(), 8));

    let text = summary.to_string();
    assert!(text.contains("version: 9.9.9\n"));
    assert!(text.contains("compatible: no\n"));
    assert!(text.contains("  internal/bootstrap/node (92B)\n"));

    let against = inspect_snapshot_against(
        &blob,
        &BlobIdentity {
            version: "9.9.9".into(),
            arch: "sparc".into(),
        },
    )
    .unwrap();
    assert!(against.compatible);
}

proptest! {
    #[test]
    fn decoder_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
        let _ = prewarm_snapshot::SnapshotData::from_blob(&bytes);
        let _ = inspect_snapshot(&bytes);
    }

    #[test]
    fn any_single_byte_flip_is_detected(position in any::<prop::sample::Index>(), mask in 1u8..) {
        let refs = references();
        let mut blob = build_blob(&mut FakeRuntime::new(), &refs);
        let position = position.index(blob.len());
        blob[position] ^= mask;
        prop_assert!(prewarm_snapshot::SnapshotData::from_blob(&blob).is_err());
    }
}
