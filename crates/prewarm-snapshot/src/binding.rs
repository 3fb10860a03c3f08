use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use prewarm_serdes::{DecodeError, TaggedReader, TaggedWriter};
use tracing::trace;

use crate::error::{Result, SnapshotError};

/// Native binding kinds whose state may be captured in a snapshot. Anything else reaching the
/// builder is a hard error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingKind {
    FsBindingData,
    V8BindingData,
}

impl BindingKind {
    pub const ALL: [BindingKind; 2] = [BindingKind::FsBindingData, BindingKind::V8BindingData];

    pub const fn type_name(self) -> &'static str {
        match self {
            Self::FsBindingData => "fs_binding_data",
            Self::V8BindingData => "v8_binding_data",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.type_name() == name)
    }
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// A native object that can write its state into a tagged stream.
pub trait Snapshottable {
    fn type_name(&self) -> &str;

    /// Writes the object's fields. The builder opens and closes an entry named after
    /// [`Snapshottable::type_name`] around this call.
    fn serialize(&self, writer: &mut TaggedWriter) {
        writer.add_error("Unserializable object encountered");
    }
}

type DeserializeFn = Box<
    dyn Fn(&mut TaggedReader) -> std::result::Result<Box<dyn Any + Send>, DecodeError>
        + Send
        + Sync,
>;

/// Per-kind reconstruction callbacks, built once at startup and passed to the loader.
#[derive(Default)]
pub struct DeserializerRegistry {
    table: HashMap<BindingKind, DeserializeFn>,
}

impl fmt::Debug for DeserializerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.table.keys().collect();
        kinds.sort();
        f.debug_struct("DeserializerRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

impl DeserializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T, F>(&mut self, kind: BindingKind, callback: F) -> Result<()>
    where
        T: Any + Send,
        F: Fn(&mut TaggedReader) -> std::result::Result<T, DecodeError> + Send + Sync + 'static,
    {
        if self.table.contains_key(&kind) {
            return Err(SnapshotError::DuplicateDeserializer(kind.type_name()));
        }
        self.table.insert(
            kind,
            Box::new(move |reader: &mut TaggedReader| {
                callback(reader).map(|object| Box::new(object) as Box<dyn Any + Send>)
            }),
        );
        Ok(())
    }

    pub fn contains(&self, kind: BindingKind) -> bool {
        self.table.contains_key(&kind)
    }

    /// Rebuilds one object from the payload the builder produced for it.
    pub fn deserialize(
        &self,
        type_name: &str,
        payload: Vec<u8>,
    ) -> Result<(BindingKind, Box<dyn Any + Send>)> {
        let kind = BindingKind::from_type_name(type_name)
            .ok_or_else(|| SnapshotError::UnknownType(type_name.to_string()))?;
        let callback = self
            .table
            .get(&kind)
            .ok_or(SnapshotError::MissingDeserializer(kind.type_name()))?;

        let failed = |source: DecodeError| SnapshotError::Deserialize {
            type_name: type_name.to_string(),
            source,
        };
        let mut reader = TaggedReader::new(payload);
        reader
            .start_read_entry(Some(kind.type_name()))
            .map_err(failed)?;
        let object = callback(&mut reader).map_err(failed)?;
        reader.end_read_entry().map_err(failed)?;
        reader.finish().map_err(failed)?;
        trace!(%kind, "deserialized binding");
        Ok((kind, object))
    }
}

/// Serializes one binding into its tagged payload.
pub(crate) fn serialize_binding(object: &dyn Snapshottable) -> Result<(BindingKind, Vec<u8>)> {
    let type_name = object.type_name();
    let kind = BindingKind::from_type_name(type_name)
        .ok_or_else(|| SnapshotError::UnsupportedBinding(type_name.to_string()))?;

    let mut writer = TaggedWriter::new();
    writer.start_entry(kind.type_name());
    object.serialize(&mut writer);
    writer.end_entry();
    let payload = writer
        .into_checked_bytes()
        .map_err(|errors| SnapshotError::Serialize {
            type_name: type_name.to_string(),
            errors,
        })?;
    trace!(%kind, len = payload.len(), "serialized binding");
    Ok((kind, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FsState {
        open_files: u32,
    }

    impl Snapshottable for FsState {
        fn type_name(&self) -> &str {
            "fs_binding_data"
        }

        fn serialize(&self, writer: &mut TaggedWriter) {
            writer.write_u32(self.open_files);
        }
    }

    struct Opaque;

    impl Snapshottable for Opaque {
        fn type_name(&self) -> &str {
            "v8_binding_data"
        }
    }

    #[test]
    fn names_round_trip() {
        for kind in BindingKind::ALL {
            assert_eq!(BindingKind::from_type_name(kind.type_name()), Some(kind));
        }
        assert_eq!(BindingKind::from_type_name("tty_wrap"), None);
    }

    #[test]
    fn serialized_payload_is_deserialized_by_kind() {
        let (kind, payload) = serialize_binding(&FsState { open_files: 3 }).unwrap();
        assert_eq!(kind, BindingKind::FsBindingData);

        let mut registry = DeserializerRegistry::new();
        registry
            .register(BindingKind::FsBindingData, |r| r.read_u32())
            .unwrap();
        let (kind, object) = registry.deserialize("fs_binding_data", payload).unwrap();
        assert_eq!(kind, BindingKind::FsBindingData);
        assert_eq!(object.downcast_ref::<u32>(), Some(&3));
    }

    #[test]
    fn default_serialize_is_an_error() {
        let err = serialize_binding(&Opaque).unwrap_err();
        match err {
            SnapshotError::Serialize { type_name, errors } => {
                assert_eq!(type_name, "v8_binding_data");
                assert_eq!(errors[0].message, "Unserializable object encountered");
                assert_eq!(errors[0].entry_path, ["v8_binding_data".to_string()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = DeserializerRegistry::new();
        registry
            .register(BindingKind::V8BindingData, |_| Ok(()))
            .unwrap();
        assert!(matches!(
            registry.register(BindingKind::V8BindingData, |_| Ok(())),
            Err(SnapshotError::DuplicateDeserializer("v8_binding_data"))
        ));
    }

    #[test]
    fn leftover_payload_fails_deserialization() {
        let (_, payload) = serialize_binding(&FsState { open_files: 1 }).unwrap();
        let mut registry = DeserializerRegistry::new();
        registry
            .register(BindingKind::FsBindingData, |_| Ok(()))
            .unwrap();
        let err = registry.deserialize("fs_binding_data", payload).unwrap_err();
        assert!(matches!(err, SnapshotError::Deserialize { .. }));
    }

    #[test]
    fn unknown_and_unregistered_types() {
        let registry = DeserializerRegistry::new();
        assert!(matches!(
            registry.deserialize("tcp_wrap", Vec::new()),
            Err(SnapshotError::UnknownType(name)) if name == "tcp_wrap"
        ));
        assert!(matches!(
            registry.deserialize("fs_binding_data", Vec::new()),
            Err(SnapshotError::MissingDeserializer("fs_binding_data"))
        ));
    }
}
