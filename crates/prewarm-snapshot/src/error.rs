use prewarm_registry::RegistryError;
use prewarm_serdes::{DecodeError, RecordError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SnapshotError>;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("invalid snapshot magic {found:#018x}")]
    InvalidMagic { found: u64 },

    #[error("snapshot was built by version {found:?}, this is {expected:?}")]
    VersionMismatch { expected: String, found: String },

    #[error("snapshot was built for {found:?}, this is {expected:?}")]
    ArchMismatch { expected: String, found: String },

    #[error("snapshot checksum mismatch: stored {stored:08x}, computed {computed:08x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("corrupt snapshot: {0}")]
    Corrupt(&'static str),

    #[error("binding type {0:?} cannot be snapshotted")]
    UnsupportedBinding(String),

    #[error("unknown embedder object type {0:?}")]
    UnknownType(String),

    #[error("no deserializer registered for {0:?}")]
    MissingDeserializer(&'static str),

    #[error("deserializer for {0:?} registered twice")]
    DuplicateDeserializer(&'static str),

    #[error("failed to serialize {type_name:?}: {}", join_errors(.errors))]
    Serialize {
        type_name: String,
        errors: Vec<DecodeError>,
    },

    #[error("failed to deserialize {type_name:?}: {source}")]
    Deserialize {
        type_name: String,
        source: DecodeError,
    },

    #[error("runtime error: {0}")]
    Runtime(String),
}

fn join_errors(errors: &[DecodeError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
