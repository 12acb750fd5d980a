use thiserror::Error;

pub type Result<T> = std::result::Result<T, CorpusError>;

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("snapshot `{id}`: snapshot is {found} but the generator targets {expected}")]
    ArchitectureMismatch {
        id: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("snapshot `{id}`: expected exactly one end state, found {found}")]
    EndStateCount { id: String, found: usize },

    #[error("snapshot `{id}`: start-state register state must be nonempty")]
    EmptyRegisters { id: String },

    #[error("snapshot `{id}`: {source}")]
    BadSnapshot {
        id: String,
        source: snap_types::SnapshotError,
    },

    #[error("cannot allocate corpus buffer of {len} bytes")]
    OutOfMemory { len: usize },

    #[error("corrupt corpus image: {0}")]
    Corrupt(&'static str),
}
