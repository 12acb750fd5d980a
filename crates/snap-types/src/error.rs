use thiserror::Error;

use crate::arch::ArchitectureId;

pub type Result<T> = std::result::Result<T, SnapshotError>;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("serialized register state has {found} bytes (expected {expected})")]
    RegisterLength { expected: usize, found: usize },

    #[error("register checksum blob: {0}")]
    InvalidRegisterChecksum(&'static str),

    #[error("register checksum blob is for {found:?} (expected {expected:?})")]
    RegisterChecksumArch {
        expected: ArchitectureId,
        found: ArchitectureId,
    },

    #[error("unknown architecture id {0}")]
    UnknownArchitecture(u8),

    #[error("memory bytes at {start_address:#x}..{limit_address:#x} lie outside every mapping")]
    BytesOutsideMappings {
        start_address: u64,
        limit_address: u64,
    },
}
