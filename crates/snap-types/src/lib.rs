//! Snapshot data model for the relocatable corpus generator.
//!
//! A [`Snapshot`] is a self-contained description of a CPU and memory state
//! suitable for replay by a fuzzing runner: an id, a set of memory mappings,
//! the byte contents backing those mappings, a start register state, and
//! exactly one expected end state. The corpus generator consumes snapshots
//! through this crate; it never inspects instruction semantics.

mod arch;
mod error;
mod register_checksum;
mod snapshot;

pub use crate::arch::{AArch64, Arch, ArchitectureId, RegSet, X86_64};
pub use crate::arch::{FpRegsAArch64, FpRegsX86_64, GRegsAArch64, GRegsX86_64};
pub use crate::error::{Result, SnapshotError};
pub use crate::register_checksum::{
    deserialize_register_checksum, serialize_register_checksum, RegisterChecksum,
};
pub use crate::snapshot::{
    split_bytes_by_mapping, EndState, MemoryBytes, MemoryMapping, MemoryPerms, RegisterState,
    Snapshot,
};
