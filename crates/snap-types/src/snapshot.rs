//! The snapshot record and its constituent parts.

use bitflags::bitflags;

use crate::arch::ArchitectureId;
use crate::error::{Result, SnapshotError};

bitflags! {
    /// Memory mapping permissions, `u32` on the wire (mprotect-compatible
    /// bit positions).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryPerms: u32 {
        const READ = 1;
        const WRITE = 2;
        const EXEC = 4;
    }
}

/// A contiguous mapped address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryMapping {
    pub start_address: u64,
    pub num_bytes: u64,
    pub perms: MemoryPerms,
}

impl MemoryMapping {
    pub fn new(start_address: u64, num_bytes: u64, perms: MemoryPerms) -> Self {
        Self {
            start_address,
            num_bytes,
            perms,
        }
    }

    /// First address past the mapping.
    pub fn limit_address(&self) -> u64 {
        self.start_address + self.num_bytes
    }

    /// Whether `[start, limit)` lies entirely inside this mapping.
    pub fn contains_range(&self, start: u64, limit: u64) -> bool {
        start >= self.start_address && limit <= self.limit_address() && start <= limit
    }
}

/// Byte contents for part of a mapped range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBytes {
    pub start_address: u64,
    pub byte_values: Vec<u8>,
}

impl MemoryBytes {
    pub fn new(start_address: u64, byte_values: Vec<u8>) -> Self {
        Self {
            start_address,
            byte_values,
        }
    }

    pub fn num_bytes(&self) -> u64 {
        self.byte_values.len() as u64
    }

    pub fn limit_address(&self) -> u64 {
        self.start_address + self.num_bytes()
    }

    /// True iff the record is nonempty and every byte equals the first.
    pub fn is_repeating_byte_run(&self) -> bool {
        match self.byte_values.split_first() {
            Some((first, rest)) => rest.iter().all(|b| b == first),
            None => false,
        }
    }
}

/// Serialized register state. The byte strings are opaque here; register-set
/// codecs in [`crate::arch`] give them meaning. They are compared verbatim
/// when the generator deduplicates register states.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterState {
    pub gregs: Vec<u8>,
    pub fpregs: Vec<u8>,
}

impl RegisterState {
    pub fn new(gregs: Vec<u8>, fpregs: Vec<u8>) -> Self {
        Self { gregs, fpregs }
    }

    pub fn is_empty(&self) -> bool {
        self.gregs.is_empty() && self.fpregs.is_empty()
    }
}

/// The single expected outcome of replaying a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndState {
    /// Address of the instruction the replay is expected to stop at.
    pub instruction_address: u64,
    /// Expected registers. May be empty, meaning "not recorded".
    pub registers: RegisterState,
    /// Expected memory deltas.
    pub memory_bytes: Vec<MemoryBytes>,
    /// Serialized register checksum blob; empty means "none".
    pub register_checksum: Vec<u8>,
}

/// A self-contained, replayable program state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub architecture_id: ArchitectureId,
    /// Short printable identifier, emitted NUL-terminated.
    pub id: String,
    pub memory_mappings: Vec<MemoryMapping>,
    pub memory_bytes: Vec<MemoryBytes>,
    pub registers: RegisterState,
    /// Callers must normalize snapshots to exactly one end state before
    /// handing them to the corpus generator.
    pub expected_end_states: Vec<EndState>,
}

/// Partitions `memory_bytes` by the mapping that contains each record,
/// preserving declared order within each mapping.
///
/// Every record must lie entirely within exactly one mapping; a record that
/// does not is an error.
pub fn split_bytes_by_mapping<'s>(
    mappings: &[MemoryMapping],
    memory_bytes: &'s [MemoryBytes],
) -> Result<Vec<Vec<&'s MemoryBytes>>> {
    let mut per_mapping: Vec<Vec<&MemoryBytes>> = vec![Vec::new(); mappings.len()];
    for bytes in memory_bytes {
        let owner = mappings
            .iter()
            .position(|m| m.contains_range(bytes.start_address, bytes.limit_address()));
        match owner {
            Some(i) => per_mapping[i].push(bytes),
            None => {
                return Err(SnapshotError::BytesOutsideMappings {
                    start_address: bytes.start_address,
                    limit_address: bytes.limit_address(),
                })
            }
        }
    }
    Ok(per_mapping)
}
