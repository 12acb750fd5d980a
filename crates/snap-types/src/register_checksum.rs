//! Serialized register-checksum blobs.
//!
//! A snapshot's end state may carry a checksum over register groups that are
//! too large to store verbatim (e.g. vector state). The blob is a fixed
//! 24-byte record; an empty blob decodes to the zero value, meaning "no
//! registers summarized".

use crate::arch::Arch;
use crate::error::{Result, SnapshotError};

const MAGIC: &[u8; 4] = b"RCHK";
const WIRE_SIZE: usize = 24;

/// Checksum over a set of register groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterChecksum {
    /// Bitmask naming the register groups covered by `checksum`. Zero means
    /// no groups, in which case `checksum` is also zero.
    pub register_groups: u64,
    pub checksum: u64,
}

pub fn serialize_register_checksum<A: Arch>(checksum: &RegisterChecksum) -> Vec<u8> {
    let mut out = Vec::with_capacity(WIRE_SIZE);
    out.extend_from_slice(MAGIC);
    out.push(A::ID as u8);
    out.extend_from_slice(&[0u8; 3]);
    out.extend_from_slice(&checksum.register_groups.to_le_bytes());
    out.extend_from_slice(&checksum.checksum.to_le_bytes());
    out
}

pub fn deserialize_register_checksum<A: Arch>(bytes: &[u8]) -> Result<RegisterChecksum> {
    if bytes.is_empty() {
        return Ok(RegisterChecksum::default());
    }
    if bytes.len() != WIRE_SIZE {
        return Err(SnapshotError::InvalidRegisterChecksum("bad length"));
    }
    if &bytes[0..4] != MAGIC {
        return Err(SnapshotError::InvalidRegisterChecksum("bad magic"));
    }
    let arch = crate::arch::ArchitectureId::from_u8(bytes[4])?;
    if arch != A::ID {
        return Err(SnapshotError::RegisterChecksumArch {
            expected: A::ID,
            found: arch,
        });
    }
    Ok(RegisterChecksum {
        register_groups: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
        checksum: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
    })
}
