//! The corpus wire format.
//!
//! All records use natural C layout with little-endian fields. Pointers are
//! stored as u64 nominal load addresses in `[0, num_bytes)`; a consumer that
//! maps the image at base `L` relocates by adding `L` to every non-null
//! pointer. Empty arrays store a null `elements` pointer.
//!
//! ```text
//! SnapCorpusHeader (56)          SnapMemoryMapping (48)
//!   0  magic: u64                  0  start_address: u64
//!   8  header_size: u32            8  num_bytes: u64
//!   16 checksum: u64               16 perms: u32
//!   24 num_bytes: u64              24 memory_checksum: u64
//!   32 corpus_type_size: u32       32 memory_bytes: SnapArray
//!   36 snap_type_size: u32
//!   40 register_state_type_size  SnapMemoryBytes (32)
//!   44 architecture_id: u8         0  start_address: u64
//!                                  8  flags: u32
//! SnapCorpus (72)                  16 value: u8 | size: u64
//!   0  header                      24 size: u64 | elements: u64
//!   56 snaps: SnapArray
//! ```
//!
//! `Snap` (112): id pointer, mapping array, start register view (fpregs and
//! gregs pointers), end-state instruction address, end-state register view,
//! end-state memory-bytes array, end-state register checksum (16), then the
//! two register-memory checksums.

use snap_types::RegisterChecksum;

use crate::error::{CorpusError, Result};
use crate::wire::{get_u32, get_u64, get_u8, put_u32, put_u64, put_u8};

/// `b"SNAPCORP"` read as a little-endian u64.
pub const CORPUS_MAGIC: u64 = u64::from_le_bytes(*b"SNAPCORP");

/// Page size of the replay runner. Page-aligned payloads are emitted with
/// this alignment so the runner can map them directly, and the finished
/// image never requires more alignment than this.
pub const RUNNER_PAGE_SIZE: u64 = 4096;

pub const PTR_SIZE: u64 = 8;
pub const ARRAY_DESCRIPTOR_SIZE: u64 = 16;
pub const HEADER_SIZE: u64 = 56;
pub const SNAP_CORPUS_SIZE: u64 = HEADER_SIZE + ARRAY_DESCRIPTOR_SIZE;
pub const SNAP_SIZE: u64 = 112;
pub const SNAP_MEMORY_MAPPING_SIZE: u64 = 48;
pub const SNAP_MEMORY_BYTES_SIZE: u64 = 32;
pub const REGISTER_STATE_VIEW_SIZE: u64 = 16;
pub const REGISTER_CHECKSUM_SIZE: u64 = 16;

/// Byte offset of `SnapCorpusHeader.checksum` within the image.
pub const HEADER_CHECKSUM_OFFSET: usize = 16;

/// `SnapMemoryBytes.flags` bit: the record is a repeating-byte run stored
/// inline as `(value, size)` with no backing byte array.
pub const MEMORY_BYTES_REPEATING: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapCorpusHeader {
    pub magic: u64,
    pub header_size: u32,
    pub checksum: u64,
    pub num_bytes: u64,
    pub corpus_type_size: u32,
    pub snap_type_size: u32,
    pub register_state_type_size: u32,
    pub architecture_id: u8,
}

impl SnapCorpusHeader {
    pub(crate) fn write_to(&self, buf: &mut [u8]) {
        put_u64(buf, 0, self.magic);
        put_u32(buf, 8, self.header_size);
        put_u64(buf, 16, self.checksum);
        put_u64(buf, 24, self.num_bytes);
        put_u32(buf, 32, self.corpus_type_size);
        put_u32(buf, 36, self.snap_type_size);
        put_u32(buf, 40, self.register_state_type_size);
        put_u8(buf, 44, self.architecture_id);
    }

    pub(crate) fn read_from(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            magic: get_u64(buf, 0)?,
            header_size: get_u32(buf, 8)?,
            checksum: get_u64(buf, 16)?,
            num_bytes: get_u64(buf, 24)?,
            corpus_type_size: get_u32(buf, 32)?,
            snap_type_size: get_u32(buf, 36)?,
            register_state_type_size: get_u32(buf, 40)?,
            architecture_id: get_u8(buf, 44)?,
        })
    }
}

/// `(size, elements)` array descriptor. `elements` is null iff `size == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapArray {
    pub size: u64,
    pub elements: u64,
}

impl SnapArray {
    pub(crate) fn write_at(&self, buf: &mut [u8], offset: usize) {
        put_u64(buf, offset, self.size);
        put_u64(buf, offset + 8, self.elements);
    }

    pub(crate) fn read_at(buf: &[u8], offset: usize) -> Result<Self> {
        Ok(Self {
            size: get_u64(buf, offset)?,
            elements: get_u64(buf, offset + 8)?,
        })
    }
}

/// Pointers to one deduplicated register state (fpregs first, matching the
/// in-memory register view the runner consumes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterStateView {
    pub fpregs: u64,
    pub gregs: u64,
}

impl RegisterStateView {
    pub(crate) fn write_at(&self, buf: &mut [u8], offset: usize) {
        put_u64(buf, offset, self.fpregs);
        put_u64(buf, offset + 8, self.gregs);
    }

    pub(crate) fn read_at(buf: &[u8], offset: usize) -> Result<Self> {
        Ok(Self {
            fpregs: get_u64(buf, offset)?,
            gregs: get_u64(buf, offset + 8)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snap {
    pub id: u64,
    pub memory_mappings: SnapArray,
    pub registers: RegisterStateView,
    pub end_state_instruction_address: u64,
    pub end_state_registers: RegisterStateView,
    pub end_state_memory_bytes: SnapArray,
    pub end_state_register_checksum: RegisterChecksum,
    pub registers_memory_checksum: u64,
    pub end_state_registers_memory_checksum: u64,
}

impl Snap {
    pub(crate) fn write_to(&self, buf: &mut [u8]) {
        put_u64(buf, 0, self.id);
        self.memory_mappings.write_at(buf, 8);
        self.registers.write_at(buf, 24);
        put_u64(buf, 40, self.end_state_instruction_address);
        self.end_state_registers.write_at(buf, 48);
        self.end_state_memory_bytes.write_at(buf, 64);
        put_u64(buf, 80, self.end_state_register_checksum.register_groups);
        put_u64(buf, 88, self.end_state_register_checksum.checksum);
        put_u64(buf, 96, self.registers_memory_checksum);
        put_u64(buf, 104, self.end_state_registers_memory_checksum);
    }

    pub(crate) fn read_from(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            id: get_u64(buf, 0)?,
            memory_mappings: SnapArray::read_at(buf, 8)?,
            registers: RegisterStateView::read_at(buf, 24)?,
            end_state_instruction_address: get_u64(buf, 40)?,
            end_state_registers: RegisterStateView::read_at(buf, 48)?,
            end_state_memory_bytes: SnapArray::read_at(buf, 64)?,
            end_state_register_checksum: RegisterChecksum {
                register_groups: get_u64(buf, 80)?,
                checksum: get_u64(buf, 88)?,
            },
            registers_memory_checksum: get_u64(buf, 96)?,
            end_state_registers_memory_checksum: get_u64(buf, 104)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapMemoryMapping {
    pub start_address: u64,
    pub num_bytes: u64,
    pub perms: u32,
    pub memory_checksum: u64,
    pub memory_bytes: SnapArray,
}

impl SnapMemoryMapping {
    pub(crate) fn write_to(&self, buf: &mut [u8]) {
        put_u64(buf, 0, self.start_address);
        put_u64(buf, 8, self.num_bytes);
        put_u32(buf, 16, self.perms);
        put_u64(buf, 24, self.memory_checksum);
        self.memory_bytes.write_at(buf, 32);
    }

    pub(crate) fn read_from(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            start_address: get_u64(buf, 0)?,
            num_bytes: get_u64(buf, 8)?,
            perms: get_u32(buf, 16)?,
            memory_checksum: get_u64(buf, 24)?,
            memory_bytes: SnapArray::read_at(buf, 32)?,
        })
    }
}

/// Payload of a [`SnapMemoryBytes`] record: either an inline repeating-byte
/// run or a pointer to literal bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryBytesData {
    ByteRun { value: u8, size: u64 },
    ByteValues { size: u64, elements: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapMemoryBytes {
    pub start_address: u64,
    pub data: MemoryBytesData,
}

impl SnapMemoryBytes {
    pub fn flags(&self) -> u32 {
        match self.data {
            MemoryBytesData::ByteRun { .. } => MEMORY_BYTES_REPEATING,
            MemoryBytesData::ByteValues { .. } => 0,
        }
    }

    pub(crate) fn write_to(&self, buf: &mut [u8]) {
        put_u64(buf, 0, self.start_address);
        put_u32(buf, 8, self.flags());
        match self.data {
            MemoryBytesData::ByteRun { value, size } => {
                put_u8(buf, 16, value);
                put_u64(buf, 24, size);
            }
            MemoryBytesData::ByteValues { size, elements } => {
                put_u64(buf, 16, size);
                put_u64(buf, 24, elements);
            }
        }
    }

    pub(crate) fn read_from(buf: &[u8]) -> Result<Self> {
        let start_address = get_u64(buf, 0)?;
        let flags = get_u32(buf, 8)?;
        let data = match flags {
            MEMORY_BYTES_REPEATING => MemoryBytesData::ByteRun {
                value: get_u8(buf, 16)?,
                size: get_u64(buf, 24)?,
            },
            0 => MemoryBytesData::ByteValues {
                size: get_u64(buf, 16)?,
                elements: get_u64(buf, 24)?,
            },
            _ => return Err(CorpusError::Corrupt("unknown memory bytes flags")),
        };
        Ok(Self {
            start_address,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_is_ascii_tag() {
        assert_eq!(&CORPUS_MAGIC.to_le_bytes(), b"SNAPCORP");
    }

    #[test]
    fn header_roundtrip() {
        let header = SnapCorpusHeader {
            magic: CORPUS_MAGIC,
            header_size: HEADER_SIZE as u32,
            checksum: 0x0102_0304_0506_0708,
            num_bytes: 8192,
            corpus_type_size: SNAP_CORPUS_SIZE as u32,
            snap_type_size: SNAP_SIZE as u32,
            register_state_type_size: REGISTER_STATE_VIEW_SIZE as u32,
            architecture_id: 1,
        };
        let mut buf = vec![0u8; HEADER_SIZE as usize];
        header.write_to(&mut buf);
        assert_eq!(SnapCorpusHeader::read_from(&buf).unwrap(), header);
    }

    #[test]
    fn memory_bytes_record_roundtrip() {
        let mut buf = vec![0u8; SNAP_MEMORY_BYTES_SIZE as usize];

        let run = SnapMemoryBytes {
            start_address: 0x10000,
            data: MemoryBytesData::ByteRun {
                value: 0x90,
                size: 4096,
            },
        };
        run.write_to(&mut buf);
        assert_eq!(get_u32(&buf, 8).unwrap(), MEMORY_BYTES_REPEATING);
        assert_eq!(SnapMemoryBytes::read_from(&buf).unwrap(), run);

        let literal = SnapMemoryBytes {
            start_address: 0x20000,
            data: MemoryBytesData::ByteValues {
                size: 16,
                elements: 0x400,
            },
        };
        literal.write_to(&mut buf);
        assert_eq!(SnapMemoryBytes::read_from(&buf).unwrap(), literal);
    }

    #[test]
    fn unknown_flags_are_rejected() {
        let mut buf = vec![0u8; SNAP_MEMORY_BYTES_SIZE as usize];
        put_u32(&mut buf, 8, 0x8000_0000);
        assert!(matches!(
            SnapMemoryBytes::read_from(&buf),
            Err(CorpusError::Corrupt("unknown memory bytes flags"))
        ));
    }
}
