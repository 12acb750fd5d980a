//! Reading emitted corpus images.
//!
//! The reader is the consumer-side counterpart of the generator: it walks
//! the typed layout, bounds-checks every pointer against the image, and
//! reconstructs owned records for inspection, validation, and tests. It also
//! exposes the runtime relocation step itself ([`relocate_in_place`]), which
//! is nothing more than adding the load base to every stored pointer.

use std::marker::PhantomData;

use snap_types::{Arch, MemoryPerms, RegSet, RegisterChecksum};

use crate::checksum::corpus_checksum;
use crate::error::{CorpusError, Result};
use crate::format::{
    MemoryBytesData, RegisterStateView, Snap, SnapArray, SnapCorpusHeader, SnapMemoryBytes,
    SnapMemoryMapping, CORPUS_MAGIC, HEADER_SIZE, PTR_SIZE, REGISTER_STATE_VIEW_SIZE,
    SNAP_CORPUS_SIZE, SNAP_MEMORY_BYTES_SIZE, SNAP_MEMORY_MAPPING_SIZE, SNAP_SIZE,
};
use crate::wire::{get_u64, put_u64};

/// A corpus parsed back into owned records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCorpus {
    pub header: SnapCorpusHeader,
    pub snaps: Vec<DecodedSnap>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSnap {
    pub id: String,
    pub mappings: Vec<DecodedMapping>,
    pub registers: DecodedRegisterState,
    pub end_state_instruction_address: u64,
    pub end_state_registers: DecodedRegisterState,
    pub end_state_memory_bytes: Vec<DecodedMemoryBytes>,
    pub end_state_register_checksum: RegisterChecksum,
    pub registers_memory_checksum: u64,
    pub end_state_registers_memory_checksum: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMapping {
    pub start_address: u64,
    pub num_bytes: u64,
    pub perms: MemoryPerms,
    pub memory_checksum: u64,
    pub memory_bytes: Vec<DecodedMemoryBytes>,
}

/// Raw in-image register structure bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRegisterState {
    pub gregs: Vec<u8>,
    pub fpregs: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMemoryBytes {
    pub start_address: u64,
    pub data: DecodedByteData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedByteData {
    Repeating { value: u8, size: u64 },
    Literal(Vec<u8>),
}

impl DecodedMemoryBytes {
    pub fn num_bytes(&self) -> u64 {
        match &self.data {
            DecodedByteData::Repeating { size, .. } => *size,
            DecodedByteData::Literal(bytes) => bytes.len() as u64,
        }
    }

    /// The byte contents with repeating runs expanded.
    pub fn materialize(&self) -> Vec<u8> {
        match &self.data {
            DecodedByteData::Repeating { value, size } => vec![*value; *size as usize],
            DecodedByteData::Literal(bytes) => bytes.clone(),
        }
    }
}

/// Validates the fixed-size header: magic and header size only. Cheap
/// enough for sniffing whether a file is a corpus at all.
pub fn read_header(image: &[u8]) -> Result<SnapCorpusHeader> {
    if (image.len() as u64) < HEADER_SIZE {
        return Err(CorpusError::Corrupt("image smaller than its header"));
    }
    let header = SnapCorpusHeader::read_from(image)?;
    if header.magic != CORPUS_MAGIC {
        return Err(CorpusError::Corrupt("bad magic"));
    }
    if u64::from(header.header_size) != HEADER_SIZE {
        return Err(CorpusError::Corrupt("unexpected header size"));
    }
    Ok(header)
}

/// Recomputes the content checksum (with the header's checksum slot held
/// zero) and compares it against the stored value.
pub fn verify_corpus_checksum(image: &[u8]) -> Result<()> {
    let header = read_header(image)?;
    if header.num_bytes != image.len() as u64 {
        return Err(CorpusError::Corrupt("image length disagrees with header"));
    }
    if corpus_checksum(image) != header.checksum {
        return Err(CorpusError::Corrupt("content checksum mismatch"));
    }
    Ok(())
}

/// Parses a corpus image emitted for the nominal load address (zero),
/// verifying the content checksum first.
pub fn read_corpus<A: Arch>(image: &[u8]) -> Result<DecodedCorpus> {
    verify_corpus_checksum(image)?;
    Walker::<A>::new(image, 0, None).decode()
}

/// Parses a corpus image that was relocated to load base `base`.
///
/// Relocation rewrites pointer bytes, so the stored content checksum is
/// only valid for the nominal image; verify it *before* relocating. This
/// function therefore skips checksum verification.
pub fn read_corpus_at<A: Arch>(image: &[u8], base: u64) -> Result<DecodedCorpus> {
    Walker::<A>::new(image, base, None).decode()
}

/// Image offsets of every pointer slot in a nominal (base-zero) image, in
/// walk order.
pub fn pointer_slots<A: Arch>(image: &[u8]) -> Result<Vec<u64>> {
    let mut slots = Vec::new();
    Walker::<A>::new(image, 0, Some(&mut slots)).decode()?;
    Ok(slots)
}

/// Relocates a nominal image for load base `base` by adding `base` to every
/// non-null pointer slot. This is exactly what a consumer does after
/// mapping the image.
pub fn relocate_in_place<A: Arch>(image: &mut [u8], base: u64) -> Result<()> {
    let slots = pointer_slots::<A>(image)?;
    for slot in slots {
        let value = get_u64(image, slot as usize)?;
        if value != 0 {
            let relocated = value
                .checked_add(base)
                .ok_or(CorpusError::Corrupt("relocated pointer overflows"))?;
            put_u64(image, slot as usize, relocated);
        }
    }
    Ok(())
}

struct Walker<'i, 'o, A> {
    image: &'i [u8],
    base: u64,
    slots: Option<&'o mut Vec<u64>>,
    _arch: PhantomData<A>,
}

impl<'i, 'o, A: Arch> Walker<'i, 'o, A> {
    fn new(image: &'i [u8], base: u64, slots: Option<&'o mut Vec<u64>>) -> Self {
        Self {
            image,
            base,
            slots,
            _arch: PhantomData,
        }
    }

    fn note_slot(&mut self, image_offset: u64) {
        if let Some(slots) = self.slots.as_deref_mut() {
            slots.push(image_offset);
        }
    }

    /// Image offset a stored pointer refers to under the walk's load base.
    fn offset_of(&self, pointer: u64) -> Result<u64> {
        pointer
            .checked_sub(self.base)
            .ok_or(CorpusError::Corrupt("pointer below load base"))
    }

    fn slice_at(&self, image_offset: u64, len: u64) -> Result<&'i [u8]> {
        let end = image_offset
            .checked_add(len)
            .ok_or(CorpusError::Corrupt("pointer range overflows"))?;
        if end > self.image.len() as u64 {
            return Err(CorpusError::Corrupt("pointer outside image"));
        }
        Ok(&self.image[image_offset as usize..end as usize])
    }

    fn slice(&self, pointer: u64, len: u64) -> Result<&'i [u8]> {
        self.slice_at(self.offset_of(pointer)?, len)
    }

    /// Bounds-check an array descriptor and return the image offset of its
    /// elements. `None` for empty arrays, which must carry a null pointer.
    fn array_elements_offset(&self, array: SnapArray, elem_size: u64) -> Result<Option<u64>> {
        if array.size == 0 {
            if array.elements != 0 {
                return Err(CorpusError::Corrupt("empty array with dangling pointer"));
            }
            return Ok(None);
        }
        if array.elements == 0 {
            return Err(CorpusError::Corrupt("null array with nonzero size"));
        }
        let total = elem_size
            .checked_mul(array.size)
            .ok_or(CorpusError::Corrupt("array size overflows"))?;
        let offset = self.offset_of(array.elements)?;
        self.slice_at(offset, total)?;
        Ok(Some(offset))
    }

    fn decode(&mut self) -> Result<DecodedCorpus> {
        let header = read_header(self.image)?;
        if header.num_bytes != self.image.len() as u64 {
            return Err(CorpusError::Corrupt("image length disagrees with header"));
        }
        if u64::from(header.corpus_type_size) != SNAP_CORPUS_SIZE
            || u64::from(header.snap_type_size) != SNAP_SIZE
            || u64::from(header.register_state_type_size) != REGISTER_STATE_VIEW_SIZE
        {
            return Err(CorpusError::Corrupt("record type sizes disagree"));
        }
        if header.architecture_id != A::ID as u8 {
            return Err(CorpusError::Corrupt("architecture disagrees"));
        }

        let snaps_array = SnapArray::read_at(self.image, HEADER_SIZE as usize)?;
        self.note_slot(HEADER_SIZE + 8);

        let mut snaps = Vec::new();
        if let Some(elements_offset) = self.array_elements_offset(snaps_array, PTR_SIZE)? {
            snaps.reserve_exact(snaps_array.size as usize);
            for i in 0..snaps_array.size {
                let slot_offset = elements_offset + i * PTR_SIZE;
                self.note_slot(slot_offset);
                let snap_pointer = get_u64(self.image, slot_offset as usize)?;
                snaps.push(self.decode_snap(snap_pointer)?);
            }
        }

        Ok(DecodedCorpus { header, snaps })
    }

    fn decode_snap(&mut self, pointer: u64) -> Result<DecodedSnap> {
        let offset = self.offset_of(pointer)?;
        let snap = Snap::read_from(self.slice_at(offset, SNAP_SIZE)?)?;

        self.note_slot(offset);
        let id = self.read_id_string(snap.id)?;

        self.note_slot(offset + 16);
        let mappings = self.decode_mappings(snap.memory_mappings)?;

        self.note_slot(offset + 24);
        self.note_slot(offset + 32);
        let registers = self.decode_register_state(snap.registers)?;

        self.note_slot(offset + 48);
        self.note_slot(offset + 56);
        let end_state_registers = self.decode_register_state(snap.end_state_registers)?;

        self.note_slot(offset + 72);
        let end_state_memory_bytes = self.decode_memory_bytes_list(snap.end_state_memory_bytes)?;

        Ok(DecodedSnap {
            id,
            mappings,
            registers,
            end_state_instruction_address: snap.end_state_instruction_address,
            end_state_registers,
            end_state_memory_bytes,
            end_state_register_checksum: snap.end_state_register_checksum,
            registers_memory_checksum: snap.registers_memory_checksum,
            end_state_registers_memory_checksum: snap.end_state_registers_memory_checksum,
        })
    }

    fn read_id_string(&self, pointer: u64) -> Result<String> {
        let offset = self.offset_of(pointer)? as usize;
        let tail = self
            .image
            .get(offset..)
            .ok_or(CorpusError::Corrupt("id pointer outside image"))?;
        let nul = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(CorpusError::Corrupt("unterminated id string"))?;
        let id = std::str::from_utf8(&tail[..nul])
            .map_err(|_| CorpusError::Corrupt("id is not valid UTF-8"))?;
        Ok(id.to_string())
    }

    fn decode_mappings(&mut self, array: SnapArray) -> Result<Vec<DecodedMapping>> {
        let mut mappings = Vec::new();
        let Some(elements_offset) = self.array_elements_offset(array, SNAP_MEMORY_MAPPING_SIZE)?
        else {
            return Ok(mappings);
        };
        mappings.reserve_exact(array.size as usize);
        for i in 0..array.size {
            let record_offset = elements_offset + i * SNAP_MEMORY_MAPPING_SIZE;
            let record = SnapMemoryMapping::read_from(
                self.slice_at(record_offset, SNAP_MEMORY_MAPPING_SIZE)?,
            )?;
            let perms = MemoryPerms::from_bits(record.perms)
                .ok_or(CorpusError::Corrupt("unknown permission bits"))?;

            self.note_slot(record_offset + 40);
            let memory_bytes = self.decode_memory_bytes_list(record.memory_bytes)?;

            mappings.push(DecodedMapping {
                start_address: record.start_address,
                num_bytes: record.num_bytes,
                perms,
                memory_checksum: record.memory_checksum,
                memory_bytes,
            });
        }
        Ok(mappings)
    }

    fn decode_memory_bytes_list(&mut self, array: SnapArray) -> Result<Vec<DecodedMemoryBytes>> {
        let mut list = Vec::new();
        let Some(elements_offset) = self.array_elements_offset(array, SNAP_MEMORY_BYTES_SIZE)?
        else {
            return Ok(list);
        };
        list.reserve_exact(array.size as usize);
        for i in 0..array.size {
            let record_offset = elements_offset + i * SNAP_MEMORY_BYTES_SIZE;
            let record =
                SnapMemoryBytes::read_from(self.slice_at(record_offset, SNAP_MEMORY_BYTES_SIZE)?)?;
            let data = match record.data {
                MemoryBytesData::ByteRun { value, size } => {
                    DecodedByteData::Repeating { value, size }
                }
                MemoryBytesData::ByteValues { size, elements } => {
                    // Only the literal form stores a pointer at offset 24;
                    // for a repeating run that slot holds the run length.
                    self.note_slot(record_offset + 24);
                    if size == 0 {
                        if elements != 0 {
                            return Err(CorpusError::Corrupt("empty array with dangling pointer"));
                        }
                        DecodedByteData::Literal(Vec::new())
                    } else {
                        if elements == 0 {
                            return Err(CorpusError::Corrupt("null array with nonzero size"));
                        }
                        DecodedByteData::Literal(self.slice(elements, size)?.to_vec())
                    }
                }
            };
            list.push(DecodedMemoryBytes {
                start_address: record.start_address,
                data,
            });
        }
        Ok(list)
    }

    fn decode_register_state(&mut self, view: RegisterStateView) -> Result<DecodedRegisterState> {
        let fpregs = self.slice(view.fpregs, A::FPRegs::WIRE_SIZE as u64)?.to_vec();
        let gregs = self.slice(view.gregs, A::GRegs::WIRE_SIZE as u64)?.to_vec();
        Ok(DecodedRegisterState { gregs, fpregs })
    }
}
