//! Bump arenas for corpus layout.
//!
//! Each logical region of the output image is a [`DataBlock`]: a size, a
//! required alignment, and (once the final buffer exists) a placement inside
//! it. Allocation only bumps a cursor; nothing moves, so a [`Ref`] handed out
//! during the layout pass stays valid through emission. The layout and emit
//! passes perform the same allocation sequence, so both produce the same
//! offsets; `reset_size_and_alignment` rewinds a block between passes while
//! keeping its placement.

use std::ops::Range;

/// Smallest multiple of `alignment` at or above `value`. Callers pass a
/// nonzero alignment.
pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert_ne!(alignment, 0);

    let rem = value % alignment;
    if rem == 0 {
        return value;
    }
    // Cursor values track sizes of in-memory snapshot data, so stepping to
    // the next multiple cannot wrap for any layout that could actually be
    // emitted; clamp to the last aligned u64 rather than wrapping anyway.
    value
        .checked_add(alignment - rem)
        .unwrap_or(u64::MAX - u64::MAX % alignment)
}

/// Identifies one of the generator's arenas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockId {
    /// The whole image; the sub-blocks below are merged into it.
    Main,
    /// Corpus record, snap records, and the snap pointer array.
    Snap,
    /// Memory-bytes records.
    MemoryBytes,
    /// Memory-mapping records.
    MemoryMapping,
    /// Generic byte payloads.
    ByteData,
    /// NUL-terminated snapshot ids.
    Strings,
    /// Deduplicated floating-point register files.
    FpRegs,
    /// Deduplicated general-purpose register files.
    GRegs,
    /// Page-aligned, page-sized payloads.
    PageData,
}

impl BlockId {
    pub(crate) const COUNT: usize = 9;

    /// Sub-blocks in image order: pointer-bearing regions first so that
    /// relocation touches as few pages as possible when several consumers
    /// map one corpus.
    pub(crate) const SUB_BLOCKS: [BlockId; 8] = [
        BlockId::Snap,
        BlockId::MemoryBytes,
        BlockId::MemoryMapping,
        BlockId::ByteData,
        BlockId::Strings,
        BlockId::FpRegs,
        BlockId::GRegs,
        BlockId::PageData,
    ];

    pub(crate) const ALL: [BlockId; Self::COUNT] = [
        BlockId::Main,
        BlockId::Snap,
        BlockId::MemoryBytes,
        BlockId::MemoryMapping,
        BlockId::ByteData,
        BlockId::Strings,
        BlockId::FpRegs,
        BlockId::GRegs,
        BlockId::PageData,
    ];

    fn index(self) -> usize {
        match self {
            BlockId::Main => 0,
            BlockId::Snap => 1,
            BlockId::MemoryBytes => 2,
            BlockId::MemoryMapping => 3,
            BlockId::ByteData => 4,
            BlockId::Strings => 5,
            BlockId::FpRegs => 6,
            BlockId::GRegs => 7,
            BlockId::PageData => 8,
        }
    }

    /// Key used for this block in the size-counters map.
    pub fn counter_key(self) -> &'static str {
        match self {
            BlockId::Main => "main_block",
            BlockId::Snap => "snap_block",
            BlockId::MemoryBytes => "memory_bytes_block",
            BlockId::MemoryMapping => "memory_mapping_block",
            BlockId::ByteData => "byte_data_block",
            BlockId::Strings => "string_block",
            BlockId::FpRegs => "fpregs_block",
            BlockId::GRegs => "gregs_block",
            BlockId::PageData => "page_data_block",
        }
    }
}

/// A stable handle to an allocation: the owning block plus a byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ref {
    pub(crate) block: BlockId,
    pub(crate) offset: u64,
}

impl Ref {
    /// A handle `bytes` further into the same block.
    pub(crate) fn add(self, bytes: u64) -> Ref {
        Ref {
            block: self.block,
            offset: self.offset + bytes,
        }
    }
}

#[derive(Debug)]
struct DataBlock {
    size: u64,
    required_alignment: u64,
    /// Nominal address the block's first byte will have once the image is
    /// mapped. Zero until placement.
    load_address: u64,
    /// Byte offset of the block inside the final image (zero for `Main`).
    base: u64,
}

impl DataBlock {
    fn new() -> Self {
        Self {
            size: 0,
            required_alignment: 1,
            load_address: 0,
            base: 0,
        }
    }

    fn allocate(&mut self, size: u64, alignment: u64) -> u64 {
        debug_assert!(alignment > 0);
        let offset = align_up(self.size, alignment);
        self.size = offset + size;
        self.required_alignment = self.required_alignment.max(alignment);
        offset
    }

    fn reset_size_and_alignment(&mut self) {
        self.size = 0;
        self.required_alignment = 1;
    }
}

/// The main arena plus all sub-arenas, addressed by [`BlockId`].
#[derive(Debug)]
pub(crate) struct Blocks {
    blocks: [DataBlock; BlockId::COUNT],
}

impl Blocks {
    pub(crate) fn new() -> Self {
        Self {
            blocks: std::array::from_fn(|_| DataBlock::new()),
        }
    }

    pub(crate) fn allocate(&mut self, id: BlockId, size: u64, alignment: u64) -> Ref {
        let offset = self.blocks[id.index()].allocate(size, alignment);
        Ref { block: id, offset }
    }

    /// Reserve space for `sub`'s current extent inside `Main`, with `sub`'s
    /// required alignment.
    pub(crate) fn merge_into_main(&mut self, sub: BlockId) -> Ref {
        debug_assert!(sub != BlockId::Main);
        let size = self.size(sub);
        let alignment = self.required_alignment(sub);
        self.allocate(BlockId::Main, size, alignment)
    }

    pub(crate) fn size(&self, id: BlockId) -> u64 {
        self.blocks[id.index()].size
    }

    pub(crate) fn required_alignment(&self, id: BlockId) -> u64 {
        self.blocks[id.index()].required_alignment
    }

    pub(crate) fn reset_size_and_alignment(&mut self, id: BlockId) {
        self.blocks[id.index()].reset_size_and_alignment();
    }

    /// Fix a block's position: `base` within the image and the nominal
    /// address of its first byte.
    pub(crate) fn place(&mut self, id: BlockId, base: u64, load_address: u64) {
        let block = &mut self.blocks[id.index()];
        block.base = base;
        block.load_address = load_address;
    }

    /// Nominal pointer value for `r`, valid once `r.block` is placed.
    pub(crate) fn load_address(&self, r: Ref) -> u64 {
        self.blocks[r.block.index()].load_address + r.offset
    }

    /// Byte range of `[r, r + len)` inside the final image.
    pub(crate) fn image_range(&self, r: Ref, len: u64) -> Range<usize> {
        let block = &self.blocks[r.block.index()];
        debug_assert!(r.offset + len <= block.size, "ref outside its block");
        let start = block.base + r.offset;
        start as usize..(start + len) as usize
    }
}
