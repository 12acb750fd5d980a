//! Relocatable snapshot corpus generation.
//!
//! [`generate`] serializes a list of snapshots into one contiguous,
//! position-independent image. Large byte payloads and register states are
//! deduplicated by content; page-aligned, page-sized payloads land in a
//! page-aligned region so a runner can map them directly; every pointer in
//! the image is a nominal address in `[0, num_bytes)`, relocated at map
//! time by adding the load base. The [`inspect`] facilities parse and
//! validate emitted images, and perform that relocation.
//!
//! Generation is single-threaded and runs in two passes over the same
//! walker: layout (sizes and offsets only), then emit (contents). Input
//! snapshots must stay live for the whole call; deduplication borrows their
//! payload bytes as keys.

mod arena;
mod buffer;
mod checksum;
mod dedup;
mod error;
mod format;
mod gen;
mod inspect;
mod wire;

pub use crate::arena::BlockId;
pub use crate::buffer::CorpusBuffer;
pub use crate::checksum::{checksum_of, corpus_checksum, Checksummer};
pub use crate::error::{CorpusError, Result};
pub use crate::format::{
    MemoryBytesData, RegisterStateView, Snap, SnapArray, SnapCorpusHeader, SnapMemoryBytes,
    SnapMemoryMapping, ARRAY_DESCRIPTOR_SIZE, CORPUS_MAGIC, HEADER_CHECKSUM_OFFSET, HEADER_SIZE,
    MEMORY_BYTES_REPEATING, PTR_SIZE, REGISTER_CHECKSUM_SIZE, REGISTER_STATE_VIEW_SIZE,
    RUNNER_PAGE_SIZE, SNAP_CORPUS_SIZE, SNAP_MEMORY_BYTES_SIZE, SNAP_MEMORY_MAPPING_SIZE,
    SNAP_SIZE,
};
pub use crate::gen::{generate, generate_for, Options};
pub use crate::inspect::{
    pointer_slots, read_corpus, read_corpus_at, read_header, relocate_in_place,
    verify_corpus_checksum, DecodedByteData, DecodedCorpus, DecodedMapping, DecodedMemoryBytes,
    DecodedRegisterState, DecodedSnap,
};
