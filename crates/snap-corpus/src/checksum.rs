//! 64-bit content checksums.
//!
//! Every checksum in the corpus format is the first eight bytes of a BLAKE3
//! hash, read little-endian. BLAKE3 is deterministic across platforms and
//! streams, which is all the format needs; the truncation width matches the
//! u64 checksum slots in the emitted records.

use crate::format::HEADER_CHECKSUM_OFFSET;

/// Streaming 64-bit checksum calculator.
pub struct Checksummer {
    hasher: blake3::Hasher,
}

impl Default for Checksummer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Checksummer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checksummer").finish_non_exhaustive()
    }
}

impl Checksummer {
    pub fn new() -> Self {
        Self {
            hasher: blake3::Hasher::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finish(&self) -> u64 {
        let hash = self.hasher.finalize();
        u64::from_le_bytes(hash.as_bytes()[..8].try_into().unwrap())
    }
}

/// Checksum of a single byte string.
pub fn checksum_of(data: &[u8]) -> u64 {
    let mut checksummer = Checksummer::new();
    checksummer.update(data);
    checksummer.finish()
}

/// Content checksum of a whole corpus image, with the header's checksum
/// slot treated as zero so the result can be stored into that slot without
/// invalidating itself.
///
/// `image` must be at least large enough to contain the checksum slot.
pub fn corpus_checksum(image: &[u8]) -> u64 {
    let slot = HEADER_CHECKSUM_OFFSET;
    assert!(image.len() >= slot + 8, "image smaller than its header");
    let mut checksummer = Checksummer::new();
    checksummer.update(&image[..slot]);
    checksummer.update(&[0u8; 8]);
    checksummer.update(&image[slot + 8..]);
    checksummer.finish()
}
