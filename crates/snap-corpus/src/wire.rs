//! Little-endian field access on byte buffers.
//!
//! The emitter writes at offsets it allocated itself, so `put_*` index
//! directly. Readers work on untrusted images, so `get_*` bounds-check and
//! report corruption instead of panicking.

use crate::error::{CorpusError, Result};

pub(crate) fn put_u8(buf: &mut [u8], offset: usize, v: u8) {
    buf[offset] = v;
}

pub(crate) fn put_u32(buf: &mut [u8], offset: usize, v: u32) {
    buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u64(buf: &mut [u8], offset: usize, v: u64) {
    buf[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
}

pub(crate) fn get_u8(buf: &[u8], offset: usize) -> Result<u8> {
    buf.get(offset)
        .copied()
        .ok_or(CorpusError::Corrupt("truncated field"))
}

pub(crate) fn get_u32(buf: &[u8], offset: usize) -> Result<u32> {
    let bytes = buf
        .get(offset..offset + 4)
        .ok_or(CorpusError::Corrupt("truncated field"))?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

pub(crate) fn get_u64(buf: &[u8], offset: usize) -> Result<u64> {
    let bytes = buf
        .get(offset..offset + 8)
        .ok_or(CorpusError::Corrupt("truncated field"))?;
    Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
}
