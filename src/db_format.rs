//! The DB container file format (§6.1): a self-describing on-disk
//! representation of a recovered stream plus its replacement table and
//! opaque DEFLATE packet descriptors. This module owns only the byte
//! layout — reading/writing the fixed-size header and locating the
//! variable-length regions that follow it. [`crate::decode_buffer`]
//! drives the streaming writes and the replay pass on top of it.
//!
//! All integers are big-endian. Offsets are absolute file offsets.
//!
//! ```text
//! offset  size  field
//! 0       44    DECODEDBYTE_SIGNATURE  (fixed ASCII + version bytes)
//! 44      8     data_offset            (pointer to first DecodedByte)
//! 52      8     byte_count
//! 60      4     reference_window       (32768 or 65536)
//! 64      2     bytes_per_dbyte        (always 4)
//! 66      2     discontinuity_count
//! 68      8     replacement_offset
//! 76      4     replacement_count
//! 80      4     replacement_highest
//! 84      8     packet_offset
//! 92      4     packet_count
//! 96      64    reserved (zeroes)
//! 160     …     decoded bytes          (byte_count × 4 bytes)
//! …       …     replacement table      (replacement_count × 4 bytes)
//! …       …     packet descriptors     (opaque, delegated to collaborator)
//! ```

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::byteio::{read16, read32, read64, write16, write32, write64};
use crate::dbyte::BYTES_PER_DBYTE;
use crate::error::{Result, ZipRecError};

/// The original's `DECODEDBYTE_SIGNATURE` macro, zero-padded out to the
/// 44-byte field this format's header reserves for it.
const SIGNATURE_TEXT: &[u8] = b"Recovered Lempel-Ziv Data Stream\nv2\n\n\x1A\x04";

pub const SIGNATURE_LEN: usize = 44;
pub const HEADER_LEN: u64 = 160;

const_assert_eq!(BYTES_PER_DBYTE, 4);

pub fn signature() -> [u8; SIGNATURE_LEN] {
    let mut sig = [0u8; SIGNATURE_LEN];
    sig[..SIGNATURE_TEXT.len()].copy_from_slice(SIGNATURE_TEXT);
    sig
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DbHeader {
    pub data_offset: u64,
    pub byte_count: u64,
    pub reference_window: u32,
    pub bytes_per_dbyte: u16,
    pub discontinuity_count: u16,
    pub replacement_offset: u64,
    pub replacement_count: u32,
    pub replacement_highest: u32,
    pub packet_offset: u64,
    pub packet_count: u32,
}

/// Writes the 44-byte signature plus a zero-filled 116-byte header
/// (placeholders for every field that `patch_header` fills in once the
/// true counts are known), leaving the stream positioned at
/// [`HEADER_LEN`] (the start of the data region) and returning that
/// offset.
pub fn write_placeholder_header<W: Write + Seek>(out: &mut W, reference_window: u32) -> Result<u64> {
    out.write_all(&signature())?;
    write64(out, 0)?; // data_offset placeholder
    write64(out, 0)?; // byte_count placeholder
    write32(out, reference_window)?;
    write16(out, BYTES_PER_DBYTE as u16)?;
    write16(out, 0)?; // discontinuity_count placeholder
    write64(out, 0)?; // replacement_offset placeholder
    write32(out, 0)?; // replacement_count placeholder
    write32(out, 0)?; // replacement_highest placeholder
    write64(out, 0)?; // packet_offset placeholder
    write32(out, 0)?; // packet_count placeholder
    out.write_all(&[0u8; 64])?; // reserved

    let data_offset = out.stream_position()?;
    debug_assert_eq!(data_offset, HEADER_LEN);
    out.seek(SeekFrom::Start(44))?;
    write64(out, data_offset)?;
    out.seek(SeekFrom::Start(data_offset))?;
    Ok(data_offset)
}

/// Seeks back into an already-written header and patches every field
/// that streaming couldn't know up front. Leaves the stream positioned
/// wherever it lands after the last write — callers that need to keep
/// appending should seek back to the end themselves.
#[allow(clippy::too_many_arguments)]
pub fn patch_header<W: Write + Seek>(
    out: &mut W,
    byte_count: u64,
    discontinuity_count: u16,
    replacement_offset: u64,
    replacement_count: u32,
    replacement_highest: u32,
    packet_offset: u64,
    packet_count: u32,
) -> Result<()> {
    out.seek(SeekFrom::Start(52))?;
    write64(out, byte_count)?;
    out.seek(SeekFrom::Start(66))?;
    write16(out, discontinuity_count)?;
    out.seek(SeekFrom::Start(68))?;
    write64(out, replacement_offset)?;
    write32(out, replacement_count)?;
    write32(out, replacement_highest)?;
    write64(out, packet_offset)?;
    write32(out, packet_count)?;
    out.flush()?;
    Ok(())
}

/// Verifies the signature, reads every header field, and leaves the
/// stream positioned at `data_offset` so a caller can stream-read the
/// decoded bytes sequentially. Returns `MalformedContainer` on a bad
/// signature or a short/truncated header rather than panicking — the
/// caller must discard whatever `DecodeBuffer` it was building.
pub fn read_header<R: Read + Seek>(inp: &mut R) -> Result<DbHeader> {
    inp.seek(SeekFrom::Start(0))?;
    let mut sig = [0u8; SIGNATURE_LEN];
    inp.read_exact(&mut sig)
        .map_err(|_| ZipRecError::MalformedContainer("truncated signature"))?;
    if sig != signature() {
        return Err(ZipRecError::MalformedContainer("bad signature"));
    }
    let truncated = |_| ZipRecError::MalformedContainer("truncated header");
    let data_offset = read64(inp).map_err(truncated)?;
    let byte_count = read64(inp).map_err(truncated)?;
    let reference_window = read32(inp).map_err(truncated)?;
    let bytes_per_dbyte = read16(inp).map_err(truncated)?;
    let discontinuity_count = read16(inp).map_err(truncated)?;
    let replacement_offset = read64(inp).map_err(truncated)?;
    let replacement_count = read32(inp).map_err(truncated)?;
    let replacement_highest = read32(inp).map_err(truncated)?;
    let packet_offset = read64(inp).map_err(truncated)?;
    let packet_count = read32(inp).map_err(truncated)?;
    inp.seek(SeekFrom::Start(data_offset))?;
    Ok(DbHeader {
        data_offset,
        byte_count,
        reference_window,
        bytes_per_dbyte,
        discontinuity_count,
        replacement_offset,
        replacement_count,
        replacement_highest,
        packet_offset,
        packet_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn placeholder_header_then_patch_round_trips() {
        let mut buf = Cursor::new(Vec::new());
        let data_offset = write_placeholder_header(&mut buf, 32768).unwrap();
        assert_eq!(data_offset, HEADER_LEN);

        buf.seek(SeekFrom::End(0)).unwrap();
        let repl_offset = buf.position();
        patch_header(&mut buf, 5, 1, repl_offset, 0, 0, repl_offset, 0).unwrap();

        let header = read_header(&mut buf).unwrap();
        assert_eq!(header.data_offset, HEADER_LEN);
        assert_eq!(header.byte_count, 5);
        assert_eq!(header.reference_window, 32768);
        assert_eq!(header.bytes_per_dbyte, 4);
        assert_eq!(header.discontinuity_count, 1);
        assert_eq!(header.replacement_offset, repl_offset);
    }

    #[test]
    fn bad_signature_is_malformed() {
        let mut buf = Cursor::new(vec![0u8; 200]);
        assert!(matches!(
            read_header(&mut buf),
            Err(ZipRecError::MalformedContainer(_))
        ));
    }

    #[test]
    fn truncated_header_is_malformed() {
        let mut buf = Cursor::new(signature().to_vec());
        assert!(matches!(
            read_header(&mut buf),
            Err(ZipRecError::MalformedContainer(_))
        ));
    }
}
