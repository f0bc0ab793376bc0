//! ZipRec: reconstructing plaintext from damaged DEFLATE-family streams.
//!
//! The core data model is [`dbyte::DecodedByte`] — a single 32-bit word
//! that is either a literal, an unresolved back-reference (wildcard), or
//! a discontinuity marker. [`decode_buffer::DecodeBuffer`] is the engine
//! that accumulates these across a sliding reference window, resolves
//! wildcards through a replacement table, and aligns discontinuities by
//! scoring candidate offsets against surrounding context. [`db_format`]
//! is the on-disk container tying it all together; [`huffman`] and
//! [`bitstream`] are the canonical-Huffman/bit-level primitives a caller
//! decoding real DEFLATE block headers drives [`decode_buffer`] with.

pub mod bitstream;
pub mod byteio;
pub mod config;
pub mod db_format;
pub mod dbyte;
pub mod decode_buffer;
pub mod error;
pub mod huffman;
pub mod stats;
pub mod wildcard;

#[macro_use]
extern crate static_assertions;

pub use dbyte::DecodedByte;
pub use error::{Result, ZipRecError};

/// The byte source a [`bitstream::BitStream`] reads from. Pared down to
/// exactly what `bitstream`/`huffman` drive; a caller feeding real
/// DEFLATE data implements this over its own buffering scheme the way
/// the teacher's chunked/filebuffer input streams did.
pub trait DeflateInput {
    unsafe fn get_le_word_no_advance(&mut self) -> usize;
    fn move_stream_pos<const REFILL: bool>(&mut self, amount: isize) -> bool;
    fn tell_stream_pos(&self) -> usize;
    fn read<const REFILL: bool>(&mut self, out_data: &mut [u8]) -> usize;
    fn ensure_overread_length(&mut self);
    fn has_readable_overread(&self) -> bool;
    fn read_exact_into<O: DeflateOutput>(&mut self, out_stream: &mut O, length: usize) -> bool;
}

/// Sink for [`DeflateInput::read_exact_into`]'s literal-run fast path.
/// Intentionally empty: no kept code calls a method on it, it only
/// appears as a generic bound.
pub trait DeflateOutput {}
