//! `DecodedByte` — a single 32-bit token describing one position of the
//! recovered output: a literal byte (with provenance/confidence), an
//! unresolved back-reference (wildcard co-index), or a discontinuity
//! marker. Semantics are observed via numeric ranges rather than a
//! bit-field type, matching the on-disk representation exactly (see
//! §3.1 / §6.1): the word is always written big-endian, 4 bytes.

use std::io::{self, Read, Write};

use crate::byteio::{read32, write32};

pub const DBYTE_RECONSTRUCTED: u32 = 0xFF00_0000;
pub const DBYTE_MASK_LITERAL: u32 = 0xFF80_0000;
pub const DBYTE_MASK_CERTAINLIT: u32 = 0xFFE0_0000;

pub const DBYTE_DISCONTINUITY: u32 = 0xFC00_0000;
pub const DBYTE_DISCONTINUITY_MASK: u32 = 0xFE00_0000;

pub const DBYTE_MASK_CONFIDENCE: u32 = 0x007F_0000;
pub const DBYTE_SHIFT_CONFIDENCE: u32 = 16;
pub const DBYTE_CONFIDENCE_USER: u32 = 0x007F_0000;
pub const DBYTE_CONFIDENCE_UNKNOWN: u32 = 0;
pub const DBYTE_CONFIDENCE_LEVELS: u32 = 62;

pub const DBYTE_INFER_BASE: u32 = 0x0040_0000;
pub const DBYTE_INFER_LEVELS: u32 = 32;

pub const DBYTE_MASK_TYPE: u32 = 0x00FF_0000;
pub const DBYTE_SHIFT_TYPE: u32 = 16;

/// Number of bytes a DecodedByte takes on disk.
pub const BYTES_PER_DBYTE: usize = 4;

pub const DEFAULT_UNKNOWN: u8 = b'?';

#[inline(always)]
fn lit_type(word: u32) -> u8 {
    ((word & DBYTE_MASK_TYPE) >> DBYTE_SHIFT_TYPE) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteType {
    Unknown,
    WildGuess,
    Guessed,
    Reconstructed,
    UserSupplied,
    InferredLit,
    Literal,
}

/// Confidence-to-provenance map. Boundaries are ported verbatim from the
/// original's `s_confidence_to_type[256]` table rather than re-derived: index
/// 0 is `Unknown`; 1..=19 `WildGuess`; 20..=47 `Guessed`; 48..=62
/// `Reconstructed`; 63 `UserSupplied`; 64..=223 `InferredLit` (the
/// across-discontinuity band noted in §3.1); 224..=255 `Literal`.
const fn byte_type_for(index: u8) -> ByteType {
    match index {
        0 => ByteType::Unknown,
        1..=19 => ByteType::WildGuess,
        20..=47 => ByteType::Guessed,
        48..=62 => ByteType::Reconstructed,
        63 => ByteType::UserSupplied,
        64..=223 => ByteType::InferredLit,
        224..=255 => ByteType::Literal,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFormat {
    None,
    PlainText,
    DecodedByte,
    Html,
    Listing,
    /// Accumulate writes for later replay rather than emitting immediately.
    /// The original leaves this format as an unimplemented stub; so do we —
    /// no caller in this crate selects it yet.
    Buffered,
}

/// Per-output-stream state threaded through `DecodedByte::write` calls:
/// the previously-written provenance (for HTML tag transitions) and the
/// running totals used by the `Listing` format's footer line. The
/// original keeps this as writer-global statics; here it is owned by
/// whatever is driving the writes (normally a `DecodeBuffer`).
#[derive(Debug, Clone)]
pub struct WriteContext {
    pub prev_byte_type: ByteType,
    pub prev_char: u8,
    pub listing_total: u64,
    pub listing_known: u64,
}

impl Default for WriteContext {
    fn default() -> Self {
        Self {
            prev_byte_type: ByteType::Literal,
            prev_char: 0,
            listing_total: 0,
            listing_known: 0,
        }
    }
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodedByte(pub u32);

impl DecodedByte {
    #[inline]
    pub const fn new() -> Self {
        Self(0)
    }

    #[inline]
    pub const fn literal(byte: u8) -> Self {
        Self(DBYTE_MASK_CERTAINLIT | byte as u32)
    }

    #[inline]
    pub const fn reference(co_index: u32) -> Self {
        Self(co_index)
    }

    #[inline]
    pub const fn discontinuity(max_backref: u32) -> Self {
        Self(DBYTE_DISCONTINUITY | (max_backref & !DBYTE_DISCONTINUITY_MASK))
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    // --- accessors -------------------------------------------------

    #[inline]
    pub fn is_literal(self) -> bool {
        self.0 >= DBYTE_RECONSTRUCTED
    }

    #[inline]
    pub fn is_reference(self) -> bool {
        self.0 < DBYTE_DISCONTINUITY
    }

    #[inline]
    pub fn is_original_literal(self) -> bool {
        (self.0 & DBYTE_MASK_LITERAL) == DBYTE_MASK_LITERAL
    }

    #[inline]
    pub fn is_inferred_literal(self) -> bool {
        self.is_literal()
            && (self.0 & DBYTE_MASK_CERTAINLIT) != DBYTE_MASK_CERTAINLIT
            && (self.0 & DBYTE_MASK_TYPE) >= DBYTE_INFER_BASE
    }

    #[inline]
    pub fn is_reconstructed(self) -> bool {
        (self.0 & DBYTE_MASK_LITERAL) == DBYTE_RECONSTRUCTED
    }

    #[inline]
    pub fn is_discontinuity(self) -> bool {
        (self.0 & DBYTE_DISCONTINUITY_MASK) == DBYTE_DISCONTINUITY
    }

    pub fn byte_type(self) -> ByteType {
        if self.is_literal() {
            byte_type_for(lit_type(self.0))
        } else {
            ByteType::Unknown
        }
    }

    #[inline]
    pub fn confidence(self) -> u32 {
        (self.0 & DBYTE_MASK_CONFIDENCE) >> DBYTE_SHIFT_CONFIDENCE
    }

    #[inline]
    pub fn byte_value(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    #[inline]
    pub fn original_location(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn discontinuity_size(self) -> u32 {
        self.0 & !DBYTE_DISCONTINUITY_MASK
    }

    // --- manipulators ------------------------------------------------

    #[inline]
    pub fn set_original_location(&mut self, loc: u32) {
        self.0 = loc;
    }

    #[inline]
    pub fn set_byte_value(&mut self, byte: u8) {
        self.0 = DBYTE_MASK_CERTAINLIT | byte as u32;
    }

    #[inline]
    pub fn set_inferred_byte_value(&mut self, byte: u8) {
        self.0 = DBYTE_MASK_LITERAL | byte as u32;
    }

    #[inline]
    pub fn set_reconstructed(&mut self, byte: u8, confidence: u32) {
        self.0 = DBYTE_RECONSTRUCTED
            | ((confidence << DBYTE_SHIFT_CONFIDENCE) & DBYTE_MASK_CONFIDENCE)
            | byte as u32;
    }

    #[inline]
    pub fn set_confidence(&mut self, confidence: u32) {
        self.0 = (self.0 & !DBYTE_MASK_CONFIDENCE) | (confidence << DBYTE_SHIFT_CONFIDENCE);
    }

    #[inline]
    pub fn set_discontinuity_size(&mut self, size: u32) {
        if self.is_discontinuity() {
            self.0 = DBYTE_DISCONTINUITY | (size & !DBYTE_DISCONTINUITY_MASK);
        }
    }

    // --- I/O -----------------------------------------------------------

    pub fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self(read32(r)?))
    }

    pub fn write<W: Write>(
        self,
        out: &mut W,
        format: WriteFormat,
        unknown_char: u8,
        ctx: &mut WriteContext,
    ) -> io::Result<bool> {
        match format {
            WriteFormat::None => Ok(true),
            WriteFormat::DecodedByte => {
                write32(out, self.0)?;
                Ok(true)
            }
            WriteFormat::PlainText => {
                let byte = if self.is_literal() {
                    self.byte_value()
                } else {
                    unknown_char
                };
                out.write_all(&[byte])?;
                Ok(true)
            }
            WriteFormat::Html => {
                let bt = self.byte_type();
                if bt != ctx.prev_byte_type {
                    if let Some(tag) = close_tag(ctx.prev_byte_type) {
                        out.write_all(tag.as_bytes())?;
                    }
                    if let Some(tag) = open_tag(bt) {
                        out.write_all(tag.as_bytes())?;
                    }
                    ctx.prev_byte_type = bt;
                }
                let byte = if self.is_literal() {
                    self.byte_value()
                } else {
                    unknown_char
                };
                write_html_char(out, byte, ctx)?;
                Ok(true)
            }
            WriteFormat::Listing => {
                ctx.listing_total += 1;
                if self.is_literal() {
                    ctx.listing_known += 1;
                }
                Ok(true)
            }
            WriteFormat::Buffered => Ok(true),
        }
    }

    pub fn write_buffer<W: Write>(
        bytes: &[DecodedByte],
        out: &mut W,
        format: WriteFormat,
        unknown_char: u8,
        ctx: &mut WriteContext,
    ) -> io::Result<bool> {
        for &b in bytes {
            if !b.write(out, format, unknown_char, ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn write_message<W: Write>(
        format: WriteFormat,
        out: &mut W,
        message: &str,
        ctx: &mut WriteContext,
    ) -> io::Result<bool> {
        for byte in message.bytes() {
            if !DecodedByte::literal(byte).write(out, format, DEFAULT_UNKNOWN, ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn write_html_header<W: Write>(out: &mut W, test_mode: bool) -> io::Result<()> {
        out.write_all(HTML_STYLE.as_bytes())?;
        if test_mode {
            out.write_all(b"<p><em>TEST MODE</em></p>\n")?;
        }
        Ok(())
    }

    pub fn write_header<W: Write>(
        format: WriteFormat,
        out: &mut W,
        test_mode: bool,
        ctx: &mut WriteContext,
    ) -> io::Result<bool> {
        ctx.prev_byte_type = ByteType::Literal;
        match format {
            WriteFormat::Html => {
                Self::write_html_header(out, test_mode)?;
                Ok(true)
            }
            WriteFormat::Listing => {
                ctx.listing_total = 0;
                ctx.listing_known = 0;
                Ok(true)
            }
            _ => Ok(true),
        }
    }

    pub fn write_footer<W: Write>(
        format: WriteFormat,
        out: &mut W,
        filename: &str,
        original_size_known: bool,
        ctx: &mut WriteContext,
    ) -> io::Result<bool> {
        match format {
            WriteFormat::Html => {
                if let Some(tag) = close_tag(ctx.prev_byte_type) {
                    out.write_all(tag.as_bytes())?;
                }
                out.write_all(b"</body></html>\n")?;
                Ok(true)
            }
            WriteFormat::Listing => {
                let sign = if original_size_known { '+' } else { '-' };
                log::info!(
                    "{}{} known {} total {}",
                    sign,
                    ctx.listing_known,
                    ctx.listing_total,
                    filename
                );
                Ok(true)
            }
            _ => Ok(true),
        }
    }
}

fn open_tag(bt: ByteType) -> Option<&'static str> {
    match bt {
        ByteType::Unknown => Some("<B>"),
        ByteType::WildGuess => Some("<DFN>"),
        ByteType::Guessed => Some("<U>"),
        ByteType::Reconstructed => Some("<I>"),
        ByteType::UserSupplied => Some("<EM>"),
        ByteType::InferredLit => Some("<S>"),
        ByteType::Literal => None,
    }
}

fn close_tag(bt: ByteType) -> Option<&'static str> {
    match bt {
        ByteType::Unknown => Some("</B>"),
        ByteType::WildGuess => Some("</DFN>"),
        ByteType::Guessed => Some("</U>"),
        ByteType::Reconstructed => Some("</I>"),
        ByteType::UserSupplied => Some("</EM>"),
        ByteType::InferredLit => Some("</S>"),
        ByteType::Literal => None,
    }
}

const HTML_STYLE: &str = concat!(
    "<html><head><style>\n",
    "B { color: gray; } DFN { color: maroon; } U { color: purple; }\n",
    "I { color: blue; } EM { color: green; } S { color: teal; }\n",
    "</style></head><body><pre>\n",
);

fn write_html_char<W: Write>(out: &mut W, byte: u8, ctx: &mut WriteContext) -> io::Result<()> {
    match byte {
        b'<' => out.write_all(b"&lt;")?,
        b'&' => out.write_all(b"&amp;")?,
        b'\n' => out.write_all(b"<br/>\n")?,
        b'\r' => {}
        b' ' if ctx.prev_char == b' ' => out.write_all(b"&nbsp;")?,
        other => out.write_all(&[other])?,
    }
    ctx.prev_char = byte;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certain_literal_roundtrip() {
        let db = DecodedByte::literal(b'H');
        assert!(db.is_literal());
        assert!(!db.is_reference());
        assert!(!db.is_discontinuity());
        assert_eq!(db.byte_value(), b'H');
        assert_eq!(db.byte_type(), ByteType::Literal);
    }

    #[test]
    fn reference_is_exactly_one_kind() {
        let db = DecodedByte::reference(42);
        assert!(db.is_reference());
        assert!(!db.is_literal());
        assert!(!db.is_discontinuity());
    }

    #[test]
    fn discontinuity_roundtrips_size() {
        let mut db = DecodedByte::discontinuity(4);
        assert!(db.is_discontinuity());
        assert!(!db.is_literal());
        assert!(!db.is_reference());
        assert_eq!(db.discontinuity_size(), 4);
        db.set_discontinuity_size(17);
        assert_eq!(db.discontinuity_size(), 17);
    }

    #[test]
    fn reconstructed_confidence_roundtrips() {
        let mut db = DecodedByte::new();
        db.set_reconstructed(b'x', 50);
        assert!(db.is_literal());
        assert!(db.is_reconstructed());
        assert_eq!(db.confidence(), 50);
        assert_eq!(db.byte_value(), b'x');
    }

    #[test]
    fn plaintext_write_substitutes_unknown() {
        let mut ctx = WriteContext::default();
        let mut out = Vec::new();
        let db = DecodedByte::reference(7);
        db.write(&mut out, WriteFormat::PlainText, b'?', &mut ctx)
            .unwrap();
        assert_eq!(out, b"?");
    }

    #[test]
    fn html_tag_transitions_bracket_reconstructed_run() {
        let mut ctx = WriteContext::default();
        let mut out = Vec::new();
        let mut lit = DecodedByte::literal(b'L');
        let mut recon = DecodedByte::new();
        recon.set_reconstructed(b'R', 50);
        lit.write(&mut out, WriteFormat::Html, b'?', &mut ctx)
            .unwrap();
        recon
            .write(&mut out, WriteFormat::Html, b'?', &mut ctx)
            .unwrap();
        lit.write(&mut out, WriteFormat::Html, b'?', &mut ctx)
            .unwrap();
        assert_eq!(std::str::from_utf8(&out).unwrap(), "L<I>R</I>L");
    }

    #[test]
    fn decodedbyte_word_roundtrips_through_be_io() {
        let mut ctx = WriteContext::default();
        let mut buf = Vec::new();
        let db = DecodedByte::literal(b'Z');
        db.write(&mut buf, WriteFormat::DecodedByte, b'?', &mut ctx)
            .unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let read_back = DecodedByte::read(&mut cursor).unwrap();
        assert_eq!(read_back, db);
    }
}
