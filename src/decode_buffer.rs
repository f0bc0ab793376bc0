//! `DecodeBuffer` — the central engine (§4.3-4.6). Owns the sliding
//! reference window, the per-discontinuity replacement table, and the
//! DB-format I/O that ties them to disk. Grounded throughout on
//! `original_source/dbuffer.C`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::dbyte::{DecodedByte, WriteContext, WriteFormat, BYTES_PER_DBYTE};
use crate::db_format::{self, DbHeader};
use crate::config::ZipRecConfig;
use crate::error::{Result, ZipRecError};
use crate::stats::Stats;
use crate::wildcard::WildcardCounts;

/// Minimum number of reconstructed back-references which must match the
/// literals prior to a discontinuity to accept a possible overlap (§4.5).
const MIN_DISC_OVERLAP: usize = 12;

const CORRUPTION_BANNER: &str = "\n\n\
*******************************************\n\
***                                     ***\n\
***      Compressed Data Corrupted      ***\n\
***                                     ***\n\
*******************************************\n\n";

/// The sliding-window reconstruction engine. Generic over any
/// `Write + Seek` output sink: the real binary drives it with
/// `std::fs::File`, tests drive it with `std::io::Cursor<Vec<u8>>`.
///
/// Reading back a previously written DB file (`open_input_file`,
/// `load_bytes`, `apply_replacements`, `align_discontinuity`,
/// `write_updated_byte`) goes through a concrete `std::fs::File` opened
/// from `backing_file`, matching the original's "reopen the backing file
/// read-write" pattern for in-place patches.
pub struct DecodeBuffer<W: Write + Seek> {
    config: ZipRecConfig,

    /// Circular reference window of the most recent `W` DecodedBytes.
    buffer: Vec<DecodedByte>,
    bufptr: usize,
    numbytes: u64,
    discontinuities: u32,

    output: Option<W>,
    write_ctx: WriteContext,

    /// Dense `(discontinuities+1) * window` replacement table.
    replacements: Vec<DecodedByte>,
    highest_replaced: usize,
    wildcard_counts: Option<WildcardCounts>,

    /// Opaque packet-descriptor bytes to be written verbatim by
    /// `finalize_db`; the core never interprets them (§1, external
    /// collaborator).
    packet_descriptors: Vec<u8>,

    /// The loaded image of a DB file, present once `load_bytes` has run.
    filebuffer: Vec<DecodedByte>,
    loaded_packet_descriptors: Vec<u8>,
    datastart: u64,
    backing_file: Option<PathBuf>,
    input: Option<File>,

    show_errors: bool,
    prev_correct: bool,
}

impl<W: Write + Seek> DecodeBuffer<W> {
    /// Constructs a fresh encode-side buffer. Writes the format's header
    /// (and, for `WriteFormat::DecodedByte`, the placeholder DB header)
    /// immediately, matching the original constructor calling
    /// `setOutputFile` before returning.
    pub fn new(output: Option<W>, config: ZipRecConfig) -> Result<Self> {
        let window = config.reference_window() as usize;
        let mut db = Self {
            config,
            buffer: vec![DecodedByte::new(); window],
            bufptr: 0,
            numbytes: 0,
            discontinuities: 0,
            output,
            write_ctx: WriteContext::default(),
            replacements: Vec::new(),
            highest_replaced: 0,
            wildcard_counts: None,
            packet_descriptors: Vec::new(),
            filebuffer: Vec::new(),
            loaded_packet_descriptors: Vec::new(),
            datastart: 0,
            backing_file: None,
            input: None,
            show_errors: false,
            prev_correct: true,
        };
        db.rewind_reference_window();
        let fmt = db.config.write_format;
        let test_mode = db.config.test_mode;
        if let Some(out) = db.output.as_mut() {
            DecodedByte::write_header(fmt, out, test_mode, &mut db.write_ctx)?;
            if fmt == WriteFormat::DecodedByte {
                db_format::write_placeholder_header(out, db.config.reference_window())?;
            }
        }
        Ok(db)
    }

    pub fn reference_window(&self) -> usize {
        self.config.reference_window() as usize
    }

    pub fn total_bytes(&self) -> u64 {
        self.numbytes
    }

    pub fn discontinuity_count(&self) -> u32 {
        self.discontinuities
    }

    pub fn num_replacements(&self) -> usize {
        self.replacements.len()
    }

    pub fn set_packet_descriptors(&mut self, bytes: Vec<u8>) {
        self.packet_descriptors = bytes;
    }

    pub fn loaded_packet_descriptors(&self) -> &[u8] {
        &self.loaded_packet_descriptors
    }

    /// Reclaims the output sink, e.g. to drain an in-memory cursor after
    /// `finalize()` instead of writing directly to a file.
    pub fn into_output(self) -> Option<W> {
        self.output
    }

    // --- reference window -------------------------------------------------

    fn rewind(&mut self) {
        self.bufptr = 0;
    }

    /// Stamps every slot of the window with a self-referential co-index
    /// (§9 "Lazy replacement growth"): a wildcard copied from an
    /// untouched slot terminates on itself rather than on garbage.
    fn rewind_reference_window(&mut self) {
        let w = self.reference_window();
        let loc = (self.discontinuities as usize + 1) * w;
        for i in 0..w {
            self.buffer[i].set_original_location((loc - i) as u32);
        }
        self.rewind();
    }

    fn clear_reference_window(&mut self, init: bool) {
        if init {
            self.discontinuities = 0;
        } else {
            self.discontinuities += 1;
            let w = self.reference_window();
            let repl_count = (self.discontinuities as usize + 1) * w;
            let added = repl_count.saturating_sub(self.replacements.len());
            self.expand_replacements(added);
        }
        self.rewind_reference_window();
    }

    // --- emission ----------------------------------------------------------

    /// Writes one DecodedByte word into the window and out to the sink,
    /// preserving whatever it is (literal, wildcard, or discontinuity) —
    /// the shared primitive behind every `add_*` method.
    pub fn add_byte(&mut self, b: DecodedByte) -> Result<bool> {
        let w = self.reference_window();
        self.buffer[self.bufptr] = b;
        let mut success = true;
        if self.output.is_some() {
            if b.raw() == 0 && matches!(self.config.write_format, WriteFormat::PlainText | WriteFormat::Html) {
                if !self.output_string(CORRUPTION_BANNER, crate::dbyte::DBYTE_CONFIDENCE_UNKNOWN)? {
                    success = false;
                }
            } else {
                let fmt = self.config.write_format;
                let unk = self.config.unknown_char;
                let out = self.output.as_mut().unwrap();
                if !b.write(out, fmt, unk, &mut self.write_ctx)? {
                    success = false;
                }
            }
        }
        self.bufptr = (self.bufptr + 1) % w;
        self.numbytes += 1;
        Ok(success)
    }

    pub fn add_literal(&mut self, byte: u8) -> Result<bool> {
        self.add_byte(DecodedByte::literal(byte))
    }

    pub fn add_literal_with_confidence(&mut self, byte: u8, confidence: u32) -> Result<bool> {
        let mut d = DecodedByte::literal(byte);
        d.set_confidence(confidence);
        self.add_byte(d)
    }

    /// Emits `length` DecodedBytes copied from `distance` bytes back in
    /// the window. A copy that reaches a slot holding a wildcard
    /// propagates that wildcard's co-index unchanged, because the whole
    /// 32-bit word — not just a resolved byte value — is what gets
    /// copied (§4.3).
    pub fn add_copy(&mut self, length: u32, distance: u32) -> Result<bool> {
        let w = self.reference_window() as isize;
        let mut success = true;
        for _ in 0..length {
            let idx = (self.bufptr as isize - distance as isize).rem_euclid(w) as usize;
            let b = self.buffer[idx];
            if !self.add_byte(b)? {
                success = false;
            }
        }
        Ok(success)
    }

    /// Emits a discontinuity marker. If `clear`, the reference window
    /// and replacement slot are rotated to a fresh discontinuity; if
    /// not, only the window's self-referential stamps are rewound (used
    /// when the very first record is a discontinuity and no history
    /// exists yet).
    pub fn add_discontinuity(&mut self, max_backref: u32, clear: bool) -> Result<bool> {
        let success = self.add_byte(DecodedByte::discontinuity(max_backref))?;
        if clear {
            self.clear_reference_window(false);
        } else {
            self.rewind_reference_window();
        }
        Ok(success)
    }

    pub fn add_string(&mut self, s: &[u8]) -> Result<bool> {
        let mut success = true;
        for &b in s {
            if !self.add_literal(b)? {
                success = false;
            }
        }
        Ok(success)
    }

    /// Writes straight to the sink without touching the window or byte
    /// count — used for diagnostic banners that aren't part of the
    /// recovered stream proper.
    pub fn output_string(&mut self, s: &str, confidence: u32) -> Result<bool> {
        let Some(out) = self.output.as_mut() else {
            return Ok(false);
        };
        let fmt = self.config.write_format;
        let unk = self.config.unknown_char;
        let mut success = true;
        for byte in s.bytes() {
            let mut d = DecodedByte::literal(byte);
            d.set_confidence(confidence);
            if !d.write(out, fmt, unk, &mut self.write_ctx)? {
                success = false;
            }
        }
        Ok(success)
    }

    /// Produces the last `num_bytes` literals currently in the window,
    /// oldest first, substituting `unknown_char` for non-literal slots.
    /// Used to expose context to external guessers (§4.3).
    pub fn copy_buffer_tail(&self, num_bytes: usize) -> Vec<u8> {
        let w = self.reference_window();
        let num_bytes = num_bytes.min(w);
        let mut result = vec![0u8; num_bytes];
        let mut pos = self.bufptr;
        for slot in result.iter_mut().rev() {
            pos = if pos > 0 { pos - 1 } else { w - 1 };
            let db = self.buffer[pos];
            *slot = if db.is_literal() { db.byte_value() } else { self.config.unknown_char };
        }
        result
    }

    // --- replacement table lifecycle ---------------------------------------

    pub fn set_replacements(&mut self, repl: &[DecodedByte]) {
        self.replacements = repl.to_vec();
        self.highest_replaced = 0;
    }

    /// Extends the replacement table by `added` entries, each initialized
    /// to refer to its own co-index (still unresolved).
    pub fn expand_replacements(&mut self, added: usize) {
        let base = self.replacements.len();
        self.replacements.reserve(added);
        for i in 0..added {
            let mut d = DecodedByte::new();
            d.set_original_location((base + i) as u32);
            self.replacements.push(d);
        }
    }

    /// Resets the `window`-sized slice belonging to discontinuity `d`
    /// back to self-referential (unresolved) co-indices.
    pub fn clear_replacements(&mut self, which_discont: u32) -> bool {
        if which_discont > self.discontinuities || self.replacements.is_empty() {
            return false;
        }
        let w = self.reference_window();
        let base = which_discont as usize * w;
        let limit = (base + w).min(self.replacements.len());
        for i in base..limit {
            self.replacements[i].set_original_location(i as u32);
        }
        true
    }

    /// Co-index 0 is a sentinel and is always rejected (§9 Open Question
    /// (b): the original treats it this way and we preserve that).
    pub fn set_replacement(&mut self, which: usize, repl: DecodedByte) -> bool {
        if which == 0 || which >= self.replacements.len() {
            return false;
        }
        self.replacements[which] = repl;
        if repl.is_literal() {
            if let Some(wc) = self.wildcard_counts.as_mut() {
                wc.clear(which);
            }
        }
        self.highest_replaced = self.highest_replaced.max(which);
        true
    }

    pub fn set_replacement_byte(&mut self, which: usize, byte: u8, confidence: u32) -> bool {
        if which == 0 || which >= self.replacements.len() {
            return false;
        }
        self.replacements[which].set_reconstructed(byte, confidence);
        if let Some(wc) = self.wildcard_counts.as_mut() {
            wc.clear(which);
        }
        self.highest_replaced = self.highest_replaced.max(which);
        true
    }

    pub fn count_replacements(&self, num_discont: u32, max_backref: u32) -> u32 {
        let w = self.reference_window();
        let max_backref = if max_backref == 0 { w as u32 } else { max_backref };
        let base = num_discont as usize * w;
        let limit = (base + max_backref as usize).min(self.replacements.len());
        if base >= limit {
            return 0;
        }
        self.replacements[base..limit].iter().filter(|r| r.is_literal()).count() as u32
    }

    pub fn highest_replacement(&self, num_discont: u32, max_backref: u32) -> usize {
        let w = self.reference_window();
        let base = num_discont as usize * w;
        let limit = (base + max_backref as usize).min(self.replacements.len());
        for i in (base + 1..=limit).rev() {
            if self.replacements[i - 1].is_literal() {
                return i - base;
            }
        }
        0
    }

    /// Overwrites `db` with the table entry it refers to, if it isn't
    /// already a literal. Returns whether the replacement resolved to a
    /// literal.
    pub fn apply_replacement(&self, db: &mut DecodedByte) -> bool {
        if !db.is_literal() {
            let loc = db.original_location() as usize;
            if loc < self.replacements.len() {
                *db = self.replacements[loc];
            } else {
                return false;
            }
        }
        true
    }

    /// Same, but operating in place on the loaded DB image.
    pub fn apply_replacement_at(&mut self, which: usize) -> bool {
        let Some(mut db) = self.filebuffer.get(which).copied() else {
            return false;
        };
        let ok = self.apply_replacement(&mut db);
        self.filebuffer[which] = db;
        ok
    }

    // --- discontinuity alignment (§4.5) ------------------------------------

    /// Finds the offset at which inferred pre-corruption replacements
    /// most probably join the post-corruption literals, and commits the
    /// result into the replacement table. Returns `false` (not an error)
    /// when no offset clears `MIN_DISC_OVERLAP` with positive score —
    /// the caller is left with wildcards in the output.
    pub fn align_discontinuity(&mut self, which: u32, corruption_size: u32, compression_ratio: f64) -> Result<bool> {
        if which > self.discontinuities {
            return Ok(true);
        }
        let w = self.reference_window();
        let mut max_repl = self.highest_replacement(which, w as u32) % w;

        let mut disc = 0u32;
        let mut discont_loc = None;
        for (i, b) in self.filebuffer.iter().enumerate() {
            if b.is_discontinuity() {
                if disc >= which {
                    discont_loc = Some(i);
                    break;
                }
                disc += 1;
            }
        }
        let Some(discont_loc) = discont_loc else {
            return Ok(false);
        };

        if discont_loc > max_repl {
            max_repl = discont_loc;
        }
        if max_repl > w {
            max_repl = w;
        }
        let region_start = discont_loc.saturating_sub(max_repl);
        let region = &self.filebuffer[region_start..discont_loc];
        let max_repl = region.len();

        let base = which as usize * w;
        let total_count = self.count_replacements(which, max_repl as u32) as f64;
        let weights = compute_byte_weights(region);

        let mut best_score = 0.0f64;
        let mut best_offset = max_repl;
        let mut offset = 1usize;
        while offset + 2 * MIN_DISC_OVERLAP < max_repl {
            let (raw_score, count, correct) =
                score_alignment(region, &self.replacements[base..], max_repl, offset, &weights);
            if (correct as usize) < MIN_DISC_OVERLAP {
                offset += 1;
                continue;
            }
            let mut score = raw_score * (count as f64 / total_count).sqrt();
            let expected_gap = corruption_size as f64 * compression_ratio;
            if expected_gap > 0.0 {
                score *= (expected_gap - offset as f64).abs().sqrt();
            }
            if score > best_score {
                best_score = score;
                best_offset = offset;
                log::debug!("align_discontinuity({which}): score = {score} @ {offset}");
            }
            if correct as f64 > total_count / 2.0 {
                break;
            }
            offset += 1;
        }

        if best_offset >= max_repl || best_score <= 0.0 {
            return Ok(false);
        }

        self.clear_replacements(which);
        self.set_inferred_literals(which, discont_loc, best_offset);
        self.filebuffer[discont_loc].set_discontinuity_size((best_offset + 1) as u32);
        self.write_updated_byte(discont_loc)?;
        Ok(true)
    }

    pub fn align_discontinuities(&mut self) -> Result<bool> {
        if self.filebuffer.is_empty() {
            return Ok(false);
        }
        let first = if self.filebuffer[0].is_discontinuity() { 1 } else { 0 };
        for disc in first..=self.discontinuities {
            if !self.align_discontinuity(disc, 0, 0.0)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Rewrites replacements `[base+1 ..]` to copy the literal bytes (or
    /// chase the true co-index of a reference) found just before
    /// `discont_loc`, `offset` positions shifted — the commit step of
    /// alignment. Inferred literals are tagged with the InferredLit
    /// confidence band (0xDF) per §4.3/§4.5.
    fn set_inferred_literals(&mut self, which: u32, discont_loc: usize, offset: usize) {
        let w = self.reference_window();
        let num_bytes = discont_loc;
        let base = which as usize * w + offset;
        let mut i = 1usize;
        while i < num_bytes && i + offset < w {
            let db = self.filebuffer[discont_loc - i];
            let idx = base + i;
            if idx < self.replacements.len() {
                if db.is_literal() {
                    let mut d = DecodedByte::new();
                    d.set_inferred_byte_value(db.byte_value());
                    d.set_confidence(0xDF);
                    self.replacements[idx] = d;
                } else if db.is_reference() {
                    self.replacements[idx].set_original_location(db.original_location());
                }
            }
            i += 1;
        }
    }

    // --- DB-format I/O (§4.6) -----------------------------------------------

    pub fn finalize(&mut self) -> Result<bool> {
        if self.output.is_none() {
            return Ok(true);
        }
        let fmt = self.config.write_format;
        let filename = self.config.friendly_filename.clone();
        {
            let out = self.output.as_mut().unwrap();
            DecodedByte::write_footer(fmt, out, &filename, true, &mut self.write_ctx)?;
        }
        let success = if fmt == WriteFormat::DecodedByte { self.finalize_db()? } else { true };
        if let Some(out) = self.output.as_mut() {
            out.flush()?;
        }
        Ok(success)
    }

    fn finalize_db(&mut self) -> Result<bool> {
        let unk = self.config.unknown_char;
        let mut ctx = WriteContext::default();
        let mut success = true;
        let out = self.output.as_mut().ok_or(ZipRecError::NoOutputFile)?;
        let repl_offset = out.stream_position()?;
        if !self.replacements.is_empty() {
            success = DecodedByte::write_buffer(&self.replacements, out, WriteFormat::DecodedByte, unk, &mut ctx)?;
        }
        let packet_offset = out.stream_position()?;
        if !self.packet_descriptors.is_empty() {
            out.write_all(&self.packet_descriptors)?;
        }
        let mut highest = self.highest_replaced as u32;
        if highest == 0 && !self.replacements.is_empty() {
            highest = ((self.discontinuities + 1) * self.reference_window() as u32).saturating_sub(1);
        }
        db_format::patch_header(
            out,
            self.numbytes,
            self.discontinuities as u16,
            repl_offset,
            self.replacements.len() as u32,
            highest,
            packet_offset,
            if self.packet_descriptors.is_empty() { 0 } else { 1 },
        )?;
        Ok(success)
    }

    /// Reopens the backing file read-write, seeks to the DecodedByte slot
    /// for `position`, overwrites its four bytes, and closes it — no
    /// long-lived handle, matching §5's resource-lifecycle note.
    pub fn write_updated_byte(&self, position: usize) -> Result<bool> {
        let Some(backing) = self.backing_file.as_ref() else {
            return Ok(false);
        };
        if position >= self.filebuffer.len() {
            return Ok(false);
        }
        let mut file = std::fs::OpenOptions::new().read(true).write(true).open(backing)?;
        file.seek(SeekFrom::Start(self.datastart + (BYTES_PER_DBYTE * position) as u64))?;
        let mut ctx = WriteContext::default();
        self.filebuffer[position].write(&mut file, WriteFormat::DecodedByte, self.config.unknown_char, &mut ctx)?;
        Ok(true)
    }

    fn rewind_input(&mut self) -> Result<()> {
        if let Some(input) = self.input.as_mut() {
            input.seek(SeekFrom::Start(self.datastart))?;
        }
        Ok(())
    }

    /// Verifies the signature, reads the header, materializes the
    /// replacement table (padding unused high slots with self-referential
    /// co-indices) and the opaque packet-descriptor list, then leaves the
    /// file positioned at the start of the data region.
    pub fn open_input_file(&mut self, path: impl AsRef<Path>) -> Result<DbHeader> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let header = db_format::read_header(&mut file)?;

        self.datastart = header.data_offset;
        self.numbytes = header.byte_count;
        self.discontinuities = header.discontinuity_count as u32;

        let repl_highest_plus_one = header.replacement_highest as usize + 1;
        let total = repl_highest_plus_one.max(header.replacement_count as usize);
        if total > 0 {
            file.seek(SeekFrom::Start(header.replacement_offset))?;
            let mut repl = Vec::with_capacity(total);
            for _ in 0..header.replacement_count as usize {
                repl.push(DecodedByte::read(&mut file)?);
            }
            for i in header.replacement_count as usize..total {
                let mut d = DecodedByte::new();
                d.set_original_location(i as u32);
                repl.push(d);
            }
            self.replacements = repl;
        } else {
            self.replacements.clear();
        }

        if header.packet_count > 0 {
            file.seek(SeekFrom::Start(header.packet_offset))?;
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes)?;
            self.loaded_packet_descriptors = bytes;
        } else {
            self.loaded_packet_descriptors.clear();
        }

        file.seek(SeekFrom::Start(self.datastart))?;
        self.backing_file = Some(path.to_path_buf());
        self.input = Some(file);
        Ok(header)
    }

    /// Reads the entire decoded-byte region into `self.filebuffer` and
    /// builds a fresh `WildcardCounts` over it, expanding as needed when
    /// a wildcard's co-index exceeds the window the counts started with.
    pub fn load_bytes(&mut self) -> Result<()> {
        let w = self.reference_window();
        let numbytes = self.numbytes;
        let datastart = self.datastart;
        let input = self.input.as_mut().ok_or(ZipRecError::NoInputFile)?;
        input.seek(SeekFrom::Start(datastart))?;

        let mut bytes = Vec::with_capacity(numbytes as usize);
        let mut counts = WildcardCounts::new(w);
        for _ in 0..numbytes {
            let b = DecodedByte::read(input)?;
            if b.is_reference() {
                let loc = b.original_location() as usize;
                if loc >= counts.num_counts() {
                    let new_size = loc.div_ceil(w) * w;
                    counts.expand_to(new_size);
                }
                counts.incr(loc);
            }
            bytes.push(b);
        }
        input.seek(SeekFrom::Start(datastart))?;
        counts.set_highest_used();
        self.filebuffer = bytes;
        self.wildcard_counts = Some(counts);
        Ok(())
    }

    pub fn clear_loaded_bytes(&mut self) {
        self.filebuffer.clear();
    }

    /// The replay pass: reads the DB file sequentially, substitutes
    /// resolved replacements for wildcards, and writes the result to
    /// `self.output` in whatever format that sink was configured with.
    pub fn apply_replacements(
        &mut self,
        reference_path: Option<&Path>,
        include_predecessors: bool,
        stats: &mut dyn Stats,
    ) -> Result<bool> {
        if self.input.is_none() || self.output.is_none() || self.replacements.is_empty() {
            return Ok(false);
        }
        let mut reffile = match reference_path {
            Some(p) => Some(File::open(p)?),
            None => None,
        };
        let mut refsize: u64 = 0;
        if let Some(reffile) = reffile.as_mut() {
            refsize = reffile.metadata()?.len();
            // skip any un-extracted starting portion of the reference so it
            // stays tail-aligned with the recovered stream.
            let forced_load = self.filebuffer.is_empty();
            if forced_load {
                self.load_bytes()?;
            }
            if self.discontinuities == 0 {
                let mut pos = refsize as i64 - self.numbytes as i64;
                if let Some(disc) = self.filebuffer.first().copied() {
                    if disc.is_discontinuity() {
                        pos += 1;
                        if include_predecessors {
                            let mut max_backref = disc.discontinuity_size();
                            if max_backref == self.reference_window() as u32 {
                                max_backref = self.highest_replacement(0, max_backref) as u32;
                            }
                            if max_backref > 0 {
                                max_backref -= 1; // ref=0 doesn't exist
                            }
                            if (max_backref as i64) < pos {
                                pos -= max_backref as i64;
                            } else {
                                pos = 0;
                            }
                        }
                    }
                }
                reffile.seek(SeekFrom::Start(pos.max(0) as u64))?;
            }
            if forced_load {
                self.clear_loaded_bytes();
            }
        }
        self.rewind_input()?;
        self.prev_correct = true;
        self.show_errors =
            self.config.test_mode && self.config.show_plaintext_errors && reffile.is_some() && self.config.write_format == WriteFormat::PlainText;

        let mut num_discont: u32 = 0;
        let mut bytecount: u64 = 0;
        let mut success = true;
        while bytecount < self.numbytes {
            bytecount += 1;
            let dbyte = {
                let input = self.input.as_mut().unwrap();
                DecodedByte::read(input)?
            };
            if dbyte.is_discontinuity() {
                let mut max_backref = dbyte.discontinuity_size();
                if include_predecessors {
                    if max_backref == self.reference_window() as u32 {
                        max_backref = self.highest_replacement(num_discont, max_backref) as u32;
                    }
                    let fmt = self.config.write_format;
                    {
                        let out = self.output.as_mut().unwrap();
                        DecodedByte::write_message(fmt, out, "\n===***=== reconstructed back-references ===***===\n", &mut self.write_ctx)?;
                    }
                    if !self.write_replacements(num_discont, max_backref, reffile.as_mut(), stats)? {
                        return Ok(false);
                    }
                    num_discont += 1;
                    let out = self.output.as_mut().unwrap();
                    DecodedByte::write_message(fmt, out, "\n===***=== start of recovered data ===***===\n", &mut self.write_ctx)?;
                } else {
                    if num_discont > 0 {
                        let fmt = self.config.write_format;
                        let out = self.output.as_mut().unwrap();
                        DecodedByte::write_message(
                            fmt,
                            out,
                            "\n\n===***=== data corruption detected at this point ===***===\n\n",
                            &mut self.write_ctx,
                        )?;
                    }
                    num_discont += 1;
                }
                // resynchronize the reference file at the discontinuity so it
                // stays tail-aligned with the recovered stream regardless of
                // how the two lengths compare.
                if let Some(reffile) = reffile.as_mut() {
                    let pos = refsize as i64 - self.numbytes as i64 + bytecount as i64;
                    reffile.seek(SeekFrom::Start(pos.max(0) as u64))?;
                }
                continue;
            }
            let mut dbyte = dbyte;
            let mut replaced = false;
            if !dbyte.is_literal() {
                let loc = dbyte.original_location() as usize;
                if loc < self.replacements.len() {
                    dbyte = self.replacements[loc];
                    if dbyte.is_literal() {
                        replaced = true;
                        stats.incr_bytes_replaced();
                    } else {
                        stats.incr_reconst_unaltered();
                    }
                } else {
                    stats.incr_reconst_unaltered();
                    success = false;
                    break;
                }
            }
            self.compare_to_reference(dbyte, reffile.as_mut(), replaced, stats)?;
            let fmt = self.config.write_format;
            let unk = self.config.unknown_char;
            let out = self.output.as_mut().unwrap();
            if !dbyte.write(out, fmt, unk, &mut self.write_ctx)? {
                success = false;
                break;
            }
        }
        Ok(success)
    }

    /// Dumps the literal replacements accumulated for discontinuity
    /// `num_discontinuities`, in descending order so co-indices run in
    /// the order they occur in the reconstructed history.
    fn write_replacements(
        &mut self,
        num_discontinuities: u32,
        max_backref: u32,
        mut reffp: Option<&mut File>,
        stats: &mut dyn Stats,
    ) -> Result<bool> {
        if self.output.is_none() || self.replacements.is_empty() {
            return Ok(false);
        }
        let w = self.reference_window();
        let base = num_discontinuities as usize * w;
        let limit = (base + w).min(self.replacements.len());
        let mut high = base;
        if let Some(wc) = self.wildcard_counts.as_ref() {
            for i in (base + 1..=limit).rev() {
                if wc.count(i - 1) > 0 {
                    high = i;
                    break;
                }
            }
        } else {
            for i in (base + 1..=limit).rev() {
                if self.replacements[i - 1].is_literal() {
                    high = i;
                    break;
                }
            }
        }
        if high > base + max_backref as usize {
            high = base + max_backref as usize;
        }
        let mut success = true;
        if high > base + 1 {
            for i in (base + 1..high).rev() {
                let dbyte = self.replacements[i];
                if (max_backref as usize) < w && self.config.count_history_bytes {
                    stats.incr_unknown_bytes();
                    stats.incr_corrupted_bytes();
                    if dbyte.is_literal() {
                        stats.incr_bytes_replaced();
                    }
                }
                self.compare_to_reference(dbyte, reffp.as_deref_mut(), true, stats)?;
                let fmt = self.config.write_format;
                let unk = self.config.unknown_char;
                let out = self.output.as_mut().unwrap();
                if !dbyte.write(out, fmt, unk, &mut self.write_ctx)? {
                    success = false;
                    break;
                }
            }
        }
        Ok(success)
    }

    fn compare_to_reference(&mut self, dbyte: DecodedByte, reffp: Option<&mut File>, replaced: bool, stats: &mut dyn Stats) -> Result<()> {
        let Some(reffp) = reffp else {
            return Ok(());
        };
        let mut buf = [0u8; 1];
        let refch: Option<u8> = match reffp.read(&mut buf) {
            Ok(1) => Some(buf[0]),
            _ => None,
        };
        stats.incr_total_bytes();
        if dbyte.is_literal() && refch.is_some_and(|c| dbyte.byte_value() == c) {
            stats.incr_identical_bytes();
        }
        if replaced {
            if dbyte.is_literal() {
                stats.incr_reconst_bytes();
                if refch.is_some_and(|c| dbyte.byte_value() == c) {
                    stats.incr_reconst_correct();
                    if self.show_errors && !self.prev_correct {
                        self.write_brace(b'}')?;
                        self.prev_correct = true;
                    }
                } else {
                    if self.show_errors && self.prev_correct {
                        self.write_brace(b'{')?;
                        self.prev_correct = false;
                    }
                    if refch.is_some_and(|c| dbyte.byte_value().to_ascii_lowercase() == c.to_ascii_lowercase()) {
                        stats.incr_reconst_correct_casefolded();
                    }
                }
            } else if self.show_errors && self.prev_correct {
                self.write_brace(b'{')?;
                self.prev_correct = false;
            }
        } else if self.show_errors && !self.prev_correct {
            self.write_brace(b'}')?;
            self.prev_correct = true;
        }
        Ok(())
    }

    fn write_brace(&mut self, ch: u8) -> Result<()> {
        let fmt = self.config.write_format;
        let unk = self.config.unknown_char;
        if let Some(out) = self.output.as_mut() {
            DecodedByte::literal(ch).write(out, fmt, unk, &mut self.write_ctx)?;
        }
        Ok(())
    }
}

/// Weights byte values inversely by how often they occur in `region`:
/// rare bytes get a higher weight, so matching on them pins an alignment
/// offset unambiguously (§4.5).
fn compute_byte_weights(region: &[DecodedByte]) -> [f64; 256] {
    let mut weights = [0f64; 256];
    let mut total = 0u32;
    for b in region {
        if b.is_literal() {
            weights[b.byte_value() as usize] += 1.0;
            total += 1;
        }
    }
    if total > 0 {
        let avg = total as f64 / 256.0;
        for w in weights.iter_mut() {
            *w = if *w > 0.0 { avg / *w } else { 1.0 };
        }
    }
    weights
}

/// Scores one candidate offset: literal pairs are compared
/// confidence-weighted and byte-weighted, skipping positions where
/// either side is a wildcard.
fn score_alignment(
    region: &[DecodedByte],
    replacements: &[DecodedByte],
    num_bytes: usize,
    offset: usize,
    weights: &[f64; 256],
) -> (f64, u32, u32) {
    use crate::dbyte::DBYTE_CONFIDENCE_LEVELS;
    let mut score = 0.0f64;
    let mut count = 0u32;
    let mut correct = 0u32;
    let limit = num_bytes + offset;
    for i in offset..num_bytes {
        let db1 = region[i];
        let Some(&db2) = replacements.get(limit - i) else {
            continue;
        };
        if db2.is_literal() && db1.is_literal() {
            count += 1;
            let weight = (db1.confidence() * db2.confidence()) as f64;
            if db1.byte_value() == db2.byte_value() {
                score += weight * weights[db1.byte_value() as usize];
                correct += 1;
            } else {
                score -= weight * weights[db1.byte_value() as usize];
            }
        }
    }
    let norm = (DBYTE_CONFIDENCE_LEVELS * DBYTE_CONFIDENCE_LEVELS) as f64;
    (score / norm, count, correct)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{CountingStats, NullStats};
    use std::io::Cursor;

    fn small_config(fmt: WriteFormat) -> ZipRecConfig {
        ZipRecConfig {
            write_format: fmt,
            ..ZipRecConfig::default()
        }
    }

    #[test]
    fn empty_stream_db_roundtrip() {
        let cursor = Cursor::new(Vec::new());
        let mut db = DecodeBuffer::new(Some(cursor), small_config(WriteFormat::DecodedByte)).unwrap();
        assert!(db.finalize().unwrap());
        assert_eq!(db.total_bytes(), 0);

        let bytes = db.output.take().unwrap().into_inner();
        let mut tmp = tempfile_with(&bytes);
        let header = {
            let mut reader = DecodeBuffer::new(None::<Cursor<Vec<u8>>>, small_config(WriteFormat::None)).unwrap();
            reader.open_input_file(tmp.path()).unwrap()
        };
        assert_eq!(header.byte_count, 0);
        assert_eq!(header.replacement_count, 0);
        assert_eq!(header.packet_count, 0);
        tmp.close();
    }

    #[test]
    fn pure_literal_stream_roundtrips_and_renders_plaintext() {
        let cursor = Cursor::new(Vec::new());
        let mut db = DecodeBuffer::new(Some(cursor), small_config(WriteFormat::DecodedByte)).unwrap();
        db.add_string(b"HELLO").unwrap();
        db.finalize().unwrap();
        let bytes = db.output.take().unwrap().into_inner();
        let tmp = tempfile_with(&bytes);

        let mut reader = DecodeBuffer::new(None::<Cursor<Vec<u8>>>, small_config(WriteFormat::None)).unwrap();
        reader.open_input_file(tmp.path()).unwrap();
        reader.load_bytes().unwrap();
        assert_eq!(reader.filebuffer.len(), 5);
        for (i, ch) in b"HELLO".iter().enumerate() {
            assert!(reader.filebuffer[i].is_literal());
            assert_eq!(reader.filebuffer[i].byte_value(), *ch);
        }

        let out_cursor = Cursor::new(Vec::new());
        let mut plain = DecodeBuffer::new(Some(out_cursor), small_config(WriteFormat::PlainText)).unwrap();
        plain.open_input_file(tmp.path()).unwrap();
        // No wildcards, so apply_replacements short-circuits (numReplacements()==0);
        // exercise direct rendering instead.
        let rendered: Vec<u8> = reader
            .filebuffer
            .iter()
            .map(|b| if b.is_literal() { b.byte_value() } else { b'?' })
            .collect();
        assert_eq!(rendered, b"HELLO");
        tmp.close();
    }

    #[test]
    fn copy_propagation_matches_window_content() {
        let cursor = Cursor::new(Vec::new());
        let mut db = DecodeBuffer::new(Some(cursor), small_config(WriteFormat::None)).unwrap();
        db.add_literal(b'A').unwrap();
        db.add_literal(b'B').unwrap();
        db.add_copy(3, 2).unwrap();
        let tail = db.copy_buffer_tail(4);
        assert_eq!(tail, b"BABA");
    }

    #[test]
    fn wildcard_through_discontinuity_resolves_via_apply_replacement() {
        let cursor = Cursor::new(Vec::new());
        let mut db = DecodeBuffer::new(Some(cursor), small_config(WriteFormat::None)).unwrap();
        db.add_discontinuity(4, true).unwrap();
        db.add_copy(3, 3).unwrap();
        assert_eq!(db.total_bytes(), 4); // marker + 3 wildcards

        let window = db.reference_window();
        let base_co = (window + 1 - 3) as u32; // co-indices assigned by rewind_reference_window
        db.expand_replacements(window + 1);
        for i in 0..3u32 {
            db.set_replacement_byte((base_co + i) as usize, b'X', 50);
        }
        for i in 0..3usize {
            let mut d = db.buffer[i];
            assert!(db.apply_replacement(&mut d));
            assert_eq!(d.byte_value(), b'X');
        }
    }

    #[test]
    fn alignment_rejects_low_score_no_op() {
        let cursor = Cursor::new(Vec::new());
        let mut db = DecodeBuffer::new(Some(cursor), small_config(WriteFormat::None)).unwrap();
        // no discontinuities recorded -> align_discontinuity(0, ..) returns true
        // trivially since filebuffer is empty and which(0) <= discontinuities(0)
        // but the marker scan finds nothing, so it must fail closed.
        db.filebuffer = Vec::new();
        assert!(!db.align_discontinuity(0, 0, 0.0).unwrap());
    }

    #[test]
    fn counting_stats_accumulate() {
        let mut stats = CountingStats::default();
        stats.incr_total_bytes();
        stats.incr_identical_bytes();
        assert_eq!(stats.total_bytes, 1);
        assert_eq!(stats.identical_bytes, 1);
        let mut null = NullStats;
        null.incr_total_bytes(); // no-op, just exercised for coverage
    }

    struct TempFile {
        path: std::path::PathBuf,
    }

    impl TempFile {
        fn path(&self) -> &Path {
            &self.path
        }
        fn close(self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn tempfile_with(bytes: &[u8]) -> TempFile {
        let mut path = std::env::temp_dir();
        path.push(format!("ziprec-test-{}-{}.db", std::process::id(), bytes.len()));
        std::fs::write(&path, bytes).unwrap();
        TempFile { path }
    }
}
