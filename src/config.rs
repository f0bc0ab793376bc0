use crate::dbyte::WriteFormat;

/// Reference-window sizes selectable per §6.3. DEFLATE caps back-references
/// at 32 KiB; DEFLATE64 extends that to 64 KiB.
pub const REFERENCE_WINDOW_DEFLATE: u32 = 32 * 1024;
pub const REFERENCE_WINDOW_DEFLATE64: u32 = 64 * 1024;

/// Control parameters collected from §6.3, gathered into a single struct
/// instead of threading each one through every constructor.
#[derive(Debug, Clone)]
pub struct ZipRecConfig {
    pub write_format: WriteFormat,
    pub unknown_char: u8,
    pub deflate64: bool,
    pub test_mode: bool,
    pub friendly_filename: String,
    /// Whether history bytes written ahead of the recovered data (the
    /// `write_replacements` dump of a discontinuity's pre-corruption
    /// context) count towards the corrupted/unknown statistics, or are
    /// considered out-of-band context. Mirrors the original's
    /// process-wide `count_history_bytes` flag.
    pub count_history_bytes: bool,
    /// Bracket mismatches against a reference file with `{…}` in
    /// PlainText output during `apply_replacements`. Mirrors the
    /// original's `show_plaintext_errors` flag; only takes effect when
    /// `test_mode` is also set and a reference file is supplied.
    pub show_plaintext_errors: bool,
}

impl ZipRecConfig {
    pub fn reference_window(&self) -> u32 {
        if self.deflate64 {
            REFERENCE_WINDOW_DEFLATE64
        } else {
            REFERENCE_WINDOW_DEFLATE
        }
    }
}

impl Default for ZipRecConfig {
    fn default() -> Self {
        Self {
            write_format: WriteFormat::PlainText,
            unknown_char: b'?',
            deflate64: false,
            test_mode: false,
            friendly_filename: String::new(),
            count_history_bytes: false,
            show_plaintext_errors: false,
        }
    }
}
