use std::fs::File;
use std::io::{self, BufWriter, Cursor, Seek, SeekFrom, Write};
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use ziprec::config::ZipRecConfig;
use ziprec::dbyte::WriteFormat;
use ziprec::decode_buffer::DecodeBuffer;
use ziprec::stats::{CountingStats, NullStats, Stats};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Plaintext,
    Html,
    Listing,
    Decodedbyte,
    None,
}

impl From<OutputFormat> for WriteFormat {
    fn from(f: OutputFormat) -> Self {
        match f {
            OutputFormat::Plaintext => WriteFormat::PlainText,
            OutputFormat::Html => WriteFormat::Html,
            OutputFormat::Listing => WriteFormat::Listing,
            OutputFormat::Decodedbyte => WriteFormat::DecodedByte,
            OutputFormat::None => WriteFormat::None,
        }
    }
}

/// The two sinks a recovery run can write to. `DecodeBuffer` needs
/// `Write + Seek` (the DB format patches its header after streaming the
/// body), which stdout itself doesn't provide — so a plain stdout run
/// buffers in memory and is flushed out after `finalize()`.
enum Sink {
    File(BufWriter<File>),
    Memory(Cursor<Vec<u8>>),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::File(f) => f.write(buf),
            Sink::Memory(c) => c.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::File(f) => f.flush(),
            Sink::Memory(c) => c.flush(),
        }
    }
}

impl Seek for Sink {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Sink::File(f) => f.seek(pos),
            Sink::Memory(c) => c.seek(pos),
        }
    }
}

/// Replays a recovered-stream DB container, resolving wildcards against
/// its replacement table and optionally aligning discontinuities before
/// writing the result out in one of several formats.
#[derive(Parser)]
#[command(name = "ziprecd", version, about)]
struct Args {
    /// DB container produced by a prior recovery pass.
    input: PathBuf,

    /// Destination file; defaults to stdout.
    output: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value = "plaintext")]
    format: OutputFormat,

    /// Character substituted for any byte that's still a wildcard.
    #[arg(short, long, default_value_t = b'?')]
    unknown_char: u8,

    /// Run discontinuity alignment before replaying, inferring literals
    /// across corruption boundaries where the surrounding context lines up.
    #[arg(short, long)]
    align: bool,

    /// Reference plaintext to compare the recovered output against;
    /// implies test mode and enables accuracy statistics.
    #[arg(short, long)]
    reference: Option<PathBuf>,

    /// Bracket mismatches against the reference with `{...}` (PlainText
    /// format only, requires --reference).
    #[arg(long)]
    show_errors: bool,

    /// Print summary statistics to stderr after replay.
    #[arg(short, long)]
    stats: bool,
}

fn main() -> ziprec::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = ZipRecConfig {
        write_format: args.format.into(),
        unknown_char: args.unknown_char,
        test_mode: args.reference.is_some(),
        show_plaintext_errors: args.show_errors,
        friendly_filename: args
            .input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        ..ZipRecConfig::default()
    };

    let to_stdout = args.output.is_none();
    let sink = match &args.output {
        Some(path) => Sink::File(BufWriter::new(File::create(path)?)),
        None => Sink::Memory(Cursor::new(Vec::new())),
    };

    let mut buffer = DecodeBuffer::new(Some(sink), config)?;
    let header = buffer.open_input_file(&args.input)?;
    log::info!(
        "opened {}: {} bytes, {} discontinuities, {} replacements",
        args.input.display(),
        header.byte_count,
        header.discontinuity_count,
        header.replacement_count
    );

    if args.align {
        buffer.load_bytes()?;
        if !buffer.align_discontinuities()? {
            log::warn!("discontinuity alignment did not find a confident offset for every gap");
        }
        buffer.clear_loaded_bytes();
    }

    let mut counting = CountingStats::default();
    let mut null = NullStats;
    let stats: &mut dyn Stats = if args.stats { &mut counting } else { &mut null };

    let replayed = buffer.apply_replacements(args.reference.as_deref(), true, stats)?;
    if !replayed {
        log::warn!("replay stopped early or produced no output (no replacement table present?)");
    }
    buffer.finalize()?;

    if to_stdout {
        if let Some(Sink::Memory(cursor)) = buffer.into_output() {
            io::stdout().write_all(&cursor.into_inner())?;
        }
    }

    if args.stats {
        eprintln!(
            "total={} identical={} unknown={} corrupted={} replaced={} reconst={} correct={} correct_casefolded={} unaltered={}",
            counting.total_bytes,
            counting.identical_bytes,
            counting.unknown_bytes,
            counting.corrupted_bytes,
            counting.bytes_replaced,
            counting.reconst_bytes,
            counting.reconst_correct,
            counting.reconst_correct_casefolded,
            counting.reconst_unaltered,
        );
    }

    Ok(())
}
