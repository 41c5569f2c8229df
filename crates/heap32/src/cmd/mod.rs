use clap::{Args, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use heap32_codec::format::{ByteOrder, NewtonTags, Ref};
use heap32_codec::{WalkConfig, DEFAULT_MAX_BUFFER_SIZE, DEFAULT_MAX_OBJECTS};

use crate::exit::{io_error, CliError, CliResult, LIMIT_EXCEEDED, USAGE};
use crate::output::OutputFormat;

pub mod inspect;
pub mod roundtrip;
pub mod scan;
pub mod transcode;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Walk the heap from its root and list every reachable object.
    Inspect(InspectArgs),
    /// List object headers laid end to end, without following references.
    Scan(ScanArgs),
    /// Decode, re-encode and compare against the input.
    Roundtrip(RoundtripArgs),
    /// Re-encode a heap in another byte order.
    Transcode(TranscodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Inspect(args) => inspect::run(args, format),
        Command::Scan(args) => scan::run(args, format),
        Command::Roundtrip(args) => roundtrip::run(args, format),
        Command::Transcode(args) => transcode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Endian {
    /// Device order.
    #[default]
    Big,
    Little,
}

impl From<Endian> for ByteOrder {
    fn from(endian: Endian) -> Self {
        match endian {
            Endian::Big => ByteOrder::Big,
            Endian::Little => ByteOrder::Little,
        }
    }
}

/// Input file and decoder settings shared by the heap commands.
#[derive(Args, Debug)]
pub struct HeapArgs {
    /// Heap image to read.
    pub path: PathBuf,
    /// Byte order of the image.
    #[arg(long, value_enum, default_value_t = Endian::Big)]
    pub byte_order: Endian,
    /// Offset of the root object (decimal or 0x-prefixed hex).
    #[arg(long, default_value = "0", value_parser = parse_u32)]
    pub root: u32,
    /// Address the image was dumped from; pointer Refs are relative to it.
    #[arg(long, default_value = "0", value_parser = parse_u32)]
    pub base: u32,
    /// Fail on the first malformed object instead of skipping it.
    #[arg(long)]
    pub strict: bool,
    /// Maximum number of objects to decode.
    #[arg(long, default_value_t = DEFAULT_MAX_OBJECTS)]
    pub max_objects: usize,
    /// Maximum accepted image size in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_BUFFER_SIZE)]
    pub max_size: usize,
}

impl HeapArgs {
    pub fn walk_config(&self) -> WalkConfig {
        WalkConfig {
            byte_order: self.byte_order.into(),
            strict: self.strict,
            max_objects: self.max_objects,
            max_buffer_size: self.max_size,
            tags: Arc::new(NewtonTags::with_base(self.base)),
        }
    }

    pub fn root_ref(&self, config: &WalkConfig) -> Ref {
        config.tags.pointer(self.root)
    }

    /// Read the image, refusing files larger than `--max-size`.
    pub fn read_image(&self) -> CliResult<Vec<u8>> {
        read_image(&self.path, self.max_size)
    }
}

pub fn read_image(path: &Path, max_size: usize) -> CliResult<Vec<u8>> {
    let context = format!("read {}", path.display());
    let len = std::fs::metadata(path)
        .map_err(|err| io_error(&context, err))?
        .len();
    if len > max_size as u64 {
        return Err(CliError::new(
            LIMIT_EXCEEDED,
            format!("{context}: {len} bytes exceeds --max-size {max_size}"),
        ));
    }
    std::fs::read(path).map_err(|err| io_error(&context, err))
}

fn parse_u32(value: &str) -> Result<u32, String> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|err| format!("invalid number '{value}': {err}"))
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    #[command(flatten)]
    pub heap: HeapArgs,
    /// Also list the named slots of every frame.
    #[arg(long)]
    pub slots: bool,
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Heap image to read.
    pub path: PathBuf,
    /// Byte order of the image.
    #[arg(long, value_enum, default_value_t = Endian::Big)]
    pub byte_order: Endian,
    /// Address the image was dumped from; pointer Refs are relative to it.
    #[arg(long, default_value = "0", value_parser = parse_u32)]
    pub base: u32,
    /// Maximum accepted image size in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_BUFFER_SIZE)]
    pub max_size: usize,
}

impl ScanArgs {
    pub fn walk_config(&self) -> WalkConfig {
        WalkConfig {
            byte_order: self.byte_order.into(),
            max_buffer_size: self.max_size,
            tags: Arc::new(NewtonTags::with_base(self.base)),
            ..WalkConfig::default()
        }
    }
}

#[derive(Args, Debug)]
pub struct RoundtripArgs {
    #[command(flatten)]
    pub heap: HeapArgs,
}

#[derive(Args, Debug)]
pub struct TranscodeArgs {
    #[command(flatten)]
    pub heap: HeapArgs,
    /// Byte order to write.
    #[arg(long, value_enum)]
    pub to: Endian,
    /// Zero lock counts and scratch words.
    #[arg(long)]
    pub reset_locks: bool,
    /// Output file. Without it the image goes to stdout.
    #[arg(long, short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Reject settings the decoder would otherwise only trip over later.
pub fn check_limits(args: &HeapArgs) -> CliResult<()> {
    if args.max_objects == 0 {
        return Err(CliError::new(USAGE, "--max-objects must be at least 1"));
    }
    Ok(())
}
