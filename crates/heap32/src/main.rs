mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "heap32", version, about = "Legacy 32-bit object heap tool")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::Endian;

    #[test]
    fn parses_inspect_subcommand() {
        let cli = Cli::try_parse_from([
            "heap32",
            "inspect",
            "/tmp/heap.bin",
            "--byte-order",
            "little",
            "--root",
            "0x40",
            "--strict",
        ])
        .expect("inspect args should parse");

        let Command::Inspect(args) = cli.command else {
            panic!("expected inspect");
        };
        assert_eq!(args.heap.byte_order, Endian::Little);
        assert_eq!(args.heap.root, 0x40);
        assert!(args.heap.strict);
    }

    #[test]
    fn rejects_bad_root_offset() {
        let err = Cli::try_parse_from(["heap32", "inspect", "/tmp/heap.bin", "--root", "0xzz"])
            .expect_err("bad number should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn scan_accepts_dump_base() {
        let cli = Cli::try_parse_from(["heap32", "scan", "/tmp/heap.bin", "--base", "0x1000"])
            .expect("scan args should parse");
        let Command::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(args.base, 0x1000);
        assert_eq!(args.walk_config().tags.pointer(0x10).bits(), 0x1011);
    }

    #[test]
    fn transcode_requires_target_order() {
        let err = Cli::try_parse_from(["heap32", "transcode", "/tmp/heap.bin"])
            .expect_err("missing --to should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let cli = Cli::try_parse_from([
            "heap32",
            "--format",
            "json",
            "transcode",
            "/tmp/heap.bin",
            "--to",
            "little",
            "--reset-locks",
            "-o",
            "/tmp/out.bin",
        ])
        .expect("transcode args should parse");
        assert!(matches!(cli.command, Command::Transcode(ref a) if a.reset_locks));
    }
}
