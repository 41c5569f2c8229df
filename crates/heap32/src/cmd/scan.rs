use heap32_codec::{scan_headers, ScanEntry};
use serde::Serialize;

use crate::cmd::{read_image, ScanArgs};
use crate::exit::{decode_error, CliResult, SUCCESS};
use crate::output::{flags_label, print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct EntryOutput {
    offset: u32,
    size: u32,
    flags: String,
    shape: &'static str,
    forwarded: bool,
}

#[derive(Serialize)]
struct ScanOutput {
    schema_id: &'static str,
    path: String,
    entries: Vec<EntryOutput>,
    /// Bytes covered by the listed objects.
    covered: u64,
    error: Option<String>,
}

pub fn run(args: ScanArgs, format: OutputFormat) -> CliResult<i32> {
    let image = read_image(&args.path, args.max_size)?;
    let config = args.walk_config();

    let mut entries = Vec::new();
    let mut failure = None;
    for item in scan_headers(&image, &config) {
        match item {
            Ok(entry) => entries.push(entry_output(&entry)),
            Err(err) => failure = Some(err),
        }
    }

    let out = ScanOutput {
        schema_id: "https://schemas.heap32.dev/cli/v1/scan.schema.json",
        path: args.path.display().to_string(),
        covered: entries.iter().map(|e| u64::from(e.size)).sum(),
        entries,
        error: failure.as_ref().map(ToString::to_string),
    };
    print_scan(&out, format);

    match failure {
        Some(err) => Err(decode_error("scan stopped", err)),
        None => Ok(SUCCESS),
    }
}

fn entry_output(entry: &ScanEntry) -> EntryOutput {
    EntryOutput {
        offset: entry.offset,
        size: entry.header.size,
        flags: flags_label(entry.header.flags),
        shape: entry.shape.name(),
        forwarded: entry.header.is_forwarded(),
    }
}

fn print_scan(out: &ScanOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(out),
        OutputFormat::Table => {
            let rows = out
                .entries
                .iter()
                .map(|e| {
                    vec![
                        format!("{:#x}", e.offset),
                        e.size.to_string(),
                        e.flags.clone(),
                        if e.forwarded {
                            format!("{} (forwarded)", e.shape)
                        } else {
                            e.shape.to_string()
                        },
                    ]
                })
                .collect();
            print_table(vec!["OFFSET", "SIZE", "FLAGS", "SHAPE"], rows);
        }
        OutputFormat::Pretty => {
            for e in &out.entries {
                println!("{:#010x} {:>8} {:<8} {}", e.offset, e.size, e.shape, e.flags);
            }
            println!("{} objects, {} bytes", out.entries.len(), out.covered);
        }
    }
}
