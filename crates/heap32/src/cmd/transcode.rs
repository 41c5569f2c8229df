use std::sync::Arc;

use heap32_codec::{decode_heap, encode_heap, EncodeConfig};
use serde::Serialize;

use crate::cmd::{check_limits, TranscodeArgs};
use crate::exit::{decode_error, encode_error, io_error, CliResult, SUCCESS};
use crate::output::{print_json, print_raw, OutputFormat};

#[derive(Serialize)]
struct TranscodeOutput {
    schema_id: &'static str,
    input: String,
    output: String,
    from: String,
    to: String,
    objects: usize,
    bytes: usize,
    reset_locks: bool,
}

pub fn run(args: TranscodeArgs, format: OutputFormat) -> CliResult<i32> {
    check_limits(&args.heap)?;
    let config = args.heap.walk_config();
    let image = args.heap.read_image()?;
    let root = args.heap.root_ref(&config);

    let graph = decode_heap(&image, root, &config).map_err(|err| decode_error("decode failed", err))?;
    let encode_config = EncodeConfig {
        byte_order: args.to.into(),
        reset_locks: args.reset_locks,
        tags: Arc::clone(&config.tags),
    };
    let encoded =
        encode_heap(&graph, &encode_config).map_err(|err| encode_error("encode failed", err))?;

    let Some(path) = &args.output else {
        print_raw(&encoded);
        return Ok(SUCCESS);
    };
    std::fs::write(path, &encoded)
        .map_err(|err| io_error(&format!("write {}", path.display()), err))?;
    tracing::info!(bytes = encoded.len(), path = %path.display(), "wrote heap");

    let out = TranscodeOutput {
        schema_id: "https://schemas.heap32.dev/cli/v1/transcode.schema.json",
        input: args.heap.path.display().to_string(),
        output: path.display().to_string(),
        from: format!("{:?}", config.byte_order).to_lowercase(),
        to: format!("{:?}", encode_config.byte_order).to_lowercase(),
        objects: graph.len(),
        bytes: encoded.len(),
        reset_locks: args.reset_locks,
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!(
                "{} -> {}: {} objects, {} bytes ({} -> {})",
                out.input, out.output, out.objects, out.bytes, out.from, out.to
            );
        }
        OutputFormat::Raw => {}
    }
    Ok(SUCCESS)
}
