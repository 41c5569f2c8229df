use std::sync::Arc;

use heap32_codec::{decode_heap, encode_heap, EncodeConfig};
use serde::Serialize;

use crate::cmd::{check_limits, RoundtripArgs};
use crate::exit::{decode_error, encode_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct RoundtripOutput {
    schema_id: &'static str,
    path: String,
    objects: usize,
    input_bytes: usize,
    output_bytes: usize,
    /// Re-encoded bytes equal the input.
    identical: bool,
    /// Decoding the re-encoded bytes yields the same graph.
    isomorphic: bool,
}

pub fn run(args: RoundtripArgs, format: OutputFormat) -> CliResult<i32> {
    check_limits(&args.heap)?;
    let config = args.heap.walk_config();
    let image = args.heap.read_image()?;
    let root = args.heap.root_ref(&config);

    let graph = decode_heap(&image, root, &config).map_err(|err| decode_error("decode failed", err))?;
    let encode_config = EncodeConfig {
        byte_order: config.byte_order,
        reset_locks: false,
        tags: Arc::clone(&config.tags),
    };
    let encoded =
        encode_heap(&graph, &encode_config).map_err(|err| encode_error("encode failed", err))?;

    let again = decode_heap(&encoded, config.tags.pointer(0), &config)
        .map_err(|err| decode_error("re-decode failed", err))?;
    let isomorphic = graph.is_isomorphic(&again);
    if !isomorphic {
        tracing::warn!("re-encoded heap decodes to a different graph");
    }

    let out = RoundtripOutput {
        schema_id: "https://schemas.heap32.dev/cli/v1/roundtrip.schema.json",
        path: args.heap.path.display().to_string(),
        objects: graph.len(),
        input_bytes: image.len(),
        output_bytes: encoded.len(),
        identical: encoded[..] == image[..],
        isomorphic,
    };

    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("Roundtrip {}:", out.path);
            println!("  Objects:    {}", out.objects);
            println!("  Input:      {} bytes", out.input_bytes);
            println!("  Output:     {} bytes", out.output_bytes);
            println!("  Identical:  {}", out.identical);
            println!("  Isomorphic: {}", out.isomorphic);
        }
    }

    Ok(if isomorphic { SUCCESS } else { FAILURE })
}
