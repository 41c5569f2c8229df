use heap32_codec::{decode_heap, Graph, Node, Object, ObjectId, Value};
use serde::Serialize;

use crate::cmd::{check_limits, InspectArgs};
use crate::exit::{decode_error, CliResult, SUCCESS};
use crate::output::{
    flags_label, gc_label, print_json, print_table, string_text, value_label, OutputFormat,
};

#[derive(Serialize)]
struct SlotOutput {
    name: String,
    value: String,
}

#[derive(Serialize)]
struct NodeOutput {
    id: u32,
    offset: Option<u32>,
    shape: &'static str,
    size: usize,
    flags: String,
    gc: String,
    summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    slots: Option<Vec<SlotOutput>>,
}

#[derive(Serialize)]
struct ErrorOutput {
    offset: u32,
    error: String,
}

#[derive(Serialize)]
struct InspectOutput {
    schema_id: &'static str,
    path: String,
    byte_order: String,
    root: String,
    objects: usize,
    forwarded: usize,
    nodes: Vec<NodeOutput>,
    errors: Vec<ErrorOutput>,
}

pub fn run(args: InspectArgs, format: OutputFormat) -> CliResult<i32> {
    check_limits(&args.heap)?;
    let config = args.heap.walk_config();
    let image = args.heap.read_image()?;
    let root = args.heap.root_ref(&config);

    let graph = decode_heap(&image, root, &config).map_err(|err| decode_error("decode failed", err))?;
    for err in graph.errors() {
        tracing::warn!(offset = err.offset, error = %err.error, "skipped object");
    }
    tracing::info!(
        objects = graph.len(),
        errors = graph.errors().len(),
        "decoded heap"
    );

    let nodes = graph
        .iter()
        .map(|(id, node)| node_output(&graph, id, node, args.slots))
        .collect();
    let out = InspectOutput {
        schema_id: "https://schemas.heap32.dev/cli/v1/inspect.schema.json",
        path: args.heap.path.display().to_string(),
        byte_order: format!("{:?}", config.byte_order).to_lowercase(),
        root: value_label(&graph, graph.root()),
        objects: graph.len(),
        forwarded: graph.forwards().len(),
        nodes,
        errors: graph
            .errors()
            .iter()
            .map(|err| ErrorOutput {
                offset: err.offset,
                error: err.error.to_string(),
            })
            .collect(),
    };

    print_inspect(&out, format);
    Ok(SUCCESS)
}

fn node_output(graph: &Graph, id: ObjectId, node: &Node, with_slots: bool) -> NodeOutput {
    let slots = match (&node.object, with_slots) {
        (Object::Frame { .. }, true) => Some(match graph.frame_slots(id) {
            Ok(pairs) => pairs
                .into_iter()
                .map(|(name, value)| SlotOutput {
                    name: value_label(graph, name),
                    value: value_label(graph, value),
                })
                .collect(),
            Err(err) => {
                tracing::debug!(%id, error = %err, "frame slots unavailable");
                Vec::new()
            }
        }),
        _ => None,
    };

    NodeOutput {
        id: id.index() as u32,
        offset: node.source_offset,
        shape: node.shape().name(),
        size: node.object.encoded_size(),
        flags: flags_label(node.flags),
        gc: gc_label(node.gc),
        summary: summary(graph, id, &node.object),
        slots,
    }
}

fn summary(graph: &Graph, id: ObjectId, object: &Object<Value>) -> String {
    match object {
        Object::Binary { class, data } => {
            format!("{} bytes, class {}", data.len(), value_label(graph, *class))
        }
        Object::Array { class, slots } => {
            format!("{} slots, class {}", slots.len(), value_label(graph, *class))
        }
        Object::Frame { map, slots } => {
            format!("{} slots, map {}", slots.len(), value_label(graph, *map))
        }
        Object::FrameMap { slots, .. } => match graph.inherited_slot_count(id) {
            Ok(0) | Err(_) => format!("{} slots", slots.len()),
            Ok(inherited) => format!("{} slots, {inherited} inherited", slots.len()),
        },
        Object::Symbol { name, .. } => format!("'{}", String::from_utf8_lossy(name)),
        Object::String { units, .. } => format!("{:?}", string_text(units)),
    }
}

fn print_inspect(out: &InspectOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(out),
        OutputFormat::Table => {
            let rows = out
                .nodes
                .iter()
                .map(|n| {
                    vec![
                        format!("#{}", n.id),
                        n.offset.map_or("-".to_string(), |o| format!("{o:#x}")),
                        n.shape.to_string(),
                        n.size.to_string(),
                        n.flags.clone(),
                        n.gc.clone(),
                        n.summary.clone(),
                    ]
                })
                .collect();
            print_table(
                vec!["ID", "OFFSET", "SHAPE", "SIZE", "FLAGS", "GC", "SUMMARY"],
                rows,
            );
            print_errors(&out.errors);
        }
        OutputFormat::Pretty => {
            println!("Heap {} ({}):", out.path, out.byte_order);
            println!("  Root:      {}", out.root);
            println!("  Objects:   {}", out.objects);
            println!("  Forwarded: {}", out.forwarded);
            for n in &out.nodes {
                let offset = n.offset.map_or("-".to_string(), |o| format!("{o:#x}"));
                println!("  #{} @ {offset} {} {}", n.id, n.shape, n.summary);
                for slot in n.slots.iter().flatten() {
                    println!("      {}: {}", slot.name, slot.value);
                }
            }
            print_errors(&out.errors);
        }
    }
}

fn print_errors(errors: &[ErrorOutput]) {
    if errors.is_empty() {
        return;
    }
    println!("Errors:");
    for err in errors {
        println!("  {:#x}: {}", err.offset, err.error);
    }
}
