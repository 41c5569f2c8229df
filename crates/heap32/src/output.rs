use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use heap32_codec::format::{GcUnion, Immediate, ObjFlags, RefKind};
use heap32_codec::{Graph, Object, Value};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_table(header: Vec<&str>, rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Flag names joined with `|`, unknown bits appended in hex.
pub fn flags_label(flags: ObjFlags) -> String {
    let mut parts: Vec<String> = flags.iter_names().map(|(name, _)| name.to_string()).collect();
    let unknown = flags.bits() & !ObjFlags::all().bits();
    if unknown != 0 {
        parts.push(format!("{unknown:#04x}"));
    }
    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join("|")
    }
}

pub fn gc_label(gc: GcUnion) -> String {
    match gc {
        GcUnion::Count { locks, slots } => format!("locks={locks} slots={slots}"),
        GcUnion::Scratch(value) => format!("scratch={value:#x}"),
        GcUnion::Forward(target) => format!("forward={target}"),
    }
}

pub fn immediate_label(imm: Immediate) -> String {
    match imm {
        Immediate::Int(value) => value.to_string(),
        Immediate::Char(unit) => match char::from_u32(unit.into()) {
            Some(c) if !c.is_control() => format!("${c}"),
            _ => format!("$\\u{unit:04X}"),
        },
        Immediate::Nil => "nil".to_string(),
        Immediate::True => "true".to_string(),
        Immediate::Special(bits) => format!("special {bits:#x}"),
        Immediate::Magic(index) => format!("@{index}"),
    }
}

/// Short rendering of a slot value: immediates in source syntax, symbols quoted,
/// strings in double quotes, other objects by id.
pub fn value_label(graph: &Graph, value: Value) -> String {
    match value {
        Value::Immediate(r) => match graph.tags().classify(r) {
            Ok(RefKind::Immediate(imm)) => immediate_label(imm),
            _ => r.to_string(),
        },
        Value::Unresolved(r) => format!("<unresolved {r}>"),
        Value::Object(id) => match graph.node(id).map(|n| &n.object) {
            Some(Object::Symbol { name, .. }) => format!("'{}", String::from_utf8_lossy(name)),
            Some(Object::String { units, .. }) => format!("{:?}", string_text(units)),
            Some(node) => format!("{id} <{}>", node.shape()),
            None => format!("{id} <missing>"),
        },
    }
}

/// UTF-16 payload up to the terminator.
pub fn string_text(units: &[u16]) -> String {
    let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
    String::from_utf16_lossy(&units[..end])
}

#[cfg(test)]
mod tests {
    use heap32_codec::format::Ref;

    use super::*;

    #[test]
    fn labels_flags() {
        assert_eq!(flags_label(ObjFlags::empty()), "-");
        assert_eq!(
            flags_label(ObjFlags::SLOTTED | ObjFlags::FRAME),
            "SLOTTED|FRAME"
        );
    }

    #[test]
    fn labels_values() {
        let mut graph = Graph::new();
        let sym = graph.insert(Object::symbol("width"));
        let text = graph.insert(Object::String {
            class: Value::NIL,
            units: "hi\0".encode_utf16().collect(),
        });

        assert_eq!(value_label(&graph, Value::Immediate(Ref::int(-3))), "-3");
        assert_eq!(value_label(&graph, Value::Immediate(Ref::char(0x41))), "$A");
        assert_eq!(value_label(&graph, Value::NIL), "nil");
        assert_eq!(value_label(&graph, sym.into()), "'width");
        assert_eq!(value_label(&graph, text.into()), "\"hi\"");
    }
}
