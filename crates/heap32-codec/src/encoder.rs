use bytes::{Bytes, BytesMut};
use heap32_format::{
    align_up, put_header, Header, Immediate, ObjFlags, Ref, RefKind, TagScheme, MAX_OBJECT_SIZE,
};
use tracing::{debug, trace};

use crate::config::EncodeConfig;
use crate::error::{DecodeError, EncodeError};
use crate::graph::{Graph, Node, ObjectId, Value};
use crate::object::{put_body, Object};
use crate::walker::{field_expect, is_string_class_name, shape_for, ClassHint, Expect};

type Result<T> = std::result::Result<T, EncodeError>;

/// Encode every object reachable from the graph root.
///
/// Objects are laid out in the same depth-first order [`HeapWalker`](crate::HeapWalker)
/// visits them, starting at offset 0 with the root. Each start is aligned per the
/// node's `ALIGN_4` flag and gaps are zero-filled.
pub fn encode_heap(graph: &Graph, config: &EncodeConfig) -> Result<Bytes> {
    let mut dst = BytesMut::new();
    encode_heap_into(graph, config, &mut dst)?;
    Ok(dst.freeze())
}

/// Append the encoded heap to `dst`.
///
/// Offsets are relative to the first byte appended. On error `dst` is left untouched.
pub fn encode_heap_into(graph: &Graph, config: &EncodeConfig, dst: &mut BytesMut) -> Result<()> {
    let order = layout_order(graph)?;

    let mut offsets: Vec<Option<u32>> = vec![None; graph.len()];
    let mut cursor = 0usize;
    for &(id, expect) in &order {
        let node = graph.node(id).ok_or(EncodeError::InvalidObjectId(id))?;
        check_node(graph, id, expect, config.tags.as_ref())?;

        let size = node.object.encoded_size();
        if size > MAX_OBJECT_SIZE as usize {
            return Err(EncodeError::ObjectTooLarge { id, size });
        }
        let start = align_up(cursor, node.flags.alignment());
        cursor = start + size;
        if cursor > u32::MAX as usize {
            return Err(EncodeError::HeapTooLarge { size: cursor });
        }
        trace!(%id, offset = start, size, "placed object");
        offsets[id.index()] = Some(start as u32);
    }

    let tags = &config.tags;
    let pointer_to = |target: ObjectId| -> Option<Ref> {
        offsets
            .get(target.index())
            .copied()
            .flatten()
            .map(|offset| tags.pointer(offset))
    };

    let mut out = BytesMut::with_capacity(cursor);
    for &(id, _) in &order {
        let Some(node) = graph.node(id) else {
            return Err(EncodeError::InvalidObjectId(id));
        };
        let start = offsets[id.index()].unwrap_or_default() as usize;
        out.resize(start, 0);

        let gc = if config.reset_locks {
            node.gc.reset()
        } else {
            node.gc
        };
        let header = Header {
            size: node.object.encoded_size() as u32,
            flags: node.flags.difference(ObjFlags::FORWARD),
            gc: gc.raw(),
        };
        let object: Object<Ref> = node.object.clone().try_map_refs(|value| match value {
            Value::Immediate(r) => Ok(r),
            Value::Object(target) => pointer_to(target).ok_or(EncodeError::InvalidObjectId(target)),
            Value::Unresolved(target) => Err(EncodeError::UnresolvedReference { object: id, target }),
        })?;

        put_header(&mut out, &header, config.byte_order);
        put_body(&mut out, &object, config.byte_order);
    }

    debug!(
        objects = order.len(),
        bytes = out.len(),
        byte_order = ?config.byte_order,
        "encoded heap"
    );
    dst.extend_from_slice(&out);
    Ok(())
}

/// Depth-first pre-order from the root, children in field order.
///
/// Each id comes with the context of the field that first reached it, as the
/// walker will see it.
fn layout_order(graph: &Graph) -> Result<Vec<(ObjectId, Expect)>> {
    let Value::Object(root) = graph.root() else {
        return Err(EncodeError::NoRoot);
    };

    let mut seen = vec![false; graph.len()];
    let mut order = Vec::new();
    let mut stack = vec![(root, Expect::Any)];
    while let Some((id, expect)) = stack.pop() {
        let node = graph.node(id).ok_or(EncodeError::InvalidObjectId(id))?;
        if seen[id.index()] {
            continue;
        }
        seen[id.index()] = true;
        order.push((id, expect));

        let shape = node.shape();
        let mut children = Vec::new();
        for (index, value) in node.object.refs().enumerate() {
            match *value {
                Value::Object(target) => {
                    if graph.node(target).is_none() {
                        return Err(EncodeError::InvalidObjectId(target));
                    }
                    if !seen[target.index()] {
                        children.push((target, field_expect(shape, index)));
                    }
                }
                Value::Unresolved(target) => {
                    return Err(EncodeError::UnresolvedReference { object: id, target });
                }
                Value::Immediate(_) => {}
            }
        }
        stack.extend(children.into_iter().rev());
    }
    Ok(order)
}

/// Reject nodes that cannot be written faithfully.
fn check_node(graph: &Graph, id: ObjectId, expect: Expect, tags: &dyn TagScheme) -> Result<()> {
    let Some(node) = graph.node(id) else {
        return Err(EncodeError::InvalidObjectId(id));
    };
    match &node.object {
        Object::Symbol { name, .. } if name.contains(&0) => {
            return Err(EncodeError::InvalidSymbolName(id));
        }
        Object::FrameMap { .. } => {
            if let Err(DecodeError::CyclicSupermap { .. }) = graph.map_slot_names(id) {
                return Err(EncodeError::CyclicSupermap(id));
            }
        }
        _ => {}
    }

    let shape = node.shape();
    let decoded = shape_for(
        node.flags.difference(ObjFlags::FORWARD),
        expect,
        class_hint(graph, node.object.head(), tags),
    );
    if decoded != shape {
        return Err(EncodeError::AmbiguousShape { id, shape, decoded });
    }
    Ok(())
}

/// What the walker will make of `class` once it is written out.
fn class_hint(graph: &Graph, class: &Value, tags: &dyn TagScheme) -> ClassHint {
    match *class {
        Value::Immediate(r) if r == tags.symbol_class() => ClassHint::SymbolClass,
        Value::Immediate(r) => match tags.classify(r) {
            Ok(RefKind::Immediate(Immediate::Int(_))) => ClassHint::Int,
            _ => ClassHint::Other,
        },
        Value::Object(target) => match graph.node(target) {
            Some(Node {
                flags,
                object: Object::Symbol { class, name, .. },
                ..
            }) if !flags.contains(ObjFlags::SLOTTED)
                && matches!(class, Value::Immediate(r) if *r == tags.symbol_class())
                && is_string_class_name(name) =>
            {
                ClassHint::StringSymbol
            }
            _ => ClassHint::Other,
        },
        Value::Unresolved(_) => ClassHint::Other,
    }
}
