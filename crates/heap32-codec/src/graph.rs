use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use heap32_format::{
    ByteOrder, FormatError, GcUnion, Immediate, NewtonTags, ObjFlags, Ref, RefKind, TagScheme,
};
use tracing::{debug, warn};

use crate::config::WalkConfig;
use crate::error::{DecodeError, NodeError, Result};
use crate::object::{symbol_hash, Object, Shape};
use crate::walker::HeapWalker;

/// Index of a node in a [`Graph`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize), serde(transparent))]
pub struct ObjectId(u32);

impl ObjectId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A reference field after decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize),
    serde(rename_all = "lowercase")
)]
pub enum Value {
    /// Immediate Ref, kept bit for bit.
    Immediate(Ref),
    /// Another node in the same graph.
    Object(ObjectId),
    /// Pointer Ref whose target could not be decoded.
    Unresolved(Ref),
}

impl Value {
    pub const NIL: Value = Value::Immediate(Ref::NIL);

    pub fn as_object(self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(id),
            _ => None,
        }
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::Object(id)
    }
}

impl Object<Value> {
    /// A symbol object with its hash computed from `name`.
    pub fn symbol(name: impl Into<Vec<u8>>) -> Self {
        let name = name.into();
        Object::Symbol {
            class: Value::Immediate(Ref::SYMBOL_CLASS),
            hash: symbol_hash(&name),
            name,
        }
    }
}

/// One object in the arena with the header state needed to re-encode it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Offset the object was decoded from; `None` for nodes built in memory.
    pub source_offset: Option<u32>,
    pub flags: ObjFlags,
    pub gc: GcUnion,
    pub object: Object<Value>,
}

impl Node {
    /// A fresh node: 8-byte aligned, flags implied by the shape, zero GC word.
    pub fn new(object: Object<Value>) -> Self {
        let shape = object.shape();
        let flags = match shape {
            Shape::Frame => ObjFlags::SLOTTED | ObjFlags::FRAME,
            Shape::Array | Shape::FrameMap => ObjFlags::SLOTTED,
            _ => ObjFlags::empty(),
        };
        let gc = GcUnion::from_raw(0, shape.gc_view());
        Self {
            source_offset: None,
            flags,
            gc,
            object,
        }
    }

    pub fn shape(&self) -> Shape {
        self.object.shape()
    }
}

/// Result of [`Graph::lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    Object(ObjectId, &'a Node),
    Immediate(Immediate),
    /// Pointer to an offset the walk never decoded.
    Missing(u32),
}

/// Arena of decoded heap objects.
///
/// Nodes refer to each other through [`Value::Object`] ids, so self references and
/// cycles are plain data. A decoded graph also remembers where each node came from,
/// which lets [`lookup`](Self::lookup) resolve Refs taken from the source buffer.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    by_offset: HashMap<u32, ObjectId>,
    forwards: BTreeMap<u32, u32>,
    root: Value,
    errors: Vec<NodeError>,
    byte_order: ByteOrder,
    tags: Arc<dyn TagScheme>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// An empty graph using the default tag scheme; the root is nil.
    pub fn new() -> Self {
        Self::with_tags(Arc::new(NewtonTags::default()))
    }

    pub fn with_tags(tags: Arc<dyn TagScheme>) -> Self {
        Self {
            nodes: Vec::new(),
            by_offset: HashMap::new(),
            forwards: BTreeMap::new(),
            root: Value::NIL,
            errors: Vec::new(),
            byte_order: ByteOrder::Big,
            tags,
        }
    }

    pub fn root(&self) -> Value {
        self.root
    }

    pub fn set_root(&mut self, root: impl Into<Value>) {
        self.root = root.into();
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: ObjectId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn node_mut(&mut self, id: ObjectId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index())
    }

    /// Nodes in arena order. For decoded graphs this is walk order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &Node)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (ObjectId(i as u32), node))
    }

    /// The node a value refers to, if any.
    pub fn deref(&self, value: Value) -> Option<&Node> {
        value.as_object().and_then(|id| self.node(id))
    }

    /// Per-object errors found while decoding.
    pub fn errors(&self) -> &[NodeError] {
        &self.errors
    }

    /// Byte order the graph was decoded from.
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn tags(&self) -> &Arc<dyn TagScheme> {
        &self.tags
    }

    /// Forwarded source offsets and where they pointed.
    pub fn forwards(&self) -> &BTreeMap<u32, u32> {
        &self.forwards
    }

    /// Node decoded from `offset`, following a forwarding hop.
    pub fn id_at(&self, offset: u32) -> Option<ObjectId> {
        let offset = self.forwards.get(&offset).copied().unwrap_or(offset);
        self.by_offset.get(&offset).copied()
    }

    /// Add an object with default header state.
    pub fn insert(&mut self, object: Object<Value>) -> ObjectId {
        self.insert_node(Node::new(object))
    }

    pub fn insert_node(&mut self, node: Node) -> ObjectId {
        let id = ObjectId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Swap in a new object for `id`, keeping its header state. Returns the old object.
    pub fn replace(&mut self, id: ObjectId, object: Object<Value>) -> Option<Object<Value>> {
        self.node_mut(id)
            .map(|node| std::mem::replace(&mut node.object, object))
    }

    /// Resolve a Ref from the source buffer.
    pub fn lookup(&self, r: Ref) -> std::result::Result<Lookup<'_>, FormatError> {
        Ok(match self.tags.classify(r)? {
            RefKind::Immediate(imm) => Lookup::Immediate(imm),
            RefKind::Pointer(offset) => match self.id_at(offset) {
                Some(id) => Lookup::Object(id, &self.nodes[id.index()]),
                None => Lookup::Missing(offset),
            },
        })
    }

    /// Name bytes of the symbol a value refers to.
    pub fn symbol_name(&self, value: Value) -> Option<&[u8]> {
        match &self.deref(value)?.object {
            Object::Symbol { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Slot names of a frame map, inherited ones first.
    pub fn map_slot_names(&self, map: ObjectId) -> Result<Vec<Value>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = map;
        loop {
            let offset = self.offset_of(current);
            if !seen.insert(current) {
                return Err(DecodeError::CyclicSupermap {
                    offset: self.offset_of(map),
                });
            }
            let Some(Object::FrameMap {
                supermap, slots, ..
            }) = self.node(current).map(|n| &n.object)
            else {
                return Err(DecodeError::UnresolvedMap {
                    offset,
                    map: self.value_ref(Value::Object(current)),
                });
            };
            chain.push(slots);
            match supermap {
                Value::Object(next) => current = *next,
                Value::Immediate(_) => break,
                Value::Unresolved(r) => {
                    return Err(DecodeError::UnresolvedMap { offset, map: *r });
                }
            }
        }
        Ok(chain.into_iter().rev().flatten().copied().collect())
    }

    /// Number of slots a map inherits through its supermap chain.
    pub fn inherited_slot_count(&self, map: ObjectId) -> Result<usize> {
        let own = self.node(map).map_or(0, |n| n.object.slots().len());
        Ok(self.map_slot_names(map)?.len() - own)
    }

    /// Pair each value of a frame with its slot name. Empty for non-frames.
    pub fn frame_slots(&self, frame: ObjectId) -> Result<Vec<(Value, Value)>> {
        let Some(Object::Frame { map, slots }) = self.node(frame).map(|n| &n.object) else {
            return Ok(Vec::new());
        };
        let map = self.frame_map(frame, *map)?;
        let names = self.map_slot_names(map)?;
        Ok(names.into_iter().zip(slots.iter().copied()).collect())
    }

    /// Structural equality up to node identity: same shapes, header state, payloads
    /// and immediates, and the same reference topology from the root.
    pub fn is_isomorphic(&self, other: &Graph) -> bool {
        let mut there: HashMap<ObjectId, ObjectId> = HashMap::new();
        let mut back: HashMap<ObjectId, ObjectId> = HashMap::new();
        let mut stack = vec![(self.root, other.root)];

        while let Some(pair) = stack.pop() {
            match pair {
                (Value::Immediate(a), Value::Immediate(b))
                | (Value::Unresolved(a), Value::Unresolved(b)) => {
                    if a != b {
                        return false;
                    }
                }
                (Value::Object(a), Value::Object(b)) => {
                    match (there.get(&a), back.get(&b)) {
                        (Some(&x), Some(&y)) if x == b && y == a => continue,
                        (None, None) => {}
                        _ => return false,
                    }
                    there.insert(a, b);
                    back.insert(b, a);
                    let (Some(na), Some(nb)) = (self.node(a), other.node(b)) else {
                        return false;
                    };
                    if !same_fields(na, nb) {
                        return false;
                    }
                    stack.extend(na.object.refs().copied().zip(nb.object.refs().copied()));
                }
                _ => return false,
            }
        }
        true
    }

    fn frame_map(&self, frame: ObjectId, map: Value) -> Result<ObjectId> {
        match map {
            Value::Object(id) if self.deref(map).map(Node::shape) == Some(Shape::FrameMap) => {
                Ok(id)
            }
            _ => Err(DecodeError::UnresolvedMap {
                offset: self.offset_of(frame),
                map: self.value_ref(map),
            }),
        }
    }

    fn offset_of(&self, id: ObjectId) -> u32 {
        self.node(id)
            .and_then(|n| n.source_offset)
            .unwrap_or_default()
    }

    /// Best-effort Ref for diagnostics.
    fn value_ref(&self, value: Value) -> Ref {
        match value {
            Value::Immediate(r) | Value::Unresolved(r) => r,
            Value::Object(id) => self.tags.pointer(self.offset_of(id)),
        }
    }

    /// Check every frame against its map.
    fn check_frames(&self) -> Vec<NodeError> {
        let mut errors = Vec::new();
        for (id, node) in self.iter() {
            let Object::Frame { map, slots } = &node.object else {
                continue;
            };
            let offset = self.offset_of(id);
            let expected = self
                .frame_map(id, *map)
                .and_then(|map| self.map_slot_names(map))
                .map(|names| names.len());
            match expected {
                Ok(expected) if expected != slots.len() => errors.push(NodeError {
                    offset,
                    error: DecodeError::SlotMismatch {
                        offset,
                        expected,
                        actual: slots.len(),
                    },
                }),
                Ok(_) => {}
                Err(error) => errors.push(NodeError { offset, error }),
            }
        }
        errors
    }
}

fn same_fields(a: &Node, b: &Node) -> bool {
    let live = |flags: ObjFlags| flags.difference(ObjFlags::FORWARD);
    if live(a.flags) != live(b.flags) || a.gc != b.gc || a.shape() != b.shape() {
        return false;
    }
    match (&a.object, &b.object) {
        (Object::Binary { data: x, .. }, Object::Binary { data: y, .. }) => x == y,
        (
            Object::Symbol {
                hash: hx, name: nx, ..
            },
            Object::Symbol {
                hash: hy, name: ny, ..
            },
        ) => hx == hy && nx == ny,
        (Object::String { units: x, .. }, Object::String { units: y, .. }) => x == y,
        (x, y) => x.slots().len() == y.slots().len(),
    }
}

/// Walk `buf` from `root` and collect every reachable object into a [`Graph`].
///
/// Fails only on fatal errors (undecodable root, limits exceeded) or, in strict
/// mode, on the first per-object error. Otherwise per-object errors, including
/// frames whose map is missing or disagrees with their slot count, are available
/// from [`Graph::errors`].
pub fn decode_heap(buf: &[u8], root: Ref, config: &WalkConfig) -> Result<Graph> {
    let mut walker = HeapWalker::with_config(buf, root, config.clone());
    let visits = walker.by_ref().collect::<Result<Vec<_>>>()?;
    let (errors, forwards) = walker.into_parts();

    let by_offset: HashMap<u32, ObjectId> = visits
        .iter()
        .enumerate()
        .map(|(i, visit)| (visit.offset, ObjectId(i as u32)))
        .collect();
    let tags = Arc::clone(&config.tags);
    let resolve = |r: Ref| match tags.classify(r) {
        Ok(RefKind::Pointer(offset)) => {
            let offset = forwards.get(&offset).copied().unwrap_or(offset);
            by_offset
                .get(&offset)
                .map_or(Value::Unresolved(r), |&id| Value::Object(id))
        }
        _ => Value::Immediate(r),
    };

    let mut nodes = Vec::with_capacity(visits.len());
    for visit in visits {
        let shape = visit.object.shape();
        let object = visit
            .object
            .try_map_refs(|r| Ok::<_, std::convert::Infallible>(resolve(r)))
            .unwrap_or_else(|never| match never {});
        nodes.push(Node {
            source_offset: Some(visit.offset),
            flags: visit.header.flags,
            gc: visit.header.gc(shape.gc_view()),
            object,
        });
    }
    let root = resolve(root);

    let mut graph = Graph {
        nodes,
        by_offset,
        forwards,
        root,
        errors,
        byte_order: config.byte_order,
        tags,
    };

    for error in graph.check_frames() {
        warn!(offset = error.offset, error = %error.error, "frame does not match its map");
        graph.errors.push(error);
    }
    if config.strict {
        if let Some(first) = graph.errors.first() {
            return Err(first.error.clone());
        }
    }

    debug!(
        objects = graph.len(),
        errors = graph.errors.len(),
        "decoded heap"
    );
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use heap32_format::{put_header, Header};

    use super::*;
    use crate::object::put_body;

    fn tags() -> NewtonTags {
        NewtonTags::default()
    }

    /// Writes `(flags, object)` pairs back to back on 8-byte boundaries.
    fn heap(objects: &[(ObjFlags, Object<Ref>)]) -> BytesMut {
        let mut buf = BytesMut::new();
        for (flags, object) in objects {
            buf.resize((buf.len() + 7) & !7, 0);
            let header = Header {
                size: object.encoded_size() as u32,
                flags: *flags,
                gc: 0,
            };
            put_header(&mut buf, &header, ByteOrder::Big);
            put_body(&mut buf, object, ByteOrder::Big);
        }
        buf
    }

    fn sym(name: &str) -> Object<Ref> {
        Object::Symbol {
            class: Ref::SYMBOL_CLASS,
            hash: symbol_hash(name.as_bytes()),
            name: name.as_bytes().to_vec(),
        }
    }

    /// Map at 0 (two own slots), symbols at 24 and 48, frame at 72.
    fn point_heap(supermap: Ref, values: Vec<Ref>) -> BytesMut {
        let t = tags();
        heap(&[
            (
                ObjFlags::SLOTTED,
                Object::FrameMap {
                    class: Ref::int(0),
                    supermap,
                    slots: vec![t.pointer(24), t.pointer(48)],
                },
            ),
            (ObjFlags::empty(), sym("x")),
            (ObjFlags::empty(), sym("y")),
            (
                ObjFlags::SLOTTED | ObjFlags::FRAME,
                Object::Frame {
                    map: t.pointer(0),
                    slots: values,
                },
            ),
        ])
    }

    const FRAME_AT: u32 = 72;

    #[test]
    fn frame_map_with_nil_supermap_has_two_own_slots() {
        let buf = point_heap(Ref::NIL, vec![Ref::int(3), Ref::int(4)]);
        let graph = decode_heap(&buf, tags().pointer(FRAME_AT), &WalkConfig::default()).unwrap();
        assert!(graph.errors().is_empty(), "{:?}", graph.errors());

        let map = graph.id_at(0).unwrap();
        let Some(Object::FrameMap { supermap, slots, .. }) = graph.node(map).map(|n| &n.object)
        else {
            panic!("expected frame map");
        };
        assert_eq!(*supermap, Value::NIL);
        assert_eq!(slots.len(), 2);
        assert_eq!(graph.inherited_slot_count(map).unwrap(), 0);

        let frame = graph.id_at(FRAME_AT).unwrap();
        let named: Vec<(&[u8], Value)> = graph
            .frame_slots(frame)
            .unwrap()
            .into_iter()
            .map(|(name, value)| (graph.symbol_name(name).unwrap(), value))
            .collect();
        assert_eq!(
            named,
            vec![
                (&b"x"[..], Value::Immediate(Ref::int(3))),
                (&b"y"[..], Value::Immediate(Ref::int(4)))
            ]
        );
    }

    #[test]
    fn slot_count_mismatch_is_reported() {
        let buf = point_heap(Ref::NIL, vec![Ref::int(3)]);
        let graph = decode_heap(&buf, tags().pointer(FRAME_AT), &WalkConfig::default()).unwrap();
        assert_eq!(
            graph.errors(),
            &[NodeError {
                offset: FRAME_AT,
                error: DecodeError::SlotMismatch {
                    offset: FRAME_AT,
                    expected: 2,
                    actual: 1
                }
            }]
        );
    }

    #[test]
    fn unresolved_map_is_kept_and_reported() {
        let buf = heap(&[(
            ObjFlags::SLOTTED | ObjFlags::FRAME,
            Object::Frame {
                map: tags().pointer(0x100),
                slots: vec![Ref::int(1)],
            },
        )]);
        let graph = decode_heap(&buf, tags().pointer(0), &WalkConfig::default()).unwrap();
        assert_eq!(graph.len(), 1);
        assert!(graph
            .errors()
            .iter()
            .any(|e| e.error == DecodeError::UnresolvedMap { offset: 0, map: Ref(0x101) }));

        let strict = WalkConfig {
            strict: true,
            ..WalkConfig::default()
        };
        assert!(decode_heap(&buf, tags().pointer(0), &strict).is_err());
    }

    #[test]
    fn cyclic_supermap_is_reported() {
        // The map names itself as its supermap.
        let buf = point_heap(tags().pointer(0), vec![Ref::int(3), Ref::int(4)]);
        let graph = decode_heap(&buf, tags().pointer(FRAME_AT), &WalkConfig::default()).unwrap();
        assert_eq!(
            graph.errors()[0].error,
            DecodeError::CyclicSupermap { offset: 0 }
        );
    }

    #[test]
    fn self_reference_becomes_self_edge() {
        let buf = heap(&[(
            ObjFlags::SLOTTED,
            Object::Array {
                class: Ref::NIL,
                slots: vec![tags().pointer(0)],
            },
        )]);
        let graph = decode_heap(&buf, tags().pointer(0), &WalkConfig::default()).unwrap();
        assert_eq!(graph.len(), 1);
        let id = graph.id_at(0).unwrap();
        assert_eq!(graph.root(), Value::Object(id));
        assert_eq!(
            graph.node(id).unwrap().object.slots(),
            &[Value::Object(id)]
        );
    }

    #[test]
    fn lookup_resolves_source_refs() {
        let buf = point_heap(Ref::NIL, vec![Ref::int(3), Ref::int(4)]);
        let graph = decode_heap(&buf, tags().pointer(FRAME_AT), &WalkConfig::default()).unwrap();

        assert!(matches!(
            graph.lookup(tags().pointer(24)).unwrap(),
            Lookup::Object(_, node) if node.shape() == Shape::Symbol
        ));
        assert_eq!(
            graph.lookup(Ref::char(0x41)).unwrap(),
            Lookup::Immediate(Immediate::Char(0x41))
        );
        assert_eq!(
            graph.lookup(tags().pointer(0x800)).unwrap(),
            Lookup::Missing(0x800)
        );
        assert!(graph.lookup(Ref(0x1E)).is_err());
    }

    #[test]
    fn decoding_is_idempotent() {
        let buf = point_heap(Ref::NIL, vec![Ref::int(3)]);
        let a = decode_heap(&buf, tags().pointer(FRAME_AT), &WalkConfig::default()).unwrap();
        let b = decode_heap(&buf, tags().pointer(FRAME_AT), &WalkConfig::default()).unwrap();
        let nodes_a: Vec<&Node> = a.iter().map(|(_, n)| n).collect();
        let nodes_b: Vec<&Node> = b.iter().map(|(_, n)| n).collect();
        assert_eq!(nodes_a, nodes_b);
        assert_eq!(a.errors(), b.errors());
        assert!(a.is_isomorphic(&b));
    }

    #[test]
    fn edit_api_builds_graphs() {
        let mut graph = Graph::new();
        let name = graph.insert(Object::symbol("size"));
        let map = graph.insert(Object::FrameMap {
            class: Value::Immediate(Ref::int(0)),
            supermap: Value::NIL,
            slots: vec![name.into()],
        });
        let frame = graph.insert(Object::Frame {
            map: map.into(),
            slots: vec![Value::Immediate(Ref::int(10))],
        });
        graph.set_root(frame);

        assert_eq!(graph.node(frame).unwrap().flags, ObjFlags::SLOTTED | ObjFlags::FRAME);
        assert_eq!(graph.frame_slots(frame).unwrap().len(), 1);

        let old = graph.replace(
            frame,
            Object::Frame {
                map: map.into(),
                slots: vec![Value::Immediate(Ref::int(11))],
            },
        );
        assert!(matches!(old, Some(Object::Frame { .. })));
        assert!(graph.check_frames().is_empty());
    }

    #[test]
    fn isomorphism_detects_topology_changes() {
        let mut a = Graph::new();
        let leaf = a.insert(Object::Binary {
            class: Value::NIL,
            data: vec![1],
        });
        let root = a.insert(Object::Array {
            class: Value::NIL,
            slots: vec![leaf.into(), leaf.into()],
        });
        a.set_root(root);

        let mut b = Graph::new();
        let first = b.insert(Object::Binary {
            class: Value::NIL,
            data: vec![1],
        });
        let second = b.insert(Object::Binary {
            class: Value::NIL,
            data: vec![1],
        });
        let root = b.insert(Object::Array {
            class: Value::NIL,
            slots: vec![first.into(), second.into()],
        });
        b.set_root(root);

        assert!(a.is_isomorphic(&a.clone()));
        assert!(!a.is_isomorphic(&b));
    }
}
