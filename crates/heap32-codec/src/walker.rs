use std::collections::{BTreeMap, HashSet};
use std::iter::FusedIterator;
use std::sync::Arc;

use heap32_format::{
    read_header, ByteOrder, Header, Immediate, ObjFlags, Ref, RefKind, TagScheme,
};
use tracing::{debug, trace, warn};

use crate::config::WalkConfig;
use crate::error::{DecodeError, NodeError, Result};
use crate::object::{decode_object, peek_class, symbol_hash, Decoded, Object, Shape};

/// What the referring field says about the object it points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    Any,
    /// Reached through a frame's map or a map's supermap.
    FrameMap,
}

/// One decoded object, in walk order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visit {
    pub offset: u32,
    pub header: Header,
    pub object: Object<Ref>,
}

/// Pick the layout for the object at `offset`.
///
/// The GC union is never consulted. Slotted objects are frames when flagged so,
/// frame maps when reached as one or when their class is an integer (the map flag
/// word), arrays otherwise. Byte objects are symbols when their class is the symbol
/// class, strings when their class is a symbol named `string` or `string.*`, and
/// binaries otherwise.
pub fn classify_shape(
    buf: &[u8],
    header: &Header,
    offset: usize,
    expect: Expect,
    order: ByteOrder,
    tags: &dyn TagScheme,
) -> Shape {
    let slotted = header.flags.contains(ObjFlags::SLOTTED);
    let hint = match peek_class(buf, header, offset, order) {
        None => ClassHint::Other,
        Some(class) if class == tags.symbol_class() => ClassHint::SymbolClass,
        Some(class) => match tags.classify(class) {
            Ok(RefKind::Immediate(Immediate::Int(_))) => ClassHint::Int,
            _ if !slotted && names_string_class(buf, class, order, tags) => ClassHint::StringSymbol,
            _ => ClassHint::Other,
        },
    };
    shape_for(header.flags, expect, hint)
}

/// The part of a class field that shape selection looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClassHint {
    Int,
    SymbolClass,
    /// Pointer to an unslotted symbol named `string` or `string.*`.
    StringSymbol,
    Other,
}

/// Shape selection rules shared by the walker and the encoder's shape check.
pub(crate) fn shape_for(flags: ObjFlags, expect: Expect, class: ClassHint) -> Shape {
    if flags.contains(ObjFlags::SLOTTED) {
        if flags.contains(ObjFlags::FRAME) {
            return Shape::Frame;
        }
        if expect == Expect::FrameMap || class == ClassHint::Int {
            return Shape::FrameMap;
        }
        return Shape::Array;
    }

    match class {
        ClassHint::SymbolClass => Shape::Symbol,
        ClassHint::StringSymbol => Shape::String,
        _ => Shape::Binary,
    }
}

/// Context a reference field of `shape` at `index` (in `refs()` order) gives its target.
pub(crate) fn field_expect(shape: Shape, index: usize) -> Expect {
    match (shape, index) {
        (Shape::Frame, 0) | (Shape::FrameMap, 1) => Expect::FrameMap,
        _ => Expect::Any,
    }
}

/// Whether a symbol name designates the string class or one of its subclasses.
pub fn is_string_class_name(name: &[u8]) -> bool {
    name.eq_ignore_ascii_case(b"string")
        || name
            .get(..7)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(b"string."))
}

fn names_string_class(buf: &[u8], class: Ref, order: ByteOrder, tags: &dyn TagScheme) -> bool {
    let Ok(RefKind::Pointer(target)) = tags.classify(class) else {
        return false;
    };
    let target = target as usize;
    let Ok(header) = read_header(buf, target, order) else {
        return false;
    };
    if header.flags.intersects(ObjFlags::SLOTTED | ObjFlags::FORWARD)
        || peek_class(buf, &header, target, order) != Some(tags.symbol_class())
    {
        return false;
    }
    match decode_object(buf, &header, target, Shape::Symbol, order) {
        Ok(Decoded::Object(Object::Symbol { name, .. })) => is_string_class_name(&name),
        _ => false,
    }
}

/// Depth-first walk of every object reachable from a root Ref.
///
/// Yields each object once, in pre-order; children are visited in field order
/// (class or map, supermap, then slots by index). Objects that fail to decode are
/// recorded in [`errors`](Self::errors) and skipped, unless they are the root or
/// the walk is strict, in which case the walk ends with that error.
///
/// Walking the same buffer from the same root always yields the same sequence.
pub struct HeapWalker<'a> {
    buf: &'a [u8],
    config: WalkConfig,
    root: Option<u32>,
    stack: Vec<(u32, Expect)>,
    visited: HashSet<u32>,
    decoded: usize,
    forwards: BTreeMap<u32, u32>,
    errors: Vec<NodeError>,
    pending: Option<DecodeError>,
    done: bool,
}

impl<'a> HeapWalker<'a> {
    /// Walk `buf` from `root` with default configuration.
    pub fn new(buf: &'a [u8], root: Ref) -> Self {
        Self::with_config(buf, root, WalkConfig::default())
    }

    /// Walk `buf` from `root` with explicit configuration.
    pub fn with_config(buf: &'a [u8], root: Ref, config: WalkConfig) -> Self {
        let mut walker = Self {
            buf,
            root: None,
            stack: Vec::new(),
            visited: HashSet::new(),
            decoded: 0,
            forwards: BTreeMap::new(),
            errors: Vec::new(),
            pending: None,
            done: false,
            config,
        };

        if buf.len() > walker.config.max_buffer_size {
            walker.pending = Some(DecodeError::BufferTooLarge {
                size: buf.len(),
                max: walker.config.max_buffer_size,
            });
            return walker;
        }

        match walker.config.tags.classify(root) {
            Ok(RefKind::Pointer(offset)) => {
                walker.root = Some(offset);
                walker.stack.push((offset, Expect::Any));
            }
            Ok(RefKind::Immediate(_)) => {
                debug!(root = %root, "root is an immediate; nothing to walk");
            }
            Err(err) => walker.pending = Some(err.into()),
        }
        walker
    }

    /// Offset of the root object, after following a forwarding header.
    pub fn root_offset(&self) -> Option<u32> {
        self.root
    }

    /// Per-object errors collected so far.
    pub fn errors(&self) -> &[NodeError] {
        &self.errors
    }

    /// Forwarded offsets seen so far, mapped to their targets.
    pub fn forwards(&self) -> &BTreeMap<u32, u32> {
        &self.forwards
    }

    pub fn config(&self) -> &WalkConfig {
        &self.config
    }

    /// Consume the walker, keeping the collected errors and forwarding table.
    pub fn into_parts(self) -> (Vec<NodeError>, BTreeMap<u32, u32>) {
        (self.errors, self.forwards)
    }

    fn step(&mut self, offset: u32, expect: Expect) -> Result<Option<Visit>> {
        let order = self.config.byte_order;
        let tags = Arc::clone(&self.config.tags);
        let start = offset as usize;

        let header = read_header(self.buf, start, order)?;
        let shape = classify_shape(self.buf, &header, start, expect, order, tags.as_ref());

        let object = match decode_object(self.buf, &header, start, shape, order)? {
            Decoded::Indirection(dest) => {
                let target = self.follow(offset, dest)?;
                trace!(offset, target, "following forwarding header");
                self.forwards.insert(offset, target);
                if self.root == Some(offset) {
                    self.root = Some(target);
                }
                if !self.visited.contains(&target) {
                    self.stack.push((target, expect));
                }
                return Ok(None);
            }
            Decoded::Object(object) => object,
        };

        if let Object::Symbol { hash, name, .. } = &object {
            let expected = symbol_hash(name);
            if *hash != expected {
                warn!(
                    offset,
                    stored = *hash,
                    expected,
                    name = %String::from_utf8_lossy(name),
                    "symbol hash mismatch"
                );
            }
        }

        let mut children = Vec::new();
        for (index, r) in object.refs().enumerate() {
            let expect = field_expect(shape, index);
            match tags.classify(*r) {
                Ok(RefKind::Pointer(target)) if !self.visited.contains(&target) => {
                    children.push((target, expect));
                }
                Ok(_) => {}
                Err(err) => self.report(offset, err.into()),
            }
        }
        self.stack.extend(children.into_iter().rev());

        debug!(offset, %shape, size = header.size, "decoded object");
        Ok(Some(Visit {
            offset,
            header,
            object,
        }))
    }

    /// Resolve a single forwarding hop.
    fn follow(&self, offset: u32, dest: Ref) -> Result<u32> {
        let corrupt = DecodeError::CorruptForwarding {
            offset,
            target: dest,
        };
        let Ok(RefKind::Pointer(target)) = self.config.tags.classify(dest) else {
            return Err(corrupt);
        };
        if target == offset {
            return Err(DecodeError::CyclicForwarding { offset });
        }
        let header =
            read_header(self.buf, target as usize, self.config.byte_order).map_err(|_| corrupt.clone())?;
        if header.is_forwarded() {
            let back = self.config.tags.classify(Ref(header.gc as i32));
            return Err(match back {
                Ok(RefKind::Pointer(next)) if next == offset => {
                    DecodeError::CyclicForwarding { offset }
                }
                _ => corrupt,
            });
        }
        Ok(target)
    }

    /// Record a problem found in an object that did decode.
    fn report(&mut self, offset: u32, error: DecodeError) {
        if self.config.strict {
            self.pending.get_or_insert(error);
        } else {
            warn!(offset, %error, "object has invalid field");
            self.errors.push(NodeError { offset, error });
        }
    }
}

impl Iterator for HeapWalker<'_> {
    type Item = Result<Visit>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some(err) = self.pending.take() {
                self.done = true;
                return Some(Err(err));
            }
            let Some((offset, expect)) = self.stack.pop() else {
                self.done = true;
                return None;
            };
            if !self.visited.insert(offset) {
                continue;
            }

            match self.step(offset, expect) {
                Ok(Some(visit)) => {
                    // Forwarding stubs and skipped objects do not count.
                    self.decoded += 1;
                    if self.decoded > self.config.max_objects {
                        self.done = true;
                        return Some(Err(DecodeError::TooManyObjects {
                            limit: self.config.max_objects,
                        }));
                    }
                    return Some(Ok(visit));
                }
                Ok(None) => continue,
                Err(error) if self.root == Some(offset) || self.config.strict => {
                    self.done = true;
                    return Some(Err(error));
                }
                Err(error) => {
                    warn!(offset, %error, "skipping undecodable object");
                    self.errors.push(NodeError { offset, error });
                }
            }
        }
    }
}

impl FusedIterator for HeapWalker<'_> {}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};
    use heap32_format::{put_header, FormatError, NewtonTags};

    use super::*;
    use crate::object::put_body;

    const TAGS: NewtonTags = NewtonTags { base: 0 };

    /// Lays objects out back to back on 8-byte boundaries.
    #[derive(Default)]
    struct HeapBuilder {
        buf: BytesMut,
    }

    impl HeapBuilder {
        fn next_offset(&self) -> u32 {
            ((self.buf.len() + 7) & !7) as u32
        }

        fn push(&mut self, object: Object<Ref>, flags: ObjFlags) -> Ref {
            let offset = self.next_offset();
            self.buf.resize(offset as usize, 0);
            let header = Header {
                size: object.encoded_size() as u32,
                flags,
                gc: 0,
            };
            put_header(&mut self.buf, &header, ByteOrder::Big);
            put_body(&mut self.buf, &object, ByteOrder::Big);
            TAGS.pointer(offset)
        }
    }

    fn walk(buf: &[u8], root: Ref) -> (Vec<Visit>, Vec<NodeError>) {
        let mut walker = HeapWalker::new(buf, root);
        let visits = walker.by_ref().collect::<Result<Vec<_>>>().unwrap();
        (visits, walker.into_parts().0)
    }

    #[test]
    fn self_referencing_array_terminates() {
        let mut heap = HeapBuilder::default();
        let me = TAGS.pointer(0);
        heap.push(
            Object::Array {
                class: Ref::NIL,
                slots: vec![me, Ref::int(1), me],
            },
            ObjFlags::SLOTTED,
        );

        let (visits, errors) = walk(&heap.buf, me);
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].offset, 0);
        assert!(errors.is_empty());
    }

    #[test]
    fn visits_depth_first_in_field_order() {
        let mut heap = HeapBuilder::default();
        // Reserve the root, then lay out its children and patch it afterwards.
        let root = heap.push(
            Object::Array {
                class: Ref::NIL,
                slots: vec![Ref::NIL, Ref::NIL],
            },
            ObjFlags::SLOTTED,
        );
        let class = heap.push(
            Object::Symbol {
                class: Ref::SYMBOL_CLASS,
                hash: symbol_hash(b"list"),
                name: b"list".to_vec(),
            },
            ObjFlags::empty(),
        );
        let inner = heap.push(
            Object::Binary {
                class,
                data: vec![1, 2, 3],
            },
            ObjFlags::empty(),
        );
        let leaf = heap.push(
            Object::Binary {
                class: Ref::NIL,
                data: vec![9],
            },
            ObjFlags::empty(),
        );
        let mut patched = BytesMut::new();
        put_body(
            &mut patched,
            &Object::Array {
                class,
                slots: vec![leaf, inner],
            },
            ByteOrder::Big,
        );
        heap.buf[8..20].copy_from_slice(&patched);

        let (visits, _) = walk(&heap.buf, root);
        let order: Vec<u32> = visits.iter().map(|v| v.offset).collect();
        let expected: Vec<u32> = [root, class, leaf, inner]
            .iter()
            .map(|r| r.bits() & !3)
            .collect();
        assert_eq!(order, expected);
        assert_eq!(visits[2].object.shape(), Shape::Binary);
    }

    #[test]
    fn frame_map_reached_through_frame() {
        let mut heap = HeapBuilder::default();
        let name = heap.push(
            Object::Symbol {
                class: Ref::SYMBOL_CLASS,
                hash: symbol_hash(b"x"),
                name: b"x".to_vec(),
            },
            ObjFlags::empty(),
        );
        // Class NIL, so only the frame's map field identifies it as a map.
        let map = heap.push(
            Object::FrameMap {
                class: Ref::NIL,
                supermap: Ref::NIL,
                slots: vec![name],
            },
            ObjFlags::SLOTTED,
        );
        let frame = heap.push(
            Object::Frame {
                map,
                slots: vec![Ref::int(42)],
            },
            ObjFlags::SLOTTED | ObjFlags::FRAME,
        );

        let (visits, errors) = walk(&heap.buf, frame);
        assert!(errors.is_empty());
        let shapes: Vec<Shape> = visits.iter().map(|v| v.object.shape()).collect();
        assert_eq!(shapes, vec![Shape::Frame, Shape::FrameMap, Shape::Symbol]);
    }

    #[test]
    fn string_class_is_detected() {
        let mut heap = HeapBuilder::default();
        let class = heap.push(
            Object::Symbol {
                class: Ref::SYMBOL_CLASS,
                hash: symbol_hash(b"string.note"),
                name: b"string.note".to_vec(),
            },
            ObjFlags::empty(),
        );
        let text = heap.push(
            Object::String {
                class,
                units: vec![0x68, 0x69, 0],
            },
            ObjFlags::empty(),
        );

        let (visits, _) = walk(&heap.buf, text);
        assert_eq!(
            visits[0].object,
            Object::String {
                class,
                units: vec![0x68, 0x69, 0]
            }
        );
    }

    #[test]
    fn forwarding_is_followed_once() {
        let mut heap = HeapBuilder::default();
        let stub = heap.push(
            Object::Binary {
                class: Ref::NIL,
                data: Vec::new(),
            },
            ObjFlags::FORWARD,
        );
        let real = heap.push(
            Object::Binary {
                class: Ref::NIL,
                data: vec![7],
            },
            ObjFlags::empty(),
        );
        heap.buf[4..8].copy_from_slice(&real.bits().to_be_bytes());

        let mut walker = HeapWalker::new(&heap.buf, stub);
        let visits = walker.by_ref().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].offset, 16);
        assert_eq!(walker.root_offset(), Some(16));
        assert_eq!(walker.forwards().get(&0), Some(&16));
    }

    #[test]
    fn forwarding_chains_are_corrupt() {
        let mut heap = HeapBuilder::default();
        let first = heap.push(
            Object::Binary {
                class: Ref::NIL,
                data: Vec::new(),
            },
            ObjFlags::FORWARD,
        );
        let second = heap.push(
            Object::Binary {
                class: Ref::NIL,
                data: Vec::new(),
            },
            ObjFlags::FORWARD,
        );
        let third = heap.push(
            Object::Binary {
                class: Ref::NIL,
                data: Vec::new(),
            },
            ObjFlags::empty(),
        );
        heap.buf[4..8].copy_from_slice(&second.bits().to_be_bytes());
        heap.buf[20..24].copy_from_slice(&third.bits().to_be_bytes());

        let result: Result<Vec<_>> = HeapWalker::new(&heap.buf, first).collect();
        assert_eq!(
            result,
            Err(DecodeError::CorruptForwarding {
                offset: 0,
                target: second
            })
        );
    }

    #[test]
    fn forwarding_to_self_is_cyclic() {
        let mut heap = HeapBuilder::default();
        let me = heap.push(
            Object::Binary {
                class: Ref::NIL,
                data: Vec::new(),
            },
            ObjFlags::FORWARD,
        );
        heap.buf[4..8].copy_from_slice(&me.bits().to_be_bytes());

        let result: Result<Vec<_>> = HeapWalker::new(&heap.buf, me).collect();
        assert_eq!(result, Err(DecodeError::CyclicForwarding { offset: 0 }));
    }

    #[test]
    fn bad_child_is_recorded_not_fatal() {
        let mut heap = HeapBuilder::default();
        // Points past the end of the buffer.
        heap.push(
            Object::Array {
                class: Ref::NIL,
                slots: vec![TAGS.pointer(0x400), Ref(0x1E)],
            },
            ObjFlags::SLOTTED,
        );

        let (visits, errors) = walk(&heap.buf, TAGS.pointer(0));
        assert_eq!(visits.len(), 1);
        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors[0],
            NodeError {
                offset: 0,
                error: DecodeError::Format(FormatError::InvalidRefTag(Ref(0x1E)))
            }
        );
        assert_eq!(errors[1].offset, 0x400);
        assert!(matches!(
            errors[1].error,
            DecodeError::Format(FormatError::TruncatedHeader { .. })
        ));
    }

    #[test]
    fn strict_walk_stops_at_first_error() {
        let mut heap = HeapBuilder::default();
        heap.push(
            Object::Array {
                class: Ref::NIL,
                slots: vec![TAGS.pointer(0x400)],
            },
            ObjFlags::SLOTTED,
        );

        let config = WalkConfig {
            strict: true,
            ..WalkConfig::default()
        };
        let mut walker = HeapWalker::with_config(&heap.buf, TAGS.pointer(0), config);
        assert!(walker.next().unwrap().is_ok());
        assert!(matches!(
            walker.next(),
            Some(Err(DecodeError::Format(FormatError::TruncatedHeader { .. })))
        ));
        assert!(walker.next().is_none());
    }

    #[test]
    fn truncated_root_is_fatal() {
        let buf = [0u8, 0, 12];
        let result: Result<Vec<_>> = HeapWalker::new(&buf, TAGS.pointer(0)).collect();
        assert!(matches!(
            result,
            Err(DecodeError::Format(FormatError::TruncatedHeader { .. }))
        ));
    }

    #[test]
    fn object_limit_is_enforced() {
        let mut heap = HeapBuilder::default();
        let leaf = heap.push(
            Object::Binary {
                class: Ref::NIL,
                data: Vec::new(),
            },
            ObjFlags::empty(),
        );
        let root = heap.push(
            Object::Array {
                class: Ref::NIL,
                slots: vec![leaf],
            },
            ObjFlags::SLOTTED,
        );
        let config = WalkConfig {
            max_objects: 1,
            ..WalkConfig::default()
        };
        let result: Result<Vec<_>> = HeapWalker::with_config(&heap.buf, root, config).collect();
        assert_eq!(result, Err(DecodeError::TooManyObjects { limit: 1 }));
    }

    #[test]
    fn object_limit_ignores_forwarding_stubs() {
        let mut heap = HeapBuilder::default();
        let stub = heap.push(
            Object::Binary {
                class: Ref::NIL,
                data: Vec::new(),
            },
            ObjFlags::FORWARD,
        );
        let real = heap.push(
            Object::Binary {
                class: Ref::NIL,
                data: vec![7],
            },
            ObjFlags::empty(),
        );
        heap.buf[4..8].copy_from_slice(&real.bits().to_be_bytes());

        let config = WalkConfig {
            max_objects: 1,
            ..WalkConfig::default()
        };
        let visits = HeapWalker::with_config(&heap.buf, stub, config)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].offset, 16);
    }

    #[test]
    fn object_limit_ignores_skipped_objects() {
        let mut heap = HeapBuilder::default();
        let root = heap.push(
            Object::Array {
                class: Ref::NIL,
                slots: vec![TAGS.pointer(0x400)],
            },
            ObjFlags::SLOTTED,
        );

        let config = WalkConfig {
            max_objects: 1,
            ..WalkConfig::default()
        };
        let mut walker = HeapWalker::with_config(&heap.buf, root, config);
        let visits = walker.by_ref().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(visits.len(), 1);
        assert_eq!(walker.errors().len(), 1);
    }

    #[test]
    fn walking_twice_is_identical() {
        let mut heap = HeapBuilder::default();
        let me = TAGS.pointer(0);
        heap.push(
            Object::Array {
                class: Ref::NIL,
                slots: vec![me, TAGS.pointer(0x200)],
            },
            ObjFlags::SLOTTED,
        );
        heap.buf.put_bytes(0, 4);

        let first = walk(&heap.buf, me);
        let second = walk(&heap.buf, me);
        assert_eq!(first, second);
    }

    #[test]
    fn string_class_names() {
        assert!(is_string_class_name(b"String"));
        assert!(is_string_class_name(b"string.rich"));
        assert!(!is_string_class_name(b"strings"));
        assert!(!is_string_class_name(b"str"));
    }
}
