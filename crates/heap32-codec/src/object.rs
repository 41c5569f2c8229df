//! Object shapes and the decoders for the bytes that follow a header.

use std::fmt;
use std::iter;

use bytes::BufMut;
use heap32_format::{ByteOrder, GcView, Header, Ref, HEADER_SIZE, REF_SIZE};

use crate::error::{DecodeError, Result};

/// Multiplier applied to the folded symbol name.
const HASH_MAGIC: u32 = 0x9E37_79B9;

/// Hash stored in symbol objects: the sum of the upper-cased name bytes times a constant.
pub fn symbol_hash(name: &[u8]) -> u32 {
    name.iter()
        .fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b.to_ascii_uppercase())))
        .wrapping_mul(HASH_MAGIC)
}

/// The six object layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize),
    serde(rename_all = "lowercase")
)]
pub enum Shape {
    Binary,
    Array,
    Frame,
    FrameMap,
    Symbol,
    String,
}

impl Shape {
    /// Header plus the fixed fields ahead of the trailing data.
    pub const fn prefix_size(self) -> usize {
        match self {
            Shape::Binary | Shape::Array | Shape::Frame | Shape::String => HEADER_SIZE + REF_SIZE,
            Shape::FrameMap | Shape::Symbol => HEADER_SIZE + 2 * REF_SIZE,
        }
    }

    /// Shapes whose trailing data is a sequence of Refs.
    pub const fn is_slotted(self) -> bool {
        matches!(self, Shape::Array | Shape::Frame | Shape::FrameMap)
    }

    /// How the GC union is read for this shape when the object is live.
    pub const fn gc_view(self) -> GcView {
        if self.is_slotted() {
            GcView::Count
        } else {
            GcView::Scratch
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Shape::Binary => "binary",
            Shape::Array => "array",
            Shape::Frame => "frame",
            Shape::FrameMap => "frame map",
            Shape::Symbol => "symbol",
            Shape::String => "string",
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A heap object, generic over how references are held.
///
/// Decoders produce `Object<Ref>` with raw Refs; a [`Graph`](crate::Graph) stores
/// `Object<Value>` with references resolved to arena ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object<R> {
    Binary {
        class: R,
        data: Vec<u8>,
    },
    Array {
        class: R,
        slots: Vec<R>,
    },
    Frame {
        map: R,
        slots: Vec<R>,
    },
    FrameMap {
        class: R,
        /// Map this one inherits slots from. Not owned.
        supermap: R,
        slots: Vec<R>,
    },
    Symbol {
        class: R,
        hash: u32,
        /// Name without the NUL terminator.
        name: Vec<u8>,
    },
    String {
        class: R,
        /// UTF-16 code units as stored, terminator included.
        units: Vec<u16>,
    },
}

impl<R> Object<R> {
    pub fn shape(&self) -> Shape {
        match self {
            Object::Binary { .. } => Shape::Binary,
            Object::Array { .. } => Shape::Array,
            Object::Frame { .. } => Shape::Frame,
            Object::FrameMap { .. } => Shape::FrameMap,
            Object::Symbol { .. } => Shape::Symbol,
            Object::String { .. } => Shape::String,
        }
    }

    /// Every reference field in declaration order: class (or map), supermap, then slots.
    pub fn refs(&self) -> impl DoubleEndedIterator<Item = &R> + '_ {
        let (head, supermap, slots): (&R, Option<&R>, &[R]) = match self {
            Object::Binary { class, .. }
            | Object::Symbol { class, .. }
            | Object::String { class, .. } => (class, None, &[] as &[R]),
            Object::Array { class, slots } => (class, None, slots.as_slice()),
            Object::Frame { map, slots } => (map, None, slots.as_slice()),
            Object::FrameMap {
                class,
                supermap,
                slots,
            } => (class, Some(supermap), slots.as_slice()),
        };
        iter::once(head).chain(supermap).chain(slots.iter())
    }

    /// The class Ref, or the map for frames.
    pub fn head(&self) -> &R {
        match self {
            Object::Binary { class, .. }
            | Object::Array { class, .. }
            | Object::FrameMap { class, .. }
            | Object::Symbol { class, .. }
            | Object::String { class, .. } => class,
            Object::Frame { map, .. } => map,
        }
    }

    /// Trailing Refs of slotted shapes; empty for byte shapes.
    pub fn slots(&self) -> &[R] {
        match self {
            Object::Array { slots, .. }
            | Object::Frame { slots, .. }
            | Object::FrameMap { slots, .. } => slots,
            _ => &[],
        }
    }

    /// Exact encoded size including the header.
    pub fn encoded_size(&self) -> usize {
        let shape = self.shape();
        let trailing = match self {
            Object::Binary { data, .. } => data.len(),
            Object::Array { slots, .. }
            | Object::Frame { slots, .. }
            | Object::FrameMap { slots, .. } => slots.len() * REF_SIZE,
            Object::Symbol { name, .. } => name.len() + 1,
            Object::String { units, .. } => units.len() * 2,
        };
        shape.prefix_size() + trailing
    }

    /// Convert every reference field, keeping the payload.
    pub fn try_map_refs<S, E>(
        self,
        mut f: impl FnMut(R) -> std::result::Result<S, E>,
    ) -> std::result::Result<Object<S>, E> {
        Ok(match self {
            Object::Binary { class, data } => Object::Binary {
                class: f(class)?,
                data,
            },
            Object::Array { class, slots } => Object::Array {
                class: f(class)?,
                slots: map_all(slots, &mut f)?,
            },
            Object::Frame { map, slots } => Object::Frame {
                map: f(map)?,
                slots: map_all(slots, &mut f)?,
            },
            Object::FrameMap {
                class,
                supermap,
                slots,
            } => Object::FrameMap {
                class: f(class)?,
                supermap: f(supermap)?,
                slots: map_all(slots, &mut f)?,
            },
            Object::Symbol { class, hash, name } => Object::Symbol {
                class: f(class)?,
                hash,
                name,
            },
            Object::String { class, units } => Object::String {
                class: f(class)?,
                units,
            },
        })
    }
}

fn map_all<R, S, E>(
    slots: Vec<R>,
    f: &mut impl FnMut(R) -> std::result::Result<S, E>,
) -> std::result::Result<Vec<S>, E> {
    slots.into_iter().map(f).collect()
}

/// Result of decoding the bytes at one header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Object(Object<Ref>),
    /// The object was relocated; follow this Ref (once).
    Indirection(Ref),
}

/// Decode the object whose `header` sits at `offset`, reading it as `shape`.
///
/// `header` must come from [`read_header`](heap32_format::read_header) on the same
/// buffer, which guarantees `offset + size` is in bounds.
pub fn decode_object(
    buf: &[u8],
    header: &Header,
    offset: usize,
    shape: Shape,
    order: ByteOrder,
) -> Result<Decoded> {
    if header.is_forwarded() {
        return Ok(Decoded::Indirection(Ref(header.gc as i32)));
    }

    let end = offset + header.size as usize;
    let body = &buf[offset + HEADER_SIZE..end];
    let corrupt = || DecodeError::CorruptLength {
        offset: offset as u32,
        shape,
        len: body.len(),
    };

    let fixed = shape.prefix_size() - HEADER_SIZE;
    if body.len() < fixed {
        return Err(corrupt());
    }
    let (fields, trailing) = body.split_at(fixed);
    let field = |i: usize| read_ref(&fields[i * REF_SIZE..], order);

    let object = match shape {
        Shape::Binary => Object::Binary {
            class: field(0),
            data: trailing.to_vec(),
        },
        Shape::Array => Object::Array {
            class: field(0),
            slots: read_refs(trailing, order).ok_or_else(corrupt)?,
        },
        Shape::Frame => Object::Frame {
            map: field(0),
            slots: read_refs(trailing, order).ok_or_else(corrupt)?,
        },
        Shape::FrameMap => Object::FrameMap {
            class: field(0),
            supermap: field(1),
            slots: read_refs(trailing, order).ok_or_else(corrupt)?,
        },
        Shape::Symbol => {
            let name_len = trailing
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(trailing.len());
            if trailing[name_len..].iter().any(|&b| b != 0) {
                return Err(corrupt());
            }
            Object::Symbol {
                class: field(0),
                hash: field(1).bits(),
                name: trailing[..name_len].to_vec(),
            }
        }
        Shape::String => {
            if trailing.len() % 2 != 0 {
                return Err(corrupt());
            }
            Object::String {
                class: field(0),
                units: trailing
                    .chunks_exact(2)
                    .map(|c| order.read_u16([c[0], c[1]]))
                    .collect(),
            }
        }
    };

    Ok(Decoded::Object(object))
}

/// Append the fields and trailing data of `object` (everything after the header).
pub fn put_body(dst: &mut impl BufMut, object: &Object<Ref>, order: ByteOrder) {
    match object {
        Object::Binary { class, data } => {
            put_ref(dst, class, order);
            dst.put_slice(data);
        }
        Object::Array { .. } | Object::Frame { .. } | Object::FrameMap { .. } => {
            for r in object.refs() {
                put_ref(dst, r, order);
            }
        }
        Object::Symbol { class, hash, name } => {
            put_ref(dst, class, order);
            order.put_u32(dst, *hash);
            dst.put_slice(name);
            dst.put_u8(0);
        }
        Object::String { class, units } => {
            put_ref(dst, class, order);
            for &unit in units {
                order.put_u16(dst, unit);
            }
        }
    }
}

/// Read the class Ref that follows a header, if the object is long enough to hold one.
pub(crate) fn peek_class(buf: &[u8], header: &Header, offset: usize, order: ByteOrder) -> Option<Ref> {
    if header.body_len() < REF_SIZE {
        return None;
    }
    Some(read_ref(&buf[offset + HEADER_SIZE..], order))
}

fn put_ref(dst: &mut impl BufMut, r: &Ref, order: ByteOrder) {
    order.put_u32(dst, r.bits());
}

fn read_ref(bytes: &[u8], order: ByteOrder) -> Ref {
    Ref(order.read_u32([bytes[0], bytes[1], bytes[2], bytes[3]]) as i32)
}

fn read_refs(bytes: &[u8], order: ByteOrder) -> Option<Vec<Ref>> {
    if bytes.len() % REF_SIZE != 0 {
        return None;
    }
    Some(bytes.chunks_exact(REF_SIZE).map(|c| read_ref(c, order)).collect())
}
