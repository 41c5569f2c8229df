use std::fmt;

use heap32_format::{FormatError, Ref};

use crate::graph::ObjectId;
use crate::object::Shape;

/// Errors raised while decoding objects or walking a heap.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Header or Ref level failure.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Trailing data is shorter than the shape's fixed fields or not a whole number of elements.
    #[error("corrupt {shape} length at offset {offset:#x} ({len} bytes after header)")]
    CorruptLength { offset: u32, shape: Shape, len: usize },

    /// A frame's map Ref does not lead to a frame map.
    #[error("frame at offset {offset:#x} has unresolved map {map}")]
    UnresolvedMap { offset: u32, map: Ref },

    /// A frame holds a different number of values than its map declares.
    #[error("frame at offset {offset:#x} has {actual} slots, map declares {expected}")]
    SlotMismatch {
        offset: u32,
        expected: usize,
        actual: usize,
    },

    /// A forwarding Ref is not a pointer, or leads to another forwarded object.
    #[error("object at offset {offset:#x} forwards to invalid target {target}")]
    CorruptForwarding { offset: u32, target: Ref },

    /// A forwarding Ref leads back to the forwarded object.
    #[error("object at offset {offset:#x} forwards to itself")]
    CyclicForwarding { offset: u32 },

    /// A frame map's supermap chain loops.
    #[error("supermap chain starting at offset {offset:#x} is cyclic")]
    CyclicSupermap { offset: u32 },

    /// The walk reached more objects than allowed.
    #[error("heap holds more than {limit} objects")]
    TooManyObjects { limit: usize },

    /// The input buffer exceeds the configured size limit.
    #[error("heap buffer too large ({size} bytes, max {max})")]
    BufferTooLarge { size: usize, max: usize },
}

/// A non-fatal decode error attached to the object it was found at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeError {
    pub offset: u32,
    pub error: DecodeError,
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}: {}", self.offset, self.error)
    }
}

/// Errors raised while encoding a graph. Encoding never yields partial output.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// The graph root is not an object.
    #[error("graph has no root object")]
    NoRoot,

    /// A value points at a Ref that never resolved to an object.
    #[error("object {object} references unresolved target {target}")]
    UnresolvedReference { object: ObjectId, target: Ref },

    /// A value names an id that is not in the arena.
    #[error("object id {0} is not in the graph")]
    InvalidObjectId(ObjectId),

    /// The object does not fit the 24-bit size field.
    #[error("object {id} needs {size} bytes, more than the size field holds")]
    ObjectTooLarge { id: ObjectId, size: usize },

    /// Offsets past 32 bits cannot be expressed as Refs.
    #[error("encoded heap would span {size} bytes")]
    HeapTooLarge { size: usize },

    /// A frame map's supermap chain loops.
    #[error("supermap chain of object {0} is cyclic")]
    CyclicSupermap(ObjectId),

    /// Symbol names are stored NUL-terminated and cannot contain NUL.
    #[error("symbol {0} has a NUL byte in its name")]
    InvalidSymbolName(ObjectId),

    /// The header flags and class would lead a reader to a different layout.
    #[error("object {id} is a {shape} but would decode as a {decoded}")]
    AmbiguousShape {
        id: ObjectId,
        shape: Shape,
        decoded: Shape,
    },
}

pub type Result<T> = std::result::Result<T, DecodeError>;
