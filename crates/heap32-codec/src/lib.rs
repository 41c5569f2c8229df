//! Decode, traverse and re-encode legacy 32-bit object heaps.
//!
//! A heap buffer is decoded by walking from a root Ref. Every reachable object
//! lands once in a [`Graph`] arena; Refs between objects become [`Value`]s that
//! index the arena, so cyclic heaps need no special ownership handling.
//! [`encode_heap`] lays the graph back out as packed bytes.
//!
//! ```text
//! bytes ─▶ read_header ─▶ classify ─▶ decode_object ─▶ HeapWalker ─▶ Graph
//! Graph ─▶ layout ─▶ put_header + put_body ─▶ bytes
//! ```

pub mod config;
pub mod encoder;
pub mod error;
pub mod graph;
pub mod object;
pub mod scan;
pub mod walker;

pub use config::{EncodeConfig, WalkConfig, DEFAULT_MAX_BUFFER_SIZE, DEFAULT_MAX_OBJECTS};
pub use encoder::{encode_heap, encode_heap_into};
pub use error::{DecodeError, EncodeError, NodeError, Result};
pub use graph::{decode_heap, Graph, Lookup, Node, ObjectId, Value};
pub use object::{decode_object, put_body, symbol_hash, Decoded, Object, Shape};
pub use scan::{scan_headers, ScanEntry, ScanIter};
pub use walker::{classify_shape, is_string_class_name, Expect, HeapWalker, Visit};

pub use heap32_format as format;
