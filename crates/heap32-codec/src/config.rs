use std::sync::Arc;

use heap32_format::{ByteOrder, NewtonTags, TagScheme};

/// Default cap on the number of objects a single walk may decode.
pub const DEFAULT_MAX_OBJECTS: usize = 1 << 20;

/// Default cap on the heap buffer size: 64 MiB.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Configuration for decoding and walking a heap.
#[derive(Debug, Clone)]
pub struct WalkConfig {
    /// Byte order of the producer. Default: big-endian (device order).
    pub byte_order: ByteOrder,
    /// Abort on the first per-object error instead of collecting it.
    pub strict: bool,
    /// Maximum number of objects to decode. Default: 1Mi.
    pub max_objects: usize,
    /// Maximum accepted buffer length in bytes. Default: 64 MiB.
    pub max_buffer_size: usize,
    /// Pointer/immediate tag policy.
    pub tags: Arc<dyn TagScheme>,
}

impl WalkConfig {
    pub fn with_byte_order(byte_order: ByteOrder) -> Self {
        Self {
            byte_order,
            ..Self::default()
        }
    }
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            byte_order: ByteOrder::Big,
            strict: false,
            max_objects: DEFAULT_MAX_OBJECTS,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            tags: Arc::new(NewtonTags::default()),
        }
    }
}

/// Configuration for encoding a graph.
#[derive(Debug, Clone)]
pub struct EncodeConfig {
    /// Byte order to write. Default: big-endian (device order).
    pub byte_order: ByteOrder,
    /// Zero lock counts and scratch words, for heaps leaving the host session.
    pub reset_locks: bool,
    /// Pointer/immediate tag policy used to mint new pointer Refs.
    pub tags: Arc<dyn TagScheme>,
}

impl EncodeConfig {
    pub fn with_byte_order(byte_order: ByteOrder) -> Self {
        Self {
            byte_order,
            ..Self::default()
        }
    }
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            byte_order: ByteOrder::Big,
            reset_locks: false,
            tags: Arc::new(NewtonTags::default()),
        }
    }
}
