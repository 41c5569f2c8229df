//! Decode, inspect and re-encode legacy 32-bit object heaps.
//!
//! # Crate Structure
//!
//! - [`format`]: header words, byte orders and Ref tagging
//! - [`codec`]: shape decoders, the heap walker, the object graph and the encoder

/// Re-export format types.
pub mod format {
    pub use heap32_format::*;
}

/// Re-export codec types.
pub mod codec {
    pub use heap32_codec::*;
}
