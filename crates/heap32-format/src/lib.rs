//! Packed 32-bit object header layout for legacy NewtonScript object heaps.
//!
//! Every heap object starts with an 8-byte header:
//! - A size/flags word: 24-bit object size followed by 8 flag bits
//! - A GC union word: lock/slot counts, a scratch value, or a forwarding Ref
//!
//! Bit fields are packed and unpacked with explicit shifts, never through
//! native struct layout.

pub mod error;
pub mod header;
pub mod order;
pub mod tag;

pub use error::{FormatError, Result};
pub use header::{
    align_up, put_header, read_header, GcUnion, GcView, Header, ObjFlags, HEADER_SIZE,
    MAX_OBJECT_SIZE, REF_SIZE,
};
pub use order::{byte_swap_size, canonicalize, decanonicalize, ByteOrder};
pub use tag::{Immediate, NewtonTags, Ref, RefKind, TagScheme};
