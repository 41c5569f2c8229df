use bitflags::bitflags;
use bytes::BufMut;

use crate::error::{FormatError, Result};
use crate::order::{canonicalize, decanonicalize, ByteOrder};
use crate::tag::Ref;

/// Object header: size/flags word (4) + GC union word (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Width of a Ref slot.
pub const REF_SIZE: usize = 4;

/// Largest size the 24-bit size field can hold.
pub const MAX_OBJECT_SIZE: u32 = 0x00FF_FFFF;

bitflags! {
    /// Flag byte of the size/flags word.
    ///
    /// Unknown bits are retained so they survive a round trip.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct ObjFlags: u8 {
        /// Object starts on a 4-byte boundary. When clear the boundary is 8 bytes.
        const ALIGN_4 = 1 << 0;
        /// Trailing data is a sequence of Refs.
        const SLOTTED = 1 << 1;
        /// Slotted object whose first Ref is a frame map.
        const FRAME = 1 << 2;
        const MARKED = 1 << 3;
        const LOCKED = 1 << 4;
        /// The GC union holds a forwarding Ref.
        const FORWARD = 1 << 5;
        const READ_ONLY = 1 << 6;
        const DIRTY = 1 << 7;
    }
}

impl ObjFlags {
    /// Required alignment of the object start.
    pub const fn alignment(self) -> usize {
        if self.contains(ObjFlags::ALIGN_4) {
            4
        } else {
            8
        }
    }
}

/// Round `offset` up to the next multiple of `alignment` (a power of two).
pub const fn align_up(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}

/// Which interpretation of the GC union the caller expects.
///
/// The word carries no tag of its own; the choice comes from context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcView {
    Count,
    Scratch,
    Forward,
}

/// The second header word, resolved to one interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GcUnion {
    /// External lock count and slot count.
    Count { locks: u8, slots: u32 },
    /// Opaque scratch value.
    Scratch(i32),
    /// The object was relocated; this is where it lives now.
    Forward(Ref),
}

impl GcUnion {
    pub const fn from_raw(raw: u32, view: GcView) -> Self {
        match view {
            GcView::Count => GcUnion::Count {
                locks: (raw >> 24) as u8,
                slots: raw & 0x00FF_FFFF,
            },
            GcView::Scratch => GcUnion::Scratch(raw as i32),
            GcView::Forward => GcUnion::Forward(Ref(raw as i32)),
        }
    }

    pub const fn raw(self) -> u32 {
        match self {
            GcUnion::Count { locks, slots } => ((locks as u32) << 24) | (slots & 0x00FF_FFFF),
            GcUnion::Scratch(value) => value as u32,
            GcUnion::Forward(r) => r.bits(),
        }
    }

    /// Drop host-session state: lock counts and scratch values become zero.
    pub const fn reset(self) -> Self {
        match self {
            GcUnion::Count { slots, .. } => GcUnion::Count { locks: 0, slots },
            GcUnion::Scratch(_) => GcUnion::Scratch(0),
            forward => forward,
        }
    }
}

/// A decoded object header with the size already in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Total object length in bytes, header included.
    pub size: u32,
    pub flags: ObjFlags,
    /// Raw GC union word, in host order.
    pub gc: u32,
}

impl Header {
    pub fn gc(&self, view: GcView) -> GcUnion {
        GcUnion::from_raw(self.gc, view)
    }

    pub fn is_forwarded(&self) -> bool {
        self.flags.contains(ObjFlags::FORWARD)
    }

    /// Bytes following the header.
    pub fn body_len(&self) -> usize {
        (self.size as usize).saturating_sub(HEADER_SIZE)
    }

    /// The packed size/flags word in canonical order.
    pub const fn size_flags_word(&self) -> u32 {
        ((self.size & MAX_OBJECT_SIZE) << 8) | self.flags.bits() as u32
    }
}

/// Read and validate the header at `offset`.
pub fn read_header(buf: &[u8], offset: usize, order: ByteOrder) -> Result<Header> {
    let bytes = offset
        .checked_add(HEADER_SIZE)
        .and_then(|end| buf.get(offset..end))
        .ok_or(FormatError::TruncatedHeader {
            offset,
            available: buf.len().saturating_sub(offset),
        })?;

    let word = canonicalize(
        u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        order,
    );
    let size = word >> 8;
    let flags = ObjFlags::from_bits_retain(word as u8);
    let gc = order.read_u32([bytes[4], bytes[5], bytes[6], bytes[7]]);

    let alignment = flags.alignment();
    if offset % alignment != 0 {
        return Err(FormatError::MisalignedObject { offset, alignment });
    }

    let available = buf.len() - offset;
    if (size as usize) < HEADER_SIZE || size as usize > available {
        return Err(FormatError::SizeOverflow {
            offset,
            size,
            available,
        });
    }

    Ok(Header { size, flags, gc })
}

/// Append `header` to `dst` in `order`.
pub fn put_header(dst: &mut impl BufMut, header: &Header, order: ByteOrder) {
    dst.put_u32(decanonicalize(header.size_flags_word(), order));
    order.put_u32(dst, header.gc);
}
