use std::fmt;

use crate::error::{FormatError, Result};

/// A 32-bit tagged reference as stored in the heap.
///
/// The raw bits are kept verbatim; interpretation is delegated to a [`TagScheme`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct Ref(pub i32);

impl Ref {
    /// The nil immediate.
    pub const NIL: Ref = Ref(0x02);
    /// The true immediate.
    pub const TRUE: Ref = Ref(0x1A);
    /// Class of every symbol object.
    pub const SYMBOL_CLASS: Ref = Ref(0x0005_5552);

    /// Integer immediate. The top two bits of `value` are lost.
    pub const fn int(value: i32) -> Ref {
        Ref(value << 2)
    }

    /// Character immediate.
    pub const fn char(unit: u16) -> Ref {
        Ref(((unit as i32) << 4) | 0x6)
    }

    /// Magic pointer into a ROM table.
    pub const fn magic(index: u32) -> Ref {
        Ref(((index << 2) | 0x3) as i32)
    }

    pub const fn bits(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref({:#010x})", self.bits())
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.bits())
    }
}

/// Value encoded directly in the bits of an immediate Ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Immediate {
    Int(i32),
    Char(u16),
    Nil,
    True,
    /// Any other special constant; holds the bits above the 4-bit tag.
    Special(u32),
    /// Index into the ROM magic-pointer table.
    Magic(u32),
}

/// What a Ref designates once its tag bits are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// Byte offset of an object header within the heap buffer.
    Pointer(u32),
    Immediate(Immediate),
}

/// Policy for telling pointer Refs from immediates.
///
/// The low-bit tag layout is device knowledge and is kept pluggable so it can be
/// validated against sample heaps without touching the codec.
pub trait TagScheme: fmt::Debug + Send + Sync {
    /// Decode the tag bits of `r`.
    fn classify(&self, r: Ref) -> Result<RefKind>;

    /// Build the pointer Ref addressing the header at `offset`.
    fn pointer(&self, offset: u32) -> Ref;

    /// The class Ref carried by symbol objects.
    fn symbol_class(&self) -> Ref {
        Ref::SYMBOL_CLASS
    }

    fn is_pointer(&self, r: Ref) -> bool {
        matches!(self.classify(r), Ok(RefKind::Pointer(_)))
    }
}

/// Tag layout used on device.
///
/// | low bits | meaning |
/// |----------|---------|
/// | `..00`   | 30-bit integer |
/// | `..01`   | pointer (`base + offset`, offset 4-aligned) |
/// | `0010`   | special constant (nil, class markers) |
/// | `0110`   | character |
/// | `1010`   | boolean |
/// | `1110`   | reserved |
/// | `..11`   | magic pointer |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NewtonTags {
    /// Address the heap buffer was loaded at. Pointer Refs are absolute.
    pub base: u32,
}

impl NewtonTags {
    pub const fn with_base(base: u32) -> Self {
        Self { base }
    }
}

impl TagScheme for NewtonTags {
    fn classify(&self, r: Ref) -> Result<RefKind> {
        let bits = r.bits();
        let kind = match bits & 0x3 {
            0x0 => RefKind::Immediate(Immediate::Int(r.0 >> 2)),
            0x1 => {
                let offset = (bits & !0x3)
                    .checked_sub(self.base)
                    .ok_or(FormatError::ForeignPointer(r))?;
                RefKind::Pointer(offset)
            }
            0x2 => RefKind::Immediate(match (bits >> 2) & 0x3 {
                0x0 if r == Ref::NIL => Immediate::Nil,
                0x0 => Immediate::Special(bits >> 4),
                0x1 => Immediate::Char((bits >> 4) as u16),
                0x2 if r == Ref::TRUE => Immediate::True,
                _ => return Err(FormatError::InvalidRefTag(r)),
            }),
            _ => RefKind::Immediate(Immediate::Magic(bits >> 2)),
        };
        Ok(kind)
    }

    fn pointer(&self, offset: u32) -> Ref {
        Ref((self.base.wrapping_add(offset) | 0x1) as i32)
    }
}
