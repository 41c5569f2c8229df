//! Byte-order handling for the size/flags word and the remaining scalars.

use bytes::BufMut;

/// Byte order of the producer that wrote a heap buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum ByteOrder {
    /// Device order. Heaps dumped from hardware use this.
    #[default]
    Big,
    /// Heaps written natively by little-endian hosts.
    Little,
}

impl ByteOrder {
    /// Byte order of the machine running this code.
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    pub fn read_u32(self, bytes: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Big => u32::from_be_bytes(bytes),
            ByteOrder::Little => u32::from_le_bytes(bytes),
        }
    }

    pub fn put_u32(self, dst: &mut impl BufMut, value: u32) {
        match self {
            ByteOrder::Big => dst.put_u32(value),
            ByteOrder::Little => dst.put_u32_le(value),
        }
    }

    pub fn read_u16(self, bytes: [u8; 2]) -> u16 {
        match self {
            ByteOrder::Big => u16::from_be_bytes(bytes),
            ByteOrder::Little => u16::from_le_bytes(bytes),
        }
    }

    pub fn put_u16(self, dst: &mut impl BufMut, value: u16) {
        match self {
            ByteOrder::Big => dst.put_u16(value),
            ByteOrder::Little => dst.put_u16_le(value),
        }
    }
}

/// Exchange the high and low bytes of the 24-bit size held in bits 31..8.
///
/// The middle size byte (bits 23..16) and the flags byte (bits 7..0) stay put.
/// This mirrors how a little-endian producer lays out a `size:24, flags:8`
/// bit field, so it is not a plain 4-byte reversal.
pub const fn byte_swap_size(word: u32) -> u32 {
    (word & 0x00FF_00FF) | ((word << 16) & 0xFF00_0000) | ((word >> 16) & 0x0000_FF00)
}

/// Normalize a size/flags word read MSB-first from a buffer written in `source` order.
pub const fn canonicalize(word: u32, source: ByteOrder) -> u32 {
    match source {
        ByteOrder::Big => word,
        ByteOrder::Little => byte_swap_size(word),
    }
}

/// Inverse of [`canonicalize`]: produce the word to be written MSB-first for `target`.
pub const fn decanonicalize(word: u32, target: ByteOrder) -> u32 {
    match target {
        ByteOrder::Big => word,
        ByteOrder::Little => byte_swap_size(word),
    }
}
