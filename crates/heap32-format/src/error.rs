use crate::tag::Ref;

/// Errors raised while reading packed header fields or classifying Refs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// Fewer bytes remain at the offset than an object header needs.
    #[error("truncated header at offset {offset:#x} ({available} bytes available, 8 required)")]
    TruncatedHeader { offset: usize, available: usize },

    /// The declared object size runs past the end of the buffer or is smaller than a header.
    #[error("object at offset {offset:#x} declares size {size} but only {available} bytes remain")]
    SizeOverflow {
        offset: usize,
        size: u32,
        available: usize,
    },

    /// The object start violates the alignment selected by its flags.
    #[error("object at offset {offset:#x} is not {alignment}-byte aligned")]
    MisalignedObject { offset: usize, alignment: usize },

    /// The immediate tag bits form an undefined pattern.
    #[error("invalid ref tag in {0}")]
    InvalidRefTag(Ref),

    /// A pointer Ref addresses memory below the heap base.
    #[error("pointer {0} lies outside the heap")]
    ForeignPointer(Ref),
}

pub type Result<T> = std::result::Result<T, FormatError>;
