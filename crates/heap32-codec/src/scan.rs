use std::iter::FusedIterator;
use std::sync::Arc;

use heap32_format::{align_up, read_header, ByteOrder, Header, TagScheme};
use tracing::trace;

use crate::config::WalkConfig;
use crate::error::{DecodeError, Result};
use crate::object::Shape;
use crate::walker::{classify_shape, Expect};

/// One header found by a linear scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanEntry {
    pub offset: u32,
    pub header: Header,
    /// Layout guess without context from a referring field.
    pub shape: Shape,
}

/// Walk every object header laid end to end in `buf`, ignoring reachability.
///
/// Each object starts at the end of the previous one, rounded up to its own
/// alignment. The scan stops at the end of the buffer or when only zero padding
/// remains. A malformed header is yielded once as an error and ends the scan.
pub fn scan_headers<'a>(buf: &'a [u8], config: &WalkConfig) -> ScanIter<'a> {
    ScanIter {
        buf,
        order: config.byte_order,
        tags: Arc::clone(&config.tags),
        offset: 0,
        done: false,
    }
}

/// Iterator returned by [`scan_headers`].
#[derive(Debug)]
pub struct ScanIter<'a> {
    buf: &'a [u8],
    order: ByteOrder,
    tags: Arc<dyn TagScheme>,
    offset: usize,
    done: bool,
}

impl ScanIter<'_> {
    fn next_start(&self) -> Option<usize> {
        // Skip padding up to the next 4-byte boundary the next header could use.
        let rest = self.buf.get(self.offset..)?;
        let skip = rest.iter().position(|&b| b != 0)?;
        Some(self.offset + skip - skip % 4)
    }
}

impl Iterator for ScanIter<'_> {
    type Item = Result<ScanEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some(offset) = self.next_start() else {
            self.done = true;
            return None;
        };

        let header = match read_header(self.buf, offset, self.order) {
            Ok(header) => header,
            Err(err) => {
                self.done = true;
                return Some(Err(DecodeError::from(err)));
            }
        };
        let shape = classify_shape(self.buf, &header, offset, Expect::Any, self.order, &*self.tags);
        trace!(offset, size = header.size, %shape, "scanned header");

        self.offset = align_up(offset + header.size as usize, 4);
        Some(Ok(ScanEntry {
            offset: offset as u32,
            header,
            shape,
        }))
    }
}

impl FusedIterator for ScanIter<'_> {}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};
    use heap32_format::{put_header, FormatError, NewtonTags, ObjFlags, Ref};

    use super::*;

    fn push(buf: &mut BytesMut, flags: ObjFlags, class: Ref, body: &[u8]) -> u32 {
        while buf.len() % flags.alignment() != 0 {
            buf.put_u8(0);
        }
        let offset = buf.len() as u32;
        put_header(
            buf,
            &Header {
                size: (12 + body.len()) as u32,
                flags,
                gc: 0,
            },
            ByteOrder::Big,
        );
        buf.put_u32(class.bits());
        buf.put_slice(body);
        offset
    }

    #[test]
    fn lists_every_header_in_order() {
        let tags = NewtonTags::default();
        let mut buf = BytesMut::new();
        let sym = push(&mut buf, ObjFlags::empty(), Ref::SYMBOL_CLASS, &[0, 0, 0, 0, b'x', 0, 0, 0]);
        let bin = push(&mut buf, ObjFlags::ALIGN_4, Ref::NIL, &[1, 2, 3]);
        let arr = push(&mut buf, ObjFlags::SLOTTED, Ref::NIL, &tags.pointer(sym).bits().to_be_bytes());

        let entries: Vec<ScanEntry> = scan_headers(&buf, &WalkConfig::default())
            .collect::<Result<_>>()
            .unwrap();
        let summary: Vec<(u32, Shape)> = entries.iter().map(|e| (e.offset, e.shape)).collect();
        assert_eq!(
            summary,
            vec![(sym, Shape::Symbol), (bin, Shape::Binary), (arr, Shape::Array)]
        );
        assert_eq!(entries[1].header.size, 15);
    }

    #[test]
    fn trailing_zero_padding_ends_the_scan() {
        let mut buf = BytesMut::new();
        push(&mut buf, ObjFlags::empty(), Ref::NIL, &[]);
        buf.put_bytes(0, 20);
        assert_eq!(scan_headers(&buf, &WalkConfig::default()).count(), 1);
        assert_eq!(scan_headers(&[0u8; 16], &WalkConfig::default()).count(), 0);
    }

    #[test]
    fn bad_header_stops_after_one_error() {
        let mut buf = BytesMut::new();
        push(&mut buf, ObjFlags::empty(), Ref::NIL, &[]);
        buf.put_bytes(0, 4);
        buf.put_slice(&[0x00, 0x01, 0x00, 0x00]);

        let mut iter = scan_headers(&buf, &WalkConfig::default());
        assert!(iter.next().unwrap().is_ok());
        assert!(matches!(
            iter.next(),
            Some(Err(DecodeError::Format(FormatError::TruncatedHeader { offset: 16, .. })))
        ));
        assert!(iter.next().is_none());
    }
}
