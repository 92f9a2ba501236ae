//! Byte buffers that remember where they came from.
//!
//! The file is held once in a root [`RefBuf`]; every chunk body, inflated or
//! decrypted buffer is either a view into it ([`RefSpan`]) or a new `RefBuf`
//! whose parent link points back at the source region. That lets an error
//! inside a deeply nested decoded body still report an absolute file offset.
//!
//! Spans are plain `(buffer, offset, len)` triples; no struct borrows another,
//! so the whole graph is freely cloneable and droppable piecewise.

use std::sync::Arc;

/// Shared, immutable byte buffer with an optional parent lineage.
#[derive(Debug)]
pub struct RefBuf {
    parent: Option<ParentLink>,
    data: Vec<u8>,
}

#[derive(Debug)]
struct ParentLink {
    buf: RefPtr,
    /// Offset of the source region within the parent buffer.
    offset: usize,
    /// Length of the source region within the parent buffer.
    len: usize,
}

pub type RefPtr = Arc<RefBuf>;

impl RefBuf {
    /// A root buffer with no lineage (the game file itself).
    pub fn root(data: Vec<u8>) -> RefPtr {
        Arc::new(RefBuf { parent: None, data })
    }

    /// A decoded buffer produced from `source` (its inflate/decrypt input).
    pub fn derived(source: &RefSpan, data: Vec<u8>) -> RefPtr {
        Arc::new(RefBuf {
            parent: source.source.clone().map(|buf| ParentLink {
                buf,
                offset: source.offset,
                len: source.len,
            }),
            data,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A `(buffer, offset, len)` view. Cheap to clone, never self-referential.
#[derive(Debug, Clone, Default)]
pub struct RefSpan {
    source: Option<RefPtr>,
    offset: usize,
    len: usize,
}

impl RefSpan {
    pub fn empty() -> Self {
        Self::default()
    }

    /// View over a whole buffer.
    pub fn whole(source: RefPtr) -> Self {
        let len = source.len();
        Self {
            source: Some(source),
            offset: 0,
            len,
        }
    }

    /// View over `source[offset..offset + len]`. The range is clamped to the
    /// buffer; callers that need exact sizes check beforehand.
    pub fn new(source: RefPtr, offset: usize, len: usize) -> Self {
        let offset = offset.min(source.len());
        let len = len.min(source.len() - offset);
        Self {
            source: Some(source),
            offset,
            len,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.source {
            Some(buf) => &buf.data()[self.offset..self.offset + self.len],
            None => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn source(&self) -> Option<&RefPtr> {
        self.source.as_ref()
    }

    /// A sub-view relative to this span's start, sharing the same buffer.
    pub fn sub_span(&self, offset: usize, len: usize) -> RefSpan {
        match &self.source {
            Some(buf) => {
                let offset = (self.offset + offset).min(self.offset + self.len);
                let len = len.min(self.offset + self.len - offset);
                RefSpan {
                    source: Some(buf.clone()),
                    offset,
                    len,
                }
            }
            None => RefSpan::empty(),
        }
    }

    /// Offset of this span within its own buffer.
    pub fn position(&self) -> Option<usize> {
        self.source.as_ref().map(|_| self.offset)
    }

    /// Absolute offset within the root buffer.
    ///
    /// For a view into a decoded buffer this is the root offset of the
    /// *source region* the buffer was decoded from, which is the most
    /// precise statement available once data has been re-encoded.
    pub fn root_position(&self) -> Option<usize> {
        let mut buf = self.source.as_ref()?;
        let mut pos = self.offset;
        while let Some(link) = &buf.parent {
            pos = link.offset;
            buf = &link.buf;
        }
        Some(pos)
    }

    /// The span this buffer was decoded from, if any.
    pub fn parent_span(&self) -> Option<RefSpan> {
        let link = self.source.as_ref()?.parent.as_ref()?;
        Some(RefSpan {
            source: Some(link.buf.clone()),
            offset: link.offset,
            len: link.len,
        })
    }
}

impl PartialEq for RefSpan {
    fn eq(&self, other: &Self) -> bool {
        self.bytes() == other.bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_span_positions() {
        let root = RefBuf::root((0u8..32).collect());
        let span = RefSpan::whole(root);
        let sub = span.sub_span(8, 4);
        assert_eq!(sub.bytes(), &[8, 9, 10, 11]);
        assert_eq!(sub.position(), Some(8));
        assert_eq!(sub.root_position(), Some(8));

        let subsub = sub.sub_span(1, 2);
        assert_eq!(subsub.bytes(), &[9, 10]);
        assert_eq!(subsub.root_position(), Some(9));
    }

    #[test]
    fn derived_buffer_reports_source_region() {
        let root = RefBuf::root(vec![0; 0x200]);
        let compressed = RefSpan::whole(root).sub_span(0x100, 0x40);
        let decoded = RefBuf::derived(&compressed, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let decoded = RefSpan::whole(decoded);

        // Any view into the decoded buffer points back at 0x100.
        assert_eq!(decoded.root_position(), Some(0x100));
        assert_eq!(decoded.sub_span(5, 2).root_position(), Some(0x100));

        let parent = decoded.parent_span().unwrap();
        assert_eq!(parent.position(), Some(0x100));
        assert_eq!(parent.len(), 0x40);
    }

    #[test]
    fn clamped_ranges() {
        let root = RefBuf::root(vec![1, 2, 3]);
        let span = RefSpan::new(root, 2, 10);
        assert_eq!(span.bytes(), &[3]);
        assert!(span.sub_span(5, 5).is_empty());
    }
}
