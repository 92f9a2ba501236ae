//! Little-endian cursor over a [`RefSpan`].
//!
//! Every out-of-data condition reports the position it happened at; sub-spans
//! produced by the reader keep their lineage so later errors can be mapped
//! back to absolute file offsets.

use crate::data::{RefBuf, RefSpan};
use crate::error::{Error, ErrorKind, Result};

pub struct Reader {
    span: RefSpan,
    pos: usize,
}

macro_rules! read_le {
    ($read:ident, $peek:ident, $ty:ty) => {
        pub fn $read(&mut self) -> Result<$ty> {
            let v = self.$peek()?;
            self.pos += std::mem::size_of::<$ty>();
            Ok(v)
        }

        pub fn $peek(&self) -> Result<$ty> {
            const N: usize = std::mem::size_of::<$ty>();
            let bytes = self.peek_bytes(N)?;
            Ok(<$ty>::from_le_bytes(bytes.try_into().unwrap()))
        }
    };
}

impl Reader {
    pub fn new(span: RefSpan) -> Self {
        Self { span, pos: 0 }
    }

    pub fn span(&self) -> &RefSpan {
        &self.span
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.span.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn remaining(&self) -> usize {
        self.span.len() - self.pos
    }

    pub fn remaining_bytes(&self) -> &[u8] {
        &self.span.bytes()[self.pos..]
    }

    fn out_of_data(&self, wanted: usize) -> Error {
        Error::with(
            ErrorKind::OutOfData,
            format!(
                "wanted {wanted} bytes at position {:#x}, {} remaining",
                self.pos,
                self.remaining()
            ),
        )
    }

    fn peek_bytes(&self, n: usize) -> Result<&[u8]> {
        if self.remaining() < n {
            return Err(self.out_of_data(n));
        }
        Ok(&self.span.bytes()[self.pos..self.pos + n])
    }

    read_le!(read_u8, peek_u8, u8);
    read_le!(read_u16, peek_u16, u16);
    read_le!(read_u32, peek_u32, u32);
    read_le!(read_u64, peek_u64, u64);
    read_le!(read_s16, peek_s16, i16);
    read_le!(read_s32, peek_s32, i32);

    pub fn read_bytes(&mut self, n: usize) -> Result<&[u8]> {
        if self.remaining() < n {
            return Err(self.out_of_data(n));
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.span.bytes()[start..start + n])
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(self.out_of_data(n));
        }
        self.pos += n;
        Ok(())
    }

    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.span.len() {
            return Err(Error::with(
                ErrorKind::OutOfData,
                format!("seek to {pos:#x} beyond end {:#x}", self.span.len()),
            ));
        }
        self.pos = pos;
        Ok(())
    }

    /// Advance over `n` bytes, returning them as a lineage-preserving span.
    pub fn read_ref_span(&mut self, n: usize) -> Result<RefSpan> {
        if self.remaining() < n {
            return Err(self.out_of_data(n));
        }
        let span = self.span.sub_span(self.pos, n);
        self.pos += n;
        Ok(span)
    }

    /// The rest of the input (up to `max`) as a span, without advancing.
    pub fn peek_remaining_ref_span(&self, max: usize) -> RefSpan {
        self.span.sub_span(self.pos, self.remaining().min(max))
    }

    /// The rest of the input (up to `max`) as a span, advancing past it.
    pub fn read_remaining_ref_span(&mut self, max: usize) -> RefSpan {
        let n = self.remaining().min(max);
        let span = self.span.sub_span(self.pos, n);
        self.pos += n;
        span
    }

    /// Copy the rest of the input into a fresh derived buffer (used before
    /// in-place decryption, which must not touch the source).
    pub fn copy_remaining(&mut self) -> RefSpan {
        let src = self.read_remaining_ref_span(usize::MAX);
        let data = src.bytes().to_vec();
        RefSpan::whole(RefBuf::derived(&src, data))
    }

    /// Read 8-bit units until a zero or end of data. The terminator is
    /// consumed when present.
    pub fn read_c_str_u8(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(b) = self.read_u8() {
            if b == 0 {
                break;
            }
            out.push(b);
        }
        out
    }

    /// Read 16-bit units until a zero or end of data. The terminator is
    /// consumed when present.
    pub fn read_c_str_u16(&mut self) -> Vec<u16> {
        let mut out = Vec::new();
        while let Ok(w) = self.read_u16() {
            if w == 0 {
                break;
            }
            out.push(w);
        }
        out
    }

    /// Read exactly `n` 8-bit units, then require a zero terminator.
    pub fn read_exact_c_str_u8(&mut self, n: usize) -> Result<Vec<u8>> {
        let out = self.read_bytes(n)?.to_vec();
        if self.read_u8()? != 0 {
            return Err(Error::with(
                ErrorKind::InvalidState,
                format!("missing string terminator at position {:#x}", self.pos - 1),
            ));
        }
        Ok(out)
    }

    /// Read exactly `n` 16-bit units, then require a zero terminator.
    pub fn read_exact_c_str_u16(&mut self, n: usize) -> Result<Vec<u16>> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.read_u16()?);
        }
        if self.read_u16()? != 0 {
            return Err(Error::with(
                ErrorKind::InvalidState,
                format!("missing string terminator at position {:#x}", self.pos - 2),
            ));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(bytes: &[u8]) -> Reader {
        Reader::new(RefSpan::whole(RefBuf::root(bytes.to_vec())))
    }

    #[test]
    fn little_endian_reads() {
        let mut r = reader(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0xff, 0xff]);
        assert_eq!(r.read_u8().unwrap(), 0x01);
        assert_eq!(r.read_u16().unwrap(), 0x0302);
        assert_eq!(r.peek_u32().unwrap(), 0xffff0604);
        assert_eq!(r.read_u32().unwrap(), 0xffff0604);
        assert_eq!(r.read_s16().unwrap(), -1);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn out_of_data_carries_position() {
        let mut r = reader(&[0x01, 0x02]);
        r.read_u8().unwrap();
        let err = r.read_u32().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfData);
        assert!(err.trace()[0].contains("0x1"));
    }

    #[test]
    fn c_strings() {
        let mut r = reader(b"abc\0def");
        assert_eq!(r.read_c_str_u8(), b"abc");
        assert_eq!(r.position(), 4);
        // No terminator before end of data: lenient.
        assert_eq!(r.read_c_str_u8(), b"def");

        let mut r = reader(&[0x41, 0x00, 0x42, 0x00, 0x00, 0x00]);
        assert_eq!(r.read_c_str_u16(), [0x41, 0x42]);

        let mut r = reader(b"ab\0x");
        assert_eq!(r.read_exact_c_str_u8(2).unwrap(), b"ab");
        let mut r = reader(b"abx");
        assert!(r.read_exact_c_str_u8(2).is_err());
    }

    #[test]
    fn ref_span_reads_keep_lineage() {
        let mut r = reader(&[0, 1, 2, 3, 4, 5, 6, 7]);
        r.skip(2).unwrap();
        let span = r.read_ref_span(3).unwrap();
        assert_eq!(span.bytes(), &[2, 3, 4]);
        assert_eq!(span.root_position(), Some(2));
        assert_eq!(r.position(), 5);

        let rest = r.peek_remaining_ref_span(2);
        assert_eq!(rest.bytes(), &[5, 6]);
        assert_eq!(r.position(), 5);
    }
}
