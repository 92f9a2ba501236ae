//! Single-block LZ4 decoder for the newest chunk mode.
//!
//! New-era item bodies flagged by the `0xFFFFFFFF` sentinel store a leading
//! little-endian u32 output size followed by one LZ4 block. Only the block
//! format is needed; frames, dictionaries and streaming do not occur in
//! these containers.

use std::io;

use bytes::Buf;

use crate::data::{RefBuf, RefSpan, Reader};
use crate::error::{Error, ErrorKind, Result, ResultExt};

fn out_of_data(input: &io::Cursor<&[u8]>) -> Error {
    Error::with(
        ErrorKind::OutOfData,
        format!("lz4 block ended at input byte {:#x}", input.position()),
    )
}

/// Decode one LZ4 block of known output size.
pub fn decode_block(input: &[u8], out_size: u32) -> Result<Vec<u8>> {
    let out_size = out_size as usize;
    let mut input = io::Cursor::new(input);
    let mut out = Vec::with_capacity(out_size);

    while input.has_remaining() {
        let token = input.get_u8();

        let mut literal_len = (token >> 4) as usize;
        if literal_len == 15 {
            loop {
                if !input.has_remaining() {
                    return Err(out_of_data(&input));
                }
                let b = input.get_u8();
                literal_len += b as usize;
                if b != 255 {
                    break;
                }
            }
        }

        if input.remaining() < literal_len {
            return Err(out_of_data(&input));
        }
        if out.len() + literal_len > out_size {
            return Err(Error::with(
                ErrorKind::InflateFailed,
                "lz4 literals overflow the declared output size",
            ));
        }
        let pos = input.position() as usize;
        out.extend_from_slice(&input.get_ref()[pos..pos + literal_len]);
        input.set_position((pos + literal_len) as u64);

        // The final sequence carries literals only.
        if !input.has_remaining() {
            break;
        }

        if input.remaining() < 2 {
            return Err(out_of_data(&input));
        }
        let offset = input.get_u16_le() as usize;
        if offset == 0 || offset > out.len() {
            return Err(Error::with(
                ErrorKind::InflateFailed,
                format!("lz4 match offset {offset} out of range"),
            ));
        }

        let mut match_len = (token & 0xF) as usize + 4;
        if match_len == 19 {
            loop {
                if !input.has_remaining() {
                    return Err(out_of_data(&input));
                }
                let b = input.get_u8();
                match_len += b as usize;
                if b != 255 {
                    break;
                }
            }
        }

        if out.len() + match_len > out_size {
            return Err(Error::with(
                ErrorKind::InflateFailed,
                "lz4 match overflows the declared output size",
            ));
        }
        // Matches may overlap their own output; copy byte-wise.
        for _ in 0..match_len {
            let b = out[out.len() - offset];
            out.push(b);
        }
    }

    if out.len() != out_size {
        return Err(Error::with(
            ErrorKind::InflateFailed,
            format!("lz4 block produced {} bytes, declared {}", out.len(), out_size),
        ));
    }

    Ok(out)
}

/// Decode a `u32 size || lz4 block` span into a derived buffer.
pub fn decode_prefixed_span(compressed: &RefSpan) -> Result<RefSpan> {
    let mut reader = Reader::new(compressed.clone());
    let out_size = reader.read_u32().frame("reading lz4 output size")?;
    let data = decode_block(reader.remaining_bytes(), out_size)
        .frame_with(|| format!("lz4 decoding {} bytes", compressed.len()))?;
    Ok(RefSpan::whole(RefBuf::derived(compressed, data)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_only() {
        let input = [0x30, b'a', b'b', b'c'];
        assert_eq!(decode_block(&input, 3).unwrap(), b"abc");
    }

    #[test]
    fn match_copy_with_overlap() {
        // 3 literals "abc", then a 6-byte match at offset 3 (self-overlapping).
        let input = [0x32, b'a', b'b', b'c', 0x03, 0x00];
        assert_eq!(decode_block(&input, 9).unwrap(), b"abcabcabc");
    }

    #[test]
    fn long_literal_run() {
        let mut input = vec![0xF0, 0x05];
        input.extend(std::iter::repeat(0x41).take(20));
        assert_eq!(decode_block(&input, 20).unwrap(), vec![0x41; 20]);
    }

    #[test]
    fn long_match_run() {
        // 1 literal, then match_len = 15 + 4 + 10 = 29 at offset 1.
        let input = [0x1F, b'x', 0x01, 0x00, 0x0A];
        assert_eq!(decode_block(&input, 30).unwrap(), vec![b'x'; 30]);
    }

    #[test]
    fn zero_offset_rejected() {
        let input = [0x12, b'x', 0x00, 0x00];
        assert!(decode_block(&input, 10).is_err());
    }

    #[test]
    fn offset_past_start_rejected() {
        let input = [0x12, b'x', 0x05, 0x00];
        assert!(decode_block(&input, 10).is_err());
    }

    #[test]
    fn truncated_literals() {
        let input = [0x40, b'a'];
        let err = decode_block(&input, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfData);
    }

    #[test]
    fn size_mismatch_rejected() {
        let input = [0x30, b'a', b'b', b'c'];
        assert!(decode_block(&input, 4).is_err());
        assert!(decode_block(&input, 2).is_err());
    }

    #[test]
    fn empty_block() {
        assert_eq!(decode_block(&[], 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn prefixed_span_keeps_lineage() {
        use crate::data::RefBuf;

        let mut bytes = 3u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0x30, b'a', b'b', b'c']);
        let root = RefBuf::root(bytes);
        let span = RefSpan::whole(root);
        let out = decode_prefixed_span(&span).unwrap();
        assert_eq!(out.bytes(), b"abc");
        assert_eq!(out.root_position(), Some(0));
    }
}
