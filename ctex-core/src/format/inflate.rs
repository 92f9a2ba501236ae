//! DEFLATE decoder with the two header dialects used by this ecosystem.
//!
//! Runtimes in this family emit three flavours of stream: proper zlib, raw
//! deflate, and a raw-deflate variant ("anaconda") whose stored blocks drop
//! the decoder's entire bit reservoir instead of aligning to the next byte
//! boundary. The strict modes byte-align as RFC 1951 requires.
//!
//! Output is bounded: hitting `max_size` stops the decode and returns the
//! truncated buffer as a success, because callers routinely inflate only the
//! metadata prefix of a large body. The number of input bytes consumed is
//! reported so the old-era item sizer can re-seek past a stream of unknown
//! compressed length.

use crate::data::{RefBuf, RefSpan, Reader};
use crate::error::{Error, ErrorKind, Result, ResultExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMode {
    Zlib,
    Raw,
}

#[derive(Debug)]
pub struct Inflated {
    pub data: Vec<u8>,
    /// Input bytes consumed by the deflate stream (header included).
    pub consumed: usize,
}

const CODELEN_ORDER: [usize; 19] = [16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15];

struct BitReader<'a> {
    input: &'a [u8],
    pos: usize,
    accum: u32,
    num_bits: u32,
}

impl<'a> BitReader<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            accum: 0,
            num_bits: 0,
        }
    }

    fn get_bits(&mut self, n: u32) -> Result<u32> {
        while self.num_bits < n {
            let Some(&b) = self.input.get(self.pos) else {
                return Err(Error::with(
                    ErrorKind::OutOfData,
                    format!("deflate bitstream ended at input byte {:#x}", self.pos),
                ));
            };
            self.pos += 1;
            self.accum |= (b as u32) << self.num_bits;
            self.num_bits += 8;
        }
        let v = self.accum & ((1u32 << n) - 1);
        self.accum >>= n;
        self.num_bits -= n;
        Ok(v)
    }

    /// Walk a flattened canonical-code tree (negative entries are `!index`
    /// links to the right child pair).
    fn get_huff(&mut self, table: &[i16]) -> Result<u16> {
        let mut bits_used = 0u32;
        let mut index = 0usize;
        loop {
            if self.num_bits <= bits_used {
                let Some(&b) = self.input.get(self.pos) else {
                    return Err(Error::with(
                        ErrorKind::OutOfData,
                        format!("deflate bitstream ended at input byte {:#x}", self.pos),
                    ));
                };
                self.pos += 1;
                self.accum |= (b as u32) << self.num_bits;
                self.num_bits += 8;
            }
            index += ((self.accum >> bits_used) & 1) as usize;
            bits_used += 1;
            if table[index] >= 0 {
                break;
            }
            index = (!table[index]) as usize;
        }
        self.accum >>= bits_used;
        self.num_bits -= bits_used;
        Ok(table[index] as u16)
    }

    fn align_to_byte(&mut self) {
        let drop = self.num_bits & 7;
        self.accum >>= drop;
        self.num_bits -= drop;
    }

    fn drop_reservoir(&mut self) {
        self.accum = 0;
        self.num_bits = 0;
    }

    fn consumed(&self) -> usize {
        self.pos - (self.num_bits / 8) as usize
    }
}

/// Build the flattened tree for a canonical code given per-symbol lengths.
fn gen_huffman_table(lengths: &[u8], allow_no_symbols: bool, table: &mut [i16]) -> Result<()> {
    let mut length_count = [0u16; 16];
    for &len in lengths {
        if len > 0 {
            length_count[len as usize] += 1;
        }
    }

    let total: u32 = length_count[1..].iter().map(|&c| c as u32).sum();
    if total == 0 {
        return if allow_no_symbols {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::NoSymbols))
        };
    }
    if total == 1 {
        for (i, &len) in lengths.iter().enumerate() {
            if len != 0 {
                table[0] = i as i16;
                table[1] = i as i16;
            }
        }
        return Ok(());
    }

    let mut first_code = [0u16; 16];
    for i in 1..16 {
        first_code[i] = (first_code[i - 1].wrapping_add(length_count[i - 1])) << 1;
        if first_code[i] as u32 + length_count[i] as u32 > 1u32 << i {
            return Err(Error::new(ErrorKind::TooManySymbols));
        }
    }
    if first_code[15] as u32 + length_count[15] as u32 != 1 << 15 {
        return Err(Error::new(ErrorKind::IncompleteTree));
    }

    let mut index = 0usize;
    for i in 1..16u32 {
        let code_limit = 1u32 << i;
        let next_code = first_code[i as usize] as u32 + length_count[i as usize] as u32;
        let mut next_index = index as u32 + (code_limit - first_code[i as usize] as u32);

        for (j, &len) in lengths.iter().enumerate() {
            if len as u32 == i {
                table[index] = j as i16;
                index += 1;
            }
        }
        for _ in next_code..code_limit {
            table[index] = !(next_index as i16);
            index += 1;
            next_index += 2;
        }
    }

    Ok(())
}

fn fixed_literal_table() -> [i16; 0x23E] {
    let mut table = [0i16; 0x23E];
    let mut next_free = 2i16;
    let mut i = 0usize;
    while i < 0x7E {
        table[i] = !next_free;
        next_free += 2;
        i += 1;
    }
    while i < 0x96 {
        table[i] = i as i16 + (256 - 0x7E);
        i += 1;
    }
    while i < 0xFE {
        table[i] = !next_free;
        next_free += 2;
        i += 1;
    }
    while i < 0x18E {
        table[i] = i as i16 - 0xFE;
        i += 1;
    }
    while i < 0x196 {
        table[i] = i as i16 + (280 - 0x18E);
        i += 1;
    }
    while i < 0x1CE {
        table[i] = !next_free;
        next_free += 2;
        i += 1;
    }
    while i < 0x23E {
        table[i] = i as i16 + (144 - 0x1CE);
        i += 1;
    }
    table
}

fn fixed_distance_table() -> [i16; 0x3E] {
    let mut table = [0i16; 0x3E];
    for i in 0..0x1E {
        table[i] = !((i as i16) * 2 + 2);
    }
    for i in 0x1E..0x3E {
        table[i] = i as i16 - 0x1E;
    }
    table
}

/// Decode a deflate stream into at most `max_size` bytes.
///
/// Reaching `max_size` before the final block is an intentional early stop,
/// not an error. Malformed bitstreams report the precise Huffman failure
/// kind; running out of input reports `out_of_data`.
pub fn inflate(
    input: &[u8],
    header: HeaderMode,
    anaconda: bool,
    max_size: usize,
) -> Result<Inflated> {
    if input.is_empty() {
        return Ok(Inflated {
            data: Vec::new(),
            consumed: 0,
        });
    }

    let mut bits = BitReader::new(input);

    if header == HeaderMode::Zlib && input.len() >= 2 {
        let h = ((input[0] as u16) << 8) | input[1] as u16;
        if (h & 0x8F00) == 0x0800 && h % 31 == 0 {
            if h & 0x0020 != 0 {
                return Err(Error::new(ErrorKind::CustomDictionary));
            }
            bits.pos = 2;
        }
        // An invalid wrapper falls through as a headerless stream.
    }

    let mut out: Vec<u8> = Vec::new();

    macro_rules! push {
        ($b:expr) => {
            if out.len() >= max_size {
                return Ok(Inflated {
                    data: out,
                    consumed: bits.consumed(),
                });
            } else {
                out.push($b);
            }
        };
    }

    loop {
        let block_header = bits.get_bits(3)?;
        let final_block = block_header & 1 != 0;
        let block_type = block_header >> 1;

        match block_type {
            3 => return Err(Error::new(ErrorKind::InvalidBlockCode)),

            // Stored.
            0 => {
                if anaconda {
                    bits.drop_reservoir();
                } else {
                    bits.align_to_byte();
                }
                let len = bits.get_bits(16)?;
                let ilen = bits.get_bits(16)?;
                if ilen != !len & 0xFFFF {
                    return Err(Error::with(
                        ErrorKind::InflateFailed,
                        "stored block length complement mismatch",
                    ));
                }
                for _ in 0..len {
                    let b = bits.get_bits(8)? as u8;
                    push!(b);
                }
            }

            // Fixed or dynamic codes.
            ty => {
                let mut literal_table = [0i16; 0x23E];
                let mut distance_table = [0i16; 0x3E];

                if ty == 2 {
                    let literal_count = bits.get_bits(5)? as usize + 257;
                    let distance_count = bits.get_bits(5)? as usize + 1;
                    let codelen_count = bits.get_bits(4)? as usize + 4;

                    let mut codelen_len = [0u8; 19];
                    for &slot in CODELEN_ORDER.iter().take(codelen_count) {
                        codelen_len[slot] = bits.get_bits(3)? as u8;
                    }
                    let mut codelen_table = [0i16; 0x24];
                    gen_huffman_table(&codelen_len, false, &mut codelen_table)?;

                    let mut literal_len = [0u8; 288];
                    let mut distance_len = [0u8; 32];
                    let mut last_value = 0u32;
                    let mut counter = 0usize;
                    while counter < literal_count + distance_count {
                        let mut repeat;
                        let symbol = bits.get_huff(&codelen_table)?;
                        match symbol {
                            0..=15 => {
                                last_value = symbol as u32;
                                repeat = 1;
                            }
                            16 => repeat = bits.get_bits(2)? + 3,
                            17 => {
                                last_value = 0;
                                repeat = bits.get_bits(3)? + 3;
                            }
                            _ => {
                                last_value = 0;
                                repeat = bits.get_bits(7)? + 11;
                            }
                        }
                        while repeat > 0 && counter < literal_count + distance_count {
                            if counter < literal_count {
                                literal_len[counter] = last_value as u8;
                            } else {
                                distance_len[counter - literal_count] = last_value as u8;
                            }
                            counter += 1;
                            repeat -= 1;
                        }
                    }

                    gen_huffman_table(&literal_len[..literal_count], false, &mut literal_table)?;
                    gen_huffman_table(&distance_len[..distance_count], true, &mut distance_table)?;
                } else {
                    literal_table = fixed_literal_table();
                    distance_table = fixed_distance_table();
                }

                loop {
                    let symbol = bits.get_huff(&literal_table)? as u32;
                    if symbol < 256 {
                        push!(symbol as u8);
                        continue;
                    }
                    if symbol == 256 {
                        break;
                    }

                    let repeat_length = match symbol {
                        257..=264 => symbol - 257 + 3,
                        265..=284 => {
                            let length_bits = (symbol - 261) / 4;
                            bits.get_bits(length_bits)? + 3 + ((4 + ((symbol - 265) & 3)) << length_bits)
                        }
                        285 => 258,
                        _ => return Err(Error::new(ErrorKind::InvalidSymbol)),
                    };

                    let symbol = bits.get_huff(&distance_table)? as u32;
                    let distance = match symbol {
                        0..=3 => symbol + 1,
                        4..=29 => {
                            let distance_bits = (symbol - 2) / 2;
                            bits.get_bits(distance_bits)? + 1 + ((2 + (symbol & 1)) << distance_bits)
                        }
                        _ => return Err(Error::new(ErrorKind::InvalidSymbol)),
                    };

                    if distance as usize > out.len() {
                        return Err(Error::new(ErrorKind::InvalidDistance));
                    }
                    for _ in 0..repeat_length {
                        let b = out[out.len() - distance as usize];
                        push!(b);
                    }
                }
            }
        }

        if final_block {
            break;
        }
    }

    Ok(Inflated {
        data: out,
        consumed: bits.consumed(),
    })
}

/// Inflate a span into a derived buffer that remembers its source region.
pub fn inflate_span(
    compressed: &RefSpan,
    skip_header: bool,
    anaconda: bool,
    max_size: usize,
) -> Result<RefSpan> {
    let header = if skip_header {
        HeaderMode::Raw
    } else {
        HeaderMode::Zlib
    };
    let inflated = inflate(compressed.bytes(), header, anaconda, max_size)
        .frame_with(|| format!("inflating {} bytes", compressed.len()))?;
    Ok(RefSpan::whole(RefBuf::derived(compressed, inflated.data)))
}

/// Inflate an anaconda raw stream of unknown compressed length directly out
/// of a reader, advancing it past exactly the bytes the stream consumed.
pub fn stream_decompress(reader: &mut Reader, expected_size: u32) -> Result<RefSpan> {
    let src = reader.peek_remaining_ref_span(usize::MAX);
    let inflated = inflate(src.bytes(), HeaderMode::Raw, true, usize::MAX)
        .frame_with(|| format!("stream inflating at position {:#x}", reader.position()))?;
    if inflated.data.len() as u32 != expected_size {
        tracing::warn!(
            actual = inflated.data.len(),
            expected = expected_size,
            "decompressed size differs from the declared size"
        );
    }
    let consumed_src = reader.read_ref_span(inflated.consumed)?;
    Ok(RefSpan::whole(RefBuf::derived(&consumed_src, inflated.data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zlib_compress(data: &[u8]) -> Vec<u8> {
        let mut enc =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn raw_compress(data: &[u8]) -> Vec<u8> {
        let mut enc =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn zlib_round_trip() {
        let data = b"the quick brown fox jumps over the lazy dog, twice: \
                     the quick brown fox jumps over the lazy dog";
        let compressed = zlib_compress(data);
        let out = inflate(&compressed, HeaderMode::Zlib, false, usize::MAX).unwrap();
        assert_eq!(out.data, data);
    }

    #[test]
    fn raw_round_trip() {
        let data: Vec<u8> = (0..200u32).map(|i| (i * 7 % 251) as u8).collect();
        let compressed = raw_compress(&data);
        let out = inflate(&compressed, HeaderMode::Raw, false, usize::MAX).unwrap();
        assert_eq!(out.data, data);
    }

    #[test]
    fn stored_block() {
        // final=1 type=0, aligned, len=3/nlen, "abc".
        let input = [0x01, 0x03, 0x00, 0xFC, 0xFF, b'a', b'b', b'c'];
        for anaconda in [false, true] {
            let out = inflate(&input, HeaderMode::Raw, anaconda, usize::MAX).unwrap();
            assert_eq!(out.data, b"abc");
            assert_eq!(out.consumed, 8);
        }
    }

    #[test]
    fn consumed_ignores_trailing_bytes() {
        let mut input = vec![0x01, 0x02, 0x00, 0xFD, 0xFF, b'h', b'i'];
        input.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        let out = inflate(&input, HeaderMode::Raw, false, usize::MAX).unwrap();
        assert_eq!(out.data, b"hi");
        assert_eq!(out.consumed, 7);
    }

    #[test]
    fn max_size_truncates_without_error() {
        let data = vec![0x5Au8; 4096];
        let compressed = zlib_compress(&data);
        let out = inflate(&compressed, HeaderMode::Zlib, false, 100).unwrap();
        assert_eq!(out.data.len(), 100);
        assert!(out.data.iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn custom_dictionary_rejected() {
        // 0x7820: valid zlib check bits with FDICT set.
        let input = [0x78, 0x20, 0x00, 0x00, 0x00, 0x00];
        let err = inflate(&input, HeaderMode::Zlib, false, usize::MAX).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CustomDictionary);
    }

    #[test]
    fn invalid_block_code() {
        // final=1 type=3.
        let input = [0x07, 0x00];
        let err = inflate(&input, HeaderMode::Raw, false, usize::MAX).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidBlockCode);
    }

    #[test]
    fn truncated_stream_is_out_of_data() {
        // Stored block declaring 16 bytes but carrying only 3.
        let input = [0x01, 0x10, 0x00, 0xEF, 0xFF, b'a', b'b', b'c'];
        let err = inflate(&input, HeaderMode::Raw, false, usize::MAX).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfData);
    }

    #[test]
    fn empty_payload_round_trip() {
        let compressed = zlib_compress(b"");
        let out = inflate(&compressed, HeaderMode::Zlib, false, usize::MAX).unwrap();
        assert!(out.data.is_empty());
    }

    #[test]
    fn stream_decompress_advances_reader() {
        use crate::data::{RefBuf, RefSpan};

        let payload: Vec<u8> = (0..64u8).collect();
        let mut stream = raw_compress(&payload);
        let deflate_len = stream.len();
        stream.extend_from_slice(&[0xDE, 0xAD]);

        let mut reader = Reader::new(RefSpan::whole(RefBuf::root(stream)));
        let span = stream_decompress(&mut reader, payload.len() as u32).unwrap();
        assert_eq!(span.bytes(), &payload[..]);
        assert_eq!(reader.position(), deflate_len);
        assert_eq!(reader.remaining(), 2);
    }
}
