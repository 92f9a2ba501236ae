//! Era-dependent string decoding and the string-carrying chunks.
//!
//! Old games store names as single-byte strings; unicode games use UTF-16LE;
//! cruf games use UTF-8 despite the unicode flag. Decoding is lenient: a
//! missing terminator at end of data ends the string.

use crate::data::{Reader, RefSpan};
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::format::chunk::{ChunkEntry, Encoding};
use crate::format::Context;

/// Single-byte text mapped unit-for-unit (how the originals treat it).
pub fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// UTF-16LE code units to a string, lossily.
pub fn utf16(units: &[u16]) -> String {
    char::decode_utf16(units.iter().copied())
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Read a name/title/path value from a decoded body per the game's era.
pub fn read_string_body(ctx: &Context, body: &RefSpan) -> String {
    let mut reader = Reader::new(body.clone());
    if ctx.old_game {
        latin1(&reader.read_c_str_u8())
    } else if ctx.cruf && ctx.unicode {
        let bytes = reader.read_c_str_u8();
        String::from_utf8_lossy(&bytes).into_owned()
    } else if ctx.unicode {
        utf16(&reader.read_c_str_u16())
    } else {
        latin1(&reader.read_c_str_u8())
    }
}

/// A chunk whose body is a single name/title/path string.
#[derive(Debug, Clone)]
pub struct StringChunk {
    pub entry: ChunkEntry,
    pub value: String,
}

impl StringChunk {
    pub fn read(ctx: &mut Context, reader: &mut Reader) -> Result<Self> {
        let entry = ChunkEntry::read(ctx, reader)?;
        let value = Self::read_value(ctx, &entry)
            .frame_with(|| format!("reading string chunk {}", entry.id))?;
        Ok(Self { entry, value })
    }

    fn read_value(ctx: &Context, entry: &ChunkEntry) -> Result<String> {
        if ctx.old_game
            && !matches!(entry.mode, Encoding::Raw | Encoding::Deflate)
        {
            return Err(Error::with(
                ErrorKind::InvalidMode,
                format!("invalid string mode {:?} in chunk {}", entry.mode, entry.id),
            ));
        }
        let body = entry.decode_body(ctx)?;
        Ok(read_string_body(ctx, &body))
    }
}

/// A chunk whose body is a packed array of null-terminated UTF-16 strings
/// (the 2.5+ object-names chunk).
#[derive(Debug, Clone)]
pub struct StringsChunk {
    pub entry: ChunkEntry,
    pub values: Vec<String>,
}

impl StringsChunk {
    pub fn read(ctx: &mut Context, reader: &mut Reader) -> Result<Self> {
        let entry = ChunkEntry::read(ctx, reader)?;
        let body = entry.decode_body(ctx)?;
        let mut reader = Reader::new(body);

        let mut values = Vec::new();
        while !reader.is_empty() {
            let units = reader.read_c_str_u16();
            if units.is_empty() {
                break;
            }
            values.push(utf16(&units));
        }

        Ok(Self { entry, values })
    }
}
