//! Finding the game payload: PE overlay, pack prelude and the format header.

use tracing::{debug, warn};

use crate::data::{Reader, RefSpan};
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::format::strings;
use crate::format::{chunk::ChunkId, Context, Era};

pub const WIN_EXE_SIG: u16 = 0x5A4D;
pub const WIN_EXE_PNT: usize = 0x3C;
pub const WIN_PE_SIG: u32 = 0x0000_4550;

/// `PAME` - legacy game header.
pub const HEADER_GAME: u32 = 0x454D_4150;
/// `PAMU` - unicode game header.
pub const HEADER_UNIC: u32 = 0x554D_4150;
/// `CRUF` - cruf-dialect unicode header.
pub const HEADER_CRUF: u32 = 0x4655_5243;
/// Pack prelude marker.
pub const HEADER_PACK: u64 = 0x1247_8749_7777_7777;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductCode {
    Cncv1Ver,
    Mmf1,
    Mmf15,
    Mmf2,
    Unknown(u16),
}

impl ProductCode {
    pub fn from_raw(code: u16) -> Self {
        match code {
            0x0207 => ProductCode::Cncv1Ver,
            0x0300 => ProductCode::Mmf1,
            0x0301 => ProductCode::Mmf15,
            0x0302 => ProductCode::Mmf2,
            other => ProductCode::Unknown(other),
        }
    }
}

/// An auxiliary file embedded ahead of the game header.
#[derive(Debug, Clone)]
pub struct PackFile {
    pub filename: String,
    pub bingo: u32,
    pub data: RefSpan,
}

/// Everything learned before the chunk stream starts.
#[derive(Debug, Default)]
pub struct ContainerHeader {
    pub pack_files: Vec<PackFile>,
    pub product_code: Option<ProductCode>,
    pub runtime_sub_version: u16,
    pub product_version: u32,
    pub product_build: u32,
    /// Detached stream beginning directly with the header chunk; there is no
    /// format magic or product header to read.
    pub raw_chunk_stream: bool,
}

struct SectionHeader {
    name: String,
    size: u32,
    addr: u32,
}

fn parse_section_header(reader: &mut Reader) -> Result<SectionHeader> {
    let start = reader.position();
    let name = strings::latin1(&reader.read_c_str_u8());
    reader.seek(start + 0x10)?;
    let size = reader.read_u32()?;
    let addr = reader.read_u32()?;
    reader.seek(start + 0x28)?;
    Ok(SectionHeader { name, size, addr })
}

/// Walk the PE headers and leave the reader at the start of the overlay.
pub fn parse_pe_header(reader: &mut Reader) -> Result<()> {
    let exe_sig = reader.read_u16().frame("reading EXE signature")?;
    if exe_sig != WIN_EXE_SIG {
        return Err(Error::with(
            ErrorKind::InvalidExeSignature,
            format!(
                "expected {WIN_EXE_SIG:#06x}, got {exe_sig:#06x} at {:#x}",
                reader.position() - 2
            ),
        ));
    }

    reader.seek(WIN_EXE_PNT)?;
    let pe_ptr = reader.read_u16()? as usize;
    reader.seek(pe_ptr)?;

    let pe_sig = reader.read_u32().frame("reading PE signature")?;
    if pe_sig != WIN_PE_SIG {
        return Err(Error::with(
            ErrorKind::InvalidPeSignature,
            format!(
                "expected {WIN_PE_SIG:#010x}, got {pe_sig:#010x} at {:#x}",
                reader.position() - 4
            ),
        ));
    }

    reader.skip(2)?;
    let num_sections = reader.read_u16()?;
    reader.skip(16)?;

    // Optional header plus the data directory block.
    reader.skip(0x60 + 0x80)?;

    let mut game_start = 0u64;
    for i in 0..num_sections {
        let section = parse_section_header(reader)
            .frame_with(|| format!("parsing section {}/{num_sections}", i + 1))?;
        debug!(
            name = section.name,
            size = section.size,
            addr = section.addr,
            "PE section"
        );
        if section.addr == 0 && section.size != 0 {
            game_start += section.size as u64;
        } else if section.addr as u64 + section.size as u64 > game_start {
            game_start = section.addr as u64 + section.size as u64;
        }
    }

    if game_start > reader.len() as u64 {
        return Err(Error::with(
            ErrorKind::OutOfData,
            format!("overlay would start at {game_start:#x}, file ends at {:#x}", reader.len()),
        ));
    }
    reader.seek(game_start as usize)?;
    Ok(())
}

/// Scan for the format magic, unwrap an optional pack prelude, read the
/// product header and fix the era gates on `ctx`.
pub fn parse_game_header(ctx: &mut Context, reader: &mut Reader) -> Result<ContainerHeader> {
    if reader.is_empty() {
        return Err(Error::with(
            ErrorKind::InvalidGameSignature,
            "no game header; if this game has an associated .DAT file, open that instead",
        ));
    }

    let mut header = ContainerHeader::default();
    let mut pos = reader.position();

    loop {
        reader.seek(pos)?;

        let first_short = reader.peek_u16().frame("scanning for game header")?;
        let pame_magic = reader.peek_u32().unwrap_or(0);
        let pack_magic = reader.peek_u64().unwrap_or(0);

        if first_short == ChunkId::HEADER.0 {
            debug!("raw chunk stream");
            ctx.old_game = true;
            header.raw_chunk_stream = true;
            break;
        } else if pame_magic == HEADER_GAME {
            debug!("legacy game");
            ctx.old_game = true;
            break;
        } else if pack_magic == HEADER_PACK {
            debug!("packed game");
            ctx.old_game = false;
            header.pack_files = parse_pack_data(reader)
                .frame_with(|| format!("parsing pack data at {pos:#x}"))?;
            break;
        } else if pame_magic == HEADER_UNIC {
            debug!("unicode game (ccn)");
            ctx.old_game = false;
            ctx.ccn = true;
            break;
        } else if pame_magic == HEADER_CRUF {
            debug!("cruf game");
            ctx.old_game = false;
            ctx.ccn = true;
            ctx.cruf = true;
            break;
        } else if first_short == 0x222C {
            // Extra-data prologue: skip its length-prefixed payload.
            reader.skip(4)?;
            let skip = reader.read_u32()? as usize;
            reader.skip(skip)?;
            pos = reader.position();
        } else if first_short == 0x7F7F {
            pos += 8;
        } else {
            return Err(Error::with(
                ErrorKind::InvalidGameSignature,
                format!(
                    "expected a game magic at {pos:#x}, found {first_short:#06x}/{pame_magic:#010x}"
                ),
            ));
        }

        if pos > reader.len() {
            return Err(Error::with(
                ErrorKind::InvalidGameSignature,
                format!("scan position {pos:#x} beyond end {:#x}", reader.len()),
            ));
        }
    }

    if !header.raw_chunk_stream {
        let magic = reader.read_u32()?;
        ctx.unicode = false;
        if magic == HEADER_UNIC || magic == HEADER_CRUF {
            ctx.unicode = true;
            ctx.old_game = false;
        } else if magic != HEADER_GAME {
            return Err(Error::with(
                ErrorKind::InvalidGameSignature,
                format!(
                    "expected {HEADER_GAME:#010x}, got {magic:#010x} at {:#x}",
                    reader.position() - 4
                ),
            ));
        }

        let product = ProductCode::from_raw(reader.read_u16()?);
        header.product_code = Some(product);
        if product == ProductCode::Cncv1Ver {
            // Acknowledged, but the cnc layout is not parsed further.
            ctx.cnc = true;
        } else {
            header.runtime_sub_version = reader.read_u16()?;
            header.product_version = reader.read_u32()?;
            header.product_build = reader.read_u32()?;
        }
    }

    ctx.product_build = header.product_build;
    ctx.era = if header.product_build < 284 || ctx.old_game || ctx.compat {
        Era::Old
    } else if header.product_build > 285 {
        Era::V288
    } else {
        Era::V284
    };
    ctx.magic_char = if ctx.era == Era::Old { 99 } else { 54 };

    Ok(header)
}

/// Read the pack prelude, leaving the reader at the real format header.
fn parse_pack_data(reader: &mut Reader) -> Result<Vec<PackFile>> {
    let start = reader.position();
    let magic = reader.read_u64()?;
    debug_assert_eq!(magic, HEADER_PACK);

    let header_size = reader.read_u32()? as usize;
    let data_size = reader.read_u32()? as usize;

    // The trailing format magic tells us how entry names are encoded.
    let mut unicode_names = false;
    match (start + data_size).checked_sub(header_size) {
        Some(trailer) if trailer < reader.len() => {
            reader.seek(trailer)?;
            unicode_names = reader.read_u32()? == HEADER_UNIC;
        }
        _ => warn!(data_size, header_size, "pack data size points past the file"),
    }

    reader.seek(start + 0x10)?;
    let format_version = reader.read_u32()?;
    debug!(format_version, "pack prelude");
    reader.skip(8)?;

    let count = reader.read_s32()?;
    if count < 0 {
        return Err(Error::new(ErrorKind::InvalidPackCount));
    }

    // First pass probes whether entries carry the extra "bingo" word: walk
    // them as if they did not, and see whether we land on a known magic.
    let entries_start = reader.position();
    for _ in 0..count {
        if reader.remaining() < 2 {
            break;
        }
        let len = reader.read_u16()? as usize;
        if reader.remaining() < len {
            break;
        }
        reader.skip(len)?;
        if reader.remaining() < 4 {
            break;
        }
        let len = reader.read_u32()? as usize;
        if reader.remaining() < len {
            break;
        }
        reader.skip(len)?;
    }
    let probe = reader.read_u32()?;
    let has_bingo = probe != HEADER_GAME && probe != HEADER_UNIC;
    debug!(has_bingo, "pack entry layout");

    reader.seek(entries_start)?;
    let mut pack_files = Vec::with_capacity(count as usize);
    for i in 0..count {
        let name_len = reader
            .read_u16()
            .frame_with(|| format!("pack entry {}/{count}", i + 1))? as usize;

        let filename = if unicode_names {
            let mut units = Vec::with_capacity(name_len);
            for _ in 0..name_len {
                units.push(reader.read_u16()?);
            }
            strings::utf16(&units)
        } else {
            strings::latin1(reader.read_bytes(name_len)?)
        };

        let bingo = if has_bingo { reader.read_u32()? } else { 0 };
        let data_len = reader.read_u32()? as usize;
        let data = reader
            .read_ref_span(data_len)
            .frame_with(|| format!("pack entry {:?} data", filename))?;

        pack_files.push(PackFile {
            filename,
            bingo,
            data,
        });
    }

    let trailing = reader.peek_u32()?;
    if trailing != HEADER_GAME && trailing != HEADER_UNIC {
        reader.skip(4)?;
    }

    Ok(pack_files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RefBuf;
    use crate::format::Options;

    fn reader(bytes: Vec<u8>) -> Reader {
        Reader::new(RefSpan::whole(RefBuf::root(bytes)))
    }

    #[test]
    fn legacy_game_header() {
        // PAME, MMF1, sub 0, product 0x00010003, build 183.
        let bytes = hex::decode("50414d450003000003010000b7000000").unwrap();
        let mut ctx = Context::new(Options::default());
        let mut reader = reader(bytes);
        let header = parse_game_header(&mut ctx, &mut reader).unwrap();

        assert_eq!(header.product_code, Some(ProductCode::Mmf1));
        assert_eq!(header.product_build, 183);
        assert_eq!(ctx.era, Era::Old);
        assert_eq!(ctx.magic_char, 99);
        assert!(ctx.old_game);
        assert!(!ctx.unicode);
    }

    #[test]
    fn pack_prelude_discovery() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&HEADER_PACK.to_le_bytes());
        bytes.extend_from_slice(&0x10u32.to_le_bytes()); // header size
        bytes.extend_from_slice(&0x40u32.to_le_bytes()); // data size
        bytes.extend_from_slice(&0u32.to_le_bytes()); // format version
        bytes.extend_from_slice(&[0; 8]);
        bytes.extend_from_slice(&1i32.to_le_bytes()); // count
        // Entry: name "a.ex", bingo 0, data [1, 2, 3].
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.extend_from_slice(b"a.ex");
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&[1, 2, 3]);
        // The real game header.
        bytes.extend_from_slice(&HEADER_UNIC.to_le_bytes());
        bytes.extend_from_slice(&0x0302u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&292u32.to_le_bytes());

        let mut ctx = Context::new(Options::default());
        let mut reader = reader(bytes);
        let header = parse_game_header(&mut ctx, &mut reader).unwrap();

        assert_eq!(header.pack_files.len(), 1);
        assert_eq!(header.pack_files[0].filename, "a.ex");
        assert_eq!(header.pack_files[0].bingo, 0);
        assert_eq!(header.pack_files[0].data.bytes(), &[1, 2, 3]);

        assert!(ctx.unicode);
        assert_eq!(header.product_code, Some(ProductCode::Mmf2));
        assert_eq!(header.product_build, 292);
        assert_eq!(ctx.era, Era::V288);
        assert_eq!(ctx.magic_char, 54);
    }

    #[test]
    fn overlay_from_degenerate_section_table() {
        let mut bytes = vec![0u8; 0x200];
        bytes[0] = b'M';
        bytes[1] = b'Z';
        bytes[0x3C] = 0x40; // PE header at 0x40
        bytes[0x40..0x44].copy_from_slice(b"PE\0\0");
        // num sections at 0x46
        bytes[0x46..0x48].copy_from_slice(&2u16.to_le_bytes());
        // Sections start at 0x46 + 2 + 16 + 0xE0 = 0x138.
        let s0 = 0x138;
        bytes[s0 + 0x10..s0 + 0x14].copy_from_slice(&0x10u32.to_le_bytes());
        bytes[s0 + 0x14..s0 + 0x18].copy_from_slice(&0u32.to_le_bytes());
        let s1 = s0 + 0x28;
        bytes[s1 + 0x10..s1 + 0x14].copy_from_slice(&0x20u32.to_le_bytes());
        bytes[s1 + 0x14..s1 + 0x18].copy_from_slice(&0u32.to_le_bytes());

        let mut reader = reader(bytes);
        parse_pe_header(&mut reader).unwrap();
        // All sections at address 0: the overlay offset is the size sum.
        assert_eq!(reader.position(), 0x30);
    }

    #[test]
    fn overlay_past_section_end() {
        let mut bytes = vec![0u8; 0x200];
        bytes[0] = b'M';
        bytes[1] = b'Z';
        bytes[0x3C] = 0x40;
        bytes[0x40..0x44].copy_from_slice(b"PE\0\0");
        bytes[0x46..0x48].copy_from_slice(&1u16.to_le_bytes());
        let s0 = 0x138;
        bytes[s0..s0 + 5].copy_from_slice(b".text");
        bytes[s0 + 0x10..s0 + 0x14].copy_from_slice(&0x20u32.to_le_bytes());
        bytes[s0 + 0x14..s0 + 0x18].copy_from_slice(&0x1C0u32.to_le_bytes());

        let mut reader = reader(bytes);
        parse_pe_header(&mut reader).unwrap();
        assert_eq!(reader.position(), 0x1E0);
    }

    #[test]
    fn force_compat_pins_the_old_era() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&HEADER_UNIC.to_le_bytes());
        bytes.extend_from_slice(&0x0302u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&292u32.to_le_bytes());

        let mut ctx = Context::new(Options {
            force_compat: true,
            ..Options::default()
        });
        let mut reader = reader(bytes);
        parse_game_header(&mut ctx, &mut reader).unwrap();

        assert_eq!(ctx.era, Era::Old);
        assert_eq!(ctx.magic_char, 99);
        // Only the era is pinned; the chunk layout still follows the magic.
        assert!(!ctx.old_game);
        assert!(ctx.unicode);
    }

    #[test]
    fn not_an_exe() {
        let mut reader = reader(vec![0x50, 0x41]);
        let err = parse_pe_header(&mut reader).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidExeSignature);
    }

    #[test]
    fn garbage_is_rejected() {
        let mut ctx = Context::new(Options::default());
        let mut reader = reader(vec![0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 0]);
        let err = parse_game_header(&mut ctx, &mut reader).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidGameSignature);
    }
}
