//! Version-extra chunks: extended header, icon, binary files and the
//! recompiled-game property lists.

use image::RgbaImage;
use tracing::debug;

use crate::data::{Reader, RefSpan};
use crate::error::{Result, ResultExt};
use crate::format::chunk::{ChunkEntry, ItemEntry};
use crate::format::strings;
use crate::format::Context;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BuildFlags: u32 {
        const COMPRESSION_LEVEL_MAX = 1 << 0;
        const COMPRESS_SOUNDS = 1 << 1;
        const INCLUDE_EXTERNAL_FILES = 1 << 2;
        const NO_AUTO_IMAGE_FILTERS = 1 << 3;
        const NO_AUTO_SOUND_FILTERS = 1 << 4;
        const UNKNOWN1 = 1 << 5;
        const UNKNOWN2 = 1 << 6;
        const UNKNOWN3 = 1 << 7;
        const DONT_DISPLAY_BUILD_WARNINGS = 1 << 8;
        const OPTIMIZE_IMAGE_SIZE = 1 << 9;
    }
}

/// The extended header: build type and flags. The image-size optimisation
/// flag switches the image bank to its head-carried entry layout.
#[derive(Debug)]
pub struct ExtendedHeader {
    pub entry: ChunkEntry,
    pub flags: u32,
    pub build_type: u32,
    pub build_flags: BuildFlags,
    pub screen_ratio_tolerance: u16,
    pub screen_angle: u16,
}

impl ExtendedHeader {
    pub fn read(ctx: &mut Context, reader: &mut Reader) -> Result<Self> {
        let entry = ChunkEntry::read(ctx, reader)?;
        let body = entry.decode_body(ctx).frame("reading extended header")?;
        let mut body = Reader::new(body);

        let flags = body.read_u32()?;
        let build_type = body.read_u32()?;
        let build_flags = BuildFlags::from_bits_retain(body.read_u32()?);
        let screen_ratio_tolerance = body.read_u16()?;
        let screen_angle = body.read_u16()?;

        ctx.compat |= build_type >= 0x1000_0000;
        ctx.optimised_images = build_flags.contains(BuildFlags::OPTIMIZE_IMAGE_SIZE)
            && !build_flags.contains(BuildFlags::UNKNOWN3);

        Ok(Self {
            entry,
            flags,
            build_type,
            build_flags,
            screen_ratio_tolerance,
            screen_angle,
        })
    }
}

/// One embedded auxiliary file.
#[derive(Debug)]
pub struct BinaryFile {
    pub name: String,
    pub data: RefSpan,
}

#[derive(Debug)]
pub struct BinaryFiles {
    pub entry: ChunkEntry,
    pub items: Vec<BinaryFile>,
}

impl BinaryFiles {
    pub fn read(ctx: &mut Context, reader: &mut Reader) -> Result<Self> {
        let entry = ChunkEntry::read(ctx, reader)?;
        let body = entry.decode_body(ctx).frame("reading binary files")?;
        let mut body = Reader::new(body);

        let count = body.read_u32()?;
        debug!(count, "binary files");

        let mut items = Vec::with_capacity(count.min(0x1_0000) as usize);
        for i in 0..count {
            let name_len = body
                .read_u16()
                .frame_with(|| format!("binary file {}/{count}", i + 1))?
                as usize;
            let name = if ctx.unicode {
                let mut units = Vec::with_capacity(name_len);
                for _ in 0..name_len {
                    units.push(body.read_u16()?);
                }
                strings::utf16(&units)
            } else {
                strings::latin1(body.read_bytes(name_len)?)
            };
            let data_len = body.read_u32()? as usize;
            let data = body
                .read_ref_span(data_len)
                .frame_with(|| format!("binary file {name:?} data"))?;
            items.push(BinaryFile { name, data });
        }

        Ok(Self { entry, items })
    }
}

/// The application icon: a 16x16 bottom-up paletted bitmap with an AND mask.
#[derive(Debug)]
pub struct Icon {
    pub entry: ChunkEntry,
    pub bitmap: RgbaImage,
}

impl Icon {
    pub fn read(ctx: &mut Context, reader: &mut Reader) -> Result<Self> {
        let entry = ChunkEntry::read(ctx, reader)?;
        let body = entry.decode_body(ctx).frame("reading icon")?;
        let mut body = Reader::new(body);

        let data_begin = body.peek_u32()? as usize;
        body.seek(data_begin).frame("seeking to icon pixels")?;

        let mut palette = [[0u8; 4]; 256];
        for color in palette.iter_mut() {
            let b = body.read_bytes(4)?;
            *color = [b[2], b[1], b[0], 255];
        }

        let mut bitmap = RgbaImage::new(16, 16);
        for y in 0..16u32 {
            for x in 0..16u32 {
                let index = body.read_u8().frame("reading icon indices")?;
                bitmap.put_pixel(x, 15 - y, image::Rgba(palette[index as usize]));
            }
        }

        let mask = body.read_bytes(16 * 16 / 8).frame("reading icon mask")?;
        for (i, byte) in mask.iter().enumerate() {
            for bit in 0..8 {
                if byte & (0x80 >> bit) != 0 {
                    let pixel = i * 8 + bit;
                    let (x, y) = (pixel as u32 % 16, pixel as u32 / 16);
                    bitmap.get_pixel_mut(x, y).0[3] = 0;
                }
            }
        }

        Ok(Self { entry, bitmap })
    }
}

/// A packed run of bare item entries (object properties, also its 2.5+
/// variant). Bodies stay compressed until something asks for an entry.
#[derive(Debug)]
pub struct ItemList {
    pub entry: ChunkEntry,
    pub items: Vec<ItemEntry>,
}

impl ItemList {
    pub fn read(ctx: &mut Context, reader: &mut Reader) -> Result<Self> {
        let entry = ChunkEntry::read(ctx, reader)?;
        let mut body = Reader::new(entry.body.data.clone());

        let mut items = Vec::new();
        while !body.is_empty() {
            items.push(
                ItemEntry::read(ctx, &mut body, false, 0, true)
                    .frame_with(|| format!("property item {}", items.len() + 1))?,
            );
        }

        Ok(Self { entry, items })
    }
}

/// The 16-byte records of chunk 0x2253; only the leading id is understood.
#[derive(Debug)]
pub struct Records2253 {
    pub entry: ChunkEntry,
    pub ids: Vec<u16>,
}

impl Records2253 {
    pub fn read(ctx: &mut Context, reader: &mut Reader) -> Result<Self> {
        let entry = ChunkEntry::read(ctx, reader)?;
        let body = entry.decode_body(ctx)?;
        let mut body = Reader::new(body);

        let mut ids = Vec::new();
        while body.remaining() >= 16 {
            let position = body.position();
            ids.push(body.read_u16()?);
            body.seek(position + 16)?;
        }
        if !body.is_empty() {
            tracing::warn!(leftover = body.remaining(), "data left over after 2253 records");
        }

        Ok(Self { entry, ids })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RefBuf;
    use crate::format::{Era, Options};

    fn new_era_ctx() -> Context {
        let mut ctx = Context::new(Options::default());
        ctx.era = Era::V288;
        ctx.product_build = 290;
        ctx
    }

    fn raw_chunk(id: u16, body: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&id.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&(body.len() as u32).to_le_bytes());
        bytes.extend_from_slice(body);
        bytes
    }

    #[test]
    fn extended_header_gates_optimised_images() {
        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes()); // windows exe
        body.extend_from_slice(&(1u32 << 9).to_le_bytes()); // optimize_image_size
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());

        let mut ctx = new_era_ctx();
        let mut reader = Reader::new(RefSpan::whole(RefBuf::root(raw_chunk(0x2245, &body))));
        let header = ExtendedHeader::read(&mut ctx, &mut reader).unwrap();

        assert!(header.build_flags.contains(BuildFlags::OPTIMIZE_IMAGE_SIZE));
        assert!(ctx.optimised_images);
        assert!(!ctx.compat);
    }

    #[test]
    fn foreign_build_type_raises_compat() {
        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&0x2000_0000u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());

        let mut ctx = new_era_ctx();
        let mut reader = Reader::new(RefSpan::whole(RefBuf::root(raw_chunk(0x2245, &body))));
        ExtendedHeader::read(&mut ctx, &mut reader).unwrap();
        assert!(ctx.compat);
    }

    #[test]
    fn binary_files_roundtrip() {
        let mut body = Vec::new();
        body.extend_from_slice(&1u32.to_le_bytes());
        body.extend_from_slice(&5u16.to_le_bytes());
        body.extend_from_slice(b"a.txt");
        body.extend_from_slice(&3u32.to_le_bytes());
        body.extend_from_slice(&[9, 8, 7]);

        let mut ctx = new_era_ctx();
        let mut reader = Reader::new(RefSpan::whole(RefBuf::root(raw_chunk(0x2238, &body))));
        let files = BinaryFiles::read(&mut ctx, &mut reader).unwrap();
        assert_eq!(files.items.len(), 1);
        assert_eq!(files.items[0].name, "a.txt");
        assert_eq!(files.items[0].data.bytes(), &[9, 8, 7]);
    }

    #[test]
    fn icon_palette_and_mask() {
        let mut body = Vec::new();
        body.extend_from_slice(&4u32.to_le_bytes()); // palette right after this word
        for i in 0..256u32 {
            // Stored BGRX.
            body.extend_from_slice(&[i as u8, 0, 0, 0]);
        }
        body.extend_from_slice(&[1u8; 256]); // all pixels use palette entry 1
        let mut mask = [0u8; 32];
        mask[0] = 0x80; // first mask bit set: pixel (0, 0) transparent
        body.extend_from_slice(&mask);

        let mut ctx = new_era_ctx();
        let mut reader = Reader::new(RefSpan::whole(RefBuf::root(raw_chunk(0x2235, &body))));
        let icon = Icon::read(&mut ctx, &mut reader).unwrap();

        // Palette entry 1 was stored blue-first.
        assert_eq!(icon.bitmap.get_pixel(1, 1).0[..3], [0, 0, 1]);
        assert_eq!(icon.bitmap.get_pixel(0, 0).0[3], 0);
        assert_eq!(icon.bitmap.get_pixel(5, 5).0[3], 255);
    }

    #[test]
    fn records_2253() {
        let mut body = Vec::new();
        for id in [0x1111u16, 0x2222] {
            body.extend_from_slice(&id.to_le_bytes());
            body.extend_from_slice(&[0; 14]);
        }

        let mut ctx = new_era_ctx();
        let mut reader = Reader::new(RefSpan::whole(RefBuf::root(raw_chunk(0x2253, &body))));
        let records = Records2253::read(&mut ctx, &mut reader).unwrap();
        assert_eq!(records.ids, [0x1111, 0x2222]);
    }
}
