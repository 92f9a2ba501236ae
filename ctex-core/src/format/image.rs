//! The image bank and the pixel codec.
//!
//! Entries keep their compressed bodies; `decode` re-runs the pipeline each
//! time from the still-compressed data, so decoding is pure and nothing is
//! cached by the core.

use image::RgbaImage;
use itertools::Itertools;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::data::{Reader, RefSpan};
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::format::chunk::{ChunkEntry, ChunkId, Encoding, ItemEntry};
use crate::format::{inflate, slack, Context, Progress};

pub type Rgba = [u8; 4];
pub type Palette = [Rgba; 256];

/// Pixel storage format of an image entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphicsMode {
    Rgba32,
    Bgra32,
    Rgb24,
    Bgr24,
    Rgb16,
    Rgb15,
    Rgb8,
    Jpeg,
}

impl GraphicsMode {
    /// Bytes per stored pixel.
    pub fn point_size(self) -> usize {
        match self {
            GraphicsMode::Rgba32 | GraphicsMode::Bgra32 => 4,
            GraphicsMode::Rgb24 | GraphicsMode::Bgr24 => 3,
            GraphicsMode::Rgb16 | GraphicsMode::Rgb15 => 2,
            GraphicsMode::Rgb8 => 1,
            GraphicsMode::Jpeg => 3,
        }
    }

    fn from_metadata(gmode: u8) -> Self {
        match gmode {
            2 | 3 => GraphicsMode::Rgb8,
            4 => GraphicsMode::Bgr24,
            6 => GraphicsMode::Rgb15,
            7 => GraphicsMode::Rgb16,
            8 => GraphicsMode::Bgra32,
            other => {
                warn!(gmode = other, "unknown graphics mode");
                GraphicsMode::Bgr24
            }
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ImageFlags: u8 {
        const RLE = 1 << 0;
        const RLEW = 1 << 1;
        const RLET = 1 << 2;
        const LZX = 1 << 3;
        const ALPHA = 1 << 4;
        const ACE = 1 << 5;
        const MAC = 1 << 6;
        const RGBA = 1 << 7;
    }
}

fn read_color(reader: &mut Reader, mode: GraphicsMode, palette: Option<&Palette>) -> Result<Rgba> {
    Ok(match mode {
        GraphicsMode::Rgba32 => {
            let b = reader.read_bytes(4)?;
            [b[0], b[1], b[2], b[3]]
        }
        GraphicsMode::Bgra32 => {
            let b = reader.read_bytes(4)?;
            [b[2], b[1], b[0], b[3]]
        }
        GraphicsMode::Rgb24 => {
            let b = reader.read_bytes(3)?;
            [b[0], b[1], b[2], 255]
        }
        GraphicsMode::Rgb16 => {
            let v = reader.read_u16()?;
            [
                ((v & 0xF800) >> 8) as u8,
                ((v & 0x07E0) >> 3) as u8,
                ((v & 0x001F) << 3) as u8,
                255,
            ]
        }
        GraphicsMode::Rgb15 => {
            let v = reader.read_u16()?;
            [
                ((v & 0x7C00) >> 7) as u8,
                ((v & 0x03E0) >> 2) as u8,
                ((v & 0x001F) << 3) as u8,
                255,
            ]
        }
        GraphicsMode::Rgb8 => {
            let i = reader.read_u8()?;
            match palette {
                Some(palette) => palette[i as usize],
                // Grey ramp when no palette is in scope.
                None => [i, i, i, 255],
            }
        }
        GraphicsMode::Bgr24 | GraphicsMode::Jpeg => {
            let b = reader.read_bytes(3)?;
            [b[2], b[1], b[0], 255]
        }
    })
}

/// RLE stream: command 0 ends, (128, 255] copies distinct pixels, [1, 128]
/// repeats one pixel. Padded row positions are consumed but not emitted.
fn read_rle(
    reader: &mut Reader,
    pixels: &mut [Rgba],
    width: usize,
    mode: GraphicsMode,
    padding: usize,
    palette: Option<&Palette>,
) -> Result<usize> {
    let point_size = mode.point_size();
    let start = reader.position();
    let mut pos = 0usize;
    let mut i = 0usize;

    loop {
        let command = reader.read_u8()?;
        if command == 0 {
            break;
        }

        if command > 128 {
            for _ in 0..command - 128 {
                if pos % (width + padding) < width {
                    let color = read_color(reader, mode, palette)?;
                    if i < pixels.len() {
                        pixels[i] = color;
                        i += 1;
                    }
                } else {
                    reader.skip(point_size)?;
                }
                pos += 1;
            }
        } else {
            let color = read_color(reader, mode, palette)?;
            for _ in 0..command {
                if pos % (width + padding) < width && i < pixels.len() {
                    pixels[i] = color;
                    i += 1;
                }
                pos += 1;
            }
        }
    }

    if i != pixels.len() {
        warn!(filled = i, total = pixels.len(), "RLE stream filled a partial bitmap");
    }

    Ok(reader.position() - start)
}

/// Straight rows: `width` pixels then `padding` slack bytes per row.
fn read_rgb(
    reader: &mut Reader,
    pixels: &mut [Rgba],
    width: usize,
    mode: GraphicsMode,
    padding: usize,
    palette: Option<&Palette>,
) -> Result<usize> {
    let point_size = mode.point_size();
    let height = pixels.len() / width.max(1);
    let needed = (width * point_size + padding) * height;
    if reader.remaining() < needed {
        return Err(Error::with(
            ErrorKind::OutOfData,
            format!("pixel rows need {needed} bytes, {} remaining", reader.remaining()),
        ));
    }

    let start = reader.position();
    for row in pixels.chunks_mut(width) {
        for px in row {
            *px = read_color(reader, mode, palette)?;
        }
        reader.skip(padding)?;
    }
    Ok(reader.position() - start)
}

fn read_alpha(reader: &mut Reader, pixels: &mut [Rgba], width: usize, padding: usize) -> Result<()> {
    let height = pixels.len() / width.max(1);
    let stride = width + padding;
    let plane = reader
        .read_bytes(stride * height)
        .frame("reading alpha plane")?;

    for (src_row, dst_row) in plane.chunks(stride).zip_eq(pixels.chunks_mut(width)) {
        for (a, px) in src_row[..width].iter().zip(dst_row) {
            px[3] = *a;
        }
    }
    Ok(())
}

/// Colour-key transparency: pixels matching the key RGB take the key's
/// alpha, everything else becomes opaque. Applying this twice is a no-op.
fn apply_color_key(pixels: &mut [Rgba], key: Rgba) {
    for px in pixels {
        px[3] = if px[0] == key[0] && px[1] == key[1] && px[2] == key[2] {
            key[3]
        } else {
            255
        };
    }
}

/// One image-bank entry.
#[derive(Debug, Clone)]
pub struct ImageItem {
    pub entry: ItemEntry,
    pub checksum: u32,
    pub reference: u32,
    pub data_size: u32,
    pub width: u16,
    pub height: u16,
    pub graphics_mode: GraphicsMode,
    pub flags: ImageFlags,
    pub unknown: u16,
    pub hotspot: (u16, u16),
    pub action: (u16, u16),
    pub transparent: Rgba,
    /// Offset of the pixel stream inside the decoded body.
    pub data_position: usize,
    /// Slack bytes per colour row.
    pub padding: u16,
    /// Slack bytes per alpha row.
    pub alpha_padding: u16,
}

impl ImageItem {
    pub fn read(ctx: &Context, reader: &mut Reader) -> Result<Self> {
        let start = reader.position();

        let mut item = if ctx.ccn {
            let entry = ItemEntry::read(ctx, reader, true, 10, true)?;
            Self::from_ccn_entry(ctx, entry)?
        } else if ctx.optimised_images {
            Self::read_optimised(ctx, reader, start)?
        } else {
            let entry = ItemEntry::read(ctx, reader, true, 0, true)?;
            Self::from_plain_entry(ctx, entry)?
        };

        item.fix_padding(ctx);
        Ok(item)
    }

    fn from_ccn_entry(ctx: &Context, mut entry: ItemEntry) -> Result<Self> {
        let gmode = (entry.handle >> 16) as u16;
        let (graphics_mode, flags) = match gmode {
            0 => (GraphicsMode::Rgba32, ImageFlags::empty()),
            3 => (GraphicsMode::Rgb24, ImageFlags::empty()),
            5 => (GraphicsMode::Jpeg, ImageFlags::empty()),
            other => {
                warn!(gmode = other, "unknown ccn graphics mode");
                (GraphicsMode::Rgba32, ImageFlags::empty())
            }
        };

        if !ctx.old_game && ctx.product_build >= 284 {
            entry.handle = entry.handle.wrapping_sub(1);
        }

        let mut head = Reader::new(entry.head.data.clone());
        let _unk1 = head.read_u16().frame("reading ccn image head")?;
        let width = head.read_u16()?;
        let height = head.read_u16()?;
        let _unk2 = head.read_u16()?;
        let _unk3 = head.read_u16()?;

        Ok(Self {
            entry,
            checksum: 0,
            reference: 0,
            data_size: 0,
            width,
            height,
            graphics_mode,
            flags,
            unknown: 0,
            hotspot: (0, 0),
            action: (0, 0),
            transparent: [0, 0, 0, 255],
            data_position: 0,
            padding: 0,
            alpha_padding: 0,
        })
    }

    /// Optimised builds carry the whole metadata record in a 0x24-byte head;
    /// the bare pixel body follows with its size taken from that head.
    fn read_optimised(ctx: &Context, reader: &mut Reader, start: usize) -> Result<Self> {
        let mut entry = ItemEntry::default();
        entry.read_head(ctx, reader, 0x24, true)?;

        let head = entry.decode_head(ctx, 0x24)?;
        if head.len() < 0x24 {
            return Err(Error::with(
                ErrorKind::OutOfData,
                "optimised image head shorter than 0x24 bytes",
            ));
        }
        let mut item = Self::parse_metadata(ctx, entry, &head, true)?;

        item.entry
            .read_body(ctx, reader, false, Some(item.data_size as usize))?;
        item.data_position = 0;

        let end = reader.position();
        reader.seek(start)?;
        item.entry.ref_span = reader.read_ref_span(end - start)?;
        Ok(item)
    }

    fn from_plain_entry(ctx: &Context, mut entry: ItemEntry) -> Result<Self> {
        if !ctx.old_game && ctx.product_build >= 284 {
            entry.handle = entry.handle.wrapping_sub(1);
        }

        let metadata_size = 176 + if ctx.old_game { 16 } else { 80 };
        let span = entry.decode_body_bounded(ctx, metadata_size)?;
        Self::parse_metadata(ctx, entry, &span, false)
    }

    fn parse_metadata(
        ctx: &Context,
        entry: ItemEntry,
        span: &RefSpan,
        optimised: bool,
    ) -> Result<Self> {
        let mut strm = Reader::new(span.clone());

        let checksum = if ctx.old_game {
            strm.read_u16().frame("reading image checksum")? as u32
        } else {
            strm.read_u32().frame("reading image checksum")?
        };
        let reference = strm.read_u32()?;
        if optimised {
            strm.skip(4)?;
        }
        let data_size = strm.read_u32()?;
        let width = strm.read_u16()?;
        let height = strm.read_u16()?;
        let graphics_mode = GraphicsMode::from_metadata(strm.read_u8()?);
        let flags = ImageFlags::from_bits_retain(strm.read_u8()?);
        let unknown = if ctx.old_game { 0 } else { strm.read_u16()? };
        let hotspot = (strm.read_u16()?, strm.read_u16()?);
        let action = (strm.read_u16()?, strm.read_u16()?);
        let transparent = if ctx.old_game {
            [0, 0, 0, 255]
        } else {
            let b = strm.read_bytes(4)?;
            [b[0], b[1], b[2], b[3]]
        };

        Ok(Self {
            data_position: strm.position(),
            entry,
            checksum,
            reference,
            data_size,
            width,
            height,
            graphics_mode,
            flags,
            unknown,
            hotspot,
            action,
            transparent,
            padding: 0,
            alpha_padding: 0,
        })
    }

    fn fix_padding(&mut self, ctx: &Context) {
        let w = self.width as usize;
        let rlet = self.flags.contains(ImageFlags::RLET);
        let optimised = ctx.optimised_images;

        self.padding = match self.graphics_mode {
            GraphicsMode::Rgba32 | GraphicsMode::Bgra32 => 0,
            GraphicsMode::Rgb16 | GraphicsMode::Rgb15 => 0,
            GraphicsMode::Jpeg => 0,
            GraphicsMode::Rgb24 | GraphicsMode::Bgr24 => {
                if rlet || optimised {
                    ((w * 3) % 2) as u16
                } else if ctx.ccn {
                    slack(w * 3, 4) as u16
                } else if ctx.old_game || ctx.product_build < 280 {
                    (((w * 3) % 2) * 3) as u16
                } else {
                    ((w % 2) * 3) as u16
                }
            }
            GraphicsMode::Rgb8 => {
                if ctx.ccn {
                    slack(w, 4) as u16
                } else {
                    (w % 2) as u16
                }
            }
        };

        self.alpha_padding = if ctx.ccn { 0 } else { slack(w, 4) as u16 };
    }

    pub fn need_palette(&self) -> bool {
        self.graphics_mode == GraphicsMode::Rgb8
    }

    /// The decoded pixel stream (after the LZX layer, before pixel decode).
    pub fn image_data(&self, ctx: &Context) -> Result<RefSpan> {
        let span = self.entry.decode_body(ctx).frame("reading image data")?;
        let mut strm = Reader::new(span);
        strm.seek(self.data_position)?;

        if self.flags.contains(ImageFlags::LZX) && self.entry.mode != Encoding::Lz4 {
            let _decompressed = strm.read_u32().frame("reading LZX size prefix")?;
            let compressed_len = strm.read_u32()? as usize;
            let compressed = strm
                .read_ref_span(compressed_len)
                .frame("reading LZX payload")?;
            Ok(inflate::inflate_span(&compressed, false, false, usize::MAX)
                .unwrap_or(compressed))
        } else {
            Ok(strm.read_remaining_ref_span(usize::MAX))
        }
    }

    /// Decode to a 32-bit RGBA bitmap of exactly `width` x `height`.
    pub fn decode(
        &self,
        ctx: &Context,
        color_transparent: bool,
        palette: Option<&Palette>,
    ) -> Result<RgbaImage> {
        let span = self.image_data(ctx).frame("decoding image")?;
        let width = self.width as usize;
        let height = self.height as usize;

        if self.graphics_mode == GraphicsMode::Jpeg {
            let decoded =
                image::load_from_memory_with_format(span.bytes(), image::ImageFormat::Jpeg)
                    .map_err(|e| {
                        Error::with(ErrorKind::InvalidChunk, format!("jpeg decode failed: {e}"))
                    })?
                    .to_rgba8();
            if decoded.width() != self.width as u32 || decoded.height() != self.height as u32 {
                return Err(Error::with(
                    ErrorKind::InvalidChunk,
                    format!(
                        "jpeg decoded to {}x{}, entry declares {}x{}",
                        decoded.width(),
                        decoded.height(),
                        self.width,
                        self.height
                    ),
                ));
            }
            return Ok(decoded);
        }

        if self.need_palette() && palette.is_none() {
            warn!(
                handle = self.entry.handle,
                "paletted image decoded without a frame palette; using a grey ramp"
            );
        }

        if width == 0 || height == 0 {
            return Ok(RgbaImage::new(self.width as u32, self.height as u32));
        }

        let mut pixels = vec![[0u8; 4]; width * height];
        let mut strm = Reader::new(span);

        if self
            .flags
            .intersects(ImageFlags::RLE | ImageFlags::RLEW | ImageFlags::RLET)
        {
            read_rle(
                &mut strm,
                &mut pixels,
                width,
                self.graphics_mode,
                self.padding as usize,
                palette,
            )
            .frame("reading RLE pixel stream")?;
        } else {
            read_rgb(
                &mut strm,
                &mut pixels,
                width,
                self.graphics_mode,
                self.padding as usize,
                palette,
            )
            .frame("reading pixel rows")?;
        }

        if self.flags.contains(ImageFlags::RGBA) {
            // Alpha arrived with the colour channels.
        } else if self.flags.contains(ImageFlags::ALPHA) {
            read_alpha(&mut strm, &mut pixels, width, self.alpha_padding as usize)?;
        } else if color_transparent {
            apply_color_key(&mut pixels, self.transparent);
        } else {
            for px in &mut pixels {
                px[3] = 255;
            }
        }

        if !strm.is_empty() {
            debug!(leftover = strm.remaining(), "bytes left over in image data");
        }

        let raw: Vec<u8> = pixels.into_iter().flatten().collect();
        Ok(RgbaImage::from_raw(self.width as u32, self.height as u32, raw).unwrap())
    }
}

/// The image bank: a count-prefixed run of image items.
#[derive(Debug)]
pub struct ImageBank {
    pub entry: ChunkEntry,
    pub items: Vec<ImageItem>,
    pub end: Option<ChunkEntry>,
    /// Per-item failures tolerated under the fail budget.
    pub warnings: Vec<String>,
}

impl ImageBank {
    pub fn read(ctx: &mut Context, reader: &mut Reader, progress: &Progress) -> Result<Self> {
        let entry = ChunkEntry::read(ctx, reader).frame("reading image bank")?;

        let mut body = Reader::new(entry.body.data.clone());
        let item_count = if ctx.ccn {
            let _unknown = body.read_u16()?;
            body.read_u16()? as u32
        } else {
            body.read_u32()?
        };
        debug!(item_count, "image bank");

        let crate::format::BankItems { items, warnings } = crate::format::read_bank_items(
            item_count,
            ctx.options.max_item_read_fails,
            ctx.options.skip_broken_items,
            |i| {
                let item = ImageItem::read(ctx, &mut body)
                    .frame_with(|| format!("image item {}/{item_count}", i + 1))?;
                progress.set_bank_completed(body.position() as f32 / body.len().max(1) as f32);
                Ok(item)
            },
        )?;
        progress.set_bank_completed(0.0);

        if !body.is_empty() {
            warn!(leftover = body.remaining(), "bytes left over in the image bank");
        }

        let end = if reader.remaining() >= 2
            && reader.peek_u16().ok() == Some(ChunkId::IMAGE_HANDLES.0)
        {
            Some(ChunkEntry::read(ctx, reader)?)
        } else {
            None
        };

        Ok(Self {
            entry,
            items,
            end,
            warnings,
        })
    }

    /// Decode every entry, optionally fanning out across a thread pool. Each
    /// entry is independent once parsed, so this is a pure data-parallel map.
    pub fn decode_all(
        &self,
        ctx: &Context,
        color_transparent: bool,
        palette: Option<&Palette>,
        parallel: bool,
    ) -> Vec<Result<RgbaImage>> {
        if parallel {
            self.items
                .par_iter()
                .map(|item| item.decode(ctx, color_transparent, palette))
                .collect()
        } else {
            self.items
                .iter()
                .map(|item| item.decode(ctx, color_transparent, palette))
                .collect()
        }
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

    fn item_with(
        width: u16,
        height: u16,
        mode: GraphicsMode,
        flags: ImageFlags,
        transparent: Rgba,
        body: Vec<u8>,
    ) -> (Context, ImageItem) {
        let ctx = new_era_ctx();
        let entry = ItemEntry {
            body: crate::format::chunk::DataPoint {
                data: RefSpan::whole(RefBuf::root(body)),
                expected_size: 0,
            },
            ..Default::default()
        };
        let item = ImageItem {
            entry,
            checksum: 0,
            reference: 0,
            data_size: 0,
            width,
            height,
            graphics_mode: mode,
            flags,
            unknown: 0,
            hotspot: (0, 0),
            action: (0, 0),
            transparent,
            data_position: 0,
            padding: 0,
            alpha_padding: 0,
        };
        (ctx, item)
    }

    #[test]
    fn rle_rgb24_decode() {
        // Two runs of two pixels: red then green.
        let body = vec![0x02, 0xFF, 0x00, 0x00, 0x02, 0x00, 0xFF, 0x00, 0x00];
        let (ctx, item) = item_with(
            2,
            2,
            GraphicsMode::Rgb24,
            ImageFlags::RLE,
            [0, 0, 0, 0],
            body,
        );
        let img = item.decode(&ctx, false, None).unwrap();
        let px: Vec<_> = img.pixels().map(|p| p.0).collect();
        assert_eq!(
            px,
            [
                [255, 0, 0, 255],
                [255, 0, 0, 255],
                [0, 255, 0, 255],
                [0, 255, 0, 255]
            ]
        );
    }

    #[test]
    fn color_key_transparency() {
        let body = vec![10, 20, 30, 50, 0, 0, 0, 50];
        let (ctx, item) = item_with(
            1,
            2,
            GraphicsMode::Rgba32,
            ImageFlags::empty(),
            [0, 0, 0, 99],
            body,
        );
        let img = item.decode(&ctx, true, None).unwrap();
        let px: Vec<_> = img.pixels().map(|p| p.0).collect();
        assert_eq!(px, [[10, 20, 30, 255], [0, 0, 0, 99]]);
    }

    #[test]
    fn color_key_is_idempotent() {
        let mut pixels = vec![[10, 20, 30, 50], [0, 0, 0, 50], [7, 7, 7, 0]];
        apply_color_key(&mut pixels, [0, 0, 0, 99]);
        let once = pixels.clone();
        apply_color_key(&mut pixels, [0, 0, 0, 99]);
        assert_eq!(pixels, once);
    }

    #[test]
    fn paletted_without_palette_is_a_grey_ramp() {
        let body = vec![0u8, 128, 255, 7];
        let (ctx, item) = item_with(
            2,
            2,
            GraphicsMode::Rgb8,
            ImageFlags::empty(),
            [0, 0, 0, 0],
            body,
        );
        let img = item.decode(&ctx, false, None).unwrap();
        let px: Vec<_> = img.pixels().map(|p| p.0).collect();
        assert_eq!(
            px,
            [
                [0, 0, 0, 255],
                [128, 128, 128, 255],
                [255, 255, 255, 255],
                [7, 7, 7, 255]
            ]
        );
    }

    #[test]
    fn paletted_with_palette() {
        let mut palette = [[0u8; 4]; 256];
        palette[1] = [10, 20, 30, 255];
        palette[2] = [40, 50, 60, 255];

        let body = vec![1u8, 2];
        let (ctx, item) = item_with(
            2,
            1,
            GraphicsMode::Rgb8,
            ImageFlags::empty(),
            [0, 0, 0, 0],
            body,
        );
        let img = item.decode(&ctx, false, Some(&palette)).unwrap();
        let px: Vec<_> = img.pixels().map(|p| p.0).collect();
        assert_eq!(px, [[10, 20, 30, 255], [40, 50, 60, 255]]);
    }

    #[test]
    fn alpha_plane_with_row_slack() {
        // 2x2 RGB24 with an alpha plane padded to 4-byte rows.
        let mut body = Vec::new();
        for _ in 0..4 {
            body.extend_from_slice(&[1, 2, 3]);
        }
        body.extend_from_slice(&[100, 101, 0xEE, 0xEE]); // row 0 + slack
        body.extend_from_slice(&[102, 103, 0xEE, 0xEE]); // row 1 + slack
        let (ctx, mut item) = item_with(
            2,
            2,
            GraphicsMode::Rgb24,
            ImageFlags::ALPHA,
            [0, 0, 0, 0],
            body,
        );
        item.alpha_padding = 2;
        let img = item.decode(&ctx, false, None).unwrap();
        let alphas: Vec<_> = img.pixels().map(|p| p.0[3]).collect();
        assert_eq!(alphas, [100, 101, 102, 103]);
    }

    #[test]
    fn row_padding_is_skipped() {
        // 1x2 RGB24 rows with 3 bytes of slack each (old-era odd width).
        let body = vec![
            1, 2, 3, 0xEE, 0xEE, 0xEE, //
            4, 5, 6, 0xEE, 0xEE, 0xEE,
        ];
        let (ctx, mut item) = item_with(
            1,
            2,
            GraphicsMode::Rgb24,
            ImageFlags::empty(),
            [0, 0, 0, 0],
            body,
        );
        item.padding = 3;
        let img = item.decode(&ctx, false, None).unwrap();
        let px: Vec<_> = img.pixels().map(|p| p.0).collect();
        assert_eq!(px, [[1, 2, 3, 255], [4, 5, 6, 255]]);
    }

    #[test]
    fn padding_rules_per_mode() {
        let mut ctx = new_era_ctx();
        let (_, mut item) = item_with(
            3,
            1,
            GraphicsMode::Rgb24,
            ImageFlags::empty(),
            [0, 0, 0, 0],
            vec![],
        );

        // build >= 280, new, not optimised: (width % 2) * 3.
        item.fix_padding(&ctx);
        assert_eq!(item.padding, 3);
        assert_eq!(item.alpha_padding, 1);

        // Old era: ((width * 3) % 2) * 3.
        ctx.old_game = true;
        item.fix_padding(&ctx);
        assert_eq!(item.padding, 3);

        // ccn: slack(width * 3, 4).
        ctx.old_game = false;
        ctx.ccn = true;
        item.fix_padding(&ctx);
        assert_eq!(item.padding, 3);
        assert_eq!(item.alpha_padding, 0);

        // RLET wins over everything: (width * 3) % 2.
        ctx.ccn = false;
        item.flags = ImageFlags::RLET;
        item.fix_padding(&ctx);
        assert_eq!(item.padding, 1);

        // 16-bit modes never pad.
        item.flags = ImageFlags::empty();
        item.graphics_mode = GraphicsMode::Rgb16;
        item.fix_padding(&ctx);
        assert_eq!(item.padding, 0);

        // RGB8 pads to width parity.
        item.graphics_mode = GraphicsMode::Rgb8;
        item.fix_padding(&ctx);
        assert_eq!(item.padding, 1);
    }

    #[test]
    fn decode_is_pure() {
        let body = vec![0x02, 0xFF, 0x00, 0x00, 0x02, 0x00, 0xFF, 0x00, 0x00];
        let (ctx, item) = item_with(
            2,
            2,
            GraphicsMode::Rgb24,
            ImageFlags::RLE,
            [0, 0, 0, 0],
            body,
        );
        let a = item.decode(&ctx, false, None).unwrap();
        let b = item.decode(&ctx, false, None).unwrap();
        assert_eq!(a.as_raw(), b.as_raw());
    }
}
