//! The frame bank: one item per game frame, each an inner stream of
//! sub-chunks terminated by the `last` sentinel.

use tracing::{debug, warn};

use crate::data::Reader;
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::format::chunk::{ChunkEntry, ChunkId};
use crate::format::image::{Palette, Rgba};
use crate::format::strings::StringChunk;
use crate::format::{Context, Progress};

/// What an object instance's parent handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectParentType {
    None,
    Frame,
    FrameItem,
    Qualifier,
    Unknown(u16),
}

impl ObjectParentType {
    fn from_raw(raw: u16) -> Self {
        match raw {
            0 => ObjectParentType::None,
            1 => ObjectParentType::Frame,
            2 => ObjectParentType::FrameItem,
            3 => ObjectParentType::Qualifier,
            other => ObjectParentType::Unknown(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObjectInstance {
    pub info: u16,
    pub handle: u16,
    pub position: (i32, i32),
    pub parent_type: ObjectParentType,
    pub parent_handle: u16,
    pub layer: u16,
    pub unknown: u16,
}

impl ObjectInstance {
    fn read(ctx: &Context, reader: &mut Reader) -> Result<Self> {
        let info = reader.read_u16()?;
        let handle = reader.read_u16()?;
        let position = if ctx.old_game {
            (reader.read_s16()? as i32, reader.read_s16()? as i32)
        } else {
            (reader.read_s32()?, reader.read_s32()?)
        };
        let parent_type = ObjectParentType::from_raw(reader.read_u16()?);
        let parent_handle = reader.read_u16()?;
        let (layer, unknown) = if ctx.old_game {
            (0, 0)
        } else {
            (reader.read_u16()?, reader.read_u16()?)
        };

        Ok(Self {
            info,
            handle,
            position,
            parent_type,
            parent_handle,
            layer,
            unknown,
        })
    }
}

#[derive(Debug)]
pub struct ObjectInstances {
    pub entry: ChunkEntry,
    pub objects: Vec<ObjectInstance>,
}

impl ObjectInstances {
    fn read(ctx: &mut Context, reader: &mut Reader) -> Result<Self> {
        let entry = ChunkEntry::read(ctx, reader)?;
        let body = entry.decode_body(ctx)?;
        let mut body = Reader::new(body);

        let count = body.read_u32().frame("reading object instance count")?;
        let mut objects = Vec::with_capacity(count.min(0x1_0000) as usize);
        for i in 0..count {
            objects.push(
                ObjectInstance::read(ctx, &mut body)
                    .frame_with(|| format!("object instance {}/{count}", i + 1))?,
            );
        }

        Ok(Self { entry, objects })
    }
}

/// The 256-colour palette paletted images resolve through.
#[derive(Debug)]
pub struct FramePalette {
    pub entry: ChunkEntry,
    pub unknown: u32,
    pub colors: Palette,
}

impl FramePalette {
    fn read(ctx: &mut Context, reader: &mut Reader) -> Result<Self> {
        let entry = ChunkEntry::read(ctx, reader)?;
        let body = entry.decode_body(ctx)?;
        let mut body = Reader::new(body);

        let unknown = body.read_u32()?;
        if body.remaining() < 256 * 4 {
            return Err(Error::with(
                ErrorKind::OutOfData,
                format!("palette needs 1024 bytes, {} remaining", body.remaining()),
            ));
        }

        let mut colors = [[0u8; 4]; 256];
        for color in colors.iter_mut() {
            let b = body.read_bytes(4)?;
            *color = [b[0], b[1], b[2], 255];
        }

        Ok(Self {
            entry,
            unknown,
            colors,
        })
    }

    /// The palette laid out as a 16x16 swatch bitmap.
    pub fn image(&self) -> image::RgbaImage {
        let raw: Vec<u8> = self.colors.iter().flatten().copied().collect();
        image::RgbaImage::from_raw(16, 16, raw).unwrap()
    }
}

#[derive(Debug)]
pub struct RandomSeed {
    pub entry: ChunkEntry,
    pub value: i16,
}

impl RandomSeed {
    fn read(ctx: &mut Context, reader: &mut Reader) -> Result<Self> {
        let entry = ChunkEntry::read(ctx, reader)?;
        let body = entry.decode_body(ctx)?;
        let value = Reader::new(body).read_s16().frame("reading random seed")?;
        Ok(Self { entry, value })
    }
}

/// The `frame_handles` table: position of each frame by handle.
#[derive(Debug)]
pub struct FrameHandles {
    pub entry: ChunkEntry,
    pub handles: Vec<u16>,
}

impl FrameHandles {
    pub fn read(ctx: &mut Context, reader: &mut Reader) -> Result<Self> {
        let entry = ChunkEntry::read(ctx, reader)?;
        let body = entry.decode_body(ctx)?;
        let mut body = Reader::new(body);

        let mut handles = Vec::with_capacity(body.len() / 2);
        while body.remaining() >= 2 {
            handles.push(body.read_u16()?);
        }
        Ok(Self { entry, handles })
    }
}

/// One frame: typed sub-chunks where the format is known, preserved entries
/// otherwise.
#[derive(Debug, Default)]
pub struct Frame {
    pub entry: Option<ChunkEntry>,
    pub name: Option<StringChunk>,
    pub header: Option<ChunkEntry>,
    pub password: Option<ChunkEntry>,
    pub palette: Option<FramePalette>,
    pub object_instances: Option<ObjectInstances>,
    pub fade_in_frame: Option<ChunkEntry>,
    pub fade_out_frame: Option<ChunkEntry>,
    pub fade_in: Option<ChunkEntry>,
    pub fade_out: Option<ChunkEntry>,
    pub events: Option<ChunkEntry>,
    pub play_header: Option<ChunkEntry>,
    pub additional_items: Option<ChunkEntry>,
    pub additional_items_instances: Option<ChunkEntry>,
    pub layers: Option<ChunkEntry>,
    pub virtual_size: Option<ChunkEntry>,
    pub demo_file_path: Option<ChunkEntry>,
    pub random_seed: Option<RandomSeed>,
    pub layer_effect: Option<ChunkEntry>,
    pub bluray: Option<ChunkEntry>,
    pub movement_timer_base: Option<ChunkEntry>,
    pub mosaic_image_table: Option<ChunkEntry>,
    pub effects: Option<ChunkEntry>,
    pub iphone_options: Option<ChunkEntry>,
    pub chunk_334c: Option<ChunkEntry>,
    pub end: Option<ChunkEntry>,
}

impl Frame {
    pub fn read(ctx: &mut Context, reader: &mut Reader) -> Result<Self> {
        let entry = ChunkEntry::read(ctx, reader).frame("reading frame")?;

        let mut frame = Frame::default();
        let mut body = Reader::new(entry.body.data.clone());
        frame.entry = Some(entry);

        loop {
            if body.remaining() < 2 {
                break;
            }
            let id = ChunkId(body.peek_u16()?);
            match id {
                ChunkId::FRAME_NAME => {
                    frame.name = Some(StringChunk::read(ctx, &mut body).frame("frame name")?)
                }
                ChunkId::FRAME_HEADER => {
                    frame.header = Some(ChunkEntry::read(ctx, &mut body)?);
                }
                ChunkId::FRAME_PASSWORD => {
                    frame.password = Some(ChunkEntry::read(ctx, &mut body)?);
                }
                ChunkId::FRAME_PALETTE => {
                    frame.palette =
                        Some(FramePalette::read(ctx, &mut body).frame("frame palette")?)
                }
                ChunkId::FRAME_OBJECT_INSTANCES => {
                    frame.object_instances = Some(
                        ObjectInstances::read(ctx, &mut body).frame("frame object instances")?,
                    )
                }
                ChunkId::FRAME_FADE_IN_FRAME => {
                    frame.fade_in_frame = Some(ChunkEntry::read(ctx, &mut body)?);
                }
                ChunkId::FRAME_FADE_OUT_FRAME => {
                    frame.fade_out_frame = Some(ChunkEntry::read(ctx, &mut body)?);
                }
                ChunkId::FRAME_FADE_IN => {
                    frame.fade_in = Some(ChunkEntry::read(ctx, &mut body)?);
                }
                ChunkId::FRAME_FADE_OUT => {
                    frame.fade_out = Some(ChunkEntry::read(ctx, &mut body)?);
                }
                ChunkId::FRAME_EVENTS => {
                    frame.events = Some(ChunkEntry::read(ctx, &mut body)?);
                }
                ChunkId::FRAME_PLAY_HEADER => {
                    frame.play_header = Some(ChunkEntry::read(ctx, &mut body)?);
                }
                ChunkId::FRAME_ADDITIONAL_ITEMS => {
                    frame.additional_items = Some(ChunkEntry::read(ctx, &mut body)?);
                }
                ChunkId::FRAME_ADDITIONAL_ITEMS_INSTANCES => {
                    frame.additional_items_instances = Some(ChunkEntry::read(ctx, &mut body)?);
                }
                ChunkId::FRAME_LAYERS => {
                    frame.layers = Some(ChunkEntry::read(ctx, &mut body)?);
                }
                ChunkId::FRAME_VIRTUAL_SIZE => {
                    frame.virtual_size = Some(ChunkEntry::read(ctx, &mut body)?);
                }
                ChunkId::DEMO_FILE_PATH => {
                    frame.demo_file_path = Some(ChunkEntry::read(ctx, &mut body)?);
                }
                ChunkId::RANDOM_SEED => {
                    frame.random_seed =
                        Some(RandomSeed::read(ctx, &mut body).frame("frame random seed")?)
                }
                ChunkId::FRAME_LAYER_EFFECT => {
                    frame.layer_effect = Some(ChunkEntry::read(ctx, &mut body)?);
                }
                ChunkId::FRAME_BLURAY => {
                    frame.bluray = Some(ChunkEntry::read(ctx, &mut body)?);
                }
                ChunkId::MOVEMENT_TIMER_BASE => {
                    frame.movement_timer_base = Some(ChunkEntry::read(ctx, &mut body)?);
                }
                ChunkId::MOSAIC_IMAGE_TABLE => {
                    frame.mosaic_image_table = Some(ChunkEntry::read(ctx, &mut body)?);
                }
                ChunkId::FRAME_EFFECTS => {
                    frame.effects = Some(ChunkEntry::read(ctx, &mut body)?);
                }
                ChunkId::FRAME_IPHONE_OPTIONS => {
                    frame.iphone_options = Some(ChunkEntry::read(ctx, &mut body)?);
                }
                ChunkId::FRAME_CHUNK_334C => {
                    frame.chunk_334c = Some(ChunkEntry::read(ctx, &mut body)?);
                }
                ChunkId::LAST => {
                    frame.end = Some(ChunkEntry::read(ctx, &mut body)?);
                    break;
                }
                _ => break,
            }
        }

        if !body.is_empty() {
            warn!(leftover = body.remaining(), "bytes left over in a frame item");
        }

        Ok(frame)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_ref().map(|n| n.value.as_str())
    }

    /// The frame's background colour is not stored separately; paletted
    /// decodes use entry 0 when present.
    pub fn background(&self) -> Option<Rgba> {
        self.palette.as_ref().map(|p| p.colors[0])
    }
}

/// The frame bank. Games without a dedicated bank chunk get one synthesised
/// by the walker from bare `frame` chunks; those have no `entry`.
#[derive(Debug, Default)]
pub struct FrameBank {
    pub entry: Option<ChunkEntry>,
    pub items: Vec<Frame>,
    pub warnings: Vec<String>,
}

impl FrameBank {
    pub fn read(ctx: &mut Context, reader: &mut Reader, progress: &Progress) -> Result<Self> {
        let entry = ChunkEntry::read(ctx, reader).frame("reading frame bank")?;
        let mut bank = FrameBank {
            entry: Some(entry),
            ..Default::default()
        };
        bank.read_frames(ctx, reader, progress)?;
        Ok(bank)
    }

    /// Accumulate consecutive `frame` chunks out of `reader`.
    pub fn read_frames(
        &mut self,
        ctx: &mut Context,
        reader: &mut Reader,
        progress: &Progress,
    ) -> Result<()> {
        let start = reader.position();
        while reader.remaining() >= 2 && reader.peek_u16().ok() == Some(ChunkId::FRAME.0) {
            match Frame::read(ctx, reader)
                .frame_with(|| format!("frame {}", self.items.len() + 1))
            {
                Ok(frame) => self.items.push(frame),
                Err(err) => {
                    if !ctx.options.skip_broken_items {
                        return Err(err);
                    }
                    warn!(%err, "stopping frame bank at a broken frame");
                    self.warnings.push(err.to_string());
                    break;
                }
            }
            progress.set_bank_completed(
                (reader.position() - start) as f32 / reader.len().max(1) as f32,
            );
        }
        progress.set_bank_completed(0.0);
        debug!(frames = self.items.len(), "frame bank");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{RefBuf, RefSpan};
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
    fn frame_with_name_instances_and_seed() {
        // frame name "Menu" (utf16), one object instance, a random seed, last.
        let mut ctx = new_era_ctx();
        ctx.unicode = true;

        let name_body: Vec<u8> = "Menu"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .chain([0, 0])
            .collect();

        let mut instances = Vec::new();
        instances.extend_from_slice(&1u32.to_le_bytes());
        instances.extend_from_slice(&7u16.to_le_bytes()); // info
        instances.extend_from_slice(&3u16.to_le_bytes()); // handle
        instances.extend_from_slice(&(-8i32).to_le_bytes());
        instances.extend_from_slice(&16i32.to_le_bytes());
        instances.extend_from_slice(&2u16.to_le_bytes()); // parent: frame item
        instances.extend_from_slice(&5u16.to_le_bytes());
        instances.extend_from_slice(&1u16.to_le_bytes()); // layer
        instances.extend_from_slice(&0u16.to_le_bytes());

        let mut frame_body = Vec::new();
        frame_body.extend_from_slice(&raw_chunk(0x3335, &name_body));
        frame_body.extend_from_slice(&raw_chunk(0x3338, &instances));
        frame_body.extend_from_slice(&raw_chunk(0x3344, &[0x2A, 0x00]));
        frame_body.extend_from_slice(&raw_chunk(0x7F7F, &[]));

        let bytes = raw_chunk(0x3333, &frame_body);
        let mut reader = Reader::new(RefSpan::whole(RefBuf::root(bytes)));
        let frame = Frame::read(&mut ctx, &mut reader).unwrap();

        assert_eq!(frame.name(), Some("Menu"));
        assert_eq!(frame.random_seed.as_ref().unwrap().value, 42);
        let instances = &frame.object_instances.as_ref().unwrap().objects;
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].handle, 3);
        assert_eq!(instances[0].position, (-8, 16));
        assert_eq!(instances[0].parent_type, ObjectParentType::FrameItem);
        assert!(frame.end.is_some());
    }

    #[test]
    fn palette_colors_are_opaque() {
        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_le_bytes());
        for i in 0..256u32 {
            body.extend_from_slice(&[i as u8, 2, 3, 7]);
        }
        let mut frame_body = raw_chunk(0x3337, &body);
        frame_body.extend_from_slice(&raw_chunk(0x7F7F, &[]));
        let bytes = raw_chunk(0x3333, &frame_body);

        let mut ctx = new_era_ctx();
        let mut reader = Reader::new(RefSpan::whole(RefBuf::root(bytes)));
        let frame = Frame::read(&mut ctx, &mut reader).unwrap();
        let palette = frame.palette.unwrap();
        assert_eq!(palette.colors[5], [5, 2, 3, 255]);
        assert_eq!(palette.image().dimensions(), (16, 16));
    }
}
