//! The object bank: object headers plus their per-type properties.

use tracing::{debug, warn};

use crate::data::Reader;
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::format::chunk::{ChunkEntry, ChunkId};
use crate::format::image::Rgba;
use crate::format::strings::StringChunk;
use crate::format::{read_bank_items, BankItems, Context, Era, Progress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    QuickBackdrop,
    Backdrop,
    Active,
    Text,
    Question,
    Score,
    Lives,
    Counter,
    Rtf,
    SubApplication,
    Player,
    Keyboard,
    Create,
    Timer,
    Game,
    Speaker,
    System,
    Unknown(i16),
}

impl ObjectType {
    pub fn from_raw(raw: i16) -> Self {
        match raw {
            0 => ObjectType::QuickBackdrop,
            1 => ObjectType::Backdrop,
            2 => ObjectType::Active,
            3 => ObjectType::Text,
            4 => ObjectType::Question,
            5 => ObjectType::Score,
            6 => ObjectType::Lives,
            7 => ObjectType::Counter,
            8 => ObjectType::Rtf,
            9 => ObjectType::SubApplication,
            -7 => ObjectType::Player,
            -6 => ObjectType::Keyboard,
            -5 => ObjectType::Create,
            -4 => ObjectType::Timer,
            -3 => ObjectType::Game,
            -2 => ObjectType::Speaker,
            -1 => ObjectType::System,
            other => ObjectType::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeType {
    Line,
    Rectangle,
    Ellipse,
    Unknown(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillType {
    None,
    Solid,
    Gradient,
    Motif,
    Unknown(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradientDirection {
    Horizontal,
    Vertical,
}

/// Shape backing a quick backdrop.
#[derive(Debug, Clone)]
pub struct Shape {
    pub border_size: u16,
    pub border_color: Rgba,
    pub shape: ShapeType,
    pub fill: FillType,
    pub line_inverse_x: bool,
    pub line_inverse_y: bool,
    pub gradient: GradientDirection,
    pub color1: Rgba,
    pub color2: Rgba,
    /// Image handle for motif fills; 0xFFFF otherwise.
    pub handle: u16,
}

impl Shape {
    fn read(reader: &mut Reader) -> Result<Self> {
        let border_size = reader.read_u16()?;
        let b = reader.read_bytes(4)?;
        let border_color = [b[0], b[1], b[2], b[3]];
        let shape = match reader.read_u16()? {
            1 => ShapeType::Line,
            2 => ShapeType::Rectangle,
            3 => ShapeType::Ellipse,
            other => ShapeType::Unknown(other),
        };
        let fill = match reader.read_u16()? {
            0 => FillType::None,
            1 => FillType::Solid,
            2 => FillType::Gradient,
            3 => FillType::Motif,
            other => FillType::Unknown(other),
        };

        let mut result = Self {
            border_size,
            border_color,
            shape,
            fill,
            line_inverse_x: false,
            line_inverse_y: false,
            gradient: GradientDirection::Horizontal,
            color1: [0; 4],
            color2: [0; 4],
            handle: 0xFFFF,
        };

        if shape == ShapeType::Line {
            let line = reader.read_u16()?;
            result.line_inverse_x = line & 1 != 0;
            result.line_inverse_y = line & 2 != 0;
        } else if fill == FillType::Solid {
            let b = reader.read_bytes(4)?;
            result.color1 = [b[0], b[1], b[2], b[3]];
        } else if fill == FillType::Gradient {
            let b = reader.read_bytes(4)?;
            result.color1 = [b[0], b[1], b[2], b[3]];
            let b = reader.read_bytes(4)?;
            result.color2 = [b[0], b[1], b[2], b[3]];
            result.gradient = if reader.read_u16()? & 1 != 0 {
                GradientDirection::Vertical
            } else {
                GradientDirection::Horizontal
            };
        } else if fill == FillType::Motif {
            result.handle = reader.read_u16()?;
        }

        Ok(result)
    }
}

#[derive(Debug)]
pub struct QuickBackdrop {
    pub entry: ChunkEntry,
    pub size: u32,
    pub obstacle: u16,
    pub collision: u16,
    pub dimension: (u32, u32),
    pub shape: Shape,
}

impl QuickBackdrop {
    fn read(ctx: &mut Context, reader: &mut Reader) -> Result<Self> {
        let entry = ChunkEntry::read(ctx, reader)?;
        let body = entry.decode_body(ctx)?;
        let mut body = Reader::new(body);

        let size = body.read_u32()?;
        let obstacle = body.read_u16()?;
        let collision = body.read_u16()?;
        let dimension = if ctx.old_game {
            (body.read_u16()? as u32, body.read_u16()? as u32)
        } else {
            (body.read_u32()?, body.read_u32()?)
        };
        let shape = Shape::read(&mut body).frame("reading quick backdrop shape")?;

        Ok(Self {
            entry,
            size,
            obstacle,
            collision,
            dimension,
            shape,
        })
    }
}

#[derive(Debug)]
pub struct Backdrop {
    pub entry: ChunkEntry,
    pub size: u32,
    pub obstacle: u16,
    pub collision: u16,
    pub dimension: (u32, u32),
    /// Image handle.
    pub handle: u16,
}

impl Backdrop {
    fn read(ctx: &mut Context, reader: &mut Reader) -> Result<Self> {
        let entry = ChunkEntry::read(ctx, reader)?;
        let body = entry.decode_body(ctx)?;
        let mut body = Reader::new(body);

        let size = body.read_u32()?;
        let obstacle = body.read_u16()?;
        let collision = body.read_u16()?;
        let dimension = if ctx.old_game {
            if body.remaining() >= 6 {
                (body.read_u16()? as u32, body.read_u16()? as u32)
            } else {
                (0, 0)
            }
        } else {
            (body.read_u32()?, body.read_u32()?)
        };
        let handle = body.read_u16()?;

        Ok(Self {
            entry,
            size,
            obstacle,
            collision,
            dimension,
            handle,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnimationDirection {
    pub min_speed: u8,
    pub max_speed: u8,
    pub repeat: u16,
    pub back_to: u16,
    /// Image handles, one per animation frame.
    pub handles: Vec<u16>,
}

impl AnimationDirection {
    fn read(reader: &mut Reader) -> Result<Self> {
        if reader.remaining() < 8 {
            return Err(Error::with(
                ErrorKind::OutOfData,
                format!("direction record needs 8 bytes, {} remaining", reader.remaining()),
            ));
        }
        let min_speed = reader.read_u8()?;
        let max_speed = reader.read_u8()?;
        let repeat = reader.read_u16()?;
        let back_to = reader.read_u16()?;
        let handle_count = reader.read_u8()? as usize;
        reader.skip(1)?;

        let mut handles = Vec::with_capacity(handle_count);
        for _ in 0..handle_count {
            handles.push(reader.read_u16().frame("reading direction frame handles")?);
        }

        Ok(Self {
            min_speed,
            max_speed,
            repeat,
            back_to,
            handles,
        })
    }
}

/// A 32-direction table; offsets point into the same sub-region and zero
/// means the direction is absent.
#[derive(Debug, Clone, Default)]
pub struct Animation {
    pub offsets: [u16; 32],
    pub directions: [AnimationDirection; 32],
}

impl Animation {
    fn read(reader: &mut Reader) -> Result<Self> {
        let begin = reader.position();
        let mut animation = Animation::default();

        for index in 0..32 {
            let offset = reader.read_u16()?;
            animation.offsets[index] = offset;

            if offset != 0 {
                let target = begin + offset as usize;
                if target > reader.len() {
                    return Err(Error::with(
                        ErrorKind::OutOfData,
                        format!("direction offset {offset:#x} leaves the animation region"),
                    ));
                }
                let resume = reader.position();
                reader.seek(target)?;
                animation.directions[index] = AnimationDirection::read(reader)
                    .frame_with(|| format!("animation direction {index}"))?;
                reader.seek(resume)?;
            }
        }

        reader.seek(begin + 32 * 2)?;
        Ok(animation)
    }
}

#[derive(Debug, Default)]
pub struct AnimationHeader {
    pub size: u16,
    pub offsets: Vec<u16>,
    pub animations: Vec<Animation>,
}

impl AnimationHeader {
    fn read(reader: &mut Reader) -> Result<Self> {
        let begin = reader.position();

        let size = reader.read_u16()?;
        let offset_count = reader.read_u16()? as usize;
        debug!(offset_count, "animation table");

        let mut header = AnimationHeader {
            size,
            offsets: Vec::with_capacity(offset_count),
            animations: vec![Animation::default(); offset_count],
        };

        for index in 0..offset_count {
            let offset = reader.read_u16()?;
            header.offsets.push(offset);

            if offset != 0 {
                let target = begin + offset as usize;
                if target > reader.len() {
                    return Err(Error::with(
                        ErrorKind::OutOfData,
                        format!("animation offset {offset:#x} leaves the table region"),
                    ));
                }
                let resume = reader.position();
                reader.seek(target)?;
                header.animations[index] = Animation::read(reader)
                    .frame_with(|| format!("animation {index}"))?;
                reader.seek(resume)?;
            }
        }

        reader.seek(begin + size as usize)?;
        Ok(header)
    }
}

/// The `common` properties of active-like objects: an offset table into the
/// same region, whose field order changed at build 284.
#[derive(Debug, Default)]
pub struct CommonProperties {
    pub size: u32,
    pub movements_offset: u16,
    pub animations_offset: u16,
    pub counter_offset: u16,
    pub system_offset: u16,
    pub extension_offset: u16,
    pub values_offset: u16,
    pub strings_offset: u16,
    pub fade_in_offset: u32,
    pub fade_out_offset: u32,
    pub version: u16,
    pub flags: u32,
    pub new_flags: u32,
    pub preferences: u32,
    pub identifier: u32,
    pub back_color: Rgba,
    pub animations: Option<AnimationHeader>,
}

#[derive(Debug)]
pub struct CommonChunk {
    pub entry: ChunkEntry,
    pub common: CommonProperties,
}

impl CommonChunk {
    fn read(ctx: &mut Context, reader: &mut Reader) -> Result<Self> {
        let entry = ChunkEntry::read(ctx, reader)?;
        let body = entry.decode_body(ctx)?;
        let mut body = Reader::new(body);

        let mut common = CommonProperties::default();
        let begin = body.position();

        common.size = body.read_u32()?;
        if body.remaining() < (common.size as usize).saturating_sub(4) {
            return Err(Error::with(
                ErrorKind::OutOfData,
                format!(
                    "common properties declare {} bytes, {} remaining",
                    common.size,
                    body.remaining()
                ),
            ));
        }

        if matches!(ctx.era, Era::V284 | Era::V288 | Era::V290) {
            common.animations_offset = body.read_u16()?;
            common.movements_offset = body.read_u16()?;
            common.version = body.read_u16()?;
            common.counter_offset = body.read_u16()?;
            common.system_offset = body.read_u16()?;
        } else {
            common.movements_offset = body.read_u16()?;
            common.animations_offset = body.read_u16()?;
            common.version = body.read_u16()?;
            common.counter_offset = body.read_u16()?;
            common.system_offset = body.read_u16()?;
        }

        if body.is_empty() {
            return Ok(Self { entry, common });
        }

        common.flags = body.read_u32()?;

        // Qualifier slots; not resolved here.
        body.skip(8 * 2)?;

        if ctx.era == Era::V284 {
            common.system_offset = body.read_u16()?;
        } else {
            common.extension_offset = body.read_u16()?;
        }

        common.values_offset = body.read_u16()?;
        common.strings_offset = body.read_u16()?;
        common.new_flags = body.read_u32()?;
        common.preferences = body.read_u32()?;
        common.identifier = body.read_u32()?;
        let b = body.read_bytes(4)?;
        common.back_color = [b[0], b[1], b[2], b[3]];
        common.fade_in_offset = body.read_u32()?;
        common.fade_out_offset = body.read_u32()?;

        if common.animations_offset > 0 {
            body.seek(begin + common.animations_offset as usize)
                .frame("seeking to the animation table")?;
            common.animations =
                Some(AnimationHeader::read(&mut body).frame("reading animations")?);
        }

        Ok(Self { entry, common })
    }
}

/// Per-type object properties.
#[derive(Debug)]
pub enum ObjectProperties {
    QuickBackdrop(QuickBackdrop),
    Backdrop(Backdrop),
    Common(CommonChunk),
}

#[derive(Debug)]
pub struct ObjectItem {
    pub entry: ChunkEntry,
    pub handle: u16,
    pub object_type: ObjectType,
    pub ink_effect: u32,
    pub ink_effect_param: u32,
    pub name: Option<StringChunk>,
    pub properties: Option<ObjectProperties>,
    pub effect: Option<ChunkEntry>,
    pub end: Option<ChunkEntry>,
}

impl ObjectItem {
    pub fn read(ctx: &mut Context, reader: &mut Reader) -> Result<Self> {
        let entry = ChunkEntry::read(ctx, reader).frame("reading object header")?;
        let body = entry.decode_body(ctx)?;
        let mut body = Reader::new(body);

        let handle = body.read_u16()?;
        let object_type = ObjectType::from_raw(body.read_s16()?);
        let _flags = body.read_u16()?;
        let _unused = body.read_u16()?;
        let ink_effect = body.read_u32()?;
        let ink_effect_param = body.read_u32()?;

        let mut item = Self {
            entry,
            handle,
            object_type,
            ink_effect,
            ink_effect_param,
            name: None,
            properties: None,
            effect: None,
            end: None,
        };

        // Sub-chunks follow in the bank stream. A broken one loses the rest
        // of this object's children, never the object itself.
        if let Err(err) = item.read_children(ctx, reader) {
            warn!(%err, handle, "failed to read object child chunks");
        }

        Ok(item)
    }

    fn read_children(&mut self, ctx: &mut Context, reader: &mut Reader) -> Result<()> {
        loop {
            if reader.remaining() < 2 {
                return Ok(());
            }
            match ChunkId(reader.peek_u16()?) {
                ChunkId::OBJECT_NAME => {
                    self.name = Some(StringChunk::read(ctx, reader).frame("object name")?);
                }
                ChunkId::OBJECT_PROPERTIES => {
                    self.properties = Some(match self.object_type {
                        ObjectType::QuickBackdrop => ObjectProperties::QuickBackdrop(
                            QuickBackdrop::read(ctx, reader).frame("quick backdrop")?,
                        ),
                        ObjectType::Backdrop => ObjectProperties::Backdrop(
                            Backdrop::read(ctx, reader).frame("backdrop")?,
                        ),
                        _ => ObjectProperties::Common(
                            CommonChunk::read(ctx, reader).frame("common properties")?,
                        ),
                    });
                }
                ChunkId::OBJECT_EFFECT => {
                    self.effect = Some(ChunkEntry::read(ctx, reader)?);
                }
                ChunkId::LAST => {
                    self.end = Some(ChunkEntry::read(ctx, reader)?);
                    return Ok(());
                }
                _ => return Ok(()),
            }
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_ref().map(|n| n.value.as_str())
    }

    /// Every image handle this object references, for shell-side export.
    pub fn image_handles(&self) -> Vec<u32> {
        let mut result = Vec::new();
        match &self.properties {
            Some(ObjectProperties::QuickBackdrop(qb)) => {
                if qb.shape.handle != 0xFFFF {
                    result.push(qb.shape.handle as u32);
                }
            }
            Some(ObjectProperties::Backdrop(b)) => {
                if b.handle != 0xFFFF {
                    result.push(b.handle as u32);
                }
            }
            Some(ObjectProperties::Common(c)) => {
                if let Some(animations) = &c.common.animations {
                    for animation in &animations.animations {
                        for direction in &animation.directions {
                            result.extend(direction.handles.iter().map(|&h| h as u32));
                        }
                    }
                }
            }
            None => {}
        }
        result
    }
}

#[derive(Debug)]
pub struct ObjectBank {
    pub entry: ChunkEntry,
    pub items: Vec<ObjectItem>,
    pub warnings: Vec<String>,
}

impl ObjectBank {
    pub fn read(ctx: &mut Context, reader: &mut Reader, progress: &Progress) -> Result<Self> {
        let entry = ChunkEntry::read(ctx, reader).frame("reading object bank")?;

        let mut body = Reader::new(entry.body.data.clone());
        let item_count = body.read_u32()?;
        debug!(item_count, "object bank");

        // The object bank has no tolerance budget of its own.
        let BankItems { items, warnings } = read_bank_items(
            item_count,
            0,
            ctx.options.skip_broken_items,
            |i| {
                let item = ObjectItem::read(ctx, &mut body)
                    .frame_with(|| format!("object item {}/{item_count}", i + 1))?;
                progress.set_bank_completed(body.position() as f32 / body.len().max(1) as f32);
                Ok(item)
            },
        )?;
        progress.set_bank_completed(0.0);

        if !body.is_empty() {
            warn!(leftover = body.remaining(), "bytes left over in the object bank");
        }

        Ok(Self {
            entry,
            items,
            warnings,
        })
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

    fn object_header_body(handle: u16, object_type: i16) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&handle.to_le_bytes());
        body.extend_from_slice(&object_type.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&1u32.to_le_bytes());
        body.extend_from_slice(&2u32.to_le_bytes());
        body
    }

    #[test]
    fn backdrop_object() {
        let mut backdrop = Vec::new();
        backdrop.extend_from_slice(&32u32.to_le_bytes()); // size
        backdrop.extend_from_slice(&1u16.to_le_bytes()); // obstacle
        backdrop.extend_from_slice(&2u16.to_le_bytes()); // collision
        backdrop.extend_from_slice(&64u32.to_le_bytes());
        backdrop.extend_from_slice(&48u32.to_le_bytes());
        backdrop.extend_from_slice(&5u16.to_le_bytes()); // image handle

        let mut stream = raw_chunk(0x4444, &object_header_body(11, 1));
        stream.extend_from_slice(&raw_chunk(0x4446, &backdrop));
        stream.extend_from_slice(&raw_chunk(0x7F7F, &[]));

        let mut ctx = new_era_ctx();
        let mut reader = Reader::new(RefSpan::whole(RefBuf::root(stream)));
        let item = ObjectItem::read(&mut ctx, &mut reader).unwrap();

        assert_eq!(item.handle, 11);
        assert_eq!(item.object_type, ObjectType::Backdrop);
        assert_eq!(item.ink_effect, 1);
        match &item.properties {
            Some(ObjectProperties::Backdrop(b)) => {
                assert_eq!(b.dimension, (64, 48));
                assert_eq!(b.handle, 5);
            }
            other => panic!("expected backdrop properties, got {other:?}"),
        }
        assert_eq!(item.image_handles(), [5]);
        assert!(item.end.is_some());
    }

    #[test]
    fn animation_direction_offsets() {
        // One animation: offset table of 32 u16s, direction 0 at offset 64.
        let mut animation = Vec::new();
        animation.extend_from_slice(&64u16.to_le_bytes());
        animation.extend_from_slice(&[0u8; 62]);
        // Direction record: speeds, repeat, back_to, 2 frames.
        animation.push(1);
        animation.push(8);
        animation.extend_from_slice(&3u16.to_le_bytes());
        animation.extend_from_slice(&0u16.to_le_bytes());
        animation.push(2);
        animation.push(0);
        animation.extend_from_slice(&21u16.to_le_bytes());
        animation.extend_from_slice(&22u16.to_le_bytes());

        let mut reader = Reader::new(RefSpan::whole(RefBuf::root(animation)));
        let animation = Animation::read(&mut reader).unwrap();
        assert_eq!(animation.offsets[0], 64);
        let dir = &animation.directions[0];
        assert_eq!((dir.min_speed, dir.max_speed), (1, 8));
        assert_eq!(dir.repeat, 3);
        assert_eq!(dir.handles, [21, 22]);
        // The cursor lands after the offset table.
        assert_eq!(reader.position(), 64);
    }

    #[test]
    fn out_of_range_animation_offset_is_an_error() {
        let mut animation = Vec::new();
        animation.extend_from_slice(&0x7000u16.to_le_bytes());
        animation.extend_from_slice(&[0u8; 62]);

        let mut reader = Reader::new(RefSpan::whole(RefBuf::root(animation)));
        let err = Animation::read(&mut reader).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfData);
    }
}
