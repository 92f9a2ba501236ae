//! The top-level walk: one pass over the chunk stream into a typed [`Game`].

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::data::{Reader, RefBuf, RefPtr, RefSpan};
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::format::chunk::{ChunkEntry, ChunkId};
use crate::format::container::{self, ContainerHeader, PackFile, ProductCode};
use crate::format::extras::{BinaryFiles, ExtendedHeader, Icon, ItemList, Records2253};
use crate::format::font::FontBank;
use crate::format::frame::{Frame, FrameBank, FrameHandles};
use crate::format::image::{ImageBank, ImageItem, Palette};
use crate::format::object::{ObjectBank, ObjectItem};
use crate::format::sound::{MusicBank, SoundBank};
use crate::format::strings::{StringChunk, StringsChunk};
use crate::format::{Context, Era, Options, Progress};

/// The typed chunk tree under the `header` chunk. Recognized chunks get
/// their specialized parse; everything else is preserved in stream order.
#[derive(Debug, Default)]
pub struct GameHeader {
    pub entry: Option<ChunkEntry>,

    pub title: Option<StringChunk>,
    pub author: Option<StringChunk>,
    pub copyright: Option<StringChunk>,
    pub about: Option<StringChunk>,
    pub project_path: Option<StringChunk>,
    pub output_path: Option<StringChunk>,

    pub vitalise_preview: Option<ChunkEntry>,
    pub menu: Option<ChunkEntry>,
    pub extra_path: Option<ChunkEntry>,
    pub extensions: Option<ChunkEntry>,
    pub extra_data: Option<ChunkEntry>,
    pub additional_extensions: Option<ChunkEntry>,
    pub app_doc: Option<ChunkEntry>,
    pub other_extension: Option<ChunkEntry>,
    pub extensions_list: Option<ChunkEntry>,
    pub icon: Option<Icon>,
    pub demo_version: Option<ChunkEntry>,
    pub security_number: Option<ChunkEntry>,
    pub binary_files: Option<BinaryFiles>,
    pub menu_images: Option<ChunkEntry>,
    pub movement_extensions: Option<ChunkEntry>,
    pub exe_only: Option<ChunkEntry>,
    pub protection: Option<ChunkEntry>,
    pub shaders: Option<ChunkEntry>,
    pub shaders2: Option<ChunkEntry>,
    pub extended_header: Option<ExtendedHeader>,
    pub spacer: Option<ChunkEntry>,
    pub chunk_224f: Option<ChunkEntry>,
    pub title2: Option<ChunkEntry>,

    pub global_events: Option<ChunkEntry>,
    pub global_strings: Option<ChunkEntry>,
    pub global_string_names: Option<ChunkEntry>,
    pub global_values: Option<ChunkEntry>,
    pub global_value_names: Option<ChunkEntry>,
    pub fusion_3_seed: Option<ChunkEntry>,

    pub frame_handles: Option<FrameHandles>,
    pub frame_bank: Option<FrameBank>,
    pub object_bank: Option<ObjectBank>,
    pub image_bank: Option<ImageBank>,
    pub sound_bank: Option<SoundBank>,
    pub music_bank: Option<MusicBank>,
    pub font_bank: Option<FontBank>,

    // Recompiled / 2.5+ side chunks.
    pub records_2253: Option<Records2253>,
    pub object_names: Option<StringsChunk>,
    pub chunk_2255: Option<ChunkEntry>,
    pub two_five_plus_object_properties: Option<ItemList>,
    pub chunk_2257: Option<ChunkEntry>,
    pub object_properties: Option<ItemList>,
    pub truetype_fonts_meta: Option<ChunkEntry>,
    pub truetype_fonts: Option<ChunkEntry>,

    pub unknown_chunks: Vec<ChunkEntry>,
    pub last: Option<ChunkEntry>,
}

impl GameHeader {
    pub fn read(ctx: &mut Context, reader: &mut Reader, progress: &Progress) -> Result<Self> {
        let mut header = GameHeader {
            entry: Some(ChunkEntry::read(ctx, reader).frame("reading the header chunk")?),
            ..Default::default()
        };

        macro_rules! keep {
            ($field:ident) => {
                header.$field = Some(ChunkEntry::read(ctx, reader)?)
            };
        }

        let mut previous_pos = usize::MAX;
        loop {
            if progress.is_cancelled() {
                return Err(Error::with(ErrorKind::InvalidState, "parse cancelled"));
            }
            progress.set_completed(reader.position() as f32 / reader.len().max(1) as f32);

            if reader.position() == previous_pos {
                return Err(Error::with(
                    ErrorKind::InvalidState,
                    format!(
                        "last read chunk didn't move the stream head at {:#x}",
                        reader.position()
                    ),
                ));
            }
            previous_pos = reader.position();

            let child = ChunkId(reader.peek_u16().frame("peeking the next chunk id")?);
            match child {
                ChunkId::TITLE => {
                    let chunk = StringChunk::read(ctx, reader)?;
                    ctx.key_source.title = Some(chunk.value.clone());
                    header.title = Some(chunk);
                }
                ChunkId::AUTHOR => header.author = Some(StringChunk::read(ctx, reader)?),
                ChunkId::COPYRIGHT => {
                    let chunk = StringChunk::read(ctx, reader)?;
                    ctx.key_source.copyright = Some(chunk.value.clone());
                    header.copyright = Some(chunk);
                }
                ChunkId::ABOUT => header.about = Some(StringChunk::read(ctx, reader)?),
                ChunkId::PROJECT_PATH => {
                    let chunk = StringChunk::read(ctx, reader)?;
                    ctx.key_source.project_path = Some(chunk.value.clone());
                    header.project_path = Some(chunk);
                }
                ChunkId::OUTPUT_PATH => {
                    header.output_path = Some(StringChunk::read(ctx, reader)?)
                }

                ChunkId::VITALISE_PREVIEW => keep!(vitalise_preview),
                ChunkId::MENU => keep!(menu),
                ChunkId::EXTRA_PATH => keep!(extra_path),
                ChunkId::EXTENSIONS => keep!(extensions),
                ChunkId::EXTRA_DATA => keep!(extra_data),
                ChunkId::ADDITIONAL_EXTENSIONS => keep!(additional_extensions),
                ChunkId::APP_DOC => keep!(app_doc),
                ChunkId::OTHER_EXTENSION => keep!(other_extension),
                ChunkId::EXTENSIONS_LIST => keep!(extensions_list),
                ChunkId::ICON => header.icon = Some(Icon::read(ctx, reader)?),
                ChunkId::DEMO_VERSION => keep!(demo_version),
                ChunkId::SECURITY_NUMBER => keep!(security_number),
                ChunkId::BINARY_FILES => {
                    header.binary_files = Some(BinaryFiles::read(ctx, reader)?)
                }
                ChunkId::MENU_IMAGES => keep!(menu_images),
                ChunkId::MOVEMENT_EXTENSIONS => keep!(movement_extensions),
                ChunkId::EXE_ONLY => keep!(exe_only),
                ChunkId::PROTECTION => keep!(protection),
                ChunkId::SHADERS => keep!(shaders),
                ChunkId::SHADERS2 => keep!(shaders2),
                ChunkId::EXTENDED_HEADER => {
                    header.extended_header = Some(ExtendedHeader::read(ctx, reader)?)
                }
                ChunkId::SPACER => keep!(spacer),
                ChunkId::CHUNK_224F => keep!(chunk_224f),
                ChunkId::TITLE2 => keep!(title2),

                ChunkId::GLOBAL_EVENTS => keep!(global_events),
                ChunkId::GLOBAL_STRINGS => keep!(global_strings),
                ChunkId::GLOBAL_STRING_NAMES => keep!(global_string_names),
                ChunkId::GLOBAL_VALUES => keep!(global_values),
                ChunkId::GLOBAL_VALUE_NAMES => keep!(global_value_names),
                ChunkId::FUSION_3_SEED => keep!(fusion_3_seed),

                ChunkId::FRAME_HANDLES => {
                    header.frame_handles = Some(FrameHandles::read(ctx, reader)?)
                }
                ChunkId::FRAME_BANK => {
                    header.frame_bank = Some(FrameBank::read(ctx, reader, progress)?)
                }
                ChunkId::FRAME => {
                    // Old layouts have no frame-bank chunk; synthesize one
                    // and accumulate the bare frames.
                    if header.frame_bank.is_none() {
                        header.frame_bank = Some(FrameBank::default());
                    } else {
                        warn!("frame bank already exists; appending bare frames");
                    }
                    header
                        .frame_bank
                        .as_mut()
                        .unwrap()
                        .read_frames(ctx, reader, progress)?;
                }

                ChunkId::OBJECT_BANK | ChunkId::OBJECT_BANK2 => {
                    header.object_bank = Some(ObjectBank::read(ctx, reader, progress)?)
                }
                ChunkId::IMAGE_BANK => {
                    header.image_bank = Some(ImageBank::read(ctx, reader, progress)?)
                }
                ChunkId::SOUND_BANK => {
                    header.sound_bank = Some(SoundBank::read(ctx, reader, progress)?)
                }
                ChunkId::MUSIC_BANK => {
                    header.music_bank = Some(MusicBank::read(ctx, reader, progress)?)
                }
                ChunkId::FONT_BANK => {
                    header.font_bank = Some(FontBank::read(ctx, reader, progress)?)
                }

                ChunkId::CHUNK_2253 => {
                    ctx.recompiled = true;
                    header.records_2253 = Some(Records2253::read(ctx, reader)?);
                }
                ChunkId::OBJECT_NAMES => {
                    ctx.two_five_plus = true;
                    header.object_names = Some(StringsChunk::read(ctx, reader)?);
                }
                ChunkId::CHUNK_2255 => keep!(chunk_2255),
                ChunkId::TWO_FIVE_PLUS_OBJECT_PROPERTIES => {
                    ctx.two_five_plus = true;
                    header.two_five_plus_object_properties =
                        Some(ItemList::read(ctx, reader)?);
                }
                ChunkId::CHUNK_2257 => keep!(chunk_2257),
                ChunkId::OBJECT_PROPERTIES => {
                    header.object_properties = Some(ItemList::read(ctx, reader)?)
                }
                ChunkId::FONT_META => keep!(truetype_fonts_meta),
                ChunkId::FONT_CHUNK => keep!(truetype_fonts),

                ChunkId::LAST => {
                    header.last = Some(ChunkEntry::read(ctx, reader)?);
                    break;
                }

                other => {
                    debug!(id = %other, "unrecognized chunk preserved");
                    header.unknown_chunks.push(
                        ChunkEntry::read(ctx, reader)
                            .frame_with(|| format!("reading unknown chunk {other}"))?,
                    );
                }
            }
        }

        Ok(header)
    }
}

/// A fully parsed game.
#[derive(Debug)]
pub struct Game {
    pub file: RefPtr,

    pub era: Era,
    pub old_game: bool,
    pub unicode: bool,
    pub ccn: bool,
    pub cruf: bool,
    pub cnc: bool,
    pub compat: bool,
    pub recompiled: bool,
    pub two_five_plus: bool,

    pub product_code: Option<ProductCode>,
    pub runtime_sub_version: u16,
    pub product_version: u32,
    pub product_build: u32,

    pub pack_files: Vec<PackFile>,
    pub header: GameHeader,

    image_handles: HashMap<u32, usize>,
    object_handles: HashMap<u16, usize>,

    ctx: Context,
}

impl Game {
    /// Parse a game from the raw bytes of an executable or detached data
    /// file. This is the single entry point; everything in the result is
    /// owned by the returned value.
    pub fn parse(data: Vec<u8>, options: Options) -> Result<Game> {
        Self::parse_with_progress(data, options, &Progress::new())
    }

    pub fn parse_with_progress(
        data: Vec<u8>,
        options: Options,
        progress: &Progress,
    ) -> Result<Game> {
        let file = RefBuf::root(data);
        let mut reader = Reader::new(RefSpan::whole(file.clone()));
        let mut ctx = Context::new(options);

        if reader.is_empty() {
            return Err(Error::with(ErrorKind::OutOfData, "empty file"));
        }

        if let Err(err) = container::parse_pe_header(&mut reader) {
            debug!(%err, "not a PE image; assuming a detached data file");
            reader.seek(0)?;
        }

        let container: ContainerHeader = container::parse_game_header(&mut ctx, &mut reader)
            .frame_with(|| format!("parsing the game header at {:#x}", reader.position()))?;

        let header = GameHeader::read(&mut ctx, &mut reader, progress)
            .frame_with(|| format!("walking the chunk tree at {:#x}", reader.position()))?;
        progress.set_completed(1.0);

        if ctx.recompiled {
            warn!("this game may have been recompiled");
        }

        let mut image_handles = HashMap::new();
        if let Some(bank) = &header.image_bank {
            for (index, item) in bank.items.iter().enumerate() {
                image_handles.insert(item.entry.handle, index);
            }
        }

        let mut object_handles = HashMap::new();
        if let Some(bank) = &header.object_bank {
            for (index, item) in bank.items.iter().enumerate() {
                object_handles.insert(item.handle, index);
            }
        }

        Ok(Game {
            file,
            era: ctx.era,
            old_game: ctx.old_game,
            unicode: ctx.unicode,
            ccn: ctx.ccn,
            cruf: ctx.cruf,
            cnc: ctx.cnc,
            compat: ctx.compat,
            recompiled: ctx.recompiled,
            two_five_plus: ctx.two_five_plus,
            product_code: container.product_code,
            runtime_sub_version: container.runtime_sub_version,
            product_version: container.product_version,
            product_build: container.product_build,
            pack_files: container.pack_files,
            header,
            image_handles,
            object_handles,
            ctx,
        })
    }

    /// The parse context, needed by the lazy `decode` methods on entries.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn title(&self) -> Option<&str> {
        self.header.title.as_ref().map(|c| c.value.as_str())
    }

    pub fn author(&self) -> Option<&str> {
        self.header.author.as_ref().map(|c| c.value.as_str())
    }

    pub fn copyright(&self) -> Option<&str> {
        self.header.copyright.as_ref().map(|c| c.value.as_str())
    }

    pub fn project_path(&self) -> Option<&str> {
        self.header.project_path.as_ref().map(|c| c.value.as_str())
    }

    /// Resolve an image handle through the bank index.
    pub fn image(&self, handle: u32) -> Result<&ImageItem> {
        let bank = self
            .header
            .image_bank
            .as_ref()
            .ok_or_else(|| Error::with(ErrorKind::InvalidState, "no image bank"))?;
        let index = *self
            .image_handles
            .get(&handle)
            .ok_or_else(|| {
                Error::with(ErrorKind::InvalidState, format!("invalid image handle {handle:#x}"))
            })?;
        bank.items
            .get(index)
            .ok_or_else(|| Error::with(ErrorKind::InvalidState, "image handle out of range"))
    }

    /// Decode an image by handle, honouring the colour-key configuration.
    pub fn decode_image(
        &self,
        handle: u32,
        palette: Option<&Palette>,
    ) -> Result<image::RgbaImage> {
        self.image(handle)?
            .decode(&self.ctx, self.ctx.options.dump_color_transparent, palette)
    }

    /// Resolve an object handle through the bank index.
    pub fn object(&self, handle: u16) -> Result<&ObjectItem> {
        let bank = self
            .header
            .object_bank
            .as_ref()
            .ok_or_else(|| Error::with(ErrorKind::InvalidState, "no object bank"))?;
        let index = *self
            .object_handles
            .get(&handle)
            .ok_or_else(|| {
                Error::with(ErrorKind::InvalidState, format!("invalid object handle {handle:#x}"))
            })?;
        bank.items
            .get(index)
            .ok_or_else(|| Error::with(ErrorKind::InvalidState, "object handle out of range"))
    }

    /// Resolve a frame handle through the `frame_handles` table.
    pub fn frame(&self, handle: u16) -> Result<&Frame> {
        let bank = self
            .header
            .frame_bank
            .as_ref()
            .ok_or_else(|| Error::with(ErrorKind::InvalidState, "no frame bank"))?;
        let handles = self
            .header
            .frame_handles
            .as_ref()
            .ok_or_else(|| Error::with(ErrorKind::InvalidState, "no frame handles"))?;
        let index = *handles.handles.get(handle as usize).ok_or_else(|| {
            Error::with(ErrorKind::InvalidState, format!("frame handle {handle} out of range"))
        })?;
        bank.items.get(index as usize).ok_or_else(|| {
            Error::with(ErrorKind::InvalidState, "frame bank index out of range")
        })
    }
}
