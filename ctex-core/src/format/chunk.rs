//! Chunks: the unit of the outer container.
//!
//! A chunk is `(id, mode, size, payload)`; item entries inside banks add a
//! handle and an optional fixed-size head. Bodies are decoded lazily and
//! purely: decoding never mutates the entry, and decoding twice yields equal
//! contents.

use std::fmt;

use tracing::{debug, warn};

use crate::data::{RefBuf, RefSpan, Reader};
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::format::{crypto, inflate, lz4, Context, Era};

/// 16-bit chunk tag. Unknown tags are preserved as-is.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkId(pub u16);

macro_rules! chunk_ids {
    ($($name:ident = $value:expr, $label:expr;)*) => {
        impl ChunkId {
            $(pub const $name: ChunkId = ChunkId($value);)*

            pub fn name(self) -> Option<&'static str> {
                match self.0 {
                    $($value => Some($label),)*
                    _ => None,
                }
            }
        }
    };
}

chunk_ids! {
    VITALISE_PREVIEW = 0x1122, "vitalise preview";

    HEADER = 0x2223, "header";
    TITLE = 0x2224, "title";
    AUTHOR = 0x2225, "author";
    MENU = 0x2226, "menu";
    EXTRA_PATH = 0x2227, "extra path";
    EXTENSIONS = 0x2228, "extensions";
    OBJECT_BANK = 0x2229, "object bank";
    GLOBAL_EVENTS = 0x222A, "global events";
    FRAME_HANDLES = 0x222B, "frame handles";
    EXTRA_DATA = 0x222C, "extra data";
    ADDITIONAL_EXTENSIONS = 0x222D, "additional extensions";
    PROJECT_PATH = 0x222E, "project path";
    OUTPUT_PATH = 0x222F, "output path";
    APP_DOC = 0x2230, "app doc";
    OTHER_EXTENSION = 0x2231, "other extension";
    GLOBAL_VALUES = 0x2232, "global values";
    GLOBAL_STRINGS = 0x2233, "global strings";
    EXTENSIONS_LIST = 0x2234, "extensions list";
    ICON = 0x2235, "icon";
    DEMO_VERSION = 0x2236, "demo version";
    SECURITY_NUMBER = 0x2237, "security number";
    BINARY_FILES = 0x2238, "binary files";
    MENU_IMAGES = 0x2239, "menu images";
    ABOUT = 0x223A, "about";
    COPYRIGHT = 0x223B, "copyright";
    GLOBAL_VALUE_NAMES = 0x223C, "global value names";
    GLOBAL_STRING_NAMES = 0x223D, "global string names";
    MOVEMENT_EXTENSIONS = 0x223E, "movement extensions";
    OBJECT_BANK2 = 0x223F, "object bank 2";
    EXE_ONLY = 0x2240, "exe only";
    PROTECTION = 0x2242, "protection";
    SHADERS = 0x2243, "shaders";
    EXTENDED_HEADER = 0x2245, "extended header";
    SPACER = 0x2246, "spacer";
    FRAME_BANK = 0x224D, "frame bank";
    CHUNK_224F = 0x224F, "chunk 224F";
    TITLE2 = 0x2251, "title2";
    CHUNK_2253 = 0x2253, "chunk 2253";
    OBJECT_NAMES = 0x2254, "object names";
    CHUNK_2255 = 0x2255, "chunk 2255";
    TWO_FIVE_PLUS_OBJECT_PROPERTIES = 0x2256, "object properties (2.5+)";
    CHUNK_2257 = 0x2257, "chunk 2257";
    FONT_META = 0x2258, "truetype fonts meta";
    FONT_CHUNK = 0x2259, "truetype fonts chunk";
    SHADERS2 = 0x225A, "shaders 2";

    FRAME = 0x3333, "frame";
    FRAME_HEADER = 0x3334, "frame header";
    FRAME_NAME = 0x3335, "frame name";
    FRAME_PASSWORD = 0x3336, "frame password";
    FRAME_PALETTE = 0x3337, "frame palette";
    FRAME_OBJECT_INSTANCES = 0x3338, "frame object instances";
    FRAME_FADE_IN_FRAME = 0x3339, "frame fade in frame";
    FRAME_FADE_OUT_FRAME = 0x333A, "frame fade out frame";
    FRAME_FADE_IN = 0x333B, "frame fade in";
    FRAME_FADE_OUT = 0x333C, "frame fade out";
    FRAME_EVENTS = 0x333D, "frame events";
    FRAME_PLAY_HEADER = 0x333E, "frame play header";
    FRAME_ADDITIONAL_ITEMS = 0x333F, "frame additional items";
    FRAME_ADDITIONAL_ITEMS_INSTANCES = 0x3340, "frame additional item instances";
    FRAME_LAYERS = 0x3341, "frame layers";
    FRAME_VIRTUAL_SIZE = 0x3342, "frame virtual size";
    DEMO_FILE_PATH = 0x3343, "demo file path";
    RANDOM_SEED = 0x3344, "random seed";
    FRAME_LAYER_EFFECT = 0x3345, "frame layer effect";
    FRAME_BLURAY = 0x3346, "frame bluray options";
    MOVEMENT_TIMER_BASE = 0x3347, "movement timer base";
    MOSAIC_IMAGE_TABLE = 0x3348, "mosaic image table";
    FRAME_EFFECTS = 0x3349, "frame effects";
    FRAME_IPHONE_OPTIONS = 0x334A, "frame iphone options";
    FRAME_CHUNK_334C = 0x334C, "frame chunk 334C";

    OBJECT_HEADER = 0x4444, "object header";
    OBJECT_NAME = 0x4445, "object name";
    OBJECT_PROPERTIES = 0x4446, "object properties";
    OBJECT_CHUNK_4447 = 0x4447, "object chunk 4447";
    OBJECT_EFFECT = 0x4448, "object effect";

    IMAGE_HANDLES = 0x5555, "image handles";
    FONT_HANDLES = 0x5556, "font handles";
    SOUND_HANDLES = 0x5557, "sound handles";
    MUSIC_HANDLES = 0x5558, "music handles";

    BANK_OFFSETS = 0x6665, "bank offsets";
    IMAGE_BANK = 0x6666, "image bank";
    FONT_BANK = 0x6667, "font bank";
    SOUND_BANK = 0x6668, "sound bank";
    MUSIC_BANK = 0x6669, "music bank";

    FUSION_3_SEED = 0x7EEE, "fusion 3 seed";

    LAST = 0x7F7F, "last";
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{:#06X} ({name})", self.0),
            None => write!(f, "{:#06X}", self.0),
        }
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Transformation applied to a chunk payload before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    Deflate,
    Encrypted,
    EncryptedDeflate,
    /// Runtime state only; detected via the new-item sentinel, never stored.
    Lz4,
    Unknown(u16),
}

impl Encoding {
    pub fn from_raw(mode: u16) -> Self {
        match mode {
            0 => Encoding::Raw,
            1 => Encoding::Deflate,
            2 => Encoding::Encrypted,
            3 => Encoding::EncryptedDeflate,
            other => Encoding::Unknown(other),
        }
    }
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::Raw
    }
}

/// A span plus the uncompressed size its producer declared, if any.
#[derive(Debug, Clone, Default)]
pub struct DataPoint {
    pub data: RefSpan,
    pub expected_size: u32,
}

impl DataPoint {
    pub fn position(&self) -> Option<usize> {
        self.data.root_position()
    }
}

/// One chunk of the outer stream.
#[derive(Debug, Clone)]
pub struct ChunkEntry {
    pub id: ChunkId,
    pub mode: Encoding,
    pub old: bool,
    pub body: DataPoint,
    /// The exact input slice covering header and body.
    pub ref_span: RefSpan,
}

impl ChunkEntry {
    pub fn read(ctx: &mut Context, reader: &mut Reader) -> Result<Self> {
        let start = reader.position();

        let id = ChunkId(reader.read_u16().frame("reading chunk id")?);
        let mode = Encoding::from_raw(reader.read_u16().frame("reading chunk mode")?);

        if matches!(mode, Encoding::Encrypted | Encoding::EncryptedDeflate)
            && !ctx.decryptor_primed()
        {
            ctx.prime_decryptor();
        }

        let chunk_size = reader
            .read_u32()
            .frame_with(|| format!("reading size of chunk {id}"))? as usize;
        let chunk_data_end = reader.position() + chunk_size;
        if reader.remaining() < chunk_size {
            return Err(Error::with(
                ErrorKind::OutOfData,
                format!(
                    "chunk {id} declares {chunk_size} bytes, {} remaining",
                    reader.remaining()
                ),
            ));
        }

        let mut body = DataPoint::default();
        if mode == Encoding::Deflate {
            body.expected_size = reader.read_u32()?;
            if ctx.old_game {
                if chunk_size > 4 {
                    body.data = reader.read_ref_span(chunk_size - 4)?;
                }
            } else {
                let data_size = reader.read_u32()? as usize;
                body.data = reader.read_ref_span(data_size)?;
                if reader.position() != chunk_data_end {
                    warn!(chunk = %id, "chunk body size disagrees with the declared chunk size");
                }
                reader.seek(chunk_data_end)?;
            }
        } else {
            body.data = reader.read_ref_span(chunk_size)?;
        }

        let size = reader.position() - start;
        reader.seek(start)?;
        let ref_span = reader.read_ref_span(size)?;

        Ok(Self {
            id,
            mode,
            old: ctx.old_game,
            body,
            ref_span,
        })
    }

    /// Absolute position of this chunk in the root buffer.
    pub fn position(&self) -> Option<usize> {
        self.ref_span.root_position()
    }

    pub fn decode_body(&self, ctx: &Context) -> Result<RefSpan> {
        self.decode_body_bounded(ctx, usize::MAX)
    }

    pub fn decode_body_bounded(&self, ctx: &Context, max_size: usize) -> Result<RefSpan> {
        decode_point(ctx, self.id.0, self.mode, self.old, &self.body, max_size)
            .frame_with(|| format!("decoding body of chunk {}", self.id))
    }
}

/// A bank item: a chunk body plus a handle and an optional metadata head.
#[derive(Debug, Clone, Default)]
pub struct ItemEntry {
    pub handle: u32,
    pub mode: Encoding,
    pub old: bool,
    pub new_item: bool,
    pub head: DataPoint,
    pub body: DataPoint,
    pub ref_span: RefSpan,
}

impl ItemEntry {
    pub fn read(
        ctx: &Context,
        reader: &mut Reader,
        compressed: bool,
        header_size: usize,
        has_handle: bool,
    ) -> Result<Self> {
        let start = reader.position();
        let mut entry = ItemEntry {
            old: ctx.old_game,
            ..Default::default()
        };
        entry.read_head(ctx, reader, header_size, has_handle)?;
        entry.read_body(ctx, reader, compressed, None)?;

        let size = reader.position() - start;
        reader.seek(start)?;
        entry.ref_span = reader.read_ref_span(size)?;
        Ok(entry)
    }

    pub fn read_head(
        &mut self,
        ctx: &Context,
        reader: &mut Reader,
        size: usize,
        has_handle: bool,
    ) -> Result<()> {
        self.old = ctx.old_game;
        self.handle = if has_handle {
            reader.read_u32().frame("reading item handle")?
        } else {
            0xFFFF_FFFF
        };

        // The 0xFFFFFFFF sentinel marks a new-era LZ4 body.
        self.new_item = !ctx.old_game && reader.peek_u32().unwrap_or(0) == 0xFFFF_FFFF;

        if !ctx.old_game && size > 0 {
            self.head.data = reader
                .read_ref_span(size)
                .frame_with(|| format!("reading {size}-byte item head"))?;
        }
        Ok(())
    }

    /// Read the body. `size` overrides the on-disk size field for layouts
    /// where the length lives elsewhere (cruf fonts, optimised images).
    pub fn read_body(
        &mut self,
        ctx: &Context,
        reader: &mut Reader,
        compressed: bool,
        size: Option<usize>,
    ) -> Result<()> {
        let mut compressed = compressed;
        if self.new_item {
            debug!(handle = self.handle, "new-item sentinel; switching to LZ4 body");
            self.mode = Encoding::Lz4;
            compressed = false;
            // The sentinel itself, then the declared output size.
            reader.skip(4)?;
            self.body.expected_size = reader.read_u32().frame("reading LZ4 output size")?;
        } else if ctx.old_game || compressed {
            self.body.expected_size = reader.read_u32().frame("reading declared body size")?;
        }

        let data_size = if let Some(size) = size {
            size
        } else if ctx.old_game {
            // The compressed length is not stored; inflate once to find it.
            let old_start = reader.position();
            inflate::stream_decompress(reader, self.body.expected_size)
                .frame("sizing old-era item body")?;
            let size = reader.position() - old_start;
            reader.seek(old_start)?;
            size
        } else {
            reader.read_u32().frame("reading item body size")? as usize
        };

        self.body.data = reader
            .read_ref_span(data_size)
            .frame_with(|| format!("reading {data_size}-byte item body"))?;

        // Old-era item bodies are always raw-deflate streams.
        if ctx.old_game {
            self.mode = Encoding::Deflate;
        }
        Ok(())
    }

    pub fn position(&self) -> Option<usize> {
        self.ref_span.root_position()
    }

    pub fn decode_body(&self, ctx: &Context) -> Result<RefSpan> {
        self.decode_body_bounded(ctx, usize::MAX)
    }

    pub fn decode_body_bounded(&self, ctx: &Context, max_size: usize) -> Result<RefSpan> {
        decode_point(ctx, self.handle as u16, self.mode, self.old, &self.body, max_size)
            .frame_with(|| format!("decoding body of item {:#x}", self.handle))
    }

    pub fn decode_head(&self, ctx: &Context, max_size: usize) -> Result<RefSpan> {
        if self.old {
            return Err(Error::new(match self.mode {
                Encoding::Raw => ErrorKind::NoMode0Decoder,
                Encoding::Deflate => ErrorKind::NoMode1Decoder,
                Encoding::Encrypted => ErrorKind::NoMode2Decoder,
                Encoding::EncryptedDeflate => ErrorKind::NoMode3Decoder,
                _ => ErrorKind::InvalidMode,
            }));
        }
        match self.mode {
            Encoding::Encrypted | Encoding::EncryptedDeflate => {
                decrypt(ctx, self.handle as u16, self.mode, &self.head.data)
            }
            Encoding::Deflate => inflate::inflate_span(&self.head.data, false, false, max_size),
            _ => Ok(guess_inflate(&self.head.data, max_size)),
        }
        .frame_with(|| format!("decoding head of item {:#x}", self.handle))
    }
}

/// Mode-0 policy: bodies that look like zlib are speculatively inflated and
/// fall back to the raw bytes when that fails.
fn guess_inflate(data: &RefSpan, max_size: usize) -> RefSpan {
    if data.bytes().first() == Some(&0x78) {
        match inflate::inflate_span(data, false, false, max_size) {
            Ok(span) => {
                if span.is_empty() {
                    warn!("speculatively inflated data was empty");
                }
                span
            }
            Err(err) => {
                warn!(%err, "speculative inflate failed; keeping raw bytes");
                data.clone()
            }
        }
    } else {
        data.clone()
    }
}

fn decode_point(
    ctx: &Context,
    id: u16,
    mode: Encoding,
    old: bool,
    point: &DataPoint,
    max_size: usize,
) -> Result<RefSpan> {
    if point.data.is_empty() && mode != Encoding::Lz4 {
        return Ok(RefSpan::empty());
    }

    if old {
        return match mode {
            Encoding::Raw => Ok(point.data.clone()),
            Encoding::Deflate => {
                let mut reader = Reader::new(point.data.clone());
                let magic = reader.read_u8()?;
                let len = reader.read_u16()?;
                if magic == 0x0F && len as u32 == point.expected_size {
                    // Uncompressed payload carried verbatim.
                    Ok(reader.read_remaining_ref_span(max_size))
                } else {
                    inflate::inflate_span(
                        &point.data,
                        true,
                        true,
                        (point.expected_size as usize).min(max_size),
                    )
                    .frame("MODE1 failed to inflate")
                }
            }
            Encoding::Encrypted => Err(Error::new(ErrorKind::NoMode2Decoder)),
            Encoding::EncryptedDeflate => Err(Error::new(ErrorKind::NoMode3Decoder)),
            _ => Err(Error::new(ErrorKind::InvalidMode)),
        };
    }

    match mode {
        Encoding::Lz4 => {
            if point.expected_size != 0 {
                let data = lz4::decode_block(point.data.bytes(), point.expected_size)
                    .frame("LZ4 decode failed")?;
                Ok(RefSpan::whole(RefBuf::derived(&point.data, data)))
            } else {
                lz4::decode_prefixed_span(&point.data).frame("LZ4 decode failed")
            }
        }
        Encoding::Encrypted | Encoding::EncryptedDeflate => {
            decrypt(ctx, id, mode, &point.data).frame("MODE2/3 failed to decrypt")
        }
        Encoding::Deflate => inflate::inflate_span(&point.data, false, false, max_size)
            .frame("MODE1 failed to inflate"),
        Encoding::Raw | Encoding::Unknown(_) => Ok(guess_inflate(&point.data, max_size)),
    }
}

/// Mode 2/3 body transformation.
fn decrypt(ctx: &Context, id: u16, mode: Encoding, encrypted: &RefSpan) -> Result<RefSpan> {
    let decryptor = ctx.decryptor()?;

    if mode == Encoding::EncryptedDeflate {
        if encrypted.len() <= 4 {
            return Err(Error::with(
                ErrorKind::DecryptFailed,
                "MODE 3: encrypted buffer too small",
            ));
        }
        let mut reader = Reader::new(encrypted.clone());
        reader.skip(4)?;
        let src = reader.read_remaining_ref_span(usize::MAX);
        let mut data = src.bytes().to_vec();

        if ctx.era != Era::V284 && id & 1 != 0 {
            data[0] ^= crypto::preamble_xor(id);
        }
        decryptor.decode(&mut data);

        let decoded = RefSpan::whole(RefBuf::derived(&src, data));
        let mut reader = Reader::new(decoded);
        if reader.remaining() <= 4 {
            return Err(Error::with(
                ErrorKind::DecryptFailed,
                "MODE 3: decoded chunk too small",
            ));
        }
        reader.skip(4)?;
        let inner = reader.read_remaining_ref_span(usize::MAX);

        // Inflate even when it doesn't need to be; keep the bytes otherwise.
        Ok(inflate::inflate_span(&inner, false, false, usize::MAX).unwrap_or(inner))
    } else {
        if encrypted.is_empty() {
            return Err(Error::with(
                ErrorKind::DecryptFailed,
                "MODE 2: encrypted buffer too small",
            ));
        }
        let mut data = encrypted.bytes().to_vec();
        if ctx.era != Era::V284 && id & 1 != 0 {
            data[0] ^= crypto::preamble_xor(id);
        }
        decryptor.decode(&mut data);
        Ok(RefSpan::whole(RefBuf::derived(encrypted, data)))
    }
}
