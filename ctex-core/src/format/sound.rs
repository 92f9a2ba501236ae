//! Sound and music banks.
//!
//! Sound entries carry a 0x18-byte head whose fields (checksum, reference
//! count, decompressed length, format flags, name length) are what the
//! shell-side WAV repack needs; the body stays as raw decoded bytes. Music
//! entries are plain compressed items.

use tracing::{debug, warn};

use crate::data::{Reader, RefSpan};
use crate::error::{Result, ResultExt};
use crate::format::chunk::{ChunkEntry, ChunkId, ItemEntry};
use crate::format::{read_bank_items, BankItems, Context, Progress};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SoundFlags: u32 {
        const WAVE = 1 << 0;
        const MIDI = 1 << 1;
        const OGGS = 1 << 2;
        const LOC = 1 << 4;
        const PFD = 1 << 5;
        const LOADED = 1 << 6;
        const XM = 1 << 30;
    }
}

#[derive(Debug, Clone)]
pub struct SoundItem {
    pub entry: ItemEntry,
    pub checksum: u32,
    pub references: u32,
    pub decompressed_len: u32,
    pub flags: SoundFlags,
    pub name_len: u32,
}

impl SoundItem {
    pub fn read(ctx: &Context, reader: &mut Reader) -> Result<Self> {
        let entry = ItemEntry::read(ctx, reader, false, 0x18, true)?;

        let mut item = Self {
            entry,
            checksum: 0,
            references: 0,
            decompressed_len: 0,
            flags: SoundFlags::empty(),
            name_len: 0,
        };

        if !item.entry.head.data.is_empty() {
            let mut head = Reader::new(item.entry.head.data.clone());
            item.checksum = head.read_u32().frame("reading sound head")?;
            item.references = head.read_u32()?;
            item.decompressed_len = head.read_u32()?;
            item.flags = SoundFlags::from_bits_retain(head.read_u32()?);
            let _reserved = head.read_u32()?;
            item.name_len = head.read_u32()?;
        }

        Ok(item)
    }

    /// The decoded sample data (name prefix included, per `name_len`).
    pub fn data(&self, ctx: &Context) -> Result<RefSpan> {
        self.entry.decode_body(ctx).frame("decoding sound data")
    }
}

#[derive(Debug)]
pub struct SoundBank {
    pub entry: ChunkEntry,
    pub items: Vec<SoundItem>,
    pub end: Option<ChunkEntry>,
    pub warnings: Vec<String>,
}

impl SoundBank {
    pub fn read(ctx: &mut Context, reader: &mut Reader, progress: &Progress) -> Result<Self> {
        let entry = ChunkEntry::read(ctx, reader).frame("reading sound bank")?;

        let mut body = Reader::new(entry.body.data.clone());
        let item_count = body.read_u32()?;
        debug!(item_count, "sound bank");

        let BankItems { items, warnings } = read_bank_items(
            item_count,
            ctx.options.max_item_read_fails,
            ctx.options.skip_broken_items,
            |i| {
                let item = SoundItem::read(ctx, &mut body)
                    .frame_with(|| format!("sound item {}/{item_count}", i + 1))?;
                progress.set_bank_completed(body.position() as f32 / body.len().max(1) as f32);
                Ok(item)
            },
        )?;
        progress.set_bank_completed(0.0);

        if !body.is_empty() {
            warn!(leftover = body.remaining(), "bytes left over in the sound bank");
        }

        let end = if reader.remaining() >= 2
            && reader.peek_u16().ok() == Some(ChunkId::SOUND_HANDLES.0)
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
}

#[derive(Debug, Clone)]
pub struct MusicItem {
    pub entry: ItemEntry,
}

impl MusicItem {
    pub fn read(ctx: &Context, reader: &mut Reader) -> Result<Self> {
        let entry = ItemEntry::read(ctx, reader, true, 0, true)?;
        Ok(Self { entry })
    }

    pub fn data(&self, ctx: &Context) -> Result<RefSpan> {
        self.entry.decode_body(ctx).frame("decoding music data")
    }
}

#[derive(Debug)]
pub struct MusicBank {
    pub entry: ChunkEntry,
    pub items: Vec<MusicItem>,
    pub end: Option<ChunkEntry>,
    pub warnings: Vec<String>,
}

impl MusicBank {
    pub fn read(ctx: &mut Context, reader: &mut Reader, progress: &Progress) -> Result<Self> {
        let entry = ChunkEntry::read(ctx, reader).frame("reading music bank")?;

        let mut body = Reader::new(entry.body.data.clone());
        let item_count = body.read_u32()?;
        debug!(item_count, "music bank");

        let BankItems { items, warnings } = read_bank_items(
            item_count,
            ctx.options.max_item_read_fails,
            ctx.options.skip_broken_items,
            |i| {
                let item = MusicItem::read(ctx, &mut body)
                    .frame_with(|| format!("music item {}/{item_count}", i + 1))?;
                progress.set_bank_completed(body.position() as f32 / body.len().max(1) as f32);
                Ok(item)
            },
        )?;
        progress.set_bank_completed(0.0);

        let end = if reader.remaining() >= 2
            && reader.peek_u16().ok() == Some(ChunkId::MUSIC_HANDLES.0)
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RefBuf;
    use crate::format::{Era, Options};

    #[test]
    fn sound_head_fields() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&3u32.to_le_bytes()); // handle
        bytes.extend_from_slice(&0xAABBu32.to_le_bytes()); // checksum
        bytes.extend_from_slice(&1u32.to_le_bytes()); // references
        bytes.extend_from_slice(&44100u32.to_le_bytes()); // decompressed
        bytes.extend_from_slice(&(1u32 | (1 << 4)).to_le_bytes()); // wave | loc
        bytes.extend_from_slice(&0u32.to_le_bytes()); // reserved
        bytes.extend_from_slice(&4u32.to_le_bytes()); // name length
        bytes.extend_from_slice(&2u32.to_le_bytes()); // body size
        bytes.extend_from_slice(&[0x12, 0x34]);

        let mut ctx = Context::new(Options::default());
        ctx.era = Era::V288;
        ctx.product_build = 290;

        let mut reader = Reader::new(RefSpan::whole(RefBuf::root(bytes)));
        let item = SoundItem::read(&ctx, &mut reader).unwrap();
        assert_eq!(item.entry.handle, 3);
        assert_eq!(item.checksum, 0xAABB);
        assert_eq!(item.decompressed_len, 44100);
        assert!(item.flags.contains(SoundFlags::WAVE | SoundFlags::LOC));
        assert_eq!(item.name_len, 4);
        assert_eq!(item.data(&ctx).unwrap().bytes(), &[0x12, 0x34]);
    }
}
