//! The font bank.
//!
//! Regular entries are compressed items holding a LOGFONT record; cruf games
//! instead store the record bare with a fixed 60-byte layout.

use tracing::{debug, warn};

use crate::data::{Reader, RefSpan};
use crate::error::{Result, ResultExt};
use crate::format::chunk::{ChunkEntry, ChunkId, ItemEntry};
use crate::format::{read_bank_items, BankItems, Context, Progress};

/// Fixed body size of a cruf font record: five u32 metrics, eight u8
/// attributes and a 32-byte face name.
const CRUF_FONT_SIZE: usize = 4 * 5 + 8 + 32;

#[derive(Debug, Clone)]
pub struct FontItem {
    pub entry: ItemEntry,
}

impl FontItem {
    pub fn read(ctx: &Context, reader: &mut Reader) -> Result<Self> {
        let entry = if ctx.cruf {
            let start = reader.position();
            let mut entry = ItemEntry::default();
            entry.read_head(ctx, reader, 0, true)?;
            entry.read_body(ctx, reader, false, Some(CRUF_FONT_SIZE))?;
            let end = reader.position();
            reader.seek(start)?;
            entry.ref_span = reader.read_ref_span(end - start)?;
            entry
        } else {
            ItemEntry::read(ctx, reader, true, 0, true)?
        };
        Ok(Self { entry })
    }

    pub fn data(&self, ctx: &Context) -> Result<RefSpan> {
        self.entry.decode_body(ctx).frame("decoding font data")
    }
}

#[derive(Debug)]
pub struct FontBank {
    pub entry: ChunkEntry,
    pub items: Vec<FontItem>,
    pub end: Option<ChunkEntry>,
    pub warnings: Vec<String>,
}

impl FontBank {
    pub fn read(ctx: &mut Context, reader: &mut Reader, progress: &Progress) -> Result<Self> {
        let entry = ChunkEntry::read(ctx, reader).frame("reading font bank")?;

        let mut body = Reader::new(entry.body.data.clone());
        let item_count = body.read_u32()?;
        debug!(item_count, "font bank");

        let BankItems { items, warnings } = read_bank_items(
            item_count,
            ctx.options.max_item_read_fails,
            ctx.options.skip_broken_items,
            |i| {
                let item = FontItem::read(ctx, &mut body)
                    .frame_with(|| format!("font item {}/{item_count}", i + 1))?;
                progress.set_bank_completed(body.position() as f32 / body.len().max(1) as f32);
                Ok(item)
            },
        )?;
        progress.set_bank_completed(0.0);

        if !body.is_empty() {
            warn!(leftover = body.remaining(), "bytes left over in the font bank");
        }

        let end = if reader.remaining() >= 2
            && reader.peek_u16().ok() == Some(ChunkId::FONT_HANDLES.0)
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
    fn cruf_font_record_is_fixed_size() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_le_bytes()); // handle
        bytes.extend_from_slice(&vec![0x5A; CRUF_FONT_SIZE]);
        bytes.extend_from_slice(&[0xEE; 4]); // following data

        let mut ctx = Context::new(Options::default());
        ctx.era = Era::V288;
        ctx.product_build = 290;
        ctx.unicode = true;
        ctx.ccn = true;
        ctx.cruf = true;

        let mut reader = Reader::new(RefSpan::whole(RefBuf::root(bytes)));
        let item = FontItem::read(&ctx, &mut reader).unwrap();
        assert_eq!(item.entry.body.data.len(), CRUF_FONT_SIZE);
        assert_eq!(reader.remaining(), 4);
    }
}
