//! The container format: chunk plumbing, codecs and the typed banks.

pub mod chunk;
pub mod container;
pub mod crypto;
pub mod extras;
pub mod font;
pub mod frame;
pub mod game;
pub mod image;
pub mod inflate;
pub mod lz4;
pub mod object;
pub mod sound;
pub mod strings;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::error::{Error, ErrorKind, Result};
use crypto::Decryptor;

/// Bytes needed to round `x` up to a multiple of `a`.
pub(crate) fn slack(x: usize, a: usize) -> usize {
    (a - (x % a)) % a
}

pub(crate) struct BankItems<T> {
    pub items: Vec<T>,
    pub warnings: Vec<String>,
}

/// The shared bank-item loop: read `count` items, tolerating up to `budget`
/// failures. Past the budget the failure surfaces, unless `skip_broken` is
/// set, in which case the bank is truncated to the valid prefix.
pub(crate) fn read_bank_items<T>(
    count: u32,
    mut budget: usize,
    skip_broken: bool,
    mut read_item: impl FnMut(u32) -> Result<T>,
) -> Result<BankItems<T>> {
    let mut items = Vec::with_capacity(count.min(0x1_0000) as usize);
    let mut warnings = Vec::new();

    for i in 0..count {
        match read_item(i) {
            Ok(item) => items.push(item),
            Err(err) => {
                if budget == 0 {
                    if skip_broken {
                        warnings.push(err.to_string());
                        break;
                    }
                    return Err(err);
                }
                budget -= 1;
                tracing::warn!(%err, "skipping broken bank item");
                warnings.push(err.to_string());
            }
        }
    }

    Ok(BankItems { items, warnings })
}

/// Product-build bucket gating structural differences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Era {
    Old,
    V284,
    V288,
    /// Reserved for the next build bucket; not currently selected.
    V290,
}

/// Configuration recognized by the core.
#[derive(Debug, Clone)]
pub struct Options {
    /// Treat every game as old-era.
    pub force_compat: bool,
    /// Continue a bank parse past a failing item (within the fail budget).
    pub skip_broken_items: bool,
    /// Per-bank budget of item failures tolerated before surfacing.
    pub max_item_read_fails: usize,
    /// Enable colour-key transparency in image decode.
    pub dump_color_transparent: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            force_compat: false,
            skip_broken_items: false,
            max_item_read_fails: 3,
            dump_color_transparent: true,
        }
    }
}

/// Progress and cancellation slots owned by the caller.
///
/// `completed`/`bank_completed` hold `f32` bit patterns in `[0, 1]`, updated
/// at chunk and bank-entry boundaries. Cancellation is cooperative: the
/// walker checks the flag between chunks and abandons the parse.
#[derive(Debug, Default)]
pub struct Progress {
    completed: AtomicU32,
    bank_completed: AtomicU32,
    cancelled: AtomicBool,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed(&self) -> f32 {
        f32::from_bits(self.completed.load(Ordering::Relaxed))
    }

    pub fn bank_completed(&self) -> f32 {
        f32::from_bits(self.bank_completed.load(Ordering::Relaxed))
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub(crate) fn set_completed(&self, value: f32) {
        self.completed.store(value.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn set_bank_completed(&self, value: f32) {
        self.bank_completed.store(value.to_bits(), Ordering::Relaxed);
    }
}

#[derive(Debug)]
enum DecryptorState {
    Unprimed,
    Invalid,
    Ready(Decryptor),
}

/// Strings the keystream is derived from, collected while walking.
#[derive(Debug, Default, Clone)]
pub struct KeySource {
    pub title: Option<String>,
    pub copyright: Option<String>,
    pub project_path: Option<String>,
}

/// Per-parse state: configuration, era gates and the cached keystream.
///
/// Everything the original kept in process globals lives here; the decryptor
/// is written once (at the first encrypted chunk) and read-only afterwards.
#[derive(Debug)]
pub struct Context {
    pub options: Options,
    pub era: Era,
    pub magic_char: u8,
    pub old_game: bool,
    pub unicode: bool,
    pub ccn: bool,
    pub cruf: bool,
    pub cnc: bool,
    pub compat: bool,
    pub recompiled: bool,
    pub two_five_plus: bool,
    pub product_build: u32,
    /// Build optimises image entries into head-carried metadata.
    pub optimised_images: bool,
    pub(crate) key_source: KeySource,
    decryptor: DecryptorState,
}

impl Context {
    pub fn new(options: Options) -> Self {
        let compat = options.force_compat;
        Self {
            options,
            era: Era::Old,
            magic_char: 99,
            old_game: false,
            unicode: false,
            ccn: false,
            cruf: false,
            cnc: false,
            compat,
            recompiled: false,
            two_five_plus: false,
            product_build: 0,
            optimised_images: false,
            key_source: KeySource::default(),
            decryptor: DecryptorState::Unprimed,
        }
    }

    pub(crate) fn decryptor_primed(&self) -> bool {
        !matches!(self.decryptor, DecryptorState::Unprimed)
    }

    /// Derive the key from the strings seen so far and expand the table.
    /// Called at the first mode-2/3 chunk.
    pub(crate) fn prime_decryptor(&mut self) {
        if self.decryptor_primed() {
            return;
        }
        let project_first = !self.old_game && self.product_build <= 285;
        let key = crypto::derive_key(
            self.key_source.title.as_deref(),
            self.key_source.copyright.as_deref(),
            self.key_source.project_path.as_deref(),
            project_first,
            self.magic_char,
        );
        self.decryptor = match Decryptor::init(&key, self.magic_char) {
            Some(dec) => DecryptorState::Ready(dec),
            None => DecryptorState::Invalid,
        };
    }

    pub(crate) fn decryptor(&self) -> Result<&Decryptor> {
        match &self.decryptor {
            DecryptorState::Ready(dec) => Ok(dec),
            _ => Err(Error::with(
                ErrorKind::DecryptFailed,
                "no valid decryption table; the title/copyright/project-path \
                 strings may be missing or altered",
            )),
        }
    }
}
