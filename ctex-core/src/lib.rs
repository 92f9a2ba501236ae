//! Core library for ctex: forensic reading of games built with the
//! Clickteam family of 2D authoring tools.
//!
//! Given the raw bytes of a built executable (the payload lives in an
//! overlay after the PE image) or a detached data file, [`Game::parse`]
//! walks the nested chunk tree and returns the typed resource banks:
//! images, sounds, music, fonts, frames and objects, plus the project
//! strings and preserved side chunks. Decoding of entry bodies (inflate,
//! keystream, LZ4, pixel codecs) is lazy and pure.

pub mod data;
pub mod error;
pub mod format;

pub use error::{Error, ErrorKind, Result};
pub use format::game::Game;
pub use format::{Era, Options, Progress};
