//! Error taxonomy shared by every parser in the crate.
//!
//! Errors carry a stack-trace-like list of context frames so a failure deep
//! inside a decoded body can still cite what was being read and where. Each
//! subsystem boundary appends exactly one frame on the way out.

use std::fmt;

/// What went wrong, independent of where.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error("invalid EXE signature")]
    InvalidExeSignature,
    #[error("invalid PE signature")]
    InvalidPeSignature,
    #[error("invalid game header")]
    InvalidGameSignature,
    #[error("invalid pack count")]
    InvalidPackCount,

    #[error("invalid state")]
    InvalidState,
    #[error("invalid mode")]
    InvalidMode,
    #[error("invalid chunk")]
    InvalidChunk,

    #[error("no MODE0 decoder")]
    NoMode0Decoder,
    #[error("no MODE1 decoder")]
    NoMode1Decoder,
    #[error("no MODE2 decoder")]
    NoMode2Decoder,
    #[error("no MODE3 decoder")]
    NoMode3Decoder,

    #[error("out of data")]
    OutOfData,

    #[error("inflate failed")]
    InflateFailed,
    #[error("decrypt failed")]
    DecryptFailed,
    #[error("custom zlib dictionaries are not supported")]
    CustomDictionary,

    // Huffman table construction and use.
    #[error("no symbols")]
    NoSymbols,
    #[error("too many symbols")]
    TooManySymbols,
    #[error("incomplete tree")]
    IncompleteTree,
    #[error("invalid symbol")]
    InvalidSymbol,
    #[error("invalid distance")]
    InvalidDistance,
    #[error("invalid block code")]
    InvalidBlockCode,
}

/// An error plus the trail of contexts it bubbled through.
///
/// The first trace frame is the innermost ("reading u32 at position 0x173"),
/// the last is the outermost ("while parsing image bank").
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    trace: Vec<String>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            trace: Vec::new(),
        }
    }

    pub fn with(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            trace: vec![msg.into()],
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    /// Append one context frame. Used via [`ResultExt`] at subsystem
    /// boundaries.
    pub fn frame(mut self, msg: impl Into<String>) -> Self {
        self.trace.push(msg.into());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for frame in &self.trace {
            write!(f, "\n  in: {frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Adds trace frames to `Result`s without disturbing the success path.
pub trait ResultExt<T> {
    fn frame(self, msg: &str) -> Result<T>;
    fn frame_with(self, f: impl FnOnce() -> String) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn frame(self, msg: &str) -> Result<T> {
        self.map_err(|e| e.frame(msg))
    }

    fn frame_with(self, f: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|e| e.frame(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_accumulates_outward() {
        let err: Result<()> = Err(Error::with(ErrorKind::OutOfData, "reading u32 at 0x10"));
        let err = err
            .frame("while reading chunk body")
            .frame("while parsing image bank")
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::OutOfData);
        assert_eq!(err.trace().len(), 3);
        assert_eq!(err.trace()[0], "reading u32 at 0x10");
        assert_eq!(err.trace()[2], "while parsing image bank");

        let shown = err.to_string();
        assert!(shown.starts_with("out of data"));
        assert!(shown.contains("image bank"));
    }
}
