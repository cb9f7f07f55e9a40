#![warn(missing_docs)]
//! Library for reading, writing & extracting Nintendo Wii U disc images.
//!
//! A raw disc image (`.wud`) is a fixed ~23.3 GiB file, optionally split
//! into `game_part1.wud`, `game_part2.wud`, etc. The WUX container (`.wux`)
//! compresses an image by storing each unique 32 KiB sector once.
//!
//! # Examples
//!
//! Opening a disc image and extracting its title files:
//!
//! ```no_run
//! use std::path::Path;
//!
//! // Probes the WUX container format, falling back to a raw (possibly
//! // multipart) image.
//! let stream = wud::read::open(Path::new("path/to/game.wux"))
//!     .expect("Failed to open disc image");
//!
//! let common_key = std::fs::read("common.key").expect("Failed to read common key");
//! let game_key = std::fs::read("game.key").expect("Failed to read game key");
//! let mut disc = wud::DiscImage::new(stream, &common_key, &game_key)
//!     .expect("Failed to parse disc image");
//! disc.extract(Path::new("out")).expect("Failed to extract disc");
//! ```
//!
//! Compressing a raw image to WUX:
//!
//! ```no_run
//! use std::{io::Write, path::Path};
//!
//! use wud::{common::{SECTOR_SIZE, UNCOMPRESSED_SIZE}, read::ImageStream};
//!
//! let mut stream = wud::read::open_sized(Path::new("path/to/game_part1.wud"))
//!     .expect("Failed to open disc image");
//! let out = std::fs::File::create("game.wux").expect("Failed to create output file");
//! let mut writer = wud::WuxWriter::new(out, SECTOR_SIZE as u32, UNCOMPRESSED_SIZE)
//!     .expect("Failed to start WUX file");
//!
//! let mut buf = vec![0u8; SECTOR_SIZE];
//! let mut offset = 0;
//! while offset < UNCOMPRESSED_SIZE {
//!     stream.read_exact_at(&mut buf, offset).expect("Failed to read disc");
//!     writer.write_all(&buf).expect("Failed to write WUX");
//!     offset += SECTOR_SIZE as u64;
//! }
//! writer.finish().expect("Failed to finalize WUX");
//! ```

pub mod common;
pub mod disc;
pub mod io;
pub mod read;
pub(crate) mod util;

pub use disc::DiscImage;
pub use io::{
    split::SplitImageReader,
    wux::{WuxReader, WuxWriter},
};

use crate::common::UNCOMPRESSED_SIZE;

/// Error types for wud.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The stream does not start with the expected magic bytes. Callers use
    /// this to probe one format and fall back to another.
    #[error("bad magic")]
    BadMagic,
    /// The disc image is not exactly [`UNCOMPRESSED_SIZE`] bytes.
    #[error("disc image is {0} bytes, expected {UNCOMPRESSED_SIZE}")]
    BadSize(u64),
    /// A provided AES key is not 16 bytes.
    #[error("key is {0} bytes, expected 16")]
    BadKeySize(usize),
    /// The partition table checksum does not match its contents.
    #[error("partition table checksum mismatch")]
    BadChecksum,
    /// An error for disc format related issues.
    #[error("disc format error: {0}")]
    BadStructure(String),
    /// A requested file is absent from the disc's file table.
    #[error("file not found: {0}")]
    NotFound(String),
    /// The WUX writer was finalized with the wrong number of bytes.
    #[error("wrote {written} bytes, expected {expected}")]
    ShortWrite {
        /// Bytes accepted before finalization.
        written: u64,
        /// Bytes the header promised.
        expected: u64,
    },
    /// A general I/O error.
    #[error("I/O error: {0}")]
    Io(String, #[source] std::io::Error),
    /// An unknown error.
    #[error("error: {0}")]
    Other(String),
}

impl From<&str> for Error {
    #[inline]
    fn from(s: &str) -> Error { Error::Other(s.to_string()) }
}

impl From<String> for Error {
    #[inline]
    fn from(s: String) -> Error { Error::Other(s) }
}

/// Helper result type for [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Helper trait for adding context to errors.
pub trait ErrorContext {
    /// Adds context to an error.
    fn context(self, context: impl Into<String>) -> Error;
}

impl ErrorContext for std::io::Error {
    #[inline]
    fn context(self, context: impl Into<String>) -> Error { Error::Io(context.into(), self) }
}

/// Helper trait for adding context to result errors.
pub trait ResultContext<T> {
    /// Adds context to a result error.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Adds context to a result error using a closure.
    fn with_context<F>(self, f: F) -> Result<T>
    where F: FnOnce() -> String;
}

impl<T, E> ResultContext<T> for Result<T, E>
where E: ErrorContext
{
    #[inline]
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    #[inline]
    fn with_context<F>(self, f: F) -> Result<T>
    where F: FnOnce() -> String {
        self.map_err(|e| e.context(f()))
    }
}
