//! [`ImageStream`] and the format-probing [`open`] entry point.

use std::{io, path::Path};

use dyn_clone::DynClone;

use crate::{
    common::{Format, UNCOMPRESSED_SIZE},
    io::{split::SplitImageReader, wux::WuxReader},
    Error, Result,
};

/// Required capabilities for a random-access disc image source.
///
/// The length is known at open time and constant thereafter. `read_at` has no
/// positional state; concurrent use is serialized by the caller.
pub trait ImageStream: DynClone + Send {
    /// Reads up to `buf.len()` bytes at the given absolute offset, returning
    /// the number of bytes read. Returns `Ok(0)` at end of stream.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// The total length of the stream in bytes.
    fn len(&self) -> u64;

    /// Whether the stream is empty.
    #[inline]
    fn is_empty(&self) -> bool { self.len() == 0 }

    /// Fills `buf` from the given absolute offset, failing with
    /// [`UnexpectedEof`](io::ErrorKind::UnexpectedEof) if the stream ends
    /// first.
    fn read_exact_at(&mut self, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(buf, offset) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

dyn_clone::clone_trait_object!(ImageStream);

impl<T> ImageStream for io::Cursor<T>
where T: AsRef<[u8]> + Clone + Send
{
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let data = self.get_ref().as_ref();
        if offset >= data.len() as u64 {
            return Ok(0);
        }
        let data = &data[offset as usize..];
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn len(&self) -> u64 { self.get_ref().as_ref().len() as u64 }
}

/// A sequential reader over a fixed window of an [`ImageStream`].
pub struct SectionReader<'a> {
    stream: &'a mut dyn ImageStream,
    pos: u64,
    end: u64,
}

impl<'a> SectionReader<'a> {
    /// Creates a reader over `size` bytes starting at `offset`.
    #[inline]
    pub fn new(stream: &'a mut dyn ImageStream, offset: u64, size: u64) -> Self {
        Self { stream, pos: offset, end: offset + size }
    }
}

impl io::Read for SectionReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = (self.end - self.pos).min(buf.len() as u64) as usize;
        if limit == 0 {
            return Ok(0);
        }
        let n = self.stream.read_at(&mut buf[..limit], self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

/// Detects the disc image format by its leading magic bytes.
pub fn detect(stream: &mut dyn ImageStream) -> io::Result<Format> {
    let mut magic = [0u8; 8];
    match stream.read_exact_at(&mut magic, 0) {
        Ok(()) if magic == crate::io::wux::WUX_MAGIC => Ok(Format::Wux),
        Ok(()) => Ok(Format::Wud),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(Format::Wud),
        Err(e) => Err(e),
    }
}

/// Opens a disc image from a filesystem path, probing the format.
///
/// A WUX container is unwrapped transparently; anything else is treated as a
/// raw (possibly multipart) image. Either way the result is a stream over the
/// uncompressed disc contents.
pub fn open(path: &Path) -> Result<Box<dyn ImageStream>> {
    let mut stream = Box::new(SplitImageReader::new(path)?);
    match detect(stream.as_mut())
        .map_err(|e| Error::Io(format!("Probing {}", path.display()), e))?
    {
        Format::Wux => Ok(Box::new(WuxReader::new(stream)?)),
        Format::Wud => Ok(stream),
    }
}

/// Opens a disc image and verifies it is exactly one disc long.
///
/// Convenience wrapper for callers that require a full image, e.g. before
/// compression.
pub fn open_sized(path: &Path) -> Result<Box<dyn ImageStream>> {
    let stream = open(path)?;
    if stream.len() != UNCOMPRESSED_SIZE {
        return Err(Error::BadSize(stream.len()));
    }
    Ok(stream)
}
