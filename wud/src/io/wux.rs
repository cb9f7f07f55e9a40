//! The WUX sector-deduplicated disc image container.
//!
//! A WUX file stores each unique 32 KiB sector of the source image once,
//! preceded by an index table mapping every logical sector to its unique
//! payload. Despite the fixed ~23.3 GiB disc size, most of that space is
//! unused filler, so deduplication alone routinely shrinks images by an
//! order of magnitude.

use std::{
    collections::HashMap,
    io,
    io::{Seek, SeekFrom, Write},
    mem::size_of,
    sync::Arc,
};

use tracing::debug;
use zerocopy::{little_endian::*, FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::{
    common::HashBytes,
    read::ImageStream,
    util::{digest::sha1_hash, div_rem, static_assert, Align},
    Error, Result, ResultContext,
};

/// Magic bytes at the start of every WUX file: "WUX0" then a fixed word.
pub const WUX_MAGIC: [u8; 8] = [0x57, 0x55, 0x58, 0x30, 0x2E, 0xD0, 0x99, 0x10];

/// WUX header (little endian)
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(4))]
struct WuxHeader {
    magic: [u8; 8],
    sector_size: U32,
    _pad1: [u8; 4],
    uncompressed_size: U64,
    flags: U32,
    _pad2: [u8; 4],
}

static_assert!(size_of::<WuxHeader>() == 0x20);

fn check_sector_size(sector_size: u32) -> Result<()> {
    if !(0x100..0x10000000).contains(&sector_size) {
        return Err(Error::BadStructure(format!("Invalid WUX sector size {:#x}", sector_size)));
    }
    Ok(())
}

/// Start of the sector payload region: the header and index table rounded up
/// to a whole sector.
fn payload_base(table_len: u64, sector_size: u64) -> u64 {
    (size_of::<WuxHeader>() as u64 + table_len * 4).align_up(sector_size)
}

/// Reads a WUX container, presenting the uncompressed image.
pub struct WuxReader {
    inner: Box<dyn ImageStream>,
    /// Map of logical sectors to unique payload sectors
    table: Arc<[U32]>,
    base: u64,
    sector_size: u64,
    uncompressed_size: u64,
}

impl WuxReader {
    /// Opens a WUX container from an underlying stream.
    ///
    /// Returns [`Error::BadMagic`] if the stream does not start with
    /// [`WUX_MAGIC`], letting callers fall back to another format.
    pub fn new(mut inner: Box<dyn ImageStream>) -> Result<Self> {
        let mut header = WuxHeader::new_zeroed();
        inner
            .read_exact_at(header.as_mut_bytes(), 0)
            .context("Reading WUX header")?;
        if header.magic != WUX_MAGIC {
            return Err(Error::BadMagic);
        }
        check_sector_size(header.sector_size.get())?;

        let sector_size = header.sector_size.get() as u64;
        let uncompressed_size = header.uncompressed_size.get();
        let table_len = uncompressed_size.div_ceil(sector_size);
        let mut table = <[U32]>::new_box_zeroed_with_elems(table_len as usize)
            .map_err(|_| Error::Other("WUX sector table too large".to_string()))?;
        inner
            .read_exact_at(table.as_mut_bytes(), size_of::<WuxHeader>() as u64)
            .context("Reading WUX sector table")?;

        debug!(
            "Opened WUX image: sector size {:#x}, {} sectors, {} bytes uncompressed",
            sector_size, table_len, uncompressed_size
        );
        Ok(Self {
            inner,
            table: Arc::from(table),
            base: payload_base(table_len, sector_size),
            sector_size,
            uncompressed_size,
        })
    }
}

impl ImageStream for WuxReader {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if offset >= self.uncompressed_size {
            return Ok(0);
        }
        let len = buf.len().min((self.uncompressed_size - offset) as usize);
        let mut total = 0;
        while total < len {
            let pos = offset + total as u64;
            let (sector, in_sector) = div_rem(pos, self.sector_size);
            let take = ((self.sector_size - in_sector) as usize).min(len - total);
            let phys =
                self.base + self.table[sector as usize].get() as u64 * self.sector_size + in_sector;
            self.inner.read_exact_at(&mut buf[total..total + take], phys)?;
            total += take;
        }
        Ok(total)
    }

    fn len(&self) -> u64 { self.uncompressed_size }
}

impl Clone for WuxReader {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            table: self.table.clone(),
            base: self.base,
            sector_size: self.sector_size,
            uncompressed_size: self.uncompressed_size,
        }
    }
}

/// Writes a WUX container from a sequential byte stream.
///
/// Accepts exactly `uncompressed_size` bytes via [`Write`], deduplicating
/// whole sectors by SHA-1 as they accumulate. SHA-1 is content addressing
/// here, not security; a collision within one image is far less likely than
/// the storage failing. Call [`finish`](WuxWriter::finish) to validate the
/// byte count and patch in the sector table.
pub struct WuxWriter<W>
where W: Write + Seek
{
    inner: W,
    table: Box<[U32]>,
    dedup: HashMap<HashBytes, u32>,
    buf: Vec<u8>,
    sector_size: u64,
    limit: u64,
    position: u64,
    next_sector: usize,
    unique: u32,
    error: Option<(io::ErrorKind, String)>,
}

impl<W> WuxWriter<W>
where W: Write + Seek
{
    /// Starts a new WUX container, writing the header and seeking to the
    /// payload region.
    pub fn new(mut inner: W, sector_size: u32, uncompressed_size: u64) -> Result<Self> {
        check_sector_size(sector_size)?;
        let header = WuxHeader {
            magic: WUX_MAGIC,
            sector_size: sector_size.into(),
            _pad1: [0; 4],
            uncompressed_size: uncompressed_size.into(),
            flags: 0.into(),
            _pad2: [0; 4],
        };
        inner.rewind().context("Seeking to start")?;
        inner.write_all(header.as_bytes()).context("Writing WUX header")?;

        let sector_size = sector_size as u64;
        let table_len = uncompressed_size.div_ceil(sector_size);
        let table = <[U32]>::new_box_zeroed_with_elems(table_len as usize)
            .map_err(|_| Error::Other("WUX sector table too large".to_string()))?;
        inner
            .seek(SeekFrom::Start(payload_base(table_len, sector_size)))
            .context("Seeking to sector payload region")?;
        Ok(Self {
            inner,
            table,
            dedup: HashMap::new(),
            buf: Vec::with_capacity(sector_size as usize),
            sector_size,
            limit: uncompressed_size,
            position: 0,
            next_sector: 0,
            unique: 0,
            error: None,
        })
    }

    /// Validates that exactly the promised number of bytes were written,
    /// patches the sector table into place, and returns the underlying sink.
    pub fn finish(mut self) -> Result<W> {
        if let Some((kind, message)) = self.error.take() {
            return Err(Error::Io(
                "WUX writer failed".to_string(),
                io::Error::new(kind, message),
            ));
        }
        if !self.buf.is_empty() || self.position != self.limit {
            return Err(Error::ShortWrite { written: self.position, expected: self.limit });
        }
        self.inner
            .seek(SeekFrom::Start(size_of::<WuxHeader>() as u64))
            .context("Seeking to sector table")?;
        self.inner.write_all(self.table.as_bytes()).context("Writing sector table")?;
        self.inner.flush().context("Flushing output")?;
        debug!("Wrote WUX image: {} of {} sectors unique", self.unique, self.table.len());
        Ok(self.inner)
    }

    fn flush_sector(&mut self) -> io::Result<()> {
        let digest = sha1_hash(&self.buf[..self.sector_size as usize]);
        let index = match self.dedup.get(&digest) {
            Some(&index) => index,
            None => {
                let index = self.unique;
                self.unique += 1;
                self.dedup.insert(digest, index);
                self.inner.write_all(&self.buf[..self.sector_size as usize])?;
                index
            }
        };
        self.table[self.next_sector] = index.into();
        self.next_sector += 1;
        self.buf.drain(..self.sector_size as usize);
        Ok(())
    }
}

impl<W> Write for WuxWriter<W>
where W: Write + Seek
{
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        // Once a write fails, every subsequent call reports the same error
        if let Some((kind, message)) = &self.error {
            return Err(io::Error::new(*kind, message.clone()));
        }
        if self.position + data.len() as u64 > self.limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Write past end of image ({} bytes expected)", self.limit),
            ));
        }
        self.buf.extend_from_slice(data);
        self.position += data.len() as u64;
        while self.buf.len() as u64 >= self.sector_size {
            if let Err(e) = self.flush_sector() {
                self.error = Some((e.kind(), e.to_string()));
                return Err(e);
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> { self.inner.flush() }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECTOR_SIZE: u32 = 0x100;

    fn compress(image: &[u8], sector_size: u32) -> Vec<u8> {
        let mut writer =
            WuxWriter::new(io::Cursor::new(Vec::new()), sector_size, image.len() as u64).unwrap();
        writer.write_all(image).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_bad_magic() {
        let stream = io::Cursor::new(vec![0u8; 80]);
        match WuxReader::new(Box::new(stream)) {
            Err(Error::BadMagic) => {}
            other => panic!("expected BadMagic, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_round_trip_with_dedup() {
        let ss = TEST_SECTOR_SIZE as usize;
        // 8 sectors, 3 unique patterns
        let patterns = [0u8, 1, 0, 2, 1, 1, 0, 2];
        let mut image = Vec::new();
        for &p in &patterns {
            image.extend(std::iter::repeat(p).take(ss));
        }
        let out = compress(&image, TEST_SECTOR_SIZE);

        // Header + table rounded up to a sector, then one payload per unique sector
        let base = (size_of::<WuxHeader>() + patterns.len() * 4).align_up(ss);
        assert_eq!(out.len(), base + 3 * ss);

        let mut reader = WuxReader::new(Box::new(io::Cursor::new(out))).unwrap();
        assert_eq!(reader.len(), image.len() as u64);
        let mut decoded = vec![0u8; image.len()];
        reader.read_exact_at(&mut decoded, 0).unwrap();
        assert_eq!(decoded, image);

        // Table indices form a dense prefix in first-seen order
        assert_eq!(
            reader.table.iter().map(|v| v.get()).collect::<Vec<_>>(),
            vec![0, 1, 0, 2, 1, 1, 0, 2]
        );
    }

    #[test]
    fn test_read_at_crosses_sectors() {
        let ss = TEST_SECTOR_SIZE as usize;
        let image: Vec<u8> = (0..ss * 4).map(|i| (i / 3) as u8).collect();
        let out = compress(&image, TEST_SECTOR_SIZE);
        let mut reader = WuxReader::new(Box::new(io::Cursor::new(out))).unwrap();

        let mut buf = vec![0u8; ss * 2];
        reader.read_exact_at(&mut buf, ss as u64 / 2).unwrap();
        assert_eq!(buf, image[ss / 2..ss / 2 + ss * 2]);

        // Reads past the uncompressed size truncate
        let mut buf = vec![0u8; 64];
        let n = reader.read_at(&mut buf, image.len() as u64 - 16).unwrap();
        assert_eq!(n, 16);
        assert_eq!(reader.read_at(&mut buf, image.len() as u64).unwrap(), 0);
    }

    #[test]
    fn test_short_input_rejected() {
        let ss = TEST_SECTOR_SIZE as usize;
        let mut writer =
            WuxWriter::new(io::Cursor::new(Vec::new()), TEST_SECTOR_SIZE, ss as u64 * 2).unwrap();
        writer.write_all(&vec![0u8; ss]).unwrap();
        match writer.finish() {
            Err(Error::ShortWrite { written, expected }) => {
                assert_eq!(written, ss as u64);
                assert_eq!(expected, ss as u64 * 2);
            }
            other => panic!("expected ShortWrite, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_overlong_input_rejected() {
        let ss = TEST_SECTOR_SIZE as usize;
        let mut writer =
            WuxWriter::new(io::Cursor::new(Vec::new()), TEST_SECTOR_SIZE, ss as u64).unwrap();
        writer.write_all(&vec![0u8; ss]).unwrap();
        assert!(writer.write(&[0u8; 1]).is_err());
    }

    #[test]
    fn test_bad_sector_size_rejected() {
        let mut data = Vec::new();
        data.extend_from_slice(&WUX_MAGIC);
        data.extend_from_slice(&0x80u32.to_le_bytes()); // below the 0x100 floor
        data.resize(0x20, 0);
        assert!(WuxReader::new(Box::new(io::Cursor::new(data))).is_err());
    }
}
