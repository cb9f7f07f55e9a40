//! The disc partition table.

use std::mem::size_of;

use tracing::debug;
use zerocopy::{big_endian::*, FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    common::{HashBytes, MagicBytes, SECTOR_SIZE},
    util::{digest::sha1_hash, static_assert},
    Error, Result,
};

/// Magic bytes at the start of the partition table sector.
pub const TOC_MAGIC: MagicBytes = [0xCC, 0xA6, 0xE6, 0x7B];

/// Offset of the first partition entry within the table sector. The SHA-1 in
/// the header covers everything from here to the end of the sector.
const ENTRY_BASE: usize = 0x800;

/// Partition table header (big endian)
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(4))]
struct TocHeader {
    magic: MagicBytes,
    _pad: [u8; 4],
    checksum: HashBytes,
    num_partitions: U32,
}

static_assert!(size_of::<TocHeader>() == 0x20);

/// Partition table entry (big endian)
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(4))]
struct TocEntry {
    name: [u8; 0x1F],
    _pad1: u8,
    /// Partition start, in sectors
    offset: U32,
    _pad2: [u8; 0x5C],
}

static_assert!(size_of::<TocEntry>() == 0x80);

/// A parsed disc partition table, mapping partition names to absolute byte
/// offsets.
///
/// Names are NUL-trimmed byte strings; the format does not promise any
/// particular encoding beyond printable ASCII in practice.
#[derive(Debug, Clone)]
pub struct PartitionTable {
    entries: Vec<(Box<[u8]>, u64)>,
}

impl PartitionTable {
    /// Parses the decrypted partition table sector.
    ///
    /// Verifies the header magic and the SHA-1 checksum covering
    /// `[0x800, 0x8000)` before trusting any entry.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() != SECTOR_SIZE {
            return Err(Error::BadStructure(format!(
                "Partition table sector is {} bytes, expected {}",
                buf.len(),
                SECTOR_SIZE
            )));
        }
        let (header, _) = TocHeader::ref_from_prefix(buf)
            .map_err(|_| Error::BadStructure("Truncated partition table header".to_string()))?;
        if header.magic != TOC_MAGIC {
            return Err(Error::BadMagic);
        }
        if sha1_hash(&buf[ENTRY_BASE..]) != header.checksum {
            return Err(Error::BadChecksum);
        }

        let num = header.num_partitions.get() as usize;
        let (raw_entries, _) =
            <[TocEntry]>::ref_from_prefix_with_elems(&buf[ENTRY_BASE..], num).map_err(|_| {
                Error::BadStructure(format!("Partition table overflows sector ({} entries)", num))
            })?;
        let mut entries = Vec::with_capacity(num);
        for entry in raw_entries {
            let name = trim_nul(&entry.name);
            entries.push((
                Box::from(name),
                entry.offset.get() as u64 * SECTOR_SIZE as u64,
            ));
        }
        debug!("Parsed partition table with {} entries", entries.len());
        Ok(Self { entries })
    }

    /// Returns the byte offset of the partition with the given name.
    pub fn get(&self, name: &[u8]) -> Option<u64> {
        self.entries.iter().find(|(n, _)| n.as_ref() == name).map(|&(_, offset)| offset)
    }

    /// Returns the first partition whose name starts with the given prefix.
    pub fn find_prefix(&self, prefix: &[u8]) -> Option<(&[u8], u64)> {
        self.entries
            .iter()
            .find(|(n, _)| n.starts_with(prefix))
            .map(|(n, offset)| (n.as_ref(), *offset))
    }

    /// The number of partitions on the disc.
    pub fn len(&self) -> usize { self.entries.len() }

    /// Whether the table contains no partitions.
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

fn trim_nul(name: &[u8]) -> &[u8] {
    let end = name.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &name[..end]
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn build_sector(entries: &[(&[u8], u32)]) -> Vec<u8> {
        let mut buf = vec![0u8; SECTOR_SIZE];
        for (i, (name, offset)) in entries.iter().enumerate() {
            let base = ENTRY_BASE + i * size_of::<TocEntry>();
            buf[base..base + name.len()].copy_from_slice(name);
            buf[base + 0x20..base + 0x24].copy_from_slice(&offset.to_be_bytes());
        }
        let checksum = sha1_hash(&buf[ENTRY_BASE..]);
        buf[..4].copy_from_slice(&TOC_MAGIC);
        buf[8..28].copy_from_slice(&checksum);
        buf[28..32].copy_from_slice(&(entries.len() as u32).to_be_bytes());
        buf
    }

    #[test]
    fn test_parse_round_trip() {
        let sector = build_sector(&[(b"SI", 16), (b"GM0005000012345678", 32)]);
        let table = PartitionTable::parse(&sector).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(b"SI"), Some(16 * SECTOR_SIZE as u64));
        assert_eq!(table.get(b"GM0005000012345678"), Some(32 * SECTOR_SIZE as u64));
        assert_eq!(
            table.find_prefix(b"GM0005000012345678"),
            Some((&b"GM0005000012345678"[..], 32 * SECTOR_SIZE as u64))
        );
        assert_eq!(table.get(b"UP"), None);
    }

    #[test]
    fn test_bad_magic() {
        let mut sector = build_sector(&[(b"SI", 16)]);
        sector[0] = 0;
        assert!(matches!(PartitionTable::parse(&sector), Err(Error::BadMagic)));
    }

    #[test]
    fn test_checksum_covers_whole_entry_region() {
        // Any flipped byte in [0x800, 0x8000) must be caught, including far
        // past the declared entries
        for position in [ENTRY_BASE, ENTRY_BASE + 0x81, SECTOR_SIZE - 1] {
            let mut sector = build_sector(&[(b"SI", 16)]);
            sector[position] ^= 0x01;
            assert!(
                matches!(PartitionTable::parse(&sector), Err(Error::BadChecksum)),
                "flip at {:#x} not detected",
                position
            );
        }
    }
}
