//! Wii U disc format types and the [`DiscImage`] parser/extractor.

use std::{
    collections::HashMap,
    fs,
    fs::File,
    io,
    io::{Read, Write},
    mem::size_of,
    path::Path,
};

use tracing::debug;
use zerocopy::FromBytes;

use crate::{
    common::{KeyBytes, SECTOR_SIZE, UNCOMPRESSED_SIZE},
    disc::{
        fst::Fst,
        table::PartitionTable,
        title::{AppRecord, ContentMetadata, Ticket, TmdHeader, CONTENT_TYPE_HASHED},
    },
    read::{ImageStream, SectionReader},
    util::{
        aes::{aes_cbc_decrypt, CbcReader},
        array_ref,
        read::read_u32_be,
        Align,
    },
    Error, Result, ResultContext,
};

pub mod fst;
pub mod table;
pub mod title;

/// Name of the partition holding the system index (file table).
pub const SI_PARTITION: &[u8] = b"SI";

const TITLE_TMD: &[u8] = b"title.tmd";
const TITLE_TIK: &[u8] = b"title.tik";
const TITLE_CERT: &[u8] = b"title.cert";

/// High word of a Wii U application title ID. Entries whose embedded title ID
/// word differs are system titles and are not extracted.
const APP_TITLE_ID: u32 = 0x50000;

// Peek offsets used to filter title.tik / title.tmd entries during the FST
// walk, before either structure is parsed in full
const TIK_TITLE_ID_OFFSET: u64 = core::mem::offset_of!(Ticket, title_id) as u64;
const TMD_TITLE_ID_OFFSET: u64 = core::mem::offset_of!(TmdHeader, title_id) as u64;

/// A logical file inside the SI partition.
///
/// The IV is derived from the file's on-partition byte offset; the offset is
/// absolute in the disc and the size is the unencrypted length.
#[derive(Debug, Clone, Copy)]
struct FileEntry {
    iv: KeyBytes,
    offset: u64,
    size: u64,
}

impl FileEntry {
    /// Opens a decrypting reader yielding exactly `size` plaintext bytes.
    ///
    /// Chain state is fresh per reader; the underlying section spans the
    /// ciphertext rounded up to whole AES blocks.
    fn reader<'a>(
        &self,
        stream: &'a mut dyn ImageStream,
        key: &KeyBytes,
    ) -> CbcReader<SectionReader<'a>> {
        CbcReader::new(
            SectionReader::new(stream, self.offset, self.size.align_up(16)),
            *key,
            self.iv,
            self.size,
        )
    }
}

/// A parsed Wii U disc image.
///
/// Construction decrypts and walks the disc's structural sectors up front;
/// [`extract`](DiscImage::extract) then emits the title's metadata and
/// content files.
pub struct DiscImage {
    stream: Box<dyn ImageStream>,
    common_key: KeyBytes,
    game_key: KeyBytes,
    title: String,
    table: PartitionTable,
    files: HashMap<Box<[u8]>, FileEntry>,
}

impl DiscImage {
    /// Parses a disc image from the given stream.
    ///
    /// The stream must be exactly one uncompressed disc long. `game_key`
    /// decrypts the structural sectors; `common_key` is held to unwrap the
    /// title key at extraction time. Both must be 16 bytes.
    pub fn new(
        mut stream: Box<dyn ImageStream>,
        common_key: &[u8],
        game_key: &[u8],
    ) -> Result<Self> {
        if stream.len() != UNCOMPRESSED_SIZE {
            return Err(Error::BadSize(stream.len()));
        }
        let common_key =
            KeyBytes::try_from(common_key).map_err(|_| Error::BadKeySize(common_key.len()))?;
        let game_key =
            KeyBytes::try_from(game_key).map_err(|_| Error::BadKeySize(game_key.len()))?;

        let mut title = [0u8; 10];
        stream.read_exact_at(&mut title, 0).context("Reading disc title")?;
        let title = String::from_utf8_lossy(&title).into_owned();

        // Fourth sector: the partition table
        let mut sector = vec![0u8; SECTOR_SIZE];
        stream
            .read_exact_at(&mut sector, 3 * SECTOR_SIZE as u64)
            .context("Reading partition table sector")?;
        aes_cbc_decrypt(&game_key, &[0u8; 16], &mut sector);
        let table = PartitionTable::parse(&sector)?;

        let si = table
            .get(SI_PARTITION)
            .ok_or_else(|| Error::BadStructure("Can't find SI partition".to_string()))?;

        // Second SI sector: the file system table
        stream
            .read_exact_at(&mut sector, si + SECTOR_SIZE as u64)
            .context("Reading FST sector")?;
        aes_cbc_decrypt(&game_key, &[0u8; 16], &mut sector);
        let fst = Fst::new(&sector)?;

        let mut files = HashMap::<Box<[u8]>, FileEntry>::new();
        for entry in &fst.entries[1..] {
            if !entry.is_file() {
                continue;
            }
            let name = fst.name(entry)?;
            // First entry with a given name wins
            if files.contains_key(name) {
                continue;
            }

            let data_offset = entry.offset() * fst.file_offset_factor as u64;
            let mut iv: KeyBytes = [0; 16];
            iv[8..].copy_from_slice(&(data_offset >> 16).to_be_bytes());
            let file = FileEntry {
                iv,
                offset: si + 2 * SECTOR_SIZE as u64 + data_offset,
                size: entry.size(),
            };

            if name == TITLE_CERT {
                files.insert(Box::from(name), file);
                continue;
            }
            let peek_offset = if name == TITLE_TIK {
                TIK_TITLE_ID_OFFSET
            } else if name == TITLE_TMD {
                TMD_TITLE_ID_OFFSET
            } else {
                continue;
            };

            let mut reader = file.reader(stream.as_mut(), &game_key);
            io::copy(&mut reader.by_ref().take(peek_offset), &mut io::sink())
                .context("Seeking to title ID")?;
            if read_u32_be(&mut reader).context("Reading title ID")? != APP_TITLE_ID {
                continue;
            }
            files.insert(Box::from(name), file);
        }

        debug!(
            "Parsed disc {:?}: {} partitions, {} title files",
            title,
            table.len(),
            files.len()
        );
        Ok(Self { stream, common_key, game_key, title, table, files })
    }

    /// The disc's 10-character short title, used as the output directory
    /// name.
    #[inline]
    pub fn title(&self) -> &str { &self.title }

    /// The disc's partition table.
    #[inline]
    pub fn partition_table(&self) -> &PartitionTable { &self.table }

    /// Extracts the title's metadata and content files into
    /// `directory/<title>/`, creating it if necessary.
    ///
    /// Emits `title.tmd`, `title.tik` and `title.cert` decrypted, one
    /// `<id>.app` per content (content 0 as stored, the rest verbatim), and
    /// an `<id>.h3` hash tree for each content flagged as hashed.
    pub fn extract(&mut self, directory: &Path) -> Result<()> {
        let dir = directory.join(&self.title);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Creating directory {}", dir.display()))?;

        let tmd_data = self.extract_file(TITLE_TMD, &dir.join("title.tmd"))?;
        let (tmd, rest) = TmdHeader::ref_from_prefix(&tmd_data)
            .map_err(|_| Error::BadStructure("Truncated TMD".to_string()))?;
        let content_count = tmd.content_count.get() as usize;
        let (contents, _) =
            <[ContentMetadata]>::ref_from_prefix_with_elems(rest, content_count).map_err(|_| {
                Error::BadStructure(format!("TMD truncated at {} contents", content_count))
            })?;
        if contents.is_empty() {
            return Err(Error::BadStructure("TMD has no contents".to_string()));
        }

        let gm_prefix = format!("GM{:016X}", tmd.title_id.get());
        let (_, gm) = self.table.find_prefix(gm_prefix.as_bytes()).ok_or_else(|| {
            Error::BadStructure(format!("Can't find {} partition", gm_prefix))
        })?;

        // The GM partition's first sector locates the H3 hash data: 16 bytes,
        // a header count, then 0x2C bytes plus one word per header
        let mut word = [0u8; 4];
        self.stream.read_exact_at(&mut word, gm + 0x10).context("Reading GM header")?;
        let header_count = u32::from_be_bytes(word);
        let mut hash_pos = gm + 0x14 + 0x2C + header_count as u64 * 4;

        let tik_data = self.extract_file(TITLE_TIK, &dir.join("title.tik"))?;
        let (ticket, _) = Ticket::ref_from_prefix(&tik_data)
            .map_err(|_| Error::BadStructure("Truncated ticket".to_string()))?;
        let title_key = ticket.decrypt_title_key(&self.common_key);

        // Content 0 is copied to disk as stored; its decrypted prefix holds
        // the location records for the remaining contents
        let mut iv: KeyBytes = [0; 16];
        iv[..2].copy_from_slice(&contents[0].index.get().to_be_bytes());
        let app_path = dir.join(format!("{:08x}.app", contents[0].id.get()));
        debug!("Extracting {} ({} bytes)", app_path.display(), contents[0].size.get());
        let mut out = File::create(&app_path)
            .with_context(|| format!("Creating file {}", app_path.display()))?;

        let needed = 0x20 + content_count * size_of::<AppRecord>();
        let mut plain = Vec::with_capacity(needed);
        let mut chunk = vec![0u8; SECTOR_SIZE];
        let mut pos = gm + SECTOR_SIZE as u64;
        let mut remaining = contents[0].size.get().align_up(16);
        while remaining > 0 {
            let n = (chunk.len() as u64).min(remaining) as usize;
            self.stream.read_exact_at(&mut chunk[..n], pos).context("Reading content 0")?;
            out.write_all(&chunk[..n])
                .with_context(|| format!("Writing file {}", app_path.display()))?;
            if plain.len() < needed {
                let next_iv = *array_ref![chunk, n - 16, 16];
                aes_cbc_decrypt(&title_key, &iv, &mut chunk[..n]);
                iv = next_iv;
                let take = n.min(needed - plain.len());
                plain.extend_from_slice(&chunk[..take]);
            }
            pos += n as u64;
            remaining -= n as u64;
        }
        drop(out);
        let (apps, _) = <[AppRecord]>::ref_from_prefix_with_elems(
            plain.get(0x20..).unwrap_or_default(),
            content_count,
        )
        .map_err(|_| Error::BadStructure("Content 0 too small for app records".to_string()))?;

        for i in 1..content_count {
            let meta = &contents[i];
            let offset = gm + apps[i].offset.get() as u64 * SECTOR_SIZE as u64;
            self.copy_to_file(offset, meta.size.get(), &dir.join(format!("{:08x}.app", meta.id.get())))?;
            if meta.content_type.get() & CONTENT_TYPE_HASHED != 0 {
                let h3_len = 20 * (meta.size.get() / 0x1000_0000 + 1);
                self.copy_to_file(hash_pos, h3_len, &dir.join(format!("{:08x}.h3", meta.id.get())))?;
                hash_pos += h3_len;
            }
        }

        self.extract_file(TITLE_CERT, &dir.join("title.cert"))?;
        Ok(())
    }

    /// Decrypts a title file to disk and returns its contents.
    fn extract_file(&mut self, name: &[u8], path: &Path) -> Result<Vec<u8>> {
        let Some(file) = self.files.get(name).copied() else {
            return Err(Error::NotFound(String::from_utf8_lossy(name).into_owned()));
        };
        debug!("Extracting {} ({} bytes)", path.display(), file.size);
        let mut reader = file.reader(self.stream.as_mut(), &self.game_key);
        let mut data = Vec::with_capacity(file.size as usize);
        reader
            .read_to_end(&mut data)
            .with_context(|| format!("Decrypting {}", String::from_utf8_lossy(name)))?;
        fs::write(path, &data).with_context(|| format!("Writing file {}", path.display()))?;
        Ok(data)
    }

    /// Copies raw disc bytes to a file.
    fn copy_to_file(&mut self, offset: u64, size: u64, path: &Path) -> Result<()> {
        debug!("Extracting {} ({} bytes)", path.display(), size);
        let mut file = File::create(path)
            .with_context(|| format!("Creating file {}", path.display()))?;
        let copied = io::copy(&mut SectionReader::new(self.stream.as_mut(), offset, size), &mut file)
            .with_context(|| format!("Writing file {}", path.display()))?;
        if copied != size {
            return Err(Error::Io(
                format!("Writing file {}", path.display()),
                io::Error::from(io::ErrorKind::UnexpectedEof),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use zerocopy::{FromZeros, IntoBytes};

    use super::*;
    use crate::{
        disc::{fst::tests::build_sector as build_fst, table::tests::build_sector as build_toc},
        util::aes::aes_cbc_encrypt,
    };

    const COMMON_KEY: KeyBytes = [0x11; 16];
    const GAME_KEY: KeyBytes = [0x22; 16];
    const TITLE_KEY: KeyBytes = [0x33; 16];
    const APP_TID: u64 = 0x0005_0000_1234_5678;

    const SI: u64 = 16 * SECTOR_SIZE as u64;
    const GM: u64 = 32 * SECTOR_SIZE as u64;

    /// A disc-sized stream backed by a small prefix; everything past the
    /// backing data reads as zeros.
    #[derive(Clone)]
    struct SparseStream {
        data: Vec<u8>,
    }

    impl ImageStream for SparseStream {
        fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
            if offset >= UNCOMPRESSED_SIZE {
                return Ok(0);
            }
            let len = (buf.len() as u64).min(UNCOMPRESSED_SIZE - offset) as usize;
            let buf = &mut buf[..len];
            buf.fill(0);
            if offset < self.data.len() as u64 {
                let avail = &self.data[offset as usize..];
                let n = avail.len().min(len);
                buf[..n].copy_from_slice(&avail[..n]);
            }
            Ok(len)
        }

        fn len(&self) -> u64 { UNCOMPRESSED_SIZE }
    }

    fn put(data: &mut Vec<u8>, offset: u64, bytes: &[u8]) {
        let offset = offset as usize;
        if data.len() < offset + bytes.len() {
            data.resize(offset + bytes.len(), 0);
        }
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn file_iv(data_offset: u64) -> KeyBytes {
        let mut iv: KeyBytes = [0; 16];
        iv[8..].copy_from_slice(&(data_offset >> 16).to_be_bytes());
        iv
    }

    /// Encrypts a title file the way the SI partition stores it.
    fn encrypt_file(plain: &[u8], data_offset: u64) -> Vec<u8> {
        let mut data = plain.to_vec();
        data.resize(plain.len().align_up(16), 0);
        aes_cbc_encrypt(&GAME_KEY, &file_iv(data_offset), &mut data);
        data
    }

    fn build_tmd(title_id: u64, contents: &[(u32, u16, u16, u64)]) -> Vec<u8> {
        let mut tmd = TmdHeader::new_zeroed();
        tmd.title_id = title_id.into();
        tmd.content_count = (contents.len() as u16).into();
        let mut data = tmd.as_bytes().to_vec();
        for &(id, index, content_type, size) in contents {
            let mut meta = ContentMetadata::new_zeroed();
            meta.id = id.into();
            meta.index = index.into();
            meta.content_type = content_type.into();
            meta.size = size.into();
            data.extend_from_slice(meta.as_bytes());
        }
        data
    }

    fn build_tik(title_id: u64) -> Vec<u8> {
        let mut ticket = Ticket::new_zeroed();
        ticket.title_id = title_id.to_be_bytes();
        let mut iv: KeyBytes = [0; 16];
        iv[..8].copy_from_slice(&ticket.title_id);
        let mut key = TITLE_KEY;
        aes_cbc_encrypt(&COMMON_KEY, &iv, &mut key);
        ticket.title_key = key;
        let mut data = ticket.as_bytes().to_vec();
        data.resize(0x350, 0);
        data
    }

    fn build_content0() -> Vec<u8> {
        let mut plain = vec![0u8; 128];
        let mut app1 = AppRecord::new_zeroed();
        app1.offset = 2.into(); // sectors past the GM partition start
        app1.size = 1.into();
        app1.title_id = APP_TID.into();
        plain[0x40..0x60].copy_from_slice(app1.as_bytes());
        let mut iv: KeyBytes = [0; 16];
        iv[..2].copy_from_slice(&2u16.to_be_bytes()); // contents[0].index
        aes_cbc_encrypt(&TITLE_KEY, &iv, &mut plain);
        plain
    }

    fn content1_data() -> Vec<u8> { (0..64).map(|i| i as u8 + 0x80).collect() }

    fn h3_data() -> Vec<u8> { (0..20).collect() }

    fn build_disc(title_id: u64) -> SparseStream {
        let mut data = Vec::new();
        put(&mut data, 0, b"WUDTEST123");

        let mut toc = build_toc(&[(b"SI", 16), (b"GM0005000012345678", 32)]);
        aes_cbc_encrypt(&GAME_KEY, &[0; 16], &mut toc);
        put(&mut data, 3 * SECTOR_SIZE as u64, &toc);

        let tmd_plain = build_tmd(title_id, &[(0x0a, 2, 0x1, 128), (0x0b, 1, 0x2, 64)]);
        let mut fst_sector = build_fst(0x20, &[
            (b"title.tmd", 0, 0x0, tmd_plain.len() as u32),
            (b"title.tik", 0, 0x100, 0x350),
            (b"title.cert", 0, 0x800, 0x500),
        ]);
        aes_cbc_encrypt(&GAME_KEY, &[0; 16], &mut fst_sector);
        put(&mut data, SI + SECTOR_SIZE as u64, &fst_sector);

        // Title files, at entry offset * factor past the second SI sector
        let file_base = SI + 2 * SECTOR_SIZE as u64;
        put(&mut data, file_base, &encrypt_file(&tmd_plain, 0));
        put(&mut data, file_base + 0x2000, &encrypt_file(&build_tik(title_id), 0x2000));
        put(&mut data, file_base + 0x10000, &encrypt_file(&[0xCE; 0x500], 0x10000));

        // GM header: one extra header word, then H3 hash data
        put(&mut data, GM + 0x10, &1u32.to_be_bytes());
        put(&mut data, GM + 0x14 + 0x2C + 4, &h3_data());

        put(&mut data, GM + SECTOR_SIZE as u64, &build_content0());
        put(&mut data, GM + 2 * SECTOR_SIZE as u64, &content1_data());
        SparseStream { data }
    }

    fn test_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("wud-disc-{}-{}", name, std::process::id()))
    }

    #[test]
    fn test_extract_golden() {
        let mut disc =
            DiscImage::new(Box::new(build_disc(APP_TID)), &COMMON_KEY, &GAME_KEY).unwrap();
        assert_eq!(disc.title(), "WUDTEST123");
        assert_eq!(disc.partition_table().len(), 2);

        let dir = test_dir("golden");
        fs::create_dir_all(&dir).unwrap();
        disc.extract(&dir).unwrap();

        let out = dir.join("WUDTEST123");
        let tmd_plain = build_tmd(APP_TID, &[(0x0a, 2, 0x1, 128), (0x0b, 1, 0x2, 64)]);
        assert_eq!(fs::read(out.join("title.tmd")).unwrap(), tmd_plain);
        assert_eq!(fs::read(out.join("title.tik")).unwrap(), build_tik(APP_TID));
        assert_eq!(fs::read(out.join("title.cert")).unwrap(), vec![0xCE; 0x500]);
        // Content 0 is written as stored (still encrypted), content 1 verbatim
        assert_eq!(fs::read(out.join("0000000a.app")).unwrap(), build_content0());
        assert_eq!(fs::read(out.join("0000000b.app")).unwrap(), content1_data());
        assert_eq!(fs::read(out.join("0000000b.h3")).unwrap(), h3_data());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 6);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_title_id_filter() {
        // A system title ID fails the 0x50000 word check; tik and tmd are
        // both skipped during the FST walk
        let mut disc = DiscImage::new(
            Box::new(build_disc(0x0001_0005_1234_5678)),
            &COMMON_KEY,
            &GAME_KEY,
        )
        .unwrap();
        let dir = test_dir("filtered");
        fs::create_dir_all(&dir).unwrap();
        match disc.extract(&dir) {
            Err(Error::NotFound(name)) => assert_eq!(name, "title.tmd"),
            other => panic!("expected NotFound, got {:?}", other),
        }
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_wrong_size_rejected() {
        let stream = io::Cursor::new(vec![0u8; 1024]);
        assert!(matches!(
            DiscImage::new(Box::new(stream), &COMMON_KEY, &GAME_KEY),
            Err(Error::BadSize(1024))
        ));
    }

    #[test]
    fn test_bad_key_size_rejected() {
        let stream = SparseStream { data: Vec::new() };
        assert!(matches!(
            DiscImage::new(Box::new(stream), &[0u8; 8], &GAME_KEY),
            Err(Error::BadKeySize(8))
        ));
    }
}
