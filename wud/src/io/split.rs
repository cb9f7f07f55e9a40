//! Raw disc images, possibly split into sequential fragments.

use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{common::WUD_EXTENSION, read::ImageStream, ErrorContext, Result};

/// Multipart images are named `game_part1.wud`, `game_part2.wud`, etc.
///
/// Only this exact basename triggers sibling probing; no other split scheme
/// is recognized.
const MULTIPART_PREFIX: &str = "game_part";

fn multipart_name(index: u32) -> String { format!("{}{}.{}", MULTIPART_PREFIX, index, WUD_EXTENSION) }

/// A raw `.wud` image presented as a single stream.
///
/// If the path's basename is exactly `game_part1.wud`, contiguously numbered
/// sibling fragments are appended until the next index does not exist. The
/// stream length is the sum of all fragment sizes.
#[derive(Debug)]
pub struct SplitImageReader {
    files: Vec<Split<PathBuf>>,
    open_file: Option<Split<File>>,
}

#[derive(Debug, Clone)]
struct Split<T> {
    inner: T,
    begin: u64,
    size: u64,
}

impl<T> Split<T> {
    fn contains(&self, pos: u64) -> bool { self.begin <= pos && pos < self.begin + self.size }
}

impl SplitImageReader {
    /// Opens a raw image, probing `game_part2.wud` onward when given the
    /// first part of a multipart series.
    ///
    /// A missing sibling ends the series; any other probe error is fatal.
    pub fn new(path: &Path) -> Result<Self> {
        let mut files = vec![];
        let mut begin = 0;
        match path.metadata() {
            Ok(metadata) => {
                files.push(Split { inner: path.to_path_buf(), begin, size: metadata.len() });
                begin += metadata.len();
            }
            Err(e) => {
                return Err(e.context(format!("Failed to stat file {}", path.display())));
            }
        }
        if path.file_name().is_some_and(|name| name == multipart_name(1).as_str()) {
            for index in 2.. {
                let sibling = path.with_file_name(multipart_name(index));
                match sibling.metadata() {
                    Ok(metadata) => {
                        files.push(Split { inner: sibling, begin, size: metadata.len() });
                        begin += metadata.len();
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => break,
                    Err(e) => {
                        return Err(
                            e.context(format!("Failed to stat file {}", sibling.display()))
                        );
                    }
                }
            }
            debug!("Opened {} fragments, {} bytes total", files.len(), begin);
        }
        Ok(Self { files, open_file: None })
    }
}

impl ImageStream for SplitImageReader {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut total = 0;
        // A single call may span consecutive fragments
        while total < buf.len() {
            let pos = offset + total as u64;
            let split = if self.open_file.as_ref().is_some_and(|s| s.contains(pos)) {
                self.open_file.as_mut().unwrap()
            } else if let Some(split) = self.files.iter().find(|f| f.contains(pos)) {
                let file = File::open(&split.inner)?;
                self.open_file =
                    Some(Split { inner: file, begin: split.begin, size: split.size });
                self.open_file.as_mut().unwrap()
            } else {
                break;
            };
            let limit =
                (split.begin + split.size - pos).min((buf.len() - total) as u64) as usize;
            let n = read_at_inner(&mut split.inner, &mut buf[total..total + limit], pos - split.begin)?;
            if n == 0 {
                // Fragment shorter than its recorded size
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
            }
            total += n;
        }
        Ok(total)
    }

    fn len(&self) -> u64 { self.files.last().map_or(0, |f| f.begin + f.size) }
}

#[cfg(unix)]
fn read_at_inner(file: &mut File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(not(unix))]
fn read_at_inner(file: &mut File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::io::{Read, Seek, SeekFrom};
    file.seek(SeekFrom::Start(offset))?;
    file.read(buf)
}

impl Clone for SplitImageReader {
    fn clone(&self) -> Self { Self { files: self.files.clone(), open_file: None } }
}
