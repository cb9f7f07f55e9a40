use std::{fs::File, io::Write, path::PathBuf};

use argp::FromArgs;
use sha1::{Digest, Sha1};
use size::Size;
use wud::{
    common::{SECTOR_SIZE, UNCOMPRESSED_SIZE, WUX_EXTENSION},
    read::ImageStream,
    ResultContext, SplitImageReader, WuxReader, WuxWriter,
};

use super::progress_bar;

#[derive(FromArgs, Debug)]
/// Compresses a .wud disc image into a .wux file.
#[argp(subcommand, name = "compress")]
pub struct Args {
    #[argp(positional)]
    /// path to disc image
    file: PathBuf,
    #[argp(positional)]
    /// output WUX file (default: the image path with a .wux extension)
    target: Option<PathBuf>,
    #[argp(switch)]
    /// skip verifying the written file
    no_verify: bool,
}

const BUFFER_SIZE: usize = SECTOR_SIZE * 32;

pub fn run(args: Args) -> wud::Result<()> {
    let mut reader = SplitImageReader::new(&args.file)?;
    if reader.len() != UNCOMPRESSED_SIZE {
        return Err(wud::Error::BadSize(reader.len()));
    }
    let target = args.target.unwrap_or_else(|| args.file.with_extension(WUX_EXTENSION));

    println!("Compressing {} to {}", args.file.display(), target.display());
    let out = File::create(&target)
        .with_context(|| format!("Creating file {}", target.display()))?;
    let mut writer = WuxWriter::new(out, SECTOR_SIZE as u32, UNCOMPRESSED_SIZE)?;

    let mut hasher = Sha1::new();
    let pb = progress_bar(UNCOMPRESSED_SIZE);
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut offset = 0u64;
    while offset < UNCOMPRESSED_SIZE {
        let n = (BUFFER_SIZE as u64).min(UNCOMPRESSED_SIZE - offset) as usize;
        reader
            .read_exact_at(&mut buf[..n], offset)
            .with_context(|| format!("Reading disc image at offset {}", offset))?;
        if !args.no_verify {
            hasher.update(&buf[..n]);
        }
        writer.write_all(&buf[..n]).context("Writing WUX file")?;
        offset += n as u64;
        pb.set_position(offset);
    }
    let file = writer.finish()?;
    let written = file.metadata().map(|m| m.len()).unwrap_or(0);
    drop(file);
    pb.finish();
    println!("Wrote {} to {}", Size::from_bytes(written), target.display());

    if !args.no_verify {
        let expected = hasher.finalize();
        println!("Verifying...");
        let mut wux = WuxReader::new(Box::new(SplitImageReader::new(&target)?))?;
        let mut hasher = Sha1::new();
        let pb = progress_bar(UNCOMPRESSED_SIZE);
        let mut offset = 0u64;
        while offset < UNCOMPRESSED_SIZE {
            let n = (BUFFER_SIZE as u64).min(UNCOMPRESSED_SIZE - offset) as usize;
            wux.read_exact_at(&mut buf[..n], offset)
                .with_context(|| format!("Reading WUX file at offset {}", offset))?;
            hasher.update(&buf[..n]);
            offset += n as u64;
            pb.set_position(offset);
        }
        pb.finish();
        if hasher.finalize() != expected {
            return Err("Verification failed".into());
        }
        println!("Verification OK");
    }
    Ok(())
}
