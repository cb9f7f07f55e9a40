use std::{fs::File, io::Write, path::PathBuf};

use argp::FromArgs;
use size::Size;
use wud::{
    common::{SECTOR_SIZE, WUD_EXTENSION},
    read::ImageStream,
    ResultContext, SplitImageReader, WuxReader,
};

use super::progress_bar;

#[derive(FromArgs, Debug)]
/// Decompresses a .wux file back to a .wud disc image.
#[argp(subcommand, name = "decompress")]
pub struct Args {
    #[argp(positional)]
    /// path to WUX file
    file: PathBuf,
    #[argp(positional)]
    /// output disc image (default: the WUX path with a .wud extension)
    target: Option<PathBuf>,
}

const BUFFER_SIZE: usize = SECTOR_SIZE * 32;

pub fn run(args: Args) -> wud::Result<()> {
    let mut reader = WuxReader::new(Box::new(SplitImageReader::new(&args.file)?))?;
    let target = args.target.unwrap_or_else(|| args.file.with_extension(WUD_EXTENSION));

    println!("Decompressing {} to {}", args.file.display(), target.display());
    let mut out = File::create(&target)
        .with_context(|| format!("Creating file {}", target.display()))?;
    let len = reader.len();
    let pb = progress_bar(len);
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut offset = 0u64;
    while offset < len {
        let n = (BUFFER_SIZE as u64).min(len - offset) as usize;
        reader
            .read_exact_at(&mut buf[..n], offset)
            .with_context(|| format!("Reading WUX file at offset {}", offset))?;
        out.write_all(&buf[..n])
            .with_context(|| format!("Writing file {}", target.display()))?;
        offset += n as u64;
        pb.set_position(offset);
    }
    out.flush().context("Flushing output file")?;
    pb.finish();
    println!("Wrote {} to {}", Size::from_bytes(len), target.display());
    Ok(())
}
