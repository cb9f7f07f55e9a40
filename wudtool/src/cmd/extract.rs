use std::{env, fs, path::PathBuf};

use argp::FromArgs;
use wud::{
    common::{COMMON_KEY_FILE, GAME_KEY_FILE},
    DiscImage, ResultContext,
};

#[derive(FromArgs, Debug)]
/// Extracts .cert, .tik, .tmd & .app files from a .wud or .wux file.
#[argp(subcommand, name = "extract")]
pub struct Args {
    #[argp(positional)]
    /// path to disc image
    file: PathBuf,
    #[argp(positional)]
    /// path to common key (default: common.key beside the image)
    common_key: Option<PathBuf>,
    #[argp(positional)]
    /// path to game key (default: game.key beside the common key)
    game_key: Option<PathBuf>,
    #[argp(option, short = 'd')]
    /// extract to DIRECTORY (default: current directory)
    directory: Option<PathBuf>,
}

pub fn run(args: Args) -> wud::Result<()> {
    let common_path =
        args.common_key.unwrap_or_else(|| args.file.with_file_name(COMMON_KEY_FILE));
    let game_path =
        args.game_key.unwrap_or_else(|| common_path.with_file_name(GAME_KEY_FILE));
    let directory = match args.directory {
        Some(directory) => directory,
        None => env::current_dir().context("Getting current directory")?,
    };
    if !directory.is_dir() {
        return Err(format!("Not a directory: {}", directory.display()).into());
    }

    let common_key = fs::read(&common_path)
        .with_context(|| format!("Reading key file {}", common_path.display()))?;
    let game_key = fs::read(&game_path)
        .with_context(|| format!("Reading key file {}", game_path.display()))?;

    let stream = wud::read::open(&args.file)?;
    let mut disc = DiscImage::new(stream, &common_key, &game_key)?;
    println!("Title: {}", disc.title());
    disc.extract(&directory)?;
    println!("Extracted to {}", directory.join(disc.title()).display());
    Ok(())
}
