use indicatif::{ProgressBar, ProgressStyle};

pub mod compress;
pub mod decompress;
pub mod extract;

/// Byte-denominated progress bar for the compress/decompress loops.
pub(crate) fn progress_bar(len: u64) -> ProgressBar {
    let style = ProgressStyle::with_template(
        "{elapsed_precise} {bar:40.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, eta {eta})",
    )
    .expect("Invalid progress template")
    .progress_chars("=> ");
    ProgressBar::new(len).with_style(style)
}
