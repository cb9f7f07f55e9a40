//! Common types and disc constants.

use std::fmt;

/// SHA-1 hash bytes
pub type HashBytes = [u8; 20];

/// AES key bytes
pub type KeyBytes = [u8; 16];

/// Magic bytes
pub type MagicBytes = [u8; 4];

/// Size in bytes of a Wii U disc sector. (32 KiB)
///
/// This is both the unit of disc addressing and the deduplication
/// granularity of the WUX format.
pub const SECTOR_SIZE: usize = 0x8000;

/// Size in bytes of an uncompressed Wii U disc image. (~23.3 GiB)
///
/// Every pressed disc is exactly this size; anything else is rejected.
pub const UNCOMPRESSED_SIZE: u64 = 25_025_314_816;

/// Size in bytes of an AES-128 key.
pub const KEY_SIZE: usize = 16;

/// Conventional file extension for raw disc images.
pub const WUD_EXTENSION: &str = "wud";

/// Conventional file extension for compressed disc images.
pub const WUX_EXTENSION: &str = "wux";

/// Standard filename for the Wii U common key.
pub const COMMON_KEY_FILE: &str = "common.key";

/// Standard filename for the per-disc game key.
pub const GAME_KEY_FILE: &str = "game.key";

/// The disc image file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Raw disc image, possibly split into `game_part1.wud` parts
    #[default]
    Wud,
    /// Sector-deduplicated disc image
    Wux,
}

impl fmt::Display for Format {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Wud => write!(f, "WUD"),
            Format::Wux => write!(f, "WUX"),
        }
    }
}
