use sha1::Digest;

use crate::common::HashBytes;

/// Hashes a byte slice with SHA-1.
#[inline]
pub(crate) fn sha1_hash(buf: &[u8]) -> HashBytes { HashBytes::from(sha1::Sha1::digest(buf)) }
