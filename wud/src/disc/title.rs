//! Title metadata and ticket types.

use std::mem::size_of;

use zerocopy::{big_endian::*, FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    common::KeyBytes,
    util::{aes::aes_cbc_decrypt, static_assert},
};

/// Signed blob header
#[derive(Debug, Clone, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(4))]
pub struct SignedHeader {
    /// Signature type, always 0x00010004 (RSA-2048 / SHA-256)
    pub sig_type: U32,
    /// RSA-2048 signature
    pub sig: [u8; 256],
    _pad: [u8; 60],
}

static_assert!(size_of::<SignedHeader>() == 0x140);

/// Title metadata header
///
/// Signatures and content hashes are carried verbatim; nothing here is
/// cryptographically verified.
#[derive(Debug, Clone, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(4))]
pub struct TmdHeader {
    /// Signed blob header
    pub header: SignedHeader,
    /// Signature issuer
    pub sig_issuer: [u8; 64],
    /// TMD format version
    pub version: u8,
    /// CA CRL version
    pub ca_crl_version: u8,
    /// Signer CRL version
    pub signer_crl_version: u8,
    _pad1: u8,
    /// Required system (OS) version
    pub system_version: U64,
    /// Title ID
    pub title_id: U64,
    /// Title type
    pub title_type: U32,
    /// Group ID
    pub group_id: U16,
    _pad2: [u8; 62],
    /// Access rights
    pub access_rights: U32,
    /// Title version
    pub title_version: U16,
    /// Number of contents
    pub content_count: U16,
    /// Boot index
    pub boot_idx: U16,
    _pad3: [u8; 2],
    /// SHA-256 over the content info records
    pub sha2: [u8; 32],
    /// Content info records
    pub content_infos: [ContentInfo; 64],
}

static_assert!(size_of::<TmdHeader>() == 0xB04);

/// TMD content info record
#[derive(Debug, Clone, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(4))]
pub struct ContentInfo {
    /// First content index covered by this record
    pub index_offset: U16,
    /// Number of contents covered by this record
    pub command_count: U16,
    /// SHA-256 over the covered content records
    pub sha2: [u8; 32],
}

static_assert!(size_of::<ContentInfo>() == 0x24);

/// TMD content metadata
#[derive(Debug, Clone, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(4))]
pub struct ContentMetadata {
    /// Content ID
    pub id: U32,
    /// Content index
    pub index: U16,
    /// Content type flags; 0x2 marks contents with an H3 hash tree
    pub content_type: U16,
    /// Content size
    pub size: U64,
    /// Content SHA-256 hash
    pub sha2: [u8; 32],
}

static_assert!(size_of::<ContentMetadata>() == 0x30);

/// Contents with this type flag have an H3 hash tree emitted alongside.
pub const CONTENT_TYPE_HASHED: u16 = 0x2;

/// Wii U ticket
#[derive(Debug, Clone, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(4))]
pub struct Ticket {
    /// Signed blob header
    pub header: SignedHeader,
    /// Signature issuer
    pub sig_issuer: [u8; 64],
    /// ECDH data
    pub ecdh: [u8; 60],
    /// Ticket format version
    pub version: u8,
    _pad1: [u8; 2],
    /// Title key (encrypted)
    pub title_key: KeyBytes,
    _pad2: u8,
    /// Ticket ID
    pub ticket_id: [u8; 8],
    /// Console ID
    pub console_id: [u8; 4],
    /// Title ID
    pub title_id: [u8; 8],
    _pad3: [u8; 2],
    /// Ticket title version
    pub ticket_title_version: U16,
    _pad4: [u8; 8],
    /// Title export allowed
    pub title_export_allowed: u8,
    /// Common key index
    pub common_key_idx: u8,
    _pad5: [u8; 48],
    /// Content access permissions
    pub content_access_permissions: [u8; 64],
    _pad6: [u8; 2],
    /// Ticket limits
    pub limits: [u8; 64],
}

static_assert!(size_of::<Ticket>() == 0x2A4);

// The extractor peeks these fields before the structures are parsed in full
static_assert!(core::mem::offset_of!(Ticket, title_key) == 0x1BF);
static_assert!(core::mem::offset_of!(Ticket, title_id) == 0x1DC);
static_assert!(core::mem::offset_of!(TmdHeader, title_id) == 0x18C);

impl Ticket {
    /// Decrypts the title key using the common key.
    ///
    /// The IV is the 8-byte title ID; the low 8 bytes stay zero.
    pub fn decrypt_title_key(&self, common_key: &KeyBytes) -> KeyBytes {
        let mut iv: KeyBytes = [0; 16];
        iv[..8].copy_from_slice(&self.title_id);
        let mut title_key = self.title_key;
        aes_cbc_decrypt(common_key, &iv, &mut title_key);
        title_key
    }
}

/// Content location record inside content 0 (big endian)
#[derive(Debug, Clone, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(4))]
pub struct AppRecord {
    /// Content start within the GM partition, in sectors
    pub offset: U32,
    /// Content size, in sectors
    pub size: U32,
    /// Title ID
    pub title_id: U64,
    /// Group ID
    pub group_id: U32,
    _pad: [u8; 12],
}

static_assert!(size_of::<AppRecord>() == 0x20);
