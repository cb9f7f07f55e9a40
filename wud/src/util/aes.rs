use std::{io, io::BufRead};

use crate::{
    common::KeyBytes,
    util::{array_ref, impl_read_for_bufread, Align},
};

/// Decrypts data in-place using AES-128-CBC with the given key and IV.
pub(crate) fn aes_cbc_decrypt(key: &KeyBytes, iv: &KeyBytes, data: &mut [u8]) {
    use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};
    assert_eq!(data.len() % 16, 0);
    <cbc::Decryptor<aes::Aes128>>::new(key.into(), iv.into())
        .decrypt_padded_mut::<NoPadding>(data)
        .unwrap();
}

/// Encrypts data in-place using AES-128-CBC with the given key and IV.
#[cfg(test)]
pub(crate) fn aes_cbc_encrypt(key: &KeyBytes, iv: &KeyBytes, data: &mut [u8]) {
    use aes::cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit};
    assert_eq!(data.len() % 16, 0);
    let len = data.len();
    <cbc::Encryptor<aes::Aes128>>::new(key.into(), iv.into())
        .encrypt_padded_mut::<NoPadding>(data, len)
        .unwrap();
}

const CBC_BUFFER_SIZE: usize = 0x8000;

/// An AES-128-CBC decryption stream over a fixed-length ciphertext source.
///
/// Reads `plaintext_len` rounded up to the AES block size from the inner
/// reader and yields exactly `plaintext_len` bytes of plaintext, truncating
/// the final block. Each instance owns its chain state; never share one IV
/// across readers.
pub(crate) struct CbcReader<R> {
    inner: R,
    key: KeyBytes,
    iv: KeyBytes,
    plain_remaining: u64,
    cipher_remaining: u64,
    buf: Box<[u8]>,
    pos: usize,
    end: usize,
}

impl<R> CbcReader<R>
where R: io::Read
{
    pub fn new(inner: R, key: KeyBytes, iv: KeyBytes, plaintext_len: u64) -> Self {
        Self {
            inner,
            key,
            iv,
            plain_remaining: plaintext_len,
            cipher_remaining: plaintext_len.align_up(16),
            buf: vec![0u8; CBC_BUFFER_SIZE].into_boxed_slice(),
            pos: 0,
            end: 0,
        }
    }
}

impl<R> BufRead for CbcReader<R>
where R: io::Read
{
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos == self.end {
            if self.cipher_remaining == 0 || self.plain_remaining == 0 {
                return Ok(&[]);
            }
            let n = self.buf.len().min(self.cipher_remaining as usize);
            self.inner.read_exact(&mut self.buf[..n])?;
            self.cipher_remaining -= n as u64;
            // Chain onto the last ciphertext block before decrypting in-place
            let next_iv = *array_ref![self.buf, n - 16, 16];
            aes_cbc_decrypt(&self.key, &self.iv, &mut self.buf[..n]);
            self.iv = next_iv;
            self.pos = 0;
            self.end = (n as u64).min(self.plain_remaining) as usize;
        }
        Ok(&self.buf[self.pos..self.end])
    }

    fn consume(&mut self, amt: usize) {
        self.pos += amt;
        self.plain_remaining -= amt as u64;
    }
}

impl_read_for_bufread!(CbcReader);

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test]
    fn test_cbc_reader_truncates_final_block() {
        let key: KeyBytes = [0x42; 16];
        let iv: KeyBytes = [7; 16];
        let plaintext: Vec<u8> = (0u8..100).collect();
        let mut data = plaintext.clone();
        data.resize(112, 0);
        aes_cbc_encrypt(&key, &iv, &mut data);

        let mut reader = CbcReader::new(data.as_slice(), key, iv, 100);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, plaintext);
    }

    #[test]
    fn test_cbc_reader_chains_across_refills() {
        let key: KeyBytes = [0x13; 16];
        let iv: KeyBytes = [0; 16];
        // Longer than one internal buffer to force multiple fills
        let plaintext: Vec<u8> =
            (0..CBC_BUFFER_SIZE * 2 + 48).map(|i| (i % 251) as u8).collect();
        let mut data = plaintext.clone();
        aes_cbc_encrypt(&key, &iv, &mut data);

        let mut reader = CbcReader::new(data.as_slice(), key, iv, plaintext.len() as u64);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, plaintext);
    }
}
