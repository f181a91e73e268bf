//! AES-CBC for the AESV2 (128-bit) and AESV3 (256-bit) crypt filters.
//!
//! Padding is handled here (PKCS#7) and the cipher runs with `NoPadding`, so
//! the same helpers serve the unpadded key-wrapping steps of revision 5/6.

use crate::error::{Error, Result};
use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes256};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

fn crypto_err(what: &str) -> Error {
    Error::Encryption(what.to_string())
}

/// Encrypt with AES-CBC. The key length picks AES-128 or AES-256.
pub fn cbc_encrypt(key: &[u8], iv: &[u8], data: &[u8], pad: bool) -> Result<Vec<u8>> {
    if iv.len() != 16 {
        return Err(crypto_err("AES IV must be 16 bytes"));
    }
    let mut buf = data.to_vec();
    if pad {
        let n = 16 - data.len() % 16;
        buf.extend(std::iter::repeat(n as u8).take(n));
    } else if buf.len() % 16 != 0 {
        return Err(crypto_err("unpadded AES input must be block aligned"));
    }
    let len = buf.len();
    match key.len() {
        16 => Aes128CbcEnc::new(key.into(), iv.into())
            .encrypt_padded_mut::<NoPadding>(&mut buf, len)
            .map_err(|_| crypto_err("AES-128 encryption failed"))?,
        32 => Aes256CbcEnc::new(key.into(), iv.into())
            .encrypt_padded_mut::<NoPadding>(&mut buf, len)
            .map_err(|_| crypto_err("AES-256 encryption failed"))?,
        n => return Err(Error::Encryption(format!("unsupported AES key length {}", n))),
    };
    Ok(buf)
}

/// Decrypt with AES-CBC, optionally stripping PKCS#7 padding.
pub fn cbc_decrypt(key: &[u8], iv: &[u8], data: &[u8], unpad: bool) -> Result<Vec<u8>> {
    if iv.len() != 16 {
        return Err(crypto_err("AES IV must be 16 bytes"));
    }
    if data.is_empty() {
        return Ok(Vec::new());
    }
    if data.len() % 16 != 0 {
        return Err(crypto_err("AES ciphertext is not block aligned"));
    }
    let mut buf = data.to_vec();
    let plain_len = match key.len() {
        16 => Aes128CbcDec::new(key.into(), iv.into())
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| crypto_err("AES-128 decryption failed"))?
            .len(),
        32 => Aes256CbcDec::new(key.into(), iv.into())
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| crypto_err("AES-256 decryption failed"))?
            .len(),
        n => return Err(Error::Encryption(format!("unsupported AES key length {}", n))),
    };
    buf.truncate(plain_len);
    if !unpad {
        return Ok(buf);
    }
    let n = *buf.last().unwrap_or(&0) as usize;
    if n == 0 || n > 16 || n > buf.len() || buf[buf.len() - n..].iter().any(|&b| b as usize != n) {
        return Err(crypto_err("invalid PKCS#7 padding"));
    }
    buf.truncate(buf.len() - n);
    Ok(buf)
}
