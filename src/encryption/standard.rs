//! Standard security handler key derivation.
//!
//! Revisions 2 to 4 derive the file key from the padded password with MD5
//! and RC4. Revisions 5 and 6 wrap a random 256-bit file key under a
//! SHA-2 based password hash.

use super::aes::{cbc_decrypt, cbc_encrypt};
use super::rc4::rc4_crypt;
use md5::{Digest, Md5};
use sha2::{Sha256, Sha384, Sha512};

/// Password padding string.
pub(crate) const PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// Inputs shared by the revision 2 to 4 algorithms.
#[derive(Debug, Clone)]
pub(crate) struct LegacyParams<'a> {
    pub revision: u32,
    /// Key length in bytes (5..=16)
    pub key_len: usize,
    pub o: &'a [u8],
    pub p: i32,
    pub file_id: &'a [u8],
    pub encrypt_metadata: bool,
}

fn pad(password: &[u8]) -> [u8; 32] {
    let mut out = PADDING;
    let n = password.len().min(32);
    out[..n].copy_from_slice(&password[..n]);
    out[n..].copy_from_slice(&PADDING[..32 - n]);
    out
}

fn xor_key(key: &[u8], i: u8) -> Vec<u8> {
    key.iter().map(|b| b ^ i).collect()
}

/// Algorithm 2: file key from a user password.
pub(crate) fn file_key(password: &[u8], params: &LegacyParams<'_>) -> Vec<u8> {
    let mut md5 = Md5::new();
    md5.update(pad(password));
    md5.update(params.o);
    md5.update(params.p.to_le_bytes());
    md5.update(params.file_id);
    if params.revision >= 4 && !params.encrypt_metadata {
        md5.update([0xFF; 4]);
    }
    let mut hash = md5.finalize().to_vec();
    let n = params.key_len.min(16);
    if params.revision >= 3 {
        for _ in 0..50 {
            hash = Md5::digest(&hash[..n]).to_vec();
        }
    }
    hash.truncate(n);
    hash
}

/// Algorithms 4 and 5: the /U value for a file key.
pub(crate) fn user_hash(key: &[u8], params: &LegacyParams<'_>) -> Vec<u8> {
    if params.revision == 2 {
        return rc4_crypt(key, &PADDING);
    }
    let mut md5 = Md5::new();
    md5.update(PADDING);
    md5.update(params.file_id);
    let mut hash = md5.finalize().to_vec();
    for i in 0..20u8 {
        hash = rc4_crypt(&xor_key(key, i), &hash);
    }
    hash.extend_from_slice(&[0u8; 16]);
    hash
}

fn owner_rc4_key(owner_password: &[u8], revision: u32, key_len: usize) -> Vec<u8> {
    let n = key_len.min(16);
    let mut hash = Md5::digest(pad(owner_password)).to_vec();
    if revision >= 3 {
        for _ in 0..50 {
            hash = Md5::digest(&hash).to_vec();
        }
    }
    hash.truncate(n);
    hash
}

/// Algorithm 3: the /O value.
pub(crate) fn owner_hash(owner_password: &[u8], user_password: &[u8], revision: u32, key_len: usize) -> Vec<u8> {
    let password = if owner_password.is_empty() {
        user_password
    } else {
        owner_password
    };
    let key = owner_rc4_key(password, revision, key_len);
    let mut out = rc4_crypt(&key, &pad(user_password));
    if revision >= 3 {
        for i in 1..=19u8 {
            out = rc4_crypt(&xor_key(&key, i), &out);
        }
    }
    out
}

/// Algorithm 6: authenticate a user password, returning the file key.
pub(crate) fn authenticate_user(password: &[u8], u: &[u8], params: &LegacyParams<'_>) -> Option<Vec<u8>> {
    let key = file_key(password, params);
    let expected = user_hash(&key, params);
    let n = if params.revision == 2 { 32 } else { 16 };
    if u.len() >= n && constant_time_eq(&u[..n], &expected[..n]) {
        Some(key)
    } else {
        None
    }
}

/// Algorithm 7: authenticate an owner password by recovering the user
/// password from /O.
pub(crate) fn authenticate_owner(password: &[u8], u: &[u8], params: &LegacyParams<'_>) -> Option<Vec<u8>> {
    let key = owner_rc4_key(password, params.revision, params.key_len);
    let mut user_password = params.o.get(..32)?.to_vec();
    if params.revision == 2 {
        user_password = rc4_crypt(&key, &user_password);
    } else {
        for i in (0..=19u8).rev() {
            user_password = rc4_crypt(&xor_key(&key, i), &user_password);
        }
    }
    authenticate_user(&user_password, u, params)
}

fn truncate_utf8(password: &[u8]) -> &[u8] {
    &password[..password.len().min(127)]
}

/// Revision 5 uses a single SHA-256, revision 6 the iterated Algorithm 2.B.
pub(crate) fn hash_v5(revision: u32, password: &[u8], salt: &[u8], udata: &[u8]) -> [u8; 32] {
    let password = truncate_utf8(password);
    let mut k: Vec<u8> = {
        let mut h = Sha256::new();
        h.update(password);
        h.update(salt);
        h.update(udata);
        h.finalize().to_vec()
    };
    if revision >= 6 {
        let mut round = 0u32;
        loop {
            let mut k1 = Vec::with_capacity(64 * (password.len() + k.len() + udata.len()));
            for _ in 0..64 {
                k1.extend_from_slice(password);
                k1.extend_from_slice(&k);
                k1.extend_from_slice(udata);
            }
            let e = match cbc_encrypt(&k[..16], &k[16..32], &k1, false) {
                Ok(e) => e,
                // k1 is always block aligned; an error here means a broken cipher
                Err(_) => break,
            };
            let selector: u32 = e[..16].iter().map(|&b| b as u32).sum::<u32>() % 3;
            k = match selector {
                0 => Sha256::digest(&e).to_vec(),
                1 => Sha384::digest(&e).to_vec(),
                _ => Sha512::digest(&e).to_vec(),
            };
            round += 1;
            let last = *e.last().unwrap_or(&0) as u32;
            if round >= 64 && last + 32 <= round {
                break;
            }
        }
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&k[..32]);
    out
}

/// Revision 5/6 values needed for authentication.
pub(crate) struct ModernParams<'a> {
    pub revision: u32,
    pub o: &'a [u8],
    pub u: &'a [u8],
    pub oe: &'a [u8],
    pub ue: &'a [u8],
}

/// Algorithm 2.A: recover the file key with either password.
pub(crate) fn authenticate_v5(password: &[u8], params: &ModernParams<'_>) -> Option<Vec<u8>> {
    let (o, u) = (params.o, params.u);
    if o.len() < 48 || u.len() < 48 {
        return None;
    }
    let owner = hash_v5(params.revision, password, &o[32..40], &u[..48]);
    if constant_time_eq(&owner, &o[..32]) {
        let wrap = hash_v5(params.revision, password, &o[40..48], &u[..48]);
        return cbc_decrypt(&wrap, &[0u8; 16], params.oe, false).ok();
    }
    let user = hash_v5(params.revision, password, &u[32..40], &[]);
    if constant_time_eq(&user, &u[..32]) {
        let wrap = hash_v5(params.revision, password, &u[40..48], &[]);
        return cbc_decrypt(&wrap, &[0u8; 16], params.ue, false).ok();
    }
    None
}

/// Values written into a new revision 6 /Encrypt dictionary.
pub(crate) struct ModernValues {
    pub o: Vec<u8>,
    pub u: Vec<u8>,
    pub oe: Vec<u8>,
    pub ue: Vec<u8>,
    pub perms: Vec<u8>,
}

/// Algorithms 8, 9 and 10 for revision 6.
pub(crate) fn create_v6(
    file_key: &[u8],
    user_password: &[u8],
    owner_password: &[u8],
    permissions: i32,
    salts: [[u8; 8]; 4],
) -> crate::error::Result<ModernValues> {
    let [uv, uk, ov, ok] = salts;
    let mut u = hash_v5(6, user_password, &uv, &[]).to_vec();
    u.extend_from_slice(&uv);
    u.extend_from_slice(&uk);
    let ue = cbc_encrypt(&hash_v5(6, user_password, &uk, &[]), &[0u8; 16], file_key, false)?;

    let mut o = hash_v5(6, owner_password, &ov, &u).to_vec();
    o.extend_from_slice(&ov);
    o.extend_from_slice(&ok);
    let oe = cbc_encrypt(&hash_v5(6, owner_password, &ok, &u), &[0u8; 16], file_key, false)?;

    let mut block = [0u8; 16];
    block[..4].copy_from_slice(&permissions.to_le_bytes());
    block[4..8].copy_from_slice(&[0xFF; 4]);
    block[8] = b'T';
    block[9..12].copy_from_slice(b"adb");
    block[12..].copy_from_slice(&salts[0][..4]);
    // A single block with a zero IV is plain ECB
    let perms = cbc_encrypt(file_key, &[0u8; 16], &block, false)?;

    Ok(ModernValues { o, u, oe, ue, perms })
}

/// Compare without early exit.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
