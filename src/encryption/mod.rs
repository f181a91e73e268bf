//! Standard security handler.
//!
//! Opens documents protected with RC4 (40/128-bit) or AES (128/256-bit)
//! and encrypts the objects appended by an incremental update with the same
//! file key. Public-key security handlers are not supported.

use crate::error::{Error, Result};
use crate::object::{Dict, Object, ObjectRef};
use md5::{Digest, Md5};
use sha2::Sha256;

mod aes;
mod rc4;
mod standard;

use standard::{LegacyParams, ModernParams};

/// Cipher applied to strings or streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptMethod {
    Identity,
    Rc4,
    /// AES-128 (`/AESV2`)
    AesV2,
    /// AES-256 (`/AESV3`)
    AesV3,
}

/// Algorithm choices for newly created `/Encrypt` dictionaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// V1 R2
    Rc4_40,
    /// V2 R3
    Rc4_128,
    /// V4 R4 with the AESV2 crypt filter
    Aes128,
    /// V5 R6 with the AESV3 crypt filter
    Aes256,
}

/// Authenticated security handler holding the file key.
#[derive(Clone)]
pub struct SecurityHandler {
    key: Vec<u8>,
    revision: u32,
    strings: CryptMethod,
    streams: CryptMethod,
    encrypt_metadata: bool,
}

impl std::fmt::Debug for SecurityHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityHandler")
            .field("revision", &self.revision)
            .field("strings", &self.strings)
            .field("streams", &self.streams)
            .field("encrypt_metadata", &self.encrypt_metadata)
            .finish_non_exhaustive()
    }
}

fn bytes_of<'a>(dict: &'a Dict, key: &str) -> &'a [u8] {
    dict.get(key).and_then(Object::as_string).unwrap_or(&[])
}

fn crypt_filter(dict: &Dict, entry: &str) -> Result<CryptMethod> {
    let name = dict.get(entry).and_then(Object::as_name).unwrap_or("Identity");
    if name == "Identity" {
        return Ok(CryptMethod::Identity);
    }
    let cfm = dict
        .get("CF")
        .and_then(|cf| cf.get(name))
        .and_then(|f| f.get("CFM"))
        .and_then(Object::as_name)
        .unwrap_or("None");
    match cfm {
        "V2" => Ok(CryptMethod::Rc4),
        "AESV2" => Ok(CryptMethod::AesV2),
        "AESV3" => Ok(CryptMethod::AesV3),
        "None" => Ok(CryptMethod::Identity),
        other => Err(Error::Unsupported(format!("crypt filter method {}", other))),
    }
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len + 16);
    while out.len() < len {
        out.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
    }
    out.truncate(len);
    out
}

impl SecurityHandler {
    /// Try `password` as owner password, then as user password.
    ///
    /// Returns `Ok(None)` when the password opens neither.
    pub fn authenticate(encrypt: &Dict, file_id: &[u8], password: &[u8]) -> Result<Option<Self>> {
        let filter = encrypt.get("Filter").and_then(Object::as_name).unwrap_or("");
        if filter != "Standard" {
            return Err(Error::Unsupported(format!("security handler /{}", filter)));
        }
        let int = |key: &str| encrypt.get(key).and_then(Object::as_integer);
        let version = int("V").unwrap_or(0);
        let revision = int("R").ok_or_else(|| Error::Encryption("missing /R".into()))? as u32;
        let encrypt_metadata = encrypt
            .get("EncryptMetadata")
            .and_then(Object::as_bool)
            .unwrap_or(true);

        let (strings, streams) = match version {
            1 | 2 => (CryptMethod::Rc4, CryptMethod::Rc4),
            4 | 5 => (crypt_filter(encrypt, "StrF")?, crypt_filter(encrypt, "StmF")?),
            v => return Err(Error::Unsupported(format!("encryption /V {}", v))),
        };

        let key = match revision {
            2..=4 => {
                let key_len = match version {
                    1 => 5,
                    _ => (int("Length").unwrap_or(128) / 8).clamp(5, 16) as usize,
                };
                let params = LegacyParams {
                    revision,
                    key_len,
                    o: bytes_of(encrypt, "O"),
                    p: int("P").unwrap_or(0) as i32,
                    file_id,
                    encrypt_metadata,
                };
                let u = bytes_of(encrypt, "U");
                standard::authenticate_owner(password, u, &params)
                    .or_else(|| standard::authenticate_user(password, u, &params))
            },
            5 | 6 => standard::authenticate_v5(
                password,
                &ModernParams {
                    revision,
                    o: bytes_of(encrypt, "O"),
                    u: bytes_of(encrypt, "U"),
                    oe: bytes_of(encrypt, "OE"),
                    ue: bytes_of(encrypt, "UE"),
                },
            ),
            r => return Err(Error::Unsupported(format!("security handler revision {}", r))),
        };

        Ok(key.map(|key| {
            log::debug!("Authenticated standard security handler R{}", revision);
            Self {
                key,
                revision,
                strings,
                streams,
                encrypt_metadata,
            }
        }))
    }

    /// Build a new `/Encrypt` dictionary and its handler.
    pub fn create(
        algorithm: Algorithm,
        user_password: &[u8],
        owner_password: &[u8],
        permissions: i32,
        file_id: &[u8],
    ) -> Result<(Self, Dict)> {
        let mut dict = Dict::new();
        dict.insert("Filter".into(), Object::Name("Standard".into()));
        dict.insert("P".into(), Object::Integer(permissions as i64));

        let legacy = |revision: u32, key_len: usize| {
            let o = standard::owner_hash(owner_password, user_password, revision, key_len);
            let params = LegacyParams {
                revision,
                key_len,
                o: &o,
                p: permissions,
                file_id,
                encrypt_metadata: true,
            };
            let key = standard::file_key(user_password, &params);
            let u = standard::user_hash(&key, &params);
            (key, o, u)
        };

        let (handler, method) = match algorithm {
            Algorithm::Rc4_40 | Algorithm::Rc4_128 | Algorithm::Aes128 => {
                let (version, revision, key_len, method) = match algorithm {
                    Algorithm::Rc4_40 => (1, 2, 5, CryptMethod::Rc4),
                    Algorithm::Rc4_128 => (2, 3, 16, CryptMethod::Rc4),
                    _ => (4, 4, 16, CryptMethod::AesV2),
                };
                let (key, o, u) = legacy(revision, key_len);
                dict.insert("V".into(), Object::Integer(version));
                dict.insert("R".into(), Object::Integer(revision as i64));
                dict.insert("Length".into(), Object::Integer(key_len as i64 * 8));
                dict.insert("O".into(), Object::String(o));
                dict.insert("U".into(), Object::String(u));
                let handler = Self {
                    key,
                    revision,
                    strings: method,
                    streams: method,
                    encrypt_metadata: true,
                };
                (handler, method)
            },
            Algorithm::Aes256 => {
                let key = random_bytes(32);
                let salt = |i: usize| -> [u8; 8] {
                    let b = random_bytes(8);
                    let mut s = [0u8; 8];
                    s.copy_from_slice(&b);
                    s[0] ^= i as u8;
                    s
                };
                let values =
                    standard::create_v6(&key, user_password, owner_password, permissions, [salt(0), salt(1), salt(2), salt(3)])?;
                dict.insert("V".into(), Object::Integer(5));
                dict.insert("R".into(), Object::Integer(6));
                dict.insert("Length".into(), Object::Integer(256));
                dict.insert("O".into(), Object::String(values.o));
                dict.insert("U".into(), Object::String(values.u));
                dict.insert("OE".into(), Object::String(values.oe));
                dict.insert("UE".into(), Object::String(values.ue));
                dict.insert("Perms".into(), Object::String(values.perms));
                let handler = Self {
                    key,
                    revision: 6,
                    strings: CryptMethod::AesV3,
                    streams: CryptMethod::AesV3,
                    encrypt_metadata: true,
                };
                (handler, CryptMethod::AesV3)
            },
        };

        if matches!(method, CryptMethod::AesV2 | CryptMethod::AesV3) {
            let cfm = if method == CryptMethod::AesV2 { "AESV2" } else { "AESV3" };
            let mut std_cf = Dict::new();
            std_cf.insert("CFM".into(), Object::Name(cfm.into()));
            std_cf.insert("AuthEvent".into(), Object::Name("DocOpen".into()));
            std_cf.insert("Length".into(), Object::Integer(if method == CryptMethod::AesV2 { 16 } else { 32 }));
            let mut cf = Dict::new();
            cf.insert("StdCF".into(), Object::Dictionary(std_cf));
            dict.insert("CF".into(), Object::Dictionary(cf));
            dict.insert("StmF".into(), Object::Name("StdCF".into()));
            dict.insert("StrF".into(), Object::Name("StdCF".into()));
        }
        Ok((handler, dict))
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// Algorithm 1: per-object key. Revision 5/6 use the file key directly.
    fn object_key(&self, id: ObjectRef, method: CryptMethod) -> Vec<u8> {
        if method == CryptMethod::AesV3 {
            return self.key.clone();
        }
        let mut md5 = Md5::new();
        md5.update(&self.key);
        md5.update(&id.id.to_le_bytes()[..3]);
        md5.update(id.gen.to_le_bytes());
        if method == CryptMethod::AesV2 {
            md5.update(b"sAlT");
        }
        let hash = md5.finalize();
        hash[..(self.key.len() + 5).min(16)].to_vec()
    }

    fn method(&self, stream: bool) -> CryptMethod {
        if stream {
            self.streams
        } else {
            self.strings
        }
    }

    /// Decrypt a string (`stream == false`) or stream body of object `id`.
    pub fn decrypt(&self, id: ObjectRef, data: &[u8], stream: bool) -> Result<Vec<u8>> {
        let method = self.method(stream);
        let key = self.object_key(id, method);
        match method {
            CryptMethod::Identity => Ok(data.to_vec()),
            CryptMethod::Rc4 => Ok(rc4::rc4_crypt(&key, data)),
            CryptMethod::AesV2 | CryptMethod::AesV3 => {
                if data.len() < 16 {
                    return Err(Error::Encryption(format!("AES data of object {} is shorter than its IV", id)));
                }
                let (iv, body) = data.split_at(16);
                aes::cbc_decrypt(&key, iv, body, true)
            },
        }
    }

    /// Encrypt a string or stream body of object `id`. The AES IV is derived
    /// from the key and the plaintext so the output is reproducible.
    pub fn encrypt(&self, id: ObjectRef, data: &[u8], stream: bool) -> Result<Vec<u8>> {
        let method = self.method(stream);
        let key = self.object_key(id, method);
        match method {
            CryptMethod::Identity => Ok(data.to_vec()),
            CryptMethod::Rc4 => Ok(rc4::rc4_crypt(&key, data)),
            CryptMethod::AesV2 | CryptMethod::AesV3 => {
                let mut sha = Sha256::new();
                sha.update(&key);
                sha.update(data);
                let iv = sha.finalize()[..16].to_vec();
                let mut out = iv.clone();
                out.extend(aes::cbc_encrypt(&key, &iv, data, true)?);
                Ok(out)
            },
        }
    }

    /// Decrypt every string and stream body of an object loaded from disk.
    pub fn decrypt_object(&self, id: ObjectRef, object: Object) -> Result<Object> {
        self.transform(id, object, false)
    }

    /// Encrypt every string and stream body of an object before writing.
    pub fn encrypt_object(&self, id: ObjectRef, object: Object) -> Result<Object> {
        self.transform(id, object, true)
    }

    fn transform(&self, id: ObjectRef, object: Object, encrypt: bool) -> Result<Object> {
        let apply = |data: &[u8], stream: bool| {
            if encrypt {
                self.encrypt(id, data, stream)
            } else {
                self.decrypt(id, data, stream)
            }
        };
        Ok(match object {
            Object::String(s) => Object::String(apply(&s, false)?),
            Object::Array(items) => Object::Array(
                items
                    .into_iter()
                    .map(|o| self.transform(id, o, encrypt))
                    .collect::<Result<_>>()?,
            ),
            Object::Dictionary(dict) => Object::Dictionary(self.transform_dict(id, dict, encrypt)?),
            Object::Stream { dict, data } => {
                let kind = dict.get("Type").and_then(Object::as_name);
                let exempt = kind == Some("XRef") || (kind == Some("Metadata") && !self.encrypt_metadata);
                let data = if exempt {
                    data
                } else {
                    bytes::Bytes::from(apply(&data, true)?)
                };
                Object::Stream {
                    dict: self.transform_dict(id, dict, encrypt)?,
                    data,
                }
            },
            other => other,
        })
    }

    fn transform_dict(&self, id: ObjectRef, dict: Dict, encrypt: bool) -> Result<Dict> {
        // The signature value is never encrypted
        let is_signature =
            dict.get("Type").and_then(Object::as_name) == Some("Sig") || dict.contains_key("ByteRange");
        dict.into_iter()
            .map(|(k, v)| {
                if is_signature && k == "Contents" {
                    Ok((k, v))
                } else {
                    Ok((k, self.transform(id, v, encrypt)?))
                }
            })
            .collect()
    }
}
