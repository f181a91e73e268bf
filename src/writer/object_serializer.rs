//! PDF object serialization.
//!
//! Serializes PDF objects to their byte representation according to
//! PDF specification ISO 32000-1:2008. Encryption is applied to the object
//! beforehand (see [`crate::encryption::SecurityHandler::encrypt_object`]),
//! so the serializer only deals with syntax.

use crate::object::{Dict, Object, ObjectRef};
use std::io::Write;

/// Serializer for PDF objects.
#[derive(Debug, Clone, Default)]
pub struct ObjectSerializer {
    /// Put each dictionary entry on its own line
    pretty: bool,
}

impl ObjectSerializer {
    /// Compact serializer (single-line dictionaries).
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializer that breaks dictionaries over several lines.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    /// Serialize an object to bytes.
    pub fn serialize(&self, obj: &Object) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_object(&mut buf, obj);
        buf
    }

    /// Serialize an object to a string (for debugging and tests).
    pub fn serialize_to_string(&self, obj: &Object) -> String {
        String::from_utf8_lossy(&self.serialize(obj)).into_owned()
    }

    /// Serialize an indirect object definition.
    ///
    /// Format: `{id} {gen} obj\n{object}\nendobj\n`
    pub fn serialize_indirect(&self, id: ObjectRef, obj: &Object) -> Vec<u8> {
        let mut buf = format!("{} {} obj\n", id.id, id.gen).into_bytes();
        self.write_object(&mut buf, obj);
        buf.extend_from_slice(b"\nendobj\n");
        buf
    }

    fn write_object(&self, w: &mut Vec<u8>, obj: &Object) {
        match obj {
            Object::Null => w.extend_from_slice(b"null"),
            Object::Boolean(b) => w.extend_from_slice(if *b { b"true" } else { b"false" }),
            Object::Integer(i) => w.extend_from_slice(i.to_string().as_bytes()),
            Object::Real(r) => write_real(w, *r),
            Object::String(s) => write_string(w, s),
            Object::Name(n) => write_name(w, n),
            Object::Array(arr) => {
                w.push(b'[');
                for (i, obj) in arr.iter().enumerate() {
                    if i > 0 {
                        w.push(b' ');
                    }
                    self.write_object(w, obj);
                }
                w.push(b']');
            },
            Object::Dictionary(dict) => self.write_dictionary(w, dict),
            Object::Stream { dict, data } => {
                // The written length always matches the bytes that follow
                let mut dict = dict.clone();
                dict.insert("Length".to_string(), Object::Integer(data.len() as i64));
                self.write_dictionary(w, &dict);
                w.extend_from_slice(b"\nstream\n");
                w.extend_from_slice(data);
                w.extend_from_slice(b"\nendstream");
            },
            Object::Reference(r) => w.extend_from_slice(format!("{} {} R", r.id, r.gen).as_bytes()),
        }
    }

    fn write_dictionary(&self, w: &mut Vec<u8>, dict: &Dict) {
        w.extend_from_slice(b"<<");

        // Sort keys for deterministic output
        let mut keys: Vec<_> = dict.keys().collect();
        keys.sort();

        for key in keys {
            w.extend_from_slice(if self.pretty { b"\n  " } else { b" " });
            write_name(w, key);
            w.push(b' ');
            self.write_object(w, &dict[key]);
        }
        w.extend_from_slice(if self.pretty && !dict.is_empty() { b"\n>>" } else { b" >>" });
    }
}

/// Real number with up to five decimals, trailing zeros trimmed.
fn write_real(w: &mut Vec<u8>, value: f64) {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        let _ = write!(w, "{}", value as i64);
    } else {
        let formatted = format!("{:.5}", value);
        let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
        w.extend_from_slice(trimmed.as_bytes());
    }
}

/// Literal string for printable data, hex string otherwise.
fn write_string(w: &mut Vec<u8>, data: &[u8]) {
    let printable = data
        .iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..=0x7E).contains(&b));
    if printable {
        w.push(b'(');
        for &byte in data {
            match byte {
                b'(' => w.extend_from_slice(b"\\("),
                b')' => w.extend_from_slice(b"\\)"),
                b'\\' => w.extend_from_slice(b"\\\\"),
                b'\n' => w.extend_from_slice(b"\\n"),
                b'\r' => w.extend_from_slice(b"\\r"),
                b'\t' => w.extend_from_slice(b"\\t"),
                _ => w.push(byte),
            }
        }
        w.push(b')');
    } else {
        w.push(b'<');
        for byte in data {
            let _ = write!(w, "{:02X}", byte);
        }
        w.push(b'>');
    }
}

/// Names escape delimiters, whitespace and non-ASCII with `#xx`.
fn write_name(w: &mut Vec<u8>, name: &str) {
    w.push(b'/');
    for byte in name.bytes() {
        match byte {
            b'!'
            | b'"'
            | b'$'..=b'&'
            | b'\''
            | b'*'..=b'.'
            | b'0'..=b'9'
            | b';'
            | b'='
            | b'?'
            | b'@'
            | b'A'..=b'Z'
            | b'^'..=b'z'
            | b'|'
            | b'~' => w.push(byte),
            _ => {
                let _ = write!(w, "#{:02X}", byte);
            },
        }
    }
}

/// Build a dictionary object from literal entries.
pub fn dict(entries: Vec<(&str, Object)>) -> Object {
    Object::Dictionary(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

/// Build a name object.
pub fn name(s: &str) -> Object {
    Object::Name(s.to_string())
}

/// Rectangle array `[llx lly urx ury]`.
pub fn rect(r: [f64; 4]) -> Object {
    Object::Array(r.iter().map(|&v| Object::Real(v)).collect())
}
