//! Object streams (`/Type /ObjStm`, PDF 1.5+).
//!
//! The decoded stream starts with `N` pairs of integers (object number and
//! offset relative to `/First`) followed by the object bodies.

use crate::error::{Error, Result};
use crate::object::Object;
use crate::parser::{parse_object, skip_ws};

/// Extract every object of an object stream, in header order.
///
/// The stream must already be decrypted. Objects inside an object stream are
/// never encrypted individually.
pub fn parse_object_stream(stream: &Object) -> Result<Vec<(u32, Object)>> {
    let dict = match stream {
        Object::Stream { dict, .. } => dict,
        other => {
            return Err(Error::InvalidObjectType {
                expected: "Stream".into(),
                found: other.type_name().into(),
            })
        },
    };
    if let Some(kind) = dict.get("Type").and_then(Object::as_name) {
        if kind != "ObjStm" {
            return Err(Error::InvalidPdf(format!("expected /Type /ObjStm, got /{}", kind)));
        }
    }
    let count = dict
        .get("N")
        .and_then(Object::as_integer)
        .filter(|&n| n >= 0)
        .ok_or_else(|| Error::InvalidPdf("object stream without /N".into()))? as usize;
    let first = dict
        .get("First")
        .and_then(Object::as_integer)
        .filter(|&n| n >= 0)
        .ok_or_else(|| Error::InvalidPdf("object stream without /First".into()))? as usize;

    let data = stream.decode_stream_data()?;
    if first > data.len() {
        return Err(Error::InvalidPdf(format!(
            "object stream /First {} beyond {} decoded bytes",
            first,
            data.len()
        )));
    }

    let header = read_header(&data[..first], count)?;
    let mut objects = Vec::with_capacity(header.len());
    for (id, rel) in header {
        let start = first + rel;
        let Some(body) = data.get(start..) else {
            log::warn!("Object {} offset {} outside object stream", id, rel);
            continue;
        };
        match parse_object(body) {
            Ok((_, obj)) => objects.push((id, obj)),
            Err(e) => log::warn!("Skipping unreadable object {} in object stream: {:?}", id, e),
        }
    }
    Ok(objects)
}

fn read_header(mut input: &[u8], count: usize) -> Result<Vec<(u32, usize)>> {
    let mut pairs = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        let (rest, id) = read_number(input)?;
        let (rest, offset) = read_number(rest)?;
        pairs.push((id as u32, offset));
        input = rest;
    }
    Ok(pairs)
}

fn read_number(input: &[u8]) -> Result<(&[u8], usize)> {
    let input = skip_ws(input);
    let len = input.iter().take_while(|c| c.is_ascii_digit()).count();
    std::str::from_utf8(&input[..len])
        .ok()
        .and_then(|s| s.parse().ok())
        .map(|n| (&input[len..], n))
        .ok_or_else(|| Error::InvalidPdf("malformed object stream header".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Dict;

    fn objstm(header: &str, body: &str, n: i64) -> Object {
        let mut dict = Dict::new();
        dict.insert("Type".into(), Object::Name("ObjStm".into()));
        dict.insert("N".into(), Object::Integer(n));
        dict.insert("First".into(), Object::Integer(header.len() as i64));
        Object::Stream {
            dict,
            data: bytes::Bytes::from(format!("{}{}", header, body)),
        }
    }

    #[test]
    fn test_parse_two_objects() {
        let stream = objstm("10 0 11 14 ", "<< /A 1 >>    [1 2]", 2);
        let objects = parse_object_stream(&stream).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].0, 10);
        assert_eq!(objects[0].1.get("A").and_then(Object::as_integer), Some(1));
        assert_eq!(objects[1].1.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_missing_n() {
        let mut stream = objstm("1 0 ", "null", 1);
        if let Object::Stream { dict, .. } = &mut stream {
            dict.remove("N");
        }
        assert!(parse_object_stream(&stream).is_err());
    }

    #[test]
    fn test_short_header_fails() {
        let stream = objstm("1 0 ", "null", 3);
        assert!(parse_object_stream(&stream).is_err());
    }

    #[test]
    fn test_not_a_stream() {
        assert!(parse_object_stream(&Object::Null).is_err());
    }
}
