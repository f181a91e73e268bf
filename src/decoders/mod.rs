//! Stream filters.
//!
//! Only the filters the signing and validation paths need are decoded:
//! FlateDecode (with predictors) and ASCIIHexDecode. Image codecs such as
//! DCTDecode pass through untouched.

use crate::error::{Error, Result};
use crate::object::{Dict, Object};

mod flate;
mod predictor;

pub use flate::{encode_flate, FlateDecoder};
pub use predictor::{decode_predictor, DecodeParams};

/// Upper bound for decoded stream sizes.
const MAX_DECODED_SIZE: usize = 256 * 1024 * 1024;

/// A single PDF stream filter.
pub trait StreamDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// Filter name as it appears in `/Filter`.
    fn name(&self) -> &str;
}

/// ASCIIHexDecode filter.
pub struct AsciiHexDecoder;

impl StreamDecoder for AsciiHexDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let end = input.iter().position(|&c| c == b'>').unwrap_or(input.len());
        crate::parser::decode_hex(&input[..end]).map_err(|e| Error::Decode(e.to_string()))
    }

    fn name(&self) -> &str {
        "ASCIIHexDecode"
    }
}

fn filter_names(dict: &Dict) -> Vec<String> {
    match dict.get("Filter") {
        Some(Object::Name(n)) => vec![n.clone()],
        Some(Object::Array(items)) => items.iter().filter_map(Object::as_name).map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

fn decode_params(dict: &Dict, index: usize) -> Option<DecodeParams> {
    let parms = dict.get("DecodeParms").or_else(|| dict.get("DP"))?;
    let entry = match parms {
        Object::Array(items) => items.get(index)?,
        other if index == 0 => other,
        _ => return None,
    };
    entry.as_dict().map(DecodeParams::from_dict)
}

/// Decode stream data through the `/Filter` chain of `dict`.
pub fn decode_stream(dict: &Dict, data: &[u8]) -> Result<Vec<u8>> {
    let mut current = data.to_vec();
    for (index, name) in filter_names(dict).iter().enumerate() {
        let decoder: &dyn StreamDecoder = match name.as_str() {
            "FlateDecode" | "Fl" => &FlateDecoder,
            "ASCIIHexDecode" | "AHx" => &AsciiHexDecoder,
            "DCTDecode" | "DCT" | "JPXDecode" | "CCITTFaxDecode" | "JBIG2Decode" => return Ok(current),
            other => return Err(Error::Unsupported(format!("stream filter {}", other))),
        };
        current = decoder.decode(&current)?;
        if current.len() > MAX_DECODED_SIZE {
            return Err(Error::Decode(format!(
                "{} output of {} bytes exceeds the size limit",
                decoder.name(),
                current.len()
            )));
        }
        if let Some(params) = decode_params(dict, index) {
            current = decode_predictor(&current, &params)?;
        }
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_filter_is_identity() {
        assert_eq!(decode_stream(&Dict::new(), b"BT ET").unwrap(), b"BT ET");
    }

    #[test]
    fn test_flate_chain() {
        let mut dict = Dict::new();
        dict.insert("Filter".into(), Object::Name("FlateDecode".into()));
        let packed = encode_flate(b"q 1 0 0 1 0 0 cm Q").unwrap();
        assert_eq!(decode_stream(&dict, &packed).unwrap(), b"q 1 0 0 1 0 0 cm Q");
    }

    #[test]
    fn test_hex_filter() {
        let mut dict = Dict::new();
        dict.insert("Filter".into(), Object::Array(vec![Object::Name("AHx".into())]));
        assert_eq!(decode_stream(&dict, b"4869>").unwrap(), b"Hi");
    }

    #[test]
    fn test_unknown_filter() {
        let mut dict = Dict::new();
        dict.insert("Filter".into(), Object::Name("LZWDecode".into()));
        assert!(matches!(decode_stream(&dict, b"x"), Err(Error::Unsupported(_))));
    }
}
