//! FlateDecode (zlib/deflate).

use crate::decoders::StreamDecoder;
use crate::error::{Error, Result};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// FlateDecode filter.
pub struct FlateDecoder;

impl StreamDecoder for FlateDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        match ZlibDecoder::new(input).read_to_end(&mut output) {
            Ok(_) => Ok(output),
            Err(e) if !output.is_empty() => {
                log::warn!("FlateDecode partial recovery: {} bytes before error: {}", output.len(), e);
                Ok(output)
            },
            Err(e) => {
                // Some writers emit raw deflate without the zlib wrapper
                log::info!("Zlib decode failed ({}), trying raw deflate", e);
                output.clear();
                match DeflateDecoder::new(input).read_to_end(&mut output) {
                    Ok(_) => Ok(output),
                    Err(_) if !output.is_empty() => Ok(output),
                    Err(raw) => Err(Error::Decode(format!("FlateDecode failed: {}", raw))),
                }
            },
        }
    }

    fn name(&self) -> &str {
        "FlateDecode"
    }
}

/// Compress `data` with zlib, as written into new FlateDecode streams.
pub fn encode_flate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
