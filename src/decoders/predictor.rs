//! PNG and TIFF predictors, used by xref and object streams.

use crate::error::{Error, Result};
use crate::object::{Dict, Object};

/// `/DecodeParms` values that matter for prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeParams {
    /// 1 = none, 2 = TIFF, 10..=15 = PNG
    pub predictor: i64,
    pub columns: usize,
    pub colors: usize,
    pub bits_per_component: usize,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            columns: 1,
            colors: 1,
            bits_per_component: 8,
        }
    }
}

impl DecodeParams {
    pub fn from_dict(dict: &Dict) -> Self {
        let int = |key: &str, default: i64| dict.get(key).and_then(Object::as_integer).unwrap_or(default);
        Self {
            predictor: int("Predictor", 1),
            columns: int("Columns", 1).max(1) as usize,
            colors: int("Colors", 1).max(1) as usize,
            bits_per_component: int("BitsPerComponent", 8).max(1) as usize,
        }
    }

    fn row_bytes(&self) -> usize {
        (self.columns * self.colors * self.bits_per_component).div_ceil(8)
    }

    fn pixel_bytes(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8).max(1)
    }
}

/// Undo the predictor described by `params`.
pub fn decode_predictor(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    match params.predictor {
        1 => Ok(data.to_vec()),
        2 => Ok(decode_tiff(data, params)),
        10..=15 => decode_png(data, params),
        other => Err(Error::Decode(format!("unsupported predictor {}", other))),
    }
}

fn decode_tiff(data: &[u8], params: &DecodeParams) -> Vec<u8> {
    let row = params.row_bytes().max(1);
    let bpp = params.pixel_bytes();
    let mut out = data.to_vec();
    for chunk in out.chunks_mut(row) {
        for i in bpp..chunk.len() {
            chunk[i] = chunk[i].wrapping_add(chunk[i - bpp]);
        }
    }
    out
}

fn decode_png(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    let row = params.row_bytes();
    let bpp = params.pixel_bytes();
    let stride = row + 1;
    if data.len() % stride != 0 {
        log::debug!("PNG predictor data of {} bytes is not a multiple of {}", data.len(), stride);
    }

    let mut out = Vec::with_capacity(data.len() / stride * row);
    let mut prev = vec![0u8; row];
    for encoded in data.chunks(stride) {
        if encoded.len() < 2 {
            break;
        }
        let tag = encoded[0];
        let mut cur = encoded[1..].to_vec();
        cur.resize(row, 0);
        for i in 0..row {
            let left = if i >= bpp { cur[i - bpp] } else { 0 };
            let up = prev[i];
            let up_left = if i >= bpp { prev[i - bpp] } else { 0 };
            let predicted = match tag {
                0 => 0,
                1 => left,
                2 => up,
                3 => ((left as u16 + up as u16) / 2) as u8,
                4 => paeth(left, up, up_left),
                other => return Err(Error::Decode(format!("invalid PNG row filter {}", other))),
            };
            cur[i] = cur[i].wrapping_add(predicted);
        }
        out.extend_from_slice(&cur);
        prev = cur;
    }
    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let (pa, pb, pc) = ((p - a as i16).abs(), (p - b as i16).abs(), (p - c as i16).abs());
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}
