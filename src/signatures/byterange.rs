//! ByteRange calculation for PDF signatures.
//!
//! PDF digital signatures use a ByteRange array to specify which portions
//! of the document are covered by the signature. The signature itself is
//! stored in a placeholder that is excluded from the signed bytes.
//!
//! ## ByteRange Format
//!
//! The ByteRange is an array of four integers:
//! `[offset1, length1, offset2, length2]`
//!
//! Where:
//! - `offset1` = 0 (start of file)
//! - `length1` = byte offset where the signature value begins
//! - `offset2` = byte offset where the signature value ends
//! - `length2` = remaining bytes to end of file
//!
//! The signature value is a hex-encoded string within `<` and `>` delimiters.
//! The array itself is written with fixed-width zero-padded numbers so it can
//! be patched in place once the final offsets are known.

use crate::error::{Error, Result};

/// Default reserved size of the DER signature, in bytes.
pub const DEFAULT_CAPACITY: usize = 8000;

/// Fixed-width `/ByteRange` value written before the offsets are known.
pub const BYTE_RANGE_PLACEHOLDER: &str = "[0 0000000000 0000000000 0000000000]";

/// Calculator for PDF signature byte ranges.
#[derive(Debug, Clone, Copy)]
pub struct ByteRangeCalculator {
    /// Reserved size of the DER signature
    capacity: usize,
}

impl ByteRangeCalculator {
    /// Reserve `capacity` bytes of DER signature (twice as many hex digits).
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of the `/Contents` value including the angle brackets.
    pub fn placeholder_size(&self) -> usize {
        self.capacity * 2 + 2
    }

    /// `<000...0>` holding `2 * capacity` hex zeros.
    pub fn generate_placeholder(&self) -> String {
        format!("<{}>", "0".repeat(self.capacity * 2))
    }

    /// `[0, before_sig, after_sig_start, after_sig_len]` for a `/Contents`
    /// value starting (at its `<`) at `contents_offset`.
    pub fn calculate_byte_range(&self, file_size: usize, contents_offset: usize) -> [i64; 4] {
        let before_sig = contents_offset as i64;
        let after_sig_start = (contents_offset + self.placeholder_size()) as i64;
        let after_sig_len = file_size as i64 - after_sig_start;

        [0, before_sig, after_sig_start, after_sig_len]
    }

    /// Format a ByteRange with the same width as [`BYTE_RANGE_PLACEHOLDER`].
    pub fn format_byte_range(byte_range: &[i64; 4]) -> String {
        format!(
            "[{} {:010} {:010} {:010}]",
            byte_range[0], byte_range[1], byte_range[2], byte_range[3]
        )
    }

    /// Overwrite the placeholder array found after `from` with `byte_range`.
    pub fn patch_byte_range(pdf_data: &mut [u8], from: usize, byte_range: &[i64; 4]) -> Result<()> {
        let needle = BYTE_RANGE_PLACEHOLDER.as_bytes();
        let at = pdf_data
            .get(from..)
            .and_then(|tail| tail.windows(needle.len()).position(|w| w == needle))
            .map(|p| p + from)
            .ok_or_else(|| Error::InvalidPdf("ByteRange placeholder not found".to_string()))?;
        let formatted = Self::format_byte_range(byte_range);
        if formatted.len() != needle.len() {
            return Err(Error::InvalidPdf(format!("ByteRange {} does not fit the placeholder", formatted)));
        }
        pdf_data[at..at + needle.len()].copy_from_slice(formatted.as_bytes());
        Ok(())
    }

    /// Concatenation of the two covered ranges.
    pub fn extract_signed_bytes(pdf_data: &[u8], byte_range: &[i64]) -> Result<Vec<u8>> {
        let [offset1, length1, offset2, length2] = match byte_range {
            &[a, b, c, d] if a >= 0 && b >= 0 && c >= 0 && d >= 0 => [a as usize, b as usize, c as usize, d as usize],
            _ => return Err(Error::InvalidPdf(format!("malformed ByteRange {:?}", byte_range))),
        };

        let end1 = Self::range_end(offset1, length1, pdf_data.len(), "first")?;
        let end2 = Self::range_end(offset2, length2, pdf_data.len(), "second")?;

        let mut signed_bytes = Vec::with_capacity(length1 + length2);
        signed_bytes.extend_from_slice(&pdf_data[offset1..end1]);
        signed_bytes.extend_from_slice(&pdf_data[offset2..end2]);
        Ok(signed_bytes)
    }

    /// A well-formed range starts at 0, leaves a gap for the signature and
    /// ends at or before `file_size`.
    pub fn validate_byte_range(byte_range: &[i64], file_size: usize) -> Result<()> {
        let &[offset1, length1, offset2, length2] = byte_range else {
            return Err(Error::InvalidPdf(format!("ByteRange must have 4 entries, got {}", byte_range.len())));
        };

        if offset1 != 0 {
            return Err(Error::InvalidPdf(format!("ByteRange must start at 0, got {}", offset1)));
        }
        if length1 < 0 || length2 < 0 {
            return Err(Error::InvalidPdf("ByteRange lengths must be positive".to_string()));
        }
        if length1 > offset2 {
            return Err(Error::InvalidPdf(format!(
                "ByteRange first range ({}) overlaps with second range start ({})",
                length1, offset2
            )));
        }
        match offset2.checked_add(length2) {
            Some(end) if end <= file_size as i64 => Ok(()),
            Some(end) => Err(Error::InvalidPdf(format!("ByteRange ends at {} beyond file size {}", end, file_size))),
            None => Err(Error::InvalidPdf(format!("ByteRange {:?} overflows", byte_range))),
        }
    }

    /// End of `offset..offset + length`, if it lies within `size`.
    fn range_end(offset: usize, length: usize, size: usize, which: &str) -> Result<usize> {
        match offset.checked_add(length) {
            Some(end) if end <= size => Ok(end),
            _ => Err(Error::InvalidPdf(format!(
                "ByteRange {} range exceeds file size: {} + {} > {}",
                which, offset, length, size
            ))),
        }
    }

    /// Offset of the `<` opening the `/Contents` value after `sig_dict_offset`.
    pub fn find_contents_offset(pdf_data: &[u8], sig_dict_offset: usize) -> Option<usize> {
        let window = pdf_data.get(sig_dict_offset..)?;
        let pattern = b"/Contents";
        let mut pos = 0;
        while pos + pattern.len() < window.len() {
            if window[pos..].starts_with(pattern) {
                for (i, &byte) in window.iter().enumerate().skip(pos + pattern.len()) {
                    if byte == b'<' {
                        return Some(sig_dict_offset + i);
                    }
                    if !matches!(byte, b' ' | b'\t' | b'\n' | b'\r') {
                        break;
                    }
                }
            }
            pos += 1;
        }
        None
    }

    /// Write the DER signature into the placeholder, padding with zeros.
    pub fn insert_signature(&self, pdf_data: &mut [u8], contents_offset: usize, signature: &[u8]) -> Result<()> {
        if signature.len() > self.capacity {
            return Err(Error::SignatureTooLarge {
                size: signature.len(),
                capacity: self.capacity,
            });
        }
        let size = self.placeholder_size();
        if contents_offset + size > pdf_data.len() {
            return Err(Error::InvalidPdf("Signature insertion would exceed file bounds".to_string()));
        }

        let mut value = Vec::with_capacity(size);
        value.push(b'<');
        for byte in signature {
            value.extend_from_slice(format!("{:02X}", byte).as_bytes());
        }
        value.resize(size - 1, b'0');
        value.push(b'>');
        pdf_data[contents_offset..contents_offset + size].copy_from_slice(&value);
        Ok(())
    }
}

impl Default for ByteRangeCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
