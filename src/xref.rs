//! Cross-reference sections and revision boundaries.
//!
//! Both classic tables and cross-reference streams (PDF 1.5+) are read. The
//! `/Prev` chain is walked from `startxref` and each section is kept
//! separately so the document can tell which revision defined which object.

use crate::error::{Error, Result};
use crate::object::{Dict, Object};
use crate::parser::{is_whitespace, parse_indirect_object, parse_object, skip_ws};
use lazy_static::lazy_static;
use std::collections::{BTreeMap, HashSet};

lazy_static! {
    static ref RE_OBJ_HEADER: regex::bytes::Regex =
        regex::bytes::Regex::new(r"(?m)(\d+)[ \t\r\n\f\x00]+(\d+)[ \t\r\n\f\x00]+obj\b").unwrap();
    static ref RE_TRAILER: regex::bytes::Regex = regex::bytes::Regex::new(r"trailer[ \t\r\n\f\x00]*<<").unwrap();
}

/// Longest `/Prev` chain accepted.
const MAX_CHAIN: usize = 4096;

/// Location of one object as recorded by a cross-reference section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntry {
    Free,
    /// Object stored directly in the file body
    InUse { offset: usize, gen: u16 },
    /// Object stored inside an object stream
    Compressed { stream_id: u32, index: u32 },
}

/// One cross-reference section with its trailer.
#[derive(Debug, Clone)]
pub struct XrefSection {
    /// Byte offset of the `xref` keyword or of the xref stream object
    pub offset: usize,
    pub entries: BTreeMap<u32, XrefEntry>,
    /// Trailer dictionary (the stream dictionary for xref streams)
    pub trailer: Dict,
    /// Object number of the xref stream, if this section is one
    pub stream_id: Option<u32>,
}

impl XrefSection {
    /// `/Prev` offset, if any.
    pub fn prev(&self) -> Option<usize> {
        self.trailer
            .get("Prev")
            .and_then(Object::as_integer)
            .filter(|&p| p >= 0)
            .map(|p| p as usize)
    }

    /// The first-page section of a linearized file points backwards to the
    /// main section, which sits later in the file.
    pub fn is_linearized_first_page(&self) -> bool {
        self.prev().is_some_and(|p| p > self.offset)
    }
}

/// Find the offset after the last `startxref` keyword.
pub fn find_startxref(data: &[u8]) -> Result<usize> {
    let tail_start = data.len().saturating_sub(2048);
    let tail = &data[tail_start..];
    let keyword = b"startxref";
    let pos = tail
        .windows(keyword.len())
        .rposition(|w| w == keyword)
        .ok_or_else(|| Error::InvalidXref("startxref not found".into()))?;
    let rest = skip_ws(&tail[pos + keyword.len()..]);
    let digits: Vec<u8> = rest.iter().copied().take_while(u8::is_ascii_digit).collect();
    std::str::from_utf8(&digits)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| Error::InvalidXref("startxref offset is not a number".into()))
}

/// Parse the section at `offset`, classic or stream.
pub fn parse_section(data: &[u8], offset: usize) -> Result<XrefSection> {
    let body = data
        .get(offset..)
        .ok_or_else(|| Error::InvalidXref(format!("offset {} past end of file", offset)))?;
    let trimmed = skip_ws(body);
    let offset = offset + (body.len() - trimmed.len());
    if trimmed.starts_with(b"xref") {
        let mut section = parse_classic(data, offset)?;
        // Hybrid files keep compressed entries in a side stream
        if let Some(stm) = section.trailer.get("XRefStm").and_then(Object::as_integer) {
            match parse_stream(data, stm as usize) {
                Ok(side) => {
                    for (id, entry) in side.entries {
                        section.entries.entry(id).or_insert(entry);
                    }
                },
                Err(e) => log::warn!("Ignoring unreadable /XRefStm at {}: {}", stm, e),
            }
        }
        Ok(section)
    } else {
        parse_stream(data, offset)
    }
}

fn parse_classic(data: &[u8], offset: usize) -> Result<XrefSection> {
    let bad = |what: &str| Error::InvalidXref(format!("{} in table at {}", what, offset));
    let mut input = &data[offset + 4..];
    let mut entries = BTreeMap::new();

    loop {
        input = skip_ws(input);
        if input.starts_with(b"trailer") {
            input = &input[7..];
            break;
        }
        let (rest, start) = read_uint(input).ok_or_else(|| bad("bad subsection header"))?;
        let (rest, count) = read_uint(rest).ok_or_else(|| bad("bad subsection header"))?;
        if count > data.len() / 18 + 1 {
            return Err(bad("subsection count exceeds file size"));
        }
        input = rest;
        for i in 0..count {
            let (rest, field1) = read_uint(input).ok_or_else(|| bad("bad entry"))?;
            let (rest, gen) = read_uint(rest).ok_or_else(|| bad("bad entry"))?;
            let rest = skip_ws(rest);
            let kind = *rest.first().ok_or_else(|| bad("truncated entry"))?;
            let entry = match kind {
                b'n' => XrefEntry::InUse {
                    offset: field1,
                    gen: gen.min(u16::MAX as usize) as u16,
                },
                b'f' => XrefEntry::Free,
                _ => return Err(bad("entry flag is neither 'n' nor 'f'")),
            };
            entries.insert((start + i) as u32, entry);
            input = &rest[1..];
        }
    }

    let (_, trailer) = parse_object(input).map_err(|_| bad("unreadable trailer"))?;
    let trailer = match trailer {
        Object::Dictionary(d) => d,
        _ => return Err(bad("trailer is not a dictionary")),
    };
    Ok(XrefSection {
        offset,
        entries,
        trailer,
        stream_id: None,
    })
}

fn read_uint(input: &[u8]) -> Option<(&[u8], usize)> {
    let input = skip_ws(input);
    let len = input.iter().take_while(|c| c.is_ascii_digit()).count();
    if len == 0 {
        return None;
    }
    let value = std::str::from_utf8(&input[..len]).ok()?.parse().ok()?;
    Some((&input[len..], value))
}

fn parse_stream(data: &[u8], offset: usize) -> Result<XrefSection> {
    let (id, obj) = parse_indirect_object(data, offset)?;
    let dict = match &obj {
        Object::Stream { dict, .. } => dict.clone(),
        _ => return Err(Error::InvalidXref(format!("no xref stream at {}", offset))),
    };
    if dict.get("Type").and_then(Object::as_name) != Some("XRef") {
        return Err(Error::InvalidXref(format!("object at {} is not /Type /XRef", offset)));
    }

    let widths: Vec<usize> = dict
        .get("W")
        .and_then(Object::as_array)
        .map(|w| w.iter().filter_map(Object::as_integer).map(|v| v.max(0) as usize).collect())
        .unwrap_or_default();
    if widths.len() != 3 || widths.iter().any(|&w| w > 8) {
        return Err(Error::InvalidXref("xref stream /W must hold three widths".into()));
    }
    let size = dict.get("Size").and_then(Object::as_integer).unwrap_or(0).max(0) as usize;
    let ranges: Vec<(usize, usize)> = match dict.get("Index").and_then(Object::as_array) {
        Some(index) => index
            .chunks(2)
            .filter_map(|pair| match pair {
                [a, b] => Some((a.as_integer()?.max(0) as usize, b.as_integer()?.max(0) as usize)),
                _ => None,
            })
            .collect(),
        None => vec![(0, size)],
    };

    let decoded = obj.decode_stream_data()?;
    let row = widths.iter().sum::<usize>();
    let mut entries = BTreeMap::new();
    let mut rows = decoded.chunks_exact(row.max(1));
    for (start, count) in ranges {
        for id in start..start + count {
            let Some(raw) = rows.next() else {
                return Err(Error::InvalidXref("xref stream data is truncated".into()));
            };
            let (f1, rest) = raw.split_at(widths[0]);
            let (f2, f3) = rest.split_at(widths[1]);
            let kind = if widths[0] == 0 { 1 } else { read_be(f1) };
            let entry = match kind {
                0 => XrefEntry::Free,
                1 => XrefEntry::InUse {
                    offset: read_be(f2) as usize,
                    gen: read_be(f3).min(u16::MAX as u64) as u16,
                },
                2 => XrefEntry::Compressed {
                    stream_id: read_be(f2) as u32,
                    index: read_be(f3) as u32,
                },
                // Unknown types are treated as null references
                _ => XrefEntry::Free,
            };
            entries.insert(id as u32, entry);
        }
    }

    Ok(XrefSection {
        offset,
        entries,
        trailer: dict,
        stream_id: Some(id.id),
    })
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| acc << 8 | b as u64)
}

/// Walk the `/Prev` chain from `startxref`. The newest section comes first.
pub fn load_chain(data: &[u8]) -> Result<Vec<XrefSection>> {
    let mut offset = Some(find_startxref(data)?);
    let mut seen = HashSet::new();
    let mut chain = Vec::new();
    while let Some(at) = offset {
        if !seen.insert(at) {
            log::warn!("Cyclic /Prev chain at offset {}", at);
            break;
        }
        if chain.len() >= MAX_CHAIN {
            return Err(Error::InvalidXref("/Prev chain too long".into()));
        }
        let section = parse_section(data, at)?;
        log::debug!("Xref section at {} with {} entries", section.offset, section.entries.len());
        offset = section.prev();
        chain.push(section);
    }
    Ok(chain)
}

/// End of the revision closed by the first `%%EOF` after `from`, including
/// the end-of-line marker that follows it.
pub fn revision_end(data: &[u8], from: usize) -> usize {
    let marker = b"%%EOF";
    let Some(pos) = data
        .get(from..)
        .and_then(|tail| tail.windows(marker.len()).position(|w| w == marker))
    else {
        return data.len();
    };
    let mut end = from + pos + marker.len();
    if data.get(end) == Some(&b'\r') {
        end += 1;
    }
    if data.get(end) == Some(&b'\n') {
        end += 1;
    }
    end
}

/// Rebuild a single section by scanning the file for `N G obj` headers.
/// Later definitions of the same object win.
pub fn reconstruct(data: &[u8]) -> Result<XrefSection> {
    log::info!("Reconstructing cross-reference data by scanning {} bytes", data.len());
    let mut entries = BTreeMap::new();
    for caps in RE_OBJ_HEADER.captures_iter(data) {
        let (Some(whole), Some(id), Some(gen)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        // The header must start a token
        if whole.start() > 0 && !is_whitespace(data[whole.start() - 1]) {
            continue;
        }
        let parse = |m: regex::bytes::Match| std::str::from_utf8(m.as_bytes()).ok()?.parse::<u64>().ok();
        if let (Some(id), Some(gen)) = (parse(id), parse(gen)) {
            if id <= u32::MAX as u64 && gen <= u16::MAX as u64 {
                entries.insert(
                    id as u32,
                    XrefEntry::InUse {
                        offset: whole.start(),
                        gen: gen as u16,
                    },
                );
            }
        }
    }
    if entries.is_empty() {
        return Err(Error::InvalidXref("no objects found while scanning".into()));
    }

    let mut trailer = Dict::new();
    for m in RE_TRAILER.find_iter(data) {
        let start = m.end() - 2;
        if let Ok((_, Object::Dictionary(d))) = parse_object(&data[start..]) {
            for (k, v) in d {
                trailer.insert(k, v);
            }
        }
    }
    trailer.remove("Prev");
    trailer.remove("XRefStm");

    if !trailer.contains_key("Root") {
        let root = entries.iter().find_map(|(&id, entry)| match entry {
            XrefEntry::InUse { offset, gen } => parse_indirect_object(data, *offset)
                .ok()
                .filter(|(_, obj)| obj.get("Type").and_then(Object::as_name) == Some("Catalog"))
                .map(|_| crate::object::ObjectRef::new(id, *gen)),
            _ => None,
        });
        match root {
            Some(r) => {
                trailer.insert("Root".into(), Object::Reference(r));
            },
            None => return Err(Error::InvalidXref("no catalog found while scanning".into())),
        }
    }

    Ok(XrefSection {
        offset: data.len(),
        entries,
        trailer,
        stream_id: None,
    })
}
