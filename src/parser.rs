//! PDF object syntax.
//!
//! A small nom tokenizer feeds a recursive descent parser. Only the object
//! grammar is covered (no content stream operators): the signing and
//! validation layers never interpret page content, they compare it.

use crate::error::{Error, Result};
use crate::object::{Dict, Object, ObjectRef};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while},
    character::complete::{char, digit1, one_of},
    combinator::{map, opt, value},
    sequence::{delimited, preceded},
    IResult,
};

/// Lexical tokens of the object grammar.
#[derive(Debug, PartialEq, Clone)]
pub enum Token<'a> {
    Integer(i64),
    Real(f64),
    /// Raw literal string body, escapes not yet decoded
    LiteralString(&'a [u8]),
    /// Raw hex string body
    HexString(&'a [u8]),
    /// Name with `#xx` escapes decoded
    Name(String),
    True,
    False,
    Null,
    ArrayStart,
    ArrayEnd,
    DictStart,
    DictEnd,
    ObjStart,
    ObjEnd,
    StreamStart,
    StreamEnd,
    R,
}

pub(crate) fn is_whitespace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x00 | 0x0C)
}

fn is_delimiter(c: u8) -> bool {
    matches!(c, b'/' | b'%' | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}')
}

fn fail<T>(input: &[u8], kind: nom::error::ErrorKind) -> IResult<&[u8], T> {
    Err(nom::Err::Error(nom::error::Error::new(input, kind)))
}

/// Skip whitespace and `%` comments.
pub fn skip_ws(mut input: &[u8]) -> &[u8] {
    loop {
        let trimmed = input
            .iter()
            .position(|&c| !is_whitespace(c))
            .map_or(&input[input.len()..], |p| &input[p..]);
        if trimmed.first() == Some(&b'%') {
            let rest: IResult<&[u8], &[u8]> =
                preceded(char('%'), take_till(|c| c == b'\r' || c == b'\n'))(trimmed);
            match rest {
                Ok((rest, _)) => input = rest,
                Err(_) => return trimmed,
            }
        } else {
            return trimmed;
        }
    }
}

fn number(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let start = input;
    let (input, sign) = opt(one_of("+-"))(input)?;
    let (input, int_part) = opt(digit1)(input)?;
    let (input, frac_part) = opt(preceded(char('.'), opt(digit1)))(input)?;
    if int_part.is_none() && frac_part.is_none() {
        return fail(start, nom::error::ErrorKind::Digit);
    }
    let negative = sign == Some('-');
    let digits = |b: Option<&[u8]>| -> String {
        b.map(|d| d.iter().map(|&c| c as char).collect()).unwrap_or_default()
    };

    match frac_part {
        Some(frac) => {
            let text = format!("0{}.{}0", digits(int_part), digits(frac));
            let value: f64 = text
                .parse()
                .map_err(|_| nom::Err::Error(nom::error::Error::new(start, nom::error::ErrorKind::Float)))?;
            Ok((input, Token::Real(if negative { -value } else { value })))
        },
        None => {
            let text = digits(int_part);
            match text.parse::<i64>() {
                Ok(v) => Ok((input, Token::Integer(if negative { -v } else { v }))),
                // Out of range integers degrade to reals
                Err(_) => {
                    let v: f64 = text.parse().unwrap_or(0.0);
                    Ok((input, Token::Real(if negative { -v } else { v })))
                },
            }
        },
    }
}

fn literal_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (body, _) = char('(')(input)?;
    let mut depth = 1usize;
    let mut pos = 0usize;
    while pos < body.len() {
        match body[pos] {
            b'\\' => pos += 2,
            b'(' => {
                depth += 1;
                pos += 1;
            },
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&body[pos + 1..], Token::LiteralString(&body[..pos])));
                }
                pos += 1;
            },
            _ => pos += 1,
        }
    }
    fail(input, nom::error::ErrorKind::Char)
}

fn hex_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    if input.starts_with(b"<<") {
        return fail(input, nom::error::ErrorKind::Tag);
    }
    delimited(
        char('<'),
        map(take_while(|c: u8| c.is_ascii_hexdigit() || is_whitespace(c)), Token::HexString),
        char('>'),
    )(input)
}

/// Decode `#xx` escapes in a name.
pub fn decode_name_escapes(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'#' && i + 2 < raw.len() {
            let hex = std::str::from_utf8(&raw[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    String::from_utf8(out.clone()).unwrap_or_else(|_| out.iter().map(|&b| b as char).collect())
}

fn name(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    preceded(
        char('/'),
        map(take_while(|c: u8| !is_whitespace(c) && !is_delimiter(c)), |raw: &[u8]| {
            Token::Name(decode_name_escapes(raw))
        }),
    )(input)
}

fn keyword(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, tok) = alt((
        value(Token::False, tag(b"false")),
        value(Token::True, tag(b"true")),
        value(Token::Null, tag(b"null")),
        value(Token::ObjEnd, tag(b"endobj")),
        value(Token::StreamEnd, tag(b"endstream")),
        value(Token::StreamStart, tag(b"stream")),
        value(Token::ObjStart, tag(b"obj")),
        value(Token::DictStart, tag(b"<<")),
        value(Token::DictEnd, tag(b">>")),
        value(Token::ArrayStart, tag(b"[")),
        value(Token::ArrayEnd, tag(b"]")),
        value(Token::R, tag(b"R")),
    ))(input)?;
    // Alphabetic keywords must end at a token boundary
    let alphabetic = !matches!(
        tok,
        Token::DictStart | Token::DictEnd | Token::ArrayStart | Token::ArrayEnd
    );
    if alphabetic {
        if let Some(&c) = rest.first() {
            if !is_whitespace(c) && !is_delimiter(c) {
                return fail(input, nom::error::ErrorKind::Tag);
            }
        }
    }
    Ok((rest, tok))
}

/// Read one token after skipping whitespace and comments.
pub fn token(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let input = skip_ws(input);
    alt((keyword, name, number, literal_string, hex_string))(input)
}

/// Decode the escapes of a literal string body.
pub fn decode_literal_string(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let c = raw[i];
        if c != b'\\' || i + 1 >= raw.len() {
            out.push(c);
            i += 1;
            continue;
        }
        let next = raw[i + 1];
        i += 2;
        match next {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'\n' => {},
            b'\r' => {
                if raw.get(i) == Some(&b'\n') {
                    i += 1;
                }
            },
            b'0'..=b'7' => {
                let mut v = (next - b'0') as u32;
                let mut n = 1;
                while n < 3 && i < raw.len() && (b'0'..=b'7').contains(&raw[i]) {
                    v = v * 8 + (raw[i] - b'0') as u32;
                    i += 1;
                    n += 1;
                }
                out.push((v & 0xFF) as u8);
            },
            other => out.push(other),
        }
    }
    out
}

/// Decode the body of a hex string. An odd trailing digit is padded with 0.
pub fn decode_hex(hex: &[u8]) -> Result<Vec<u8>> {
    let digits: Vec<u8> = hex.iter().copied().filter(|&c| !is_whitespace(c)).collect();
    let mut out = Vec::with_capacity(digits.len() / 2 + 1);
    for pair in digits.chunks(2) {
        let nibble = |c: u8| -> Result<u8> {
            (c as char).to_digit(16).map(|d| d as u8).ok_or_else(|| Error::ParseError {
                offset: 0,
                reason: format!("invalid hex digit '{}'", c as char),
            })
        };
        let hi = nibble(pair[0])?;
        let lo = match pair.get(1) {
            Some(&c) => nibble(c)?,
            None => 0,
        };
        out.push(hi << 4 | lo);
    }
    Ok(out)
}

/// Parse one object. Integers followed by `gen R` become references and a
/// dictionary followed by `stream` becomes a stream.
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    let (rest, tok) = token(input)?;
    match tok {
        Token::Null => Ok((rest, Object::Null)),
        Token::True => Ok((rest, Object::Boolean(true))),
        Token::False => Ok((rest, Object::Boolean(false))),
        Token::Real(r) => Ok((rest, Object::Real(r))),
        Token::Integer(i) => {
            if let Ok((after_gen, Token::Integer(gen))) = token(rest) {
                if let Ok((after_r, Token::R)) = token(after_gen) {
                    if i >= 0 && (0..=u16::MAX as i64).contains(&gen) {
                        return Ok((after_r, Object::Reference(ObjectRef::new(i as u32, gen as u16))));
                    }
                }
            }
            Ok((rest, Object::Integer(i)))
        },
        Token::LiteralString(raw) => Ok((rest, Object::String(decode_literal_string(raw)))),
        Token::HexString(raw) => match decode_hex(raw) {
            Ok(bytes) => Ok((rest, Object::String(bytes))),
            Err(_) => Err(nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::HexDigit))),
        },
        Token::Name(n) => Ok((rest, Object::Name(n))),
        Token::ArrayStart => parse_array(rest),
        Token::DictStart => {
            let (rest, dict) = parse_dict_body(rest)?;
            match token(rest) {
                Ok((after_kw, Token::StreamStart)) => {
                    let (rest, data) = parse_stream_data(after_kw, &dict)?;
                    Ok((rest, Object::Stream { dict, data: bytes::Bytes::from(data) }))
                },
                _ => Ok((rest, Object::Dictionary(dict))),
            }
        },
        _ => fail(input, nom::error::ErrorKind::Tag),
    }
}

fn parse_array(mut input: &[u8]) -> IResult<&[u8], Object> {
    let mut items = Vec::new();
    loop {
        if let Ok((rest, Token::ArrayEnd)) = token(input) {
            return Ok((rest, Object::Array(items)));
        }
        let (rest, obj) = parse_object(input)?;
        items.push(obj);
        input = rest;
    }
}

fn parse_dict_body(mut input: &[u8]) -> IResult<&[u8], Dict> {
    let mut dict = Dict::new();
    loop {
        let (rest, tok) = token(input)?;
        match tok {
            Token::DictEnd => return Ok((rest, dict)),
            Token::Name(key) => {
                let (rest, value) = parse_object(rest)?;
                // A null value is equivalent to an absent key
                if value != Object::Null {
                    dict.insert(key, value);
                }
                input = rest;
            },
            _ => return fail(input, nom::error::ErrorKind::Tag),
        }
    }
}

fn parse_stream_data<'a>(input: &'a [u8], dict: &Dict) -> IResult<&'a [u8], Vec<u8>> {
    let input = if input.starts_with(b"\r\n") {
        &input[2..]
    } else if input.starts_with(b"\n") || input.starts_with(b"\r") {
        &input[1..]
    } else {
        input
    };

    if let Some(length) = dict.get("Length").and_then(Object::as_integer) {
        let length = length.max(0) as usize;
        if length <= input.len() {
            if let Ok((rest, Token::StreamEnd)) = token(&input[length..]) {
                return Ok((rest, input[..length].to_vec()));
            }
        }
        log::debug!("Stream /Length {} does not reach endstream, scanning", length);
    }

    // Indirect or wrong /Length: scan for the keyword
    let keyword = b"endstream";
    match input.windows(keyword.len()).position(|w| w == keyword) {
        Some(pos) => {
            let mut end = pos;
            if end > 0 && input[end - 1] == b'\n' {
                end -= 1;
            }
            if end > 0 && input[end - 1] == b'\r' {
                end -= 1;
            }
            Ok((&input[pos + keyword.len()..], input[..end].to_vec()))
        },
        None => fail(input, nom::error::ErrorKind::Eof),
    }
}

/// Parse `N G obj <object> endobj` starting at `offset` in `data`.
pub fn parse_indirect_object(data: &[u8], offset: usize) -> Result<(ObjectRef, Object)> {
    let err = |reason: &str| Error::ParseError {
        offset,
        reason: reason.to_string(),
    };
    let input = data.get(offset..).ok_or_else(|| err("offset past end of file"))?;
    let (rest, id) = match token(input) {
        Ok((rest, Token::Integer(id))) if id >= 0 => (rest, id as u32),
        _ => return Err(err("expected object number")),
    };
    let (rest, gen) = match token(rest) {
        Ok((rest, Token::Integer(gen))) if (0..=u16::MAX as i64).contains(&gen) => (rest, gen as u16),
        _ => return Err(err("expected generation number")),
    };
    let rest = match token(rest) {
        Ok((rest, Token::ObjStart)) => rest,
        _ => return Err(err("expected 'obj' keyword")),
    };
    let (_, object) = parse_object(rest).map_err(|e| Error::ParseError {
        offset,
        reason: format!("object {} {}: {:?}", id, gen, e),
    })?;
    Ok((ObjectRef::new(id, gen), object))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &[u8]) -> Object {
        parse_object(input).unwrap().1
    }

    #[test]
    fn test_tokens() {
        assert_eq!(token(b"  42 ").unwrap().1, Token::Integer(42));
        assert_eq!(token(b"-.5").unwrap().1, Token::Real(-0.5));
        assert_eq!(token(b"5.").unwrap().1, Token::Real(5.0));
        assert_eq!(token(b"% comment\n/Type").unwrap().1, Token::Name("Type".into()));
        assert_eq!(token(b"/A#20B").unwrap().1, Token::Name("A B".into()));
        assert_eq!(token(b"<<").unwrap().1, Token::DictStart);
        assert_eq!(token(b"(a (b) c)").unwrap().1, Token::LiteralString(b"a (b) c"));
    }

    #[test]
    fn test_keyword_needs_boundary() {
        // "nullx" is not the keyword null
        assert!(keyword(b"nullx").is_err());
        assert_eq!(keyword(b"null]").unwrap().1, Token::Null);
    }

    #[test]
    fn test_primitives() {
        assert_eq!(parse(b"null"), Object::Null);
        assert_eq!(parse(b"true"), Object::Boolean(true));
        assert_eq!(parse(b"-17"), Object::Integer(-17));
        assert_eq!(parse(b"/ByteRange"), Object::Name("ByteRange".into()));
        assert_eq!(parse(b"<48656C6C6F>"), Object::String(b"Hello".to_vec()));
        assert_eq!(parse(b"<4>"), Object::String(vec![0x40]));
    }

    #[test]
    fn test_literal_escapes() {
        assert_eq!(parse(b"(a\\nb)"), Object::String(b"a\nb".to_vec()));
        assert_eq!(parse(b"(\\(x\\))"), Object::String(b"(x)".to_vec()));
        assert_eq!(parse(b"(\\247)"), Object::String(vec![0xA7]));
        assert_eq!(parse(b"(a\\\nb)"), Object::String(b"ab".to_vec()));
    }

    #[test]
    fn test_reference_and_array() {
        let obj = parse(b"[1 0 R 2 /N 3.5]");
        let arr = obj.as_array().unwrap();
        assert_eq!(arr[0], Object::Reference(ObjectRef::new(1, 0)));
        assert_eq!(arr[1], Object::Integer(2));
        assert_eq!(arr[3], Object::Real(3.5));
    }

    #[test]
    fn test_dictionary_drops_null_values() {
        let obj = parse(b"<< /Type /Sig /Reason null /M (D:2024) >>");
        let dict = obj.as_dict().unwrap();
        assert_eq!(dict.len(), 2);
        assert!(!dict.contains_key("Reason"));
    }

    #[test]
    fn test_stream_with_length() {
        let obj = parse(b"<< /Length 5 >>\nstream\nhello\nendstream");
        match obj {
            Object::Stream { data, .. } => assert_eq!(&data[..], b"hello"),
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_with_indirect_length_scans() {
        let obj = parse(b"<< /Length 9 0 R >>\r\nstream\r\nabc def\r\nendstream");
        match obj {
            Object::Stream { data, .. } => assert_eq!(&data[..], b"abc def"),
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_indirect_object() {
        let data = b"%PDF-1.7\n4 0 obj\n<< /Type /Catalog >>\nendobj\n";
        let (r, obj) = parse_indirect_object(data, 9).unwrap();
        assert_eq!(r, ObjectRef::new(4, 0));
        assert_eq!(obj.get("Type").and_then(Object::as_name), Some("Catalog"));
        assert!(parse_indirect_object(data, 0).is_err());
    }

    #[test]
    fn test_decode_hex_rejects_garbage() {
        assert!(decode_hex(b"zz").is_err());
        assert_eq!(decode_hex(b"01 02\n03").unwrap(), vec![1, 2, 3]);
    }
}
