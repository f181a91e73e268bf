//! Visible signature appearance.
//!
//! The widget shows either a JPEG rubric scaled to the rectangle or the
//! layer-2 text, whose `$$...$$` placeholders are filled from the signer
//! certificate and the signing time.

use super::certificate::CertificateSummary;
use super::params::{FontStyle, PadesParams, TextLayer};
use crate::error::{Error, Result};
use crate::writer::content_stream::{ContentStreamBuilder, ContentStreamOp};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegDecoder;
use image::{ColorType, ImageDecoder};
use lazy_static::lazy_static;
use regex::Regex;
use std::io::Cursor;

/// Resource name of the layer-2 font.
pub const FONT_RESOURCE: &str = "F1";
/// Resource name of the rubric image.
pub const IMAGE_RESOURCE: &str = "Im1";

lazy_static! {
    static ref RE_PLACEHOLDER: Regex = Regex::new(r"\$\$(SUBJECTCN|ISSUERCN|CERTSERIAL|SIGNDATE=([^$]*))\$\$").unwrap();
    static ref RE_DATE_TOKEN: Regex = Regex::new(r"'[^']*'|y+|M+|d+|H+|h+|m+|s+|S+|E+|a|z+|Z+|%").unwrap();
}

/// A JPEG rubric ready to embed with DCTDecode.
#[derive(Debug, Clone, PartialEq)]
pub struct JpegImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// `DeviceGray` or `DeviceRGB`
    pub color_space: &'static str,
}

impl JpegImage {
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        let decoder = JpegDecoder::new(Cursor::new(&data)).map_err(|e| Error::Decode(format!("bad JPEG: {}", e)))?;
        let (width, height) = decoder.dimensions();
        let color_space = match decoder.color_type() {
            ColorType::L8 | ColorType::L16 => "DeviceGray",
            _ => "DeviceRGB",
        };
        Ok(Self {
            data,
            width,
            height,
            color_space,
        })
    }
}

/// Values substituted into layer-2 text.
#[derive(Debug, Clone)]
pub struct TextContext {
    pub subject_cn: String,
    pub issuer_cn: String,
    pub serial: String,
    pub sign_time: DateTime<Local>,
}

impl TextContext {
    pub fn new(certificate: Option<&CertificateSummary>, sign_time: DateTime<Local>) -> Self {
        let cn = |value: Option<&Option<String>>| value.cloned().flatten().unwrap_or_default();
        Self {
            subject_cn: cn(certificate.map(|c| &c.subject_cn)),
            issuer_cn: cn(certificate.map(|c| &c.issuer_cn)),
            serial: certificate.map(|c| c.serial.clone()).unwrap_or_default(),
            sign_time,
        }
    }
}

/// Translate a `SimpleDateFormat` pattern into a chrono format string.
pub fn java_date_pattern(pattern: &str) -> String {
    let mut out = String::new();
    let mut last = 0;
    for m in RE_DATE_TOKEN.find_iter(pattern) {
        out.push_str(&pattern[last..m.start()].replace('%', "%%"));
        let token = m.as_str();
        let spec = match token {
            "%" => "%%".to_string(),
            t if t.starts_with('\'') => {
                let literal = &t[1..t.len() - 1];
                if literal.is_empty() {
                    "'".to_string()
                } else {
                    literal.replace('%', "%%")
                }
            },
            "yy" => "%y".to_string(),
            t if t.starts_with('y') => "%Y".to_string(),
            "M" => "%-m".to_string(),
            "MM" => "%m".to_string(),
            "MMM" => "%b".to_string(),
            t if t.starts_with('M') => "%B".to_string(),
            "d" => "%-d".to_string(),
            t if t.starts_with('d') => "%d".to_string(),
            "H" => "%-H".to_string(),
            t if t.starts_with('H') => "%H".to_string(),
            "h" => "%-I".to_string(),
            t if t.starts_with('h') => "%I".to_string(),
            t if t.starts_with('m') => "%M".to_string(),
            t if t.starts_with('s') => "%S".to_string(),
            t if t.starts_with('S') => "%3f".to_string(),
            t if t.len() >= 4 && t.starts_with('E') => "%A".to_string(),
            t if t.starts_with('E') => "%a".to_string(),
            "a" => "%p".to_string(),
            t if t.starts_with('z') => "%Z".to_string(),
            _ => "%z".to_string(),
        };
        out.push_str(&spec);
        last = m.end();
    }
    out.push_str(&pattern[last..].replace('%', "%%"));
    out
}

/// Fill `$$SUBJECTCN$$`, `$$ISSUERCN$$`, `$$CERTSERIAL$$` and `$$SIGNDATE=pattern$$`.
pub fn expand_placeholders(text: &str, ctx: &TextContext) -> String {
    RE_PLACEHOLDER
        .replace_all(text, |caps: &regex::Captures<'_>| match &caps[1] {
            "SUBJECTCN" => ctx.subject_cn.clone(),
            "ISSUERCN" => ctx.issuer_cn.clone(),
            "CERTSERIAL" => ctx.serial.clone(),
            _ => {
                let pattern = caps.get(2).map(|m| m.as_str()).filter(|p| !p.is_empty()).unwrap_or("dd/MM/yyyy");
                ctx.sign_time.format(&java_date_pattern(pattern)).to_string()
            },
        })
        .into_owned()
}

/// Appearance stream content plus the resources it draws with.
#[derive(Debug, Clone, PartialEq)]
pub struct Appearance {
    pub content: Vec<u8>,
    /// BaseFont of [`FONT_RESOURCE`]
    pub font: Option<&'static str>,
    /// Image painted as [`IMAGE_RESOURCE`]
    pub image: Option<JpegImage>,
}

/// Build the appearance for a `width` x `height` widget.
pub fn render(params: &PadesParams, width: f64, height: f64, ctx: &TextContext) -> Appearance {
    if let Some(rubric) = &params.rubric_image {
        match JpegImage::parse(rubric.clone()) {
            Ok(image) => {
                let mut builder = ContentStreamBuilder::new();
                builder.draw_xobject(IMAGE_RESOURCE, 0.0, 0.0, width as f32, height as f32);
                return Appearance {
                    content: builder.build(),
                    font: None,
                    image: Some(image),
                };
            },
            Err(e) => log::error!("Ignoring signature rubric: {}", e),
        }
    }
    match &params.layer2 {
        Some(layer) => render_text(layer, width as f32, height as f32, ctx),
        None => Appearance {
            content: Vec::new(),
            font: None,
            image: None,
        },
    }
}

/// Break `text` into lines of at most `max_chars` characters on spaces.
fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut line = String::new();
        for word in paragraph.split(' ') {
            let needed = if line.is_empty() { word.chars().count() } else { line.chars().count() + 1 + word.chars().count() };
            if needed > max_chars && !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(word);
        }
        lines.push(line);
    }
    lines
}

fn render_text(layer: &TextLayer, width: f32, height: f32, ctx: &TextContext) -> Appearance {
    let text = expand_placeholders(&layer.text, ctx);
    let size = layer.size;
    // Average glyph advance of the base-14 fonts
    let advance = size * 0.6;
    let max_chars = ((width - 4.0) / advance).floor().max(1.0) as usize;
    let leading = size * 1.2;
    let lines = wrap(&text, max_chars);
    let (r, g, b) = layer.color.unit();

    let mut builder = ContentStreamBuilder::new();
    builder
        .op(ContentStreamOp::SetFillColorRGB(r, g, b))
        .begin_text()
        .set_font(FONT_RESOURCE, size)
        .op(ContentStreamOp::SetTextLeading(leading))
        .op(ContentStreamOp::MoveText(2.0, height - size));
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            builder.op(ContentStreamOp::NextLine);
        }
        builder.show_text(line);
    }
    builder.end_text();

    let decorations = [
        (FontStyle::UNDERLINE, -size * 0.15),
        (FontStyle::STRIKETHRU, size * 0.3),
    ];
    for (flag, offset) in decorations {
        if !layer.style.contains(flag) {
            continue;
        }
        builder
            .op(ContentStreamOp::SetStrokeColorRGB(r, g, b))
            .op(ContentStreamOp::SetLineWidth((size / 14.0).max(0.5)));
        for (i, line) in lines.iter().enumerate() {
            let y = height - size - leading * i as f32 + offset;
            let length = line.chars().count() as f32 * advance;
            builder
                .op(ContentStreamOp::MoveTo(2.0, y))
                .op(ContentStreamOp::LineTo(2.0 + length, y))
                .op(ContentStreamOp::Stroke);
        }
    }

    Appearance {
        content: builder.build(),
        font: Some(layer.family.base_font(layer.style)),
        image: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::params::{FontFamily, Rgb};
    use chrono::TimeZone;

    fn ctx() -> TextContext {
        TextContext {
            subject_cn: "Test Signer".into(),
            issuer_cn: "Test CA".into(),
            serial: "0123".into(),
            sign_time: Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap(),
        }
    }

    #[test]
    fn test_java_date_patterns() {
        assert_eq!(java_date_pattern("dd/MM/yyyy"), "%d/%m/%Y");
        assert_eq!(java_date_pattern("yyyy-MM-dd'T'HH:mm:ss"), "%Y-%m-%dT%H:%M:%S");
        assert_eq!(java_date_pattern("d 'de' MMMM"), "%-d de %B");
        assert_eq!(java_date_pattern("100%"), "100%%");
    }

    #[test]
    fn test_expand_placeholders() {
        let text = "Firmado por $$SUBJECTCN$$ ($$CERTSERIAL$$), emitido por $$ISSUERCN$$ el $$SIGNDATE=dd/MM/yyyy HH:mm$$";
        assert_eq!(
            expand_placeholders(text, &ctx()),
            "Firmado por Test Signer (0123), emitido por Test CA el 05/03/2024 14:07"
        );
        assert_eq!(expand_placeholders("$$SIGNDATE=$$", &ctx()), "05/03/2024");
        assert_eq!(expand_placeholders("$$UNKNOWN$$", &ctx()), "$$UNKNOWN$$");
    }

    #[test]
    fn test_wrap() {
        assert_eq!(wrap("aaa bbb ccc", 7), vec!["aaa bbb", "ccc"]);
        assert_eq!(wrap("one\ntwo", 20), vec!["one", "two"]);
        assert_eq!(wrap("verylongword", 4), vec!["verylongword"]);
    }

    #[test]
    fn test_text_appearance() {
        let mut layer = TextLayer::new("Signed by $$SUBJECTCN$$");
        layer.family = FontFamily::Helvetica;
        layer.style = FontStyle::BOLD | FontStyle::UNDERLINE;
        layer.color = Rgb(255, 0, 0);
        let params = PadesParams {
            layer2: Some(layer),
            ..PadesParams::default()
        };
        let appearance = render(&params, 200.0, 50.0, &ctx());
        let content = String::from_utf8(appearance.content).unwrap();
        assert_eq!(appearance.font, Some("Helvetica-Bold"));
        assert!(content.contains("1 0 0 rg"));
        assert!(content.contains("(Signed by Test Signer) Tj"));
        assert!(content.contains(" S\n") || content.contains("\nS\n"));
        assert!(appearance.image.is_none());
    }

    #[test]
    fn test_bad_rubric_falls_back_to_text() {
        let params = PadesParams {
            rubric_image: Some(b"not a jpeg".to_vec()),
            layer2: Some(TextLayer::new("fallback")),
            ..PadesParams::default()
        };
        let appearance = render(&params, 100.0, 40.0, &ctx());
        assert!(appearance.image.is_none());
        assert_eq!(appearance.font, Some("Courier"));
    }

    #[test]
    fn test_no_layers_gives_empty_appearance() {
        let appearance = render(&PadesParams::default(), 100.0, 40.0, &ctx());
        assert!(appearance.content.is_empty());
        assert!(appearance.font.is_none());
    }
}
