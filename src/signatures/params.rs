//! Typed signing and validation parameters.
//!
//! Callers pass string-keyed extra parameters (usually properties text).
//! They are converted once, here, into [`PadesParams`] or
//! [`ValidationParams`]. Malformed optional values are logged and replaced by
//! their defaults; malformed values that change what gets signed are errors.

use super::byterange::DEFAULT_CAPACITY;
use super::types::{DigestAlgorithm, SignatureSubFilter};
use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bitflags::bitflags;
use std::collections::HashMap;

/// String-keyed extra parameters.
pub type ExtraParams = HashMap<String, String>;

/// Page sentinel meaning "the last page of the document being signed".
pub const LAST_PAGE: i32 = -666;

/// Description used for the content hints attribute when none is given.
pub const DEFAULT_CONTENT_DESCRIPTION: &str = "Documento en formato PDF";

/// Parse Java-properties text: `key=value`, `key: value` or `key value`
/// lines, `#`/`!` comments, backslash escapes and line continuations.
pub fn parse_properties(text: &str) -> ExtraParams {
    let mut out = ExtraParams::new();
    let mut logical = String::new();
    for raw in text.lines() {
        let line = raw.trim_start();
        if logical.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
            continue;
        }
        let trailing = line.chars().rev().take_while(|&c| c == '\\').count();
        if trailing % 2 == 1 {
            logical.push_str(&line[..line.len() - 1]);
            continue;
        }
        logical.push_str(line);
        let (key, value) = split_property(&logical);
        out.insert(key, value);
        logical.clear();
    }
    if !logical.is_empty() {
        let (key, value) = split_property(&logical);
        out.insert(key, value);
    }
    out
}

fn split_property(line: &str) -> (String, String) {
    let mut chars = line.char_indices().peekable();
    let mut split = line.len();
    let mut escaped = false;
    while let Some((i, c)) = chars.next() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' | ' ' | '\t' => {
                split = i;
                break;
            },
            _ => {},
        }
    }
    let key = unescape(&line[..split]);
    let mut rest = line[split..].trim_start_matches([' ', '\t']);
    if let Some(stripped) = rest.strip_prefix(['=', ':']) {
        rest = stripped.trim_start_matches([' ', '\t']);
    }
    (key, unescape(rest))
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(ch) => out.push(ch),
                    None => out.push_str(&hex),
                }
            },
            Some(other) => out.push(other),
            None => {},
        }
    }
    out
}

pub(crate) fn get<'a>(params: &'a ExtraParams, key: &str) -> Option<&'a str> {
    params.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// `Some(true)`/`Some(false)` for boolean text, `None` when absent.
pub(crate) fn get_bool(params: &ExtraParams, key: &str) -> Option<bool> {
    let value = get(params, key)?;
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        log::warn!("Ignoring non-boolean value '{}' for '{}'", value, key);
        None
    }
}

pub(crate) fn get_int(params: &ExtraParams, key: &str) -> Option<i64> {
    let value = get(params, key)?;
    match value.parse::<i64>() {
        Ok(n) => Some(n),
        Err(_) => {
            log::warn!("Ignoring non-numeric value '{}' for '{}'", value, key);
            None
        },
    }
}

/// Where the signature widget goes.
#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    /// Zero-size widget on the first page
    Invisible,
    /// New widget; `page` is 1-based or [`LAST_PAGE`]
    Rect { page: i32, rect: [f64; 4] },
    /// Existing empty signature field
    Field(String),
}

/// Base-14 font families for the layer-2 text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FontFamily {
    #[default]
    Courier,
    Helvetica,
    TimesRoman,
    Symbol,
    ZapfDingbats,
}

impl FontFamily {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Courier),
            1 => Some(Self::Helvetica),
            2 => Some(Self::TimesRoman),
            3 => Some(Self::Symbol),
            4 => Some(Self::ZapfDingbats),
            _ => None,
        }
    }

    /// PostScript name of the standard font for a style.
    pub fn base_font(&self, style: FontStyle) -> &'static str {
        let bold = style.contains(FontStyle::BOLD);
        let italic = style.contains(FontStyle::ITALIC);
        match (self, bold, italic) {
            (Self::Courier, false, false) => "Courier",
            (Self::Courier, true, false) => "Courier-Bold",
            (Self::Courier, false, true) => "Courier-Oblique",
            (Self::Courier, true, true) => "Courier-BoldOblique",
            (Self::Helvetica, false, false) => "Helvetica",
            (Self::Helvetica, true, false) => "Helvetica-Bold",
            (Self::Helvetica, false, true) => "Helvetica-Oblique",
            (Self::Helvetica, true, true) => "Helvetica-BoldOblique",
            (Self::TimesRoman, false, false) => "Times-Roman",
            (Self::TimesRoman, true, false) => "Times-Bold",
            (Self::TimesRoman, false, true) => "Times-Italic",
            (Self::TimesRoman, true, true) => "Times-BoldItalic",
            (Self::Symbol, ..) => "Symbol",
            (Self::ZapfDingbats, ..) => "ZapfDingbats",
        }
    }
}

bitflags! {
    /// Layer-2 font style bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FontStyle: u32 {
        const BOLD = 1;
        const ITALIC = 2;
        const UNDERLINE = 4;
        const STRIKETHRU = 8;
    }
}

/// 8-bit RGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const BLACK: Rgb = Rgb(0, 0, 0);

    /// Named palette colour. Unknown names fall back to black.
    pub fn from_name(name: &str) -> Rgb {
        match name.to_ascii_lowercase().as_str() {
            "black" => Rgb(0, 0, 0),
            "white" => Rgb(255, 255, 255),
            "lightgray" => Rgb(192, 192, 192),
            "gray" => Rgb(128, 128, 128),
            "darkgray" => Rgb(64, 64, 64),
            "red" => Rgb(255, 0, 0),
            "pink" => Rgb(255, 175, 175),
            _ => {
                log::warn!("Unsupported layer 2 color '{}', using black", name);
                Rgb::BLACK
            },
        }
    }

    /// Components scaled to the 0..=1 range of content stream operators.
    pub fn unit(&self) -> (f32, f32, f32) {
        (self.0 as f32 / 255.0, self.1 as f32 / 255.0, self.2 as f32 / 255.0)
    }
}

/// Visible text of the signature widget.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLayer {
    /// Text, possibly containing `$$...$$` placeholders
    pub text: String,
    pub family: FontFamily,
    pub size: f32,
    pub style: FontStyle,
    pub color: Rgb,
}

impl TextLayer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            family: FontFamily::default(),
            size: 12.0,
            style: FontStyle::empty(),
            color: Rgb::BLACK,
        }
    }
}

/// File embedded alongside the signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub file_name: String,
    pub description: Option<String>,
    pub data: Vec<u8>,
}

/// Signature policy identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct SignaturePolicy {
    /// Policy OID
    pub identifier: String,
    pub hash: Vec<u8>,
    pub hash_algorithm: DigestAlgorithm,
    /// Optional SPURI qualifier
    pub qualifier: Option<String>,
}

/// Extension added to a TimeStampReq.
#[derive(Debug, Clone, PartialEq)]
pub struct TsaExtension {
    pub oid: String,
    pub critical: bool,
    pub value: Vec<u8>,
}

/// Time-stamping authority configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TsaConfig {
    pub url: String,
    pub policy: String,
    /// Digest of the imprint, SHA-1 unless configured
    pub hash_algorithm: DigestAlgorithm,
    pub require_cert: bool,
    pub user: Option<String>,
    pub password: Option<String>,
    pub extension: Option<TsaExtension>,
    /// When false a TSA failure only logs and the signature stays unstamped
    pub required: bool,
    pub timeout_secs: u64,
}

impl TsaConfig {
    pub fn new(url: impl Into<String>, policy: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            policy: policy.into(),
            hash_algorithm: DigestAlgorithm::Sha1,
            require_cert: true,
            user: None,
            password: None,
            extension: None,
            required: true,
            timeout_secs: 30,
        }
    }
}

/// Parameters of one PAdES signature.
#[derive(Debug, Clone, PartialEq)]
pub struct PadesParams {
    pub placement: Placement,
    /// JPEG drawn into the widget; takes precedence over `layer2`
    pub rubric_image: Option<Vec<u8>>,
    pub layer2: Option<TextLayer>,
    /// Write `/M` with the current time
    pub apply_system_date: bool,
    pub reason: Option<String>,
    pub location: Option<String>,
    pub contact: Option<String>,
    pub sub_filter: SignatureSubFilter,
    pub attachment: Option<Attachment>,
    pub owner_password: Option<String>,
    pub user_password: Option<String>,
    /// No interactive caller; conditions needing confirmation become errors
    pub headless: bool,
    pub allow_signing_certified: Option<bool>,
    pub avoid_encrypting_signed_pdfs: bool,
    /// Explicit choice of signing-certificate attribute version
    pub signing_certificate_v2: Option<bool>,
    pub content_description: String,
    pub policy: Option<SignaturePolicy>,
    pub tsa: Option<TsaConfig>,
    /// Reserved DER signature size in bytes
    pub signature_capacity: usize,
}

impl Default for PadesParams {
    fn default() -> Self {
        Self {
            placement: Placement::Invisible,
            rubric_image: None,
            layer2: None,
            apply_system_date: true,
            reason: None,
            location: None,
            contact: None,
            sub_filter: SignatureSubFilter::default(),
            attachment: None,
            owner_password: None,
            user_password: None,
            headless: false,
            allow_signing_certified: None,
            avoid_encrypting_signed_pdfs: false,
            signing_certificate_v2: None,
            content_description: DEFAULT_CONTENT_DESCRIPTION.to_string(),
            policy: None,
            tsa: None,
            signature_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl PadesParams {
    /// Convert extra parameters.
    pub fn from_extra_params(params: &ExtraParams) -> Result<Self> {
        let mut out = PadesParams {
            placement: placement(params),
            rubric_image: get(params, "signatureRubricImage").and_then(|b64| match STANDARD.decode(b64) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    log::error!("Rubric image is not valid base64, ignoring it: {}", e);
                    None
                },
            }),
            layer2: get(params, "layer2Text").map(|text| text_layer(params, text)),
            apply_system_date: get_bool(params, "applySystemDate").unwrap_or(true),
            reason: get(params, "signReason").map(str::to_string),
            location: get(params, "signatureProductionCity").map(str::to_string),
            contact: get(params, "signerContact").map(str::to_string),
            sub_filter: get(params, "signatureSubFilter")
                .map(SignatureSubFilter::from_pdf_name)
                .unwrap_or_default(),
            attachment: attachment(params),
            owner_password: params.get("ownerPassword").cloned(),
            user_password: params.get("userPassword").cloned(),
            headless: get_bool(params, "headLess").unwrap_or(false),
            allow_signing_certified: get_bool(params, "allowSigningCertifiedPdfs"),
            avoid_encrypting_signed_pdfs: get_bool(params, "avoidEncryptingSignedPdfs").unwrap_or(false),
            signing_certificate_v2: get_bool(params, "signingCertificateV2"),
            content_description: get(params, "contentDescription")
                .unwrap_or(DEFAULT_CONTENT_DESCRIPTION)
                .to_string(),
            policy: policy(params)?,
            tsa: tsa(params),
            signature_capacity: DEFAULT_CAPACITY,
        };
        if let Some(capacity) = get_int(params, "signatureCapacity") {
            if capacity <= 0 {
                return Err(Error::parameter("signatureCapacity", "must be positive"));
            }
            out.signature_capacity = capacity as usize;
        }
        Ok(out)
    }

    /// Passwords to try, owner first.
    pub fn passwords(&self) -> Vec<&[u8]> {
        [&self.owner_password, &self.user_password]
            .into_iter()
            .flatten()
            .map(|p| p.as_bytes())
            .collect()
    }
}

fn placement(params: &ExtraParams) -> Placement {
    if let Some(field) = get(params, "signatureField") {
        return Placement::Field(field.to_string());
    }
    let keys = [
        "signaturePositionOnPageLowerLeftX",
        "signaturePositionOnPageLowerLeftY",
        "signaturePositionOnPageUpperRightX",
        "signaturePositionOnPageUpperRightY",
    ];
    let coords: Vec<f64> = keys
        .iter()
        .filter_map(|k| get(params, k))
        .filter_map(|v| v.parse::<f64>().ok())
        .collect();
    if coords.len() != 4 {
        if keys.iter().any(|k| params.contains_key(*k)) {
            log::warn!("Incomplete or non-numeric signature position, signing invisibly");
        }
        return Placement::Invisible;
    }
    let page = get(params, "signaturePage")
        .and_then(|p| p.parse::<i32>().ok())
        .unwrap_or(LAST_PAGE);
    Placement::Rect {
        page,
        rect: [coords[0], coords[1], coords[2], coords[3]],
    }
}

fn text_layer(params: &ExtraParams, text: &str) -> TextLayer {
    let mut layer = TextLayer::new(text);
    if let Some(code) = get_int(params, "layer2FontFamily") {
        layer.family = FontFamily::from_code(code).unwrap_or_else(|| {
            log::warn!("Unknown font family {}, using Courier", code);
            FontFamily::Courier
        });
    }
    if let Some(size) = get_int(params, "layer2FontSize").filter(|s| *s > 0) {
        layer.size = size as f32;
    }
    if let Some(style) = get_int(params, "layer2FontStyle").filter(|s| *s >= 0) {
        layer.style = FontStyle::from_bits_truncate(style as u32);
    }
    if let Some(color) = get(params, "layer2FontColor") {
        layer.color = Rgb::from_name(color);
    }
    layer
}

fn attachment(params: &ExtraParams) -> Option<Attachment> {
    let (b64, file_name) = (get(params, "attach")?, get(params, "attachFileName")?);
    match STANDARD.decode(b64) {
        Ok(data) => Some(Attachment {
            file_name: file_name.to_string(),
            description: get(params, "attachDescription").map(str::to_string),
            data,
        }),
        Err(e) => {
            log::warn!("Attachment is not valid base64, ignoring it: {}", e);
            None
        },
    }
}

fn policy(params: &ExtraParams) -> Result<Option<SignaturePolicy>> {
    let Some(identifier) = get(params, "policyIdentifier") else {
        return Ok(None);
    };
    let hash = get(params, "policyIdentifierHash")
        .ok_or_else(|| Error::parameter("policyIdentifierHash", "required with policyIdentifier"))?;
    let hash = STANDARD
        .decode(hash)
        .map_err(|e| Error::parameter("policyIdentifierHash", e.to_string()))?;
    let hash_algorithm = match get(params, "policyIdentifierHashAlgorithm") {
        Some(name) => DigestAlgorithm::from_name(name)
            .ok_or_else(|| Error::parameter("policyIdentifierHashAlgorithm", format!("unknown digest '{}'", name)))?,
        None => DigestAlgorithm::Sha1,
    };
    Ok(Some(SignaturePolicy {
        identifier: identifier.to_string(),
        hash,
        hash_algorithm,
        qualifier: get(params, "policyQualifier").map(str::to_string),
    }))
}

fn tsa(params: &ExtraParams) -> Option<TsaConfig> {
    let url = get(params, "tsaURL")?;
    let Some(policy) = get(params, "tsaPolicy") else {
        log::warn!("A TSA URL was given without a TSA policy, the signature will not be timestamped");
        return None;
    };
    if reqwest::Url::parse(url).is_err() {
        log::warn!("Invalid TSA URL '{}', the signature will not be timestamped", url);
        return None;
    }
    let mut config = TsaConfig::new(url, policy);
    if let Some(alg) = get(params, "tsaHashAlgorithm") {
        config.hash_algorithm = DigestAlgorithm::from_name(alg).unwrap_or_else(|| {
            log::warn!("Unknown TSA hash algorithm '{}', using SHA-1", alg);
            DigestAlgorithm::Sha1
        });
    }
    config.require_cert = get_bool(params, "tsaRequireCert").unwrap_or(true);
    config.user = get(params, "tsaUsr").map(str::to_string);
    config.password = get(params, "tsaPwd").map(str::to_string);
    if let (Some(oid), Some(value)) = (get(params, "tsaExtensionOid"), get(params, "tsaExtensionValueBase64")) {
        match STANDARD.decode(value) {
            Ok(value) => {
                config.extension = Some(TsaExtension {
                    oid: oid.to_string(),
                    critical: get_bool(params, "tsaExtensionCritical").unwrap_or(false),
                    value,
                })
            },
            Err(e) => log::warn!("TSA extension value is not valid base64, ignoring it: {}", e),
        }
    }
    if let Some(required) = get_bool(params, "tsaRequired") {
        config.required = required;
    }
    if let Some(timeout) = get_int(params, "tsaTimeout").filter(|t| *t > 0) {
        config.timeout_secs = timeout as u64;
    }
    Some(config)
}

/// How many pages the shadow-attack check compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagesToCheck {
    First(usize),
    All,
}

impl Default for PagesToCheck {
    fn default() -> Self {
        PagesToCheck::First(10)
    }
}

/// Validation switches.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationParams {
    pub check_certificates: bool,
    pub allow_sign_modified_form: Option<bool>,
    pub allow_shadow_attack: Option<bool>,
    pub pages_to_check: PagesToCheck,
    /// An interactive caller can confirm; unset switches raise
    /// [`Error::NeedsConfirmation`] instead of reporting a finding
    pub relaxed: bool,
    /// Passwords for encrypted documents
    pub passwords: Vec<String>,
}

impl Default for ValidationParams {
    fn default() -> Self {
        Self {
            check_certificates: true,
            allow_sign_modified_form: None,
            allow_shadow_attack: None,
            pages_to_check: PagesToCheck::default(),
            relaxed: false,
            passwords: Vec::new(),
        }
    }
}

impl ValidationParams {
    pub fn from_extra_params(params: &ExtraParams) -> Self {
        let pages_to_check = match get(params, "pagesToCheckPSA") {
            Some(v) if v.eq_ignore_ascii_case("all") => PagesToCheck::All,
            Some(v) => match v.parse::<usize>() {
                Ok(n) if n > 0 => PagesToCheck::First(n),
                _ => {
                    log::warn!("Invalid pagesToCheckPSA '{}', checking the first 10 pages", v);
                    PagesToCheck::default()
                },
            },
            None => PagesToCheck::default(),
        };
        Self {
            check_certificates: get_bool(params, "checkCertificates").unwrap_or(true),
            allow_sign_modified_form: get_bool(params, "allowSignModifiedForm"),
            allow_shadow_attack: get_bool(params, "allowShadowAttack"),
            pages_to_check,
            relaxed: false,
            passwords: ["ownerPassword", "userPassword"]
                .iter()
                .filter_map(|k| params.get(*k).cloned())
                .collect(),
        }
    }

    pub fn relaxed(mut self, relaxed: bool) -> Self {
        self.relaxed = relaxed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn props(text: &str) -> ExtraParams {
        parse_properties(text)
    }

    #[test]
    fn test_properties_syntax() {
        let p = props("# comment\n! other\nsignReason=Approved\nsignatureProductionCity : Madrid\nheadLess true\n\n");
        assert_eq!(p.get("signReason").map(String::as_str), Some("Approved"));
        assert_eq!(p.get("signatureProductionCity").map(String::as_str), Some("Madrid"));
        assert_eq!(p.get("headLess").map(String::as_str), Some("true"));
        assert_eq!(p.len(), 3);
    }

    #[test]
    fn test_properties_escapes_and_continuation() {
        let p = props("layer2Text=Firmado por $$SUBJECTCN$$\\nel \\u00e1rbol\nlong=a\\\n    b\nkey\\=x=y");
        assert_eq!(p["layer2Text"], "Firmado por $$SUBJECTCN$$\nel \u{e1}rbol");
        assert_eq!(p["long"], "ab");
        assert_eq!(p["key=x"], "y");
    }

    #[test]
    fn test_defaults() {
        let params = PadesParams::from_extra_params(&ExtraParams::new()).unwrap();
        assert_eq!(params, PadesParams::default());
        assert_eq!(params.placement, Placement::Invisible);
        assert!(params.apply_system_date);
        assert_eq!(params.content_description, "Documento en formato PDF");
        assert_eq!(params.signature_capacity, 8000);
    }

    #[test]
    fn test_placement_rules() {
        let p = props(
            "signaturePositionOnPageLowerLeftX=10\nsignaturePositionOnPageLowerLeftY=20\n\
             signaturePositionOnPageUpperRightX=210\nsignaturePositionOnPageUpperRightY=80",
        );
        assert_eq!(
            PadesParams::from_extra_params(&p).unwrap().placement,
            Placement::Rect {
                page: LAST_PAGE,
                rect: [10.0, 20.0, 210.0, 80.0]
            }
        );
        let mut with_field = p.clone();
        with_field.insert("signatureField".into(), "Sig1".into());
        assert_eq!(
            PadesParams::from_extra_params(&with_field).unwrap().placement,
            Placement::Field("Sig1".into())
        );
        let mut partial = p;
        partial.remove("signaturePositionOnPageUpperRightY");
        assert_eq!(PadesParams::from_extra_params(&partial).unwrap().placement, Placement::Invisible);
    }

    #[test]
    fn test_text_layer_and_palette() {
        let p = props("layer2Text=Hola\nlayer2FontFamily=2\nlayer2FontSize=9\nlayer2FontStyle=3\nlayer2FontColor=pink");
        let layer = PadesParams::from_extra_params(&p).unwrap().layer2.unwrap();
        assert_eq!(layer.family, FontFamily::TimesRoman);
        assert_eq!(layer.size, 9.0);
        assert_eq!(layer.style, FontStyle::BOLD | FontStyle::ITALIC);
        assert_eq!(layer.color, Rgb(255, 175, 175));
        assert_eq!(layer.family.base_font(layer.style), "Times-BoldItalic");
        assert_eq!(Rgb::from_name("lightGray"), Rgb(192, 192, 192));
        assert_eq!(Rgb::from_name("chartreuse"), Rgb::BLACK);
    }

    #[test]
    fn test_policy_requires_hash() {
        let p = props("policyIdentifier=2.16.724.1.3.1.1.2.1.9");
        assert!(matches!(
            PadesParams::from_extra_params(&p),
            Err(Error::InvalidParameter { .. })
        ));
        let p = props(
            "policyIdentifier=2.16.724.1.3.1.1.2.1.9\npolicyIdentifierHash=G7roucf600+f03r/o0bAOQ6WAs0=\n\
             policyQualifier=https://sede.060.gob.es/politica_de_firma_anexo_1.pdf",
        );
        let policy = PadesParams::from_extra_params(&p).unwrap().policy.unwrap();
        assert_eq!(policy.hash.len(), 20);
        assert_eq!(policy.hash_algorithm, DigestAlgorithm::Sha1);
    }

    #[test]
    fn test_tsa_rules() {
        let no_policy = props("tsaURL=http://tsa.example.com/tsa");
        assert!(PadesParams::from_extra_params(&no_policy).unwrap().tsa.is_none());
        let bad_url = props("tsaURL=not a url\ntsaPolicy=1.2.3");
        assert!(PadesParams::from_extra_params(&bad_url).unwrap().tsa.is_none());
        let ok = props("tsaURL=http://tsa.example.com/tsa\ntsaPolicy=1.2.3\ntsaRequireCert=false\ntsaExtensionOid=1.2.4\n");
        let tsa = PadesParams::from_extra_params(&ok).unwrap().tsa.unwrap();
        assert_eq!(tsa.hash_algorithm, DigestAlgorithm::Sha1);
        assert!(!tsa.require_cert);
        assert!(tsa.extension.is_none());
        assert!(tsa.required);
    }

    #[test]
    fn test_validation_params() {
        let v = ValidationParams::from_extra_params(&props("pagesToCheckPSA=all\ncheckCertificates=false"));
        assert_eq!(v.pages_to_check, PagesToCheck::All);
        assert!(!v.check_certificates);
        assert_eq!(v.allow_shadow_attack, None);
        let v = ValidationParams::from_extra_params(&props("pagesToCheckPSA=3\nallowShadowAttack=true"));
        assert_eq!(v.pages_to_check, PagesToCheck::First(3));
        assert_eq!(v.allow_shadow_attack, Some(true));
        let v = ValidationParams::from_extra_params(&props("pagesToCheckPSA=lots"));
        assert_eq!(v.pages_to_check, PagesToCheck::First(10));
    }

    proptest! {
        #[test]
        fn prop_simple_pairs_survive(key in "[a-zA-Z][a-zA-Z0-9]{0,12}", value in "[a-zA-Z0-9 .,/]{0,24}") {
            let p = parse_properties(&format!("{}={}\n", key, value));
            prop_assert_eq!(p.get(&key).map(String::as_str), Some(value.trim_start()));
        }
    }
}
