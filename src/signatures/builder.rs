//! PAdES signature construction.
//!
//! Signing happens in four steps that can be split across machines:
//!
//! 1. [`reserve_signature`] appends a revision holding the signature field,
//!    its appearance and a signature dictionary with a zero-filled
//!    `/Contents` placeholder.
//! 2. [`compute_digest`] hashes every byte except the placeholder.
//! 3. The digest is wrapped in a CMS envelope ([`package_signature`], or the
//!    split [`super::cms::signed_attributes`]/[`super::cms::assemble`] pair)
//!    and optionally timestamped ([`attach_timestamp`]).
//! 4. [`embed`] writes the envelope into the placeholder.

use super::appearance::{self, Appearance, TextContext, FONT_RESOURCE, IMAGE_RESOURCE};
use super::byterange::{ByteRangeCalculator, BYTE_RANGE_PLACEHOLDER};
use super::certificate::CertificateSummary;
use super::cms::{self, CmsOptions, SignedDataEnvelope};
use super::params::{Attachment, PadesParams, Placement, LAST_PAGE};
use super::timestamp::{self, HttpTsaClient};
use super::traits::{RequestsTimestamp, Signs};
use super::types::{DigestAlgorithm, SigningCredentials};
use crate::decoders::encode_flate;
use crate::document::{FormField, PdfDocument};
use crate::error::{Confirmation, Error, Result};
use crate::object::{encode_text_string, Dict, Object, ObjectRef};
use crate::writer::incremental::IncrementalUpdate;
use crate::writer::object_serializer::{dict, name, rect, ObjectSerializer};
use chrono::{DateTime, Local};
use std::sync::Arc;

/// Widget flags: Print | Locked.
const WIDGET_FLAGS: i64 = 132;
/// AcroForm `/SigFlags`: SignaturesExist | AppendOnly.
const SIG_FLAGS: i64 = 3;

/// A prepared document waiting for its signature.
#[derive(Debug, Clone)]
pub struct SigningMaterial {
    /// Document bytes including the new revision and the zeroed placeholder
    pub document: Vec<u8>,
    pub byte_range: [i64; 4],
    /// Offset of the `<` opening the `/Contents` value
    pub contents_offset: usize,
    pub capacity: usize,
    pub field_name: String,
    pub sign_time: DateTime<Local>,
}

impl SigningMaterial {
    /// The bytes covered by the signature.
    pub fn signed_bytes(&self) -> Result<Vec<u8>> {
        ByteRangeCalculator::extract_signed_bytes(&self.document, &self.byte_range)
    }
}

/// Format a timestamp as a PDF date (`D:YYYYMMDDHHmmSS+HH'mm'`).
pub fn format_pdf_date(time: &DateTime<Local>) -> String {
    let offset = time.offset().local_minus_utc();
    let sign = if offset < 0 { '-' } else { '+' };
    let offset = offset.abs();
    format!(
        "D:{}{}{:02}'{:02}'",
        time.format("%Y%m%d%H%M%S"),
        sign,
        offset / 3600,
        (offset % 3600) / 60
    )
}

fn open_for_signing(document: &[u8], params: &PadesParams) -> Result<PdfDocument> {
    let passwords = params.passwords();
    match PdfDocument::open_with_passwords(document.to_vec(), &passwords) {
        Err(Error::PasswordRequired) if !passwords.is_empty() => {
            log::warn!("None of the supplied passwords opens the document");
            Err(if params.headless {
                Error::BadPassword
            } else {
                Error::PasswordRequired
            })
        },
        other => other,
    }
}

fn is_certified(doc: &PdfDocument) -> bool {
    doc.catalog()
        .ok()
        .and_then(|catalog| doc.resolve_key(catalog, "Perms"))
        .and_then(Object::as_dict)
        .is_some_and(|perms| perms.contains_key("DocMDP"))
}

fn check_certification(doc: &PdfDocument, params: &PadesParams) -> Result<()> {
    if !is_certified(doc) {
        return Ok(());
    }
    match params.allow_signing_certified {
        Some(true) => {
            log::warn!("Signing a certified document; the certification will no longer be valid");
            Ok(())
        },
        Some(false) => Err(Error::CertifiedDocumentRejected),
        None if params.headless => Err(Error::CertifiedDocumentRejected),
        None => Err(Error::NeedsConfirmation(Confirmation::SignCertifiedDocument)),
    }
}

fn stream(entries: Vec<(&str, Object)>, data: Vec<u8>) -> Object {
    Object::Stream {
        dict: entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        data: data.into(),
    }
}

/// A dictionary reached through `key` of `container`, and the indirect
/// object holding it, if any.
fn nested_dict(update: &IncrementalUpdate<'_>, container: &Dict, key: &str) -> (Dict, Option<ObjectRef>) {
    match container.get(key) {
        Some(Object::Reference(r)) => (
            update.get(*r).and_then(Object::as_dict).cloned().unwrap_or_default(),
            Some(*r),
        ),
        Some(Object::Dictionary(d)) => (d.clone(), None),
        _ => (Dict::new(), None),
    }
}

/// Store a dictionary obtained from [`nested_dict`] back where it came from.
fn store_dict(update: &mut IncrementalUpdate<'_>, container: &mut Dict, key: &str, value: Dict, at: Option<ObjectRef>) {
    match at {
        Some(r) => update.put(r, Object::Dictionary(value)),
        None => {
            container.insert(key.to_string(), Object::Dictionary(value));
        },
    }
}

/// Append `item` to the array under `key`, following an indirect array.
fn push_to_array(update: &mut IncrementalUpdate<'_>, container: &mut Dict, key: &str, item: Object) {
    match container.get(key) {
        Some(Object::Reference(r)) => {
            let r = *r;
            let mut items = update.get(r).and_then(Object::as_array).cloned().unwrap_or_default();
            items.push(item);
            update.put(r, Object::Array(items));
        },
        Some(Object::Array(items)) => {
            let mut items = items.clone();
            items.push(item);
            container.insert(key.to_string(), Object::Array(items));
        },
        _ => {
            container.insert(key.to_string(), Object::Array(vec![item]));
        },
    }
}

fn strip_usage_rights(update: &mut IncrementalUpdate<'_>, catalog: &mut Dict) {
    let (mut perms, at) = nested_dict(update, catalog, "Perms");
    let removed = perms.remove("UR").is_some() | perms.remove("UR3").is_some();
    if !removed {
        return;
    }
    log::info!("Removing usage rights from the document");
    if perms.is_empty() {
        catalog.remove("Perms");
    } else {
        store_dict(update, catalog, "Perms", perms, at);
    }
}

fn add_esic_extension(update: &mut IncrementalUpdate<'_>, catalog: &mut Dict) {
    let (mut extensions, at) = nested_dict(update, catalog, "Extensions");
    extensions.insert(
        "ESIC".into(),
        dict(vec![("BaseVersion", name("1.7")), ("ExtensionLevel", Object::Integer(1))]),
    );
    store_dict(update, catalog, "Extensions", extensions, at);
    if update.document().version() < (1, 7) {
        catalog.insert("Version".into(), name("1.7"));
    }
}

fn attach_file(update: &mut IncrementalUpdate<'_>, catalog: &mut Dict, attachment: &Attachment, now: &str) -> Result<()> {
    let file_ref = update.allocate();
    update.put(
        file_ref,
        stream(
            vec![
                ("Type", name("EmbeddedFile")),
                ("Filter", name("FlateDecode")),
                (
                    "Params",
                    dict(vec![
                        ("Size", Object::Integer(attachment.data.len() as i64)),
                        ("ModDate", Object::String(now.as_bytes().to_vec())),
                    ]),
                ),
            ],
            encode_flate(&attachment.data)?,
        ),
    );

    let file_name = encode_text_string(&attachment.file_name);
    let mut spec = vec![
        ("Type", name("Filespec")),
        ("F", Object::String(file_name.clone())),
        ("UF", Object::String(file_name.clone())),
        (
            "EF",
            dict(vec![("F", Object::Reference(file_ref)), ("UF", Object::Reference(file_ref))]),
        ),
    ];
    if let Some(description) = &attachment.description {
        spec.push(("Desc", Object::String(encode_text_string(description))));
    }
    let spec_ref = update.allocate();
    update.put(spec_ref, dict(spec));

    let (mut names, names_at) = nested_dict(update, catalog, "Names");
    let (mut tree, tree_at) = nested_dict(update, &names, "EmbeddedFiles");
    let entry = (Object::String(file_name.clone()), Object::Reference(spec_ref));
    if tree.contains_key("Kids") {
        let leaf = dict(vec![
            (
                "Limits",
                Object::Array(vec![Object::String(file_name.clone()), Object::String(file_name)]),
            ),
            ("Names", Object::Array(vec![entry.0, entry.1])),
        ]);
        let leaf_ref = update.allocate();
        update.put(leaf_ref, leaf);
        push_to_array(update, &mut tree, "Kids", Object::Reference(leaf_ref));
    } else {
        let mut pairs: Vec<(Object, Object)> = match tree.get("Names").map(|n| update.document().resolve(n)) {
            Some(Object::Array(items)) => items.chunks(2).filter(|c| c.len() == 2).map(|c| (c[0].clone(), c[1].clone())).collect(),
            _ => Vec::new(),
        };
        let key = |o: &Object| o.as_string().map(<[u8]>::to_vec).unwrap_or_default();
        let at = pairs.partition_point(|(k, _)| key(k) <= file_name);
        pairs.insert(at, entry);
        tree.insert(
            "Names".into(),
            Object::Array(pairs.into_iter().flat_map(|(k, v)| [k, v]).collect()),
        );
    }
    store_dict(update, &mut names, "EmbeddedFiles", tree, tree_at);
    store_dict(update, catalog, "Names", names, names_at);
    log::debug!("Attached {} ({} bytes)", attachment.file_name, attachment.data.len());
    Ok(())
}

/// Where the signature widget ends up.
enum Target {
    New { page: ObjectRef, rect: [f64; 4] },
    Existing { field: FormField },
}

fn normalize(r: [f64; 4]) -> [f64; 4] {
    [r[0].min(r[2]), r[1].min(r[3]), r[0].max(r[2]), r[1].max(r[3])]
}

fn resolve_target(doc: &PdfDocument, params: &PadesParams) -> Result<Target> {
    let pages = doc.pages();
    let first = *pages
        .first()
        .ok_or_else(|| Error::InvalidPdf("document has no pages".to_string()))?;
    match &params.placement {
        Placement::Invisible => Ok(Target::New {
            page: first,
            rect: [0.0; 4],
        }),
        Placement::Rect { page, rect } => {
            let index = if *page == LAST_PAGE { pages.len() as i32 } else { *page };
            if index < 1 || index as usize > pages.len() {
                return Err(Error::parameter(
                    "signaturePage",
                    format!("page {} outside 1..={}", page, pages.len()),
                ));
            }
            Ok(Target::New {
                page: pages[index as usize - 1],
                rect: normalize(*rect),
            })
        },
        Placement::Field(field_name) => {
            let field = doc
                .fields()
                .into_iter()
                .find(|f| &f.name == field_name)
                .ok_or_else(|| Error::parameter("signatureField", format!("no field named '{}'", field_name)))?;
            if field.field_type.as_deref() != Some("Sig") {
                return Err(Error::parameter(
                    "signatureField",
                    format!("'{}' is not a signature field", field_name),
                ));
            }
            if field.value.is_some() {
                return Err(Error::parameter("signatureField", format!("'{}' is already signed", field_name)));
            }
            Ok(Target::Existing { field })
        },
    }
}

fn unused_field_name(doc: &PdfDocument) -> String {
    let names: Vec<String> = doc.fields().into_iter().map(|f| f.name).collect();
    (1..)
        .map(|n| format!("Signature{}", n))
        .find(|candidate| !names.contains(candidate))
        .unwrap_or_else(|| "Signature".to_string())
}

/// Add the appearance XObject (and its font and image) to the update.
fn put_appearance(update: &mut IncrementalUpdate<'_>, appearance: Appearance, width: f64, height: f64) -> ObjectRef {
    let mut resources = Dict::new();
    if let Some(base_font) = appearance.font {
        let mut font = vec![
            ("Type", name("Font")),
            ("Subtype", name("Type1")),
            ("BaseFont", name(base_font)),
        ];
        if base_font != "Symbol" && base_font != "ZapfDingbats" {
            font.push(("Encoding", name("WinAnsiEncoding")));
        }
        let font_ref = update.allocate();
        update.put(font_ref, dict(font));
        resources.insert("Font".into(), dict(vec![(FONT_RESOURCE, Object::Reference(font_ref))]));
    }
    if let Some(image) = appearance.image {
        let image_ref = update.allocate();
        let image_object = stream(
            vec![
                ("Type", name("XObject")),
                ("Subtype", name("Image")),
                ("Width", Object::Integer(image.width as i64)),
                ("Height", Object::Integer(image.height as i64)),
                ("ColorSpace", name(image.color_space)),
                ("BitsPerComponent", Object::Integer(8)),
                ("Filter", name("DCTDecode")),
            ],
            image.data,
        );
        update.put(image_ref, image_object);
        resources.insert("XObject".into(), dict(vec![(IMAGE_RESOURCE, Object::Reference(image_ref))]));
    }
    let form = stream(
        vec![
            ("Type", name("XObject")),
            ("Subtype", name("Form")),
            ("BBox", rect([0.0, 0.0, width, height])),
            ("Resources", Object::Dictionary(resources)),
        ],
        appearance.content,
    );
    let form_ref = update.allocate();
    update.put(form_ref, form);
    form_ref
}

fn signature_dictionary(params: &PadesParams, signer: Option<&CertificateSummary>, now: &str) -> Object {
    let text = |s: &str| Object::String(encode_text_string(s));
    let mut sig = vec![
        ("Type", name("Sig")),
        ("Filter", name("Adobe.PPKLite")),
        ("SubFilter", name(params.sub_filter.as_pdf_name())),
    ];
    if params.apply_system_date {
        sig.push(("M", Object::String(now.as_bytes().to_vec())));
    }
    if let Some(cn) = signer.and_then(|s| s.subject_cn.as_deref()) {
        sig.push(("Name", text(cn)));
    }
    if let Some(reason) = &params.reason {
        sig.push(("Reason", text(reason)));
    }
    if let Some(location) = &params.location {
        sig.push(("Location", text(location)));
    }
    if let Some(contact) = &params.contact {
        sig.push(("ContactInfo", text(contact)));
    }
    dict(sig)
}

/// Append a signature revision with an empty placeholder.
///
/// `signer_certificate` is the DER certificate whose CN names the signer.
pub fn reserve_signature(document: &[u8], params: &PadesParams, signer_certificate: &[u8]) -> Result<SigningMaterial> {
    let doc = open_for_signing(document, params)?;
    check_certification(&doc, params)?;
    if params.avoid_encrypting_signed_pdfs && doc.is_encrypted() {
        log::info!("The signed document keeps the original encryption; incremental updates cannot remove it");
    }
    let signer = match CertificateSummary::from_der(signer_certificate) {
        Ok(summary) => Some(summary),
        Err(e) => {
            log::warn!("Cannot read the signer certificate: {}", e);
            None
        },
    };
    let sign_time = Local::now();
    let now = format_pdf_date(&sign_time);

    let mut update = IncrementalUpdate::new(&doc);
    let catalog_ref = doc.catalog_ref()?;
    let mut catalog = doc.catalog()?.clone();
    strip_usage_rights(&mut update, &mut catalog);
    add_esic_extension(&mut update, &mut catalog);
    if let Some(attachment) = &params.attachment {
        attach_file(&mut update, &mut catalog, attachment, &now)?;
    }

    let target = resolve_target(&doc, params)?;
    let sig_ref = update.allocate();
    let (field_ref, field_name, widget_rect) = match &target {
        Target::New { rect, .. } => (update.allocate(), unused_field_name(&doc), *rect),
        Target::Existing { field } => (field.field_ref, field.name.clone(), field.widget_rect.unwrap_or([0.0; 4])),
    };
    let width = widget_rect[2] - widget_rect[0];
    let height = widget_rect[3] - widget_rect[1];
    let ctx = TextContext::new(signer.as_ref(), sign_time);
    let ap_ref = put_appearance(&mut update, appearance::render(params, width, height, &ctx), width, height);

    match target {
        Target::New { page, rect: r } => {
            let widget = dict(vec![
                ("FT", name("Sig")),
                ("Type", name("Annot")),
                ("Subtype", name("Widget")),
                ("T", Object::String(encode_text_string(&field_name))),
                ("F", Object::Integer(WIDGET_FLAGS)),
                ("P", Object::Reference(page)),
                ("Rect", rect(r)),
                ("V", Object::Reference(sig_ref)),
                ("AP", dict(vec![("N", Object::Reference(ap_ref))])),
            ]);
            update.put(field_ref, widget);

            let mut page_dict = update
                .get(page)
                .and_then(Object::as_dict)
                .cloned()
                .ok_or_else(|| Error::InvalidPdf(format!("page {} is not a dictionary", page)))?;
            push_to_array(&mut update, &mut page_dict, "Annots", Object::Reference(field_ref));
            update.put(page, Object::Dictionary(page_dict));

            let (mut form, form_at) = nested_dict(&update, &catalog, "AcroForm");
            push_to_array(&mut update, &mut form, "Fields", Object::Reference(field_ref));
            form.insert("SigFlags".into(), Object::Integer(SIG_FLAGS));
            store_dict(&mut update, &mut catalog, "AcroForm", form, form_at);
        },
        Target::Existing { field } => {
            let mut field_dict = update
                .get(field.field_ref)
                .and_then(Object::as_dict)
                .cloned()
                .ok_or_else(|| Error::InvalidPdf(format!("field {} is not a dictionary", field.field_ref)))?;
            field_dict.insert("V".into(), Object::Reference(sig_ref));
            let kid = match field_dict.get("Kids").map(|k| doc.resolve(k)) {
                Some(Object::Array(kids)) => kids.first().and_then(Object::as_reference),
                _ => None,
            };
            match kid {
                Some(widget_ref) => {
                    let mut widget = update.get(widget_ref).and_then(Object::as_dict).cloned().unwrap_or_default();
                    widget.insert("AP".into(), dict(vec![("N", Object::Reference(ap_ref))]));
                    update.put(widget_ref, Object::Dictionary(widget));
                },
                None => {
                    field_dict.insert("AP".into(), dict(vec![("N", Object::Reference(ap_ref))]));
                },
            }
            update.put(field.field_ref, Object::Dictionary(field_dict));

            let (mut form, form_at) = nested_dict(&update, &catalog, "AcroForm");
            form.insert("SigFlags".into(), Object::Integer(SIG_FLAGS));
            store_dict(&mut update, &mut catalog, "AcroForm", form, form_at);
        },
    }
    update.put(catalog_ref, Object::Dictionary(catalog));

    // Signature dictionary, serialized by hand so the placeholders have a
    // known position inside the object
    let mut sig_object = signature_dictionary(params, signer.as_ref(), &now);
    if let Some(handler) = doc.security() {
        sig_object = handler.encrypt_object(sig_ref, sig_object)?;
    }
    let mut body = ObjectSerializer::new().serialize(&sig_object);
    if body.ends_with(b">>") {
        body.truncate(body.len() - 2);
    }
    let calc = ByteRangeCalculator::new(params.signature_capacity);
    let byte_range_at = body.len() + b"/ByteRange ".len();
    body.extend_from_slice(format!("/ByteRange {} /Contents ", BYTE_RANGE_PLACEHOLDER).as_bytes());
    let contents_at = body.len();
    body.extend_from_slice(calc.generate_placeholder().as_bytes());
    body.extend_from_slice(b" >>");
    update.put_raw(sig_ref, body);

    let written = update.write()?;
    let header = format!("{} {} obj\n", sig_ref.id, sig_ref.gen).len();
    let sig_offset = written
        .offsets
        .get(&sig_ref.id)
        .copied()
        .ok_or_else(|| Error::InvalidPdf("signature dictionary was not written".to_string()))?;
    let mut bytes = written.bytes;
    let contents_offset = sig_offset + header + contents_at;
    let byte_range = calc.calculate_byte_range(bytes.len(), contents_offset);
    ByteRangeCalculator::patch_byte_range(&mut bytes, sig_offset + header + byte_range_at, &byte_range)?;

    log::info!(
        "Reserved {} bytes for signature field '{}' in revision {}",
        calc.capacity(),
        field_name,
        doc.revisions().len()
    );
    Ok(SigningMaterial {
        document: bytes,
        byte_range,
        contents_offset,
        capacity: calc.capacity(),
        field_name,
        sign_time,
    })
}

/// Hash of the signed byte range.
pub fn compute_digest(material: &SigningMaterial, algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
    Ok(algorithm.digest(&material.signed_bytes()?))
}

/// Standalone CMS packaging with a local key.
pub fn package_signature(
    digest: &[u8],
    credentials: &SigningCredentials,
    algorithm: DigestAlgorithm,
    params: &PadesParams,
) -> Result<SignedDataEnvelope> {
    cms::package(digest, credentials, &CmsOptions::from_params(algorithm, params))
}

/// Timestamp the envelope when a TSA is configured.
///
/// `tsa` overrides the HTTP client built from the configuration.
pub fn attach_timestamp(
    envelope: &SignedDataEnvelope,
    params: &PadesParams,
    tsa: Option<&dyn RequestsTimestamp>,
) -> Result<SignedDataEnvelope> {
    let Some(config) = &params.tsa else {
        return Ok(envelope.clone());
    };
    match tsa {
        Some(client) => timestamp::attach_timestamp(envelope, config, client),
        None => timestamp::attach_timestamp(envelope, config, &HttpTsaClient::from_config(config)),
    }
}

/// Write the envelope into the placeholder.
pub fn embed(material: &SigningMaterial, envelope: &SignedDataEnvelope) -> Result<Vec<u8>> {
    let mut bytes = material.document.clone();
    ByteRangeCalculator::new(material.capacity).insert_signature(&mut bytes, material.contents_offset, envelope.as_bytes())?;
    Ok(bytes)
}

/// Signs documents with a local key.
pub struct PadesSigner {
    credentials: SigningCredentials,
    digest_algorithm: DigestAlgorithm,
    tsa: Option<Arc<dyn RequestsTimestamp>>,
}

impl PadesSigner {
    pub fn new(credentials: SigningCredentials, digest_algorithm: DigestAlgorithm) -> Self {
        Self {
            credentials,
            digest_algorithm,
            tsa: None,
        }
    }

    /// Use `tsa` instead of contacting the configured URL.
    pub fn with_tsa(mut self, tsa: Arc<dyn RequestsTimestamp>) -> Self {
        self.tsa = Some(tsa);
        self
    }
}

impl Signs for PadesSigner {
    fn sign(&self, document: &[u8], params: &PadesParams) -> Result<Vec<u8>> {
        let material = reserve_signature(document, params, self.credentials.certificate()?)?;
        let digest = compute_digest(&material, self.digest_algorithm)?;
        let envelope = package_signature(&digest, &self.credentials, self.digest_algorithm, params)?;
        let envelope = attach_timestamp(&envelope, params, self.tsa.as_deref())?;
        embed(&material, &envelope)
    }
}
