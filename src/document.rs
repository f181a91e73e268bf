//! In-memory PDF document.
//!
//! All indirect objects are loaded eagerly into an arena keyed by object
//! number. Each entry remembers the revision that last defined it, which is
//! what the signing and validation layers need to reason about incremental
//! updates. Strings and streams are decrypted on load.

use crate::encryption::SecurityHandler;
use crate::error::{Error, Result};
use crate::object::{decode_text_string, Dict, Object, ObjectRef};
use crate::objstm::parse_object_stream;
use crate::parser::parse_indirect_object;
use crate::xref::{self, XrefEntry, XrefSection};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Maximum reference chain followed by [`PdfDocument::resolve`].
const MAX_RESOLVE_DEPTH: usize = 32;
/// Maximum depth of the page and field trees.
const MAX_TREE_DEPTH: usize = 64;

static NULL: Object = Object::Null;

/// One incremental revision of the file.
#[derive(Debug, Clone, PartialEq)]
pub struct Revision {
    /// 0 is the original document
    pub ordinal: usize,
    /// Offset just past the `%%EOF` (and its end-of-line) closing the revision
    pub end_offset: usize,
    /// Offset of the revision's cross-reference section
    pub xref_offset: usize,
}

#[derive(Debug, Clone)]
struct ArenaEntry {
    gen: u16,
    revision: usize,
    object: Object,
}

/// A terminal AcroForm field.
#[derive(Debug, Clone, PartialEq)]
pub struct FormField {
    /// Fully qualified name (`parent.child`)
    pub name: String,
    pub field_ref: ObjectRef,
    /// `/FT`, possibly inherited
    pub field_type: Option<String>,
    /// Resolved `/V`
    pub value: Option<Object>,
    /// Unresolved `/V`, kept to find signature dictionaries by reference
    pub raw_value: Option<Object>,
    pub widget_rect: Option<[f64; 4]>,
    pub page: Option<ObjectRef>,
}

/// A signature field with a signature dictionary.
#[derive(Debug, Clone)]
pub struct SignatureEntry {
    pub field_name: String,
    pub field_ref: ObjectRef,
    pub dict_ref: Option<ObjectRef>,
    pub dict: Dict,
    pub byte_range: Vec<i64>,
    /// Raw `/Contents` bytes (DER, zero padded)
    pub contents: Vec<u8>,
    pub sub_filter: String,
    /// Revision whose end the byte range reaches
    pub revision: usize,
}

/// A parsed PDF file.
pub struct PdfDocument {
    data: Vec<u8>,
    version: (u8, u8),
    objects: HashMap<u32, ArenaEntry>,
    trailer: Dict,
    revisions: Vec<Revision>,
    security: Option<SecurityHandler>,
    encrypt_ref: Option<ObjectRef>,
    password: Option<Vec<u8>>,
    startxref: Option<usize>,
}

impl std::fmt::Debug for PdfDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfDocument")
            .field("version", &self.version)
            .field("len", &self.data.len())
            .field("objects", &self.objects.len())
            .field("revisions", &self.revisions.len())
            .field("encrypted", &self.security.is_some())
            .finish_non_exhaustive()
    }
}

fn parse_header(data: &[u8]) -> Result<(u8, u8)> {
    let window = &data[..data.len().min(1024)];
    let pos = window
        .windows(5)
        .position(|w| w == b"%PDF-")
        .ok_or_else(|| Error::InvalidHeader(String::from_utf8_lossy(&window[..window.len().min(8)]).into_owned()))?;
    let v = &data[pos + 5..(pos + 8).min(data.len())];
    match v {
        [major, b'.', minor] if major.is_ascii_digit() && minor.is_ascii_digit() => {
            Ok((major - b'0', minor - b'0'))
        },
        _ => {
            log::warn!("Unreadable PDF version, assuming 1.4");
            Ok((1, 4))
        },
    }
}

enum Location {
    Direct { offset: usize, gen: u16 },
    Packed { stream_id: u32, index: u32 },
}

impl PdfDocument {
    /// Open an unencrypted document, or one whose user password is empty.
    pub fn open(data: impl Into<Vec<u8>>) -> Result<Self> {
        Self::open_with_passwords(data, &[])
    }

    /// Open a document trying each password in order, then the empty user
    /// password. Fails with [`Error::PasswordRequired`] if none opens it.
    pub fn open_with_passwords(data: impl Into<Vec<u8>>, passwords: &[&[u8]]) -> Result<Self> {
        let data = data.into();
        let version = parse_header(&data)?;

        let (chain, startxref) = match xref::load_chain(&data) {
            Ok(chain) => {
                let startxref = chain.first().map(|s| s.offset);
                (chain, startxref)
            },
            Err(e) => {
                log::warn!("Cross-reference data unusable ({}), scanning file", e);
                (vec![xref::reconstruct(&data)?], None)
            },
        };

        let (revisions, locations, trailer) = Self::index(&data, &chain);
        let mut doc = Self {
            data,
            version,
            objects: HashMap::new(),
            trailer,
            revisions,
            security: None,
            encrypt_ref: None,
            password: None,
            startxref,
        };
        doc.load(locations, passwords)?;
        log::debug!(
            "Opened PDF {}.{} with {} objects in {} revisions",
            doc.version.0,
            doc.version.1,
            doc.objects.len(),
            doc.revisions.len()
        );
        Ok(doc)
    }

    /// Map the chain (newest first) onto revisions and object locations.
    fn index(data: &[u8], chain: &[XrefSection]) -> (Vec<Revision>, BTreeMap<u32, (Location, usize)>, Dict) {
        let mut revisions: Vec<Revision> = Vec::new();
        let mut locations = BTreeMap::new();
        let mut trailer = Dict::new();

        for section in chain.iter().rev() {
            // A linearized file's first-page section belongs to the revision before it
            if !section.is_linearized_first_page() || revisions.is_empty() {
                revisions.push(Revision {
                    ordinal: revisions.len(),
                    end_offset: xref::revision_end(data, section.offset),
                    xref_offset: section.offset,
                });
            }
            let ordinal = revisions.len().saturating_sub(1);
            for (&id, entry) in &section.entries {
                match *entry {
                    XrefEntry::Free => {
                        locations.remove(&id);
                    },
                    XrefEntry::InUse { offset, gen } => {
                        locations.insert(id, (Location::Direct { offset, gen }, ordinal));
                    },
                    XrefEntry::Compressed { stream_id, index } => {
                        locations.insert(id, (Location::Packed { stream_id, index }, ordinal));
                    },
                }
            }
            for (key, value) in &section.trailer {
                if matches!(key.as_str(), "Root" | "Info" | "Encrypt" | "ID" | "Size") {
                    trailer.insert(key.clone(), value.clone());
                }
            }
        }
        (revisions, locations, trailer)
    }

    fn load(&mut self, locations: BTreeMap<u32, (Location, usize)>, passwords: &[&[u8]]) -> Result<()> {
        let mut packed: Vec<(u32, u32, u32, usize)> = Vec::new();
        for (id, (location, revision)) in locations {
            match location {
                Location::Direct { offset, gen } => match parse_indirect_object(&self.data, offset) {
                    Ok((r, object)) if r.id == id => {
                        self.objects.insert(
                            id,
                            ArenaEntry {
                                gen: r.gen.max(gen),
                                revision,
                                object,
                            },
                        );
                    },
                    Ok((r, _)) => log::warn!("Xref entry for object {} points at object {}", id, r.id),
                    Err(e) => log::warn!("Skipping object {}: {}", id, e),
                },
                Location::Packed { stream_id, index } => packed.push((id, stream_id, index, revision)),
            }
        }

        self.setup_security(passwords)?;
        if let Some(handler) = self.security.clone() {
            let encrypt_id = self.encrypt_ref.map(|r| r.id);
            for (&id, entry) in self.objects.iter_mut() {
                if Some(id) == encrypt_id {
                    continue;
                }
                let object = std::mem::replace(&mut entry.object, Object::Null);
                let r = ObjectRef::new(id, entry.gen);
                entry.object = match handler.decrypt_object(r, object.clone()) {
                    Ok(plain) => plain,
                    Err(e) => {
                        log::warn!("Could not decrypt object {}: {}", r, e);
                        object
                    },
                };
            }
        }

        let mut streams: HashMap<u32, Vec<(u32, Object)>> = HashMap::new();
        for (id, stream_id, index, revision) in packed {
            if !streams.contains_key(&stream_id) {
                let parsed = match self.objects.get(&stream_id) {
                    Some(entry) => parse_object_stream(&entry.object).unwrap_or_else(|e| {
                        log::warn!("Unreadable object stream {}: {}", stream_id, e);
                        Vec::new()
                    }),
                    None => Vec::new(),
                };
                streams.insert(stream_id, parsed);
            }
            let members = &streams[&stream_id];
            let found = members
                .get(index as usize)
                .filter(|(member, _)| *member == id)
                .or_else(|| members.iter().find(|(member, _)| *member == id));
            match found {
                Some((_, object)) => {
                    self.objects.insert(
                        id,
                        ArenaEntry {
                            gen: 0,
                            revision,
                            object: object.clone(),
                        },
                    );
                },
                None => log::warn!("Object {} missing from object stream {}", id, stream_id),
            }
        }
        Ok(())
    }

    fn setup_security(&mut self, passwords: &[&[u8]]) -> Result<()> {
        let Some(encrypt) = self.trailer.get("Encrypt").cloned() else {
            return Ok(());
        };
        self.encrypt_ref = encrypt.as_reference();
        let dict = self
            .resolve(&encrypt)
            .as_dict()
            .cloned()
            .ok_or_else(|| Error::Encryption("/Encrypt is not a dictionary".into()))?;
        let file_id = self.file_id().unwrap_or_default();

        let empty: &[u8] = b"";
        for candidate in passwords.iter().copied().chain(std::iter::once(empty)) {
            if let Some(handler) = SecurityHandler::authenticate(&dict, &file_id, candidate)? {
                self.security = Some(handler);
                self.password = Some(candidate.to_vec());
                return Ok(());
            }
        }
        Err(Error::PasswordRequired)
    }

    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// The whole file.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Merged trailer: `/Root`, `/Info`, `/Encrypt`, `/ID` and `/Size` of the newest revision.
    pub fn trailer(&self) -> &Dict {
        &self.trailer
    }

    /// First element of `/ID`.
    pub fn file_id(&self) -> Option<Vec<u8>> {
        self.trailer
            .get("ID")
            .and_then(Object::as_array)
            .and_then(|ids| ids.first())
            .and_then(Object::as_string)
            .map(<[u8]>::to_vec)
    }

    pub fn security(&self) -> Option<&SecurityHandler> {
        self.security.as_ref()
    }

    /// Indirect `/Encrypt` dictionary, which is never encrypted itself.
    pub fn encrypt_ref(&self) -> Option<ObjectRef> {
        self.encrypt_ref
    }

    /// Object numbers in the arena, ascending.
    pub fn object_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.objects.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_encrypted(&self) -> bool {
        self.trailer.contains_key("Encrypt")
    }

    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    /// Offset of the newest cross-reference section, used as `/Prev`.
    /// `None` when the file had to be reconstructed.
    pub fn startxref(&self) -> Option<usize> {
        self.startxref
    }

    /// Bytes of the file up to the end of revision `ordinal`.
    pub fn revision_bytes(&self, ordinal: usize) -> Option<&[u8]> {
        self.revisions
            .get(ordinal)
            .map(|r| &self.data[..r.end_offset.min(self.data.len())])
    }

    /// Open the document as it was at the end of revision `ordinal`.
    pub fn open_revision(&self, ordinal: usize) -> Result<PdfDocument> {
        let bytes = self
            .revision_bytes(ordinal)
            .ok_or_else(|| Error::InvalidPdf(format!("no revision {}", ordinal)))?;
        let passwords: Vec<&[u8]> = self.password.iter().map(Vec::as_slice).collect();
        PdfDocument::open_with_passwords(bytes.to_vec(), &passwords)
    }

    /// Revision whose end is `offset`, or the first one that reaches past it.
    pub fn revision_ending_at(&self, offset: usize) -> usize {
        self.revisions
            .iter()
            .find(|r| r.end_offset == offset)
            .or_else(|| self.revisions.iter().find(|r| r.end_offset >= offset))
            .map(|r| r.ordinal)
            .unwrap_or_else(|| self.revisions.len().saturating_sub(1))
    }

    /// Revision that last defined object `id`.
    pub fn object_revision(&self, id: u32) -> Option<usize> {
        self.objects.get(&id).map(|e| e.revision)
    }

    /// Highest object number in use, or declared by `/Size`.
    pub fn max_object_id(&self) -> u32 {
        let declared = self
            .trailer
            .get("Size")
            .and_then(Object::as_integer)
            .map(|s| (s.max(1) - 1) as u32)
            .unwrap_or(0);
        self.objects.keys().copied().max().unwrap_or(0).max(declared)
    }

    pub fn get(&self, r: ObjectRef) -> Option<&Object> {
        self.objects.get(&r.id).map(|e| &e.object)
    }

    /// Reference to object `id` with its current generation.
    pub fn reference(&self, id: u32) -> Option<ObjectRef> {
        self.objects.get(&id).map(|e| ObjectRef::new(id, e.gen))
    }

    /// Follow references until a direct object. Dangling references resolve to null.
    pub fn resolve<'a>(&'a self, object: &'a Object) -> &'a Object {
        let mut current = object;
        for _ in 0..MAX_RESOLVE_DEPTH {
            match current {
                Object::Reference(r) => match self.get(*r) {
                    Some(next) => current = next,
                    None => return &NULL,
                },
                _ => return current,
            }
        }
        log::warn!("Reference chain deeper than {} levels", MAX_RESOLVE_DEPTH);
        &NULL
    }

    /// Look up `key` in a dictionary and resolve the value.
    pub fn resolve_key<'a>(&'a self, dict: &'a Dict, key: &str) -> Option<&'a Object> {
        dict.get(key).map(|v| self.resolve(v)).filter(|v| **v != Object::Null)
    }

    pub fn catalog_ref(&self) -> Result<ObjectRef> {
        self.trailer
            .get("Root")
            .and_then(Object::as_reference)
            .ok_or_else(|| Error::InvalidPdf("trailer has no /Root reference".into()))
    }

    pub fn catalog(&self) -> Result<&Dict> {
        let r = self.catalog_ref()?;
        self.get(r)
            .and_then(Object::as_dict)
            .ok_or_else(|| Error::InvalidPdf(format!("catalog {} is missing", r)))
    }

    /// Page objects in document order.
    pub fn pages(&self) -> Vec<ObjectRef> {
        let mut pages = Vec::new();
        let Some(root) = self.catalog().ok().and_then(|c| c.get("Pages")).and_then(Object::as_reference) else {
            return pages;
        };
        let mut seen = HashSet::new();
        self.collect_pages(root, 0, &mut seen, &mut pages);
        pages
    }

    fn collect_pages(&self, node: ObjectRef, depth: usize, seen: &mut HashSet<ObjectRef>, out: &mut Vec<ObjectRef>) {
        if depth > MAX_TREE_DEPTH || !seen.insert(node) {
            log::warn!("Page tree cycle or excessive depth at {}", node);
            return;
        }
        let Some(dict) = self.get(node).and_then(Object::as_dict) else {
            return;
        };
        match dict.get("Kids").map(|k| self.resolve(k)) {
            Some(Object::Array(kids)) if dict.get("Type").and_then(Object::as_name) != Some("Page") => {
                for kid in kids.iter().filter_map(Object::as_reference) {
                    self.collect_pages(kid, depth + 1, seen, out);
                }
            },
            _ => out.push(node),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages().len()
    }

    /// Page attribute, inherited through `/Parent` when absent.
    pub fn page_attribute(&self, page: ObjectRef, key: &str) -> Option<&Object> {
        let mut current = self.get(page)?.as_dict()?;
        for _ in 0..MAX_TREE_DEPTH {
            if let Some(v) = self.resolve_key(current, key) {
                return Some(v);
            }
            current = self.resolve(current.get("Parent")?).as_dict()?;
        }
        None
    }

    /// Decoded and concatenated content streams of a page.
    pub fn page_content(&self, page: ObjectRef) -> Result<Vec<u8>> {
        let Some(dict) = self.get(page).and_then(Object::as_dict) else {
            return Err(Error::ObjectNotFound(page.id, page.gen));
        };
        let mut out = Vec::new();
        let streams: Vec<&Object> = match dict.get("Contents").map(|c| self.resolve(c)) {
            Some(Object::Array(items)) => items.iter().map(|i| self.resolve(i)).collect(),
            Some(stream @ Object::Stream { .. }) => vec![stream],
            _ => Vec::new(),
        };
        for stream in streams {
            out.extend(stream.decode_stream_data()?);
            out.push(b'\n');
        }
        Ok(out)
    }

    /// The AcroForm dictionary, if any.
    pub fn acroform(&self) -> Option<&Dict> {
        let catalog = self.catalog().ok()?;
        self.resolve_key(catalog, "AcroForm")?.as_dict()
    }

    /// Terminal form fields with fully qualified names.
    pub fn fields(&self) -> Vec<FormField> {
        let mut out = Vec::new();
        let Some(form) = self.acroform() else {
            return out;
        };
        let Some(Object::Array(roots)) = self.resolve_key(form, "Fields") else {
            return out;
        };
        let mut seen = HashSet::new();
        let page_of = self.widget_pages();
        for root in roots.iter().filter_map(Object::as_reference) {
            self.collect_fields(root, "", None, 0, &mut seen, &page_of, &mut out);
        }
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn collect_fields(
        &self,
        node: ObjectRef,
        parent_name: &str,
        parent_type: Option<&str>,
        depth: usize,
        seen: &mut HashSet<ObjectRef>,
        page_of: &HashMap<ObjectRef, ObjectRef>,
        out: &mut Vec<FormField>,
    ) {
        if depth > MAX_TREE_DEPTH || !seen.insert(node) {
            return;
        }
        let Some(dict) = self.get(node).and_then(Object::as_dict) else {
            return;
        };
        let partial = self.resolve_key(dict, "T").and_then(Object::as_text);
        let name = match (&partial, parent_name.is_empty()) {
            (Some(t), true) => t.clone(),
            (Some(t), false) => format!("{}.{}", parent_name, t),
            (None, _) => parent_name.to_string(),
        };
        let field_type = dict.get("FT").and_then(Object::as_name).or(parent_type);

        let kids: Vec<ObjectRef> = match self.resolve_key(dict, "Kids") {
            Some(Object::Array(kids)) => kids.iter().filter_map(Object::as_reference).collect(),
            _ => Vec::new(),
        };
        let field_kids: Vec<ObjectRef> = kids
            .iter()
            .copied()
            .filter(|k| self.get(*k).and_then(|o| o.get("T")).is_some())
            .collect();
        if !field_kids.is_empty() {
            for kid in field_kids {
                self.collect_fields(kid, &name, field_type, depth + 1, seen, page_of, out);
            }
            return;
        }

        let widget = if dict.get("Subtype").and_then(Object::as_name) == Some("Widget") || kids.is_empty() {
            node
        } else {
            kids[0]
        };
        let widget_dict = self.get(widget).and_then(Object::as_dict);
        let widget_rect = widget_dict
            .and_then(|w| self.resolve_key(w, "Rect"))
            .and_then(Object::as_array)
            .and_then(|r| {
                let v: Vec<f64> = r.iter().filter_map(|n| self.resolve(n).as_number()).collect();
                (v.len() == 4).then(|| [v[0], v[1], v[2], v[3]])
            });
        let page = widget_dict
            .and_then(|w| w.get("P"))
            .and_then(Object::as_reference)
            .or_else(|| page_of.get(&widget).copied());

        out.push(FormField {
            name,
            field_ref: node,
            field_type: field_type.map(str::to_string),
            value: self.resolve_key(dict, "V").cloned(),
            raw_value: dict.get("V").cloned(),
            widget_rect,
            page,
        });
    }

    /// Annotation reference to page reference, from every page's `/Annots`.
    fn widget_pages(&self) -> HashMap<ObjectRef, ObjectRef> {
        let mut map = HashMap::new();
        for page in self.pages() {
            for annot in self.page_annotations(page) {
                map.insert(annot, page);
            }
        }
        map
    }

    /// Indirect annotations listed by a page.
    pub fn page_annotations(&self, page: ObjectRef) -> Vec<ObjectRef> {
        let annots = self
            .get(page)
            .and_then(Object::as_dict)
            .and_then(|d| self.resolve_key(d, "Annots"));
        match annots {
            Some(Object::Array(items)) => items.iter().filter_map(Object::as_reference).collect(),
            _ => Vec::new(),
        }
    }

    /// Signature fields that carry a signature dictionary.
    pub fn signatures(&self) -> Vec<SignatureEntry> {
        self.fields()
            .into_iter()
            .filter(|f| f.field_type.as_deref() == Some("Sig"))
            .filter_map(|f| {
                let dict = f.value.as_ref()?.as_dict()?.clone();
                let byte_range: Vec<i64> = self
                    .resolve_key(&dict, "ByteRange")
                    .and_then(Object::as_array)
                    .map(|a| a.iter().filter_map(|n| self.resolve(n).as_integer()).collect())
                    .unwrap_or_default();
                let contents = self
                    .resolve_key(&dict, "Contents")
                    .and_then(Object::as_string)
                    .map(<[u8]>::to_vec)
                    .unwrap_or_default();
                let sub_filter = self
                    .resolve_key(&dict, "SubFilter")
                    .and_then(Object::as_name)
                    .unwrap_or("")
                    .to_string();
                let end = match byte_range.as_slice() {
                    [_, _, start, len] => start.checked_add(*len).map_or(self.data.len(), |end| end.max(0) as usize),
                    _ => self.data.len(),
                };
                Some(SignatureEntry {
                    field_name: f.name,
                    field_ref: f.field_ref,
                    dict_ref: f.raw_value.as_ref().and_then(Object::as_reference),
                    dict,
                    byte_range,
                    contents,
                    sub_filter,
                    revision: self.revision_ending_at(end),
                })
            })
            .collect()
    }
}

/// Decode a text entry of a dictionary, resolving nothing.
pub fn dict_text(dict: &Dict, key: &str) -> Option<String> {
    dict.get(key).and_then(Object::as_string).map(decode_text_string)
}
