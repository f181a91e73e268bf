//! Incremental updates.
//!
//! New and changed objects are appended after the original bytes together
//! with a cross-reference section whose `/Prev` points at the previous one,
//! so every byte of the earlier revisions (and their signatures) survives.

use super::object_serializer::ObjectSerializer;
use crate::document::PdfDocument;
use crate::error::Result;
use crate::object::{Object, ObjectRef};
use md5::{Digest, Md5};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
enum Body {
    Object(Object),
    /// Already serialized (and, if needed, encrypted) object body
    Raw(Vec<u8>),
}

/// Objects to append to a document.
#[derive(Debug)]
pub struct IncrementalUpdate<'a> {
    doc: &'a PdfDocument,
    next_id: u32,
    objects: BTreeMap<u32, (u16, Body)>,
}

/// Result of [`IncrementalUpdate::write`].
#[derive(Debug, Clone)]
pub struct WrittenUpdate {
    pub bytes: Vec<u8>,
    /// Offset of each written `N G obj` line
    pub offsets: HashMap<u32, usize>,
}

impl<'a> IncrementalUpdate<'a> {
    pub fn new(doc: &'a PdfDocument) -> Self {
        Self {
            doc,
            next_id: doc.max_object_id() + 1,
            objects: BTreeMap::new(),
        }
    }

    pub fn document(&self) -> &'a PdfDocument {
        self.doc
    }

    /// Reserve a fresh object number.
    pub fn allocate(&mut self) -> ObjectRef {
        let r = ObjectRef::new(self.next_id, 0);
        self.next_id += 1;
        r
    }

    /// Add or replace an object. Strings and streams are encrypted on write.
    pub fn put(&mut self, r: ObjectRef, object: Object) {
        self.objects.insert(r.id, (r.gen, Body::Object(object)));
    }

    /// Add an object from its serialized body, written verbatim.
    pub fn put_raw(&mut self, r: ObjectRef, body: Vec<u8>) {
        self.objects.insert(r.id, (r.gen, Body::Raw(body)));
    }

    /// Current version of an object: pending if changed, else from the document.
    pub fn get(&self, r: ObjectRef) -> Option<&Object> {
        match self.objects.get(&r.id) {
            Some((_, Body::Object(o))) => Some(o),
            Some((_, Body::Raw(_))) => None,
            None => self.doc.get(r),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn encode(&self, serializer: &ObjectSerializer, r: ObjectRef, body: &Body) -> Result<Vec<u8>> {
        let mut out = format!("{} {} obj\n", r.id, r.gen).into_bytes();
        match body {
            Body::Raw(raw) => out.extend_from_slice(raw),
            Body::Object(object) => {
                let object = match self.doc.security() {
                    Some(handler) if Some(r) != self.doc.encrypt_ref() => handler.encrypt_object(r, object.clone())?,
                    _ => object.clone(),
                };
                out.extend(serializer.serialize(&object));
            },
        }
        out.extend_from_slice(b"\nendobj\n");
        Ok(out)
    }

    fn trailer(&self, size: u32, prev: Option<usize>) -> Vec<u8> {
        let trailer = self.doc.trailer();
        let serializer = ObjectSerializer::new();
        let mut out = format!("trailer\n<< /Size {}", size).into_bytes();
        for key in ["Root", "Info", "Encrypt"] {
            if let Some(value) = trailer.get(key) {
                out.extend_from_slice(format!(" /{} ", key).as_bytes());
                out.extend(serializer.serialize(value));
            }
        }
        // The first identifier is permanent, the second changes with every update
        let original = self.doc.file_id().unwrap_or_else(|| self.fresh_id());
        let ids = Object::Array(vec![Object::String(original), Object::String(self.fresh_id())]);
        out.extend_from_slice(b" /ID ");
        out.extend(serializer.serialize(&ids));
        if let Some(prev) = prev {
            out.extend_from_slice(format!(" /Prev {}", prev).as_bytes());
        }
        out.extend_from_slice(b" >>\n");
        out
    }

    fn fresh_id(&self) -> Vec<u8> {
        let mut md5 = Md5::new();
        md5.update(uuid::Uuid::new_v4().as_bytes());
        md5.update(self.doc.data().len().to_le_bytes());
        md5.finalize().to_vec()
    }

    /// Append the update to the original bytes.
    ///
    /// A document whose cross-reference data had to be reconstructed has no
    /// usable `/Prev`, so it is rewritten completely instead.
    pub fn write(&self) -> Result<WrittenUpdate> {
        let Some(prev) = self.doc.startxref() else {
            log::warn!("Rewriting damaged document instead of appending an update");
            return self.write_full();
        };
        let serializer = ObjectSerializer::new();
        let mut bytes = self.doc.data().to_vec();
        if !bytes.ends_with(b"\n") && !bytes.ends_with(b"\r") {
            bytes.push(b'\n');
        }

        let mut offsets = HashMap::new();
        let mut entries = Vec::with_capacity(self.objects.len());
        for (&id, (gen, body)) in &self.objects {
            let r = ObjectRef::new(id, *gen);
            offsets.insert(id, bytes.len());
            entries.push((r, bytes.len()));
            bytes.extend(self.encode(&serializer, r, body)?);
        }

        let xref = bytes.len();
        bytes.extend_from_slice(b"xref\n");
        for (r, offset) in &entries {
            bytes.extend_from_slice(format!("{} 1\n{:010} {:05} n \n", r.id, offset, r.gen).as_bytes());
        }
        bytes.extend(self.trailer(self.next_id, Some(prev)));
        bytes.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref).as_bytes());
        log::debug!("Appended {} objects after offset {}", entries.len(), self.doc.data().len());
        Ok(WrittenUpdate { bytes, offsets })
    }

    fn write_full(&self) -> Result<WrittenUpdate> {
        let serializer = ObjectSerializer::new();
        let (major, minor) = self.doc.version();
        let mut bytes = format!("%PDF-{}.{}\n", major, minor).into_bytes();
        bytes.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");

        let mut merged: BTreeMap<u32, (u16, Body)> = BTreeMap::new();
        for id in self.doc.object_ids() {
            if let (Some(r), Some(object)) = (self.doc.reference(id), self.doc.get(ObjectRef::new(id, 0))) {
                if object.get("Type").and_then(Object::as_name).is_some_and(|t| t == "XRef" || t == "ObjStm") {
                    continue;
                }
                merged.insert(id, (r.gen, Body::Object(object.clone())));
            }
        }
        for (&id, entry) in &self.objects {
            merged.insert(id, entry.clone());
        }

        let mut offsets = HashMap::new();
        for (&id, (gen, body)) in &merged {
            offsets.insert(id, bytes.len());
            bytes.extend(self.encode(&serializer, ObjectRef::new(id, *gen), body)?);
        }

        let xref = bytes.len();
        bytes.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", self.next_id).as_bytes());
        for id in 1..self.next_id {
            match (offsets.get(&id), merged.get(&id)) {
                (Some(offset), Some((gen, _))) => {
                    bytes.extend_from_slice(format!("{:010} {:05} n \n", offset, gen).as_bytes())
                },
                _ => bytes.extend_from_slice(b"0000000000 65535 f \n"),
            }
        }
        bytes.extend(self.trailer(self.next_id, None));
        bytes.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref).as_bytes());
        Ok(WrittenUpdate { bytes, offsets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::fixtures::simple_pdf;

    #[test]
    fn test_append_preserves_original_and_adds_revision() {
        let original = simple_pdf(1, true);
        let doc = PdfDocument::open(original.clone()).unwrap();
        let mut update = IncrementalUpdate::new(&doc);
        let field = ObjectRef::new(3, 0);
        let mut dict = doc.get(field).unwrap().as_dict().unwrap().clone();
        dict.insert("V".into(), Object::String(b"Mallory".to_vec()));
        update.put(field, Object::Dictionary(dict));
        let extra = update.allocate();
        assert_eq!(extra.id, doc.max_object_id() + 1);
        update.put(extra, Object::Integer(42));

        let written = update.write().unwrap();
        assert!(written.bytes.starts_with(&original));
        assert!(written.offsets[&3] >= original.len());

        let updated = PdfDocument::open(written.bytes).unwrap();
        assert_eq!(updated.revisions().len(), 2);
        assert_eq!(updated.revisions()[0].end_offset, original.len());
        assert_eq!(updated.fields()[0].value, Some(Object::String(b"Mallory".to_vec())));
        assert_eq!(updated.object_revision(3), Some(1));
        assert_eq!(updated.object_revision(1), Some(0));
        assert_eq!(updated.file_id(), doc.file_id());

        let first = updated.open_revision(0).unwrap();
        assert_eq!(first.fields()[0].value, Some(Object::String(b"Alice".to_vec())));
    }

    #[test]
    fn test_raw_body_is_written_verbatim() {
        let doc = PdfDocument::open(simple_pdf(1, false)).unwrap();
        let mut update = IncrementalUpdate::new(&doc);
        let r = update.allocate();
        update.put_raw(r, b"<< /Type /Sig /ByteRange [0 0000000000 0000000000 0000000000] >>".to_vec());
        let written = update.write().unwrap();
        let at = written.offsets[&r.id];
        assert!(written.bytes[at..].starts_with(format!("{} 0 obj\n<< /Type /Sig /ByteRange [0 0000000000", r.id).as_bytes()));
    }
}
