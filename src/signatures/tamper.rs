//! Detection of changes appended after a signature.
//!
//! Both checks compare an earlier revision, opened on its own, with the
//! final document.

use super::params::PagesToCheck;
use super::types::{SignValidity, ValidityError};
use crate::document::PdfDocument;
use crate::error::Result;
use crate::object::{Dict, Object, ObjectRef};
use std::collections::{HashMap, HashSet};

/// Nesting followed when comparing resolved resources and annotations.
const MAX_COMPARE_DEPTH: usize = 12;

/// How a form field differs between two revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: String,
    pub kind: ChangeKind,
}

impl std::fmt::Display for FieldChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            ChangeKind::Added => "added",
            ChangeKind::Removed => "removed",
            ChangeKind::Modified => "modified",
        };
        write!(f, "{} {}", self.field, kind)
    }
}

/// Values of the non-signature fields, keyed by qualified name.
fn field_values(doc: &PdfDocument) -> HashMap<String, Option<Object>> {
    doc.fields()
        .into_iter()
        .filter(|f| f.field_type.as_deref() != Some("Sig"))
        .map(|f| (f.name, f.value))
        .collect()
}

/// Non-signature fields whose value differs between `signed` and `current`.
///
/// A field that appears without a value is not a change.
pub fn form_changes(signed: &PdfDocument, current: &PdfDocument) -> Vec<FieldChange> {
    let before = field_values(signed);
    let after = field_values(current);
    let mut changes = Vec::new();
    for (name, value) in &before {
        match after.get(name) {
            None => changes.push(FieldChange {
                field: name.clone(),
                kind: ChangeKind::Removed,
            }),
            Some(new_value) if new_value != value => changes.push(FieldChange {
                field: name.clone(),
                kind: ChangeKind::Modified,
            }),
            Some(_) => {},
        }
    }
    for (name, value) in &after {
        if value.is_some() && !before.contains_key(name) {
            changes.push(FieldChange {
                field: name.clone(),
                kind: ChangeKind::Added,
            });
        }
    }
    changes.sort_by(|a, b| a.field.cmp(&b.field));
    if !changes.is_empty() {
        log::debug!("{} form fields changed after signing", changes.len());
    }
    changes
}

/// Deep copy of `object` with references replaced by their targets.
/// Back-links (`/Parent`, `/P`) are dropped.
fn resolved(doc: &PdfDocument, object: &Object, depth: usize) -> Object {
    if depth > MAX_COMPARE_DEPTH {
        return Object::Null;
    }
    match object {
        Object::Reference(_) => resolved(doc, doc.resolve(object), depth + 1),
        Object::Array(items) => Object::Array(items.iter().map(|i| resolved(doc, i, depth + 1)).collect()),
        Object::Dictionary(dict) => Object::Dictionary(resolved_dict(doc, dict, depth)),
        Object::Stream { dict, data } => Object::Stream {
            dict: resolved_dict(doc, dict, depth),
            data: data.clone(),
        },
        other => other.clone(),
    }
}

fn resolved_dict(doc: &PdfDocument, dict: &Dict, depth: usize) -> Dict {
    dict.iter()
        .filter(|(k, _)| k.as_str() != "Parent" && k.as_str() != "P")
        .map(|(k, v)| (k.clone(), resolved(doc, v, depth + 1)))
        .collect()
}

fn is_signature_widget(doc: &PdfDocument, annot: &Dict) -> bool {
    let field_type = annot.get("FT").or_else(|| {
        annot
            .get("Parent")
            .map(|p| doc.resolve(p))
            .and_then(|p| p.get("FT"))
    });
    annot.get("Subtype").and_then(Object::as_name) == Some("Widget")
        && field_type.and_then(Object::as_name) == Some("Sig")
}

fn annotations(doc: &PdfDocument, page: ObjectRef) -> Vec<(ObjectRef, &Dict)> {
    doc.page_annotations(page)
        .into_iter()
        .filter_map(|r| doc.get(r).and_then(Object::as_dict).map(|d| (r, d)))
        .collect()
}

fn compare_page(signed: &PdfDocument, current: &PdfDocument, number: usize, old: ObjectRef, new: ObjectRef) -> Result<Option<String>> {
    if signed.page_content(old)? != current.page_content(new)? {
        return Ok(Some(format!("content of page {} changed", number)));
    }
    let resources = |doc: &PdfDocument, page| {
        doc.page_attribute(page, "Resources")
            .map(|r| resolved(doc, r, 0))
            .unwrap_or(Object::Null)
    };
    if resources(signed, old) != resources(current, new) {
        return Ok(Some(format!("resources of page {} changed", number)));
    }

    let before = annotations(signed, old);
    let after: HashMap<ObjectRef, &Dict> = annotations(current, new).into_iter().collect();
    for (r, dict) in &before {
        if is_signature_widget(signed, dict) {
            continue;
        }
        match after.get(r) {
            None => return Ok(Some(format!("annotation {} removed from page {}", r, number))),
            Some(now) if resolved_dict(current, now, 0) != resolved_dict(signed, dict, 0) => {
                return Ok(Some(format!("annotation {} on page {} changed", r, number)));
            },
            Some(_) => {},
        }
    }
    let known: HashSet<ObjectRef> = before.iter().map(|(r, _)| *r).collect();
    for (r, dict) in &after {
        if !known.contains(r) && !is_signature_widget(current, dict) {
            return Ok(Some(format!("annotation {} added to page {}", r, number)));
        }
    }
    Ok(None)
}

/// Look for content changes between the last signed revision and the final
/// document that a viewer would render but the signature does not cover.
///
/// Only the first pages selected by `pages` are compared.
pub fn shadow_attack(signed: &PdfDocument, current: &PdfDocument, pages: PagesToCheck) -> Result<Option<SignValidity>> {
    let old_pages = signed.pages();
    let new_pages = current.pages();
    if old_pages.len() != new_pages.len() {
        let cause = format!("page count changed from {} to {}", old_pages.len(), new_pages.len());
        return Ok(Some(SignValidity::pending(ValidityError::SuspectedShadowAttack, cause)));
    }
    let limit = match pages {
        PagesToCheck::All => old_pages.len(),
        PagesToCheck::First(n) => n.min(old_pages.len()),
    };
    for (i, (old, new)) in old_pages.iter().zip(&new_pages).take(limit).enumerate() {
        if let Some(cause) = compare_page(signed, current, i + 1, *old, *new)? {
            log::warn!("Possible shadow attack: {}", cause);
            return Ok(Some(SignValidity::pending(ValidityError::SuspectedShadowAttack, cause)));
        }
    }
    Ok(None)
}
