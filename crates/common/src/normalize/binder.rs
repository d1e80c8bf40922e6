//! PDF "binders": documents that carry other PDFs in their embedded-files name
//! tree. The canonical form is every embedded PDF's pages, appended in tree
//! order, in one flat document.

use std::path::Path;

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};

use crate::error::VaultError;

/// Name trees and page trees deeper than this are treated as malformed.
const MAX_TREE_DEPTH: usize = 32;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Flatten the binder at `source` into `target`.
///
/// Returns `Ok(false)` without writing anything when the document has no
/// embedded-files tree.
pub(crate) fn flatten_binder(
    source: &Path,
    target: &Path,
    display_name: &str,
) -> Result<bool, VaultError> {
    let doc = Document::load(source)
        .map_err(|e| VaultError::MalformedInput(format!("{}: {}", display_name, e)))?;

    let Some(specs) = embedded_file_specs(&doc)? else {
        return Ok(false);
    };

    let mut embedded = Vec::new();
    for spec in specs {
        let Some(bytes) = embedded_pdf_bytes(&doc, spec) else {
            tracing::warn!(binder = %display_name, "embedded file missing or not a PDF, skipping");
            continue;
        };
        match Document::load_mem(&bytes) {
            Ok(inner) => embedded.push(inner),
            Err(e) => {
                tracing::warn!(binder = %display_name, error = %e, "embedded PDF could not be opened, skipping")
            }
        }
    }

    if embedded.is_empty() {
        return Err(VaultError::InvalidBinder(display_name.to_string()));
    }

    tracing::debug!(binder = %display_name, documents = embedded.len(), "merging embedded PDFs");
    let mut merged = merge_documents(embedded)?;
    merged.save(target)?;
    Ok(true)
}

/// Append the pages of every document, in order, into a single new document.
pub fn merge_documents(documents: Vec<Document>) -> Result<Document, VaultError> {
    let mut merged = Document::with_version("1.7");
    let pages_id = merged.new_object_id();
    let mut kids: Vec<Object> = Vec::new();

    for mut doc in documents {
        doc.renumber_objects_with(merged.max_id + 1);
        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();

        for page_id in &page_ids {
            let inherited = inherited_attributes(&doc, *page_id);
            let page = doc.get_object_mut(*page_id)?.as_dict_mut()?;
            for (key, value) in inherited {
                page.set(key, value);
            }
            page.set("Parent", pages_id);
        }

        let top = doc.objects.keys().map(|(id, _)| *id).max().unwrap_or(0);
        merged.max_id = merged.max_id.max(top).max(doc.max_id);

        // Old catalogs and page tree nodes are replaced by the merged ones
        for (id, object) in doc.objects {
            if matches!(object.type_name(), Ok(b"Catalog") | Ok(b"Pages")) {
                continue;
            }
            merged.objects.insert(id, object);
        }
        kids.extend(page_ids.into_iter().map(Object::Reference));
    }

    let count = kids.len() as i64;
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    merged.trailer.set("Root", catalog_id);
    merged.compress();
    Ok(merged)
}

/// File specifications listed in the catalog's embedded-files name tree, or
/// `None` when the document has no such tree.
fn embedded_file_specs(doc: &Document) -> Result<Option<Vec<&Dictionary>>, VaultError> {
    let catalog = doc
        .catalog()
        .map_err(|e| VaultError::MalformedInput(format!("missing catalog: {}", e)))?;
    let Some(names) = lookup_dict(doc, catalog, b"Names") else {
        return Ok(None);
    };
    let Some(tree) = lookup_dict(doc, names, b"EmbeddedFiles") else {
        return Ok(None);
    };

    let mut specs = Vec::new();
    collect_specs(doc, tree, 0, &mut specs);
    Ok(Some(specs))
}

fn collect_specs<'a>(
    doc: &'a Document,
    node: &'a Dictionary,
    depth: usize,
    out: &mut Vec<&'a Dictionary>,
) {
    if depth > MAX_TREE_DEPTH {
        tracing::warn!("embedded files name tree too deep, ignoring the rest");
        return;
    }

    // leaf: [name1 spec1 name2 spec2 ...]
    if let Some(Object::Array(entries)) = node.get(b"Names").ok().and_then(|o| resolve(doc, o)) {
        for pair in entries.chunks(2) {
            if let [_, value] = pair {
                if let Some(spec) = resolve(doc, value).and_then(|o| o.as_dict().ok()) {
                    out.push(spec);
                }
            }
        }
    }

    if let Some(Object::Array(kids)) = node.get(b"Kids").ok().and_then(|o| resolve(doc, o)) {
        for kid in kids {
            if let Some(kid) = resolve(doc, kid).and_then(|o| o.as_dict().ok()) {
                collect_specs(doc, kid, depth + 1, out);
            }
        }
    }
}

/// Bytes of the embedded file behind `spec` if it is declared as a PDF.
fn embedded_pdf_bytes(doc: &Document, spec: &Dictionary) -> Option<Vec<u8>> {
    let ef = lookup_dict(doc, spec, b"EF")?;
    let stream = ef
        .get(b"F")
        .or_else(|_| ef.get(b"UF"))
        .ok()
        .and_then(|o| resolve(doc, o))?
        .as_stream()
        .ok()?;

    let subtype = stream.dict.get(b"Subtype").and_then(Object::as_name).ok()?;
    if !subtype.eq_ignore_ascii_case(b"application/pdf") {
        return None;
    }
    stream.get_plain_content().ok()
}

fn inherited_attributes(doc: &Document, page_id: ObjectId) -> Vec<(&'static [u8], Object)> {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };

    let mut found: Vec<(&'static [u8], Object)> = Vec::new();
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    let mut depth = 0;
    while let Some(parent_id) = parent {
        if depth >= MAX_TREE_DEPTH {
            break;
        }
        let Ok(node) = doc.get_dictionary(parent_id) else {
            break;
        };
        for key in INHERITABLE {
            if page.has(key) || found.iter().any(|(k, _)| *k == key) {
                continue;
            }
            if let Ok(value) = node.get(key) {
                found.push((key, value.clone()));
            }
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
        depth += 1;
    }
    found
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn lookup_dict<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Dictionary> {
    dict.get(key)
        .ok()
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok())
}
