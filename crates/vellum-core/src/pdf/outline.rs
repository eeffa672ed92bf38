//! Outline embedding: rewrite a document to carry a navigable bookmark
//! tree.
//!
//! Each node with a valid target page gets a named destination in the
//! catalog's `/Dests` dictionary; items link siblings via `/Prev`/`/Next`
//! and parents via `/First`/`/Last`. A node's visible-descendant `/Count`
//! is set only when it actually has descendants, which is what viewers use
//! to decide default expansion.

use anyhow::{Context, Result};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, StringFormat};

use crate::djvu::OutlineNode;

/// Embed `nodes` into `doc`. Returns `false` without touching the document
/// when the node list is empty - callers must then deliver the original
/// bytes instead of re-serializing a document that needs no outline.
pub fn embed_outline(doc: &mut Document, nodes: &[OutlineNode]) -> Result<bool> {
    if nodes.is_empty() {
        return Ok(false);
    }

    let pages: Vec<ObjectId> = doc.get_pages().values().cloned().collect();
    let outlines_id = doc.new_object_id();
    let mut dests = Dictionary::new();
    let mut dest_counter = 0u32;

    let built = build_items(
        doc,
        nodes,
        outlines_id,
        &pages,
        &mut dests,
        &mut dest_counter,
    );
    doc.objects.insert(
        outlines_id,
        Object::Dictionary(dictionary! {
            "Type" => "Outlines",
            "First" => built.first,
            "Last" => built.last,
            "Count" => built.count,
        }),
    );
    let dests_id = doc.add_object(Object::Dictionary(dests));

    let catalog_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .context("document has no catalog")?;
    let catalog = doc
        .get_object_mut(catalog_id)
        .context("catalog object missing")?
        .as_dict_mut()?;
    catalog.set("Outlines", Object::Reference(outlines_id));
    catalog.set("Dests", Object::Reference(dests_id));
    catalog.set("PageMode", Object::Name(b"UseOutlines".to_vec()));
    Ok(true)
}

struct BuiltLevel {
    first: ObjectId,
    last: ObjectId,
    /// Nodes at this level plus all their visible descendants.
    count: i64,
}

fn build_items(
    doc: &mut Document,
    nodes: &[OutlineNode],
    parent: ObjectId,
    pages: &[ObjectId],
    dests: &mut Dictionary,
    dest_counter: &mut u32,
) -> BuiltLevel {
    // ids first, so sibling links can point forward
    let ids: Vec<ObjectId> = nodes.iter().map(|_| doc.new_object_id()).collect();
    let mut count = nodes.len() as i64;

    for (i, node) in nodes.iter().enumerate() {
        let mut item = Dictionary::new();
        item.set("Title", pdf_text_string(&node.title));
        item.set("Parent", parent);
        if i > 0 {
            item.set("Prev", ids[i - 1]);
        }
        if i + 1 < ids.len() {
            item.set("Next", ids[i + 1]);
        }

        if let Some(page) = node.page {
            if let Some(&page_id) = pages.get((page - 1) as usize) {
                let name = format!("ol-{dest_counter}");
                *dest_counter += 1;
                dests.set(
                    name.clone(),
                    vec![Object::Reference(page_id), "Fit".into()],
                );
                item.set(
                    "Dest",
                    Object::String(name.into_bytes(), StringFormat::Literal),
                );
            }
        }

        if !node.children.is_empty() {
            let child_level =
                build_items(doc, &node.children, ids[i], pages, dests, dest_counter);
            item.set("First", child_level.first);
            item.set("Last", child_level.last);
            item.set("Count", child_level.count);
            count += child_level.count;
        }

        doc.objects.insert(ids[i], Object::Dictionary(item));
    }

    BuiltLevel {
        first: ids[0],
        last: *ids.last().unwrap(),
        count,
    }
}

/// Encode a title as a PDF text string: plain literal for ASCII, UTF-16BE
/// with BOM otherwise.
fn pdf_text_string(s: &str) -> Object {
    if s.is_ascii() {
        Object::string_literal(s)
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in s.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes, StringFormat::Hexadecimal)
    }
}
