//! Page-order concatenation of converted chunks into one document.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use lopdf::{dictionary, Document, Object, ObjectId};

/// Load the chunk documents at `inputs` (already in page order) and
/// concatenate them.
pub fn concat_files(inputs: &[PathBuf]) -> Result<Document> {
    let mut docs = Vec::with_capacity(inputs.len());
    for path in inputs {
        let doc = Document::load(path)
            .with_context(|| format!("failed to load chunk {}", path.display()))?;
        docs.push(doc);
    }
    concat_documents(docs)
}

/// Concatenate documents in order: renumber every chunk's objects into one
/// id space, carry all page/content objects over, and rebuild a single
/// page tree and catalog. Chunk-level catalogs, page trees, and outlines
/// are dropped; the merged document gets fresh ones.
pub fn concat_documents(documents: Vec<Document>) -> Result<Document> {
    if documents.is_empty() {
        bail!("nothing to merge");
    }

    let mut merged = Document::with_version("1.5");
    let mut max_id = 1;
    // (page object id, page dictionary) in delivery order
    let mut pages: Vec<(ObjectId, Object)> = Vec::new();
    let mut objects: BTreeMap<ObjectId, Object> = BTreeMap::new();

    for mut doc in documents {
        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;

        for (_, page_id) in doc.get_pages() {
            let page = doc
                .get_object(page_id)
                .with_context(|| format!("chunk page {page_id:?} missing"))?
                .to_owned();
            pages.push((page_id, page));
        }
        objects.extend(doc.objects);
    }
    if pages.is_empty() {
        bail!("merged chunks contain no pages");
    }

    // keep everything except the structural objects we rebuild below
    for (id, object) in objects {
        let type_name = match &object {
            Object::Dictionary(dict) => {
                dict.get(b"Type").ok().and_then(|o| o.as_name().ok())
            }
            _ => None,
        };
        match type_name {
            Some(b"Catalog") | Some(b"Pages") | Some(b"Page") | Some(b"Outlines") => {}
            _ => {
                merged.objects.insert(id, object);
            }
        }
    }

    let pages_id = merged.new_object_id();
    let kids: Vec<Object> = pages
        .iter()
        .map(|(id, _)| Object::Reference(*id))
        .collect();
    let page_count = pages.len();

    for (id, page) in pages {
        let mut dict = page.as_dict()?.clone();
        dict.set("Parent", pages_id);
        merged.objects.insert(id, Object::Dictionary(dict));
    }

    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
        }),
    );
    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    merged.trailer.set("Root", catalog_id);
    merged.renumber_objects();

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::fixtures;

    #[test]
    fn test_concat_preserves_page_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("chunk-0000.pdf");
        let b = dir.path().join("chunk-0001.pdf");
        fixtures::write_pdf(&a, &["PageOne", "PageTwo"]);
        fixtures::write_pdf(&b, &["PageThree", "PageFour", "PageFive"]);

        let merged = concat_files(&[a, b]).unwrap();
        assert_eq!(merged.get_pages().len(), 5);
        assert!(merged
            .extract_text(&[1])
            .unwrap_or_default()
            .contains("PageOne"));
        assert!(merged
            .extract_text(&[3])
            .unwrap_or_default()
            .contains("PageThree"));
        assert!(merged
            .extract_text(&[5])
            .unwrap_or_default()
            .contains("PageFive"));
    }

    #[test]
    fn test_concat_survives_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.pdf");
        let out = dir.path().join("merged.pdf");
        fixtures::write_pdf(&a, &["Solo"]);

        let mut merged = concat_files(&[a]).unwrap();
        merged.save(&out).unwrap();

        let reloaded = Document::load(&out).unwrap();
        assert_eq!(reloaded.get_pages().len(), 1);
    }

    #[test]
    fn test_concat_rejects_empty_input() {
        assert!(concat_files(&[]).is_err());
    }
}
