//! Placeholder ("skeleton") document construction.
//!
//! A skeleton carries the already-converted pages followed by filler pages
//! up to the source's full page count, so a page-count-dependent viewer is
//! correct immediately while the real conversion continues behind it. The
//! filler is drawn procedurally - light background and pseudo-paragraph
//! bars - so a pending page is visually distinct from both a blank page and
//! a loading spinner.

use std::path::Path;

use anyhow::{bail, Context, Result};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};

/// Pad the document at `input` with filler pages up to `total` pages and
/// write the result to `out`. The filler matches the first page's
/// dimensions. A document already at (or beyond) `total` pages is written
/// through unchanged.
pub fn pad_to_page_count(input: &Path, total: u32, out: &Path) -> Result<()> {
    let mut doc = Document::load(input)
        .with_context(|| format!("failed to load {} for padding", input.display()))?;
    pad_document(&mut doc, total)?;
    doc.save(out)
        .with_context(|| format!("failed to write padded document {}", out.display()))?;
    Ok(())
}

/// In-memory padding; exposed for the pipelines that already hold a
/// document.
pub fn pad_document(doc: &mut Document, total: u32) -> Result<()> {
    let pages = doc.get_pages();
    let existing = pages.len() as u32;
    if existing >= total {
        return Ok(());
    }
    let (_, &first_page) = pages
        .iter()
        .next()
        .context("document has no pages to pad from")?;
    let (width, height) = page_media_box(doc, first_page)?;
    let pages_id = pages_root(doc)?;

    // one shared content stream; the filler is identical on every page
    let content = filler_content(width, height);
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

    let mut new_kids = Vec::with_capacity((total - existing) as usize);
    for _ in existing..total {
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                Object::Real(width),
                Object::Real(height),
            ],
            "Resources" => dictionary! {},
            "Contents" => content_id,
        });
        new_kids.push(Object::Reference(page_id));
    }

    let pages_dict = doc
        .get_object_mut(pages_id)
        .context("pages root missing")?
        .as_dict_mut()?;
    pages_dict.set("Count", total as i64);
    pages_dict
        .get_mut(b"Kids")?
        .as_array_mut()?
        .extend(new_kids);
    Ok(())
}

fn pages_root(doc: &Document) -> Result<ObjectId> {
    let catalog_id = doc.trailer.get(b"Root")?.as_reference()?;
    let catalog = doc.get_object(catalog_id)?.as_dict()?;
    Ok(catalog.get(b"Pages")?.as_reference()?)
}

/// Page width/height from its MediaBox, walking up the page tree for an
/// inherited one.
fn page_media_box(doc: &Document, page_id: ObjectId) -> Result<(f32, f32)> {
    let mut current = page_id;
    loop {
        let dict = doc.get_object(current)?.as_dict()?;
        if let Ok(media_box) = dict.get(b"MediaBox") {
            let array = match media_box {
                Object::Reference(id) => doc.get_object(*id)?.as_array()?,
                other => other.as_array()?,
            };
            let nums: Vec<f32> = array.iter().filter_map(object_to_f32).collect();
            if nums.len() != 4 {
                bail!("malformed MediaBox on page {current:?}");
            }
            return Ok(((nums[2] - nums[0]).abs(), (nums[3] - nums[1]).abs()));
        }
        match dict.get(b"Parent") {
            Ok(Object::Reference(parent)) => current = *parent,
            _ => bail!("no MediaBox found for page {page_id:?}"),
        }
    }
}

fn object_to_f32(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

/// Deterministic pseudo-paragraph filler sized to the real page. Pure
/// function of the page dimensions: same input, same bytes.
fn filler_content(width: f32, height: f32) -> String {
    // line widths as a fraction of the text column, cycled; the short last
    // entry reads as a paragraph's trailing line
    const LINE_WIDTHS: [f32; 8] = [0.92, 0.88, 0.97, 0.85, 0.94, 0.90, 0.96, 0.58];

    let margin_x = width * 0.10;
    let margin_y = height * 0.08;
    let line_height = height * 0.012;
    let gap = height * 0.012;
    let column = width - 2.0 * margin_x;

    let mut ops = String::new();
    ops.push_str(&format!(
        "0.97 0.97 0.97 rg\n0 0 {width:.2} {height:.2} re f\n0.85 0.85 0.85 rg\n"
    ));

    let mut y = height - margin_y;
    let mut row = 0usize;
    while y - line_height > margin_y {
        let line_width = column * LINE_WIDTHS[row % LINE_WIDTHS.len()];
        ops.push_str(&format!(
            "{margin_x:.2} {:.2} {line_width:.2} {line_height:.2} re f\n",
            y - line_height
        ));
        y -= line_height + gap;
        if row % LINE_WIDTHS.len() == LINE_WIDTHS.len() - 1 {
            // paragraph break
            y -= gap * 2.0;
        }
        row += 1;
    }
    ops
}
