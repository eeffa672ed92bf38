//! Assemble a document from per-page raster images (the export path).
//!
//! Every page becomes a single full-bleed image XObject. Images are
//! re-encoded as JPEG and embedded as `DCTDecode` streams; grayscale
//! sources stay grayscale.

use std::io::Cursor;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use lopdf::{dictionary, Document, Object, Stream};

/// Build a document from page images, in the given order. `dpi` maps pixel
/// dimensions to page dimensions (72 PDF units per inch).
pub fn assemble_from_images(
    images: &[PathBuf],
    dpi: u32,
    jpeg_quality: u8,
) -> Result<Document> {
    if images.is_empty() {
        bail!("no page images to assemble");
    }
    let dpi = dpi.max(1);

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::with_capacity(images.len());

    for path in images {
        let img = image::open(path)
            .with_context(|| format!("failed to decode page image {}", path.display()))?;
        let (px_width, px_height) = (img.width(), img.height());
        // PPM input is RGB, PGM is grayscale; flatten anything else to RGB
        let img = match img {
            DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => img,
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        };
        let grayscale = matches!(img, DynamicImage::ImageLuma8(_));

        let mut jpeg = Vec::new();
        let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut jpeg), jpeg_quality);
        img.write_with_encoder(encoder)
            .with_context(|| format!("failed to encode page image {}", path.display()))?;

        let color_space = if grayscale { "DeviceGray" } else { "DeviceRGB" };
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => px_width as i64,
                "Height" => px_height as i64,
                "ColorSpace" => color_space,
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg,
        ));

        let page_width = px_width as f32 * 72.0 / dpi as f32;
        let page_height = px_height as f32 * 72.0 / dpi as f32;
        let content = format!("q\n{page_width:.2} 0 0 {page_height:.2} 0 0 cm\n/Im0 Do\nQ");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                Object::Real(page_width),
                Object::Real(page_height),
            ],
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    "Im0" => image_id,
                },
            },
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    Ok(doc)
}
