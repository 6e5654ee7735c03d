//! In-process PDF rewrite used when Ghostscript is missing or ineffective

use async_trait::async_trait;
use chrono::Utc;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::path::Path;
use tokio::task;

use crate::errors::{DomainError, DomainResult};
use super::Compressor;
use super::image_compressor::{recompress_jpeg, EmbeddedColorSpace};
use crate::domains::compression::types::CompressionOptions;

/// Creator/Producer written when metadata is stripped
pub const PRODUCER_NAME: &str = "PDF Compressor Pro";

/// Rewrites a PDF with `lopdf`: metadata and annotation stripping, optional
/// JPEG re-encoding, unreferenced object pruning and Flate compression.
#[derive(Debug, Default, Clone)]
pub struct PdfRewriter;

impl PdfRewriter {
    pub fn new() -> Self {
        Self
    }
}

/// Counters describing what a rewrite changed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RewriteReport {
    pub annotations_removed: usize,
    pub images_recompressed: usize,
    pub objects_pruned: usize,
}

/// Apply `options` to an in-memory PDF and return the new bytes.
pub fn rewrite_pdf(data: &[u8], options: &CompressionOptions) -> DomainResult<(Vec<u8>, RewriteReport)> {
    let mut doc = Document::load_mem(data)
        .map_err(|e| DomainError::Compression(format!("Failed to parse PDF: {}", e)))?;
    let mut report = RewriteReport::default();

    if options.remove_metadata {
        clear_metadata(&mut doc);
    }

    if options.remove_annotations {
        report.annotations_removed = remove_annotations(&mut doc);
    }

    if options.optimize_images {
        report.images_recompressed = recompress_images(&mut doc, options.effective_image_quality());
    }

    report.objects_pruned = doc.prune_objects().len();
    doc.delete_zero_length_streams();
    doc.renumber_objects();
    doc.compress();

    let mut output = Vec::with_capacity(data.len());
    doc.save_to(&mut output)
        .map_err(|e| DomainError::Compression(format!("Failed to write PDF: {}", e)))?;

    Ok((output, report))
}

fn pdf_date_now() -> Object {
    Object::string_literal(Utc::now().format("D:%Y%m%d%H%M%SZ").to_string())
}

fn clear_metadata(doc: &mut Document) {
    let info_id = match doc.trailer.get(b"Info").and_then(Object::as_reference) {
        Ok(id) => Some(id),
        Err(_) => None,
    };

    let mut info = match info_id.and_then(|id| doc.get_object(id).ok()) {
        Some(Object::Dictionary(dict)) => dict.clone(),
        _ => Dictionary::new(),
    };

    for key in ["Title", "Author", "Subject", "Keywords"] {
        info.set(key, Object::string_literal(""));
    }
    info.set("Creator", Object::string_literal(PRODUCER_NAME));
    info.set("Producer", Object::string_literal(PRODUCER_NAME));
    info.set("CreationDate", pdf_date_now());
    info.set("ModDate", pdf_date_now());

    match info_id {
        Some(id) => {
            doc.objects.insert(id, Object::Dictionary(info));
        }
        None => {
            let id = doc.add_object(Object::Dictionary(info));
            doc.trailer.set("Info", Object::Reference(id));
        }
    }
}

fn remove_annotations(doc: &mut Document) -> usize {
    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
    let mut removed = 0;
    for page_id in page_ids {
        match doc.get_object_mut(page_id).and_then(Object::as_dict_mut) {
            Ok(page) => {
                if page.remove(b"Annots").is_some() {
                    removed += 1;
                }
            }
            Err(e) => log::warn!("Skipping annotations on page {:?}: {}", page_id, e),
        }
    }
    removed
}

fn is_name(object: Result<&Object, lopdf::Error>, expected: &[u8]) -> bool {
    matches!(object, Ok(Object::Name(name)) if name.as_slice() == expected)
}

fn recompress_images(doc: &mut Document, quality: u8) -> usize {
    let mut recompressed = 0;
    for (id, object) in doc.objects.iter_mut() {
        let Object::Stream(stream) = object else { continue };
        if !is_name(stream.dict.get(b"Subtype"), b"Image") || !is_name(stream.dict.get(b"Filter"), b"DCTDecode") {
            continue;
        }
        let color_space = if is_name(stream.dict.get(b"ColorSpace"), b"DeviceRGB") {
            EmbeddedColorSpace::Rgb
        } else if is_name(stream.dict.get(b"ColorSpace"), b"DeviceGray") {
            EmbeddedColorSpace::Gray
        } else {
            continue;
        };

        match recompress_jpeg(&stream.content, color_space, quality) {
            Ok(Some(bytes)) => {
                stream.set_content(bytes);
                recompressed += 1;
            }
            Ok(None) => {}
            Err(e) => log::warn!("Image optimization failed for object {:?}: {}", id, e),
        }
    }
    recompressed
}

#[async_trait]
impl Compressor for PdfRewriter {
    async fn is_available(&self) -> bool {
        true
    }

    async fn compress(
        &self,
        input: &Path,
        output: &Path,
        options: &CompressionOptions,
    ) -> DomainResult<u64> {
        let data = tokio::fs::read(input).await?;
        let options = options.clone();

        let (bytes, report) = task::spawn_blocking(move || rewrite_pdf(&data, &options)).await??;
        log::debug!(
            "Rewrote {}: {} annotation sets removed, {} images recompressed, {} objects pruned",
            input.display(),
            report.annotations_removed,
            report.images_recompressed,
            report.objects_pruned
        );

        tokio::fs::write(output, &bytes).await?;
        Ok(bytes.len() as u64)
    }

    fn compressor_name(&self) -> &'static str {
        "PdfRewriter"
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use super::fixtures::sample_pdf;

    fn info_string(doc: &Document, key: &[u8]) -> Vec<u8> {
        let info_id = doc.trailer.get(b"Info").and_then(Object::as_reference).unwrap();
        let info = doc.get_object(info_id).and_then(Object::as_dict).unwrap();
        match info.get(key).unwrap() {
            Object::String(bytes, _) => bytes.clone(),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_plain_rewrite_shrinks_uncompressed_content() {
        let original = sample_pdf(false);
        let (bytes, report) = rewrite_pdf(&original, &CompressionOptions::default()).unwrap();
        assert!(bytes.len() < original.len());
        assert_eq!(report.annotations_removed, 0);

        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
        assert_eq!(info_string(&doc, b"Title"), b"Quarterly Report".to_vec());
    }

    #[test]
    fn test_metadata_is_cleared() {
        let options = CompressionOptions { remove_metadata: true, ..Default::default() };
        let (bytes, _) = rewrite_pdf(&sample_pdf(false), &options).unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        assert!(info_string(&doc, b"Title").is_empty());
        assert!(info_string(&doc, b"Author").is_empty());
        assert!(info_string(&doc, b"Subject").is_empty());
        assert_eq!(info_string(&doc, b"Producer"), PRODUCER_NAME.as_bytes().to_vec());
        assert!(info_string(&doc, b"ModDate").starts_with(b"D:"));
    }

    #[test]
    fn test_annotations_are_removed() {
        let options = CompressionOptions { remove_annotations: true, ..Default::default() };
        let (bytes, report) = rewrite_pdf(&sample_pdf(false), &options).unwrap();
        assert_eq!(report.annotations_removed, 1);

        let doc = Document::load_mem(&bytes).unwrap();
        for (_, page_id) in doc.get_pages() {
            let page = doc.get_object(page_id).and_then(Object::as_dict).unwrap();
            assert!(page.get(b"Annots").is_err());
        }
        // The orphaned annotation dictionary was pruned as well
        assert!(report.objects_pruned >= 1);
    }

    #[test]
    fn test_images_are_recompressed() {
        let options = CompressionOptions {
            quality: crate::domains::compression::types::CompressionQuality::Low,
            optimize_images: true,
            ..Default::default()
        };
        let original = sample_pdf(true);
        let (plain, _) = rewrite_pdf(&original, &CompressionOptions::default()).unwrap();
        let (optimized, report) = rewrite_pdf(&original, &options).unwrap();
        assert_eq!(report.images_recompressed, 1);
        assert!(optimized.len() < plain.len());
    }

    #[test]
    fn test_corrupt_input_is_an_error() {
        let err = rewrite_pdf(b"definitely not a pdf", &CompressionOptions::default()).unwrap_err();
        assert!(matches!(err, DomainError::Compression(_)));
    }

    #[tokio::test]
    async fn test_compressor_writes_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        tokio::fs::write(&input, sample_pdf(false)).await.unwrap();

        let written = PdfRewriter::new()
            .compress(&input, &output, &CompressionOptions::default())
            .await
            .unwrap();
        assert_eq!(written, tokio::fs::metadata(&output).await.unwrap().len());
    }
}
