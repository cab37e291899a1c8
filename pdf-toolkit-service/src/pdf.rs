//! PDF document routines.
//!
//! Structural work (pages, extraction, watermarks, compression) goes through
//! `lopdf`; encryption and linearization through `qpdf`; rasterization through
//! `pdfium-render`. Every routine reads its input and writes a new file.

pub mod extract;
pub mod optimize;
pub mod pages;
pub mod render;
pub mod security;
pub mod tables;
pub mod watermark;

use std::path::Path;

use lopdf::{Document, Object, ObjectId};
use serde::Serialize;

use crate::error::{ProcessingError, ServiceError, ServiceResult};

pub use render::create_pdfium;

/// US Letter, used when a page has no resolvable media box
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Load a PDF, rejecting encrypted documents
pub fn load(path: &Path) -> ServiceResult<Document> {
    let doc = load_any(path)?;
    if doc.is_encrypted() {
        return Err(ProcessingError::Encrypted.into());
    }
    Ok(doc)
}

/// Load a PDF without the encryption check
pub fn load_any(path: &Path) -> ServiceResult<Document> {
    Document::load(path).map_err(|e| {
        ServiceError::Processing(ProcessingError::pdf(format!(
            "failed to open {}: {}",
            file_name(path),
            e
        )))
    })
}

pub fn save(doc: &mut Document, path: &Path) -> ServiceResult<()> {
    doc.save(path).map_err(|e| {
        ServiceError::Processing(ProcessingError::pdf(format!(
            "failed to write {}: {}",
            file_name(path),
            e
        )))
    })?;
    Ok(())
}

pub fn save_to_vec(doc: &mut Document) -> ServiceResult<Vec<u8>> {
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| ProcessingError::pdf(format!("failed to serialize PDF: {}", e)))?;
    Ok(buffer)
}

/// Page object ids in page order
pub fn page_ids(doc: &Document) -> Vec<ObjectId> {
    doc.get_pages().into_values().collect()
}

pub fn check_page(page: u32, total: u32) -> ServiceResult<()> {
    if page == 0 || page > total {
        return Err(ProcessingError::PageOutOfRange { page, total }.into());
    }
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// File stem used to name derived outputs
pub fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}

/// Follow a reference to its target; other objects are returned as-is
pub(crate) fn resolve<'a>(doc: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(object),
        other => other,
    }
}

pub(crate) fn as_number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

/// A page attribute, searching up the `/Parent` chain
pub(crate) fn inherited(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    for _ in 0..32 {
        if let Ok(value) = current.get(key) {
            return Some(value.clone());
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

/// Effective media box `[llx, lly, urx, ury]`
pub(crate) fn media_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    let Some(value) = inherited(doc, page_id, b"MediaBox") else {
        return DEFAULT_MEDIA_BOX;
    };
    let Ok(items) = resolve(doc, &value).as_array() else {
        return DEFAULT_MEDIA_BOX;
    };
    let numbers: Vec<f32> = items
        .iter()
        .filter_map(|o| as_number(resolve(doc, o)))
        .collect();
    match numbers.as_slice() {
        [a, b, c, d] => [*a, *b, *c, *d],
        _ => DEFAULT_MEDIA_BOX,
    }
}

/// Effective `/Rotate`, normalized to 0..360
pub(crate) fn page_rotation(doc: &Document, page_id: ObjectId) -> i64 {
    inherited(doc, page_id, b"Rotate")
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(0)
        .rem_euclid(360)
}

#[derive(Debug, Clone, Serialize)]
pub struct PageInfo {
    pub page: u32,
    pub width: f32,
    pub height: f32,
    pub rotation: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PdfInfo {
    pub page_count: u32,
    pub version: String,
    pub encrypted: bool,
    pub file_size: u64,
    pub pages: Vec<PageInfo>,
}

pub fn page_count(path: &Path) -> ServiceResult<u32> {
    Ok(load_any(path)?.get_pages().len() as u32)
}

pub fn info(path: &Path) -> ServiceResult<PdfInfo> {
    let doc = load_any(path)?;
    let file_size = std::fs::metadata(path).map_err(ProcessingError::Io)?.len();

    let pages = doc
        .get_pages()
        .into_iter()
        .map(|(number, id)| {
            let [llx, lly, urx, ury] = media_box(&doc, id);
            PageInfo {
                page: number,
                width: (urx - llx).abs(),
                height: (ury - lly).abs(),
                rotation: page_rotation(&doc, id),
            }
        })
        .collect::<Vec<_>>();

    Ok(PdfInfo {
        page_count: pages.len() as u32,
        version: doc.version.clone(),
        encrypted: doc.is_encrypted(),
        file_size,
        pages,
    })
}

/// Builders for small PDFs used in tests
#[cfg(test)]
pub(crate) mod testing {
    use std::path::{Path, PathBuf};

    use lopdf::content::{Content, Operation};
    use lopdf::{Document, Object, Stream, dictionary};

    /// One page per entry; each page shows its lines top to bottom in Helvetica.
    /// Resources and MediaBox sit on the page tree root so pages inherit them.
    pub fn document_with_pages(pages: &[Vec<&str>]) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for lines in pages {
            let mut operations = Vec::new();
            for (i, line) in lines.iter().enumerate() {
                let y = 750 - (i as i64) * 16;
                operations.push(Operation::new("BT", vec![]));
                operations.push(Operation::new("Tf", vec!["F1".into(), 12.into()]));
                operations.push(Operation::new("Td", vec![50.into(), y.into()]));
                operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
                operations.push(Operation::new("ET", vec![]));
            }
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                content.encode().expect("encode content"),
            ));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
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
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    /// `count` pages, each reading "Page N"
    pub fn sample_pdf(dir: &Path, name: &str, count: usize) -> PathBuf {
        let labels: Vec<String> = (1..=count).map(|n| format!("Page {}", n)).collect();
        let pages: Vec<Vec<&str>> = labels.iter().map(|l| vec![l.as_str()]).collect();
        write_pdf(dir, name, &pages)
    }

    pub fn write_pdf(dir: &Path, name: &str, pages: &[Vec<&str>]) -> PathBuf {
        let path = dir.join(name);
        let mut doc = document_with_pages(pages);
        doc.save(&path).expect("save test pdf");
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_reports_inherited_media_box() {
        let dir = tempfile::tempdir().unwrap();
        let path = testing::sample_pdf(dir.path(), "a.pdf", 3);

        let info = info(&path).unwrap();
        assert_eq!(info.page_count, 3);
        assert!(!info.encrypted);
        assert_eq!(info.pages[0].width, 595.0);
        assert_eq!(info.pages[2].height, 842.0);
        assert_eq!(page_count(&path).unwrap(), 3);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();
        assert!(matches!(
            load(&path),
            Err(ServiceError::Processing(ProcessingError::Pdf { .. }))
        ));
    }

    #[test]
    fn test_check_page_bounds() {
        assert!(check_page(1, 1).is_ok());
        assert!(check_page(0, 1).is_err());
        assert!(matches!(
            check_page(4, 3),
            Err(ServiceError::Processing(ProcessingError::PageOutOfRange { page: 4, total: 3 }))
        ));
    }
}
