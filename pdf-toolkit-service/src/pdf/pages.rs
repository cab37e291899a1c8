//! Page-level operations: merge, split, rotate, extract and reorder.
//!
//! Pages are 1-based. Merge, split, extract and reorder build a fresh document
//! through [`PageTreeBuilder`]; rotate edits a loaded copy in place.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use lopdf::{Dictionary, Document, Object, ObjectId, dictionary};
use tracing::{debug, info, instrument, warn};

use super::{check_page, inherited, load, page_ids, save, stem};
use crate::error::{ProcessingError, ServiceError, ServiceResult};

/// Page attributes that may live on an ancestor `/Pages` node
const INHERITABLE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Builds a new document from pages of one or more source documents.
pub(crate) struct PageTreeBuilder {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
}

impl PageTreeBuilder {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    /// Copy `pages` of `source` in the given order.
    ///
    /// Objects shared between the pages are copied once.
    pub fn append(&mut self, source: &Document, pages: &[ObjectId]) {
        let mut copier = ObjectCopier {
            source,
            target: &mut self.doc,
            mapping: HashMap::new(),
        };

        // Reserve ids up front so links between selected pages stay intact
        let reserved: Vec<ObjectId> = pages
            .iter()
            .map(|&id| {
                *copier
                    .mapping
                    .entry(id)
                    .or_insert_with(|| copier.target.new_object_id())
            })
            .collect();

        for (&source_id, &new_id) in pages.iter().zip(&reserved) {
            let Ok(page) = source.get_dictionary(source_id) else {
                warn!(?source_id, "Skipping unreadable page object");
                continue;
            };

            let mut copied = copier.copy_dictionary(page);
            for key in INHERITABLE_KEYS {
                if !copied.has(key)
                    && let Some(value) = inherited(source, source_id, key)
                {
                    let value = copier.copy(&value);
                    copied.set(key.to_vec(), value);
                }
            }
            copied.set("Parent", Object::Reference(self.pages_id));

            copier.target.objects.insert(new_id, Object::Dictionary(copied));
            self.kids.push(Object::Reference(new_id));
        }
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// Attach the page tree and catalog
    pub fn finish(mut self) -> Document {
        let count = self.kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => self.kids,
                "Count" => count,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc
    }
}

/// Deep copy with a source-to-target id map
struct ObjectCopier<'a> {
    source: &'a Document,
    target: &'a mut Document,
    mapping: HashMap<ObjectId, ObjectId>,
}

impl ObjectCopier<'_> {
    fn copy(&mut self, object: &Object) -> Object {
        match object {
            Object::Reference(id) => Object::Reference(self.copy_reference(*id)),
            Object::Array(items) => Object::Array(items.iter().map(|o| self.copy(o)).collect()),
            Object::Dictionary(dict) => Object::Dictionary(self.copy_dictionary(dict)),
            Object::Stream(stream) => {
                let mut copied = stream.clone();
                copied.dict = self.copy_dictionary(&stream.dict);
                Object::Stream(copied)
            }
            other => other.clone(),
        }
    }

    fn copy_reference(&mut self, id: ObjectId) -> ObjectId {
        if let Some(&mapped) = self.mapping.get(&id) {
            return mapped;
        }
        let new_id = self.target.new_object_id();
        self.mapping.insert(id, new_id);

        let copied = match self.source.get_object(id) {
            Ok(object) => self.copy(object),
            Err(e) => {
                warn!(?id, error = %e, "Unresolvable reference replaced with null");
                Object::Null
            }
        };
        self.target.objects.insert(new_id, copied);
        new_id
    }

    /// Page-tree nodes lose `/Parent`; the builder wires pages to the new root
    fn copy_dictionary(&mut self, dict: &Dictionary) -> Dictionary {
        let is_tree_node = matches!(
            dict.get(b"Type").and_then(|t| t.as_name()),
            Ok(b"Page") | Ok(b"Pages")
        );
        let mut copied = Dictionary::new();
        for (key, value) in dict.iter() {
            if is_tree_node && key.as_slice() == b"Parent" {
                continue;
            }
            copied.set(key.clone(), self.copy(value));
        }
        copied
    }
}

fn write_pages(source: &Document, pages: &[ObjectId], output: &Path) -> ServiceResult<()> {
    let mut builder = PageTreeBuilder::new();
    builder.append(source, pages);
    let mut doc = builder.finish();
    save(&mut doc, output)
}

/// Concatenate every page of every input
#[instrument(skip_all, fields(inputs = inputs.len()))]
pub fn merge(inputs: &[PathBuf], output: &Path) -> ServiceResult<usize> {
    if inputs.len() < 2 {
        return Err(ServiceError::invalid("At least 2 files are required for merging"));
    }

    let mut builder = PageTreeBuilder::new();
    for input in inputs {
        let doc = load(input)?;
        let pages = page_ids(&doc);
        debug!(input = %input.display(), pages = pages.len(), "Appending document");
        builder.append(&doc, &pages);
    }

    let total = builder.page_count();
    let mut merged = builder.finish();
    save(&mut merged, output)?;

    info!(pages = total, output = %output.display(), "Merged PDFs");
    Ok(total)
}

/// Inclusive 1-based page range
pub type PageRange = (u32, u32);

pub fn validate_ranges(ranges: &[PageRange], total: u32) -> ServiceResult<()> {
    for &(start, end) in ranges {
        if start == 0 || start > end {
            return Err(ServiceError::invalid(format!(
                "Invalid page range {}-{}",
                start, end
            )));
        }
        check_page(end, total)?;
    }
    Ok(())
}

/// One file per range, or one per page when `ranges` is empty
#[instrument(skip_all, fields(input = %input.display(), ranges = ranges.len()))]
pub fn split(input: &Path, ranges: &[PageRange], output_dir: &Path) -> ServiceResult<Vec<PathBuf>> {
    let doc = load(input)?;
    let ids = page_ids(&doc);
    let total = ids.len() as u32;

    let ranges: Vec<PageRange> = if ranges.is_empty() {
        (1..=total).map(|p| (p, p)).collect()
    } else {
        validate_ranges(ranges, total)?;
        ranges.to_vec()
    };

    let base = stem(input);
    let mut outputs = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        let selected = &ids[(start - 1) as usize..end as usize];
        let path = output_dir.join(format!("{}_pages_{}-{}.pdf", base, start, end));
        write_pages(&doc, selected, &path)?;
        outputs.push(path);
    }

    info!(files = outputs.len(), "Split PDF");
    Ok(outputs)
}

pub fn validate_angle(angle: i64) -> ServiceResult<()> {
    if matches!(angle.abs(), 90 | 180 | 270) {
        Ok(())
    } else {
        Err(ServiceError::invalid(format!(
            "Rotation must be one of ±90, ±180, ±270 (got {})",
            angle
        )))
    }
}

/// Add `angle` to the `/Rotate` of each listed page
#[instrument(skip_all, fields(input = %input.display()))]
pub fn rotate(input: &Path, rotations: &HashMap<u32, i64>, output: &Path) -> ServiceResult<()> {
    if rotations.is_empty() {
        return Err(ServiceError::invalid("No page rotations given"));
    }

    let mut doc = load(input)?;
    let pages = doc.get_pages();
    let total = pages.len() as u32;

    for (&page, &angle) in rotations {
        check_page(page, total)?;
        validate_angle(angle)?;
    }

    for (&page, &angle) in rotations {
        let page_id = pages[&page];
        let current = super::page_rotation(&doc, page_id);
        let rotation = (current + angle).rem_euclid(360);
        let dict = doc
            .get_dictionary_mut(page_id)
            .map_err(|e| ProcessingError::pdf(format!("page {}: {}", page, e)))?;
        dict.set("Rotate", Object::Integer(rotation));
        debug!(page, current, rotation, "Rotated page");
    }

    save(&mut doc, output)
}

/// Write the listed pages in the listed order; repeats keep the first occurrence
#[instrument(skip_all, fields(input = %input.display(), pages = pages.len()))]
pub fn extract_pages(input: &Path, pages: &[u32], output: &Path) -> ServiceResult<Vec<u32>> {
    if pages.is_empty() {
        return Err(ServiceError::invalid("No pages given"));
    }

    let doc = load(input)?;
    let ids = page_ids(&doc);
    let total = ids.len() as u32;

    let mut seen = HashSet::new();
    let unique: Vec<u32> = pages.iter().copied().filter(|p| seen.insert(*p)).collect();
    for &page in &unique {
        check_page(page, total)?;
    }

    let selected: Vec<ObjectId> = unique.iter().map(|&p| ids[(p - 1) as usize]).collect();
    write_pages(&doc, &selected, output)?;
    Ok(unique)
}

/// `order` must be a permutation of `1..=page_count`
#[instrument(skip_all, fields(input = %input.display()))]
pub fn reorder_pages(input: &Path, order: &[u32], output: &Path) -> ServiceResult<()> {
    let doc = load(input)?;
    let ids = page_ids(&doc);
    let total = ids.len() as u32;

    let mut sorted = order.to_vec();
    sorted.sort_unstable();
    if sorted != (1..=total).collect::<Vec<_>>() {
        return Err(ServiceError::invalid(format!(
            "Page order must list every page 1..={} exactly once",
            total
        )));
    }

    let selected: Vec<ObjectId> = order.iter().map(|&p| ids[(p - 1) as usize]).collect();
    write_pages(&doc, &selected, output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::testing::sample_pdf;

    fn page_texts(path: &Path) -> Vec<String> {
        let doc = Document::load(path).unwrap();
        let pages = doc.get_pages();
        pages
            .keys()
            .map(|n| doc.extract_text(&[*n]).unwrap().trim().to_string())
            .collect()
    }

    #[test]
    fn test_merge_keeps_order_and_inherited_resources() {
        let dir = tempfile::tempdir().unwrap();
        let a = sample_pdf(dir.path(), "a.pdf", 2);
        let b = sample_pdf(dir.path(), "b.pdf", 1);
        let out = dir.path().join("merged.pdf");

        assert_eq!(merge(&[a, b], &out).unwrap(), 3);

        let doc = Document::load(&out).unwrap();
        for id in page_ids(&doc) {
            let page = doc.get_dictionary(id).unwrap();
            assert!(page.has(b"Resources"));
            assert!(page.has(b"MediaBox"));
        }
        let texts = page_texts(&out);
        assert!(texts[0].contains("Page 1"));
        assert!(texts[1].contains("Page 2"));
        assert!(texts[2].contains("Page 1"));
    }

    #[test]
    fn test_merge_requires_two_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let a = sample_pdf(dir.path(), "a.pdf", 1);
        assert!(matches!(
            merge(&[a], &dir.path().join("out.pdf")),
            Err(ServiceError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn test_split_by_ranges_and_per_page() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample_pdf(dir.path(), "doc.pdf", 4);
        let out_dir = tempfile::tempdir().unwrap();

        let outputs = split(&input, &[(1, 2), (3, 4)], out_dir.path()).unwrap();
        assert_eq!(outputs.len(), 2);
        assert!(outputs[0].ends_with("doc_pages_1-2.pdf"));
        assert_eq!(crate::pdf::page_count(&outputs[1]).unwrap(), 2);

        let per_page = split(&input, &[], out_dir.path()).unwrap();
        assert_eq!(per_page.len(), 4);
        assert!(per_page[3].ends_with("doc_pages_4-4.pdf"));
    }

    #[test]
    fn test_split_rejects_bad_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample_pdf(dir.path(), "doc.pdf", 2);
        assert!(split(&input, &[(2, 1)], dir.path()).is_err());
        assert!(matches!(
            split(&input, &[(1, 3)], dir.path()),
            Err(ServiceError::Processing(ProcessingError::PageOutOfRange { .. }))
        ));
    }

    #[test]
    fn test_rotate_accumulates_and_wraps() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample_pdf(dir.path(), "doc.pdf", 2);
        let once = dir.path().join("once.pdf");
        let twice = dir.path().join("twice.pdf");

        rotate(&input, &HashMap::from([(1, 270)]), &once).unwrap();
        rotate(&once, &HashMap::from([(1, 180), (2, -90)]), &twice).unwrap();

        let info = crate::pdf::info(&twice).unwrap();
        assert_eq!(info.pages[0].rotation, 90);
        assert_eq!(info.pages[1].rotation, 270);
        // input untouched
        assert_eq!(crate::pdf::info(&input).unwrap().pages[0].rotation, 0);
    }

    #[test]
    fn test_rotate_rejects_odd_angles() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample_pdf(dir.path(), "doc.pdf", 1);
        let out = dir.path().join("out.pdf");
        assert!(rotate(&input, &HashMap::from([(1, 45)]), &out).is_err());
        assert!(rotate(&input, &HashMap::from([(2, 90)]), &out).is_err());
    }

    #[test]
    fn test_extract_pages_dedups_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample_pdf(dir.path(), "doc.pdf", 3);
        let out = dir.path().join("out.pdf");

        let kept = extract_pages(&input, &[3, 1, 3], &out).unwrap();
        assert_eq!(kept, vec![3, 1]);
        let texts = page_texts(&out);
        assert_eq!(texts.len(), 2);
        assert!(texts[0].contains("Page 3"));
        assert!(texts[1].contains("Page 1"));
    }

    #[test]
    fn test_reorder_requires_permutation() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample_pdf(dir.path(), "doc.pdf", 3);
        let out = dir.path().join("out.pdf");

        assert!(reorder_pages(&input, &[1, 2], &out).is_err());
        assert!(reorder_pages(&input, &[1, 1, 2], &out).is_err());

        reorder_pages(&input, &[3, 2, 1], &out).unwrap();
        assert!(page_texts(&out)[0].contains("Page 3"));
    }
}
