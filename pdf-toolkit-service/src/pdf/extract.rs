//! Content extraction: text, embedded images, metadata and links.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::{as_number, load, load_any, resolve, stem};
use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::hash::file_sha256;
use crate::operation::OperationResult;

/// Per-page text, in page order. Pages lopdf cannot decode yield empty text and a warning.
pub fn page_texts(doc: &Document) -> (Vec<(u32, String)>, Vec<String>) {
    let mut pages = Vec::new();
    let mut warnings = Vec::new();
    for number in doc.get_pages().keys() {
        match doc.extract_text(&[*number]) {
            Ok(text) => pages.push((*number, text)),
            Err(e) => {
                warnings.push(format!("Page {}: text extraction failed: {}", number, e));
                pages.push((*number, String::new()));
            }
        }
    }
    (pages, warnings)
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Join page texts, with `--- Page N ---` headers when keeping layout
pub fn join_pages(pages: &[(u32, String)], preserve_layout: bool) -> String {
    if preserve_layout {
        pages
            .iter()
            .map(|(n, text)| format!("--- Page {} ---\n{}", n, text.trim_end()))
            .collect::<Vec<_>>()
            .join("\n\n")
    } else {
        pages
            .iter()
            .map(|(_, text)| collapse_whitespace(text))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Full document text as used by conversion and analysis
pub fn document_text(path: &Path) -> ServiceResult<String> {
    let doc = load(path)?;
    let (pages, _) = page_texts(&doc);
    Ok(join_pages(&pages, false))
}

#[instrument(skip_all, fields(input = %input.display(), preserve_layout))]
pub fn extract_text(
    input: &Path,
    preserve_layout: bool,
    output_dir: &Path,
) -> ServiceResult<OperationResult> {
    let doc = load(input)?;
    let (pages, warnings) = page_texts(&doc);
    let text = join_pages(&pages, preserve_layout);

    let output = output_dir.join(format!("{}_text.txt", stem(input)));
    std::fs::write(&output, &text).map_err(ProcessingError::Io)?;

    let characters = text.chars().count();
    let words = text.split_whitespace().count();
    info!(pages = pages.len(), characters, "Extracted text");

    Ok(OperationResult::ok(format!(
        "Extracted text from {} pages",
        pages.len()
    ))
    .with_output(&output)
    .with_warnings(warnings)
    .with_data(json!({
        "pages": pages.len(),
        "characters": characters,
        "words": words,
    })))
}

/// Raster formats accepted for image output
pub fn image_format(name: &str) -> ServiceResult<(ImageFormat, &'static str)> {
    match name.to_ascii_lowercase().as_str() {
        "png" => Ok((ImageFormat::Png, "png")),
        "jpeg" => Ok((ImageFormat::Jpeg, "jpeg")),
        "jpg" => Ok((ImageFormat::Jpeg, "jpg")),
        "tiff" | "tif" => Ok((ImageFormat::Tiff, "tiff")),
        other => Err(ProcessingError::UnsupportedFormat {
            format: other.to_string(),
        }
        .into()),
    }
}

/// Write an image, flattening to RGB for formats without alpha
pub fn save_image(image: &DynamicImage, path: &Path, format: ImageFormat) -> ServiceResult<()> {
    let result = if format == ImageFormat::Jpeg {
        DynamicImage::ImageRgb8(image.to_rgb8()).save_with_format(path, format)
    } else {
        image.save_with_format(path, format)
    };
    result.map_err(|e| {
        ServiceError::Processing(ProcessingError::Conversion {
            message: format!("failed to write {}: {}", path.display(), e),
        })
    })
}

fn filters(stream: &Stream) -> Vec<Vec<u8>> {
    match stream.dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|o| o.as_name().ok().map(<[u8]>::to_vec))
            .collect(),
        _ => Vec::new(),
    }
}

fn color_components(doc: &Document, stream: &Stream) -> Option<u32> {
    let space = stream.dict.get(b"ColorSpace").ok()?;
    match resolve(doc, space) {
        Object::Name(name) => match name.as_slice() {
            b"DeviceRGB" | b"CalRGB" => Some(3),
            b"DeviceGray" | b"CalGray" => Some(1),
            b"DeviceCMYK" => Some(4),
            _ => None,
        },
        // [/ICCBased ref] carries /N on the profile stream
        Object::Array(items) if items.first().and_then(|o| o.as_name().ok()) == Some(&b"ICCBased"[..]) => {
            let profile = items.get(1).map(|o| resolve(doc, o))?;
            let stream = profile.as_stream().ok()?;
            stream.dict.get(b"N").ok()?.as_i64().ok().map(|n| n as u32)
        }
        _ => None,
    }
}

/// Decode an image XObject into pixels
pub(crate) fn decode_image(doc: &Document, stream: &Stream) -> Result<DynamicImage, String> {
    let filters = filters(stream);
    if filters.iter().any(|f| f == b"DCTDecode") {
        return image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg)
            .map_err(|e| format!("JPEG decode failed: {}", e));
    }
    if let Some(other) = filters
        .iter()
        .find(|f| f.as_slice() != b"FlateDecode")
    {
        return Err(format!(
            "unsupported filter {}",
            String::from_utf8_lossy(other)
        ));
    }

    let dim = |key: &[u8]| -> Result<Option<u32>, String> {
        match stream.dict.get(key).ok().and_then(|o| o.as_i64().ok()) {
            Some(v) if v > 0 => u32::try_from(v).map(Some).map_err(|_| {
                format!("/{} {} out of range", String::from_utf8_lossy(key), v)
            }),
            _ => Ok(None),
        }
    };
    let (width, height) = match (dim(b"Width")?, dim(b"Height")?) {
        (Some(w), Some(h)) => (w, h),
        _ => return Err("missing image dimensions".to_string()),
    };
    let bits = dim(b"BitsPerComponent")?.unwrap_or(8);
    if bits != 8 {
        return Err(format!("{}-bit images are not supported", bits));
    }

    let data = if filters.is_empty() {
        stream.content.clone()
    } else {
        stream
            .decompressed_content()
            .map_err(|e| format!("inflate failed: {}", e))?
    };

    let pixels = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| "image too large".to_string())?;
    match color_components(doc, stream) {
        Some(3) => RgbImage::from_raw(width, height, truncate(data, buffer_len(pixels, 3)?)?)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| "pixel buffer size mismatch".to_string()),
        Some(1) => GrayImage::from_raw(width, height, truncate(data, pixels)?)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(|| "pixel buffer size mismatch".to_string()),
        Some(4) => {
            let data = truncate(data, buffer_len(pixels, 4)?)?;
            let rgb: Vec<u8> = data
                .chunks_exact(4)
                .flat_map(|px| {
                    let k = 255 - px[3] as u16;
                    [0, 1, 2].map(|i| ((255 - px[i] as u16) * k / 255) as u8)
                })
                .collect();
            RgbImage::from_raw(width, height, rgb)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| "pixel buffer size mismatch".to_string())
        }
        _ => Err("unsupported color space".to_string()),
    }
}

fn buffer_len(pixels: usize, components: usize) -> Result<usize, String> {
    pixels
        .checked_mul(components)
        .ok_or_else(|| "image too large".to_string())
}

fn truncate(mut data: Vec<u8>, len: usize) -> Result<Vec<u8>, String> {
    if data.len() < len {
        return Err(format!("image data too short ({} < {})", data.len(), len));
    }
    data.truncate(len);
    Ok(data)
}

/// Image XObject streams reachable from a resources dictionary, forms included
pub(crate) fn collect_images<'a>(
    doc: &'a Document,
    resources: &'a Object,
    visited: &mut HashSet<ObjectId>,
    out: &mut Vec<(ObjectId, &'a Stream)>,
) {
    let Ok(resources) = resolve(doc, resources).as_dict() else {
        return;
    };
    let Ok(xobjects) = resources.get(b"XObject").map(|o| resolve(doc, o)) else {
        return;
    };
    let Ok(xobjects) = xobjects.as_dict() else {
        return;
    };

    for (_, value) in xobjects.iter() {
        let Ok(id) = value.as_reference() else {
            continue;
        };
        if !visited.insert(id) {
            continue;
        }
        let Ok(stream) = doc.get_object(id).and_then(|o| o.as_stream()) else {
            continue;
        };
        match stream.dict.get(b"Subtype").and_then(|s| s.as_name()) {
            Ok(b"Image") => out.push((id, stream)),
            Ok(b"Form") => {
                if let Ok(inner) = stream.dict.get(b"Resources") {
                    collect_images(doc, inner, visited, out);
                }
            }
            _ => {}
        }
    }
}

/// Images per page as (page number, object id, stream)
pub(crate) fn page_images(doc: &Document) -> Vec<(u32, ObjectId, &Stream)> {
    let mut visited = HashSet::new();
    let mut result = Vec::new();
    for (number, page_id) in doc.get_pages() {
        let Some(resources) = find_resources(doc, page_id) else {
            continue;
        };
        let mut found = Vec::new();
        collect_images(doc, resources, &mut visited, &mut found);
        result.extend(found.into_iter().map(|(id, s)| (number, id, s)));
    }
    result
}

/// `/Resources` of a page or its nearest ancestor
fn find_resources(doc: &Document, page_id: ObjectId) -> Option<&Object> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    for _ in 0..32 {
        if let Ok(value) = current.get(b"Resources") {
            return Some(value);
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

#[instrument(skip_all, fields(input = %input.display(), format))]
pub fn extract_images(
    input: &Path,
    format: &str,
    output_dir: &Path,
) -> ServiceResult<OperationResult> {
    let (image_format, ext) = image_format(format)?;
    let doc = load(input)?;
    let base = stem(input);

    let mut outputs: Vec<PathBuf> = Vec::new();
    let mut warnings = Vec::new();
    let mut per_page: std::collections::BTreeMap<u32, usize> = Default::default();

    for (page, id, stream) in page_images(&doc) {
        let n = per_page.entry(page).or_insert(0);
        *n += 1;
        match decode_image(&doc, stream) {
            Ok(image) => {
                let path = output_dir.join(format!("{}_page{}_img{}.{}", base, page, n, ext));
                save_image(&image, &path, image_format)?;
                debug!(page, ?id, path = %path.display(), "Saved image");
                outputs.push(path);
            }
            Err(reason) => {
                warn!(page, ?id, %reason, "Skipping image");
                warnings.push(format!("Page {} image {}: {}", page, n, reason));
            }
        }
    }

    let found: usize = per_page.values().sum();
    Ok(OperationResult::ok(format!(
        "Extracted {} of {} images",
        outputs.len(),
        found
    ))
    .with_outputs(&outputs)
    .with_warnings(warnings)
    .with_data(json!({
        "images_found": found,
        "images_extracted": outputs.len(),
        "format": ext,
    })))
}

/// Decode a PDF text string (UTF-16BE with BOM, else PDFDocEncoding as Latin-1)
pub(crate) fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    bytes.iter().map(|&b| b as char).collect()
}

/// Parse `D:YYYYMMDDHHmmSS` (timezone suffix ignored, read as UTC)
pub(crate) fn parse_pdf_date(raw: &str) -> Option<DateTime<Utc>> {
    let digits: String = raw
        .trim_start_matches("D:")
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.len() < 8 {
        return None;
    }
    let padded = format!("{:0<14}", digits.chars().take(14).collect::<String>());
    NaiveDateTime::parse_from_str(&padded, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| dt.and_utc())
}

const INFO_FIELDS: [(&str, &[u8]); 8] = [
    ("title", b"Title"),
    ("author", b"Author"),
    ("subject", b"Subject"),
    ("keywords", b"Keywords"),
    ("creator", b"Creator"),
    ("producer", b"Producer"),
    ("creation_date", b"CreationDate"),
    ("modification_date", b"ModDate"),
];

fn info_dictionary(doc: &Document) -> Option<&Dictionary> {
    let info = doc.trailer.get(b"Info").ok()?;
    resolve(doc, info).as_dict().ok()
}

/// `/Title` from the Info dictionary, when present and non-empty
pub fn document_title(doc: &Document) -> Option<String> {
    let title = info_dictionary(doc)?.get(b"Title").ok()?;
    match resolve(doc, title) {
        Object::String(bytes, _) => {
            Some(decode_text_string(bytes)).filter(|t| !t.trim().is_empty())
        }
        _ => None,
    }
}

#[instrument(skip_all, fields(input = %input.display()))]
pub fn extract_metadata(input: &Path, output_dir: &Path) -> ServiceResult<OperationResult> {
    let doc = load_any(input)?;
    let mut data = serde_json::Map::new();

    let info = info_dictionary(&doc);
    for (field, key) in INFO_FIELDS {
        let value = info
            .and_then(|dict| dict.get(key).ok())
            .and_then(|o| match resolve(&doc, o) {
                Object::String(bytes, _) => Some(decode_text_string(bytes)),
                _ => None,
            });
        let value = match (field, value) {
            ("creation_date" | "modification_date", Some(raw)) => parse_pdf_date(&raw)
                .map(|d| d.to_rfc3339())
                .unwrap_or(raw),
            (_, Some(v)) => v,
            (_, None) => {
                data.insert(field.to_string(), serde_json::Value::Null);
                continue;
            }
        };
        data.insert(field.to_string(), json!(value));
    }

    data.insert("page_count".into(), json!(doc.get_pages().len()));
    data.insert("version".into(), json!(doc.version));
    data.insert("encrypted".into(), json!(doc.is_encrypted()));
    data.insert(
        "file_size".into(),
        json!(std::fs::metadata(input).map_err(ProcessingError::Io)?.len()),
    );
    data.insert(
        "sha256".into(),
        json!(file_sha256(input).map_err(ProcessingError::Io)?),
    );

    let data = serde_json::Value::Object(data);
    let output = output_dir.join(format!("{}_metadata.json", stem(input)));
    let pretty = serde_json::to_string_pretty(&data)
        .map_err(|e| ServiceError::internal(e.to_string()))?;
    std::fs::write(&output, pretty).map_err(ProcessingError::Io)?;

    Ok(OperationResult::ok("Extracted metadata")
        .with_output(&output)
        .with_data(data))
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Link {
    pub page: u32,
    pub uri: String,
    pub rect: Vec<f32>,
}

pub fn links(doc: &Document) -> Vec<Link> {
    let mut links = Vec::new();
    for (page, page_id) in doc.get_pages() {
        let Ok(page_dict) = doc.get_dictionary(page_id) else {
            continue;
        };
        let Ok(annots) = page_dict.get(b"Annots").map(|a| resolve(doc, a)) else {
            continue;
        };
        let Ok(annots) = annots.as_array() else {
            continue;
        };

        for annot in annots {
            let Ok(annot) = resolve(doc, annot).as_dict() else {
                continue;
            };
            if annot.get(b"Subtype").and_then(|s| s.as_name()).ok() != Some(&b"Link"[..]) {
                continue;
            }
            let Some(action) = annot
                .get(b"A")
                .ok()
                .and_then(|a| resolve(doc, a).as_dict().ok())
            else {
                continue;
            };
            let uri = match action.get(b"URI").map(|u| resolve(doc, u)) {
                Ok(Object::String(bytes, _)) => decode_text_string(bytes),
                _ => continue,
            };
            let rect = annot
                .get(b"Rect")
                .ok()
                .and_then(|r| resolve(doc, r).as_array().ok())
                .map(|items| items.iter().filter_map(|o| as_number(resolve(doc, o))).collect())
                .unwrap_or_default();
            links.push(Link { page, uri, rect });
        }
    }
    links
}

#[instrument(skip_all, fields(input = %input.display()))]
pub fn extract_links(input: &Path, output_dir: &Path) -> ServiceResult<OperationResult> {
    let doc = load(input)?;
    let links = links(&doc);

    let output = output_dir.join(format!("{}_links.json", stem(input)));
    let body = serde_json::to_string_pretty(&links)
        .map_err(|e| ServiceError::internal(e.to_string()))?;
    std::fs::write(&output, body).map_err(ProcessingError::Io)?;

    Ok(OperationResult::ok(format!("Found {} links", links.len()))
        .with_output(&output)
        .with_data(json!({ "count": links.len(), "links": links })))
}
