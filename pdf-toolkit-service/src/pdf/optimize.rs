//! Compression, web optimization and size analysis.
//!
//! Structural cleanup happens in lopdf (pruning, stream dedup, JPEG
//! recompression, Flate); the final write goes through qpdf so object
//! streams and linearization are available.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use lopdf::{Document, Object, ObjectId, Stream};
use qpdf::{ObjectStreamMode, QPdf};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use super::security::qpdf_error;
use super::{load, save_to_vec, stem};
use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::hash::bytes_sha256;
use crate::operation::OperationResult;

pub const MIN_LEVEL: u8 = 1;
pub const MAX_LEVEL: u8 = 9;

/// Level the web preset uses
const WEB_LEVEL: u8 = 5;

/// Longest image edge kept at the high preset (150 DPI over a letter page)
const HIGH_MAX_DIMENSION: u32 = 1650;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Light,
    Medium,
    High,
}

/// What a compression level turns on
#[derive(Debug, Clone, Serialize)]
pub struct Preset {
    pub level: u8,
    pub tier: Tier,
    pub image_quality: u8,
    pub deduplicate_streams: bool,
    pub recompress_images: bool,
    pub max_image_dimension: Option<u32>,
    pub remove_metadata: bool,
}

impl Preset {
    pub fn for_level(level: u8) -> ServiceResult<Self> {
        validate_level(level)?;
        let preset = match level {
            1..=3 => Self {
                level,
                tier: Tier::Light,
                image_quality: 90,
                deduplicate_streams: false,
                recompress_images: false,
                max_image_dimension: None,
                remove_metadata: false,
            },
            4..=6 => Self {
                level,
                tier: Tier::Medium,
                image_quality: 80,
                deduplicate_streams: true,
                recompress_images: true,
                max_image_dimension: None,
                remove_metadata: false,
            },
            _ => Self {
                level,
                tier: Tier::High,
                image_quality: 70,
                deduplicate_streams: true,
                recompress_images: true,
                max_image_dimension: Some(HIGH_MAX_DIMENSION),
                remove_metadata: true,
            },
        };
        Ok(preset)
    }
}

pub fn validate_level(level: u8) -> ServiceResult<()> {
    if !(MIN_LEVEL..=MAX_LEVEL).contains(&level) {
        return Err(ServiceError::invalid(format!(
            "Compression level must be between {} and {}",
            MIN_LEVEL, MAX_LEVEL
        )));
    }
    Ok(())
}

/// Typical size ratio (original / compressed) per level
pub fn estimated_ratio(level: u8) -> f64 {
    match level {
        1 => 1.1,
        2 => 1.2,
        3 => 1.4,
        4 => 1.6,
        5 => 1.8,
        6 => 2.0,
        7 => 2.3,
        8 => 2.6,
        9 => 3.0,
        _ => 1.8,
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn size_data(original: u64, compressed: u64) -> Value {
    let ratio = if compressed > 0 {
        original as f64 / compressed as f64
    } else {
        1.0
    };
    let reduction = if original > 0 {
        (original as f64 - compressed as f64) / original as f64 * 100.0
    } else {
        0.0
    };
    json!({
        "original_size": original,
        "compressed_size": compressed,
        "compression_ratio": round2(ratio),
        "size_reduction_percent": round1(reduction),
    })
}

fn replace_references(object: &mut Object, map: &HashMap<ObjectId, ObjectId>) {
    match object {
        Object::Reference(id) => {
            if let Some(target) = map.get(id) {
                *id = *target;
            }
        }
        Object::Array(items) => items.iter_mut().for_each(|o| replace_references(o, map)),
        Object::Dictionary(dict) => dict
            .iter_mut()
            .for_each(|(_, o)| replace_references(o, map)),
        Object::Stream(stream) => stream
            .dict
            .iter_mut()
            .for_each(|(_, o)| replace_references(o, map)),
        _ => {}
    }
}

/// Point every reference to a byte-identical stream at its first copy
fn deduplicate_streams(doc: &mut Document) -> usize {
    let mut first_seen: HashMap<String, ObjectId> = HashMap::new();
    let mut duplicates: HashMap<ObjectId, ObjectId> = HashMap::new();

    for (&id, object) in &doc.objects {
        let Object::Stream(stream) = object else {
            continue;
        };
        let mut fingerprint = format!("{:?}", stream.dict).into_bytes();
        fingerprint.push(0);
        fingerprint.extend_from_slice(&stream.content);
        let key = bytes_sha256(&fingerprint);
        match first_seen.get(&key) {
            Some(&original) => {
                duplicates.insert(id, original);
            }
            None => {
                first_seen.insert(key, id);
            }
        }
    }

    if duplicates.is_empty() {
        return 0;
    }
    for object in doc.objects.values_mut() {
        replace_references(object, &duplicates);
    }
    for (_, value) in doc.trailer.iter_mut() {
        replace_references(value, &duplicates);
    }
    for id in duplicates.keys() {
        doc.objects.remove(id);
    }
    duplicates.len()
}

fn is_dct(stream: &Stream) -> bool {
    match stream.dict.get(b"Filter") {
        Ok(Object::Name(name)) => name == b"DCTDecode",
        Ok(Object::Array(items)) => {
            items.len() == 1 && matches!(&items[0], Object::Name(n) if n == b"DCTDecode")
        }
        _ => false,
    }
}

fn encode_jpeg(image: &DynamicImage, gray: bool, quality: u8) -> Option<Vec<u8>> {
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    let written = if gray {
        image.to_luma8().write_with_encoder(encoder)
    } else {
        image.to_rgb8().write_with_encoder(encoder)
    };
    written.ok().map(|_| buffer)
}

/// Re-encode 8-bit RGB/Gray JPEG images; keeps whichever encoding is smaller
fn recompress_images(doc: &mut Document, quality: u8, max_dimension: Option<u32>) -> usize {
    let mut recompressed = 0;
    for (id, object) in doc.objects.iter_mut() {
        let Object::Stream(stream) = object else {
            continue;
        };
        let is_image = stream
            .dict
            .get(b"Subtype")
            .and_then(Object::as_name)
            .is_ok_and(|s| s == b"Image");
        if !is_image || !is_dct(stream) {
            continue;
        }
        if stream.dict.get(b"BitsPerComponent").and_then(Object::as_i64).ok() != Some(8) {
            continue;
        }
        let gray = match stream.dict.get(b"ColorSpace").and_then(Object::as_name) {
            Ok(b"DeviceRGB") => false,
            Ok(b"DeviceGray") => true,
            _ => continue,
        };

        let Ok(mut image) =
            image::load_from_memory_with_format(&stream.content, image::ImageFormat::Jpeg)
        else {
            debug!(object = ?id, "Skipping undecodable JPEG");
            continue;
        };
        // A soft mask must keep the image's pixel grid
        let has_mask = stream.dict.has(b"SMask");
        if let Some(max) = max_dimension
            && !has_mask
            && image.width().max(image.height()) > max
        {
            image = image.resize(max, max, image::imageops::FilterType::Lanczos3);
        }

        let Some(encoded) = encode_jpeg(&image, gray, quality) else {
            continue;
        };
        if encoded.len() < stream.content.len() {
            stream.dict.set("Width", image.width() as i64);
            stream.dict.set("Height", image.height() as i64);
            stream.set_content(encoded);
            recompressed += 1;
        }
    }
    recompressed
}

fn remove_metadata(doc: &mut Document) {
    doc.trailer.remove(b"Info");
    if let Ok(root) = doc.trailer.get(b"Root").and_then(Object::as_reference)
        && let Ok(catalog) = doc.get_dictionary_mut(root)
    {
        catalog.remove(b"Metadata");
    }
    doc.prune_objects();
}

/// Rewrite through qpdf with generated object streams, optionally linearized
fn qpdf_rewrite(bytes: &[u8], linearize: bool) -> ServiceResult<Vec<u8>> {
    let pdf = QPdf::read_from_memory(bytes).map_err(qpdf_error)?;
    let mut writer = pdf.writer();
    writer
        .compress_streams(true)
        .object_stream_mode(ObjectStreamMode::Generate)
        .linearize(linearize);
    writer.write_to_memory().map_err(qpdf_error)
}

/// Result of applying a preset, before anything is written
struct Optimized {
    bytes: Vec<u8>,
    applied: Vec<String>,
    warnings: Vec<String>,
}

fn apply_preset(
    input: &Path,
    preset: &Preset,
    optimize_images: bool,
    linearize: bool,
) -> ServiceResult<Optimized> {
    let mut doc = load(input)?;
    let mut applied = Vec::new();
    let mut warnings = Vec::new();

    let pruned = doc.prune_objects().len();
    let empty = doc.delete_zero_length_streams().len();
    applied.push(format!(
        "Removed {} unreferenced objects and {} empty streams",
        pruned, empty
    ));

    if preset.deduplicate_streams {
        let merged = deduplicate_streams(&mut doc);
        applied.push(format!("Merged {} duplicate streams", merged));
    }
    if optimize_images && preset.recompress_images {
        let count = recompress_images(&mut doc, preset.image_quality, preset.max_image_dimension);
        applied.push(format!(
            "Recompressed {} images at quality {}",
            count, preset.image_quality
        ));
    }
    if preset.remove_metadata {
        remove_metadata(&mut doc);
        applied.push("Removed document metadata".to_string());
    }
    doc.compress();

    let bytes = save_to_vec(&mut doc)?;
    let bytes = match qpdf_rewrite(&bytes, linearize) {
        Ok(rewritten) => {
            applied.push(if linearize {
                "Linearized for progressive loading".to_string()
            } else {
                "Packed objects into object streams".to_string()
            });
            rewritten
        }
        Err(e) if !linearize => {
            warn!(error = %e, "qpdf rewrite failed; keeping lopdf output");
            warnings.push(format!("Object stream packing skipped: {}", e));
            bytes
        }
        Err(e) => return Err(e),
    };

    Ok(Optimized {
        bytes,
        applied,
        warnings,
    })
}

fn write_output(output: &Path, bytes: &[u8]) -> ServiceResult<()> {
    std::fs::write(output, bytes).map_err(ProcessingError::Io)?;
    Ok(())
}

#[instrument(skip_all, fields(input = %input.display(), level))]
pub fn compress(
    input: &Path,
    output_dir: &Path,
    level: u8,
    optimize_images: bool,
    image_quality: Option<u8>,
) -> ServiceResult<OperationResult> {
    let mut preset = Preset::for_level(level)?;
    if let Some(quality) = image_quality {
        if !(1..=100).contains(&quality) {
            return Err(ServiceError::invalid("Image quality must be between 1 and 100"));
        }
        preset.image_quality = quality;
    }

    let original = std::fs::read(input).map_err(ProcessingError::Io)?;
    let optimized = apply_preset(input, &preset, optimize_images, false)?;
    let output = output_dir.join(format!("{}_compressed_L{}.pdf", stem(input), level));

    let mut warnings = optimized.warnings;
    let final_size = if optimized.bytes.len() < original.len() {
        write_output(&output, &optimized.bytes)?;
        optimized.bytes.len()
    } else {
        warnings.push("Compression did not reduce the file size; original kept".to_string());
        write_output(&output, &original)?;
        original.len()
    };

    let mut data = size_data(original.len() as u64, final_size as u64);
    data["compression_level"] = json!(level);
    data["optimizations_applied"] = json!(optimized.applied);
    info!(
        original = original.len(),
        compressed = final_size,
        "Compressed PDF"
    );

    Ok(OperationResult::ok(format!(
        "PDF compressed. Size reduced by {:.1}%",
        data["size_reduction_percent"].as_f64().unwrap_or(0.0)
    ))
    .with_output(&output)
    .with_warnings(warnings)
    .with_data(data))
}

#[instrument(skip_all, fields(input = %input.display()))]
pub fn optimize_for_web(input: &Path, output_dir: &Path) -> ServiceResult<OperationResult> {
    let preset = Preset::for_level(WEB_LEVEL)?;
    let original_size = std::fs::metadata(input).map_err(ProcessingError::Io)?.len();
    let optimized = apply_preset(input, &preset, true, true)?;
    let output = output_dir.join(format!("{}_web_optimized.pdf", stem(input)));
    write_output(&output, &optimized.bytes)?;

    let mut data = size_data(original_size, optimized.bytes.len() as u64);
    data["linearized"] = json!(true);
    data["optimizations_applied"] = json!(optimized.applied);
    info!(
        original = original_size,
        optimized = optimized.bytes.len(),
        "Optimized PDF for web"
    );

    Ok(OperationResult::ok(format!(
        "PDF optimized for web. Size reduced by {:.1}%, linearized for fast loading",
        data["size_reduction_percent"].as_f64().unwrap_or(0.0)
    ))
    .with_output(&output)
    .with_warnings(optimized.warnings)
    .with_data(data))
}

#[derive(Debug, Clone, Serialize)]
pub struct SizeAnalysis {
    pub file_size: u64,
    pub page_count: usize,
    pub image_count: usize,
    pub image_bytes: u64,
    pub font_count: usize,
    pub stream_count: usize,
    pub has_text: bool,
    pub complexity: &'static str,
    /// Estimated compressed size per level
    pub estimated_sizes: BTreeMap<u8, u64>,
}

fn complexity(image_count: usize, page_count: usize) -> &'static str {
    if image_count > 20 {
        "high"
    } else if image_count > 5 || page_count > 50 {
        "medium"
    } else {
        "low"
    }
}

pub fn analyze(input: &Path) -> ServiceResult<SizeAnalysis> {
    let doc = load(input)?;
    let file_size = std::fs::metadata(input).map_err(ProcessingError::Io)?.len();

    let mut image_count = 0;
    let mut image_bytes = 0u64;
    let mut font_count = 0;
    let mut stream_count = 0;
    for object in doc.objects.values() {
        match object {
            Object::Stream(stream) => {
                stream_count += 1;
                if stream.dict.get(b"Subtype").and_then(Object::as_name).ok() == Some(&b"Image"[..]) {
                    image_count += 1;
                    image_bytes += stream.content.len() as u64;
                }
            }
            Object::Dictionary(dict) => {
                if dict.get(b"Type").and_then(Object::as_name).ok() == Some(&b"Font"[..]) {
                    font_count += 1;
                }
            }
            _ => {}
        }
    }

    let pages: Vec<u32> = doc.get_pages().into_keys().collect();
    let has_text = pages.iter().any(|&p| {
        doc.extract_text(&[p])
            .is_ok_and(|t| t.chars().any(char::is_alphanumeric))
    });
    let estimated_sizes = (MIN_LEVEL..=MAX_LEVEL)
        .map(|level| (level, (file_size as f64 / estimated_ratio(level)) as u64))
        .collect();

    Ok(SizeAnalysis {
        file_size,
        page_count: pages.len(),
        image_count,
        image_bytes,
        font_count,
        stream_count,
        has_text,
        complexity: complexity(image_count, pages.len()),
        estimated_sizes,
    })
}

/// Estimate for one level without writing anything
pub fn preview(input: &Path, level: u8) -> ServiceResult<Value> {
    let preset = Preset::for_level(level)?;
    let analysis = analyze(input)?;
    let ratio = estimated_ratio(level);
    let estimated_size = (analysis.file_size as f64 / ratio) as u64;
    let reduction = if analysis.file_size > 0 {
        (analysis.file_size - estimated_size) as f64 / analysis.file_size as f64 * 100.0
    } else {
        0.0
    };

    Ok(json!({
        "original_size": analysis.file_size,
        "page_count": analysis.page_count,
        "compression_level": level,
        "estimated_compression_ratio": ratio,
        "estimated_size": estimated_size,
        "estimated_size_reduction_percent": round1(reduction),
        "preset": preset,
        "document_analysis": analysis,
    }))
}

/// Estimates for several levels plus recommendations
pub fn comparison(input: &Path, levels: &[u8]) -> ServiceResult<Value> {
    let mut comparisons = Vec::new();
    for &level in levels {
        if validate_level(level).is_err() {
            continue;
        }
        let preview = preview(input, level)?;
        comparisons.push(json!({
            "compression_level": level,
            "estimated_size": preview["estimated_size"],
            "estimated_reduction_percent": preview["estimated_size_reduction_percent"],
            "compression_ratio": preview["estimated_compression_ratio"],
        }));
    }

    let reduction = |entry: &Value| {
        entry["estimated_reduction_percent"]
            .as_f64()
            .unwrap_or(0.0)
    };
    let mut recommendations = Vec::new();
    if let Some(best) = comparisons.iter().max_by(|a, b| {
        a["compression_ratio"]
            .as_f64()
            .partial_cmp(&b["compression_ratio"].as_f64())
            .unwrap_or(std::cmp::Ordering::Equal)
    }) {
        recommendations.push(format!(
            "Best compression: Level {} ({:.1}% reduction)",
            best["compression_level"],
            reduction(best)
        ));
    }
    for (level, label) in [(5, "Balanced option"), (6, "Web optimal")] {
        if let Some(entry) = comparisons.iter().find(|c| c["compression_level"] == level) {
            recommendations.push(format!(
                "{}: Level {} ({:.1}% reduction)",
                label,
                level,
                reduction(entry)
            ));
        }
    }

    let original_size = std::fs::metadata(input).map_err(ProcessingError::Io)?.len();
    Ok(json!({
        "original_size": original_size,
        "comparisons": comparisons,
        "recommendations": recommendations,
    }))
}
