//! Typed parameters for each operation.
//!
//! API handlers and batch jobs both hand the executor a JSON object; it is
//! parsed here into the struct for the operation and range-checked before any
//! file is touched.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::ai::{DEFAULT_SUMMARY_WORDS, validate_summary_length};
use crate::convert::{DEFAULT_DPI, DEFAULT_JPEG_QUALITY, validate_render_options};
use crate::error::{ServiceError, ServiceResult};
use crate::operation::Operation;
use crate::pdf::pages::PageRange;
use crate::pdf::render::{MAX_DPI, MIN_DPI};

/// Deserialize `parameters` for `operation`; `null` reads as `{}`
pub fn parse<T: DeserializeOwned>(operation: Operation, parameters: &Value) -> ServiceResult<T> {
    let value = match parameters {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(value)
        .map_err(|e| ServiceError::invalid(format!("Invalid parameters for {}: {}", operation, e)))
}

fn yes() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct MergeParams {
    #[serde(default)]
    pub output_filename: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SplitParams {
    #[serde(default)]
    pub page_ranges: Vec<PageRange>,
}

#[derive(Debug, Deserialize)]
pub struct RotateParams {
    pub page_rotations: HashMap<u32, i64>,
}

#[derive(Debug, Deserialize)]
pub struct ExtractPagesParams {
    pub pages: Vec<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ReorderParams {
    pub page_order: Vec<u32>,
}

#[derive(Debug, Deserialize)]
pub struct TextParams {
    #[serde(default = "yes")]
    pub preserve_layout: bool,
}

/// `output_format` with a per-operation default
#[derive(Debug, Default, Deserialize)]
pub struct FormatParams {
    #[serde(default)]
    pub output_format: Option<String>,
}

impl FormatParams {
    pub fn format_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.output_format
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or(default)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct OcrParams {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub dpi: Option<u32>,
}

impl OcrParams {
    pub fn dpi_or(&self, default: u32) -> ServiceResult<u32> {
        let dpi = self.dpi.unwrap_or(default);
        if !(MIN_DPI..=MAX_DPI).contains(&dpi) {
            return Err(ServiceError::invalid(format!(
                "DPI must be between {} and {}",
                MIN_DPI, MAX_DPI
            )));
        }
        Ok(dpi)
    }
}

#[derive(Debug, Deserialize)]
pub struct ToImagesParams {
    #[serde(default = "default_image_format")]
    pub output_format: String,
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default)]
    pub dpi: Option<u32>,
}

fn default_image_format() -> String {
    "png".to_string()
}

fn default_quality() -> u8 {
    DEFAULT_JPEG_QUALITY
}

impl ToImagesParams {
    pub fn validated_dpi(&self) -> ServiceResult<u32> {
        let dpi = self.dpi.unwrap_or(DEFAULT_DPI);
        validate_render_options(dpi, self.quality)?;
        Ok(dpi)
    }
}

#[derive(Debug, Deserialize)]
pub struct AddPasswordParams {
    pub user_password: String,
    #[serde(default)]
    pub owner_password: Option<String>,
    #[serde(default)]
    pub permissions: Option<BTreeMap<String, bool>>,
}

#[derive(Debug, Deserialize)]
pub struct RemovePasswordParams {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct PermissionsParams {
    pub permissions: BTreeMap<String, bool>,
    #[serde(default)]
    pub owner_password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WatermarkParams {
    #[serde(default)]
    pub watermark_text: Option<String>,
    /// File id of an uploaded image
    #[serde(default)]
    pub watermark_image_id: Option<String>,
    #[serde(default = "default_position")]
    pub position: String,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
}

fn default_position() -> String {
    "center".to_string()
}

fn default_opacity() -> f32 {
    0.5
}

pub const MIN_COMPRESSION_LEVEL: u8 = 1;
pub const MAX_COMPRESSION_LEVEL: u8 = 5;

#[derive(Debug, Deserialize)]
pub struct CompressParams {
    #[serde(default = "default_compression_level")]
    pub compression_level: u8,
    #[serde(default = "yes")]
    pub optimize_images: bool,
    #[serde(default = "default_image_quality")]
    pub image_quality: u8,
}

fn default_compression_level() -> u8 {
    3
}

fn default_image_quality() -> u8 {
    85
}

impl CompressParams {
    pub fn validate(&self) -> ServiceResult<()> {
        if !(MIN_COMPRESSION_LEVEL..=MAX_COMPRESSION_LEVEL).contains(&self.compression_level) {
            return Err(ServiceError::invalid(format!(
                "Compression level must be between {} and {}",
                MIN_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL
            )));
        }
        if !(1..=100).contains(&self.image_quality) {
            return Err(ServiceError::invalid("Image quality must be between 1 and 100"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct SummarizeParams {
    #[serde(default = "default_summary_length")]
    pub summary_length: u32,
}

fn default_summary_length() -> u32 {
    DEFAULT_SUMMARY_WORDS
}

impl SummarizeParams {
    pub fn validate(&self) -> ServiceResult<()> {
        validate_summary_length(self.summary_length)
    }
}
