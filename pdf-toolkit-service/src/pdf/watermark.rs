//! Text and image watermarks.
//!
//! Each page gets its original content wrapped in `q`/`Q` followed by a new
//! stream that draws the mark through an alpha ExtGState.

use std::path::{Path, PathBuf};

use image::GenericImageView;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat, dictionary};
use serde_json::json;
use tracing::{info, instrument};

use super::{load, media_box, resolve, save};
use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::operation::OperationResult;

const MARGIN: f32 = 36.0;
const MAX_IMAGE_WIDTH_RATIO: f32 = 0.3;
const GS_NAME: &str = "GSwm0";
const FONT_NAME: &str = "FWm0";
const IMAGE_NAME: &str = "ImWm0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Center,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Top,
    Bottom,
    Diagonal,
}

impl Position {
    pub fn parse(name: &str) -> ServiceResult<Self> {
        match name.to_ascii_lowercase().replace('_', "-").as_str() {
            "center" | "centre" => Ok(Self::Center),
            "top-left" => Ok(Self::TopLeft),
            "top-right" => Ok(Self::TopRight),
            "bottom-left" => Ok(Self::BottomLeft),
            "bottom-right" => Ok(Self::BottomRight),
            "top" => Ok(Self::Top),
            "bottom" => Ok(Self::Bottom),
            "diagonal" => Ok(Self::Diagonal),
            other => Err(ServiceError::invalid(format!(
                "Unknown watermark position '{}'",
                other
            ))),
        }
    }

    /// Lower-left corner for a box of `w`×`h` inside `page` = [llx, lly, urx, ury]
    fn anchor(self, page: [f32; 4], w: f32, h: f32) -> (f32, f32) {
        let [llx, lly, urx, ury] = page;
        let cx = (llx + urx - w) / 2.0;
        let cy = (lly + ury - h) / 2.0;
        match self {
            Self::Center | Self::Diagonal => (cx, cy),
            Self::TopLeft => (llx + MARGIN, ury - MARGIN - h),
            Self::TopRight => (urx - MARGIN - w, ury - MARGIN - h),
            Self::BottomLeft => (llx + MARGIN, lly + MARGIN),
            Self::BottomRight => (urx - MARGIN - w, lly + MARGIN),
            Self::Top => (cx, ury - MARGIN - h),
            Self::Bottom => (cx, lly + MARGIN),
        }
    }
}

#[derive(Debug, Clone)]
pub enum WatermarkContent {
    Text(String),
    Image(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Watermark {
    pub content: WatermarkContent,
    pub position: Position,
    pub opacity: f32,
}

impl Watermark {
    /// Exactly one of `text` and `image` must be given
    pub fn new(
        text: Option<String>,
        image: Option<PathBuf>,
        position: Position,
        opacity: f32,
    ) -> ServiceResult<Self> {
        if !(0.0..=1.0).contains(&opacity) {
            return Err(ServiceError::invalid("Opacity must be between 0 and 1"));
        }
        let content = match (text.filter(|t| !t.trim().is_empty()), image) {
            (Some(text), None) => WatermarkContent::Text(text),
            (None, Some(path)) => WatermarkContent::Image(path),
            _ => {
                return Err(ServiceError::invalid(
                    "Provide exactly one of watermark text or image",
                ));
            }
        };
        Ok(Self {
            content,
            position,
            opacity,
        })
    }
}

/// Helvetica is WinAnsi; characters outside Latin-1 become '?'
fn latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| if (c as u32) < 256 { c as u8 } else { b'?' })
        .collect()
}

fn text_operations(text: &str, page: [f32; 4], position: Position) -> Vec<Operation> {
    let page_w = page[2] - page[0];
    let chars = text.chars().count().max(1) as f32;
    // Helvetica averages about half an em per glyph
    let size = (page_w * 0.6 / (chars * 0.5)).clamp(12.0, 72.0);
    let text_w = chars * size * 0.5;

    let (x, y, a, b) = if position == Position::Diagonal {
        let (s, c) = std::f32::consts::FRAC_PI_4.sin_cos();
        let cx = (page[0] + page[2]) / 2.0;
        let cy = (page[1] + page[3]) / 2.0;
        (cx - text_w / 2.0 * c, cy - text_w / 2.0 * s, c, s)
    } else {
        let (x, y) = position.anchor(page, text_w, size);
        (x, y, 1.0, 0.0)
    };

    vec![
        Operation::new("q", vec![]),
        Operation::new("gs", vec![Object::Name(GS_NAME.into())]),
        Operation::new("g", vec![Object::Real(0.5)]),
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![Object::Name(FONT_NAME.into()), Object::Real(size)]),
        Operation::new(
            "Tm",
            vec![
                Object::Real(a),
                Object::Real(b),
                Object::Real(-b),
                Object::Real(a),
                Object::Real(x),
                Object::Real(y),
            ],
        ),
        Operation::new(
            "Tj",
            vec![Object::String(latin1(text), StringFormat::Literal)],
        ),
        Operation::new("ET", vec![]),
        Operation::new("Q", vec![]),
    ]
}

fn image_operations(size: (u32, u32), page: [f32; 4], position: Position) -> Vec<Operation> {
    let page_w = page[2] - page[0];
    let (img_w, img_h) = (size.0.max(1) as f32, size.1.max(1) as f32);
    let draw_w = img_w.min(page_w * MAX_IMAGE_WIDTH_RATIO);
    let draw_h = draw_w * img_h / img_w;
    let (x, y) = position.anchor(page, draw_w, draw_h);

    vec![
        Operation::new("q", vec![]),
        Operation::new("gs", vec![Object::Name(GS_NAME.into())]),
        Operation::new(
            "cm",
            vec![
                Object::Real(draw_w),
                0.into(),
                0.into(),
                Object::Real(draw_h),
                Object::Real(x),
                Object::Real(y),
            ],
        ),
        Operation::new("Do", vec![Object::Name(IMAGE_NAME.into())]),
        Operation::new("Q", vec![]),
    ]
}

/// Embed an image file as an XObject; returns its id and pixel size
fn embed_image(doc: &mut Document, path: &Path) -> ServiceResult<(ObjectId, (u32, u32))> {
    let image = image::open(path).map_err(|e| ProcessingError::UnsupportedFormat {
        format: format!("watermark image: {}", e),
    })?;
    let (width, height) = image.dimensions();

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width as i64,
        "Height" => height as i64,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
    };

    if image.color().has_alpha() {
        let alpha: Vec<u8> = image.to_rgba8().pixels().map(|p| p.0[3]).collect();
        let mut mask = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            alpha,
        );
        let _ = mask.compress();
        let mask_id = doc.add_object(mask);
        dict.set("SMask", Object::Reference(mask_id));
    }

    let mut stream = Stream::new(dict, image.to_rgb8().into_raw());
    let _ = stream.compress();
    Ok((doc.add_object(stream), (width, height)))
}

/// Inline copy of the page's effective resources, so edits stay on this page
fn own_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    super::inherited(doc, page_id, b"Resources")
        .and_then(|r| resolve(doc, &r).as_dict().ok().cloned())
        .unwrap_or_default()
}

fn add_resource(doc: &Document, resources: &mut Dictionary, category: &str, name: &str, value: Object) {
    let mut entries = resources
        .get(category.as_bytes())
        .ok()
        .and_then(|o| resolve(doc, o).as_dict().ok().cloned())
        .unwrap_or_default();
    entries.set(name, value);
    resources.set(category, Object::Dictionary(entries));
}

#[instrument(skip_all, fields(input = %input.display(), position = ?watermark.position))]
pub fn add_watermark(input: &Path, output: &Path, watermark: &Watermark) -> ServiceResult<OperationResult> {
    let mut doc = load(input)?;

    let gs_id = doc.add_object(dictionary! {
        "Type" => "ExtGState",
        "ca" => Object::Real(watermark.opacity),
        "CA" => Object::Real(watermark.opacity),
    });
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let image = match &watermark.content {
        WatermarkContent::Image(path) => Some(embed_image(&mut doc, path)?),
        WatermarkContent::Text(_) => None,
    };

    let save_id = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
    let pages = doc.get_pages();
    for (&number, &page_id) in &pages {
        let page_box = media_box(&doc, page_id);
        let mut operations = vec![Operation::new("Q", vec![])];
        operations.extend(match (&watermark.content, image) {
            (WatermarkContent::Text(text), _) => text_operations(text, page_box, watermark.position),
            (WatermarkContent::Image(_), Some((_, size))) => {
                image_operations(size, page_box, watermark.position)
            }
            (WatermarkContent::Image(_), None) => Vec::new(),
        });
        let encoded = Content { operations }
            .encode()
            .map_err(|e| ProcessingError::pdf(format!("page {}: {}", number, e)))?;
        let mark_id = doc.add_object(Stream::new(dictionary! {}, encoded));

        let mut resources = own_resources(&doc, page_id);
        add_resource(&doc, &mut resources, "ExtGState", GS_NAME, Object::Reference(gs_id));
        add_resource(&doc, &mut resources, "Font", FONT_NAME, Object::Reference(font_id));
        if let Some((image_id, _)) = image {
            add_resource(&doc, &mut resources, "XObject", IMAGE_NAME, Object::Reference(image_id));
        }

        let page = doc
            .get_dictionary_mut(page_id)
            .map_err(|e| ProcessingError::pdf(format!("page {}: {}", number, e)))?;
        let mut contents = vec![Object::Reference(save_id)];
        match page.get(b"Contents") {
            Ok(Object::Array(items)) => contents.extend(items.iter().cloned()),
            Ok(other) => contents.push(other.clone()),
            Err(_) => {}
        }
        contents.push(Object::Reference(mark_id));
        page.set("Contents", Object::Array(contents));
        page.set("Resources", Object::Dictionary(resources));
    }

    save(&mut doc, output)?;
    info!(pages = pages.len(), "Watermark applied");

    let kind = match &watermark.content {
        WatermarkContent::Text(_) => "text",
        WatermarkContent::Image(_) => "image",
    };
    Ok(OperationResult::ok(format!("Watermark added to {} pages", pages.len()))
        .with_output(output)
        .with_data(json!({
            "pages": pages.len(),
            "type": kind,
            "opacity": watermark.opacity,
        })))
}
