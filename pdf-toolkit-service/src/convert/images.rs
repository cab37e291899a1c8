//! PDF pages to raster images and back.

use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use printpdf::{
    Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, PdfWarnMsg, Pt, RawImage, RawImageData,
    RawImageFormat, XObjectTransform,
};
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::operation::OperationResult;
use crate::pdf::extract::{image_format, save_image};
use crate::pdf::render::render_pages;
use crate::pdf::stem;

fn conversion_error(message: impl std::fmt::Display) -> ServiceError {
    ProcessingError::Conversion {
        message: message.to_string(),
    }
    .into()
}

/// Formats `convert_image` can read and write
pub fn raster_format(name: &str) -> ServiceResult<(ImageFormat, &'static str)> {
    match name.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "bmp" => Ok((ImageFormat::Bmp, "bmp")),
        "gif" => Ok((ImageFormat::Gif, "gif")),
        "webp" => Ok((ImageFormat::WebP, "webp")),
        other => image_format(other),
    }
}

fn write_jpeg(image: &DynamicImage, path: &Path, quality: u8) -> ServiceResult<()> {
    let file = std::fs::File::create(path).map_err(ProcessingError::Io)?;
    let encoder = JpegEncoder::new_with_quality(std::io::BufWriter::new(file), quality);
    image
        .to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|e| conversion_error(format!("failed to write {}: {}", path.display(), e)))
}

#[instrument(skip_all, fields(input = %input.display(), format, dpi))]
pub fn pdf_to_images(
    input: &Path,
    output_dir: &Path,
    format: &str,
    dpi: u32,
    quality: u8,
) -> ServiceResult<OperationResult> {
    let (format, ext) = image_format(format)?;
    let name = stem(input);
    let mut outputs = Vec::new();

    let pages = render_pages(input, dpi, |page, image| {
        let path = output_dir.join(format!("{}_page_{}.{}", name, page, ext));
        if format == ImageFormat::Jpeg {
            write_jpeg(&image, &path, quality)?;
        } else {
            save_image(&image, &path, format)?;
        }
        outputs.push(path);
        Ok(())
    })?;

    info!(pages, "Converted PDF pages to images");
    Ok(
        OperationResult::ok(format!("Converted {} pages to {}", pages, ext))
            .with_outputs(&outputs)
            .with_data(json!({
                "pages": pages,
                "format": ext,
                "dpi": dpi,
            })),
    )
}

/// One page per image, each page the image's size at 72 DPI
#[instrument(skip_all, fields(images = inputs.len()))]
pub fn images_to_pdf(inputs: &[PathBuf], output: &Path) -> ServiceResult<OperationResult> {
    if inputs.is_empty() {
        return Err(ServiceError::invalid("At least one image is required"));
    }

    let mut doc = PdfDocument::new(&stem(output));
    let mut pages = Vec::with_capacity(inputs.len());
    for path in inputs {
        let decoded = image::open(path).map_err(|e| ProcessingError::UnsupportedFormat {
            format: format!("{}: {}", path.display(), e),
        })?;
        let (width, height) = (decoded.width(), decoded.height());
        let raw = RawImage {
            pixels: RawImageData::U8(decoded.to_rgb8().into_raw()),
            width: width as usize,
            height: height as usize,
            data_format: RawImageFormat::RGB8,
            tag: Vec::new(),
        };
        let id = doc.add_image(&raw);

        let ops = vec![Op::UseXobject {
            id,
            transform: XObjectTransform {
                translate_x: Some(Pt(0.0)),
                translate_y: Some(Pt(0.0)),
                scale_x: None,
                scale_y: None,
                dpi: Some(72.0),
                rotate: None,
            },
        }];
        let to_mm = |points: u32| Mm(points as f32 * 25.4 / 72.0);
        pages.push(PdfPage::new(to_mm(width), to_mm(height), ops));
        debug!(image = %path.display(), width, height, "Added image page");
    }

    let count = pages.len();
    doc.with_pages(pages);
    let mut warnings: Vec<PdfWarnMsg> = Vec::new();
    let bytes = doc.save(&PdfSaveOptions::default(), &mut warnings);
    std::fs::write(output, bytes).map_err(ProcessingError::Io)?;

    info!(pages = count, "Created PDF from images");
    Ok(
        OperationResult::ok(format!("Created a {}-page PDF from images", count))
            .with_output(output)
            .with_data(json!({ "pages": count })),
    )
}

#[instrument(skip_all, fields(input = %input.display(), format))]
pub fn convert_image(input: &Path, format: &str, output_dir: &Path) -> ServiceResult<OperationResult> {
    let (format, ext) = raster_format(format)?;
    let decoded = image::open(input).map_err(|e| ProcessingError::UnsupportedFormat {
        format: format!("{}: {}", input.display(), e),
    })?;

    let output = output_dir.join(format!("{}.{}", stem(input), ext));
    save_image(&decoded, &output, format)?;

    Ok(OperationResult::ok(format!("Converted image to {}", ext))
        .with_output(&output)
        .with_data(json!({
            "width": decoded.width(),
            "height": decoded.height(),
            "format": ext,
        })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(width, height, Rgb([200, 10, 10]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_raster_format_accepts_extra_formats() {
        assert_eq!(raster_format("WEBP").unwrap().1, "webp");
        assert_eq!(raster_format(".bmp").unwrap().1, "bmp");
        assert_eq!(raster_format("jpg").unwrap().0, ImageFormat::Jpeg);
        assert!(raster_format("svg").is_err());
    }

    #[test]
    fn test_images_to_pdf_one_page_per_image() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_png(dir.path(), "a.png", 100, 50);
        let b = write_png(dir.path(), "b.png", 30, 60);
        let output = dir.path().join("album.pdf");

        let result = images_to_pdf(&[a, b], &output).unwrap();

        assert_eq!(result.data.unwrap()["pages"], 2);
        let doc = lopdf::Document::load(&output).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
    }

    #[test]
    fn test_images_to_pdf_rejects_non_images() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("notes.png");
        std::fs::write(&bogus, b"plain text").unwrap();

        let result = images_to_pdf(&[bogus], &dir.path().join("out.pdf"));
        assert!(matches!(
            result,
            Err(ServiceError::Processing(ProcessingError::UnsupportedFormat { .. }))
        ));
    }

    #[test]
    fn test_convert_image_png_to_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_png(dir.path(), "photo.png", 8, 8);
        let out_dir = dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();

        let result = convert_image(&input, "jpeg", &out_dir).unwrap();

        let output = out_dir.join("photo.jpeg");
        assert_eq!(result.output_files, vec![output.to_string_lossy().to_string()]);
        let reread = image::open(&output).unwrap();
        assert_eq!(reread.width(), 8);
    }
}
