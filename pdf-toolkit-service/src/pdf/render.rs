//! Page rasterization through pdfium.

use std::path::Path;

use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::debug;

use crate::error::{ProcessingError, ServiceResult};

pub const MIN_DPI: u32 = 72;
pub const MAX_DPI: u32 = 300;

/// Create a new Pdfium instance (dynamically linked).
///
/// Searches for libpdfium in:
/// 1. Current directory (./libpdfium.so)
/// 2. vendor/pdfium/lib/
/// 3. System library paths
pub fn create_pdfium() -> Result<Pdfium, ProcessingError> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "./vendor/pdfium/lib/",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| ProcessingError::Render {
            message: format!("failed to load the PDFium library: {:?}", e),
        })?;

    Ok(Pdfium::new(bindings))
}

fn render_error(page: u32, e: impl std::fmt::Display) -> ProcessingError {
    ProcessingError::Render {
        message: format!("page {}: {}", page, e),
    }
}

/// Render every page at `dpi`, handing each image to `sink` in page order.
/// Pages are rendered one at a time so only one bitmap is alive.
pub fn render_pages<F>(path: &Path, dpi: u32, mut sink: F) -> ServiceResult<u32>
where
    F: FnMut(u32, DynamicImage) -> ServiceResult<()>,
{
    let dpi = dpi.clamp(MIN_DPI, MAX_DPI);
    let pdfium = create_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| match e {
            PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
                ProcessingError::Encrypted
            }
            other => ProcessingError::pdf(format!("failed to open for rendering: {}", other)),
        })?;

    let scale = dpi as f32 / 72.0;
    let mut rendered = 0;
    for (index, page) in document.pages().iter().enumerate() {
        let number = index as u32 + 1;
        let width = (page.width().value * scale).ceil() as i32;
        let height = (page.height().value * scale).ceil() as i32;
        let config = PdfRenderConfig::new()
            .set_target_width(width.max(1))
            .set_maximum_height(height.max(1));

        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| render_error(number, e))?;
        debug!(page = number, width, height, dpi, "Rendered page");

        sink(number, bitmap.as_image())?;
        rendered += 1;
    }

    Ok(rendered)
}
