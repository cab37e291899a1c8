//! Format conversion between PDF, raster images, text, Markdown and HTML.

mod html;
mod images;
mod text;

use std::path::Path;

use serde_json::json;

use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::operation::OperationResult;

pub use html::{html_to_pdf, markdown_to_html_document, markdown_to_pdf};
pub use images::{convert_image, images_to_pdf, pdf_to_images, raster_format};
pub use text::{pdf_to_html, pdf_to_markdown, pdf_to_text, text_to_pdf};

pub const DEFAULT_DPI: u32 = 150;
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

const OFFICE_TARGETS: [&str; 3] = ["docx", "xlsx", "pptx"];

/// Office targets are validated, but no Office writer is bundled
pub fn to_office(input: &Path, target: &str) -> ServiceResult<OperationResult> {
    let target = target.trim().trim_start_matches('.').to_ascii_lowercase();
    if !OFFICE_TARGETS.contains(&target.as_str()) {
        return Err(ServiceError::invalid(format!(
            "Unsupported Office format '{}'; expected one of {}",
            target,
            OFFICE_TARGETS.join(", ")
        )));
    }

    let error = ServiceError::Processing(ProcessingError::UnsupportedFormat {
        format: format!("pdf to {}", target),
    });
    let mut result = OperationResult::failure(
        format!("Conversion of {} to {} is not available", file_label(input), target),
        error.to_string(),
    );
    result.set_data_field("target_format", json!(target));
    result.set_data_field("code", json!(error.error_code()));
    Ok(result)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Validate `dpi` and `quality` for page rendering
pub fn validate_render_options(dpi: u32, quality: u8) -> ServiceResult<()> {
    if !(crate::pdf::render::MIN_DPI..=crate::pdf::render::MAX_DPI).contains(&dpi) {
        return Err(ServiceError::invalid("DPI must be between 72 and 300"));
    }
    if !(1..=100).contains(&quality) {
        return Err(ServiceError::invalid("Quality must be between 1 and 100"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_office_is_a_failed_result() {
        let result = to_office(Path::new("/tmp/report.pdf"), "DOCX").unwrap();
        assert!(!result.success);
        assert!(result.output_files.is_empty());
        let data = result.data.unwrap();
        assert_eq!(data["target_format"], "docx");
        assert_eq!(data["code"], "unsupported_format");
    }

    #[test]
    fn test_to_office_rejects_unknown_target() {
        assert!(to_office(Path::new("a.pdf"), "odt").is_err());
    }

    #[test]
    fn test_validate_render_options() {
        assert!(validate_render_options(150, 95).is_ok());
        assert!(validate_render_options(71, 95).is_err());
        assert!(validate_render_options(301, 95).is_err());
        assert!(validate_render_options(150, 0).is_err());
    }
}
