//! Optical character recognition over rendered pages.
//!
//! Pages are rasterized with pdfium, then read by the local `ocrs` engine
//! (cargo feature `ocr`) or, failing that, by the configured Ollama vision
//! model.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::ImageFormat;
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::ai::detect_language;
use crate::config::RuntimeConfig;
use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::ollama::OllamaClient;
use crate::operation::OperationResult;
use crate::pdf::render::render_pages;
use crate::pdf::stem;

const VISION_PROMPT: &str = "Transcribe all text on this page exactly as written. \
Keep line breaks. Reply with the transcribed text only.";

pub const DETECTION_MODEL: &str = "text-detection.rten";
pub const RECOGNITION_MODEL: &str = "text-recognition.rten";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrBackend {
    Local,
    Vision,
}

impl OcrBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrBackend::Local => "ocrs",
            OcrBackend::Vision => "ollama_vision",
        }
    }
}

fn ocr_error(message: impl std::fmt::Display) -> ServiceError {
    ProcessingError::Ocr {
        message: message.to_string(),
    }
    .into()
}

#[cfg(feature = "ocr")]
mod local {
    use std::path::Path;

    use image::DynamicImage;
    use ocrs::{ImageSource, OcrEngine, OcrEngineParams};
    use rten::Model;

    use super::{DETECTION_MODEL, RECOGNITION_MODEL, ocr_error};
    use crate::error::ServiceResult;

    pub fn load_engine(models_dir: &Path) -> ServiceResult<OcrEngine> {
        let detection_model =
            Model::load_file(models_dir.join(DETECTION_MODEL)).map_err(ocr_error)?;
        let recognition_model =
            Model::load_file(models_dir.join(RECOGNITION_MODEL)).map_err(ocr_error)?;
        OcrEngine::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })
        .map_err(ocr_error)
    }

    pub fn recognize(engine: &OcrEngine, image: &DynamicImage) -> ServiceResult<String> {
        let rgb = image.to_rgb8();
        let source = ImageSource::from_bytes(rgb.as_raw(), rgb.dimensions()).map_err(ocr_error)?;
        let input = engine.prepare_input(source).map_err(ocr_error)?;
        engine.get_text(&input).map_err(ocr_error)
    }
}

pub struct OcrProcessor {
    runtime_config: Arc<RuntimeConfig>,
    ollama: Arc<OllamaClient>,
    #[cfg(feature = "ocr")]
    engine: std::sync::OnceLock<Option<Arc<ocrs::OcrEngine>>>,
}

impl OcrProcessor {
    pub fn new(runtime_config: Arc<RuntimeConfig>, ollama: Arc<OllamaClient>) -> Self {
        Self {
            runtime_config,
            ollama,
            #[cfg(feature = "ocr")]
            engine: std::sync::OnceLock::new(),
        }
    }

    fn models_dir(&self) -> PathBuf {
        self.runtime_config.static_config.storage.models_dir()
    }

    #[cfg(feature = "ocr")]
    fn local_engine(&self) -> Option<Arc<ocrs::OcrEngine>> {
        self.engine
            .get_or_init(|| match local::load_engine(&self.models_dir()) {
                Ok(engine) => Some(Arc::new(engine)),
                Err(e) => {
                    tracing::warn!(error = %e, "Local OCR engine unavailable");
                    None
                }
            })
            .clone()
    }

    fn local_models_present(&self) -> bool {
        let dir = self.models_dir();
        cfg!(feature = "ocr") && dir.join(DETECTION_MODEL).is_file() && dir.join(RECOGNITION_MODEL).is_file()
    }

    /// The engine `ocr` would use right now, if any
    pub fn backend(&self) -> Option<OcrBackend> {
        if self.local_models_present() {
            return Some(OcrBackend::Local);
        }
        let dynamic = self.runtime_config.dynamic();
        if dynamic.ollama.enabled && !dynamic.ollama.vision_model.trim().is_empty() {
            return Some(OcrBackend::Vision);
        }
        None
    }

    #[instrument(skip_all, fields(input = %input.display(), dpi))]
    pub async fn ocr(
        &self,
        input: &Path,
        language: Option<&str>,
        dpi: u32,
        output_dir: &Path,
    ) -> ServiceResult<OperationResult> {
        let backend = self.backend().ok_or_else(|| {
            ocr_error(format!(
                "no OCR engine available; install {} and {} under {} or configure ollama.vision_model",
                DETECTION_MODEL,
                RECOGNITION_MODEL,
                self.models_dir().display()
            ))
        })?;

        let pages = match backend {
            OcrBackend::Local => self.ocr_local(input, dpi).await?,
            OcrBackend::Vision => self.ocr_vision(input, dpi).await?,
        };

        let text = pages
            .iter()
            .map(|(page, text)| format!("--- Page {} ---\n{}", page, text.trim()))
            .collect::<Vec<_>>()
            .join("\n\n");
        let output = output_dir.join(format!("{}_ocr.txt", stem(input)));
        tokio::fs::write(&output, &text)
            .await
            .map_err(ProcessingError::Io)?;

        let characters: usize = pages.iter().map(|(_, t)| t.chars().count()).sum();
        let detected = detect_language(&text);
        info!(pages = pages.len(), characters, engine = backend.as_str(), "OCR complete");

        Ok(
            OperationResult::ok(format!("Recognized text on {} pages", pages.len()))
                .with_output(&output)
                .with_data(json!({
                    "pages": pages.len(),
                    "characters": characters,
                    "detected_language": detected,
                    "language_hint": language,
                    "engine": backend.as_str(),
                })),
        )
    }

    #[cfg(feature = "ocr")]
    async fn ocr_local(&self, input: &Path, dpi: u32) -> ServiceResult<Vec<(u32, String)>> {
        let engine = self
            .local_engine()
            .ok_or_else(|| ocr_error("local OCR models failed to load"))?;
        let input = input.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut pages = Vec::new();
            render_pages(&input, dpi, |page, image| {
                let text = local::recognize(&engine, &image)?;
                debug!(page, chars = text.len(), "Recognized page");
                pages.push((page, text));
                Ok(())
            })?;
            Ok(pages)
        })
        .await
        .map_err(|e| ServiceError::internal(format!("OCR task failed: {}", e)))?
    }

    #[cfg(not(feature = "ocr"))]
    async fn ocr_local(&self, _input: &Path, _dpi: u32) -> ServiceResult<Vec<(u32, String)>> {
        Err(ocr_error("built without the `ocr` feature"))
    }

    async fn ocr_vision(&self, input: &Path, dpi: u32) -> ServiceResult<Vec<(u32, String)>> {
        let input = input.to_path_buf();
        let encoded = tokio::task::spawn_blocking(move || {
            let mut pages = Vec::new();
            render_pages(&input, dpi, |page, image| {
                let mut png = Vec::new();
                image
                    .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
                    .map_err(|e| ocr_error(format!("page {}: {}", page, e)))?;
                pages.push((page, STANDARD.encode(png)));
                Ok(())
            })?;
            Ok::<_, ServiceError>(pages)
        })
        .await
        .map_err(|e| ServiceError::internal(format!("render task failed: {}", e)))??;

        let mut pages = Vec::with_capacity(encoded.len());
        for (page, image) in encoded {
            let text = self.ollama.describe_image(VISION_PROMPT, image).await?;
            debug!(page, chars = text.len(), "Vision model transcribed page");
            pages.push((page, text));
        }
        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::pdf::testing::sample_pdf;

    fn processor(dir: &Path) -> (OcrProcessor, Arc<RuntimeConfig>) {
        let config = Arc::new(test_config(dir));
        let ollama = Arc::new(OllamaClient::new(config.clone()).unwrap());
        (OcrProcessor::new(config.clone(), ollama), config)
    }

    #[tokio::test]
    async fn test_ocr_without_engine_fails() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample_pdf(dir.path(), "scan.pdf", 1);
        let (ocr, _) = processor(dir.path());

        let result = ocr.ocr(&input, None, 150, dir.path()).await;
        assert!(matches!(
            result,
            Err(ServiceError::Processing(ProcessingError::Ocr { .. }))
        ));
    }

    #[test]
    fn test_backend_prefers_vision_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let (ocr, config) = processor(dir.path());
        assert_eq!(ocr.backend(), None);

        let mut next = (**config.dynamic()).clone();
        next.ollama.enabled = true;
        next.ollama.vision_model = "llava".to_string();
        config.update_dynamic(next);

        assert_eq!(ocr.backend(), Some(OcrBackend::Vision));
    }
}
