//! OCR engines and the dispatcher that picks one per upload.
//!
//! A document is first split into page images ([`pages`]), then the selected
//! [`OcrEngine`] reads each page and returns text lines.

use std::{collections::HashMap, fmt, path::Path, str::FromStr, sync::Arc, time::Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::config::Config;

pub mod format;
#[cfg(feature = "ocr-paddle")]
pub mod paddle;
pub mod pages;
pub mod tesseract;

pub use format::DocumentFormat;
pub use pages::PageImage;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Unknown OCR engine: {0}")]
    UnknownEngine(String),

    #[error("OCR engine not available: {0}")]
    EngineUnavailable(String),

    #[error("Page splitting failed: {0}")]
    PageSplit(String),

    #[error("Recognition failed on page {page}: {message}")]
    Recognition { page: u32, message: String },

    #[error("Image error: {0}")]
    Image(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The engines a client can ask for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Tesseract,
    #[serde(alias = "paddle")]
    PaddleOcr,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Tesseract => "tesseract",
            EngineKind::PaddleOcr => "paddleocr",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = OcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tesseract" => Ok(EngineKind::Tesseract),
            "paddleocr" | "paddle" => Ok(EngineKind::PaddleOcr),
            other => Err(OcrError::UnknownEngine(other.to_string())),
        }
    }
}

/// Pixel rectangle of a line on its page image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One recognised line of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrLine {
    /// 1-based, in reading order within the page.
    pub line_number: u32,
    pub text: String,
    /// 0-100 when the engine reports one.
    pub confidence: Option<f32>,
    pub bbox: BoundingBox,
}

/// All lines recognised on one page.
#[derive(Debug, Clone)]
pub struct PageLines {
    pub page_number: u32,
    pub lines: Vec<OcrLine>,
}

/// Extracts text lines from a single page image.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    async fn recognize_page(&self, page: &PageImage) -> Result<Vec<OcrLine>, OcrError>;
}

/// Routes a document to the engine chosen for it.
pub struct OcrDispatcher {
    engines: HashMap<EngineKind, Arc<dyn OcrEngine>>,
    rasterize_dpi: u32,
}

impl OcrDispatcher {
    pub fn new(rasterize_dpi: u32) -> Self {
        Self {
            engines: HashMap::new(),
            rasterize_dpi,
        }
    }

    /// Registers every engine compiled into this build.
    pub fn from_config(config: &Config) -> Self {
        let dispatcher = Self::new(config.rasterize_dpi).with_engine(Arc::new(
            tesseract::TesseractEngine::new(&config.tesseract_languages),
        ));

        #[cfg(feature = "ocr-paddle")]
        let dispatcher =
            dispatcher.with_engine(Arc::new(paddle::PaddleEngine::new(&config.paddle_model_dir)));

        dispatcher
    }

    pub fn with_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.engines.insert(engine.kind(), engine);
        self
    }

    pub fn available(&self) -> Vec<EngineKind> {
        let mut kinds: Vec<_> = self.engines.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    pub fn engine(&self, kind: EngineKind) -> Result<Arc<dyn OcrEngine>, OcrError> {
        self.engines.get(&kind).cloned().ok_or_else(|| {
            OcrError::EngineUnavailable(format!("{} is not enabled in this build", kind))
        })
    }

    /// Splits `path` into pages and runs the `kind` engine over each, in order.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn run(
        &self,
        kind: EngineKind,
        path: &Path,
        format: DocumentFormat,
    ) -> Result<Vec<PageLines>, OcrError> {
        let engine = self.engine(kind)?;
        let started = Instant::now();

        let images = pages::split_pages(path, format, self.rasterize_dpi).await?;
        let mut results = Vec::with_capacity(images.len());

        for page in images.iter() {
            let lines = engine.recognize_page(page).await?;
            debug!(
                page_number = page.page_number,
                lines = lines.len(),
                "Page recognised"
            );
            results.push(PageLines {
                page_number: page.page_number,
                lines,
            });
        }

        info!(
            engine = %kind,
            pages = results.len(),
            processing_time_ms = started.elapsed().as_millis() as u64,
            "OCR run complete"
        );
        Ok(results)
    }
}

/// Maps a finished external command to an error carrying its stderr.
pub(crate) fn check_command_output(
    command_name: &str,
    output: &std::process::Output,
) -> Result<(), String> {
    let stderr = String::from_utf8_lossy(&output.stderr);
    debug!(command_name, stderr = %stderr, "Command finished");

    if output.status.success() {
        Ok(())
    } else if let Some(code) = output.status.code() {
        Err(format!(
            "{} failed with exit code {}: {}",
            command_name,
            code,
            stderr.trim()
        ))
    } else {
        Err(format!("{} was terminated: {}", command_name, stderr.trim()))
    }
}
