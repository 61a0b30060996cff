//! PaddleOCR engine via `paddle-ocr-rs` (ONNX Runtime).
//!
//! Models are loaded once from the configured directory and shared by all
//! requests. Inference needs `&mut`, so the engine sits behind a mutex and
//! runs on the blocking pool.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, OnceLock},
};

use async_trait::async_trait;
use paddle_ocr_rs::ocr_lite::OcrLite;
use tracing::{info, instrument};

use super::{BoundingBox, EngineKind, OcrEngine, OcrError, OcrLine, PageImage};

const DET_MODEL: &str = "ch_PP-OCRv4_det_infer.onnx";
const CLS_MODEL: &str = "ch_ppocr_mobile_v2.0_cls_infer.onnx";
const REC_MODEL: &str = "ch_PP-OCRv4_rec_infer.onnx";

const NUM_THREADS: usize = 4;

pub struct PaddleEngine {
    model_dir: PathBuf,
    ocr: Arc<OnceLock<Mutex<OcrLite>>>,
}

impl PaddleEngine {
    pub fn new(model_dir: &Path) -> Self {
        Self {
            model_dir: model_dir.to_owned(),
            ocr: Arc::new(OnceLock::new()),
        }
    }

    fn model_path(&self, name: &str) -> Result<String, OcrError> {
        let path = self.model_dir.join(name);
        if !path.exists() {
            return Err(OcrError::EngineUnavailable(format!(
                "PaddleOCR model {} missing from {}",
                name,
                self.model_dir.display()
            )));
        }
        Ok(path.to_string_lossy().into_owned())
    }

    fn load(&self) -> Result<Mutex<OcrLite>, OcrError> {
        let det = self.model_path(DET_MODEL)?;
        let cls = self.model_path(CLS_MODEL)?;
        let rec = self.model_path(REC_MODEL)?;

        let mut ocr = OcrLite::new();
        ocr.init_models(&det, &cls, &rec, NUM_THREADS)
            .map_err(|e| OcrError::EngineUnavailable(format!("cannot load PaddleOCR models: {}", e)))?;

        info!(model_dir = %self.model_dir.display(), "PaddleOCR models loaded");
        Ok(Mutex::new(ocr))
    }

    fn engine(&self) -> Result<&Mutex<OcrLite>, OcrError> {
        if let Some(ocr) = self.ocr.get() {
            return Ok(ocr);
        }
        let loaded = self.load()?;
        // A concurrent first request may have won; either instance is fine.
        let _ = self.ocr.set(loaded);
        self.ocr
            .get()
            .ok_or_else(|| OcrError::EngineUnavailable("PaddleOCR failed to initialise".to_string()))
    }

    fn recognize_blocking(&self, page: &PageImage) -> Result<Vec<OcrLine>, OcrError> {
        let recognition_error = |message: String| OcrError::Recognition {
            page: page.page_number,
            message,
        };

        let mut ocr = self
            .engine()?
            .lock()
            .map_err(|e| recognition_error(format!("PaddleOCR lock poisoned: {}", e)))?;

        let path = page
            .path
            .to_str()
            .ok_or_else(|| recognition_error("page path is not valid UTF-8".to_string()))?;

        let result = ocr
            .detect_from_path(
                path,
                50,    // padding
                1024,  // max side length
                0.5,   // box score threshold
                0.3,   // box threshold
                1.6,   // unclip ratio
                true,  // do angle
                false, // most angle
            )
            .map_err(|e| recognition_error(format!("PaddleOCR detection failed: {}", e)))?;

        Ok(result
            .text_blocks
            .iter()
            .filter(|block| !block.text.trim().is_empty())
            .zip(1u32..)
            .map(|(block, line_number)| {
                let xs = block.box_points.iter().map(|p| p.x);
                let ys = block.box_points.iter().map(|p| p.y);
                let (x, y) = (xs.clone().min().unwrap_or(0), ys.clone().min().unwrap_or(0));
                let (right, bottom) = (xs.max().unwrap_or(x), ys.max().unwrap_or(y));
                OcrLine {
                    line_number,
                    text: block.text.trim().to_string(),
                    confidence: Some(block.text_score * 100.0),
                    bbox: BoundingBox {
                        x,
                        y,
                        width: right - x,
                        height: bottom - y,
                    },
                }
            })
            .collect())
    }
}

#[async_trait]
impl OcrEngine for PaddleEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::PaddleOcr
    }

    #[instrument(level = "debug", skip_all, fields(page = page.page_number))]
    async fn recognize_page(&self, page: &PageImage) -> Result<Vec<OcrLine>, OcrError> {
        let engine = PaddleEngine {
            model_dir: self.model_dir.clone(),
            ocr: Arc::clone(&self.ocr),
        };
        let page = page.clone();
        let page_number = page.page_number;
        tokio::task::spawn_blocking(move || engine.recognize_blocking(&page))
            .await
            .map_err(|e| worker_panicked(page_number, e))?
    }
}

fn worker_panicked(page: u32, err: tokio::task::JoinError) -> OcrError {
    OcrError::Recognition {
        page,
        message: format!("PaddleOCR worker panicked: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use actix_web::{http::StatusCode, ResponseError};

    #[tokio::test]
    async fn test_worker_panic_is_a_recognition_failure() {
        let join_err = tokio::task::spawn_blocking(|| panic!("inference crashed"))
            .await
            .unwrap_err();

        let err = worker_panicked(4, join_err);
        assert!(matches!(err, OcrError::Recognition { page: 4, .. }));
        assert_eq!(ApiError::from(err).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_missing_models_report_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let engine = PaddleEngine::new(dir.path());
        let page = PageImage {
            page_number: 1,
            path: dir.path().join("page-1.png"),
        };

        let err = engine.recognize_page(&page).await.unwrap_err();
        assert!(matches!(err, OcrError::EngineUnavailable(_)));
    }
}
