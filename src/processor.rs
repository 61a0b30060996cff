use std::path::Path;

use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{NewUpload, OcrRepository, UploadedFile};
use crate::error::ApiError;
use crate::ocr::{DocumentFormat, EngineKind, OcrDispatcher};

/// A file received from a client, held in memory until it is validated.
#[derive(Debug)]
pub struct IncomingFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

pub fn create_dispatcher(config: &Config) -> OcrDispatcher {
    info!(
        languages = %config.tesseract_languages,
        dpi = config.rasterize_dpi,
        "🔤 Using Tesseract languages: {}",
        config.tesseract_languages
    );

    let dispatcher = OcrDispatcher::from_config(config);
    let engines: Vec<&str> = dispatcher.available().iter().map(|k| k.as_str()).collect();
    info!(engines = ?engines, "OCR engines registered");
    dispatcher
}

/// Checks the declared type and the leading bytes of an upload.
pub fn validate_document(file: &IncomingFile) -> Result<DocumentFormat, ApiError> {
    if file.bytes.is_empty() {
        return Err(ApiError::BadRequest("Uploaded file is empty".to_string()));
    }

    let format = DocumentFormat::from_declared(&file.file_name, file.content_type.as_deref())
        .ok_or_else(|| {
            ApiError::UnsupportedMediaType(format!(
                "{} ({}). Only PDF or TIFF allowed.",
                file.file_name,
                file.content_type.as_deref().unwrap_or("no content type")
            ))
        })?;

    if !format.matches_content(&file.bytes) {
        return Err(ApiError::UnsupportedMediaType(format!(
            "{} does not look like a {} file",
            file.file_name,
            format.extension().to_uppercase()
        )));
    }

    Ok(format)
}

/// Stores the file, runs OCR and records the results.
///
/// Either everything is kept or nothing is: a failure after the file was
/// written removes it again, and rows are only inserted once OCR succeeded.
pub async fn process_upload(
    pool: &SqlitePool,
    dispatcher: &OcrDispatcher,
    upload_dir: &Path,
    engine: EngineKind,
    file: IncomingFile,
) -> Result<(UploadedFile, u64), ApiError> {
    let format = validate_document(&file)?;

    tokio::fs::create_dir_all(upload_dir).await.map_err(|e| {
        ApiError::InternalError(format!("Failed to create upload directory: {}", e))
    })?;
    let storage_path = upload_dir.join(format!("{}.{}", Uuid::new_v4().simple(), format.extension()));
    tokio::fs::write(&storage_path, &file.bytes).await.map_err(|e| {
        ApiError::InternalError(format!("Failed to store {:?}: {}", storage_path, e))
    })?;

    let pages = match dispatcher.run(engine, &storage_path, format).await {
        Ok(pages) => pages,
        Err(e) => {
            discard(&storage_path).await;
            return Err(e.into());
        }
    };

    let storage_path_str = storage_path.to_string_lossy();
    let upload = NewUpload {
        file_name: &file.file_name,
        storage_path: &storage_path_str,
        content_type: format.mime_type(),
        size_bytes: file.bytes.len() as i64,
        engine,
    };

    match OcrRepository::new(pool).save_upload(&upload, &pages).await {
        Ok(saved) => Ok(saved),
        Err(e) => {
            discard(&storage_path).await;
            Err(e.into())
        }
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove stored upload");
    }
}
