use std::{path::Path, sync::Arc, time::Instant};

use actix_files::NamedFile;
use actix_multipart::{Field, Multipart};
use actix_web::{get, post, web, HttpResponse, Result as ActixResult};
use futures_util::TryStreamExt;
use sqlx::SqlitePool;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{OcrRepository, ResultFilter};
use crate::error::ApiError;
use crate::ocr::{EngineKind, OcrDispatcher};
use crate::processor::{process_upload, IncomingFile};
use crate::schemas::{
    HealthResponse, PaginatedResults, ResultsQuery, UploadParams, UploadResponse,
};

/// Longest value accepted for a plain form field such as `engine`.
const MAX_FIELD_BYTES: usize = 256;

/// Shared by every worker.
pub struct AppState {
    pub pool: SqlitePool,
    pub dispatcher: Arc<OcrDispatcher>,
    pub config: Arc<Config>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into()),
    )
    .service(serve_frontend)
    .service(health_check)
    .service(upload_and_process)
    .service(list_files)
    .service(get_results);
}

#[get("/")]
async fn serve_frontend(state: web::Data<AppState>) -> Result<NamedFile, ApiError> {
    let index = state.config.static_dir.join("index.html");
    NamedFile::open_async(&index)
        .await
        .map_err(|_| ApiError::NotFound(format!("frontend not found at {}", index.display())))
}

/// Health check endpoint
#[get("/health")]
#[instrument(skip_all)]
async fn health_check(start_time: web::Data<Instant>) -> ActixResult<HttpResponse> {
    let uptime = start_time.elapsed().as_millis() as u64;
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_ms: uptime,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    debug!("Health check requested, uptime: {}ms", uptime);
    Ok(HttpResponse::Ok().json(response))
}

fn resolve_engine(name: &str, dispatcher: &OcrDispatcher) -> Result<EngineKind, ApiError> {
    let kind: EngineKind = name.parse()?;
    dispatcher.engine(kind)?;
    Ok(kind)
}

async fn read_field(field: &mut Field, limit: usize) -> Result<Vec<u8>, ApiError> {
    let mut data = Vec::new();
    while let Some(chunk) = field.try_next().await.map_err(|e| {
        ApiError::BadRequest(format!("Failed to read chunk from multipart field: {}", e))
    })? {
        if data.len() + chunk.len() > limit {
            return Err(ApiError::PayloadTooLarge(limit));
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

/// Keeps only the final path component of a client-supplied file name.
fn clean_file_name(raw: &str) -> Option<String> {
    let normalized = raw.replace('\\', "/");
    Path::new(&normalized)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

/// Stores an uploaded PDF/TIFF, runs OCR over it and records the lines.
#[post("/upload")]
#[instrument(skip(state, params, payload))]
async fn upload_and_process(
    state: web::Data<AppState>,
    params: web::Query<UploadParams>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    let start_time = Instant::now();

    let mut engine = match params.engine.as_deref() {
        Some(name) => resolve_engine(name, &state.dispatcher)?,
        None => EngineKind::default(),
    };
    let mut file: Option<IncomingFile> = None;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to get multipart field: {}", e)))?
    {
        match field.name() {
            Some("engine") => {
                let value = read_field(&mut field, MAX_FIELD_BYTES).await?;
                let name = String::from_utf8_lossy(&value);
                engine = resolve_engine(&name, &state.dispatcher)?;
            }
            Some("file") => {
                let file_name = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .and_then(clean_file_name)
                    .ok_or_else(|| ApiError::BadRequest("file part has no file name".to_string()))?;
                let content_type = field.content_type().map(|m| m.essence_str().to_string());
                let bytes = read_field(&mut field, state.config.max_file_bytes).await?;
                file = Some(IncomingFile {
                    file_name,
                    content_type,
                    bytes,
                });
            }
            other => debug!(request_id = %request_id, field = ?other, "Ignoring multipart field"),
        }
    }

    // The default engine may still be missing from this build.
    state.dispatcher.engine(engine)?;
    let file = file.ok_or_else(|| ApiError::BadRequest("No file uploaded".to_string()))?;

    info!(
        request_id = %request_id,
        file_name = %file.file_name,
        content_type = ?file.content_type,
        file_size = file.bytes.len(),
        engine = %engine,
        "Received file"
    );

    let (stored, rows_inserted) = process_upload(
        &state.pool,
        &state.dispatcher,
        &state.config.upload_dir,
        engine,
        file,
    )
    .await?;

    info!(
        request_id = %request_id,
        file_id = stored.id,
        pages = stored.page_count,
        rows_inserted,
        processing_time_ms = start_time.elapsed().as_millis() as u64,
        "OCR completed and results stored"
    );

    Ok(HttpResponse::Ok().json(UploadResponse {
        file_id: stored.id,
        file_name: stored.file_name,
        engine: stored.engine,
        pages: stored.page_count,
        rows_inserted,
        message: "OCR completed and results stored.".to_string(),
    }))
}

#[get("/files")]
#[instrument(skip_all)]
async fn list_files(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let files = OcrRepository::new(&state.pool).list_files().await?;
    Ok(HttpResponse::Ok().json(files))
}

/// Paginated OCR rows, optionally narrowed to one upload and page.
#[get("/results")]
#[instrument(skip(state))]
async fn get_results(
    state: web::Data<AppState>,
    query: web::Query<ResultsQuery>,
) -> Result<HttpResponse, ApiError> {
    let page = query.into_inner().validate()?;
    let repo = OcrRepository::new(&state.pool);

    let file_id = match (page.file_id, page.file_name.as_deref()) {
        (Some(id), name) => {
            let file = repo
                .get_file(id)
                .await?
                .filter(|f| name.map_or(true, |n| n == f.file_name))
                .ok_or_else(|| ApiError::NotFound(format!("no uploaded file with id {}", id)))?;
            Some(file.id)
        }
        (None, Some(name)) => {
            let file = repo
                .latest_by_name(name)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("no uploaded file named {}", name)))?;
            Some(file.id)
        }
        (None, None) => None,
    };

    let filter = ResultFilter {
        file_id,
        page_number: page.page_number,
    };
    let total = repo.count_results(&filter).await?;
    let items = repo.list_results(&filter, page.limit, page.offset).await?;

    Ok(HttpResponse::Ok().json(PaginatedResults {
        total,
        limit: page.limit,
        offset: page.offset,
        items,
    }))
}
