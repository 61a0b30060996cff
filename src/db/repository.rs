use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::ocr::{EngineKind, PageLines};

/// A stored upload.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UploadedFile {
    pub id: i64,
    pub file_name: String,
    pub storage_path: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub engine: String,
    pub page_count: i64,
    pub uploaded_at: String,
}

/// Upload metadata to persist alongside its OCR output.
#[derive(Debug)]
pub struct NewUpload<'a> {
    pub file_name: &'a str,
    pub storage_path: &'a str,
    pub content_type: &'a str,
    pub size_bytes: i64,
    pub engine: EngineKind,
}

/// One recognised line as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OcrResultRow {
    pub id: i64,
    pub file_id: i64,
    pub file_name: String,
    pub page_number: i64,
    pub line_number: i64,
    pub line_text: String,
    pub confidence: Option<f64>,
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    pub processed_at: String,
}

/// An upload with its row count, as listed by `GET /files`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FileSummary {
    pub id: i64,
    pub file_name: String,
    pub engine: String,
    pub pages: i64,
    pub rows: i64,
    pub content_type: String,
    pub size_bytes: i64,
    pub uploaded_at: String,
}

/// Narrows a results query. Empty means every row.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultFilter {
    pub file_id: Option<i64>,
    pub page_number: Option<i64>,
}

impl ResultFilter {
    fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE 1 = 1");
        if let Some(file_id) = self.file_id {
            qb.push(" AND file_id = ").push_bind(file_id);
        }
        if let Some(page_number) = self.page_number {
            qb.push(" AND page_number = ").push_bind(page_number);
        }
    }
}

pub struct OcrRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> OcrRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Stores an upload and all of its lines in one transaction.
    ///
    /// Returns the stored upload and the number of rows inserted.
    pub async fn save_upload(
        &self,
        upload: &NewUpload<'_>,
        pages: &[PageLines],
    ) -> Result<(UploadedFile, u64), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        let page_count = pages.len() as i64;
        let mut tx = self.pool.begin().await?;

        let file_id = sqlx::query(
            r#"
            INSERT INTO uploaded_files
                (file_name, storage_path, content_type, size_bytes, engine, page_count, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(upload.file_name)
        .bind(upload.storage_path)
        .bind(upload.content_type)
        .bind(upload.size_bytes)
        .bind(upload.engine.as_str())
        .bind(page_count)
        .bind(now.as_str())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let mut rows = 0u64;
        for page in pages {
            for line in &page.lines {
                sqlx::query(
                    r#"
                    INSERT INTO ocr_results
                        (file_id, file_name, page_number, line_number, line_text,
                         confidence, x, y, width, height, processed_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(file_id)
                .bind(upload.file_name)
                .bind(i64::from(page.page_number))
                .bind(i64::from(line.line_number))
                .bind(line.text.as_str())
                .bind(line.confidence.map(f64::from))
                .bind(i64::from(line.bbox.x))
                .bind(i64::from(line.bbox.y))
                .bind(i64::from(line.bbox.width))
                .bind(i64::from(line.bbox.height))
                .bind(now.as_str())
                .execute(&mut *tx)
                .await?;
                rows += 1;
            }
        }

        tx.commit().await?;

        Ok((
            UploadedFile {
                id: file_id,
                file_name: upload.file_name.to_string(),
                storage_path: upload.storage_path.to_string(),
                content_type: upload.content_type.to_string(),
                size_bytes: upload.size_bytes,
                engine: upload.engine.as_str().to_string(),
                page_count,
                uploaded_at: now,
            },
            rows,
        ))
    }

    pub async fn get_file(&self, id: i64) -> Result<Option<UploadedFile>, sqlx::Error> {
        sqlx::query_as::<_, UploadedFile>(
            r#"
            SELECT id, file_name, storage_path, content_type, size_bytes, engine,
                   page_count, uploaded_at
            FROM uploaded_files
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await
    }

    /// The most recent upload carrying `file_name`.
    pub async fn latest_by_name(&self, file_name: &str) -> Result<Option<UploadedFile>, sqlx::Error> {
        sqlx::query_as::<_, UploadedFile>(
            r#"
            SELECT id, file_name, storage_path, content_type, size_bytes, engine,
                   page_count, uploaded_at
            FROM uploaded_files
            WHERE file_name = ?
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(file_name)
        .fetch_optional(self.pool)
        .await
    }

    pub async fn list_files(&self) -> Result<Vec<FileSummary>, sqlx::Error> {
        sqlx::query_as::<_, FileSummary>(
            r#"
            SELECT f.id, f.file_name, f.engine, f.page_count AS pages,
                   COUNT(r.id) AS "rows", f.content_type, f.size_bytes, f.uploaded_at
            FROM uploaded_files f
            LEFT JOIN ocr_results r ON r.file_id = f.id
            GROUP BY f.id
            ORDER BY f.id ASC
            "#,
        )
        .fetch_all(self.pool)
        .await
    }

    pub async fn count_results(&self, filter: &ResultFilter) -> Result<i64, sqlx::Error> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM ocr_results");
        filter.push_where(&mut qb);
        qb.build_query_scalar::<i64>().fetch_one(self.pool).await
    }

    /// A page of rows in `(file_id, page_number, line_number, id)` order.
    pub async fn list_results(
        &self,
        filter: &ResultFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<OcrResultRow>, sqlx::Error> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, file_id, file_name, page_number, line_number, line_text, confidence, \
             x, y, width, height, processed_at FROM ocr_results",
        );
        filter.push_where(&mut qb);
        qb.push(" ORDER BY file_id, page_number, line_number, id LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        qb.build_query_as::<OcrResultRow>().fetch_all(self.pool).await
    }
}
