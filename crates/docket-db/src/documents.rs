//! PostgreSQL document repository.

use async_trait::async_trait;
use sqlx::{postgres::PgRow, types::Json, Pool, Postgres, Row};
use tracing::instrument;

use docket_core::{
    Document, DocumentRepository, DocumentUpdate, Error, NewDocument, Result, TimelineEvent,
};

use crate::pool::classify;

const DOCUMENT_COLUMNS: &str = "id, case_id, file_name, storage_path, file_type, \
     processing_status, extracted_text, summary, timeline, translation_en, translation_ar, \
     last_error, created_at, updated_at";

/// PostgreSQL implementation of [`DocumentRepository`].
#[derive(Clone)]
pub struct PgDocumentRepository {
    pool: Pool<Postgres>,
}

impl PgDocumentRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_document_row(row: PgRow) -> Result<Document> {
        let status: String = row.try_get("processing_status")?;
        let timeline: Option<Json<Vec<TimelineEvent>>> = row.try_get("timeline")?;
        Ok(Document {
            id: row.try_get("id")?,
            case_id: row.try_get("case_id")?,
            file_name: row.try_get("file_name")?,
            storage_path: row.try_get("storage_path")?,
            file_type: row.try_get("file_type")?,
            processing_status: status.parse()?,
            extracted_text: row.try_get("extracted_text")?,
            summary: row.try_get("summary")?,
            timeline: timeline.map(|t| t.0),
            translation_en: row.try_get("translation_en")?,
            translation_ar: row.try_get("translation_ar")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn insert(&self, doc: NewDocument) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO document (case_id, file_name, storage_path, file_type, processing_status)
             VALUES ($1, $2, $3, $4, 'PENDING')
             RETURNING id",
        )
        .bind(doc.case_id)
        .bind(&doc.file_name)
        .bind(&doc.storage_path)
        .bind(&doc.file_type)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;
        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Option<Document>> {
        let query = format!("SELECT {DOCUMENT_COLUMNS} FROM document WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;
        row.map(Self::parse_document_row).transpose()
    }

    #[instrument(skip(self, update), fields(subsystem = "db", component = "documents", op = "update", document_id = id))]
    async fn update(&self, id: i64, update: DocumentUpdate) -> Result<()> {
        // NULL parameters leave the column untouched; last_error has an
        // explicit flag so it can be cleared.
        let (set_error, last_error) = match update.last_error {
            Some(value) => (true, value),
            None => (false, None),
        };

        let done = sqlx::query(
            "UPDATE document SET
                 processing_status = COALESCE($2, processing_status),
                 extracted_text    = COALESCE($3, extracted_text),
                 summary           = COALESCE($4, summary),
                 timeline          = COALESCE($5, timeline),
                 translation_en    = COALESCE($6, translation_en),
                 translation_ar    = COALESCE($7, translation_ar),
                 last_error        = CASE WHEN $8 THEN $9 ELSE last_error END,
                 updated_at        = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(update.processing_status.map(|s| s.as_str()))
        .bind(update.extracted_text)
        .bind(update.summary)
        .bind(update.timeline.map(Json))
        .bind(update.translation_en)
        .bind(update.translation_ar)
        .bind(set_error)
        .bind(last_error)
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        if done.rows_affected() == 0 {
            return Err(Error::DocumentNotFound(id));
        }
        Ok(())
    }
}
