use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::PgPool;
use tracing::{debug, warn};

use super::{
    with_download, with_patch, with_pdf_url, with_view, ResumeStore, MAX_WRITE_ATTEMPTS,
};
use crate::errors::StoreError;
use crate::models::resume::{ResumeDocument, ResumeRow, ResumeStatus};

const SELECT_COLUMNS: &str = "id, user_id, document, etag, status, created_at, updated_at";

/// Postgres-backed store. Documents are kept as JSONB next to a content etag;
/// every mutation is a conditional UPDATE on that etag.
#[derive(Clone)]
pub struct PgResumeStore {
    pool: PgPool,
}

impl PgResumeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_row(
        &self,
        id: &str,
        owner: Option<&str>,
    ) -> Result<Option<ResumeRow>, StoreError> {
        let row = match owner {
            Some(user_id) => {
                sqlx::query_as::<_, ResumeRow>(&format!(
                    "SELECT {SELECT_COLUMNS} FROM resumes WHERE id = $1 AND user_id = $2"
                ))
                .bind(id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ResumeRow>(&format!(
                    "SELECT {SELECT_COLUMNS} FROM resumes WHERE id = $1"
                ))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
            }
        };
        Ok(row)
    }

    /// Read, compute, then write only if the etag read is still current.
    /// A lost race re-reads and recomputes, up to `MAX_WRITE_ATTEMPTS`.
    async fn mutate<F>(
        &self,
        id: &str,
        owner: Option<&str>,
        compute: F,
    ) -> Result<Option<ResumeDocument>, StoreError>
    where
        F: Fn(&ResumeDocument) -> Result<Option<ResumeDocument>, StoreError> + Send + Sync,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let Some(row) = self.fetch_row(id, owner).await? else {
                return Ok(None);
            };
            let expected_etag = row.etag.clone();
            let current = row.into_document()?;

            let Some(next) = compute(&current)? else {
                return Ok(Some(current));
            };
            next.validate()?;

            let result = sqlx::query(
                r#"
                UPDATE resumes
                SET document = $3, etag = $4, status = $5, last_modified = $6, updated_at = $7
                WHERE id = $1 AND etag = $2
                "#,
            )
            .bind(id)
            .bind(&expected_etag)
            .bind(serde_json::to_value(&next)?)
            .bind(next.etag()?)
            .bind(next.status.as_str())
            .bind(next.last_modified)
            .bind(next.updated_at)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                debug!(resume_id = id, attempt, "Resume written");
                return Ok(Some(next));
            }
            warn!(resume_id = id, attempt, "Concurrent write detected, retrying");
        }

        Err(StoreError::Conflict {
            resume_id: id.to_string(),
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }
}

#[async_trait]
impl ResumeStore for PgResumeStore {
    async fn insert(&self, doc: ResumeDocument) -> Result<ResumeDocument, StoreError> {
        doc.validate()?;
        sqlx::query(
            r#"
            INSERT INTO resumes
                (id, user_id, document, etag, status, last_modified, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.user_id)
        .bind(serde_json::to_value(&doc)?)
        .bind(doc.etag()?)
        .bind(doc.status.as_str())
        .bind(doc.last_modified)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(resume_id = %doc.id, user_id = %doc.user_id, "Resume inserted");
        Ok(doc)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ResumeDocument>, StoreError> {
        self.fetch_row(id, None)
            .await?
            .map(ResumeRow::into_document)
            .transpose()
    }

    async fn find_owned(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<Option<ResumeDocument>, StoreError> {
        self.fetch_row(id, Some(user_id))
            .await?
            .map(ResumeRow::into_document)
            .transpose()
    }

    async fn find_and_update(
        &self,
        id: &str,
        user_id: &str,
        updates: &Map<String, Value>,
    ) -> Result<Option<ResumeDocument>, StoreError> {
        let now = Utc::now();
        self.mutate(id, Some(user_id), |doc| with_patch(doc, updates, now))
            .await
    }

    async fn set_pdf_url(
        &self,
        id: &str,
        user_id: &str,
        pdf_url: &str,
    ) -> Result<Option<ResumeDocument>, StoreError> {
        let now = Utc::now();
        self.mutate(id, Some(user_id), |doc| Ok(with_pdf_url(doc, pdf_url, now)))
            .await
    }

    async fn record_view(&self, id: &str) -> Result<Option<ResumeDocument>, StoreError> {
        let now = Utc::now();
        self.mutate(id, None, |doc| Ok(with_view(doc, now))).await
    }

    async fn record_download(&self, id: &str) -> Result<Option<ResumeDocument>, StoreError> {
        let now = Utc::now();
        self.mutate(id, None, |doc| Ok(with_download(doc, now))).await
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        status: Option<ResumeStatus>,
        limit: usize,
    ) -> Result<Vec<ResumeDocument>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, ResumeRow>(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM resumes
            WHERE user_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY last_modified DESC
            LIMIT $3
            "#
        ))
        .bind(user_id)
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ResumeRow::into_document).collect()
    }

    async fn list_public(&self, limit: usize) -> Result<Vec<ResumeDocument>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, ResumeRow>(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM resumes
            WHERE status = 'completed' AND (document->>'isPublic')::BOOLEAN
            ORDER BY created_at DESC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ResumeRow::into_document).collect()
    }

    async fn list_templates(&self) -> Result<Vec<ResumeDocument>, StoreError> {
        let rows = sqlx::query_as::<_, ResumeRow>(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM resumes
            WHERE status = 'completed' AND (document->>'isTemplate')::BOOLEAN
            ORDER BY created_at DESC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ResumeRow::into_document).collect()
    }

    async fn delete(&self, id: &str, user_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM resumes WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
