//! Producer side of the pipeline: the operations an API layer performs before
//! answering a request. Writes that can be deferred are queued for the
//! workers; reads and ownership checks go straight to the store.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::messages::{PdfGenerationPayload, ResumeUpdatePayload, DEFAULT_TEMPLATE};
use crate::models::resume::{ResumeAnalytics, ResumeDocument, ResumeStatus};
use crate::queue::QueueClient;
use crate::store::{ResumeStore, DEFAULT_LIST_LIMIT, DEFAULT_PUBLIC_LIMIT};

#[derive(Clone)]
pub struct ResumeService {
    store: Arc<dyn ResumeStore>,
    queue: QueueClient,
}

impl ResumeService {
    pub fn new(store: Arc<dyn ResumeStore>, queue: QueueClient) -> Self {
        Self { store, queue }
    }

    async fn owned(&self, user_id: &str, resume_id: &str) -> Result<ResumeDocument, PipelineError> {
        self.store
            .find_owned(resume_id, user_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(resume_id, user_id))
    }

    /// Persists a new resume, then queues its first processing pass with PDF
    /// generation requested.
    pub async fn create_resume(
        &self,
        user_id: &str,
        draft: &Map<String, Value>,
    ) -> Result<ResumeDocument, PipelineError> {
        let id = Uuid::new_v4().to_string();
        let doc = ResumeDocument::from_draft(&id, user_id, draft, Utc::now())?;
        let doc = self.store.insert(doc).await?;

        self.queue
            .queue_resume_update(&ResumeUpdatePayload {
                user_id: user_id.to_string(),
                resume_id: id.clone(),
                updates: draft.clone(),
                generate_pdf: true,
            })
            .await?;

        info!(resume_id = %id, user_id, "Resume created, processing queued");
        Ok(doc)
    }

    /// Queues a partial update. Returns the queue message id.
    pub async fn update_resume(
        &self,
        user_id: &str,
        resume_id: &str,
        updates: Map<String, Value>,
        generate_pdf: bool,
    ) -> Result<String, PipelineError> {
        self.owned(user_id, resume_id).await?;
        let message_id = self
            .queue
            .queue_resume_update(&ResumeUpdatePayload {
                user_id: user_id.to_string(),
                resume_id: resume_id.to_string(),
                updates,
                generate_pdf,
            })
            .await?;
        info!(resume_id, user_id, generate_pdf, "Resume update queued");
        Ok(message_id)
    }

    /// Queues PDF generation. Returns the queue message id.
    pub async fn request_pdf(
        &self,
        user_id: &str,
        resume_id: &str,
        template: Option<&str>,
    ) -> Result<String, PipelineError> {
        self.owned(user_id, resume_id).await?;
        let template = template
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(DEFAULT_TEMPLATE);
        let message_id = self
            .queue
            .queue_pdf_generation(&PdfGenerationPayload {
                user_id: user_id.to_string(),
                resume_id: resume_id.to_string(),
                template: template.to_string(),
            })
            .await?;
        info!(resume_id, user_id, template, "PDF generation queued");
        Ok(message_id)
    }

    pub async fn get_resume(
        &self,
        user_id: &str,
        resume_id: &str,
    ) -> Result<ResumeDocument, PipelineError> {
        self.owned(user_id, resume_id).await
    }

    /// Newest first; `limit` defaults to 50.
    pub async fn list_resumes(
        &self,
        user_id: &str,
        status: Option<ResumeStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<ResumeDocument>, PipelineError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
        Ok(self.store.list_by_user(user_id, status, limit).await?)
    }

    /// Public gallery; `limit` defaults to 20.
    pub async fn list_public(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<ResumeDocument>, PipelineError> {
        let limit = limit.unwrap_or(DEFAULT_PUBLIC_LIMIT);
        Ok(self.store.list_public(limit).await?)
    }

    pub async fn list_templates(&self) -> Result<Vec<ResumeDocument>, PipelineError> {
        Ok(self.store.list_templates().await?)
    }

    pub async fn delete_resume(&self, user_id: &str, resume_id: &str) -> Result<(), PipelineError> {
        if !self.store.delete(resume_id, user_id).await? {
            return Err(PipelineError::not_found(resume_id, user_id));
        }
        info!(resume_id, user_id, "Resume deleted");
        Ok(())
    }

    /// Copies an owned resume as a fresh draft.
    pub async fn clone_resume(
        &self,
        user_id: &str,
        resume_id: &str,
    ) -> Result<ResumeDocument, PipelineError> {
        let source = self.owned(user_id, resume_id).await?;
        let copy = source.duplicate(&Uuid::new_v4().to_string(), Utc::now());
        let copy = self.store.insert(copy).await?;
        info!(resume_id, clone_id = %copy.id, user_id, "Resume cloned");
        Ok(copy)
    }

    /// Counts a view. `None` when the resume does not exist.
    pub async fn record_view(
        &self,
        resume_id: &str,
    ) -> Result<Option<ResumeDocument>, PipelineError> {
        Ok(self.store.record_view(resume_id).await?)
    }

    /// Counts a download. `None` when the resume does not exist.
    pub async fn record_download(
        &self,
        resume_id: &str,
    ) -> Result<Option<ResumeDocument>, PipelineError> {
        Ok(self.store.record_download(resume_id).await?)
    }

    pub async fn analytics(&self, user_id: &str) -> Result<ResumeAnalytics, PipelineError> {
        let docs = self.store.list_by_user(user_id, None, usize::MAX).await?;
        Ok(ResumeAnalytics::from_documents(&docs))
    }
}
