use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{Disposition, FollowUp, MessageHandler};
use crate::errors::PipelineError;
use crate::messages::{NotificationPayload, PdfGenerationPayload, WorkItem, WorkItemKind};
use crate::queue::Channel;
use crate::render::PdfRenderer;
use crate::store::ResumeStore;

/// Renders requested PDFs and records where they were stored.
pub struct PdfGenerationHandler {
    store: Arc<dyn ResumeStore>,
    renderer: Arc<dyn PdfRenderer>,
}

impl PdfGenerationHandler {
    pub fn new(store: Arc<dyn ResumeStore>, renderer: Arc<dyn PdfRenderer>) -> Self {
        Self { store, renderer }
    }
}

#[async_trait]
impl MessageHandler for PdfGenerationHandler {
    fn name(&self) -> &'static str {
        "pdf-generation"
    }

    fn channel(&self) -> Channel {
        Channel::PdfGeneration
    }

    fn kind(&self) -> WorkItemKind {
        WorkItemKind::PdfGeneration
    }

    async fn handle(&self, item: &WorkItem) -> Result<Disposition, PipelineError> {
        let request: PdfGenerationPayload = match item.payload() {
            Ok(request) => request,
            Err(e) => return Ok(Disposition::dead_letter(format!("malformed payload: {e}"))),
        };

        let resume = self
            .store
            .find_owned(&request.resume_id, &request.user_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(&request.resume_id, &request.user_id))?;

        let pdf_url = self.renderer.render(&request, &resume).await?;

        // the resume may have been deleted while rendering
        self.store
            .set_pdf_url(&request.resume_id, &request.user_id, &pdf_url)
            .await?
            .ok_or_else(|| PipelineError::not_found(&request.resume_id, &request.user_id))?;

        info!(
            resume_id = %request.resume_id,
            user_id = %request.user_id,
            pdf_url = %pdf_url,
            "PDF generated"
        );

        Ok(Disposition::Processed {
            follow_ups: vec![FollowUp::Notification(NotificationPayload::pdf_generated(
                &request.user_id,
                &pdf_url,
            ))],
        })
    }
}
