use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::config::Config;
use crate::errors::PipelineError;
use crate::messages::PdfGenerationPayload;
use crate::models::resume::ResumeDocument;

/// Turns a resume into a downloadable artifact and returns its location.
#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn render(
        &self,
        request: &PdfGenerationPayload,
        resume: &ResumeDocument,
    ) -> Result<String, PipelineError>;
}

/// Stand-in renderer: waits a fixed delay, then reports the location the
/// artifact would be stored at (`<base>/<userId>/<resumeId>.pdf`).
#[derive(Debug, Clone)]
pub struct StubPdfRenderer {
    base_url: String,
    delay: Duration,
}

impl StubPdfRenderer {
    pub fn new(base_url: impl Into<String>, delay: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            delay,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.pdf_base_url.clone(),
            Duration::from_millis(config.pdf_render_delay_ms),
        )
    }
}

#[async_trait]
impl PdfRenderer for StubPdfRenderer {
    async fn render(
        &self,
        request: &PdfGenerationPayload,
        resume: &ResumeDocument,
    ) -> Result<String, PipelineError> {
        if resume.id != request.resume_id || resume.user_id != request.user_id {
            return Err(PipelineError::Render(format!(
                "resume {} does not match render request for {}",
                resume.id, request.resume_id
            )));
        }

        tokio::time::sleep(self.delay).await;

        let url = format!(
            "{}/{}/{}.pdf",
            self.base_url, request.user_id, request.resume_id
        );
        info!(
            resume_id = %request.resume_id,
            template = %request.template,
            pdf_url = %url,
            "PDF rendered"
        );
        Ok(url)
    }
}
