//! Resume store, the only owner of resume documents.
//!
//! Workers and the resume service share write access through this trait.
//! Every mutation is a read-modify-write guarded by the document etag, so a
//! concurrent writer causes a retry instead of a silent overwrite.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::errors::StoreError;
use crate::models::resume::{apply_patch, PatchOutcome, ResumeDocument, ResumeStatus};

pub use memory::InMemoryResumeStore;
pub use postgres::PgResumeStore;

/// Check-and-set attempts before a mutation gives up with `StoreError::Conflict`.
pub const MAX_WRITE_ATTEMPTS: u32 = 5;
pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const DEFAULT_PUBLIC_LIMIT: usize = 20;

#[async_trait]
pub trait ResumeStore: Send + Sync {
    async fn insert(&self, doc: ResumeDocument) -> Result<ResumeDocument, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<ResumeDocument>, StoreError>;

    /// Returns the document only when it belongs to `user_id`.
    async fn find_owned(&self, id: &str, user_id: &str)
        -> Result<Option<ResumeDocument>, StoreError>;

    /// Applies `updates` as a partial `$set` merge onto the document keyed by
    /// `(id, user_id)`. `None` when no such document exists. Idempotent: a
    /// replayed update leaves the stored document untouched.
    async fn find_and_update(
        &self,
        id: &str,
        user_id: &str,
        updates: &Map<String, Value>,
    ) -> Result<Option<ResumeDocument>, StoreError>;

    /// Records the generated artifact location. Stats and version are untouched.
    async fn set_pdf_url(
        &self,
        id: &str,
        user_id: &str,
        pdf_url: &str,
    ) -> Result<Option<ResumeDocument>, StoreError>;

    async fn record_view(&self, id: &str) -> Result<Option<ResumeDocument>, StoreError>;

    async fn record_download(&self, id: &str) -> Result<Option<ResumeDocument>, StoreError>;

    /// Newest `lastModified` first.
    async fn list_by_user(
        &self,
        user_id: &str,
        status: Option<ResumeStatus>,
        limit: usize,
    ) -> Result<Vec<ResumeDocument>, StoreError>;

    /// Completed resumes their owners made public, newest `createdAt` first.
    async fn list_public(&self, limit: usize) -> Result<Vec<ResumeDocument>, StoreError>;

    /// Completed resumes flagged as templates, newest `createdAt` first.
    async fn list_templates(&self) -> Result<Vec<ResumeDocument>, StoreError>;

    /// `true` when a document was removed.
    async fn delete(&self, id: &str, user_id: &str) -> Result<bool, StoreError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Mutations shared by every backend. `None` means nothing to write.
// ────────────────────────────────────────────────────────────────────────────

pub(crate) fn with_pdf_url(
    doc: &ResumeDocument,
    pdf_url: &str,
    now: DateTime<Utc>,
) -> Option<ResumeDocument> {
    if doc.pdf_url.as_deref() == Some(pdf_url) {
        return None;
    }
    let mut next = doc.clone();
    next.pdf_url = Some(pdf_url.to_string());
    next.updated_at = now;
    Some(next)
}

pub(crate) fn with_view(
    doc: &ResumeDocument,
    now: DateTime<Utc>,
) -> Option<ResumeDocument> {
    let mut next = doc.clone();
    next.stats.views += 1;
    next.stats.last_viewed = Some(now);
    Some(next)
}

pub(crate) fn with_download(
    doc: &ResumeDocument,
    now: DateTime<Utc>,
) -> Option<ResumeDocument> {
    let mut next = doc.clone();
    next.stats.downloads += 1;
    next.stats.last_downloaded = Some(now);
    Some(next)
}

pub(crate) fn with_patch(
    doc: &ResumeDocument,
    updates: &Map<String, Value>,
    now: DateTime<Utc>,
) -> Result<Option<ResumeDocument>, StoreError> {
    Ok(match apply_patch(doc, updates, now)? {
        PatchOutcome::Changed(next) => Some(next),
        PatchOutcome::Unchanged(_) => None,
    })
}
