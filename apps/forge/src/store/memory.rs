use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{with_download, with_patch, with_pdf_url, with_view, ResumeStore};
use crate::errors::StoreError;
use crate::models::resume::{ResumeDocument, ResumeStatus};

/// Map-backed store. Each mutation runs under the write lock, which gives the
/// same serialized read-modify-write the Postgres store gets from its etag check.
#[derive(Debug, Default)]
pub struct InMemoryResumeStore {
    docs: RwLock<HashMap<String, ResumeDocument>>,
    writes: AtomicU64,
}

impl InMemoryResumeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful document writes (inserts and mutations).
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    async fn mutate<F>(
        &self,
        id: &str,
        owner: Option<&str>,
        f: F,
    ) -> Result<Option<ResumeDocument>, StoreError>
    where
        F: FnOnce(&ResumeDocument) -> Result<Option<ResumeDocument>, StoreError> + Send,
    {
        let mut docs = self.docs.write().await;
        let Some(current) = docs.get(id) else {
            return Ok(None);
        };
        if owner.is_some_and(|o| o != current.user_id) {
            return Ok(None);
        }
        match f(current)? {
            Some(next) => {
                docs.insert(id.to_string(), next.clone());
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(Some(next))
            }
            None => Ok(Some(current.clone())),
        }
    }

    async fn completed_where(&self, f: impl Fn(&ResumeDocument) -> bool) -> Vec<ResumeDocument> {
        let docs = self.docs.read().await;
        let mut matching: Vec<ResumeDocument> = docs
            .values()
            .filter(|d| d.status == ResumeStatus::Completed && f(d))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching
    }
}

#[async_trait]
impl ResumeStore for InMemoryResumeStore {
    async fn insert(&self, doc: ResumeDocument) -> Result<ResumeDocument, StoreError> {
        doc.validate()?;
        let mut docs = self.docs.write().await;
        if docs.contains_key(&doc.id) {
            return Err(StoreError::Validation(format!(
                "Resume {} already exists",
                doc.id
            )));
        }
        docs.insert(doc.id.clone(), doc.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(doc)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ResumeDocument>, StoreError> {
        Ok(self.docs.read().await.get(id).cloned())
    }

    async fn find_owned(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<Option<ResumeDocument>, StoreError> {
        Ok(self
            .docs
            .read()
            .await
            .get(id)
            .filter(|d| d.user_id == user_id)
            .cloned())
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
        let docs = self.docs.read().await;
        let mut owned: Vec<ResumeDocument> = docs
            .values()
            .filter(|d| d.user_id == user_id)
            .filter(|d| status.map_or(true, |s| d.status == s))
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        owned.truncate(limit);
        Ok(owned)
    }

    async fn list_public(&self, limit: usize) -> Result<Vec<ResumeDocument>, StoreError> {
        let mut public = self.completed_where(|d| d.is_public).await;
        public.truncate(limit);
        Ok(public)
    }

    async fn list_templates(&self) -> Result<Vec<ResumeDocument>, StoreError> {
        Ok(self.completed_where(|d| d.is_template).await)
    }

    async fn delete(&self, id: &str, user_id: &str) -> Result<bool, StoreError> {
        let mut docs = self.docs.write().await;
        if docs.get(id).is_some_and(|d| d.user_id == user_id) {
            docs.remove(id);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    use super::*;

    fn doc(id: &str, user: &str) -> ResumeDocument {
        ResumeDocument {
            id: id.into(),
            user_id: user.into(),
            title: format!("Resume {id}"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_find_and_update_requires_owner() {
        let store = InMemoryResumeStore::new();
        store.insert(doc("r1", "u1")).await.unwrap();
        let updates = json!({"title": "Stolen"}).as_object().unwrap().clone();

        assert!(store
            .find_and_update("r1", "u2", &updates)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_and_update("missing", "u1", &updates)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.find_by_id("r1").await.unwrap().unwrap().title, "Resume r1");
    }

    #[tokio::test]
    async fn test_replayed_update_does_not_write() {
        let store = InMemoryResumeStore::new();
        store.insert(doc("r1", "u1")).await.unwrap();
        let updates = json!({"title": "New"}).as_object().unwrap().clone();

        let first = store.find_and_update("r1", "u1", &updates).await.unwrap().unwrap();
        let writes = store.write_count();
        let second = store.find_and_update("r1", "u1", &updates).await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn test_stats_recorders_leave_version_alone() {
        let store = InMemoryResumeStore::new();
        store.insert(doc("r1", "u1")).await.unwrap();
        store.record_view("r1").await.unwrap();
        store.record_view("r1").await.unwrap();
        let after = store.record_download("r1").await.unwrap().unwrap();

        assert_eq!(after.stats.views, 2);
        assert_eq!(after.stats.downloads, 1);
        assert!(after.stats.last_viewed.is_some());
        assert_eq!(after.version, 1);
        assert!(store.record_view("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_pdf_url_is_idempotent() {
        let store = InMemoryResumeStore::new();
        store.insert(doc("r1", "u1")).await.unwrap();
        let url = "https://storage.devresume.com/u1/r1.pdf";

        let first = store.set_pdf_url("r1", "u1", url).await.unwrap().unwrap();
        let writes = store.write_count();
        let second = store.set_pdf_url("r1", "u1", url).await.unwrap().unwrap();
        assert_eq!(first.pdf_url.as_deref(), Some(url));
        assert_eq!(first, second);
        assert_eq!(store.write_count(), writes);
        assert!(store.set_pdf_url("r1", "u2", url).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_user_filters_and_sorts() {
        let store = InMemoryResumeStore::new();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            let mut d = doc(id, "u1");
            d.last_modified = base + Duration::days(i as i64);
            if *id == "b" {
                d.status = ResumeStatus::Archived;
            }
            store.insert(d).await.unwrap();
        }
        store.insert(doc("other", "u2")).await.unwrap();

        let all = store.list_by_user("u1", None, 50).await.unwrap();
        assert_eq!(
            all.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
            vec!["c", "b", "a"]
        );
        let drafts = store
            .list_by_user("u1", Some(ResumeStatus::Draft), 1)
            .await
            .unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].id, "c");
    }

    #[tokio::test]
    async fn test_public_and_template_listings_only_show_completed() {
        let store = InMemoryResumeStore::new();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let shelf = [
            ("old-public", true, false, ResumeStatus::Completed),
            ("new-public", true, false, ResumeStatus::Completed),
            ("public-draft", true, false, ResumeStatus::Draft),
            ("private", false, false, ResumeStatus::Completed),
            ("template", false, true, ResumeStatus::Completed),
            ("archived-template", false, true, ResumeStatus::Archived),
        ];
        for (i, (id, is_public, is_template, status)) in shelf.into_iter().enumerate() {
            let mut d = doc(id, "u1");
            d.created_at = base + Duration::days(i as i64);
            d.is_public = is_public;
            d.is_template = is_template;
            d.status = status;
            store.insert(d).await.unwrap();
        }

        let public = store.list_public(20).await.unwrap();
        assert_eq!(
            public.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
            vec!["new-public", "old-public"]
        );
        assert_eq!(store.list_public(1).await.unwrap()[0].id, "new-public");

        let templates = store.list_templates().await.unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].id, "template");
    }

    #[tokio::test]
    async fn test_delete_requires_owner() {
        let store = InMemoryResumeStore::new();
        store.insert(doc("r1", "u1")).await.unwrap();
        assert!(!store.delete("r1", "u2").await.unwrap());
        assert!(store.delete("r1", "u1").await.unwrap());
        assert!(store.find_by_id("r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicates_and_invalid_documents() {
        let store = InMemoryResumeStore::new();
        store.insert(doc("r1", "u1")).await.unwrap();
        assert!(store.insert(doc("r1", "u1")).await.is_err());

        let mut untitled = doc("r2", "u1");
        untitled.title.clear();
        assert!(matches!(
            store.insert(untitled).await,
            Err(StoreError::Validation(_))
        ));
    }
}
