//! Work item envelope shared by every producer and consumer of the pipeline.
//!
//! Wire shape: `{ "type": "...", "data": { ... }, "timestamp": "<ISO-8601>" }`.
//! The field names inside `data` are camelCase to stay compatible with the
//! existing producers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_TEMPLATE: &str = "default";
pub const RESUME_UPDATED_MESSAGE: &str = "Your resume has been updated successfully";
pub const PDF_GENERATED_MESSAGE: &str = "Your resume PDF has been generated successfully";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkItemKind {
    ResumeUpdate,
    PdfGeneration,
    Notification,
}

impl WorkItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemKind::ResumeUpdate => "RESUME_UPDATE",
            WorkItemKind::PdfGeneration => "PDF_GENERATION",
            WorkItemKind::Notification => "NOTIFICATION",
        }
    }
}

impl fmt::Display for WorkItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RESUME_UPDATE" => Ok(WorkItemKind::ResumeUpdate),
            "PDF_GENERATION" => Ok(WorkItemKind::PdfGeneration),
            "NOTIFICATION" => Ok(WorkItemKind::Notification),
            other => Err(format!("unknown work item type '{other}'")),
        }
    }
}

/// One unit of asynchronous work as it travels through a queue.
///
/// `kind` keeps the raw `type` string so that unrecognized types survive
/// parsing and can be routed to the dead-letter path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: String,
}

impl WorkItem {
    pub fn new<T: Serialize>(kind: WorkItemKind, data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: kind.as_str().to_string(),
            data: serde_json::to_value(data)?,
            timestamp: iso_timestamp(Utc::now()),
        })
    }

    pub fn kind(&self) -> Option<WorkItemKind> {
        self.kind.parse().ok()
    }

    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes `data` into the payload type for this item's kind.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

/// Millisecond-precision UTC timestamp with a `Z` suffix.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ────────────────────────────────────────────────────────────────────────────
// Payloads
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeUpdatePayload {
    pub user_id: String,
    pub resume_id: String,
    #[serde(default)]
    pub updates: Map<String, Value>,
    #[serde(default)]
    pub generate_pdf: bool,
}

impl ResumeUpdatePayload {
    /// Template requested by the update itself, if it names one.
    pub fn requested_template(&self) -> String {
        self.updates
            .get("template")
            .and_then(|t| t.get("name"))
            .and_then(Value::as_str)
            .or_else(|| self.updates.get("template.name").and_then(Value::as_str))
            .unwrap_or(DEFAULT_TEMPLATE)
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfGenerationPayload {
    pub user_id: String,
    pub resume_id: String,
    #[serde(default = "default_template")]
    pub template: String,
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    ResumeUpdated,
    PdfGenerated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl NotificationPayload {
    pub fn resume_updated(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            kind: NotificationKind::ResumeUpdated,
            message: RESUME_UPDATED_MESSAGE.to_string(),
            data: None,
        }
    }

    pub fn pdf_generated(user_id: &str, pdf_url: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            kind: NotificationKind::PdfGenerated,
            message: PDF_GENERATED_MESSAGE.to_string(),
            data: Some(serde_json::json!({ "pdfUrl": pdf_url })),
        }
    }
}

/// Body forwarded to the dead-letter queue for messages that cannot be processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub source_queue: String,
    pub reason: String,
    pub message_id: String,
    pub body: String,
    pub dead_lettered_at: String,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let payload = PdfGenerationPayload {
            user_id: "u1".into(),
            resume_id: "r1".into(),
            template: "technical".into(),
        };
        let item = WorkItem::new(WorkItemKind::PdfGeneration, &payload).unwrap();
        let value: Value = serde_json::from_str(&item.to_body().unwrap()).unwrap();

        assert_eq!(value["type"], "PDF_GENERATION");
        assert_eq!(value["data"]["userId"], "u1");
        assert_eq!(value["data"]["resumeId"], "r1");
        assert_eq!(value["data"]["template"], "technical");
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_iso_timestamp_has_millisecond_precision() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(iso_timestamp(at), "2024-05-01T12:00:00.000Z");
    }

    #[test]
    fn test_unknown_kind_still_parses() {
        let item = WorkItem::parse(r#"{"type":"BOGUS","data":{},"timestamp":""}"#).unwrap();
        assert_eq!(item.kind, "BOGUS");
        assert!(item.kind().is_none());
    }

    #[test]
    fn test_envelope_without_data_or_timestamp_parses() {
        let item = WorkItem::parse(r#"{"type":"BOGUS"}"#).unwrap();
        assert_eq!(item.data, Value::Null);
        assert_eq!(item.timestamp, "");
    }

    #[test]
    fn test_resume_update_payload_defaults() {
        let item = WorkItem::parse(
            r#"{"type":"RESUME_UPDATE","data":{"userId":"u1","resumeId":"r1","updates":{"title":"T"}},"timestamp":"x"}"#,
        )
        .unwrap();
        assert_eq!(item.kind(), Some(WorkItemKind::ResumeUpdate));
        let payload: ResumeUpdatePayload = item.payload().unwrap();
        assert!(!payload.generate_pdf);
        assert_eq!(payload.updates["title"], "T");
    }

    #[test]
    fn test_pdf_payload_template_defaults() {
        let payload: PdfGenerationPayload =
            serde_json::from_value(json!({"userId": "u1", "resumeId": "r1"})).unwrap();
        assert_eq!(payload.template, "default");
    }

    #[test]
    fn test_requested_template_from_nested_or_dotted_key() {
        let nested = ResumeUpdatePayload {
            user_id: "u1".into(),
            resume_id: "r1".into(),
            updates: json!({"template": {"name": "creative"}}).as_object().unwrap().clone(),
            generate_pdf: true,
        };
        assert_eq!(nested.requested_template(), "creative");

        let dotted = ResumeUpdatePayload {
            updates: json!({"template.name": "academic"}).as_object().unwrap().clone(),
            ..nested.clone()
        };
        assert_eq!(dotted.requested_template(), "academic");

        let none = ResumeUpdatePayload {
            updates: Map::new(),
            ..nested
        };
        assert_eq!(none.requested_template(), "default");
    }

    #[test]
    fn test_notification_serialization_omits_missing_data() {
        let value = serde_json::to_value(NotificationPayload::resume_updated("u1")).unwrap();
        assert_eq!(value["type"], "RESUME_UPDATED");
        assert!(value.get("data").is_none());

        let value =
            serde_json::to_value(NotificationPayload::pdf_generated("u1", "https://x/a.pdf"))
                .unwrap();
        assert_eq!(value["type"], "PDF_GENERATED");
        assert_eq!(value["data"]["pdfUrl"], "https://x/a.pdf");
    }
}
