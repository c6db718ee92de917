use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use tracing::debug;

use crate::errors::StoreError;

/// Keys the partial-update path never writes. Identity and bookkeeping are
/// owned by the store; stats are mutated only by the view/download recorders.
pub const PROTECTED_KEYS: &[&str] = &[
    "_id",
    "id",
    "userId",
    "createdAt",
    "updatedAt",
    "lastModified",
    "version",
    "stats",
];

const COMPLETION_CHECKS: u32 = 8;
const COMPLETED_THRESHOLD: u32 = 80;

// ────────────────────────────────────────────────────────────────────────────
// Enumerations
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumeStatus {
    #[default]
    Draft,
    Completed,
    Archived,
}

impl ResumeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResumeStatus::Draft => "draft",
            ResumeStatus::Completed => "completed",
            ResumeStatus::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateName {
    #[default]
    Professional,
    Creative,
    Academic,
    Technical,
    Executive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FontFamily {
    #[default]
    Inter,
    Roboto,
    OpenSans,
    Lato,
    SourceSans,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontSize {
    Small,
    #[default]
    Medium,
    Large,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkillLevel {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
    Expert,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkillCategory {
    #[default]
    Technical,
    Language,
    #[serde(rename = "Soft Skills")]
    SoftSkills,
    Tools,
    Other,
}

// ────────────────────────────────────────────────────────────────────────────
// Document
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResumeDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub personal_info: PersonalInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub experience: Vec<Experience>,
    pub education: Vec<Education>,
    pub skills: Vec<Skill>,
    pub projects: Vec<Project>,
    pub certifications: Vec<Certification>,
    pub custom_sections: Vec<CustomSection>,
    pub template: TemplateSettings,
    pub is_public: bool,
    pub is_template: bool,
    pub status: ResumeStatus,
    pub version: u32,
    pub last_modified: DateTime<Utc>,
    pub stats: ResumeStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ResumeDocument {
    fn default() -> Self {
        let epoch = DateTime::<Utc>::default();
        Self {
            id: String::new(),
            user_id: String::new(),
            title: String::new(),
            personal_info: PersonalInfo::default(),
            summary: None,
            experience: Vec::new(),
            education: Vec::new(),
            skills: Vec::new(),
            projects: Vec::new(),
            certifications: Vec::new(),
            custom_sections: Vec::new(),
            template: TemplateSettings::default(),
            is_public: false,
            is_template: false,
            status: ResumeStatus::Draft,
            version: 1,
            last_modified: epoch,
            stats: ResumeStats::default(),
            pdf_url: None,
            attachments: Vec::new(),
            created_at: epoch,
            updated_at: epoch,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersonalInfo {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Address {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experience {
    pub job_title: String,
    pub company: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(with = "flexible_date")]
    pub start_date: NaiveDate,
    #[serde(default, with = "flexible_date::option")]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub current: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub achievements: Vec<String>,
    #[serde(default)]
    pub technologies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Education {
    pub institution: String,
    pub degree: String,
    #[serde(default)]
    pub field_of_study: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(with = "flexible_date")]
    pub start_date: NaiveDate,
    #[serde(default, with = "flexible_date::option")]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub current: bool,
    #[serde(default)]
    pub gpa: Option<f64>,
    #[serde(default)]
    pub honors: Vec<String>,
    #[serde(default)]
    pub relevant_courses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    pub name: String,
    #[serde(default)]
    pub level: SkillLevel,
    #[serde(default)]
    pub category: SkillCategory,
    #[serde(default)]
    pub years_of_experience: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub technologies: Vec<String>,
    #[serde(with = "flexible_date")]
    pub start_date: NaiveDate,
    #[serde(default, with = "flexible_date::option")]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub current: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub github: Option<String>,
    #[serde(default)]
    pub highlights: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certification {
    pub name: String,
    pub issuer: String,
    #[serde(with = "flexible_date")]
    pub issue_date: NaiveDate,
    #[serde(default, with = "flexible_date::option")]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default)]
    pub credential_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub never_expires: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomSection {
    pub title: String,
    #[serde(default)]
    pub content: Vec<CustomSectionItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomSectionItem {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(with = "flexible_date::option")]
    pub date: Option<NaiveDate>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateSettings {
    pub name: TemplateName,
    pub theme: Theme,
    pub layout: Layout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Theme {
    pub primary_color: String,
    pub secondary_color: String,
    pub font_family: FontFamily,
    pub font_size: FontSize,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            primary_color: "#2563eb".to_string(),
            secondary_color: "#64748b".to_string(),
            font_family: FontFamily::default(),
            font_size: FontSize::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Layout {
    pub sections: Vec<LayoutSection>,
    pub columns: u8,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            sections: Vec::new(),
            columns: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutSection {
    pub name: String,
    pub order: i32,
    #[serde(default = "default_true")]
    pub visible: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResumeStats {
    pub views: u64,
    pub downloads: u64,
    pub last_viewed: Option<DateTime<Utc>>,
    pub last_downloaded: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: u64,
    pub url: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Row shape of the `resumes` table. The document itself lives in `document`.
#[derive(Debug, Clone, FromRow)]
pub struct ResumeRow {
    pub id: String,
    pub user_id: String,
    pub document: Value,
    pub etag: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResumeRow {
    pub fn into_document(self) -> Result<ResumeDocument, StoreError> {
        Ok(serde_json::from_value(self.document)?)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Derived values
// ────────────────────────────────────────────────────────────────────────────

impl ResumeDocument {
    /// Builds a new document from client-supplied fields. Identity and
    /// bookkeeping keys in `draft` are ignored.
    pub fn from_draft(
        id: &str,
        user_id: &str,
        draft: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        let mut value = Value::Object(Map::new());
        set_fields(&mut value, draft);
        let mut doc: ResumeDocument = serde_json::from_value(value)?;
        doc.id = id.to_string();
        doc.user_id = user_id.to_string();
        doc.version = 1;
        doc.stats = ResumeStats::default();
        doc.created_at = now;
        doc.updated_at = now;
        doc.last_modified = now;
        doc.normalize();
        doc.promote_status();
        doc.validate()?;
        Ok(doc)
    }

    pub fn full_name(&self) -> String {
        format!(
            "{} {}",
            self.personal_info.first_name, self.personal_info.last_name
        )
        .trim()
        .to_string()
    }

    /// Percentage of the eight headline sections that are filled in.
    pub fn completion_percentage(&self) -> u32 {
        let info = &self.personal_info;
        let has = |s: &Option<String>| s.as_deref().is_some_and(|v| !v.trim().is_empty());
        let checks = [
            !info.first_name.is_empty() && !info.last_name.is_empty() && !info.email.is_empty(),
            has(&self.summary),
            !self.experience.is_empty(),
            !self.education.is_empty(),
            !self.skills.is_empty(),
            has(&info.phone),
            info.address.as_ref().is_some_and(|a| has(&a.city)),
            !self.projects.is_empty(),
        ];
        let completed = checks.iter().filter(|c| **c).count() as f64;
        (completed / COMPLETION_CHECKS as f64 * 100.0).round() as u32
    }

    /// Total years across experience entries, one decimal. Current roles run to `today`.
    pub fn total_experience_years(&self, today: NaiveDate) -> f64 {
        let days: i64 = self
            .experience
            .iter()
            .map(|exp| {
                let end = if exp.current {
                    today
                } else {
                    exp.end_date.unwrap_or(exp.start_date)
                };
                (end - exp.start_date).num_days().max(0)
            })
            .sum();
        let years = days as f64 / 365.25;
        (years * 10.0).round() / 10.0
    }

    fn promote_status(&mut self) {
        if self.status == ResumeStatus::Draft && self.completion_percentage() >= COMPLETED_THRESHOLD
        {
            self.status = ResumeStatus::Completed;
        }
    }

    /// Content hash used for check-and-set writes.
    pub fn etag(&self) -> Result<String, StoreError> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Trims and lowercases the contact email.
    pub fn normalize(&mut self) {
        self.personal_info.email = self.personal_info.email.trim().to_lowercase();
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        let mut problems = Problems::default();

        problems.required("Resume title", &self.title, 100);
        problems.max_len("Summary", self.summary.as_deref(), 1000);

        let info = &self.personal_info;
        problems.max_len("First name", Some(info.first_name.as_str()), 50);
        problems.max_len("Last name", Some(info.last_name.as_str()), 50);
        if !info.email.trim().is_empty() {
            problems.pattern("email address", Some(info.email.as_str()), email_pattern());
        }
        problems.max_len("Phone number", info.phone.as_deref(), 20);
        if let Some(address) = &info.address {
            problems.max_len("Street", address.street.as_deref(), 100);
            problems.max_len("City", address.city.as_deref(), 50);
            problems.max_len("State", address.state.as_deref(), 50);
            problems.max_len("Zip code", address.zip_code.as_deref(), 20);
            problems.max_len("Country", address.country.as_deref(), 50);
        }
        problems.pattern("website URL", info.website.as_deref(), url_pattern());
        problems.pattern("LinkedIn URL", info.linkedin.as_deref(), linkedin_pattern());
        problems.pattern("GitHub URL", info.github.as_deref(), github_pattern());

        for exp in &self.experience {
            problems.required("Job title", &exp.job_title, 100);
            problems.required("Company name", &exp.company, 100);
            problems.max_len("Location", exp.location.as_deref(), 100);
            problems.max_len("Description", exp.description.as_deref(), 2000);
            problems.each("Achievement", &exp.achievements, 500);
            problems.each("Technology name", &exp.technologies, 50);
            problems.range("experience", exp.start_date, exp.end_date);
        }
        for edu in &self.education {
            problems.required("Institution name", &edu.institution, 100);
            problems.required("Degree", &edu.degree, 100);
            problems.max_len("Field of study", edu.field_of_study.as_deref(), 100);
            problems.max_len("Location", edu.location.as_deref(), 100);
            problems.each("Honor", &edu.honors, 100);
            problems.each("Course name", &edu.relevant_courses, 100);
            problems.range("education", edu.start_date, edu.end_date);
            if edu.gpa.is_some_and(|g| !(0.0..=4.0).contains(&g)) {
                problems.push(format!("GPA for {} must be between 0 and 4.0", edu.institution));
            }
        }
        for skill in &self.skills {
            problems.required("Skill name", &skill.name, 50);
            if skill
                .years_of_experience
                .is_some_and(|y| !(0.0..=50.0).contains(&y))
            {
                problems.push(format!(
                    "Years of experience for {} must be between 0 and 50",
                    skill.name
                ));
            }
        }
        for project in &self.projects {
            problems.required("Project name", &project.name, 100);
            problems.required("Project description", &project.description, 1000);
            problems.each("Technology name", &project.technologies, 50);
            problems.each("Highlight", &project.highlights, 300);
            problems.pattern("project URL", project.url.as_deref(), url_pattern());
            problems.pattern("GitHub URL", project.github.as_deref(), github_pattern());
            problems.range("project", project.start_date, project.end_date);
        }
        for cert in &self.certifications {
            problems.required("Certification name", &cert.name, 100);
            problems.required("Issuer name", &cert.issuer, 100);
            problems.max_len("Credential ID", cert.credential_id.as_deref(), 100);
            problems.pattern("certification URL", cert.url.as_deref(), url_pattern());
            if cert.expiry_date.is_some_and(|e| e < cert.issue_date) {
                problems.push(format!("Expiry date must be after issue date ({})", cert.name));
            }
        }
        for section in &self.custom_sections {
            problems.required("Section title", &section.title, 50);
            for item in &section.content {
                problems.max_len("Content title", item.title.as_deref(), 100);
                problems.max_len("Content description", item.description.as_deref(), 1000);
                problems.pattern("content URL", item.url.as_deref(), url_pattern());
            }
        }

        let theme = &self.template.theme;
        for color in [&theme.primary_color, &theme.secondary_color] {
            if !is_hex_color(color) {
                problems.push(format!("'{color}' is not a valid hex color"));
            }
        }
        if !(1..=2).contains(&self.template.layout.columns) {
            problems.push("Layout columns must be 1 or 2".to_string());
        }

        problems.into_result()
    }

    /// Copy suitable for inserting as a new draft.
    pub fn duplicate(&self, new_id: &str, now: DateTime<Utc>) -> Self {
        let mut copy = self.clone();
        copy.id = new_id.to_string();
        copy.title = format!("{} (Copy)", self.title);
        copy.status = ResumeStatus::Draft;
        copy.version = 1;
        copy.stats = ResumeStats::default();
        copy.pdf_url = None;
        copy.created_at = now;
        copy.updated_at = now;
        copy.last_modified = now;
        copy
    }
}

/// Validation failures, reported together.
#[derive(Default)]
struct Problems(Vec<String>);

impl Problems {
    fn push(&mut self, problem: String) {
        self.0.push(problem);
    }

    fn required(&mut self, label: &str, value: &str, max: usize) {
        if value.trim().is_empty() {
            self.push(format!("{label} is required"));
        } else {
            self.max_len(label, Some(value), max);
        }
    }

    fn max_len(&mut self, label: &str, value: Option<&str>, max: usize) {
        if value.is_some_and(|v| v.trim().chars().count() > max) {
            self.push(format!("{label} cannot exceed {max} characters"));
        }
    }

    fn each(&mut self, label: &str, values: &[String], max: usize) {
        for value in values {
            self.max_len(label, Some(value.as_str()), max);
        }
    }

    /// Empty values are treated as absent.
    fn pattern(&mut self, label: &str, value: Option<&str>, pattern: &Regex) {
        let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return;
        };
        if !pattern.is_match(value) {
            self.push(format!("'{value}' is not a valid {label}"));
        }
    }

    fn range(&mut self, section: &str, start: NaiveDate, end: Option<NaiveDate>) {
        if end.is_some_and(|e| e < start) {
            self.push(format!("End date must be after start date ({section})"));
        }
    }

    fn into_result(self) -> Result<(), StoreError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Validation(self.0.join("; ")))
        }
    }
}

fn compiled(cell: &'static OnceLock<Regex>, source: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(source).expect("static pattern compiles"))
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    compiled(
        &PATTERN,
        r"^[A-Za-z0-9_]+([.-]?[A-Za-z0-9_]+)*@[A-Za-z0-9_]+([.-]?[A-Za-z0-9_]+)*(\.[A-Za-z0-9_]{2,3})+$",
    )
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    compiled(&PATTERN, r"^https?://.+")
}

fn linkedin_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    compiled(&PATTERN, r"^https?://(www\.)?linkedin\.com/.+")
}

fn github_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    compiled(&PATTERN, r"^https?://(www\.)?github\.com/.+")
}

fn is_hex_color(s: &str) -> bool {
    s.len() == 7
        && s.starts_with('#')
        && s[1..].chars().all(|c| c.is_ascii_hexdigit())
}

// ────────────────────────────────────────────────────────────────────────────
// Partial update
// ────────────────────────────────────────────────────────────────────────────

/// Result of merging a partial update onto a document.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOutcome {
    /// Content changed; the new document carries bumped bookkeeping.
    Changed(ResumeDocument),
    /// The update was already reflected in the document.
    Unchanged(ResumeDocument),
}

impl PatchOutcome {
    pub fn into_document(self) -> ResumeDocument {
        match self {
            PatchOutcome::Changed(doc) | PatchOutcome::Unchanged(doc) => doc,
        }
    }
}

/// Applies `updates` with `$set` semantics: top-level keys replace the field,
/// dotted keys set a nested field.
pub fn apply_patch(
    doc: &ResumeDocument,
    updates: &Map<String, Value>,
    now: DateTime<Utc>,
) -> Result<PatchOutcome, StoreError> {
    let mut merged = serde_json::to_value(doc)?;
    set_fields(&mut merged, updates);

    let mut next: ResumeDocument = serde_json::from_value(merged)
        .map_err(|e| StoreError::Validation(format!("update does not fit the resume schema: {e}")))?;
    // derived fields first, so a replay compares equal to what was stored
    next.normalize();
    next.promote_status();
    if next == *doc {
        return Ok(PatchOutcome::Unchanged(next));
    }

    next.validate()?;
    next.version = doc.version + 1;
    next.last_modified = now;
    next.updated_at = now;
    Ok(PatchOutcome::Changed(next))
}

fn set_fields(target: &mut Value, updates: &Map<String, Value>) {
    for (key, value) in updates {
        let root = key.split('.').next().unwrap_or(key);
        if PROTECTED_KEYS.contains(&root) {
            debug!(key = %key, "Ignoring protected key in resume update");
            continue;
        }
        set_path(target, key, value.clone());
    }
}

/// Numeric segments index into arrays. A path to a missing element leaves the
/// document untouched.
fn set_path(target: &mut Value, path: &str, value: Value) {
    let mut current = target;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !current.is_array() && !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let slot = match current {
            Value::Array(items) => {
                match segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                    Some(slot) => slot,
                    None => {
                        debug!(path, "Ignoring update to a missing array element");
                        return;
                    }
                }
            }
            Value::Object(map) => map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            _ => return,
        };
        if segments.peek().is_none() {
            *slot = value;
            return;
        }
        current = slot;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Analytics
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub draft: usize,
    pub completed: usize,
    pub archived: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeAnalytics {
    pub total_resumes: usize,
    pub total_views: u64,
    pub total_downloads: u64,
    pub avg_completion: f64,
    pub status_counts: StatusCounts,
}

impl ResumeAnalytics {
    pub fn from_documents(docs: &[ResumeDocument]) -> Self {
        let mut analytics = ResumeAnalytics {
            total_resumes: docs.len(),
            ..Default::default()
        };
        if docs.is_empty() {
            return analytics;
        }
        let mut completion_sum = 0u64;
        for doc in docs {
            analytics.total_views += doc.stats.views;
            analytics.total_downloads += doc.stats.downloads;
            completion_sum += u64::from(doc.completion_percentage());
            match doc.status {
                ResumeStatus::Draft => analytics.status_counts.draft += 1,
                ResumeStatus::Completed => analytics.status_counts.completed += 1,
                ResumeStatus::Archived => analytics.status_counts.archived += 1,
            }
        }
        analytics.avg_completion = completion_sum as f64 / docs.len() as f64;
        analytics
    }
}

/// Calendar dates that accept `YYYY-MM-DD` or a full RFC 3339 timestamp.
mod flexible_date {
    use chrono::{DateTime, NaiveDate};
    use serde::{de, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d";

    fn parse<E: de::Error>(raw: &str) -> Result<NaiveDate, E> {
        NaiveDate::parse_from_str(raw, FORMAT)
            .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.date_naive()))
            .map_err(|_| E::custom(format!("invalid date '{raw}'")))
    }

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw)
    }

    pub mod option {
        use chrono::NaiveDate;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            date: &Option<NaiveDate>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match date {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<NaiveDate>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) if !raw.is_empty() => super::parse(&raw).map(Some),
                _ => Ok(None),
            }
        }
    }
}
