use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Normalized interaction event. Timestamps are naive UTC; `week` is the
/// Monday of the ISO week containing `started_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub user_id: String,
    pub started_at: NaiveDateTime,
    pub ended_at: NaiveDateTime,
    pub duration_minutes: f64,
    pub week: NaiveDate,
}

/// Profile-completeness bucket, derived once at ingestion from the number
/// of stages a teacher selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
    Empty,
    Partial,
    Complete,
}

/// Teacher dimension row after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Teacher {
    pub user_id: String,
    pub entry_date: NaiveDateTime,
    pub entry_week: NaiveDate,
    pub state: Option<String>,
    pub utm_source: Option<String>,
    pub selected_stages: Option<String>,
    pub is_valid: bool,
    pub completeness: Completeness,
}

/// Per-user RFM metrics and quintile scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RfmRecord {
    pub user_id: String,
    pub recency_days: i64,
    pub frequency: u64,
    pub duration_minutes: f64,
    pub r_score: u8,
    pub f_score: u8,
    pub m_score: u8,
    pub segment: String,
    pub rfm_score: u8,
}

/// Joined output row: teacher dimension attributes plus RFM scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeacherRecord {
    pub user_id: String,
    pub entry_date: NaiveDateTime,
    pub entry_week: NaiveDate,
    pub state: Option<String>,
    pub utm_source: Option<String>,
    pub is_valid: bool,
    pub completeness: Completeness,
    pub recency_days: i64,
    pub frequency: u64,
    pub duration_minutes: f64,
    pub r_score: u8,
    pub f_score: u8,
    pub m_score: u8,
    pub segment: String,
    pub rfm_score: u8,
}

/// Joined output row: event fields plus the owning teacher's attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub user_id: String,
    pub started_at: NaiveDateTime,
    pub ended_at: NaiveDateTime,
    pub duration_minutes: f64,
    pub week: NaiveDate,
    pub state: Option<String>,
    pub utm_source: Option<String>,
    pub is_valid: bool,
}

/// A label with the number of teachers carrying it, for the breakdown
/// charts (state, acquisition channel, segment).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryCount {
    pub label: String,
    pub count: usize,
}

/// One point of a Monday-keyed weekly series.
#[derive(Debug, Clone, PartialEq)]
pub struct WeekPoint {
    pub week_start: NaiveDate,
    pub value: f64,
}

/// The dashboard value-box numbers over a filtered teacher table.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryStats {
    pub teachers: usize,
    pub avg_rfm_score: Option<f64>,
    pub avg_frequency: Option<f64>,
    pub avg_duration_minutes: Option<f64>,
}
