use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime};
use tracing::warn;

use crate::error::TransformError;
use crate::models::{Completeness, InteractionEvent, Teacher};

/// Counts reported back from a single table load. `dropped` rows were
/// rejected for a missing user id or an unparseable timestamp; they never
/// reach the aggregates.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestStats {
    pub rows: usize,
    pub dropped: usize,
    pub negative_spans: usize,
}

/// Parse a raw timestamp into naive UTC. Offset-carrying RFC 3339 strings
/// are shifted to UTC before the offset is dropped; naive strings are taken
/// as already-UTC. This is the only place timezone handling happens.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(aware) = DateTime::parse_from_rfc3339(raw) {
        return Some(aware.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Monday of the ISO week containing `ts`.
pub fn week_start(ts: NaiveDateTime) -> NaiveDate {
    let date = ts.date();
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

fn completeness_bucket(selected_stages: Option<&str>) -> Completeness {
    let stages = match selected_stages {
        Some(s) if !s.trim().is_empty() => s,
        _ => return Completeness::Empty,
    };
    let count = stages.split(',').filter(|s| !s.trim().is_empty()).count();
    if count >= 3 {
        Completeness::Complete
    } else {
        Completeness::Partial
    }
}

/// Read the raw event table, normalizing timestamps and deriving
/// `duration_minutes` and the week bucket. Malformed rows are dropped and
/// counted; negative spans are clamped to zero minutes and counted.
pub fn load_events(path: &std::path::Path) -> Result<(Vec<InteractionEvent>, IngestStats), TransformError> {
    #[derive(serde::Deserialize)]
    struct RawEventRow {
        user_id: Option<String>,
        started_at: Option<String>,
        ended_at: Option<String>,
    }

    let mut reader = csv::Reader::from_path(path)?;
    let mut events = Vec::new();
    let mut stats = IngestStats::default();

    for result in reader.deserialize::<RawEventRow>() {
        let row = result?;
        stats.rows += 1;

        let user_id = match row.user_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => {
                stats.dropped += 1;
                continue;
            }
        };
        let parsed = row
            .started_at
            .as_deref()
            .and_then(parse_timestamp)
            .zip(row.ended_at.as_deref().and_then(parse_timestamp));
        let (started_at, ended_at) = match parsed {
            Some(pair) => pair,
            None => {
                stats.dropped += 1;
                continue;
            }
        };

        let mut duration_minutes = (ended_at - started_at).num_milliseconds() as f64 / 60_000.0;
        if duration_minutes < 0.0 {
            stats.negative_spans += 1;
            duration_minutes = 0.0;
        }

        events.push(InteractionEvent {
            week: week_start(started_at),
            user_id,
            started_at,
            ended_at,
            duration_minutes,
        });
    }

    if stats.dropped > 0 {
        warn!(dropped = stats.dropped, total = stats.rows, "dropped malformed event rows");
    }
    if stats.negative_spans > 0 {
        warn!(count = stats.negative_spans, "clamped events with ended_at before started_at");
    }

    Ok((events, stats))
}

/// Read the raw teacher dimension table. The validity flag and the
/// completeness bucket are derived here, once, so every downstream filter
/// sees the same values.
pub fn load_teachers(path: &std::path::Path) -> Result<(Vec<Teacher>, IngestStats), TransformError> {
    #[derive(serde::Deserialize)]
    struct RawTeacherRow {
        user_id: Option<String>,
        entry_date: Option<String>,
        state: Option<String>,
        utm_source: Option<String>,
        selected_stages: Option<String>,
    }

    let mut reader = csv::Reader::from_path(path)?;
    let mut teachers = Vec::new();
    let mut stats = IngestStats::default();

    for result in reader.deserialize::<RawTeacherRow>() {
        let row = result?;
        stats.rows += 1;

        let user_id = match row.user_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => {
                stats.dropped += 1;
                continue;
            }
        };
        let entry_date = match row.entry_date.as_deref().and_then(parse_timestamp) {
            Some(ts) => ts,
            None => {
                stats.dropped += 1;
                continue;
            }
        };

        let is_valid = row
            .selected_stages
            .as_deref()
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false);
        teachers.push(Teacher {
            entry_week: week_start(entry_date),
            completeness: completeness_bucket(row.selected_stages.as_deref()),
            user_id,
            entry_date,
            state: row.state,
            utm_source: row.utm_source,
            selected_stages: row.selected_stages,
            is_valid,
        });
    }

    if stats.dropped > 0 {
        warn!(dropped = stats.dropped, total = stats.rows, "dropped malformed teacher rows");
    }

    Ok((teachers, stats))
}

/// Write a transformed table as CSV, overwriting any previous run.
pub fn write_table<T: serde::Serialize>(
    path: &std::path::Path,
    rows: &[T],
) -> Result<(), TransformError> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a transformed table back for the query commands.
pub fn read_table<T: serde::de::DeserializeOwned>(
    path: &std::path::Path,
) -> Result<Vec<T>, TransformError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for result in reader.deserialize::<T>() {
        rows.push(result?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn aware_and_naive_timestamps_normalize_to_same_instant() {
        let aware = parse_timestamp("2024-03-01T10:00:00-03:00").unwrap();
        let naive = parse_timestamp("2024-03-01 13:00:00").unwrap();
        assert_eq!(aware, naive);
    }

    #[test]
    fn parses_bare_dates_as_midnight() {
        let ts = parse_timestamp("2024-03-04").unwrap();
        assert_eq!(ts, NaiveDate::from_ymd_opt(2024, 3, 4).unwrap().and_hms_opt(0, 0, 0).unwrap());
    }

    #[test]
    fn rejects_garbage_timestamps() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("not-a-date").is_none());
        assert!(parse_timestamp("2024-13-40").is_none());
    }

    #[test]
    fn week_start_aligns_to_monday() {
        // 2024-03-07 is a Thursday; its week starts 2024-03-04.
        let thursday = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap().and_hms_opt(15, 30, 0).unwrap();
        assert_eq!(week_start(thursday), NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        // A Monday maps to itself.
        let monday = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(week_start(monday), NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
    }

    #[test]
    fn completeness_buckets_by_stage_count() {
        assert_eq!(completeness_bucket(None), Completeness::Empty);
        assert_eq!(completeness_bucket(Some("")), Completeness::Empty);
        assert_eq!(completeness_bucket(Some("fundamental_1")), Completeness::Partial);
        assert_eq!(completeness_bucket(Some("fundamental_1,fundamental_2")), Completeness::Partial);
        assert_eq!(
            completeness_bucket(Some("fundamental_1,fundamental_2,medio")),
            Completeness::Complete
        );
    }

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn malformed_event_rows_are_dropped_and_counted() {
        let file = write_csv(
            "user_id,started_at,ended_at\n\
             t1,2024-03-04 10:00:00,2024-03-04 10:30:00\n\
             ,2024-03-04 10:00:00,2024-03-04 10:30:00\n\
             t2,bogus,2024-03-04 10:30:00\n\
             t3,2024-03-04 11:00:00,2024-03-04 11:15:00\n",
        );
        let (events, stats) = load_events(file.path()).unwrap();
        assert_eq!(stats.rows, 4);
        assert_eq!(stats.dropped, 2);
        assert_eq!(events.len(), 2);
        assert!((events[0].duration_minutes - 30.0).abs() < 1e-9);
    }

    #[test]
    fn out_of_order_spans_clamp_to_zero_minutes() {
        let file = write_csv(
            "user_id,started_at,ended_at\n\
             t1,2024-03-04 10:30:00,2024-03-04 10:00:00\n",
        );
        let (events, stats) = load_events(file.path()).unwrap();
        assert_eq!(stats.negative_spans, 1);
        assert_eq!(events[0].duration_minutes, 0.0);
    }

    #[test]
    fn transformed_tables_round_trip_through_csv() {
        use crate::models::TeacherRecord;

        let record = TeacherRecord {
            user_id: "t1".to_string(),
            entry_date: parse_timestamp("2024-01-10 08:00:00").unwrap(),
            entry_week: NaiveDate::from_ymd_opt(2024, 1, 8).unwrap(),
            state: Some("SP".to_string()),
            utm_source: None,
            is_valid: true,
            completeness: Completeness::Partial,
            recency_days: 4,
            frequency: 7,
            duration_minutes: 92.5,
            r_score: 4,
            f_score: 3,
            m_score: 5,
            segment: "435".to_string(),
            rfm_score: 12,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("teachers_entries.csv");
        write_table(&path, &[record.clone()]).unwrap();
        let rows: Vec<TeacherRecord> = read_table(&path).unwrap();
        assert_eq!(rows, vec![record]);
    }

    #[test]
    fn teacher_validity_follows_selected_stages() {
        let file = write_csv(
            "user_id,entry_date,state,utm_source,selected_stages\n\
             t1,2024-01-10 08:00:00,SP,google,\"fundamental_1,fundamental_2\"\n\
             t2,2024-01-11 09:00:00,RJ,facebook,\n",
        );
        let (teachers, stats) = load_teachers(file.path()).unwrap();
        assert_eq!(stats.dropped, 0);
        assert!(teachers[0].is_valid);
        assert_eq!(teachers[0].completeness, Completeness::Partial);
        assert!(!teachers[1].is_valid);
        assert_eq!(teachers[1].completeness, Completeness::Empty);
        assert_eq!(teachers[0].entry_week, NaiveDate::from_ymd_opt(2024, 1, 8).unwrap());
    }
}
