use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::NaiveDate;
use clap::ValueEnum;

use crate::models::{Completeness, EntryRecord, SummaryStats, TeacherRecord, WeekPoint};

/// Criteria the dashboard front-ends hand to the query surface. Absent
/// fields match everything; an inverted range matches nothing. Filtering
/// never mutates the source tables.
#[derive(Debug, Clone, Default)]
pub struct FilterCriteria {
    pub valid_only: bool,
    /// Inclusive range over the registration week bucket.
    pub registered: Option<(NaiveDate, NaiveDate)>,
    /// Inclusive range over the interaction week bucket (entries only).
    pub interacted: Option<(NaiveDate, NaiveDate)>,
    /// Inclusive range over `rfm_score`.
    pub score_range: Option<(u8, u8)>,
    pub completeness: Option<BTreeSet<Completeness>>,
}

/// Numeric columns the aggregate-stat interface can average over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NumericColumn {
    RecencyDays,
    Frequency,
    DurationMinutes,
    RfmScore,
}

/// The time-series metrics the dashboards can plot per registration week.
/// One variant per plot-selector choice; `Registrations` counts rows, the
/// rest average the matching column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TrendMetric {
    Registrations,
    RfmScore,
    Frequency,
    Duration,
}

fn in_range<T: PartialOrd>(value: T, range: Option<(T, T)>) -> bool {
    match range {
        Some((low, high)) => value >= low && value <= high,
        None => true,
    }
}

/// Filtered copy of the teachers table.
pub fn filter_teachers(teachers: &[TeacherRecord], criteria: &FilterCriteria) -> Vec<TeacherRecord> {
    teachers
        .iter()
        .filter(|t| !criteria.valid_only || t.is_valid)
        .filter(|t| in_range(t.entry_week, criteria.registered))
        .filter(|t| in_range(t.rfm_score, criteria.score_range))
        .filter(|t| {
            criteria
                .completeness
                .as_ref()
                .map(|set| set.contains(&t.completeness))
                .unwrap_or(true)
        })
        .cloned()
        .collect()
}

/// Filtered copy of the entries table. Teacher-level criteria (validity,
/// registration window, score range, completeness) are resolved through the
/// teachers table, then the interaction window is applied to the entries
/// themselves.
pub fn filter_entries(
    entries: &[EntryRecord],
    teachers: &[TeacherRecord],
    criteria: &FilterCriteria,
) -> Vec<EntryRecord> {
    let allowed: HashSet<String> = filter_teachers(teachers, criteria)
        .into_iter()
        .map(|t| t.user_id)
        .collect();

    entries
        .iter()
        .filter(|e| allowed.contains(e.user_id.as_str()))
        .filter(|e| in_range(e.week, criteria.interacted))
        .cloned()
        .collect()
}

/// Mean of a numeric column over a filtered teacher table; `None` when the
/// table is empty.
pub fn mean(teachers: &[TeacherRecord], column: NumericColumn) -> Option<f64> {
    if teachers.is_empty() {
        return None;
    }
    let total: f64 = teachers
        .iter()
        .map(|t| match column {
            NumericColumn::RecencyDays => t.recency_days as f64,
            NumericColumn::Frequency => t.frequency as f64,
            NumericColumn::DurationMinutes => t.duration_minutes,
            NumericColumn::RfmScore => t.rfm_score as f64,
        })
        .sum();
    Some(total / teachers.len() as f64)
}

/// The four dashboard value-box numbers.
pub fn summary_stats(teachers: &[TeacherRecord]) -> SummaryStats {
    SummaryStats {
        teachers: teachers.len(),
        avg_rfm_score: mean(teachers, NumericColumn::RfmScore),
        avg_frequency: mean(teachers, NumericColumn::Frequency),
        avg_duration_minutes: mean(teachers, NumericColumn::DurationMinutes),
    }
}

/// Weekly series over the teachers table, keyed by registration week.
pub fn weekly_series(teachers: &[TeacherRecord], metric: TrendMetric) -> Vec<WeekPoint> {
    let mut buckets: BTreeMap<NaiveDate, (usize, f64)> = BTreeMap::new();
    for teacher in teachers {
        let entry = buckets.entry(teacher.entry_week).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += match metric {
            TrendMetric::Registrations => 0.0,
            TrendMetric::RfmScore => teacher.rfm_score as f64,
            TrendMetric::Frequency => teacher.frequency as f64,
            TrendMetric::Duration => teacher.duration_minutes,
        };
    }

    buckets
        .into_iter()
        .map(|(week_start, (count, total))| WeekPoint {
            week_start,
            value: match metric {
                TrendMetric::Registrations => count as f64,
                _ => total / count as f64,
            },
        })
        .collect()
}

/// Weekly interaction counts over the entries table.
pub fn weekly_interactions(entries: &[EntryRecord]) -> Vec<WeekPoint> {
    let mut buckets: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for entry in entries {
        *buckets.entry(entry.week).or_insert(0) += 1;
    }

    buckets
        .into_iter()
        .map(|(week_start, count)| WeekPoint {
            week_start,
            value: count as f64,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn week(d: u32) -> NaiveDate {
        // Mondays in early 2024: Jan 1, 8, 15, 22, ...
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn ts(d: u32) -> NaiveDateTime {
        week(d).and_hms_opt(9, 0, 0).unwrap()
    }

    fn record(user: &str, entry_week_day: u32, rfm_score: u8, is_valid: bool) -> TeacherRecord {
        // Decompose rfm_score (3..=15) into a valid score triple.
        let base = rfm_score - 3;
        let r = 1 + base.min(4);
        let f = 1 + (base - (r - 1)).min(4);
        let m = 1 + (base - (r - 1) - (f - 1));
        TeacherRecord {
            user_id: user.to_string(),
            entry_date: ts(entry_week_day),
            entry_week: week(entry_week_day),
            state: Some("SP".to_string()),
            utm_source: Some("google".to_string()),
            is_valid,
            completeness: if is_valid {
                Completeness::Partial
            } else {
                Completeness::Empty
            },
            recency_days: 10,
            frequency: 4,
            duration_minutes: 120.0,
            r_score: r,
            f_score: f,
            m_score: m,
            segment: format!("{r}{f}{m}"),
            rfm_score,
        }
    }

    fn entry(user: &str, week_day: u32) -> EntryRecord {
        EntryRecord {
            user_id: user.to_string(),
            started_at: ts(week_day),
            ended_at: ts(week_day),
            duration_minutes: 15.0,
            week: week(week_day),
            state: Some("SP".to_string()),
            utm_source: Some("google".to_string()),
            is_valid: true,
        }
    }

    #[test]
    fn valid_only_drops_invalid_teachers() {
        let teachers = vec![record("t1", 1, 9, true), record("t2", 1, 9, false)];
        let criteria = FilterCriteria {
            valid_only: true,
            ..Default::default()
        };
        let filtered = filter_teachers(&teachers, &criteria);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].user_id, "t1");
    }

    #[test]
    fn registration_window_is_inclusive() {
        let teachers = vec![
            record("t1", 1, 9, true),
            record("t2", 8, 9, true),
            record("t3", 15, 9, true),
        ];
        let criteria = FilterCriteria {
            registered: Some((week(1), week(8))),
            ..Default::default()
        };
        let filtered = filter_teachers(&teachers, &criteria);
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn inverted_range_yields_empty_not_error() {
        let teachers = vec![record("t1", 1, 9, true)];
        let criteria = FilterCriteria {
            registered: Some((week(15), week(1))),
            ..Default::default()
        };
        assert!(filter_teachers(&teachers, &criteria).is_empty());
    }

    #[test]
    fn score_range_and_completeness_filters_compose() {
        let teachers = vec![
            record("t1", 1, 5, true),
            record("t2", 1, 9, true),
            record("t3", 1, 12, false),
        ];
        let criteria = FilterCriteria {
            score_range: Some((6, 15)),
            completeness: Some([Completeness::Partial].into_iter().collect()),
            ..Default::default()
        };
        let filtered = filter_teachers(&teachers, &criteria);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].user_id, "t2");
    }

    #[test]
    fn filtering_is_idempotent() {
        let teachers = vec![
            record("t1", 1, 5, true),
            record("t2", 8, 9, false),
            record("t3", 15, 12, true),
        ];
        let criteria = FilterCriteria {
            valid_only: true,
            score_range: Some((3, 10)),
            ..Default::default()
        };
        let once = filter_teachers(&teachers, &criteria);
        let twice = filter_teachers(&once, &criteria);
        assert_eq!(once, twice);
    }

    #[test]
    fn entries_resolve_teacher_criteria_through_the_dimension() {
        let teachers = vec![record("t1", 1, 9, true), record("t2", 1, 9, false)];
        let entries = vec![entry("t1", 8), entry("t2", 8), entry("t1", 22)];
        let criteria = FilterCriteria {
            valid_only: true,
            interacted: Some((week(1), week(15))),
            ..Default::default()
        };
        let filtered = filter_entries(&entries, &teachers, &criteria);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].user_id, "t1");
        assert_eq!(filtered[0].week, week(8));
    }

    #[test]
    fn mean_of_empty_table_is_none() {
        assert_eq!(mean(&[], NumericColumn::RfmScore), None);
        let stats = summary_stats(&[]);
        assert_eq!(stats.teachers, 0);
        assert_eq!(stats.avg_rfm_score, None);
    }

    #[test]
    fn summary_stats_match_column_means() {
        let teachers = vec![record("t1", 1, 6, true), record("t2", 1, 12, true)];
        let stats = summary_stats(&teachers);
        assert_eq!(stats.teachers, 2);
        assert_eq!(stats.avg_rfm_score, Some(9.0));
        assert_eq!(stats.avg_frequency, Some(4.0));
        assert_eq!(stats.avg_duration_minutes, Some(120.0));
    }

    #[test]
    fn weekly_series_orders_weeks_and_dispatches_by_metric() {
        let teachers = vec![
            record("t1", 8, 6, true),
            record("t2", 1, 12, true),
            record("t3", 8, 10, true),
        ];
        let registrations = weekly_series(&teachers, TrendMetric::Registrations);
        assert_eq!(registrations.len(), 2);
        assert_eq!(registrations[0].week_start, week(1));
        assert_eq!(registrations[0].value, 1.0);
        assert_eq!(registrations[1].value, 2.0);

        let scores = weekly_series(&teachers, TrendMetric::RfmScore);
        assert_eq!(scores[0].value, 12.0);
        assert_eq!(scores[1].value, 8.0);
    }

    #[test]
    fn weekly_interactions_count_entries_per_week() {
        let entries = vec![entry("t1", 1), entry("t2", 1), entry("t1", 8)];
        let series = weekly_interactions(&entries);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].value, 2.0);
        assert_eq!(series[1].value, 1.0);
    }
}
