use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime};

use crate::error::TransformError;
use crate::models::{EntryRecord, InteractionEvent, RfmRecord, Teacher, TeacherRecord};

const BUCKETS: usize = 5;

#[derive(Debug, Clone, Copy)]
enum Direction {
    /// Higher raw value gets the higher score (Frequency, Duration).
    Direct,
    /// Lower raw value gets the higher score (Recency).
    Inverted,
}

/// Reference timestamp for recency: one day past the latest event start in
/// the batch. Passed explicitly into [`aggregate`] so runs are reproducible.
pub fn reference_date(events: &[InteractionEvent]) -> Option<NaiveDateTime> {
    events
        .iter()
        .map(|event| event.started_at)
        .max()
        .map(|latest| latest + Duration::days(1))
}

/// Linearly-interpolated empirical quantiles of `values` at p = 0, 0.2,
/// ..., 1.0. Duplicate edges are collapsed, so the returned boundaries are
/// strictly increasing; a distribution with too few distinct values yields
/// fewer than five intervals.
fn quintile_edges(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    let mut edges: Vec<f64> = (0..=BUCKETS)
        .map(|i| {
            let h = (n - 1) as f64 * i as f64 / BUCKETS as f64;
            let lo = h.floor() as usize;
            let frac = h - lo as f64;
            if lo + 1 < n {
                sorted[lo] + frac * (sorted[lo + 1] - sorted[lo])
            } else {
                sorted[lo]
            }
        })
        .collect();
    edges.dedup();
    edges
}

/// Interval index of `v` against strictly increasing `edges`. Intervals are
/// right-closed and the lowest one includes the minimum.
fn bin_index(edges: &[f64], v: f64) -> usize {
    let buckets = edges.len() - 1;
    for i in 1..buckets {
        if v <= edges[i] {
            return i - 1;
        }
    }
    buckets - 1
}

/// Quintile scores for `values` against their own empirical distribution.
/// When duplicate quantile edges reduce the interval count to k < 5, direct
/// scores span 1..=k and inverted scores span k..=1 rather than erroring.
fn quintile_scores(values: &[f64], direction: Direction) -> Vec<u8> {
    if values.is_empty() {
        return Vec::new();
    }
    let edges = quintile_edges(values);
    if edges.len() < 2 {
        // Every value identical: a single bucket, lowest score.
        return vec![1; values.len()];
    }
    let buckets = edges.len() - 1;
    values
        .iter()
        .map(|&v| {
            let idx = bin_index(&edges, v);
            match direction {
                Direction::Direct => (idx + 1) as u8,
                Direction::Inverted => (buckets - idx) as u8,
            }
        })
        .collect()
}

/// First-seen ranks for the frequency metric. Ties are broken by `user_id`,
/// not input row order, so the ranking is stable across reloads. Ranks are
/// distinct, which keeps frequency buckets exactly balanced.
fn frequency_ranks(users: &[(String, u64)]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..users.len()).collect();
    order.sort_by(|&a, &b| {
        users[a]
            .1
            .cmp(&users[b].1)
            .then_with(|| users[a].0.cmp(&users[b].0))
    });
    let mut ranks = vec![0.0; users.len()];
    for (rank, &idx) in order.iter().enumerate() {
        ranks[idx] = (rank + 1) as f64;
    }
    ranks
}

/// Group events by user, compute Recency / Frequency / Duration against
/// `reference`, and score each metric into cohort-relative quintiles.
/// Output is sorted by `user_id`; an empty event table yields an empty
/// result.
pub fn aggregate(events: &[InteractionEvent], reference: NaiveDateTime) -> Vec<RfmRecord> {
    struct Accum {
        latest_start: NaiveDateTime,
        count: u64,
        minutes: f64,
    }

    let mut by_user: HashMap<&str, Accum> = HashMap::new();
    for event in events {
        let entry = by_user.entry(event.user_id.as_str()).or_insert(Accum {
            latest_start: event.started_at,
            count: 0,
            minutes: 0.0,
        });
        entry.latest_start = entry.latest_start.max(event.started_at);
        entry.count += 1;
        entry.minutes += event.duration_minutes;
    }

    let mut users: Vec<(String, Accum)> = by_user
        .into_iter()
        .map(|(id, accum)| (id.to_string(), accum))
        .collect();
    users.sort_by(|a, b| a.0.cmp(&b.0));

    if users.is_empty() {
        return Vec::new();
    }

    let recency: Vec<f64> = users
        .iter()
        .map(|(_, accum)| (reference - accum.latest_start).num_days() as f64)
        .collect();
    let frequencies: Vec<(String, u64)> = users
        .iter()
        .map(|(id, accum)| (id.clone(), accum.count))
        .collect();
    let durations: Vec<f64> = users.iter().map(|(_, accum)| accum.minutes).collect();

    let r_scores = quintile_scores(&recency, Direction::Inverted);
    let f_scores = quintile_scores(&frequency_ranks(&frequencies), Direction::Direct);
    let m_scores = quintile_scores(&durations, Direction::Direct);

    users
        .into_iter()
        .enumerate()
        .map(|(i, (user_id, accum))| {
            let (r, f, m) = (r_scores[i], f_scores[i], m_scores[i]);
            RfmRecord {
                user_id,
                recency_days: recency[i] as i64,
                frequency: accum.count,
                duration_minutes: accum.minutes,
                r_score: r,
                f_score: f,
                m_score: m,
                segment: format!("{r}{f}{m}"),
                rfm_score: r + f + m,
            }
        })
        .collect()
}

/// Inner join of scored records with the teacher dimension table. Fails
/// fast if the dimension table repeats a user id; users on either side
/// without a counterpart are dropped.
pub fn join_teachers(
    teachers: &[Teacher],
    records: &[RfmRecord],
) -> Result<Vec<TeacherRecord>, TransformError> {
    let mut by_id: HashMap<&str, &Teacher> = HashMap::with_capacity(teachers.len());
    for teacher in teachers {
        if by_id.insert(teacher.user_id.as_str(), teacher).is_some() {
            return Err(TransformError::DuplicateTeacher {
                user_id: teacher.user_id.clone(),
            });
        }
    }

    Ok(records
        .iter()
        .filter_map(|record| {
            by_id.get(record.user_id.as_str()).map(|teacher| TeacherRecord {
                user_id: record.user_id.clone(),
                entry_date: teacher.entry_date,
                entry_week: teacher.entry_week,
                state: teacher.state.clone(),
                utm_source: teacher.utm_source.clone(),
                is_valid: teacher.is_valid,
                completeness: teacher.completeness,
                recency_days: record.recency_days,
                frequency: record.frequency,
                duration_minutes: record.duration_minutes,
                r_score: record.r_score,
                f_score: record.f_score,
                m_score: record.m_score,
                segment: record.segment.clone(),
                rfm_score: record.rfm_score,
            })
        })
        .collect())
}

/// Inner join of normalized events with the already-joined teacher table,
/// producing the per-event output rows the dashboards plot over time.
pub fn join_entries(events: &[InteractionEvent], teachers: &[TeacherRecord]) -> Vec<EntryRecord> {
    let by_id: HashMap<&str, &TeacherRecord> = teachers
        .iter()
        .map(|teacher| (teacher.user_id.as_str(), teacher))
        .collect();

    events
        .iter()
        .filter_map(|event| {
            by_id.get(event.user_id.as_str()).map(|teacher| EntryRecord {
                user_id: event.user_id.clone(),
                started_at: event.started_at,
                ended_at: event.ended_at,
                duration_minutes: event.duration_minutes,
                week: event.week,
                state: teacher.state.clone(),
                utm_source: teacher.utm_source.clone(),
                is_valid: teacher.is_valid,
            })
        })
        .collect()
}
