use std::fmt::Write;

use crate::filter::{self, TrendMetric};
use crate::models::{CategoryCount, EntryRecord, TeacherRecord};

/// Teachers per category, descending by count. Ties break on the label so
/// report output is stable across runs. Rows without the attribute are
/// skipped, mirroring how the dashboards chart these breakdowns.
pub fn count_by<'a, F>(teachers: &'a [TeacherRecord], key: F) -> Vec<CategoryCount>
where
    F: Fn(&'a TeacherRecord) -> Option<&'a str>,
{
    let mut map: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for teacher in teachers {
        if let Some(label) = key(teacher) {
            *map.entry(label).or_insert(0) += 1;
        }
    }

    let mut counts: Vec<CategoryCount> = map
        .into_iter()
        .map(|(label, count)| CategoryCount {
            label: label.to_string(),
            count,
        })
        .collect();
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
    counts
}

fn metric_label(metric: TrendMetric) -> &'static str {
    match metric {
        TrendMetric::Registrations => "Registrations",
        TrendMetric::RfmScore => "Mean RFM Score",
        TrendMetric::Frequency => "Mean Access Frequency",
        TrendMetric::Duration => "Mean Time Spent (minutes)",
    }
}

fn fmt_mean(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.2}"),
        None => "n/a".to_string(),
    }
}

pub fn build_report(
    teachers: &[TeacherRecord],
    entries: &[EntryRecord],
    metric: TrendMetric,
) -> String {
    let stats = filter::summary_stats(teachers);
    let trend = filter::weekly_series(teachers, metric);
    let interactions = filter::weekly_interactions(entries);
    let states = count_by(teachers, |t| t.state.as_deref());
    let channels = count_by(teachers, |t| t.utm_source.as_deref());
    let segments = count_by(teachers, |t| Some(t.segment.as_str()));

    let mut output = String::new();

    let _ = writeln!(output, "# Teacher Engagement Report");
    let _ = writeln!(
        output,
        "Computed over {} teachers and {} interactions.",
        stats.teachers,
        entries.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Cohort Summary");
    let _ = writeln!(output, "- Teachers: {}", stats.teachers);
    let _ = writeln!(output, "- Mean RFM score: {}", fmt_mean(stats.avg_rfm_score));
    let _ = writeln!(output, "- Mean access frequency: {}", fmt_mean(stats.avg_frequency));
    let _ = writeln!(
        output,
        "- Mean time spent: {} minutes",
        fmt_mean(stats.avg_duration_minutes)
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Weekly {}", metric_label(metric));

    if trend.is_empty() {
        let _ = writeln!(output, "No teachers matched the filters.");
    } else {
        for point in trend.iter().rev().take(12) {
            match metric {
                TrendMetric::Registrations => {
                    let _ = writeln!(output, "- {}: {:.0}", point.week_start, point.value);
                }
                _ => {
                    let _ = writeln!(output, "- {}: {:.2}", point.week_start, point.value);
                }
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Teachers by State");

    if states.is_empty() {
        let _ = writeln!(output, "No state information available.");
    } else {
        for entry in states.iter().take(10) {
            let _ = writeln!(output, "- {}: {} teachers", entry.label, entry.count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Teachers by Acquisition Channel");

    if channels.is_empty() {
        let _ = writeln!(output, "No channel information available.");
    } else {
        for entry in channels.iter().take(10) {
            let _ = writeln!(output, "- {}: {} teachers", entry.label, entry.count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top RFM Segments");

    if segments.is_empty() {
        let _ = writeln!(output, "No scored teachers matched the filters.");
    } else {
        for entry in segments.iter().take(10) {
            let _ = writeln!(output, "- {}: {} teachers", entry.label, entry.count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Weekly Interactions");

    if interactions.is_empty() {
        let _ = writeln!(output, "No interactions matched the filters.");
    } else {
        for point in interactions.iter().rev().take(12) {
            let _ = writeln!(output, "- {}: {:.0}", point.week_start, point.value);
        }
    }

    output
}
