use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod error;
mod filter;
mod ingest;
mod models;
mod report;
mod rfm;

use filter::{FilterCriteria, TrendMetric};
use models::{Completeness, EntryRecord, TeacherRecord};

#[derive(Parser)]
#[command(name = "teacher-engagement-rfm")]
#[command(about = "RFM segmentation batch transform for teacher engagement dashboards", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct FilterArgs {
    /// Keep only teachers with at least one selected stage
    #[arg(long)]
    valid_only: bool,
    /// Earliest registration week (YYYY-MM-DD)
    #[arg(long)]
    registered_from: Option<NaiveDate>,
    /// Latest registration week (YYYY-MM-DD)
    #[arg(long)]
    registered_to: Option<NaiveDate>,
    /// Earliest interaction week (YYYY-MM-DD)
    #[arg(long)]
    interacted_from: Option<NaiveDate>,
    /// Latest interaction week (YYYY-MM-DD)
    #[arg(long)]
    interacted_to: Option<NaiveDate>,
    /// Lowest RFM score to keep
    #[arg(long)]
    min_score: Option<u8>,
    /// Highest RFM score to keep
    #[arg(long)]
    max_score: Option<u8>,
    /// Restrict to profile-completeness buckets (repeatable)
    #[arg(long, value_enum)]
    completeness: Vec<Completeness>,
}

impl FilterArgs {
    fn criteria(&self) -> FilterCriteria {
        fn range(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Option<(NaiveDate, NaiveDate)> {
            if from.is_none() && to.is_none() {
                None
            } else {
                Some((from.unwrap_or(NaiveDate::MIN), to.unwrap_or(NaiveDate::MAX)))
            }
        }

        let score_range = if self.min_score.is_none() && self.max_score.is_none() {
            None
        } else {
            Some((self.min_score.unwrap_or(u8::MIN), self.max_score.unwrap_or(u8::MAX)))
        };

        FilterCriteria {
            valid_only: self.valid_only,
            registered: range(self.registered_from, self.registered_to),
            interacted: range(self.interacted_from, self.interacted_to),
            score_range,
            completeness: if self.completeness.is_empty() {
                None
            } else {
                Some(self.completeness.iter().copied().collect())
            },
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the batch transform: ingest, score, join, write the output tables
    Transform {
        #[arg(long)]
        events: PathBuf,
        #[arg(long)]
        teachers: PathBuf,
        #[arg(long, default_value = "data-transformed")]
        out_dir: PathBuf,
    },
    /// Print summary statistics over a filtered teacher table
    Summary {
        #[arg(long, default_value = "data-transformed/teachers_entries.csv")]
        teachers: PathBuf,
        #[command(flatten)]
        filters: FilterArgs,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report over the filtered tables
    Report {
        #[arg(long, default_value = "data-transformed/teachers_entries.csv")]
        teachers: PathBuf,
        #[arg(long, default_value = "data-transformed/entries.csv")]
        entries: PathBuf,
        #[command(flatten)]
        filters: FilterArgs,
        /// Metric for the weekly trend section
        #[arg(long, value_enum, default_value = "registrations")]
        metric: TrendMetric,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Transform {
            events,
            teachers,
            out_dir,
        } => {
            let (event_table, event_stats) = ingest::load_events(&events)
                .with_context(|| format!("failed to read event table {}", events.display()))?;
            let (teacher_table, teacher_stats) = ingest::load_teachers(&teachers)
                .with_context(|| format!("failed to read teacher table {}", teachers.display()))?;

            let records = match rfm::reference_date(&event_table) {
                Some(reference) => rfm::aggregate(&event_table, reference),
                None => Vec::new(),
            };
            let joined = rfm::join_teachers(&teacher_table, &records)?;
            let entries = rfm::join_entries(&event_table, &joined);

            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("failed to create {}", out_dir.display()))?;
            ingest::write_table(&out_dir.join("teachers_entries.csv"), &joined)?;
            ingest::write_table(&out_dir.join("entries.csv"), &entries)?;

            println!(
                "Scored {} teachers from {} events ({} malformed rows dropped).",
                joined.len(),
                event_table.len(),
                event_stats.dropped + teacher_stats.dropped
            );
            println!("Tables written to {}.", out_dir.display());
        }
        Commands::Summary {
            teachers,
            filters,
            json,
        } => {
            let table: Vec<TeacherRecord> = ingest::read_table(&teachers)
                .with_context(|| format!("failed to read {}", teachers.display()))?;
            let filtered = filter::filter_teachers(&table, &filters.criteria());
            let stats = filter::summary_stats(&filtered);

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                let fmt = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}"));
                println!("Teachers: {}", stats.teachers);
                println!("Mean RFM score: {}", fmt(stats.avg_rfm_score));
                println!("Mean access frequency: {}", fmt(stats.avg_frequency));
                println!("Mean time spent: {} minutes", fmt(stats.avg_duration_minutes));
            }
        }
        Commands::Report {
            teachers,
            entries,
            filters,
            metric,
            out,
        } => {
            let teacher_table: Vec<TeacherRecord> = ingest::read_table(&teachers)
                .with_context(|| format!("failed to read {}", teachers.display()))?;
            let entry_table: Vec<EntryRecord> = ingest::read_table(&entries)
                .with_context(|| format!("failed to read {}", entries.display()))?;

            let criteria = filters.criteria();
            let filtered_teachers = filter::filter_teachers(&teacher_table, &criteria);
            let filtered_entries = filter::filter_entries(&entry_table, &teacher_table, &criteria);

            let report = report::build_report(&filtered_teachers, &filtered_entries, metric);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
