use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Local, NaiveDate};
use serde::Serialize;
use tracing::{debug, info};

use crate::aggregate::{self, Aggregation};
use crate::analyzer::Analyzer;
use crate::archive::{self, ArchiveRequest};
use crate::config::Settings;
use crate::pool::{run_pool, PoolJob};
use crate::queue::{self, Resolution};

#[derive(Debug, Clone, Serialize)]
pub struct SkipEntry {
    pub file: String,
    pub reason: String,
}

/// Counts and skips of one run, printed at the end and stored in the manifest.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub discovered: usize,
    pub pending: usize,
    pub already_done: usize,
    pub filtered_out: usize,
    pub succeeded: usize,
    pub failed_units: Vec<SkipEntry>,
    pub duplicate_inputs: Vec<PathBuf>,
    pub artifacts_scanned: usize,
    pub rows: usize,
    pub columns: usize,
    pub skipped_artifacts: Vec<SkipEntry>,
    pub bundle: Option<PathBuf>,
    pub combined_table: Option<PathBuf>,
}

impl RunSummary {
    fn from_resolution(res: &Resolution) -> Self {
        RunSummary {
            discovered: res.discovered,
            pending: res.pending.len(),
            already_done: res.completed,
            filtered_out: res.filtered_out,
            duplicate_inputs: res.duplicates.clone(),
            ..Default::default()
        }
    }

    fn record_aggregation(&mut self, agg: &Aggregation) {
        self.artifacts_scanned = agg.scanned;
        self.rows = agg.table.rows().len();
        self.columns = agg.table.columns().len();
        self.skipped_artifacts = agg
            .skipped
            .iter()
            .map(|(path, e)| SkipEntry {
                file: display_name(path),
                reason: e.to_string(),
            })
            .collect();
    }

    pub fn print(&self) {
        println!("Discovered:      {}", self.discovered);
        println!("Needed work:     {}", self.pending);
        println!("Succeeded:       {}/{}", self.succeeded, self.pending);
        if self.already_done > 0 {
            println!("Already done:    {}", self.already_done);
        }
        if self.filtered_out > 0 {
            println!("Filtered out:    {}", self.filtered_out);
        }
        match &self.combined_table {
            Some(path) => println!(
                "Combined table:  {} ({} rows x {} metrics)",
                path.display(),
                self.rows,
                self.columns
            ),
            None => println!("Combined table:  no data"),
        }

        if !self.failed_units.is_empty() {
            println!("\n--- Failed units ---");
            for s in &self.failed_units {
                println!("  {}: {}", s.file, s.reason);
            }
        }
        if !self.duplicate_inputs.is_empty() {
            println!("\n--- Skipped duplicate stems ---");
            for p in &self.duplicate_inputs {
                println!("  {}", display_name(p));
            }
        }
        if !self.skipped_artifacts.is_empty() {
            println!("\n--- Skipped artifacts ---");
            for s in &self.skipped_artifacts {
                println!("  {}: {}", s.file, s.reason);
            }
        }
    }
}

#[derive(Serialize)]
struct Manifest<'a> {
    created_at: String,
    settings: &'a Settings,
    summary: &'a RunSummary,
}

fn display_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Full run: resolve, analyze pending items, aggregate, archive.
///
/// Only configuration problems are errors; failed units and unreadable
/// artifacts end up in the summary.
pub async fn run(
    settings: &Settings,
    analyzer: Arc<dyn Analyzer>,
    date: NaiveDate,
) -> Result<RunSummary> {
    settings.validate()?;
    let calibration = settings.calibration()?;
    settings.prepare_dirs()?;

    let resolution = queue::resolve_work_queue(
        &settings.source_dir,
        settings.filter.as_deref(),
        &settings.target_dir,
    )?;
    let mut summary = RunSummary::from_resolution(&resolution);

    if resolution.pending.is_empty() {
        info!("Nothing to analyze, going straight to aggregation");
    } else {
        info!(
            "Analyzing {} files with {} workers",
            resolution.pending.len(),
            settings.workers
        );
        let job = PoolJob {
            analyzer,
            calibration,
            target_dir: settings.target_dir.clone(),
            workers: settings.workers,
        };
        let total = resolution.pending.len();
        let mut finished = 0usize;
        let report = run_pool(resolution.pending, job, |outcome| {
            finished += 1;
            debug!("{}/{} done: {}", finished, total, outcome.item.stem);
        })
        .await;

        summary.succeeded = report.succeeded();
        summary.failed_units = report
            .failures
            .iter()
            .map(|(item, e)| SkipEntry {
                file: item.file_name(),
                reason: e.to_string(),
            })
            .collect();
    }

    aggregate_and_archive(settings, &mut summary, date)?;
    Ok(summary)
}

/// Second half of a run, also usable on its own to rebuild the bundle from
/// existing artifacts.
pub fn aggregate_and_archive(
    settings: &Settings,
    summary: &mut RunSummary,
    date: NaiveDate,
) -> Result<()> {
    let agg = aggregate::aggregate(&settings.target_dir)?;
    summary.record_aggregation(&agg);

    if !agg.has_data() {
        info!("No artifacts could be aggregated, skipping archive");
        return Ok(());
    }

    let source_name = settings.source_name();
    let request = ArchiveRequest {
        output_root: &settings.output_root,
        source_dir: &settings.source_dir,
        source_name: &source_name,
        date,
    };
    let manifest = Manifest {
        created_at: Local::now().to_rfc3339(),
        settings,
        summary: &*summary,
    };
    let bundle = archive::archive(&agg.table, &manifest, &request)?;
    summary.bundle = Some(bundle.dir);
    summary.combined_table = Some(bundle.table);
    Ok(())
}

/// Where a source directory stands, without analyzing anything.
#[derive(Debug)]
pub struct Status {
    pub resolution: Resolution,
    pub artifacts: usize,
}

pub fn status(settings: &Settings) -> Result<Status> {
    settings.check_source()?;
    let resolution = queue::resolve_work_queue(
        &settings.source_dir,
        settings.filter.as_deref(),
        &settings.target_dir,
    )?;
    let artifacts = if settings.target_dir.is_dir() {
        aggregate::list_artifacts(&settings.target_dir)?.len()
    } else {
        0
    };
    Ok(Status {
        resolution,
        artifacts,
    })
}

// ── Tests ──
