use std::path::PathBuf;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

use crate::analyzer::Analyzer;
use crate::error::UnitError;
use crate::model::WorkItem;
use crate::unit::{self, process_unit, UnitSuccess};

/// Result of one unit, delivered as soon as that unit finishes.
#[derive(Debug)]
pub struct UnitOutcome {
    pub item: WorkItem,
    pub result: Result<UnitSuccess, UnitError>,
}

/// Pool stats returned after every unit has reported.
#[derive(Debug, Default)]
pub struct PoolReport {
    pub submitted: usize,
    /// Artifact paths in completion order.
    pub artifacts: Vec<PathBuf>,
    pub failures: Vec<(WorkItem, UnitError)>,
}

impl PoolReport {
    pub fn succeeded(&self) -> usize {
        self.artifacts.len()
    }
}

/// Shared, read-only inputs of every unit in a batch.
#[derive(Clone)]
pub struct PoolJob {
    pub analyzer: Arc<dyn Analyzer>,
    pub calibration: f64,
    pub target_dir: PathBuf,
    pub workers: usize,
}

/// Run every item through [`process_unit`] with at most `job.workers` in flight.
///
/// Outcomes are received in completion order and handed to `observe` one by
/// one. A failing unit is recorded and never stops the others.
pub async fn run_pool<F>(items: Vec<WorkItem>, job: PoolJob, mut observe: F) -> PoolReport
where
    F: FnMut(&UnitOutcome),
{
    let total = items.len();
    let workers = job.workers.max(1);
    let semaphore = Arc::new(Semaphore::new(workers));

    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta}) {msg}")
    {
        pb.set_style(style.progress_chars("=> "));
    }

    // Channel: units send outcomes, this loop collects them
    let (tx, mut rx) = mpsc::channel::<UnitOutcome>(workers * 2);

    for item in items {
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        let job = job.clone();

        tokio::spawn(async move {
            let result = match sem.acquire_owned().await {
                Ok(_permit) => {
                    let unit_item = item.clone();
                    tokio::task::spawn_blocking(move || {
                        process_unit(
                            &unit_item,
                            job.analyzer.as_ref(),
                            job.calibration,
                            &job.target_dir,
                        )
                    })
                    .await
                    .unwrap_or_else(|e| Err(UnitError::Aborted(e.to_string())))
                }
                Err(e) => Err(UnitError::Aborted(e.to_string())),
            };
            let _ = tx.send(UnitOutcome { item, result }).await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned units finish
    drop(tx);

    let mut report = PoolReport {
        submitted: total,
        ..Default::default()
    };

    while let Some(outcome) = rx.recv().await {
        observe(&outcome);
        let name = outcome.item.file_name();
        match outcome.result {
            Ok(done) => {
                info!(
                    "{} analyzed in {:.1}s ({} metrics, {} skipped) -> {:?}",
                    name,
                    done.elapsed.as_secs_f64(),
                    done.metrics,
                    done.skipped_metrics,
                    done.artifact
                );
                pb.set_message(format!("OK: {}", name));
                report.artifacts.push(done.artifact);
            }
            Err(e) => {
                warn!("Unit failed for {}: {}", name, e);
                pb.set_message(format!("ERR: {}", name));
                report.failures.push((outcome.item, e));
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    unit::remove_scratch_root(&job.target_dir);
    info!(
        "Pool finished: {}/{} units succeeded",
        report.succeeded(),
        report.submitted
    );
    report
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::analyzer::testing::ScriptedAnalyzer;

    fn items(dir: &std::path::Path, names: &[&str]) -> Vec<WorkItem> {
        names
            .iter()
            .map(|n| {
                let p = dir.join(n);
                fs::write(&p, b"x").unwrap();
                WorkItem::from_path(&p).unwrap()
            })
            .collect()
    }

    fn job(analyzer: Arc<dyn Analyzer>, target: &std::path::Path, workers: usize) -> PoolJob {
        PoolJob {
            analyzer,
            calibration: 0.1699,
            target_dir: target.to_path_buf(),
            workers,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn one_failure_does_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let work = items(dir.path(), &["a.tif", "b.tif", "c.tif", "d.tif"]);
        let analyzer = Arc::new(ScriptedAnalyzer::failing(&["b"]));

        let report = run_pool(work, job(analyzer.clone(), dir.path(), 2), |_| {}).await;

        assert_eq!(report.submitted, 4);
        assert_eq!(report.succeeded(), 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0.stem, "b");
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 4);
        for stem in ["a", "c", "d"] {
            assert!(dir.path().join(format!("{}_scalars.csv", stem)).exists());
        }
        assert!(!dir.path().join("b_scalars.csv").exists());
        assert!(!dir.path().join(unit::SCRATCH_DIR_NAME).exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrency_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let work = items(dir.path(), &["1.tif", "2.tif", "3.tif", "4.tif", "5.tif", "6.tif"]);
        let analyzer =
            Arc::new(ScriptedAnalyzer::default().with_delay(Duration::from_millis(40)));

        let report = run_pool(work, job(analyzer.clone(), dir.path(), 2), |_| {}).await;

        assert_eq!(report.succeeded(), 6);
        let peak = analyzer.peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "peak concurrency {}", peak);
    }

    #[tokio::test]
    async fn every_outcome_is_observed_as_it_arrives() {
        let dir = tempfile::tempdir().unwrap();
        let work = items(dir.path(), &["a.tif", "b.tif", "c.tif"]);
        let analyzer = Arc::new(ScriptedAnalyzer::failing(&["c"]));

        let mut seen = Vec::new();
        let report = run_pool(work, job(analyzer, dir.path(), 3), |o| {
            seen.push((o.item.stem.clone(), o.result.is_ok()));
        })
        .await;

        seen.sort();
        assert_eq!(
            seen,
            vec![
                ("a".to_string(), true),
                ("b".to_string(), true),
                ("c".to_string(), false)
            ]
        );
        assert_eq!(report.artifacts.len(), 2);
    }

    #[tokio::test]
    async fn empty_queue_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let report = run_pool(
            Vec::new(),
            job(Arc::new(ScriptedAnalyzer::default()), dir.path(), 2),
            |_| panic!("no units were submitted"),
        )
        .await;
        assert_eq!(report.submitted, 0);
        assert_eq!(report.succeeded(), 0);
    }
}
