use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::analyzer::{AnalysisInput, Analyzer};
use crate::artifact;
use crate::error::UnitError;
use crate::extract::extract_scalars;
use crate::model::WorkItem;

pub const SCRATCH_DIR_NAME: &str = ".scratch";

/// What a finished unit leaves behind.
#[derive(Debug, Clone)]
pub struct UnitSuccess {
    pub artifact: PathBuf,
    pub metrics: usize,
    pub skipped_metrics: usize,
    pub elapsed: Duration,
}

/// Per-unit scratch directory, removed on drop whatever the outcome.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(target_dir: &Path, stem: &str) -> Result<Self, UnitError> {
        let path = target_dir.join(SCRATCH_DIR_NAME).join(stem);
        fs::create_dir_all(&path).map_err(|source| UnitError::Scratch {
            path: path.clone(),
            source,
        })?;
        Ok(ScratchDir { path })
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            warn!("Could not remove scratch {:?}: {}", self.path, e);
        }
    }
}

/// Analyze one image and persist its scalars. The artifact is written last,
/// only once the whole record exists.
pub fn process_unit(
    item: &WorkItem,
    analyzer: &dyn Analyzer,
    calibration: f64,
    target_dir: &Path,
) -> Result<UnitSuccess, UnitError> {
    let start = Instant::now();

    let result = {
        let scratch = ScratchDir::create(target_dir, &item.stem)?;
        analyzer.analyze(&AnalysisInput {
            path: &item.path,
            stem: &item.stem,
            calibration,
            scratch_dir: &scratch.path,
        })?
    };

    let record = extract_scalars(&result);
    for (metric, reason) in record.skipped() {
        debug!(stem = %item.stem, metric, %reason, "metric skipped");
    }

    if record.values.is_empty() {
        warn!("{} produced no scalar metrics, storing an empty row", item.stem);
    }

    let path = artifact::artifact_path(target_dir, &item.stem);
    artifact::write_artifact(&path, &record)?;

    Ok(UnitSuccess {
        artifact: path,
        metrics: record.values.len(),
        skipped_metrics: record.skipped_count(),
        elapsed: start.elapsed(),
    })
}

/// Drop the shared scratch root once no unit is running. Non-empty is left alone.
pub fn remove_scratch_root(target_dir: &Path) {
    let root = target_dir.join(SCRATCH_DIR_NAME);
    match fs::remove_dir(&root) {
        Ok(()) => {}
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::DirectoryNotEmpty
            ) => {}
        Err(e) => debug!("Could not remove scratch root {:?}: {}", root, e),
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::testing::ScriptedAnalyzer;
    use crate::error::AnalysisError;
    use crate::model::ScalarValue;

    fn item(dir: &Path, name: &str) -> WorkItem {
        let path = dir.join(name);
        fs::write(&path, b"II*\0").unwrap();
        WorkItem::from_path(&path).unwrap()
    }

    #[test]
    fn writes_artifact_and_cleans_scratch() {
        let src = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let a = item(src.path(), "a.tif");

        let ok = process_unit(&a, &ScriptedAnalyzer::default(), 0.17, target.path()).unwrap();

        assert_eq!(ok.artifact, target.path().join("a_scalars.csv"));
        assert_eq!(ok.metrics, 3);
        assert_eq!(ok.skipped_metrics, 1);
        assert!(!target.path().join(SCRATCH_DIR_NAME).join("a").exists());

        let back = artifact::read_artifact(&ok.artifact).unwrap();
        assert_eq!(back["pixelsize"], Some(ScalarValue::Float(0.17)));
        assert_eq!(back["mean_length"], Some(ScalarValue::Float(1.5)));
        assert!(!back.contains_key("lengths"));
    }

    #[test]
    fn failed_analysis_leaves_no_artifact() {
        let src = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let b = item(src.path(), "b.tif");

        let err = process_unit(&b, &ScriptedAnalyzer::failing(&["b"]), 0.17, target.path())
            .unwrap_err();

        assert!(matches!(err, UnitError::Analysis(AnalysisError::Other(_))));
        assert!(!artifact::artifact_path(target.path(), "b").exists());
        assert!(!target.path().join(SCRATCH_DIR_NAME).join("b").exists());
        remove_scratch_root(target.path());
        assert!(!target.path().join(SCRATCH_DIR_NAME).exists());
    }

    #[test]
    fn analysis_without_scalars_still_marks_the_item_done() {
        let src = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let c = item(src.path(), "c.tif");

        let ok = process_unit(&c, &ScriptedAnalyzer::bare(&["c"]), 0.17, target.path()).unwrap();

        assert_eq!(ok.metrics, 0);
        assert_eq!(ok.skipped_metrics, 1);
        assert!(artifact::read_artifact(&ok.artifact).unwrap().is_empty());
    }

    #[test]
    fn scratch_root_with_leftovers_is_kept() {
        let target = tempfile::tempdir().unwrap();
        let stale = target.path().join(SCRATCH_DIR_NAME).join("x");
        fs::create_dir_all(&stale).unwrap();

        remove_scratch_root(target.path());
        assert!(stale.exists());

        fs::remove_dir(&stale).unwrap();
        remove_scratch_root(target.path());
        assert!(!target.path().join(SCRATCH_DIR_NAME).exists());
        // already gone
        remove_scratch_root(target.path());
    }
}
