use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{info, warn};

use crate::artifact::{self, ARTIFACT_EXTENSION, ARTIFACT_SUFFIX};
use crate::error::{ArtifactError, ConfigError};
use crate::queue::list_matching;
use crate::table::{CombinedTable, TableRow};

/// A pass over the artifact directory. `table` is empty when nothing parsed.
#[derive(Debug, Default)]
pub struct Aggregation {
    pub scanned: usize,
    pub table: CombinedTable,
    pub skipped: Vec<(PathBuf, ArtifactError)>,
}

impl Aggregation {
    pub fn has_data(&self) -> bool {
        !self.table.is_empty()
    }
}

/// Per-file artifacts in `target_dir`, sorted by path. Combined tables and
/// plate maps never carry the artifact suffix, so the pattern alone keeps
/// them out.
pub fn list_artifacts(target_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let pattern = format!("*{}.{}", ARTIFACT_SUFFIX, ARTIFACT_EXTENSION);
    list_matching(target_dir, &pattern)
}

fn parse_row(path: &Path) -> Result<TableRow, ArtifactError> {
    let id = artifact::stem_of(path).ok_or(ArtifactError::Unnamed)?;
    let values = artifact::read_artifact(path)?;
    Ok(TableRow { id, values })
}

/// Read every artifact into one row of a fresh [`CombinedTable`].
/// Unreadable artifacts are skipped and reported, never fatal.
pub fn aggregate(target_dir: &Path) -> Result<Aggregation, ConfigError> {
    let paths = list_artifacts(target_dir)?;
    info!("Aggregating {} artifacts from {:?}", paths.len(), target_dir);

    let parsed: Vec<(PathBuf, Result<TableRow, ArtifactError>)> = paths
        .into_par_iter()
        .map(|p| {
            let row = parse_row(&p);
            (p, row)
        })
        .collect();

    let scanned = parsed.len();
    let mut rows = Vec::with_capacity(scanned);
    let mut skipped = Vec::new();
    for (path, row) in parsed {
        match row {
            Ok(row) => rows.push(row),
            Err(e) => {
                warn!("Skipping artifact {:?}: {}", path, e);
                skipped.push((path, e));
            }
        }
    }

    let table = CombinedTable::from_rows(rows);
    info!(
        "Combined table: {} rows x {} metrics ({} artifacts skipped)",
        table.rows().len(),
        table.columns().len(),
        skipped.len()
    );
    Ok(Aggregation {
        scanned,
        table,
        skipped,
    })
}

// ── Tests ──
