//! Per-file result tables.
//!
//! An artifact is a CSV with one labeling header row, then one
//! `metric,value,type` row per scalar. The type tag keeps text that looks
//! like a number as text. Tables without a `type` column are read by
//! inferring each cell; anything past the used columns is ignored.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::error::ArtifactError;
use crate::model::{ScalarRecord, ScalarValue};

pub const ARTIFACT_SUFFIX: &str = "_scalars";
pub const ARTIFACT_EXTENSION: &str = "csv";
const HEADER: [&str; 3] = ["metric", "value", "type"];

/// Metric values of one artifact. `None` marks a metric stored with an empty cell.
pub type ArtifactValues = BTreeMap<String, Option<ScalarValue>>;

pub fn artifact_path(target_dir: &Path, stem: &str) -> PathBuf {
    target_dir.join(format!("{}{}.{}", stem, ARTIFACT_SUFFIX, ARTIFACT_EXTENSION))
}

/// Recover the work item stem from an artifact file name. The suffix is
/// matched case-insensitively, like the directory listing that finds it.
pub fn stem_of(path: &Path) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        let pattern = format!(
            r"(?i)^(.+){}\.{}$",
            regex::escape(ARTIFACT_SUFFIX),
            regex::escape(ARTIFACT_EXTENSION)
        );
        Regex::new(&pattern).unwrap()
    });
    let name = path.file_name()?.to_str()?;
    re.captures(name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Write `record` to `path`. The table lands under a temporary name and is
/// renamed into place, so a half-written file never looks like a finished one.
/// A record without metrics still gets a header-only table.
pub fn write_artifact(path: &Path, record: &ScalarRecord) -> Result<(), ArtifactError> {
    let partial = path.with_extension(format!("{}.part", ARTIFACT_EXTENSION));

    let written = write_table(&partial, record).and_then(|()| {
        fs::rename(&partial, path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })
    });
    if written.is_err() {
        if let Err(e) = fs::remove_file(&partial) {
            debug!("Could not remove partial artifact {:?}: {}", partial, e);
        }
    }
    written
}

fn write_table(partial: &Path, record: &ScalarRecord) -> Result<(), ArtifactError> {
    let csv_err = |source| ArtifactError::Csv {
        path: partial.to_path_buf(),
        source,
    };

    let mut writer = csv::Writer::from_path(partial).map_err(csv_err)?;
    writer.write_record(HEADER).map_err(csv_err)?;
    for (metric, value) in &record.values {
        writer
            .write_record([metric.as_str(), value.to_string().as_str(), value.kind()])
            .map_err(csv_err)?;
    }
    writer.flush().map_err(|source| ArtifactError::Io {
        path: partial.to_path_buf(),
        source,
    })
}

pub fn read_artifact(path: &Path) -> Result<ArtifactValues, ArtifactError> {
    let csv_err = |source| ArtifactError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;

    let headers = reader.headers().map_err(csv_err)?.clone();
    let own_header = headers.get(0) == Some(HEADER[0]) && headers.get(1) == Some(HEADER[1]);
    let typed = headers.get(2) == Some(HEADER[2]);

    let mut values = ArtifactValues::new();
    for row in reader.records() {
        let row = row.map_err(csv_err)?;
        let key = row.get(0).unwrap_or("").trim();
        let raw = row.get(1).unwrap_or("");
        let kind = if typed { row.get(2).unwrap_or("") } else { "" };

        if key.is_empty() {
            if raw.trim().is_empty() {
                continue;
            }
            let line = row.position().map(|p| p.line()).unwrap_or(0);
            return Err(ArtifactError::MissingKey { line });
        }
        if values.contains_key(key) {
            return Err(ArtifactError::DuplicateMetric(key.to_string()));
        }

        let value = if kind.is_empty() {
            ScalarValue::parse_cell(raw)
        } else {
            let parsed = ScalarValue::parse_typed(kind, raw).ok_or_else(|| {
                ArtifactError::BadValue {
                    metric: key.to_string(),
                    kind: kind.to_string(),
                    value: raw.to_string(),
                }
            })?;
            Some(parsed)
        };
        values.insert(key.to_string(), value);
    }

    // A header-only table we wrote ourselves is an item without scalar metrics
    if values.is_empty() && !own_header {
        return Err(ArtifactError::Empty);
    }
    Ok(values)
}

// ── Tests ──
