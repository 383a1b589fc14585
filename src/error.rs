use std::path::PathBuf;

use thiserror::Error;

/// Fatal startup problems. Nothing has been dispatched when these surface.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("no source directory configured (set --source or HARVEST_SOURCE_DIR)")]
    MissingSource,
    #[error("no calibration configured (set --calibration or HARVEST_CALIBRATION)")]
    MissingCalibration,
    #[error("calibration must be a positive number, got {0}")]
    InvalidCalibration(f64),
    #[error("worker pool size must be at least 1, got {0}")]
    InvalidWorkers(usize),
    #[error("no analyzer program configured (set --analyzer or HARVEST_ANALYZER__PROGRAM)")]
    MissingAnalyzer,
    #[error("source directory {path:?} is not readable: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("directory path cannot be used as a search pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("target directory {path:?} could not be created: {source}")]
    TargetUncreatable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure reported by the external analysis collaborator.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("could not start analyzer {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("analyzer exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },
    #[error("analyzer output is not valid JSON: {0}")]
    InvalidOutput(#[from] serde_json::Error),
    #[error("analyzer output must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("{0}")]
    Other(String),
}

/// One work item failed. Recorded and skipped, never fatal to the batch.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("could not prepare scratch directory {path:?}: {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not write artifact: {0}")]
    Artifact(#[from] ArtifactError),
    #[error("worker aborted: {0}")]
    Aborted(String),
}

/// A stored per-file table could not be written or parsed.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("io error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed table {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("row {line} has a value but no metric name")]
    MissingKey { line: u64 },
    #[error("metric {0:?} appears more than once")]
    DuplicateMetric(String),
    #[error("metric {metric:?}: {value:?} is not a valid {kind} value")]
    BadValue {
        metric: String,
        kind: String,
        value: String,
    },
    #[error("table has no data rows")]
    Empty,
    #[error("file name does not identify a work item")]
    Unnamed,
}

/// The output bundle could not be produced.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("io error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not write combined table: {0}")]
    Table(#[from] ArtifactError),
    #[error("could not write manifest: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("could not list sidecar files: {0}")]
    Sidecar(#[from] ConfigError),
}
