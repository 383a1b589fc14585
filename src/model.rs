use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

/// One input image queued for analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub path: PathBuf,
    pub stem: String,
}

impl WorkItem {
    pub fn from_path(path: &Path) -> Option<Self> {
        let stem = path.file_stem()?.to_str()?.to_string();
        if stem.is_empty() {
            return None;
        }
        Some(WorkItem {
            path: path.to_path_buf(),
            stem,
        })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Raw analyzer output: metric name to arbitrary JSON value.
#[derive(Debug, Clone, Default)]
pub struct AnalysisResult(Map<String, Value>);

impl AnalysisResult {
    pub fn new(entries: Map<String, Value>) -> Self {
        AnalysisResult(entries)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// A primitive cell value. Never a container.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl ScalarValue {
    /// Type tag stored next to the value in an artifact.
    pub fn kind(&self) -> &'static str {
        match self {
            ScalarValue::Int(_) => "int",
            ScalarValue::Float(_) => "float",
            ScalarValue::Bool(_) => "bool",
            ScalarValue::Text(_) => "text",
        }
    }

    /// Parse a cell whose type tag is known. Text is taken verbatim.
    /// `None` for an unknown tag or a value the tag does not accept.
    pub fn parse_typed(kind: &str, raw: &str) -> Option<ScalarValue> {
        match kind {
            "int" => raw.parse().ok().map(ScalarValue::Int),
            "float" => raw.parse().ok().map(ScalarValue::Float),
            "bool" => raw.parse().ok().map(ScalarValue::Bool),
            "text" => Some(ScalarValue::Text(raw.to_string())),
            _ => None,
        }
    }

    /// Parse an untagged cell, keeping the most specific type.
    /// Blank cells are nulls; text keeps its surrounding whitespace.
    pub fn parse_cell(raw: &str) -> Option<ScalarValue> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Some(ScalarValue::Int(i));
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return Some(ScalarValue::Float(f));
        }
        match trimmed {
            "true" => Some(ScalarValue::Bool(true)),
            "false" => Some(ScalarValue::Bool(false)),
            _ => Some(ScalarValue::Text(raw.to_string())),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Int(i) => write!(f, "{}", i),
            // Debug keeps the fractional part ("1.0"), so floats read back as floats
            ScalarValue::Float(x) => write!(f, "{:?}", x),
            ScalarValue::Bool(b) => write!(f, "{}", b),
            ScalarValue::Text(s) => f.write_str(s),
        }
    }
}

/// Why a metric was left out of a [`ScalarRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MultiElement { len: usize },
    MultiDimensional { shape: Vec<usize> },
    EmptyArray,
    Ragged,
    Null,
    NestedMapping,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MultiElement { len } => write!(f, "array with {} elements", len),
            SkipReason::MultiDimensional { shape } => write!(f, "array of shape {:?}", shape),
            SkipReason::EmptyArray => f.write_str("empty array"),
            SkipReason::Ragged => f.write_str("ragged array"),
            SkipReason::Null => f.write_str("null value"),
            SkipReason::NestedMapping => f.write_str("nested mapping"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Kept,
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionDiagnostic {
    pub metric: String,
    pub outcome: ExtractionOutcome,
}

/// Flat metric -> scalar mapping for one work item, plus what was dropped and why.
#[derive(Debug, Clone, Default)]
pub struct ScalarRecord {
    pub values: BTreeMap<String, ScalarValue>,
    pub diagnostics: Vec<ExtractionDiagnostic>,
}

impl ScalarRecord {
    pub fn skipped(&self) -> impl Iterator<Item = (&str, &SkipReason)> {
        self.diagnostics.iter().filter_map(|d| match &d.outcome {
            ExtractionOutcome::Skipped { reason } => Some((d.metric.as_str(), reason)),
            ExtractionOutcome::Kept => None,
        })
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped().count()
    }
}

// ── Tests ──
