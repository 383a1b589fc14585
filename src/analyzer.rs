use std::path::Path;
use std::process::{Command, Stdio};

use serde_json::Value;
use tracing::debug;

use crate::config::AnalyzerSettings;
use crate::error::{AnalysisError, ConfigError};
use crate::model::AnalysisResult;

pub const SCRATCH_ENV: &str = "HARVEST_SCRATCH_DIR";

/// What the analysis collaborator gets for one image.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisInput<'a> {
    pub path: &'a Path,
    pub stem: &'a str,
    pub calibration: f64,
    /// Private to this unit, removed once the unit finishes.
    pub scratch_dir: &'a Path,
}

/// The single-file image analysis. Slow, CPU-bound, allowed to fail.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, input: &AnalysisInput<'_>) -> Result<AnalysisResult, AnalysisError>;
}

/// Runs an external program per image and reads a JSON object from its stdout.
#[derive(Debug, Clone)]
pub struct CommandAnalyzer {
    program: String,
    args: Vec<String>,
}

impl CommandAnalyzer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        CommandAnalyzer {
            program: program.into(),
            args,
        }
    }

    pub fn from_settings(settings: &AnalyzerSettings) -> Result<Self, ConfigError> {
        let program = settings
            .program
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::MissingAnalyzer)?;
        Ok(CommandAnalyzer::new(program, settings.args.clone()))
    }

    fn render_args(&self, input: &AnalysisInput<'_>) -> Vec<String> {
        let path = input.path.to_string_lossy();
        let scratch = input.scratch_dir.to_string_lossy();
        let calibration = input.calibration.to_string();
        self.args
            .iter()
            .map(|a| {
                a.replace("{input}", &path)
                    .replace("{stem}", input.stem)
                    .replace("{calibration}", &calibration)
                    .replace("{scratch}", &scratch)
            })
            .collect()
    }
}

impl Analyzer for CommandAnalyzer {
    fn analyze(&self, input: &AnalysisInput<'_>) -> Result<AnalysisResult, AnalysisError> {
        let args = self.render_args(input);
        debug!(program = %self.program, ?args, "starting analyzer");

        let output = Command::new(&self.program)
            .args(&args)
            .env(SCRATCH_ENV, input.scratch_dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| AnalysisError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AnalysisError::Exit {
                status: output.status.to_string(),
                stderr: tail(&stderr, 5),
            });
        }

        parse_output(&output.stdout)
    }
}

fn parse_output(stdout: &[u8]) -> Result<AnalysisResult, AnalysisError> {
    match serde_json::from_slice::<Value>(stdout)? {
        Value::Object(map) => Ok(AnalysisResult::new(map)),
        Value::Array(_) => Err(AnalysisError::NotAnObject("an array")),
        Value::String(_) => Err(AnalysisError::NotAnObject("a string")),
        Value::Number(_) => Err(AnalysisError::NotAnObject("a number")),
        Value::Bool(_) => Err(AnalysisError::NotAnObject("a boolean")),
        Value::Null => Err(AnalysisError::NotAnObject("null")),
    }
}

/// Last `n` non-empty lines, joined with " | ".
fn tail(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join(" | ")
}


// ── Tests ──
