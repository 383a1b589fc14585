use std::fs;
use std::path::{Path, PathBuf};

use config::{Config, Environment};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ENV_PREFIX: &str = "HARVEST";
pub const DEFAULT_WORKERS: usize = 3;
/// Accepted input extensions, compared case-insensitively.
pub const IMAGE_EXTENSIONS: &[&str] = &["tif", "tiff"];

/// Values given on the command line. They win over file and environment.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub source: Option<PathBuf>,
    pub target: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub calibration: Option<f64>,
    pub workers: Option<usize>,
    pub filter: Option<String>,
    pub analyzer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerSettings {
    pub program: Option<String>,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        AnalyzerSettings {
            program: None,
            args: default_args(),
        }
    }
}

fn default_args() -> Vec<String> {
    vec!["{input}".to_string(), "{calibration}".to_string()]
}

#[derive(Debug, Deserialize)]
struct RawSettings {
    source_dir: Option<PathBuf>,
    target_dir: Option<PathBuf>,
    output_root: Option<PathBuf>,
    calibration: Option<f64>,
    workers: usize,
    filter: Option<String>,
    #[serde(default)]
    analyzer: AnalyzerSettings,
}

/// Everything one pipeline run needs. Passed explicitly, never global.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    pub output_root: PathBuf,
    pub calibration: Option<f64>,
    pub workers: usize,
    pub filter: Option<String>,
    pub analyzer: AnalyzerSettings,
}

impl Settings {
    /// Defaults for a source directory: artifacts next to the images,
    /// bundles next to the source directory.
    pub fn for_source(source_dir: impl Into<PathBuf>) -> Self {
        let source_dir = source_dir.into();
        let output_root = match source_dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Settings {
            target_dir: source_dir.clone(),
            output_root,
            source_dir,
            calibration: None,
            workers: DEFAULT_WORKERS,
            filter: None,
            analyzer: AnalyzerSettings::default(),
        }
    }

    fn from_raw(raw: RawSettings) -> Result<Self, ConfigError> {
        let source_dir = raw.source_dir.ok_or(ConfigError::MissingSource)?;
        let mut settings = Settings::for_source(source_dir);
        if let Some(target) = raw.target_dir {
            settings.target_dir = target;
        }
        if let Some(root) = raw.output_root {
            settings.output_root = root;
        }
        settings.calibration = raw.calibration;
        settings.workers = raw.workers;
        settings.filter = raw.filter.filter(|f| !f.is_empty());
        settings.analyzer = raw.analyzer;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidWorkers(self.workers));
        }
        if let Some(c) = self.calibration {
            if !c.is_finite() || c <= 0.0 {
                return Err(ConfigError::InvalidCalibration(c));
            }
        }
        Ok(())
    }

    pub fn calibration(&self) -> Result<f64, ConfigError> {
        self.calibration.ok_or(ConfigError::MissingCalibration)
    }

    pub fn analyzer_program(&self) -> Result<&str, ConfigError> {
        self.analyzer
            .program
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::MissingAnalyzer)
    }

    pub fn check_source(&self) -> Result<(), ConfigError> {
        fs::read_dir(&self.source_dir)
            .map(|_| ())
            .map_err(|source| ConfigError::SourceUnreadable {
                path: self.source_dir.clone(),
                source,
            })
    }

    /// Source must be readable; the artifact directory is created if absent.
    pub fn prepare_dirs(&self) -> Result<(), ConfigError> {
        self.check_source()?;
        fs::create_dir_all(&self.target_dir).map_err(|source| ConfigError::TargetUncreatable {
            path: self.target_dir.clone(),
            source,
        })
    }

    /// Final path component of the source directory, used to name bundles.
    pub fn source_name(&self) -> String {
        fs::canonicalize(&self.source_dir)
            .ok()
            .as_deref()
            .unwrap_or(self.source_dir.as_path())
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "source".to_string())
    }
}

/// Layer defaults, an optional settings file, `HARVEST_*` environment
/// variables and command-line overrides, in that order.
pub fn load(file: Option<&Path>, overrides: &Overrides) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder()
        .set_default("workers", DEFAULT_WORKERS as i64)?
        .set_default("analyzer.args", default_args())?;

    if let Some(path) = file {
        builder = builder.add_source(config::File::from(path));
    }

    builder = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("analyzer.args"),
        )
        .set_override_option("source_dir", overrides.source.as_deref().map(path_value))?
        .set_override_option("target_dir", overrides.target.as_deref().map(path_value))?
        .set_override_option("output_root", overrides.output.as_deref().map(path_value))?
        .set_override_option("calibration", overrides.calibration)?
        .set_override_option("workers", overrides.workers.map(|w| w as i64))?
        .set_override_option("filter", overrides.filter.clone())?
        .set_override_option("analyzer.program", overrides.analyzer.clone())?;

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

fn path_value(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

// ── Tests ──
