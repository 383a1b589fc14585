use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::error::ArchiveError;
use crate::queue::list_matching;
use crate::table::CombinedTable;

pub const SIDECAR_PATTERN: &str = "*_platemap.*";
pub const MANIFEST_NAME: &str = "manifest.json";

/// Where and under which name a bundle is created.
#[derive(Debug, Clone)]
pub struct ArchiveRequest<'a> {
    pub output_root: &'a Path,
    pub source_dir: &'a Path,
    pub source_name: &'a str,
    pub date: NaiveDate,
}

/// A finished output bundle.
#[derive(Debug, Clone, Serialize)]
pub struct Bundle {
    pub dir: PathBuf,
    pub table: PathBuf,
    pub sidecars: Vec<PathBuf>,
}

pub fn bundle_name(source_name: &str, date: NaiveDate) -> String {
    format!("{}_{}", source_name, date.format("%Y%m%d"))
}

/// Create `root/base`, or `root/base_2`, `root/base_3`, ... if taken.
/// Creation is exclusive, so an earlier bundle is never merged into.
pub fn create_fresh_dir(root: &Path, base: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(root)?;
    let mut n = 1u32;
    loop {
        let name = if n == 1 {
            base.to_string()
        } else {
            format!("{}_{}", base, n)
        };
        let dir = root.join(name);
        match fs::create_dir(&dir) {
            Ok(()) => return Ok(dir),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}

/// Copy `src` into `dir`, keeping permissions and modification time.
fn copy_preserving(src: &Path, dir: &Path) -> io::Result<PathBuf> {
    let name = src
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no file name"))?;
    let dst = dir.join(name);
    fs::copy(src, &dst)?;
    let modified = fs::metadata(src)?.modified()?;
    File::options().write(true).open(&dst)?.set_modified(modified)?;
    Ok(dst)
}

/// Write the combined table, copy plate-map sidecars and a manifest into a
/// new dated bundle. The artifact directory is left untouched.
pub fn archive<M: Serialize>(
    table: &CombinedTable,
    manifest: &M,
    request: &ArchiveRequest<'_>,
) -> Result<Bundle, ArchiveError> {
    let base = bundle_name(request.source_name, request.date);
    let dir = create_fresh_dir(request.output_root, &base).map_err(|source| ArchiveError::Io {
        path: request.output_root.join(&base),
        source,
    })?;

    let table_path = dir.join(format!("{}_combined.csv", base));
    table.write_csv(&table_path)?;

    let mut sidecars = Vec::new();
    for src in list_matching(request.source_dir, SIDECAR_PATTERN)? {
        let copied = copy_preserving(&src, &dir).map_err(|source| ArchiveError::Io {
            path: src.clone(),
            source,
        })?;
        info!("Copied sidecar {:?}", copied);
        sidecars.push(copied);
    }

    let manifest_path = dir.join(MANIFEST_NAME);
    let file = File::create(&manifest_path).map_err(|source| ArchiveError::Io {
        path: manifest_path.clone(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, manifest)?;
    writer.flush().map_err(|source| ArchiveError::Io {
        path: manifest_path.clone(),
        source,
    })?;

    info!("Bundle written to {:?}", dir);
    Ok(Bundle {
        dir,
        table: table_path,
        sidecars,
    })
}

// ── Tests ──
