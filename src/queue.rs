use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use glob::{glob_with, MatchOptions, Pattern};
use tracing::{info, warn};

use crate::artifact::artifact_path;
use crate::config::IMAGE_EXTENSIONS;
use crate::error::ConfigError;
use crate::model::WorkItem;

/// Outcome of work-queue resolution for one run.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Images with an accepted extension, before filtering.
    pub discovered: usize,
    /// Images dropped by the name filter.
    pub filtered_out: usize,
    /// Images whose artifact already exists.
    pub completed: usize,
    /// Images sharing a stem with an earlier one; they would overwrite its artifact.
    pub duplicates: Vec<PathBuf>,
    pub pending: Vec<WorkItem>,
}

/// Files directly in `dir` whose names match `pattern`, case-insensitively.
pub fn list_matching(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, ConfigError> {
    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    let full = format!(
        "{}/{}",
        Pattern::escape(&dir.to_string_lossy()),
        pattern
    );
    let found: BTreeSet<PathBuf> = glob_with(&full, options)?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    Ok(found.into_iter().collect())
}

/// All images in `source_dir`, sorted by path.
pub fn discover_images(source_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let mut found = BTreeSet::new();
    for ext in IMAGE_EXTENSIONS {
        found.extend(list_matching(source_dir, &format!("*.{}", ext))?);
    }
    Ok(found.into_iter().collect())
}

/// Images that still need processing: matching the filter, first of their
/// stem, and without an artifact in `target_dir`.
///
/// Existence is checked once here and not again during the run.
pub fn resolve_work_queue(
    source_dir: &Path,
    filter: Option<&str>,
    target_dir: &Path,
) -> Result<Resolution, ConfigError> {
    let images = discover_images(source_dir)?;
    let mut res = Resolution {
        discovered: images.len(),
        ..Default::default()
    };
    info!("{} image files found in {:?}", res.discovered, source_dir);

    let mut seen_stems = HashSet::new();
    for path in images {
        let Some(item) = WorkItem::from_path(&path) else {
            warn!("Skipping {:?}: file name is not valid UTF-8", path);
            continue;
        };
        if let Some(needle) = filter {
            if !item.file_name().contains(needle) {
                res.filtered_out += 1;
                continue;
            }
        }
        if !seen_stems.insert(item.stem.clone()) {
            warn!("Skipping {:?}: another image already uses stem {:?}", path, item.stem);
            res.duplicates.push(path);
            continue;
        }
        if artifact_path(target_dir, &item.stem).exists() {
            res.completed += 1;
            continue;
        }
        res.pending.push(item);
    }

    info!(
        "{} pending, {} already done, {} filtered out",
        res.pending.len(),
        res.completed,
        res.filtered_out
    );
    Ok(res)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").unwrap();
    }

    fn stems(res: &Resolution) -> Vec<&str> {
        res.pending.iter().map(|i| i.stem.as_str()).collect()
    }

    #[test]
    fn finds_images_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.tif", "b.TIF", "c.Tiff", "notes.txt", "d_platemap.csv"] {
            touch(dir.path(), name);
        }
        fs::create_dir(dir.path().join("nested.tif")).unwrap();

        let images = discover_images(dir.path()).unwrap();
        let names: Vec<_> = images
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.tif", "b.TIF", "c.Tiff"]);
    }

    #[test]
    fn directory_names_with_glob_characters_are_literal() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("plate [w3]");
        fs::create_dir(&dir).unwrap();
        touch(&dir, "a.tif");
        assert_eq!(discover_images(&dir).unwrap().len(), 1);
    }

    #[test]
    fn filter_keeps_matching_names() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["A01_w3.tif", "A01_w1.tif", "B02_w3.tif"] {
            touch(dir.path(), name);
        }
        let res = resolve_work_queue(dir.path(), Some("w3"), dir.path()).unwrap();
        assert_eq!(res.discovered, 3);
        assert_eq!(res.filtered_out, 1);
        assert_eq!(stems(&res), vec!["A01_w3", "B02_w3"]);
    }

    #[test]
    fn existing_artifacts_are_excluded() {
        let src = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        for name in ["a.tif", "b.tif", "c.tif", "d.tif", "e.tif"] {
            touch(src.path(), name);
        }
        touch(target.path(), "a_scalars.csv");
        touch(target.path(), "d_scalars.csv");

        let res = resolve_work_queue(src.path(), None, target.path()).unwrap();
        assert_eq!(res.pending.len(), 5 - 2);
        assert_eq!(res.completed, 2);
        assert_eq!(stems(&res), vec!["b", "c", "e"]);
    }

    #[test]
    fn second_resolution_after_completion_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.tif");
        touch(dir.path(), "b.tif");

        let first = resolve_work_queue(dir.path(), None, dir.path()).unwrap();
        for item in &first.pending {
            touch(dir.path(), &format!("{}_scalars.csv", item.stem));
        }
        let second = resolve_work_queue(dir.path(), None, dir.path()).unwrap();
        assert!(second.pending.is_empty());
        assert_eq!(second.completed, 2);
    }

    #[test]
    fn colliding_stems_are_processed_once() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "x.tif");
        touch(dir.path(), "x.tiff");
        let res = resolve_work_queue(dir.path(), None, dir.path()).unwrap();
        assert_eq!(stems(&res), vec!["x"]);
        assert_eq!(res.duplicates, vec![dir.path().join("x.tiff")]);
    }

    #[test]
    fn empty_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let res = resolve_work_queue(dir.path(), None, dir.path()).unwrap();
        assert_eq!(res.discovered, 0);
        assert!(res.pending.is_empty());
    }
}
