//! # File Discovery
//!
//! Directory walks for overlay files and module contents. Results are sorted
//! so runs are reproducible across platforms.

use kungfu_core::{AppError, AppResult};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Suffix of overlay files.
pub const OVERLAY_SUFFIX: &str = ".kf.hcl";

/// Extension of module files that get parsed and patched.
pub const MODULE_EXTENSION: &str = "tf";

/// True for `*.kf.hcl` paths.
pub fn is_overlay_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(OVERLAY_SUFFIX))
}

fn is_module_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == MODULE_EXTENSION) && !is_overlay_file(path)
}

/// Resolves the overlay argument to a sorted list of overlay files.
///
/// A directory is searched recursively; a file must itself be an overlay.
pub fn find_overlay_files(path: &Path) -> AppResult<Vec<PathBuf>> {
    if !path.exists() {
        return Err(AppError::General(format!(
            "overlay path does not exist: {}",
            path.display()
        )));
    }

    if path.is_file() {
        if !is_overlay_file(path) {
            return Err(AppError::General(format!(
                "overlay file must have {} extension: {}",
                OVERLAY_SUFFIX,
                path.display()
            )));
        }
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = walk_files(path)?;
    files.retain(|p| is_overlay_file(p));
    Ok(files)
}

/// Files of one module directory, split into parseable module files and
/// everything else. Both lists are sorted by path.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ModuleContents {
    /// `*.tf` files.
    pub module_files: Vec<PathBuf>,
    /// Templates, scripts and other supporting files.
    pub support_files: Vec<PathBuf>,
}

/// Lists the files of a module directory recursively.
///
/// Overlay files placed inside a module are neither patched nor copied.
pub fn find_module_contents(dir: &Path) -> AppResult<ModuleContents> {
    let mut contents = ModuleContents::default();
    for path in walk_files(dir)? {
        if is_module_file(&path) {
            contents.module_files.push(path);
        } else if !is_overlay_file(&path) {
            contents.support_files.push(path);
        }
    }
    Ok(contents)
}

fn walk_files(dir: &Path) -> AppResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            AppError::General(format!("failed to walk {}: {}", dir.display(), e))
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_find_overlay_files_recursive_and_sorted() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("prod")).unwrap();
        fs::write(root.join("b.kf.hcl"), "").unwrap();
        fs::write(root.join("a.kf.hcl"), "").unwrap();
        fs::write(root.join("prod/c.kf.hcl"), "").unwrap();
        fs::write(root.join("README.md"), "").unwrap();
        fs::write(root.join("plain.hcl"), "").unwrap();

        let files = find_overlay_files(root).unwrap();
        assert_eq!(
            files,
            vec![
                root.join("a.kf.hcl"),
                root.join("b.kf.hcl"),
                root.join("prod/c.kf.hcl"),
            ]
        );
    }

    #[test]
    fn test_find_overlay_single_file() {
        let dir = tempdir().unwrap();
        let overlay = dir.path().join("prod.kf.hcl");
        fs::write(&overlay, "").unwrap();
        assert_eq!(find_overlay_files(&overlay).unwrap(), vec![overlay]);

        let wrong = dir.path().join("prod.hcl");
        fs::write(&wrong, "").unwrap();
        assert!(find_overlay_files(&wrong).is_err());
    }

    #[test]
    fn test_find_overlay_missing_path() {
        let dir = tempdir().unwrap();
        assert!(find_overlay_files(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn test_find_module_contents() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("templates")).unwrap();
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::write(root.join("main.tf"), "").unwrap();
        fs::write(root.join("nested/extra.tf"), "").unwrap();
        fs::write(root.join("templates/user_data.sh"), "").unwrap();
        fs::write(root.join("local.kf.hcl"), "").unwrap();

        let contents = find_module_contents(root).unwrap();
        assert_eq!(
            contents.module_files,
            vec![root.join("main.tf"), root.join("nested/extra.tf")]
        );
        assert_eq!(contents.support_files, vec![root.join("templates/user_data.sh")]);
    }
}
