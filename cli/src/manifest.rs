//! # Module Manifest
//!
//! Reads and rewrites `.terraform/modules/modules.json`, the record `init`
//! keeps of where each module instance lives on disk. Pointing an entry's
//! `Dir` at the patched copy makes `plan` and `apply` read the patched module.

use kungfu_core::{AppError, AppResult, MODULE_CACHE_DIR};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the manifest inside the module cache directory.
pub const MANIFEST_FILE: &str = "modules.json";

/// Top-level manifest document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModulesManifest {
    /// One entry per installed module instance; the root module has an empty key.
    #[serde(rename = "Modules", default)]
    pub modules: Vec<ManifestEntry>,

    /// Fields we do not interpret, written back unchanged.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One installed module instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestEntry {
    /// Instance address, e.g. `web` or `web.child`.
    #[serde(rename = "Key")]
    pub key: String,
    /// Source as recorded by `init`.
    #[serde(rename = "Source", default)]
    pub source: String,
    /// Directory the module is loaded from, relative to the root.
    #[serde(rename = "Dir")]
    pub dir: String,

    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

/// Location of the manifest under `root`.
pub fn manifest_path(root: &Path) -> PathBuf {
    root.join(MODULE_CACHE_DIR).join(MANIFEST_FILE)
}

/// Points the entries of `patched` instances at `<output>/<key>`.
///
/// Entries listed in `restore` as `(key, dir)` that still point at
/// `<output>/<key>` get `dir` back; their patched copy no longer exists.
/// Returns how many entries changed. The file is only rewritten when at
/// least one did.
pub fn update_manifest(
    root: &Path,
    output: &Path,
    patched: &[String],
    restore: &[(String, String)],
) -> AppResult<usize> {
    let path = manifest_path(root);
    if !path.exists() {
        return Err(AppError::General(format!(
            "{} not found; run 'init' first",
            path.display()
        )));
    }

    let data = fs::read_to_string(&path).map_err(|e| AppError::file(&path, e))?;
    let mut manifest: ModulesManifest = serde_json::from_str(&data).map_err(|e| {
        AppError::General(format!("failed to parse {}: {}", path.display(), e))
    })?;

    let changed = redirect_entries(&mut manifest, output, patched, restore);
    if changed > 0 {
        let mut updated = serde_json::to_string_pretty(&manifest).map_err(|e| {
            AppError::General(format!("failed to serialize {}: {}", path.display(), e))
        })?;
        updated.push('\n');
        fs::write(&path, updated).map_err(|e| AppError::file(&path, e))?;
    }

    tracing::debug!(path = %path.display(), changed, "manifest updated");
    Ok(changed)
}

fn redirect_entries(
    manifest: &mut ModulesManifest,
    output: &Path,
    patched: &[String],
    restore: &[(String, String)],
) -> usize {
    let mut changed = 0;
    for entry in manifest.modules.iter_mut().filter(|entry| !entry.key.is_empty()) {
        let patched_dir = output.join(&entry.key).to_string_lossy().into_owned();
        let target = if patched.contains(&entry.key) {
            Some(patched_dir)
        } else if entry.dir == patched_dir {
            restore
                .iter()
                .find(|(key, _)| *key == entry.key)
                .map(|(_, dir)| dir.clone())
        } else {
            None
        };

        if let Some(dir) = target.filter(|dir| *dir != entry.dir) {
            tracing::debug!(key = %entry.key, from = %entry.dir, to = %dir, "redirecting module");
            entry.dir = dir;
            changed += 1;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    const MANIFEST: &str = r#"{
  "Modules": [
    { "Key": "", "Source": "", "Dir": "." },
    {
      "Key": "vpc",
      "Source": "registry.terraform.io/terraform-aws-modules/vpc/aws",
      "Version": "5.0.0",
      "Dir": ".terraform/modules/vpc"
    },
    { "Key": "web", "Source": "./modules/web", "Dir": "modules/web" },
    { "Key": "web.child", "Source": "./child", "Dir": "modules/web/child" }
  ],
  "FormatVersion": 1
}"#;

    fn write_manifest(root: &Path) -> PathBuf {
        let path = manifest_path(root);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, MANIFEST).unwrap();
        path
    }

    #[test]
    fn test_update_redirects_patched_instances_only() {
        let dir = tempdir().unwrap();
        let path = write_manifest(dir.path());

        let changed = update_manifest(
            dir.path(),
            Path::new(".terraform/kungfu/modules"),
            &["vpc".to_string(), "web".to_string()],
            &[],
        )
        .unwrap();
        assert_eq!(changed, 2);

        let manifest: ModulesManifest =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let dirs: Vec<_> = manifest.modules.iter().map(|m| m.dir.as_str()).collect();
        assert_eq!(
            dirs,
            vec![
                ".",
                ".terraform/kungfu/modules/vpc",
                ".terraform/kungfu/modules/web",
                "modules/web/child",
            ]
        );
    }

    #[test]
    fn test_update_preserves_unknown_fields() {
        let dir = tempdir().unwrap();
        let path = write_manifest(dir.path());

        update_manifest(dir.path(), Path::new("out"), &["vpc".to_string()], &[]).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["FormatVersion"], serde_json::json!(1));
        assert_eq!(raw["Modules"][1]["Version"], serde_json::json!("5.0.0"));
        assert_eq!(raw["Modules"][1]["Dir"], serde_json::json!("out/vpc"));
    }

    #[test]
    fn test_update_is_idempotent() {
        let dir = tempdir().unwrap();
        write_manifest(dir.path());
        let patched = ["web".to_string()];

        assert_eq!(update_manifest(dir.path(), Path::new("out"), &patched, &[]).unwrap(), 1);
        assert_eq!(update_manifest(dir.path(), Path::new("out"), &patched, &[]).unwrap(), 0);
    }

    #[test]
    fn test_restore_only_touches_entries_pointing_at_output() {
        let dir = tempdir().unwrap();
        let path = write_manifest(dir.path());
        let output = Path::new(".terraform/kungfu/modules");
        update_manifest(dir.path(), output, &["web".to_string()], &[]).unwrap();

        let restore = [
            ("web".to_string(), "modules/web".to_string()),
            ("vpc".to_string(), "elsewhere".to_string()),
        ];
        assert_eq!(update_manifest(dir.path(), output, &[], &restore).unwrap(), 1);

        let manifest: ModulesManifest =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(manifest.modules[1].dir, ".terraform/modules/vpc");
        assert_eq!(manifest.modules[2].dir, "modules/web");
    }

    #[test]
    fn test_missing_manifest_is_an_error() {
        let dir = tempdir().unwrap();
        let err = update_manifest(dir.path(), Path::new("out"), &[], &[]).unwrap_err();
        assert!(err.to_string().contains("init"));
    }
}
