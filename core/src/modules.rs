//! # Module Index
//!
//! Discovers the `module` calls of a root configuration and matches overlay
//! source filters against them.

use crate::error::{AppError, AppResult};
use crate::index::label_text;
use crate::module_file::{evaluate, parse_body};
use crate::value::Value;
use hcl_edit::structure::Block;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Registry hosts stripped from module sources before comparison.
pub const DEFAULT_REGISTRY_PREFIXES: &[&str] = &["registry.opentofu.org/", "registry.terraform.io/"];

/// Directory, relative to the root configuration, where `init` installs remote modules.
pub const MODULE_CACHE_DIR: &str = ".terraform/modules";

/// One `module "name" { source = "..." }` call of the root configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleCall {
    /// Instance name (the block label).
    pub name: String,
    /// Source string as written.
    pub declared_source: String,
    /// Directory holding the module's files.
    pub resolved_path: PathBuf,
}

/// Reads every `*.tf` file directly inside `root_dir` and collects its module calls.
///
/// Files are read in lexical order. Module blocks without a single label or
/// without a string `source` are skipped with a warning.
pub fn resolve_modules(root_dir: &Path) -> AppResult<Vec<ModuleCall>> {
    let mut tf_files = Vec::new();
    for entry in fs::read_dir(root_dir).map_err(|e| AppError::file(root_dir, e))? {
        let path = entry.map_err(|e| AppError::file(root_dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "tf") {
            tf_files.push(path);
        }
    }
    tf_files.sort();

    let mut modules = Vec::new();
    for path in tf_files {
        let source = fs::read_to_string(&path).map_err(|e| AppError::file(&path, e))?;
        modules.extend(parse_module_calls(&source, &path, root_dir)?);
    }

    Ok(modules)
}

/// Extracts module calls from one root configuration file.
pub fn parse_module_calls(source: &str, path: &Path, root_dir: &Path) -> AppResult<Vec<ModuleCall>> {
    let body = parse_body(source, path)?;

    Ok(body
        .blocks()
        .filter(|block| block.ident.as_str() == "module")
        .filter_map(|block| module_call(block, path, root_dir))
        .collect())
}

fn module_call(block: &Block, path: &Path, root_dir: &Path) -> Option<ModuleCall> {
    let [label] = block.labels.as_slice() else {
        tracing::warn!(
            path = %path.display(),
            labels = block.labels.len(),
            "module block needs exactly one label; skipping"
        );
        return None;
    };
    let name = label_text(label).to_string();

    let declared_source = match block.body.get_attribute("source").map(|a| evaluate(&a.value)) {
        Some(Value::String(source)) if !source.is_empty() => source,
        _ => {
            tracing::warn!(
                path = %path.display(),
                module = %name,
                "module has no literal source; skipping"
            );
            return None;
        }
    };

    let resolved_path = resolve_module_path(root_dir, &name, &declared_source);
    Some(ModuleCall {
        name,
        declared_source,
        resolved_path,
    })
}

/// Maps a declared source to the directory holding the module.
///
/// - absolute paths pass through;
/// - sources starting with `.` or `/` are relative to `root_dir`;
/// - anything else was installed by `init` under `.terraform/modules/<name>`,
///   plus the `//subdir` part of the source when present.
pub fn resolve_module_path(root_dir: &Path, name: &str, source: &str) -> PathBuf {
    let source_path = Path::new(source);
    if source_path.is_absolute() {
        return source_path.to_path_buf();
    }
    if source.starts_with('.') || source.starts_with('/') {
        return clean(&root_dir.join(source_path));
    }

    let mut dir = root_dir.join(MODULE_CACHE_DIR).join(name);
    if let Some(subdir) = remote_subdir(source) {
        dir.push(subdir);
    }
    dir
}

/// The `//subdir` selector of a remote source, without any query string.
fn remote_subdir(source: &str) -> Option<&str> {
    let without_query = source.split('?').next().unwrap_or(source);
    let mut search_from = 0;
    while let Some(found) = without_query[search_from..].find("//") {
        let at = search_from + found;
        if at > 0 && without_query.as_bytes()[at - 1] == b':' {
            search_from = at + 2;
            continue;
        }
        let subdir = without_query[at + 2..].trim_matches('/');
        return (!subdir.is_empty()).then_some(subdir);
    }
    None
}

/// Drops `.` components so joined relative sources read naturally.
fn clean(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Linear scan for the first module call whose declared source is exactly `source`.
pub fn find_module_by_source<'a>(modules: &'a [ModuleCall], source: &str) -> Option<&'a ModuleCall> {
    modules.iter().find(|module| module.declared_source == source)
}

/// Module calls plus the registry prefixes used to normalize sources.
#[derive(Debug, Clone)]
pub struct ModuleIndex {
    modules: Vec<ModuleCall>,
    registry_prefixes: Vec<String>,
}

impl ModuleIndex {
    /// Creates an index with an explicit registry prefix list.
    pub fn new<I, S>(modules: Vec<ModuleCall>, registry_prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ModuleIndex {
            modules,
            registry_prefixes: registry_prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates an index using [`DEFAULT_REGISTRY_PREFIXES`].
    pub fn with_default_registries(modules: Vec<ModuleCall>) -> Self {
        Self::new(modules, DEFAULT_REGISTRY_PREFIXES.iter().copied())
    }

    /// All known module calls.
    pub fn modules(&self) -> &[ModuleCall] {
        &self.modules
    }

    /// Strips the longest matching registry prefix from `source`.
    pub fn normalize_source<'s>(&self, source: &'s str) -> &'s str {
        self.registry_prefixes
            .iter()
            .filter(|prefix| source.starts_with(prefix.as_str()))
            .max_by_key(|prefix| prefix.len())
            .map_or(source, |prefix| &source[prefix.len()..])
    }

    /// True when two sources name the same module once registry hosts are stripped.
    pub fn same_source(&self, a: &str, b: &str) -> bool {
        a == b || self.normalize_source(a) == self.normalize_source(b)
    }

    /// Every module call whose declared source matches `filter`.
    pub fn modules_for_source(&self, filter: &str) -> Vec<&ModuleCall> {
        self.modules
            .iter()
            .filter(|module| self.same_source(&module.declared_source, filter))
            .collect()
    }
}
