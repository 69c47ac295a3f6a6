//! # Build Command
//!
//! Implements the pipeline: root configuration -> overlays -> patched modules -> manifest.
//!
//! 1. **Discover**: module calls of the root configuration and the overlay files.
//! 2. **Group**: patches by module instance, in overlay file order then declaration order.
//! 3. **Patch**: each instance's files are parsed, patched and written to the output
//!    directory along with its supporting files.
//! 4. **Redirect**: `modules.json` entries of patched instances point at the output.

use crate::discover::{find_module_contents, find_overlay_files};
use crate::manifest::update_manifest;
use indexmap::IndexMap;
use kungfu_core::{
    apply_patches, parse_overlay, resolve_modules, AppError, AppResult, ModuleCall, ModuleFile,
    ModuleFiles, ModuleIndex, PatchSpec,
};
use std::fs;
use std::path::{Path, PathBuf};

/// Arguments for the build command.
#[derive(clap::Args, Debug, Clone)]
pub struct BuildArgs {
    /// Root configuration directory.
    #[clap(default_value = ".")]
    pub root: PathBuf,

    /// Overlay file or directory of `*.kf.hcl` files, relative to ROOT.
    #[clap(long, env = "KUNGFU_OVERLAY", default_value = "overlays")]
    pub overlay: PathBuf,

    /// Output directory for patched modules, relative to ROOT.
    #[clap(
        long,
        short = 'o',
        env = "KUNGFU_OUTPUT",
        default_value = ".terraform/kungfu/modules"
    )]
    pub output: PathBuf,

    /// Leave `.terraform/modules/modules.json` untouched.
    #[clap(long)]
    pub skip_manifest: bool,
}

/// Outcome of a build run.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Instances written to the output directory, with their file counts.
    pub patched: Vec<(String, usize)>,
    /// Instances with a patch whose resource is missing. Nothing was written for them.
    pub failed: Vec<(String, AppError)>,
    /// Source filters no module call uses.
    pub unresolved: Vec<String>,
    /// Patches ignored for lack of a `source` filter.
    pub skipped: usize,
    /// Manifest entries pointed at the output directory or restored from it.
    pub redirected: usize,
}

/// Patches scheduled for one module instance.
struct InstancePlan {
    module: ModuleCall,
    patches: Vec<PatchSpec>,
}

/// Executes the build and prints a summary.
///
/// Fails after writing every successful instance when at least one failed.
pub fn execute(args: &BuildArgs) -> AppResult<()> {
    let report = run(args)?;

    println!();
    for (name, files) in &report.patched {
        println!("Patched module {} ({} file(s))", name, files);
    }
    for (name, err) in &report.failed {
        println!("Failed module {}: {}", name, err);
    }
    for source in &report.unresolved {
        println!("Warning: no module found for source {}", source);
    }
    if report.skipped > 0 {
        println!("Skipped {} patch(es) without a source", report.skipped);
    }
    if report.redirected > 0 {
        println!("Updated {} manifest entr(ies)", report.redirected);
    }

    if !report.failed.is_empty() {
        return Err(AppError::General(format!(
            "{} module(s) failed to patch",
            report.failed.len()
        )));
    }

    if !report.patched.is_empty() {
        println!("Build completed. Run 'plan' to see the changes.");
    }
    Ok(())
}

/// Runs the build without printing a summary.
pub fn run(args: &BuildArgs) -> AppResult<BuildReport> {
    let root = std::path::absolute(&args.root).map_err(|e| AppError::file(&args.root, e))?;
    if !root.is_dir() {
        return Err(AppError::General(format!(
            "root module directory not found: {}",
            root.display()
        )));
    }
    println!("Root module: {}", root.display());
    println!("Output directory: {}", args.output.display());

    let index = ModuleIndex::with_default_registries(resolve_modules(&root)?);
    println!("Found {} module(s) in root module", index.modules().len());
    for module in index.modules() {
        println!("  - {} (source: {})", module.name, module.declared_source);
    }

    let mut report = BuildReport::default();

    let overlay_files = find_overlay_files(&root.join(&args.overlay))?;
    if overlay_files.is_empty() {
        println!("No overlay files found in {}", args.overlay.display());
        return Ok(report);
    }

    let patches = load_patches(&overlay_files)?;
    let plans = plan_instances(&index, patches, &mut report);

    let output_base = root.join(&args.output);
    let mut restore: Vec<(String, String)> = Vec::new();
    for plan in plans.values() {
        let name = &plan.module.name;
        println!(
            "Patching module {} (source: {}, {} patch(es))",
            name,
            plan.module.declared_source,
            plan.patches.len()
        );
        match patch_instance(&output_base, plan) {
            Ok(written) => report.patched.push((name.clone(), written)),
            Err(err @ AppError::ResourceNotFound(_)) => {
                tracing::error!(module = %name, error = %err, "module not patched");
                if clear_stale_output(&output_base, name)? {
                    restore.push((name.clone(), original_dir(&root, &plan.module.resolved_path)));
                }
                report.failed.push((name.clone(), err));
            }
            Err(err) => return Err(err),
        }
    }

    if !args.skip_manifest && !(report.patched.is_empty() && restore.is_empty()) {
        let names: Vec<String> = report.patched.iter().map(|(name, _)| name.clone()).collect();
        report.redirected = update_manifest(&root, &args.output, &names, &restore)?;
    }

    Ok(report)
}

/// Parses overlay files in order and flattens their patches.
fn load_patches(files: &[PathBuf]) -> AppResult<Vec<PatchSpec>> {
    println!("Found {} overlay file(s)", files.len());
    let mut patches = Vec::new();
    for path in files {
        let source = fs::read_to_string(path).map_err(|e| AppError::file(path, e))?;
        let parsed = parse_overlay(&source, path)?;
        println!("  - {} ({} patch(es))", path.display(), parsed.len());
        patches.extend(parsed);
    }
    Ok(patches)
}

/// Assigns patches to module instances.
///
/// Patches are visited once in flattened order, so every instance receives its
/// patches in declaration order whichever spelling of the source selected them.
fn plan_instances(
    index: &ModuleIndex,
    patches: Vec<PatchSpec>,
    report: &mut BuildReport,
) -> IndexMap<String, InstancePlan> {
    let mut plans: IndexMap<String, InstancePlan> = IndexMap::new();
    let mut unresolved: IndexMap<String, usize> = IndexMap::new();

    for patch in patches {
        let Some(source) = patch.source_filter.as_deref() else {
            tracing::warn!(
                target_resource = %patch.resource_key(),
                "patch has no source filter; skipping"
            );
            report.skipped += 1;
            continue;
        };

        let instances = index.modules_for_source(source);
        if instances.is_empty() {
            *unresolved.entry(source.to_string()).or_default() += 1;
            continue;
        }
        for module in instances {
            plans
                .entry(module.name.clone())
                .or_insert_with(|| InstancePlan {
                    module: module.clone(),
                    patches: Vec::new(),
                })
                .patches
                .push(patch.clone());
        }
    }

    for (source, count) in unresolved {
        let err = AppError::UnresolvedModule(source.clone());
        tracing::warn!(error = %err, patches = count, "skipping patches");
        report.unresolved.push(source);
    }
    plans
}

/// Patches one instance and writes it under `output_base/<name>`.
///
/// Nothing is written unless every patch applied. Returns the number of files written.
fn patch_instance(output_base: &Path, plan: &InstancePlan) -> AppResult<usize> {
    let module_dir = &plan.module.resolved_path;
    if !module_dir.is_dir() {
        return Err(AppError::General(format!(
            "module path does not exist: {}",
            module_dir.display()
        )));
    }

    let mut contents = find_module_contents(module_dir)?;
    contents.module_files.retain(|p| !p.starts_with(output_base));
    contents.support_files.retain(|p| !p.starts_with(output_base));

    let mut files = ModuleFiles::new();
    for path in &contents.module_files {
        let source = fs::read_to_string(path).map_err(|e| AppError::file(path, e))?;
        files.insert(path.clone(), ModuleFile::parse(source, path)?);
    }

    apply_patches(&mut files, &plan.patches)?;

    let out_dir = output_base.join(&plan.module.name);
    if out_dir.exists() {
        fs::remove_dir_all(&out_dir).map_err(|e| AppError::file(&out_dir, e))?;
    }

    let mut written = 0;
    for (path, file) in &files {
        let target = out_dir.join(relative_to(path, module_dir)?);
        create_parent(&target)?;
        fs::write(&target, file.to_source()).map_err(|e| AppError::file(&target, e))?;
        tracing::debug!(path = %target.display(), modified = file.is_modified(), "wrote module file");
        written += 1;
    }
    for path in &contents.support_files {
        let target = out_dir.join(relative_to(path, module_dir)?);
        create_parent(&target)?;
        fs::copy(path, &target).map_err(|e| AppError::file(&target, e))?;
        written += 1;
    }

    Ok(written)
}

/// Removes the output of an earlier build of `name`. Returns whether one existed.
fn clear_stale_output(output_base: &Path, name: &str) -> AppResult<bool> {
    let stale = output_base.join(name);
    if !stale.exists() {
        return Ok(false);
    }
    tracing::warn!(module = %name, path = %stale.display(), "removing stale patched copy");
    fs::remove_dir_all(&stale).map_err(|e| AppError::file(&stale, e))?;
    Ok(true)
}

/// Module directory as recorded in the manifest: relative to the root when inside it.
fn original_dir(root: &Path, module_dir: &Path) -> String {
    module_dir
        .strip_prefix(root)
        .unwrap_or(module_dir)
        .to_string_lossy()
        .into_owned()
}

fn relative_to<'a>(path: &'a Path, base: &Path) -> AppResult<&'a Path> {
    path.strip_prefix(base).map_err(|_| {
        AppError::General(format!(
            "{} is not inside {}",
            path.display(),
            base.display()
        ))
    })
}

fn create_parent(path: &Path) -> AppResult<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent).map_err(|e| AppError::file(parent, e)),
        None => Ok(()),
    }
}
