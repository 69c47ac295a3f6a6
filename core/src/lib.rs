#![deny(missing_docs)]

//! # Kungfu Core
//!
//! Core library of the overlay patcher: patches resource attributes of
//! downloaded HCL modules without forking them.
//!
//! Overlay files declare `patch "type" "name" { ... }` blocks. Each patch is
//! scoped to a module source, matched against the root configuration's module
//! calls and applied to the module's files with a replace, merge or append
//! strategy. Files nobody patched are emitted byte-for-byte.

/// Shared error types.
pub mod error;

/// Dynamic value model and HCL rendering.
pub mod value;

/// Per-file block index.
pub mod index;

/// Parsed module files backed by a lossless syntax tree.
pub mod module_file;

/// Overlay (`*.kf.hcl`) parsing.
pub mod overlay;

/// Root configuration module discovery.
pub mod modules;

/// Merge strategies.
pub mod merge;

/// Patch application.
pub mod patcher;

pub use error::{AppError, AppResult, ParseError, ParseErrorKind, Position};
pub use index::{BlockHandle, FileIndex, ResourceHandle, ResourceKey};
pub use merge::{append_to_list, apply_strategy, deep_merge};
pub use module_file::{evaluate, ModuleFile};
pub use modules::{
    find_module_by_source, resolve_module_path, resolve_modules, ModuleCall, ModuleIndex,
    DEFAULT_REGISTRY_PREFIXES, MODULE_CACHE_DIR,
};
pub use overlay::{parse_overlay, MergeStrategy, PatchAttribute, PatchSpec};
pub use patcher::{apply_patches, locate_resource, ModuleFiles};
pub use value::Value;
