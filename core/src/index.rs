//! # Resource Index
//!
//! Per-file lookup tables from block keys to handles into the file's syntax tree.

use hcl_edit::structure::{Block, BlockLabel, Body};
use hcl_edit::Span;
use indexmap::map::Entry;
use indexmap::IndexMap;
use std::fmt;
use std::ops::Range;

/// Key under which a file's `locals` block is stored.
pub const LOCALS_KEY: &str = "locals";

/// Unique `type.name` identifier of a resource or data block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Builds the key for a block of `resource_type` named `name`.
    ///
    /// ```
    /// use kungfu_core::ResourceKey;
    /// assert_eq!(ResourceKey::new("aws_instance", "web").as_str(), "aws_instance.web");
    /// ```
    pub fn new(resource_type: &str, name: &str) -> Self {
        ResourceKey(format!("{}.{}", resource_type, name))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque pointer to a top-level block of a parsed file.
///
/// Holds the block's ordinal among the body's blocks. Top-level blocks are
/// never inserted or removed, so the ordinal stays valid across attribute edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHandle {
    pub(crate) ordinal: usize,
    pub(crate) span: Option<Range<usize>>,
}

impl BlockHandle {
    /// Byte range of the block in the original source, when known.
    pub fn span(&self) -> Option<Range<usize>> {
        self.span.clone()
    }
}

/// A `resource` or `data` block: its labels plus a handle into the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    /// First label, e.g. `aws_instance`.
    pub resource_type: String,
    /// Second label, e.g. `web`.
    pub name: String,
    /// Where the block lives.
    pub block: BlockHandle,
}

impl ResourceHandle {
    /// The `type.name` key of this block.
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.resource_type, &self.name)
    }
}

/// Lookup tables for the addressable blocks of one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileIndex {
    /// `resource "type" "name"` blocks.
    pub resources: IndexMap<ResourceKey, ResourceHandle>,
    /// `data "type" "name"` blocks.
    pub data: IndexMap<ResourceKey, ResourceHandle>,
    /// `variable "name"` blocks.
    pub variables: IndexMap<String, BlockHandle>,
    /// `output "name"` blocks.
    pub outputs: IndexMap<String, BlockHandle>,
    /// `locals` blocks, stored under [`LOCALS_KEY`]. Only the last one survives.
    pub locals: IndexMap<String, BlockHandle>,
}

/// Returns the text of a block label regardless of quoting.
pub(crate) fn label_text(label: &BlockLabel) -> &str {
    match label {
        BlockLabel::Ident(ident) => ident.as_str(),
        BlockLabel::String(s) => s.as_str(),
    }
}

/// Builds the index for a parsed file body.
///
/// Blocks with the wrong number of labels are skipped, so partially
/// malformed files still index whatever is addressable.
pub fn index(body: &Body) -> FileIndex {
    let mut idx = FileIndex::default();

    for (ordinal, block) in body.blocks().enumerate() {
        let handle = BlockHandle {
            ordinal,
            span: block.span(),
        };
        let labels: Vec<&str> = block.labels.iter().map(label_text).collect();

        match block.ident.as_str() {
            "resource" => insert_resource(&mut idx.resources, "resource", block, &labels, handle),
            "data" => insert_resource(&mut idx.data, "data", block, &labels, handle),
            "variable" => {
                if let [name] = labels.as_slice() {
                    idx.variables.entry(name.to_string()).or_insert(handle);
                }
            }
            "output" => {
                if let [name] = labels.as_slice() {
                    idx.outputs.entry(name.to_string()).or_insert(handle);
                }
            }
            "locals" => {
                if idx.locals.insert(LOCALS_KEY.to_string(), handle).is_some() {
                    tracing::warn!(
                        "multiple locals blocks in one file; only the last one is indexed"
                    );
                }
            }
            _ => {}
        }
    }

    idx
}

fn insert_resource(
    table: &mut IndexMap<ResourceKey, ResourceHandle>,
    kind: &str,
    block: &Block,
    labels: &[&str],
    handle: BlockHandle,
) {
    let [resource_type, name] = labels else {
        tracing::debug!(
            kind,
            labels = labels.len(),
            span = ?block.span(),
            "skipping block with unexpected label count"
        );
        return;
    };

    let resource = ResourceHandle {
        resource_type: resource_type.to_string(),
        name: name.to_string(),
        block: handle,
    };

    match table.entry(resource.key()) {
        Entry::Vacant(slot) => {
            slot.insert(resource);
        }
        Entry::Occupied(existing) => {
            tracing::warn!(
                kind,
                key = %existing.key(),
                "duplicate block in one file; keeping the first declaration"
            );
        }
    }
}
