//! # Overlay Model
//!
//! Parses overlay files (`*.kf.hcl`) into patch specifications.
//!
//! ```hcl
//! patch "aws_instance" "web" {
//!   source        = "terraform-aws-modules/ec2-instance/aws"
//!   instance_type = "t3.large"
//!   tags          = merge({ Owner = "team" })
//!   vpc_security_group_ids = append(["sg-123"])
//! }
//! ```

use crate::error::{AppResult, ParseError, ParseErrorKind};
use crate::index::{label_text, ResourceKey};
use crate::module_file::{evaluate, parse_body, position_of};
use crate::value::Value;
use hcl_edit::expr::Expression;
use hcl_edit::structure::{Block, Structure};
use indexmap::IndexMap;
use std::fmt;
use std::path::Path;

/// Block identifier of a patch.
pub const PATCH_BLOCK: &str = "patch";

/// Attribute of a patch block holding the module source filter.
pub const SOURCE_ATTRIBUTE: &str = "source";

/// How a patch value combines with the attribute's existing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// Overwrite the attribute.
    #[default]
    Replace,
    /// Deep-merge objects.
    Merge,
    /// Concatenate lists.
    Append,
}

impl MergeStrategy {
    /// Maps a wrapper function name (`merge`, `append`, `replace`) to its strategy.
    pub fn from_function(name: &str) -> Option<Self> {
        match name {
            "replace" => Some(MergeStrategy::Replace),
            "merge" => Some(MergeStrategy::Merge),
            "append" => Some(MergeStrategy::Append),
            _ => None,
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MergeStrategy::Replace => "replace",
            MergeStrategy::Merge => "merge",
            MergeStrategy::Append => "append",
        };
        f.write_str(name)
    }
}

/// One attribute edit of a patch.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchAttribute {
    /// The patch value, or the raw expression when it could not be evaluated.
    pub value: Value,
    /// How to combine it with the existing value.
    pub strategy: MergeStrategy,
}

/// One `patch "type" "name" { ... }` block.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchSpec {
    /// Resource type label.
    pub target_type: String,
    /// Resource name label.
    pub target_name: String,
    /// Module source this patch is scoped to.
    pub source_filter: Option<String>,
    /// Attribute edits in declaration order.
    pub attributes: IndexMap<String, PatchAttribute>,
}

impl PatchSpec {
    /// Key of the resource this patch targets.
    pub fn resource_key(&self) -> ResourceKey {
        ResourceKey::new(&self.target_type, &self.target_name)
    }
}

/// Parses the patch blocks of an overlay file.
///
/// `path` only labels diagnostics. Structures other than `patch` blocks are ignored.
///
/// # Examples
/// ```
/// use kungfu_core::overlay::{parse_overlay, MergeStrategy};
///
/// let src = r#"
/// patch "aws_instance" "web" {
///   tags = merge({ Owner = "team" })
/// }
/// "#;
/// let patches = parse_overlay(src, "prod.kf.hcl").unwrap();
/// assert_eq!(patches[0].attributes["tags"].strategy, MergeStrategy::Merge);
/// ```
pub fn parse_overlay(source: &str, path: impl AsRef<Path>) -> AppResult<Vec<PatchSpec>> {
    let path = path.as_ref();
    let body = parse_body(source, path)?;

    let mut patches = Vec::new();
    for structure in body.iter() {
        match structure {
            Structure::Block(block) if block.ident.as_str() == PATCH_BLOCK => {
                patches.push(parse_patch_block(block, source, path)?);
            }
            Structure::Block(block) => {
                tracing::debug!(path = %path.display(), ident = %block.ident.as_str(), "ignoring non-patch block");
            }
            Structure::Attribute(attr) => {
                tracing::debug!(path = %path.display(), key = %attr.key.as_str(), "ignoring top-level attribute");
            }
        }
    }

    Ok(patches)
}

fn parse_patch_block(block: &Block, source: &str, path: &Path) -> AppResult<PatchSpec> {
    let error = |kind: ParseErrorKind| ParseError::new(path, kind).at(position_of(source, block));

    let labels: Vec<&str> = block.labels.iter().map(label_text).collect();
    let (target_type, target_name) = match labels.as_slice() {
        [ty, name] if !ty.is_empty() && !name.is_empty() => (ty.to_string(), name.to_string()),
        _ => {
            return Err(error(ParseErrorKind::MalformedPatchBlock {
                labels: labels.len(),
            })
            .into())
        }
    };

    let mut spec = PatchSpec {
        target_type,
        target_name,
        source_filter: None,
        attributes: IndexMap::new(),
    };

    for structure in block.body.iter() {
        let attr = match structure {
            Structure::Attribute(attr) => attr,
            Structure::Block(nested) => {
                tracing::warn!(
                    path = %path.display(),
                    resource = %spec.resource_key(),
                    block = %nested.ident.as_str(),
                    "nested blocks are not supported in patches; ignoring"
                );
                continue;
            }
        };
        let name = attr.key.as_str();

        if name == SOURCE_ATTRIBUTE {
            let filter = match evaluate(&attr.value) {
                Value::String(s) => s,
                other => {
                    return Err(error(ParseErrorKind::InvalidSourceFilter(format!(
                        "expected a string, found {}",
                        other.type_name()
                    )))
                    .at(position_of(source, attr))
                    .into())
                }
            };
            spec.source_filter = Some(filter);
            continue;
        }

        let (strategy, inner) = detect_strategy(&attr.value);
        let patch_attr = PatchAttribute {
            value: evaluate(inner),
            strategy,
        };
        if spec.attributes.insert(name.to_string(), patch_attr).is_some() {
            tracing::warn!(
                path = %path.display(),
                resource = %spec.resource_key(),
                attribute = name,
                "attribute patched twice in one block; the later value wins"
            );
        }
    }

    Ok(spec)
}

/// Unwraps `merge(x)`, `append(x)` and `replace(x)`; anything else is a plain replace.
fn detect_strategy(expr: &Expression) -> (MergeStrategy, &Expression) {
    if let Expression::FuncCall(call) = expr {
        if call.name.namespace.is_empty() && call.args.len() == 1 {
            if let (Some(strategy), Some(arg)) = (
                MergeStrategy::from_function(call.name.name.as_str()),
                call.args.iter().next(),
            ) {
                return (strategy, arg);
            }
        }
    }
    (MergeStrategy::Replace, expr)
}
