//! # Module File
//!
//! Adapter over the `hcl-edit` syntax tree: parses one module file, indexes its
//! blocks and re-emits it. Unmodified files are emitted from their original text.

use crate::error::{AppResult, ParseError, ParseErrorKind, Position};
use crate::index::{self, BlockHandle, FileIndex};
use crate::value::Value;
use hcl::eval::{Context, Evaluate};
use hcl_edit::expr::Expression;
use hcl_edit::structure::{Attribute, Block, Body};
use hcl_edit::{Decor, Decorate, Span};
use std::path::{Path, PathBuf};

/// A parsed module file with its mutable syntax tree and block index.
#[derive(Debug, Clone)]
pub struct ModuleFile {
    path: PathBuf,
    original: String,
    body: Body,
    index: FileIndex,
    modified: bool,
}

impl ModuleFile {
    /// Parses `source`, using `path` as the label for diagnostics.
    pub fn parse(source: impl Into<String>, path: impl Into<PathBuf>) -> AppResult<Self> {
        let original = source.into();
        let path = path.into();
        let body = parse_body(&original, &path)?;
        let index = index::index(&body);

        Ok(ModuleFile {
            path,
            original,
            body,
            index,
            modified: false,
        })
    }

    /// Path label the file was parsed with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block index built at parse time.
    pub fn index(&self) -> &FileIndex {
        &self.index
    }

    /// True once any attribute of the file has been rewritten.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Source text exactly as it was read.
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Serializes the file.
    ///
    /// Returns the original text byte-for-byte when nothing was patched.
    /// Files whose line endings are all CRLF keep CRLF endings, since the
    /// printer emits LF between structures.
    pub fn to_source(&self) -> String {
        if !self.modified {
            return self.original.clone();
        }
        let printed = self.body.to_string();
        if uses_crlf(&self.original) {
            printed.replace("\r\n", "\n").replace('\n', "\r\n")
        } else {
            printed
        }
    }

    /// Looks up a top-level block by handle.
    pub fn block(&self, handle: &BlockHandle) -> Option<&Block> {
        self.body.blocks().nth(handle.ordinal)
    }

    pub(crate) fn block_mut(&mut self, handle: &BlockHandle) -> Option<&mut Block> {
        self.modified = true;
        self.body.blocks_mut().nth(handle.ordinal)
    }

    /// Indentation of the line a node starting at `offset` sits on, in the original text.
    pub(crate) fn indent_at(&self, offset: usize) -> Option<String> {
        let line_start = self.original.get(..offset)?.rfind('\n').map_or(0, |p| p + 1);
        let prefix = &self.original[line_start..offset];
        prefix
            .chars()
            .all(|c| c == ' ' || c == '\t')
            .then(|| prefix.to_string())
    }
}

/// True when `source` has line breaks and every one of them is `\r\n`.
fn uses_crlf(source: &str) -> bool {
    let lines = source.matches('\n').count();
    lines > 0 && source.matches("\r\n").count() == lines
}

/// Parses HCL source into a body, mapping syntax errors to [`ParseError`].
pub(crate) fn parse_body(source: &str, path: &Path) -> AppResult<Body> {
    hcl_edit::parser::parse_body(source)
        .map_err(|err| ParseError::new(path, ParseErrorKind::Syntax(err.to_string())).into())
}

/// Position of a spanned node within `source`.
pub(crate) fn position_of(source: &str, node: &impl Span) -> Option<Position> {
    node.span().map(|range| Position::from_offset(source, range.start))
}

/// Evaluates an expression with an empty context.
///
/// Anything that needs variables or functions comes back as
/// [`Value::Unevaluated`] holding the expression's source text.
pub fn evaluate(expr: &Expression) -> Value {
    let converted = hcl::Expression::from(expr.clone());
    match converted.evaluate(&Context::new()) {
        Ok(value) => Value::from(value),
        Err(err) => {
            tracing::trace!(error = %err, "expression kept unevaluated");
            Value::Unevaluated(raw_text(expr))
        }
    }
}

/// Source text of an expression without its surrounding whitespace.
pub(crate) fn raw_text(expr: &Expression) -> String {
    let mut bare = expr.clone();
    *bare.decor_mut() = Decor::default();
    bare.to_string().trim().to_string()
}

/// Current value of attribute `name`, if the body has one.
pub(crate) fn attribute_value(body: &Body, name: &str) -> Option<Value> {
    body.get_attribute(name).map(|attr: &Attribute| evaluate(&attr.value))
}
