//! # Error Handling
//!
//! Provides the unified `AppError` enum used across the workspace.

use crate::index::ResourceKey;
use derive_more::{Display, From};
use std::fmt;
use std::path::PathBuf;

/// The Global Error Enum.
///
/// We use `derive_more` for boilerplate.
/// Note: String errors default to `General`.
#[derive(Debug, Display, From)]
pub enum AppError {
    /// Wrapper for standard IO errors.
    #[display("IO Error: {_0}")]
    Io(std::io::Error),

    /// IO error tied to a specific file.
    #[from(ignore)]
    #[display("IO Error on {}: {source}", path.display())]
    File {
        /// The file being read or written.
        path: PathBuf,
        /// The underlying cause.
        source: std::io::Error,
    },

    /// Malformed overlay or module syntax.
    #[display("Parse Error: {_0}")]
    Parse(ParseError),

    /// A patch targets a resource that no file of the module declares.
    #[from(ignore)]
    #[display("Resource Not Found: '{_0}' is not declared in any file of the module")]
    ResourceNotFound(ResourceKey),

    /// A patch source filter matches no module instance of the root configuration.
    #[from(ignore)]
    #[display("Unresolved Module: no module call uses source '{_0}'")]
    UnresolvedModule(String),

    /// Generic errors.
    #[display("General Error: {_0}")]
    General(String),
}

/// Manual implementation of the standard Error trait.
impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Io(err) | AppError::File { source: err, .. } => Some(err),
            AppError::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl AppError {
    /// Wraps an IO error with the path it happened on.
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::File {
            path: path.into(),
            source,
        }
    }
}

/// Helper type alias for Result using AppError.
pub type AppResult<T> = Result<T, AppError>;

/// A 1-based line/column location in a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Line number, starting at 1.
    pub line: usize,
    /// Column number (in characters), starting at 1.
    pub column: usize,
}

impl Position {
    /// Computes the position of a byte offset within `source`.
    ///
    /// Offsets past the end of the input clamp to the last position.
    pub fn from_offset(source: &str, offset: usize) -> Self {
        let mut end = offset.min(source.len());
        while !source.is_char_boundary(end) {
            end -= 1;
        }
        let before = &source[..end];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map_or(0, |pos| pos + 1);
        let column = before[line_start..].chars().count() + 1;
        Position { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// What went wrong while parsing an overlay or module file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The file is not valid HCL.
    Syntax(String),
    /// A `patch` block does not carry exactly two non-empty labels.
    MalformedPatchBlock {
        /// Number of labels found on the block.
        labels: usize,
    },
    /// The `source` attribute of a patch block is not a plain string.
    InvalidSourceFilter(String),
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseErrorKind::Syntax(message) => write!(f, "invalid HCL: {}", message),
            ParseErrorKind::MalformedPatchBlock { labels } => write!(
                f,
                "patch block requires exactly 2 non-empty labels (type and name), got {}",
                labels
            ),
            ParseErrorKind::InvalidSourceFilter(reason) => {
                write!(f, "invalid source filter: {}", reason)
            }
        }
    }
}

/// A parse failure, located by file and (when known) position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// The file being parsed.
    pub path: PathBuf,
    /// Where in the file the problem starts.
    pub position: Option<Position>,
    /// The failure itself.
    pub kind: ParseErrorKind,
}

impl ParseError {
    /// Creates a parse error without position information.
    pub fn new(path: impl Into<PathBuf>, kind: ParseErrorKind) -> Self {
        ParseError {
            path: path.into(),
            position: None,
            kind,
        }
    }

    /// Attaches a position to the error.
    pub fn at(mut self, position: Option<Position>) -> Self {
        self.position = position;
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(pos) => write!(f, "{}:{}: {}", self.path.display(), pos, self.kind),
            None => write!(f, "{}: {}", self.path.display(), self.kind),
        }
    }
}

impl std::error::Error for ParseError {}
