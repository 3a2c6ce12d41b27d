use std::fmt;
use std::io;

/// Location of a diagnostic in the source
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourcePos {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{},{}", self.file, self.line, self.column)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("[{pos}] Error: {message}")]
    Compile { pos: SourcePos, message: String },

    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("Sample error: {0}")]
    Sample(String),

    #[error("Output format error: {0}")]
    Format(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Message of a compile error without its position
    pub fn message(&self) -> Option<&str> {
        match self {
            Error::Compile { message, .. } => Some(message),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
