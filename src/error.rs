use std::fmt;
use std::io;
use std::path::PathBuf;

/// A position within a makefile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path: String,
    pub line: usize,
}

impl Location {
    pub fn new(path: impl Into<String>, line: usize) -> Location {
        Self {
            path: path.into(),
            line,
        }
    }

    /// Location used for text that does not come from a file, like the
    /// command line or an internal expansion.
    pub fn internal(what: &str) -> Location {
        Self {
            path: format!("<{}>", what),
            line: 0,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}", self.path)
        } else {
            write!(f, "{}:{}", self.path, self.line)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MakeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("{loc}: {message}")]
    Syntax { loc: Location, message: String },
    #[error("{loc}: {message}")]
    Eval { loc: Location, message: String },
    #[error("{loc}: call to undefined function '{name}'")]
    UndefinedFunction { loc: Location, name: String },
    #[error("{loc}: expansion of '{name}' recurses too deeply")]
    Recursion { loc: Location, name: String },
    #[error("Circular dependency detected: {}", cycle.join(" <- "))]
    CircularDependency { cycle: Vec<String> },
    #[error("[{target}] Error {code}")]
    RecipeFailed { target: String, code: i32 },
    #[error("No rule to make target '{target}'{}", needed_by.as_ref().map(|n| format!(", needed by '{}'", n)).unwrap_or_default())]
    NoRule {
        target: String,
        needed_by: Option<String>,
    },
    #[error("{}{}: No such file or directory", loc.as_ref().map(|l| format!("{}: ", l)).unwrap_or_default(), path.display())]
    MissingInclude {
        /// Where the `include` was written; `None` for a makefile named on
        /// the command line.
        loc: Option<Location>,
        path: PathBuf,
    },
    #[error("{0}")]
    Usage(String),
}

impl MakeError {
    pub fn syntax(loc: &Location, message: impl Into<String>) -> MakeError {
        MakeError::Syntax {
            loc: loc.clone(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MakeError>;
