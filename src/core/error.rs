use std::fmt;

/// Status code attached to every fallible operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    ParseSql,
    ParseJson,
    Params,
    Logic,
    Conflict,
    NotFound,
    Timeout,
    Network,
    Forbidden,
    StateInvalidated,
}

impl ErrorKind {
    /// Numeric code reported at the library boundary.
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::Io => 1,
            ErrorKind::ParseSql => 2,
            ErrorKind::ParseJson => 3,
            ErrorKind::Params => 4,
            ErrorKind::Logic => 5,
            ErrorKind::Conflict => 6,
            ErrorKind::NotFound => 7,
            ErrorKind::Timeout => 8,
            ErrorKind::Network => 9,
            ErrorKind::Forbidden => 10,
            ErrorKind::StateInvalidated => 11,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Error {
            kind,
            context: context.into(),
        }
    }

    pub fn conflict(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Conflict, context)
    }

    pub fn not_found(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::NotFound, context)
    }

    pub fn params(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Params, context)
    }

    pub fn logic(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Logic, context)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            context: err.to_string(),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error {
            kind: ErrorKind::ParseJson,
            context: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            kind: ErrorKind::ParseJson,
            context: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
