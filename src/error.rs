//! Crate error type.
//!
//! Most of the engine degrades instead of failing (broken references become
//! sentinels, failed expressions become undefined). Errors only surface at the
//! boundaries: loading configuration, talking to collaborators, I/O.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// JSON that could not be parsed at all
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON that parsed but did not fit the expected shape
    #[error("invalid configuration at {path}: {message}")]
    Config { path: String, message: String },

    /// Expression that could not be compiled or evaluated
    #[error("expression `{expr}` failed: {message}")]
    Expr { expr: String, message: String },

    /// HTTP collaborator failure (e.g. while fetching select items)
    #[error("HTTP request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn expr(expr: &str, message: impl ToString) -> Self {
        Self::Expr { expr: expr.to_string(), message: message.to_string() }
    }
}
