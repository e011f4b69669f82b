use thiserror::Error;

/// Coarse status class reported to the model loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    /// Missing or unresolvable op, malformed attribute or input.
    ParamInvalid,
    /// Broken internal invariant: buffer sizing, missing per-thread data, empty lists.
    InternalError,
    /// A hardware runtime call failed.
    Failed,
}

/// Error reported by a [`crate::backend::DeviceRuntime`] call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("runtime error {code}: {message}")]
pub struct RtError {
    pub code: i32,
    pub message: String,
}

impl RtError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

pub type RtResult<T> = std::result::Result<T, RtError>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("param invalid: {0}")]
    ParamInvalid(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{call} failed: {source}")]
    Runtime {
        call: &'static str,
        #[source]
        source: RtError,
    },

    #[error("failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn kind(&self) -> StatusKind {
        match self {
            Error::ParamInvalid(_) | Error::Io(_) | Error::Json(_) => StatusKind::ParamInvalid,
            Error::Internal(_) => StatusKind::InternalError,
            Error::Runtime { .. } | Error::Failed(_) => StatusKind::Failed,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Lifts a runtime result into the crate error, tagging the failing call.
pub trait RtResultExt<T> {
    fn or_failed(self, call: &'static str) -> Result<T>;
}

impl<T> RtResultExt<T> for RtResult<T> {
    fn or_failed(self, call: &'static str) -> Result<T> {
        self.map_err(|source| {
            tracing::error!(call, code = source.code, "runtime call failed: {}", source.message);
            Error::Runtime { call, source }
        })
    }
}
