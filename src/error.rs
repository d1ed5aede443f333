use thiserror::Error;

/// Errors surfaced by the plan compiler.
///
/// Compiler errors are synchronous and unrecoverable for the offending
/// document; they never poison previously compiled plans.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("document contains no operation and no fragment")]
    NoOperation,
    #[error("document contains multiple fragments and no fragment was selected")]
    AmbiguousFragment,
    #[error("fragment \"{0}\" is not defined in the document")]
    FragmentNotFound(String),
    #[error("failed to parse document: {0}")]
    Parse(String),
}

/// A failure reported by the transport.
///
/// Transport errors are recoverable per-request and never poison the cache:
/// any data written by earlier requests stays visible.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("network error: {message}")]
pub struct NetworkError {
    pub message: String,
}

impl NetworkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Any error the cache can hand back through its public surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Network(#[from] NetworkError),
}
