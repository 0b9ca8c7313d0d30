use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failure taxonomy for the whole engine. Each variant maps to a stable
/// process exit code at the CLI boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("bad input: {0}")]
    BadInput(String),
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("operation not permitted: {0}")]
    Policy(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl EngineError {
    pub fn bad_input(detail: impl Into<String>) -> Self {
        EngineError::BadInput(detail.into())
    }

    pub fn invariant(detail: impl Into<String>) -> Self {
        EngineError::Invariant(detail.into())
    }

    pub fn policy(detail: impl Into<String>) -> Self {
        EngineError::Policy(detail.into())
    }

    /// Stable kind tag used in the stderr error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::BadInput(_) => "BadInput",
            EngineError::Invariant(_) => "Invariant",
            EngineError::Policy(_) => "Policy",
            EngineError::Io(_) => "IO",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::BadInput(_) => 2,
            EngineError::Invariant(_) => 3,
            EngineError::Policy(_) => 4,
            EngineError::Io(_) => 5,
        }
    }

    /// Optional remediation hint surfaced in the error envelope.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            EngineError::BadInput(_) => Some("run with --help for accepted inputs"),
            EngineError::Invariant(_) => {
                Some("the snapshot may be repairable with verify-snapshot --repair")
            }
            EngineError::Policy(_) => None,
            EngineError::Io(_) => None,
        }
    }
}

impl From<csv::Error> for EngineError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            match err.into_kind() {
                csv::ErrorKind::Io(io_err) => EngineError::Io(io_err),
                other => EngineError::BadInput(format!("{other:?}")),
            }
        } else {
            EngineError::BadInput(err.to_string())
        }
    }
}

impl From<std::collections::TryReserveError> for EngineError {
    fn from(err: std::collections::TryReserveError) -> Self {
        EngineError::Policy(format!("allocation failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(EngineError::bad_input("x").exit_code(), 2);
        assert_eq!(EngineError::invariant("x").exit_code(), 3);
        assert_eq!(EngineError::policy("x").exit_code(), 4);
        let io = EngineError::from(io::Error::new(io::ErrorKind::Other, "x"));
        assert_eq!(io.exit_code(), 5);
    }

    #[test]
    fn kind_tags_match_taxonomy() {
        assert_eq!(EngineError::bad_input("x").kind(), "BadInput");
        assert_eq!(EngineError::invariant("x").kind(), "Invariant");
        assert_eq!(EngineError::policy("x").kind(), "Policy");
    }
}
