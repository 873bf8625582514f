//! Common result and error types for Trellis.

/// The standard result type for fallible internal operations.
///
/// `Err` indicates an unrecoverable internal error (a bug in Trellis), not a
/// user-facing problem. User problems such as compile diagnostics are reported
/// through the build report and the operation still returns `Ok`.
pub type TrellisResult<T> = Result<T, InternalError>;

/// An internal error indicating a bug in Trellis, not a user input problem.
///
/// The compiler server does not try to recover from these: the process exits
/// and connected clients observe the connection loss.
#[derive(Debug, thiserror::Error)]
#[error("internal error: {message}")]
pub struct InternalError {
    /// Description of the internal error.
    pub message: String,
}

impl InternalError {
    /// Creates a new internal error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for InternalError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_format() {
        let err = InternalError::new("event log poisoned");
        assert_eq!(format!("{err}"), "internal error: event log poisoned");
    }

    #[test]
    fn err_path() {
        let r: TrellisResult<i32> = Err(InternalError::new("test error"));
        let err = r.err().unwrap();
        assert_eq!(err.message, "test error");
    }

    #[test]
    fn from_string() {
        let err: InternalError = "from string".to_string().into();
        assert_eq!(err.message, "from string");
    }
}
