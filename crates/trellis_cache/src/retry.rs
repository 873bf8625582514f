//! Single retry for transient filesystem errors.

use std::io;

/// Returns `true` for I/O errors that may succeed if repeated immediately.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Runs `op`, repeating it once if the first attempt fails transiently.
pub fn retry_once<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    match op() {
        Err(e) if is_transient(&e) => {
            tracing::debug!("retrying after transient I/O error: {e}");
            op()
        }
        other => other,
    }
}
