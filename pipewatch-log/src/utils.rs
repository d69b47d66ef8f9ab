use std::error::Error;
use std::fmt;

/// Returns `true` if backtrace printing is enabled.
pub fn backtrace_enabled() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

/// Logs an error to the configured logger or `stderr` if not yet configured.
///
/// Prefer to use [`pipewatch_log::error`](crate::error) over this function whenever possible.
/// This function is intended to be used during startup, where initializing the logger may fail or
/// when errors need to be logged before the logger has been initialized.
///
/// # Example
///
/// ```
/// if let Err(error) = std::env::var("FOO") {
///     pipewatch_log::ensure_error(Box::<dyn std::error::Error>::from(error));
/// }
/// ```
#[allow(clippy::print_stderr)]
pub fn ensure_error<E: AsRef<dyn Error>>(error: E) {
    if tracing::event_enabled!(tracing::Level::ERROR) {
        crate::error!(error = error.as_ref(), "{}", LogError(error.as_ref()));
    } else {
        eprintln!("error: {}", LogError(error.as_ref()));
    }
}

/// A wrapper around an error that prints its causes.
///
/// # Example
///
/// ```
/// use pipewatch_log::LogError;
///
/// if let Err(error) = std::env::var("FOO") {
///     pipewatch_log::error!("env failed: {}", LogError(&error));
/// }
/// ```
pub struct LogError<'a, E: Error + ?Sized>(pub &'a E);

impl<E: Error + ?Sized> fmt::Display for LogError<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut source = self.0.source();
        while let Some(s) = source {
            write!(f, "\n  caused by: {s}")?;
            source = s.source();
        }

        Ok(())
    }
}

/// A wrapper around an error that prints its causes on a single line, separated by colons.
///
/// # Example
///
/// ```
/// use pipewatch_log::InlineError;
///
/// let error = std::io::Error::other("connection reset");
/// assert_eq!(InlineError(&error).to_string(), "connection reset");
/// ```
pub struct InlineError<'a, E: Error + ?Sized>(pub &'a E);

impl<E: Error + ?Sized> fmt::Display for InlineError<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut source = self.0.source();
        while let Some(s) = source {
            write!(f, ": {s}")?;
            source = s.source();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("could not load config")]
    struct Outer(#[source] io::Error);

    #[test]
    fn test_log_error_chain() {
        let error = Outer(io::Error::other("permission denied"));
        assert_eq!(
            LogError(&error).to_string(),
            "could not load config\n  caused by: permission denied"
        );
    }

    #[test]
    fn test_inline_error_chain() {
        let error = Outer(io::Error::other("permission denied"));
        assert_eq!(
            InlineError(&error).to_string(),
            "could not load config: permission denied"
        );
    }
}
