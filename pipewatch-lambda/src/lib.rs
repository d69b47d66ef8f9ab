//! Client of the function runtime API.
//!
//! When pipewatch runs as a function, the runtime hands out one trigger at a time. The binary
//! polls [`RuntimeApi::next_invocation`], runs the collectors, and reports the result with
//! [`RuntimeApi::respond`] before polling again. Failures during bootstrap are reported once with
//! [`RuntimeApi::report_init_error`].
//!
//! Each trigger carries a deadline after which the runtime freezes or kills the process. The
//! remaining time is available through [`LambdaInvocation::remaining`] and bounds the time budget
//! of an invocation.
//!
//! See the [runtime API documentation](https://docs.aws.amazon.com/lambda/latest/dg/runtimes-api.html)
//! for further details.
#![warn(missing_docs)]
#![allow(clippy::derive_partial_eq_without_eq)]

mod runtime_api;
pub use runtime_api::*;
