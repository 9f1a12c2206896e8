//! `cloudapi-http` is the request-execution and waiting core shared by the
//! cloud API resource clients.
//!
//! Resource clients depend on two entry points:
//! - [`RequestExecutor::send`] / [`RequestExecutor::send_json`] for every
//!   API call, with retry for safe (idempotent) requests
//! - [`wait`] / [`wait_for_status`] to poll an asynchronous operation until
//!   the resource reaches a terminal state
//!
//! Every blocking call takes a [`CallContext`] carrying the caller's
//! deadline and cancellation signal.

mod backoff;
mod classify;
mod context;
mod error;
mod executor;
mod options;
mod request;
mod wait;

pub use backoff::Backoff;
pub use classify::{classify_response, classify_transport};
pub use context::{CallContext, CancelHandle};
pub use error::{ApiError, SdkError};
pub use executor::RequestExecutor;
pub use options::{ClientOptions, RetryPolicy};
pub use request::{RawResponse, Request};
pub use wait::{wait, wait_for_status, ObservedStatus, ProbeOutcome, TerminalStates, WaitSpec};

pub use reqwest::Method;

pub type Result<T> = std::result::Result<T, SdkError>;
