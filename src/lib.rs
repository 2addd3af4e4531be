//! Transfer Core Library
//!
//! A client-side orchestration engine for HTTP data requests, uploads and
//! downloads. A [`Session`] turns request descriptions into transport tasks,
//! runs them through an adapter/retrier pipeline, drives each request through
//! its lifecycle state machine and delivers exactly one outcome per request.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`session`] - Session builder and the root queue that serializes all lifecycle work
//! - [`request`] - Request handles, request kinds and the lifecycle state machine
//! - [`task`] - Transport task handles, the `Transport` trait and the request-task map
//! - [`interceptor`] - Adapter/retrier pipeline plus backoff, rate limiting and default headers
//! - [`monitor`] - Lifecycle event observers
//! - [`transport`] - `reqwest`-backed reference transport
//! - [`config`] - Session and transport configuration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod interceptor;
pub mod monitor;
pub mod request;
pub mod session;
pub mod task;
pub mod transport;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use config::{CancellationPolicy, ConfigError, HttpTransportConfig, SessionConfig};
pub use error::{BoxError, SessionError, SharedError};
pub use interceptor::{
    AdaptState, Adapter, BackoffRetrier, DEFAULT_MAX_RETRIES, DefaultHeaders, FailureType,
    Interceptor, RateLimiter, Retrier, RetryResult, adapter_fn, classify_error, extract_domain,
    parse_retry_after, retrier_fn,
};
pub use monitor::{CompositeMonitor, EventMonitor, TracingMonitor};
pub use request::{
    CompletionHandler, DownloadSource, Outcome, ProgressHandler, Request, RequestDescriptor,
    RequestId, RequestKind, RequestState, Response, ResumeData, SubmitOptions, TransportBody,
    TransportRequest, UploadSource,
};
pub use session::{Session, SessionBuilder};
pub use task::{
    Credential, Eviction, MapError, Progress, ProtectionSpace, RequestTaskMap, ResponseBody,
    TaskEvents, TaskHandle, TaskId, TaskMetrics, TaskOutput, TaskStatus, Transport,
    TransportError, TransportTask,
};
pub use transport::{HttpTask, HttpTransport};
