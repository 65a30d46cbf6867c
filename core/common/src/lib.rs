//! Common utilities and types shared across Strongbox modules.
//!
//! This module provides the error taxonomy used by every crate, sensitive
//! byte wrappers, wire encoding helpers and the retry/timeout plumbing used
//! when talking to external collaborators.

pub mod error;
pub mod retry;
pub mod types;

pub use error::{Error, Result, UnmetCondition};
pub use retry::{with_timeout, RetryConfig, RetryExecutor};
pub use types::{base64_bytes, SensitiveBytes};
