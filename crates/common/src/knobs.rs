//! Tunable limits and parameters for grid nodes.
//!
//! Every knob here can be overridden with an environment variable when
//! running locally. Each should have a comment explaining what it's for so an
//! oncall engineer can adjust it safely.
#![deny(missing_docs)]

use std::{
    sync::LazyLock,
    time::Duration,
};

use cmd_util::env::env_config;

/// Set a consistent thread stack size regardless of environment. This is
/// 2x Rust's default: https://doc.rust-lang.org/nightly/std/thread/index.html#stack-size
pub static RUNTIME_STACK_SIZE: LazyLock<usize> =
    LazyLock::new(|| env_config("RUNTIME_STACK_SIZE", 4 * 1024 * 1024));

/// 0 -> default (number of cores)
pub static RUNTIME_WORKER_THREADS: LazyLock<usize> =
    LazyLock::new(|| env_config("RUNTIME_WORKER_THREADS", 0));

/// Per-attempt network budget for an operation whose caller did not supply
/// one. Bounds how long a single dispatch may stay unanswered before the
/// long-poll liveness machinery kicks in.
pub static OPERATION_CALL_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_millis(env_config("OPERATION_CALL_TIMEOUT_MS", 60_000)));

/// Slack added on top of a wait-supporting operation's own wait timeout when
/// deriving its call timeout. Covers network delivery of the eventual
/// response.
pub static WAIT_TIMEOUT_MARGIN: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_millis(env_config("WAIT_TIMEOUT_MARGIN_MS", 5_000)));

/// Max number of dispatch attempts for an invocation before its retryable
/// failure is surfaced to the caller.
pub static INVOCATION_DEFAULT_TRY_COUNT: LazyLock<u32> =
    LazyLock::new(|| env_config("INVOCATION_DEFAULT_TRY_COUNT", 250));

/// Pause between dispatch attempts.
pub static INVOCATION_DEFAULT_TRY_PAUSE: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_millis(env_config("INVOCATION_DEFAULT_TRY_PAUSE_MS", 500)));

/// Attempt count past which retry churn is logged at warn level.
pub static INVOCATION_RETRY_WARN_THRESHOLD: LazyLock<u32> =
    LazyLock::new(|| env_config("INVOCATION_RETRY_WARN_THRESHOLD", 5));

/// Of the attempts past the warn threshold, log every Nth.
pub static INVOCATION_RETRY_WARN_PERIOD: LazyLock<u32> =
    LazyLock::new(|| env_config("INVOCATION_RETRY_WARN_PERIOD", 10));

/// Deadline for the nested is-still-executing probe asking a remote whether
/// a stuck call is still being processed.
pub static IS_STILL_EXECUTING_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_millis(env_config("IS_STILL_EXECUTING_TIMEOUT_MS", 5_000)));
