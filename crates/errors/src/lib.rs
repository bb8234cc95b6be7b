//! Error classification for the invocation layer.
//!
//! Failures travel as `anyhow::Error` chains tagged with an [`ErrorMetadata`]
//! context. The code on the metadata is what the retry loop and the callers
//! dispatch on; the messages are for developers reading logs.

use std::borrow::Cow;

mod metrics;

pub use crate::metrics::report_error;

/// ErrorMetadata can be attached to an anyhow error chain via
/// `.context(e /* ErrorMetadata */)`. It tags the chain with a failure
/// category plus a short, copy-resilient message usable in tests and metrics.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    pub code: ErrorCode,
    /// short ScreamingCamelCase tag, e.g. WrongTarget. Usable in tests for
    /// string matching.
    pub short_msg: Cow<'static, str>,
    /// human readable, developer facing. Longer and descriptive.
    pub msg: Cow<'static, str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The resolved member does not (or no longer) own the target partition,
    /// or no owner is currently assigned.
    WrongTarget,
    /// The resolved address is not a member of the cluster.
    TargetNotMember,
    /// A transient dispatch or transport failure; dispatching again may
    /// succeed.
    Retryable,
    /// The remote stopped executing the call and no response arrived.
    OperationTimeout,
    /// The caller-supplied deadline expired.
    Timeout,
    /// The local node has been shut down.
    NodeInactive,
    /// The operation itself failed on the executing member.
    ExecutionFailed,
    /// The requested capability is not implemented.
    Unsupported,
}

impl ErrorMetadata {
    pub fn wrong_target(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::WrongTarget,
            short_msg: WRONG_TARGET.into(),
            msg: msg.into(),
        }
    }

    pub fn target_not_member(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::TargetNotMember,
            short_msg: TARGET_NOT_MEMBER.into(),
            msg: msg.into(),
        }
    }

    /// A transient failure whose contract is "dispatch again; may succeed".
    ///
    /// The short_msg should be a ScreamingCamelCase tag describing the source
    /// (eg PacketNotSent).
    pub fn retryable(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Retryable,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn operation_timeout(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::OperationTimeout,
            short_msg: OPERATION_TIMEOUT.into(),
            msg: msg.into(),
        }
    }

    pub fn timeout(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::Timeout,
            short_msg: TIMEOUT.into(),
            msg: msg.into(),
        }
    }

    pub fn node_inactive(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::NodeInactive,
            short_msg: NODE_INACTIVE.into(),
            msg: msg.into(),
        }
    }

    pub fn execution_failed(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::ExecutionFailed,
            short_msg: EXECUTION_FAILED.into(),
            msg: msg.into(),
        }
    }

    pub fn unsupported(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Unsupported,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// True for the failure categories the invocation retry loop owns:
    /// dispatch again and the call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::WrongTarget | ErrorCode::TargetNotMember | ErrorCode::Retryable
        )
    }

    pub fn is_wrong_target(&self) -> bool {
        self.code == ErrorCode::WrongTarget
    }

    pub fn is_operation_timeout(&self) -> bool {
        self.code == ErrorCode::OperationTimeout
    }

    pub fn is_timeout(&self) -> bool {
        self.code == ErrorCode::Timeout
    }

    pub fn is_node_inactive(&self) -> bool {
        self.code == ErrorCode::NodeInactive
    }

    pub fn is_execution_failed(&self) -> bool {
        self.code == ErrorCode::ExecutionFailed
    }

    pub fn is_unsupported(&self) -> bool {
        self.code == ErrorCode::Unsupported
    }
}

impl ErrorCode {
    /// Stable tag for metrics reporting.
    pub fn metric_label_value(&self) -> &'static str {
        match self {
            ErrorCode::WrongTarget => "wrong_target",
            ErrorCode::TargetNotMember => "target_not_member",
            ErrorCode::Retryable => "retryable",
            ErrorCode::OperationTimeout => "operation_timeout",
            ErrorCode::Timeout => "timeout",
            ErrorCode::NodeInactive => "node_inactive",
            ErrorCode::ExecutionFailed => "execution_failed",
            ErrorCode::Unsupported => "unsupported",
        }
    }
}

pub trait ErrorMetadataAnyhowExt {
    fn is_retryable(&self) -> bool;
    fn is_wrong_target(&self) -> bool;
    fn is_operation_timeout(&self) -> bool;
    fn is_timeout(&self) -> bool;
    fn is_node_inactive(&self) -> bool;
    fn is_execution_failed(&self) -> bool;
    fn is_unsupported(&self) -> bool;
    fn error_code(&self) -> Option<ErrorCode>;
    fn short_msg(&self) -> &str;
    fn msg(&self) -> &str;
    /// Ensure the error is classified before it is surfaced to a caller: a
    /// chain that already carries metadata is returned unchanged, anything
    /// else is wrapped once as ExecutionFailed.
    fn wrap_execution_failed(self) -> Self;
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn is_retryable(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_retryable();
        }
        false
    }

    fn is_wrong_target(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_wrong_target();
        }
        false
    }

    fn is_operation_timeout(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_operation_timeout();
        }
        false
    }

    fn is_timeout(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_timeout();
        }
        false
    }

    fn is_node_inactive(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_node_inactive();
        }
        false
    }

    fn is_execution_failed(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_execution_failed();
        }
        false
    }

    fn is_unsupported(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_unsupported();
        }
        false
    }

    fn error_code(&self) -> Option<ErrorCode> {
        self.downcast_ref::<ErrorMetadata>().map(|e| e.code)
    }

    /// If there's no metadata on this error, returns "UnknownError".
    fn short_msg(&self) -> &str {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return &e.short_msg;
        }
        "UnknownError"
    }

    /// If there's no metadata on this error, returns a generic internal
    /// message.
    fn msg(&self) -> &str {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return &e.msg;
        }
        "InternalError"
    }

    fn wrap_execution_failed(self) -> Self {
        if self.downcast_ref::<ErrorMetadata>().is_some() {
            return self;
        }
        let msg = format!("Operation failed: {self:#}");
        self.context(ErrorMetadata::execution_failed(msg))
    }
}

const WRONG_TARGET: &str = "WrongTarget";
const TARGET_NOT_MEMBER: &str = "TargetNotMember";
const OPERATION_TIMEOUT: &str = "OperationTimeout";
const TIMEOUT: &str = "Timeout";
const NODE_INACTIVE: &str = "NodeInactive";
const EXECUTION_FAILED: &str = "ExecutionFailed";
