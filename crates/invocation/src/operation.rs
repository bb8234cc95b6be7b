use std::{
    fmt,
    sync::Arc,
    time::Duration,
};

use crate::types::{
    Address,
    CallId,
    PartitionId,
    ReplicaIndex,
};

/// Capability surface the invocation core needs from an opaque operation
/// payload. What the operation actually does on the executing member is the
/// operation runner's business.
pub trait OperationBody: fmt::Debug + Send + Sync + 'static {
    /// Stable name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Join operations may target addresses that are not (yet) cluster
    /// members.
    fn is_join(&self) -> bool {
        false
    }

    /// For wait-supporting operations, the bounded time the operation may
    /// park on the executing member before answering. Feeds the derived call
    /// timeout.
    fn wait_timeout(&self) -> Option<Duration> {
        None
    }

    /// False for operations that answer through their responder handle
    /// instead of a return value.
    fn returns_response(&self) -> bool {
        true
    }
}

/// Routing metadata the invocation core stamps onto an operation before
/// handing it to the local runner or the transport.
#[derive(Clone, Debug, Default)]
pub struct OperationHeader {
    pub service_name: String,
    pub partition_id: Option<PartitionId>,
    pub replica_index: ReplicaIndex,
    pub caller: Option<Address>,
    pub call_id: Option<CallId>,
    /// Cluster clock millis at dispatch.
    pub invocation_time: Option<u64>,
    pub call_timeout: Option<Duration>,
}

/// An operation en route: the core-owned header plus the opaque payload.
///
/// Cloning shares the payload, so an invocation retains its original for
/// logging and retry re-dispatch while a copy goes to the runner or the
/// transport.
#[derive(Clone, Debug)]
pub struct Operation {
    header: OperationHeader,
    body: Arc<dyn OperationBody>,
}

impl Operation {
    pub fn new(body: Arc<dyn OperationBody>) -> Self {
        Self {
            header: OperationHeader::default(),
            body,
        }
    }

    pub fn header(&self) -> &OperationHeader {
        &self.header
    }

    pub(crate) fn header_mut(&mut self) -> &mut OperationHeader {
        &mut self.header
    }

    pub fn body(&self) -> &Arc<dyn OperationBody> {
        &self.body
    }

    pub fn name(&self) -> &'static str {
        self.body.name()
    }

    pub fn is_join(&self) -> bool {
        self.body.is_join()
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.body.wait_timeout()
    }

    pub fn returns_response(&self) -> bool {
        self.body.returns_response()
    }

    pub fn call_id(&self) -> Option<CallId> {
        self.header.call_id
    }
}
