use std::{
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
    time::Duration,
};

use common::{
    knobs::{
        INVOCATION_DEFAULT_TRY_COUNT,
        INVOCATION_DEFAULT_TRY_PAUSE,
        WAIT_TIMEOUT_MARGIN,
    },
    runtime::Runtime,
};
use errors::ErrorMetadata;

use crate::{
    inbox::InvocationOutcome,
    invocation::{
        Invocation,
        Target,
    },
    operation::{
        Operation,
        OperationBody,
    },
    registry::CallRegistry,
    service::{
        ClusterService,
        OperationService,
        PartitionService,
    },
    types::{
        Address,
        CallId,
        PartitionId,
        ReplicaIndex,
    },
};

/// Pluggable restriction on which operations may be invoked from within the
/// execution of another. The default permits everything.
pub type NestedInvocationPolicy = Box<dyn Fn(&Operation, &Operation) -> bool + Send + Sync>;

/// Shared state behind every invocation on a node: local identity and
/// liveness, the collaborator services, and the pending-call registry that
/// correlates responses arriving off the wire with their waiting futures.
pub struct InvocationEngine<RT: Runtime> {
    pub(crate) rt: RT,
    this_address: Address,
    active: AtomicBool,
    pub(crate) calls: CallRegistry,
    pub(crate) operations: Arc<dyn OperationService>,
    pub(crate) cluster: Arc<dyn ClusterService>,
    pub(crate) partitions: Arc<dyn PartitionService>,
    pub(crate) allow_nested: NestedInvocationPolicy,
}

impl<RT: Runtime> InvocationEngine<RT> {
    pub fn new(
        rt: RT,
        this_address: Address,
        operations: Arc<dyn OperationService>,
        cluster: Arc<dyn ClusterService>,
        partitions: Arc<dyn PartitionService>,
    ) -> Self {
        Self {
            rt,
            this_address,
            active: AtomicBool::new(true),
            calls: CallRegistry::new(),
            operations,
            cluster,
            partitions,
            allow_nested: Box::new(|_parent, _child| true),
        }
    }

    pub fn with_nested_policy(
        mut self,
        policy: impl Fn(&Operation, &Operation) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.allow_nested = Box::new(policy);
        self
    }

    pub fn this_address(&self) -> Address {
        self.this_address
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Number of remote calls currently awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.calls.pending()
    }

    /// Entry point for the network layer: correlate a received response with
    /// its waiting invocation. False for late responses to abandoned calls.
    pub fn notify(&self, call_id: CallId, outcome: InvocationOutcome) -> bool {
        let routed = self.calls.route(call_id, outcome);
        if !routed {
            tracing::debug!("Dropping response for unknown call {call_id}");
        }
        routed
    }

    /// Flip the node inactive and fail out every pending call. Idempotent.
    pub fn shutdown(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            for (call_id, sink) in self.calls.drain() {
                tracing::debug!("Failing pending call {call_id} on shutdown");
                sink.deliver(Err(ErrorMetadata::node_inactive(format!(
                    "Node {} is shutting down",
                    self.this_address
                ))
                .into()));
            }
        }
    }

    /// Invocation aimed at the current owner of a partition replica.
    pub fn partition_invocation(
        self: &Arc<Self>,
        service_name: impl Into<String>,
        body: Arc<dyn OperationBody>,
        partition_id: PartitionId,
        replica_index: ReplicaIndex,
    ) -> InvocationBuilder<RT> {
        InvocationBuilder::new(
            self.clone(),
            service_name.into(),
            body,
            Target::Partition {
                partition_id,
                replica_index,
            },
        )
    }

    /// Invocation aimed at a fixed member address.
    pub fn target_invocation(
        self: &Arc<Self>,
        service_name: impl Into<String>,
        body: Arc<dyn OperationBody>,
        target: Address,
    ) -> InvocationBuilder<RT> {
        InvocationBuilder::new(self.clone(), service_name.into(), body, Target::Address(target))
    }
}

pub struct InvocationBuilder<RT: Runtime> {
    engine: Arc<InvocationEngine<RT>>,
    service_name: String,
    body: Arc<dyn OperationBody>,
    target: Target,
    try_count: u32,
    try_pause: Duration,
    call_timeout: Option<Duration>,
}

impl<RT: Runtime> InvocationBuilder<RT> {
    fn new(
        engine: Arc<InvocationEngine<RT>>,
        service_name: String,
        body: Arc<dyn OperationBody>,
        target: Target,
    ) -> Self {
        Self {
            engine,
            service_name,
            body,
            target,
            try_count: *INVOCATION_DEFAULT_TRY_COUNT,
            try_pause: *INVOCATION_DEFAULT_TRY_PAUSE,
            call_timeout: None,
        }
    }

    /// Max number of dispatch attempts.
    pub fn try_count(mut self, try_count: u32) -> Self {
        self.try_count = try_count;
        self
    }

    /// Pause between dispatch attempts.
    pub fn try_pause(mut self, try_pause: Duration) -> Self {
        self.try_pause = try_pause;
        self
    }

    /// Per-attempt budget. Zero means "derive from the operation service".
    pub fn call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = Some(call_timeout);
        self
    }

    pub fn build(self) -> Invocation<RT> {
        let call_timeout = self.effective_call_timeout();
        Invocation::new(
            self.engine,
            self.service_name,
            self.body,
            self.target,
            self.try_count,
            self.try_pause,
            call_timeout,
        )
    }

    /// The caller's value wins when it supplied one. Otherwise use the
    /// service default, except that a wait-supporting operation with a
    /// bounded wait gets its own wait timeout plus a delivery margin.
    fn effective_call_timeout(&self) -> Duration {
        if let Some(call_timeout) = self.call_timeout
            && !call_timeout.is_zero()
        {
            return call_timeout;
        }
        let default = self.engine.operations.default_call_timeout();
        match self.body.wait_timeout() {
            Some(wait_timeout) if default > *WAIT_TIMEOUT_MARGIN => {
                wait_timeout + *WAIT_TIMEOUT_MARGIN
            },
            _ => default,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::Duration,
    };

    use crate::{
        testing::{
            TestNode,
            TestOperation,
        },
        types::{
            CallId,
            PartitionId,
            ReplicaIndex,
        },
    };

    #[tokio::test(start_paused = true)]
    async fn test_notify_unknown_call_is_dropped() {
        let node = TestNode::new();
        assert!(!node.engine.notify(CallId(404), Ok(None)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_idempotent() {
        let node = TestNode::new();
        assert!(node.engine.is_active());
        node.engine.shutdown();
        node.engine.shutdown();
        assert!(!node.engine.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_call_timeout_wins() {
        let node = TestNode::new();
        let invocation = node
            .engine
            .partition_invocation(
                "map-service",
                Arc::new(TestOperation::new("map.get")),
                PartitionId(1),
                ReplicaIndex(0),
            )
            .call_timeout(Duration::from_secs(3))
            .build();
        assert_eq!(invocation.call_timeout(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_call_timeout_uses_service_default() {
        let node = TestNode::new();
        node.operations
            .set_default_call_timeout(Duration::from_secs(7));
        let invocation = node
            .engine
            .partition_invocation(
                "map-service",
                Arc::new(TestOperation::new("map.get")),
                PartitionId(1),
                ReplicaIndex(0),
            )
            .call_timeout(Duration::ZERO)
            .build();
        assert_eq!(invocation.call_timeout(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_supporting_operation_derives_from_wait_timeout() {
        let node = TestNode::new();
        // Default is 60s, above the margin, so the wait timeout plus the
        // margin wins.
        let invocation = node
            .engine
            .partition_invocation(
                "queue-service",
                Arc::new(TestOperation::new("queue.poll").with_wait_timeout(Duration::from_secs(2))),
                PartitionId(1),
                ReplicaIndex(0),
            )
            .build();
        assert_eq!(invocation.call_timeout(), Duration::from_secs(7));

        // With a default at or below the margin, the default wins.
        node.operations
            .set_default_call_timeout(Duration::from_secs(4));
        let invocation = node
            .engine
            .partition_invocation(
                "queue-service",
                Arc::new(TestOperation::new("queue.poll").with_wait_timeout(Duration::from_secs(2))),
                PartitionId(1),
                ReplicaIndex(0),
            )
            .build();
        assert_eq!(invocation.call_timeout(), Duration::from_secs(4));
    }
}
