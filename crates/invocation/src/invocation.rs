use std::{
    sync::Arc,
    time::Duration,
};

use async_recursion::async_recursion;
use bytes::Bytes;
use common::{
    knobs::{
        INVOCATION_RETRY_WARN_PERIOD,
        INVOCATION_RETRY_WARN_THRESHOLD,
        IS_STILL_EXECUTING_TIMEOUT,
    },
    runtime::Runtime,
};
use errors::{
    ErrorMetadata,
    ErrorMetadataAnyhowExt,
};
use metrics::StatusTimer;

use crate::{
    deadline::TimeBudget,
    engine::InvocationEngine,
    inbox::{
        response_channel,
        InvocationOutcome,
        ResponseInbox,
        ResponseSink,
    },
    metrics as invocation_metrics,
    operation::{
        Operation,
        OperationBody,
    },
    probe::IsStillExecuting,
    types::{
        Address,
        PartitionId,
        ReplicaIndex,
    },
};

/// Where an invocation is aimed.
#[derive(Clone, Copy, Debug)]
pub enum Target {
    /// The current owner of the partition at the given replica rank,
    /// re-resolved on every dispatch so migrations are observed.
    Partition {
        partition_id: PartitionId,
        replica_index: ReplicaIndex,
    },
    /// A fixed member address.
    Address(Address),
}

/// One logical call through the invocation engine: initial dispatch, the
/// retry loop, long-poll liveness checks while waiting, and terminal
/// classification of the outcome.
///
/// Constructed through [`InvocationEngine::partition_invocation`] or
/// [`InvocationEngine::target_invocation`]. `invoke` dispatches exactly once;
/// all re-dispatching happens inside `get` under the retry policy.
pub struct Invocation<RT: Runtime> {
    engine: Arc<InvocationEngine<RT>>,
    service_name: String,
    op: Operation,
    target: Target,
    try_count: u32,
    try_pause: Duration,
    call_timeout: Duration,
    invoke_count: u32,
    sink: ResponseSink,
    inbox: ResponseInbox,
    timer: Option<StatusTimer>,
    terminal: Option<Result<Option<Bytes>, ErrorMetadata>>,
}

impl<RT: Runtime> Invocation<RT> {
    pub(crate) fn new(
        engine: Arc<InvocationEngine<RT>>,
        service_name: String,
        body: Arc<dyn OperationBody>,
        target: Target,
        try_count: u32,
        try_pause: Duration,
        call_timeout: Duration,
    ) -> Self {
        let (sink, inbox) = response_channel();
        Self {
            engine,
            service_name,
            op: Operation::new(body),
            target,
            try_count,
            try_pause,
            call_timeout,
            invoke_count: 0,
            sink,
            inbox,
            timer: None,
            terminal: None,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn operation(&self) -> &Operation {
        &self.op
    }

    pub fn partition_id(&self) -> Option<PartitionId> {
        match self.target {
            Target::Partition { partition_id, .. } => Some(partition_id),
            Target::Address(..) => None,
        }
    }

    pub fn replica_index(&self) -> Option<ReplicaIndex> {
        match self.target {
            Target::Partition { replica_index, .. } => Some(replica_index),
            Target::Address(..) => None,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn invoke_count(&self) -> u32 {
        self.invoke_count
    }

    pub fn is_done(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        false
    }

    /// In-flight remote operations cannot be rescinded.
    pub fn cancel(&mut self) -> anyhow::Result<()> {
        Err(ErrorMetadata::unsupported(
            "CancelUnsupported",
            "Invocations cannot be cancelled once dispatched",
        )
        .into())
    }

    /// Handle for external responders to feed this invocation's inbox.
    pub fn response_sink(&self) -> ResponseSink {
        self.sink.clone()
    }

    /// Dispatch the operation. Must be called at most once; dispatch-level
    /// retryable failures are funneled into the inbox so the `get` retry loop
    /// owns them.
    pub fn invoke(&mut self) -> anyhow::Result<()> {
        self.start(None)
    }

    /// Invoke from within the execution of `parent`, subject to the engine's
    /// nested-invocation policy.
    pub fn invoke_nested(&mut self, parent: &Operation) -> anyhow::Result<()> {
        self.start(Some(parent))
    }

    fn start(&mut self, parent: Option<&Operation>) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.invoke_count == 0,
            "Invocation of {} already started",
            self.op.name(),
        );
        if !self.engine.is_active() {
            anyhow::bail!(ErrorMetadata::node_inactive(format!(
                "Node {} is not active",
                self.engine.this_address(),
            )));
        }
        if let Some(parent) = parent {
            anyhow::ensure!(
                (self.engine.allow_nested)(parent, &self.op),
                "Operation {} may not be invoked from within {}",
                self.op.name(),
                parent.name(),
            );
        }
        self.op.header_mut().call_timeout = Some(self.call_timeout);
        self.timer = Some(invocation_metrics::invocation_timer());
        self.dispatch();
        Ok(())
    }

    fn resolve_target(&self) -> Option<Address> {
        match self.target {
            Target::Partition {
                partition_id,
                replica_index,
            } => self.engine.partitions.owner(partition_id, replica_index),
            Target::Address(address) => Some(address),
        }
    }

    /// One dispatch attempt. Never raises: every failure mode lands in the
    /// inbox where the retry loop classifies it.
    fn dispatch(&mut self) {
        self.invoke_count += 1;
        // Whatever the previous attempt registered is abandoned now.
        self.deregister_call();

        let header = self.op.header_mut();
        header.call_id = None;
        header.service_name = self.service_name.clone();
        header.caller = Some(self.engine.this_address());
        if let Target::Partition {
            partition_id,
            replica_index,
        } = self.target
        {
            header.partition_id = Some(partition_id);
            header.replica_index = replica_index;
        }

        let Some(target) = self.resolve_target() else {
            let err = if self.engine.is_active() {
                ErrorMetadata::wrong_target(format!(
                    "No target available for {}",
                    self.describe(),
                ))
            } else {
                ErrorMetadata::node_inactive(format!(
                    "Node {} is shutting down",
                    self.engine.this_address(),
                ))
            };
            self.sink.deliver(Err(err.into()));
            return;
        };

        if !self.op.is_join() && self.engine.cluster.member(target).is_none() {
            self.sink.deliver(Err(ErrorMetadata::target_not_member(format!(
                "Target {target} of {} is not a member of the cluster",
                self.describe(),
            ))
            .into()));
            return;
        }

        self.op.header_mut().invocation_time = Some(self.engine.cluster.cluster_time());
        if target == self.engine.this_address() {
            tracing::trace!("Dispatching {} to the local runner", self.describe());
            invocation_metrics::log_dispatch(true);
            self.engine
                .operations
                .run_operation_local(self.op.clone(), self.sink.clone());
        } else {
            invocation_metrics::log_dispatch(false);
            let call_id = self.engine.calls.register(self.sink.clone());
            self.op.header_mut().call_id = Some(call_id);
            tracing::trace!("Sending {} to {target} as call {call_id}", self.describe());
            if !self.engine.operations.send(&self.op, target) {
                self.engine.calls.deregister(call_id);
                self.op.header_mut().call_id = None;
                self.sink.deliver(Err(ErrorMetadata::retryable(
                    "PacketNotSent",
                    format!("Could not send {} to {target}", self.describe()),
                )
                .into()));
            }
        }
    }

    fn deregister_call(&mut self) {
        if let Some(call_id) = self.op.call_id() {
            self.engine.calls.deregister(call_id);
        }
    }

    /// Await the terminal outcome with no caller deadline. A caller-deadline
    /// timeout cannot normally occur here; if one surfaces anyway it is
    /// logged and mapped to a null result.
    pub async fn get(&mut self) -> anyhow::Result<Option<Bytes>> {
        match self.get_inner(TimeBudget::Infinite).await {
            Err(e) if e.is_timeout() => {
                errors::report_error(&e);
                Ok(None)
            },
            outcome => outcome,
        }
    }

    /// Await the terminal outcome for up to `timeout`.
    pub async fn get_with_timeout(&mut self, timeout: Duration) -> anyhow::Result<Option<Bytes>> {
        self.get_inner(TimeBudget::Finite(timeout)).await
    }

    #[async_recursion]
    async fn get_inner(&mut self, mut budget: TimeBudget) -> anyhow::Result<Option<Bytes>> {
        if let Some(terminal) = &self.terminal {
            return Self::replay(terminal);
        }

        // Waits are sliced so that a dispatch that outlives twice its network
        // budget gets a liveness check instead of hanging forever.
        let max_per_poll = self.call_timeout.checked_mul(2).unwrap_or(Duration::MAX);
        let long_polling = budget.exceeds(max_per_poll);
        let mut poll_count: u32 = 0;
        let mut last_poll_timeout = Duration::ZERO;
        let mut pending: Option<InvocationOutcome> = None;
        loop {
            let outcome = match pending.take() {
                Some(outcome) => Some(outcome),
                None => {
                    last_poll_timeout = budget.cap(max_per_poll);
                    let start = self.engine.rt.monotonic_now();
                    let outcome = self.inbox.next(&self.engine.rt, last_poll_timeout).await;
                    budget.decrement(self.engine.rt.monotonic_now() - start);
                    poll_count += 1;
                    outcome
                },
            };
            match outcome {
                Some(Err(e)) if e.is_retryable() => {
                    if self.invoke_count < self.try_count && !budget.is_exhausted() {
                        self.log_retry(&e);
                        invocation_metrics::log_invocation_retry();
                        self.engine.rt.wait(self.try_pause).await;
                        budget.decrement(self.try_pause);
                        self.dispatch();
                    } else {
                        let attempts = self.invoke_count;
                        return self.complete(Err(e.context(ErrorMetadata::execution_failed(
                            format!("Giving up on {} after {attempts} attempt(s)", self.describe()),
                        ))));
                    }
                },
                Some(Ok(value)) => return self.complete(Ok(value)),
                Some(Err(e)) => return self.complete(Err(e.wrap_execution_failed())),
                None if long_polling && !budget.is_exhausted() => {
                    match self.resolve_target() {
                        Some(target) if target == self.engine.this_address() => {
                            // The partition migrated here mid-call; the retry
                            // machinery will observe that, keep waiting.
                            tracing::debug!(
                                "Target of {} now resolves locally; continuing to wait",
                                self.describe(),
                            );
                            continue;
                        },
                        resolved => {
                            let executing = match resolved {
                                Some(target) => self.probe_still_executing(target).await,
                                None => false,
                            };
                            invocation_metrics::log_probe_verdict(executing);
                            if !executing {
                                // The real response may have landed between
                                // the poll expiring and the probe deciding.
                                if let Some(outcome) = self.inbox.try_next() {
                                    pending = Some(outcome);
                                    continue;
                                }
                                let total_wait = last_poll_timeout * poll_count;
                                return self.complete(Err(ErrorMetadata::operation_timeout(
                                    format!(
                                        "No response for {} after {total_wait:?} of waiting \
                                         ({poll_count} polls); remote reports it is no longer \
                                         executing",
                                        self.describe(),
                                    ),
                                )
                                .into()));
                            }
                        },
                    }
                },
                None => {
                    if budget.is_exhausted() {
                        return self.complete(Err(ErrorMetadata::timeout(format!(
                            "Deadline expired waiting for {}",
                            self.describe(),
                        ))
                        .into()));
                    }
                },
            }
        }
    }

    /// Nested short-deadline invocation asking the resolved target whether
    /// our call is still being processed there. Any failure counts as "not
    /// executing".
    async fn probe_still_executing(&self, target: Address) -> bool {
        let Some(call_id) = self.op.call_id() else {
            // Nothing registered remotely, so nothing can be executing there.
            return false;
        };
        tracing::debug!("Probing {target} for liveness of call {call_id}");
        let _timer = invocation_metrics::probe_timer();
        let timeout = *IS_STILL_EXECUTING_TIMEOUT;
        let mut probe = Invocation::new(
            self.engine.clone(),
            self.service_name.clone(),
            Arc::new(IsStillExecuting::new(call_id)),
            Target::Address(target),
            0,
            Duration::ZERO,
            timeout,
        );
        let outcome = async {
            probe.invoke()?;
            match probe.get_with_timeout(timeout).await? {
                Some(payload) => IsStillExecuting::decode_response(&payload),
                None => Ok(false),
            }
        }
        .await;
        match outcome {
            Ok(executing) => executing,
            Err(e) => {
                tracing::warn!("Liveness probe to {target} for call {call_id} failed: {e:#}");
                false
            },
        }
    }

    fn complete(&mut self, outcome: anyhow::Result<Option<Bytes>>) -> anyhow::Result<Option<Bytes>> {
        self.deregister_call();
        let stored = match &outcome {
            Ok(value) => {
                invocation_metrics::log_invocation_complete(if value.is_some() {
                    "success"
                } else {
                    "null"
                });
                Ok(value.clone())
            },
            Err(e) => {
                let metadata = e
                    .downcast_ref::<ErrorMetadata>()
                    .cloned()
                    .unwrap_or_else(|| ErrorMetadata::execution_failed(format!("{e:#}")));
                invocation_metrics::log_invocation_complete(metadata.code.metric_label_value());
                Err(metadata)
            },
        };
        if let Some(timer) = self.timer.take()
            && outcome.is_ok()
        {
            timer.finish();
        }
        self.terminal = Some(stored);
        outcome
    }

    /// Terminal outcomes replay on repeated `get`s without re-dispatching.
    fn replay(terminal: &Result<Option<Bytes>, ErrorMetadata>) -> anyhow::Result<Option<Bytes>> {
        match terminal {
            Ok(value) => Ok(value.clone()),
            Err(metadata) => Err(metadata.clone().into()),
        }
    }

    fn log_retry(&self, cause: &anyhow::Error) {
        let attempts = self.invoke_count;
        if attempts > *INVOCATION_RETRY_WARN_THRESHOLD && attempts % *INVOCATION_RETRY_WARN_PERIOD == 0
        {
            tracing::warn!("Retrying {} (attempt {attempts}): {cause:#}", self.describe());
        } else {
            tracing::debug!("Retrying {} (attempt {attempts}): {cause:#}", self.describe());
        }
    }

    fn describe(&self) -> String {
        format!(
            "{}[service={}, target={:?}]",
            self.op.name(),
            self.service_name,
            self.target,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::Duration,
    };

    use bytes::Bytes;
    use common::runtime::{
        testing::TestRuntime,
        Runtime,
    };
    use errors::ErrorMetadataAnyhowExt;
    use must_let::must_let;

    use super::Invocation;
    use crate::{
        testing::{
            TestNode,
            TestOperation,
        },
        types::{
            PartitionId,
            ReplicaIndex,
        },
    };

    const PARTITION: PartitionId = PartitionId(7);
    const REPLICA: ReplicaIndex = ReplicaIndex(0);

    fn map_get(
        node: &TestNode,
        try_count: u32,
        try_pause: Duration,
        call_timeout: Duration,
    ) -> Invocation<TestRuntime> {
        node.engine
            .partition_invocation(
                "map-service",
                Arc::new(TestOperation::new("map.get")),
                PARTITION,
                REPLICA,
            )
            .try_count(try_count)
            .try_pause(try_pause)
            .call_timeout(call_timeout)
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_happy_path() {
        let node = TestNode::new();
        node.partitions
            .set_owner(PARTITION, REPLICA, node.this_address());
        node.operations.push_local_response(Ok(Some("ok".into())));

        let mut invocation = map_get(&node, 2, Duration::from_millis(100), Duration::from_secs(1));
        invocation.invoke().unwrap();
        let result = invocation.get().await.unwrap();

        assert_eq!(result, Some(Bytes::from_static(b"ok")));
        assert_eq!(invocation.invoke_count(), 1);
        assert!(invocation.is_done());
        // Local dispatch never occupies a call-id slot.
        assert_eq!(node.engine.pending_calls(), 0);
        assert!(node.operations.sent().is_empty());

        let runs = node.operations.local_runs();
        assert_eq!(runs.len(), 1);
        let header = runs[0].header();
        assert_eq!(header.service_name, "map-service");
        assert_eq!(header.caller, Some(node.this_address()));
        assert_eq!(header.partition_id, Some(PARTITION));
        assert_eq!(header.call_timeout, Some(Duration::from_secs(1)));
        assert_eq!(header.invocation_time, Some(1_000));
        assert!(header.call_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_happy_path() {
        let node = TestNode::new();
        let remote = node.add_remote_member(1);
        node.partitions.set_owner(PARTITION, REPLICA, remote);

        let mut invocation = map_get(&node, 2, Duration::from_millis(100), Duration::from_secs(1));
        invocation.invoke().unwrap();

        let sent = node.operations.sent();
        assert_eq!(sent.len(), 1);
        let (op, target) = &sent[0];
        assert_eq!(*target, remote);
        must_let!(let Some(call_id) = op.call_id());
        assert_eq!(node.engine.pending_calls(), 1);

        let engine = node.engine.clone();
        let responder = node.rt.spawn("responder", async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(engine.notify(call_id, Ok(Some("42".into()))));
        });

        let result = invocation.get().await.unwrap();
        assert_eq!(result, Some(Bytes::from_static(b"42")));
        assert_eq!(invocation.invoke_count(), 1);
        assert_eq!(node.engine.pending_calls(), 0);
        common::runtime::shutdown_and_join(responder).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_before_get_is_observed() {
        let node = TestNode::new();
        let remote = node.add_remote_member(1);
        node.partitions.set_owner(PARTITION, REPLICA, remote);

        let mut invocation = map_get(&node, 2, Duration::from_millis(100), Duration::from_secs(1));
        invocation.invoke().unwrap();
        must_let!(let Some(call_id) = node.operations.sent()[0].0.call_id());
        assert!(node.engine.notify(call_id, Ok(Some("42".into()))));

        let result = invocation.get().await.unwrap();
        assert_eq!(result, Some(Bytes::from_static(b"42")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success_after_migration() {
        let node = TestNode::new();
        // No owner yet: the first dispatch fails with a recoverable
        // wrong-target.
        let mut invocation = map_get(&node, 3, Duration::from_millis(200), Duration::from_secs(1));
        invocation.invoke().unwrap();

        node.partitions
            .set_owner(PARTITION, REPLICA, node.this_address());
        node.operations.push_local_response(Ok(Some("v".into())));

        let start = node.rt.monotonic_now();
        let result = invocation.get().await.unwrap();
        assert_eq!(result, Some(Bytes::from_static(b"v")));
        assert_eq!(invocation.invoke_count(), 2);
        // The retry pause was honored.
        assert!(node.rt.monotonic_now() - start >= Duration::from_millis(200));
        assert_eq!(node.engine.pending_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhausted() {
        let node = TestNode::new();
        let remote = node.add_remote_member(1);
        node.partitions.set_owner(PARTITION, REPLICA, remote);
        node.operations.push_send_result(false);
        node.operations.push_send_result(false);

        let mut invocation = map_get(&node, 2, Duration::from_millis(10), Duration::from_secs(1));
        invocation.invoke().unwrap();
        let err = invocation.get().await.unwrap_err();

        assert!(err.is_execution_failed());
        assert!(format!("{err:#}").contains("Could not send"));
        assert_eq!(invocation.invoke_count(), 2);
        assert!(invocation.is_done());
        assert_eq!(node.engine.pending_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_poll_probe_reports_not_executing() {
        let node = TestNode::new();
        let remote = node.add_remote_member(1);
        node.partitions.set_owner(PARTITION, REPLICA, remote);
        node.operations.answer_probes(false);

        let mut invocation = map_get(&node, 5, Duration::from_millis(100), Duration::from_millis(100));
        invocation.invoke().unwrap();
        let err = invocation
            .get_with_timeout(Duration::from_secs(10))
            .await
            .unwrap_err();

        assert!(err.is_operation_timeout());
        // One 200ms poll elapsed before the probe answered.
        assert!(format!("{err:#}").contains("200ms"));
        assert_eq!(node.engine.pending_calls(), 0);
        assert_eq!(node.operations.sent().len(), 2);
        assert_eq!(node.operations.sent_non_probes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_poll_race_response_wins() {
        let node = TestNode::new();
        let remote = node.add_remote_member(1);
        node.partitions.set_owner(PARTITION, REPLICA, remote);
        // Probes are never answered; the probe timing out counts as "not
        // executing", which forces the raced final poll.

        let mut invocation = map_get(&node, 5, Duration::from_millis(100), Duration::from_millis(100));
        invocation.invoke().unwrap();
        must_let!(let Some(call_id) = node.operations.sent()[0].0.call_id());

        let engine = node.engine.clone();
        let _responder = node.rt.spawn("late-responder", async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            engine.notify(call_id, Ok(Some("late".into())));
        });

        let result = invocation
            .get_with_timeout(Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(result, Some(Bytes::from_static(b"late")));
        assert_eq!(invocation.invoke_count(), 1);
        assert_eq!(node.engine.pending_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_infinite_get_probes_every_two_call_timeouts() {
        let node = TestNode::new();
        let remote = node.add_remote_member(1);
        node.partitions.set_owner(PARTITION, REPLICA, remote);
        node.operations.answer_probes(true);

        let mut invocation = map_get(&node, 5, Duration::from_millis(100), Duration::from_millis(100));
        invocation.invoke().unwrap();
        must_let!(let Some(call_id) = node.operations.sent()[0].0.call_id());

        let engine = node.engine.clone();
        let _responder = node.rt.spawn("slow-responder", async move {
            tokio::time::sleep(Duration::from_millis(950)).await;
            engine.notify(call_id, Ok(Some("done".into())));
        });

        let result = invocation.get().await.unwrap();
        assert_eq!(result, Some(Bytes::from_static(b"done")));
        // Four empty 200ms polls before the response, each followed by a
        // liveness probe.
        assert_eq!(node.operations.sent().len(), 5);
        assert_eq!(node.operations.sent_non_probes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_zero_timeout_expires_immediately() {
        let node = TestNode::new();
        let remote = node.add_remote_member(1);
        node.partitions.set_owner(PARTITION, REPLICA, remote);

        let mut invocation = map_get(&node, 2, Duration::from_millis(100), Duration::from_secs(1));
        invocation.invoke().unwrap();
        let before = node.rt.monotonic_now();
        let err = invocation.get_with_timeout(Duration::ZERO).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(node.rt.monotonic_now(), before);
        // A terminal timeout also reclaims the pending call.
        assert_eq!(node.engine.pending_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_zero_timeout_drains_queued_response() {
        let node = TestNode::new();
        let remote = node.add_remote_member(1);
        node.partitions.set_owner(PARTITION, REPLICA, remote);

        let mut invocation = map_get(&node, 2, Duration::from_millis(100), Duration::from_secs(1));
        invocation.invoke().unwrap();
        must_let!(let Some(call_id) = node.operations.sent()[0].0.call_id());
        assert!(node.engine.notify(call_id, Ok(Some("x".into()))));

        let result = invocation
            .get_with_timeout(Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(result, Some(Bytes::from_static(b"x")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_null_response_is_a_null_success() {
        let node = TestNode::new();
        node.partitions
            .set_owner(PARTITION, REPLICA, node.this_address());
        node.operations.push_local_response(Ok(None));

        let mut invocation = map_get(&node, 2, Duration::from_millis(100), Duration::from_secs(1));
        invocation.invoke().unwrap();
        let result = invocation.get_with_timeout(Duration::from_secs(1)).await;
        assert!(matches!(result, Ok(None)));
        assert!(invocation.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_get_replays_without_redispatch() {
        let node = TestNode::new();
        node.partitions
            .set_owner(PARTITION, REPLICA, node.this_address());
        node.operations.push_local_response(Ok(Some("once".into())));

        let mut invocation = map_get(&node, 2, Duration::from_millis(100), Duration::from_secs(1));
        invocation.invoke().unwrap();
        let first = invocation.get().await.unwrap();
        let second = invocation.get().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(invocation.invoke_count(), 1);
        assert_eq!(node.operations.local_runs().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_get_replays_failure_kind() {
        let node = TestNode::new();
        let remote = node.add_remote_member(1);
        node.partitions.set_owner(PARTITION, REPLICA, remote);

        let mut invocation = map_get(&node, 2, Duration::from_millis(100), Duration::from_secs(1));
        invocation.invoke().unwrap();
        let first = invocation.get_with_timeout(Duration::ZERO).await.unwrap_err();
        let second = invocation.get_with_timeout(Duration::from_secs(5)).await.unwrap_err();
        assert!(first.is_timeout());
        assert!(second.is_timeout());
        assert_eq!(invocation.invoke_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_is_at_most_once() {
        let node = TestNode::new();
        node.partitions
            .set_owner(PARTITION, REPLICA, node.this_address());

        let mut invocation = map_get(&node, 2, Duration::from_millis(100), Duration::from_secs(1));
        invocation.invoke().unwrap();
        let err = invocation.invoke().unwrap_err();
        assert!(format!("{err}").contains("already started"));
        assert_eq!(invocation.invoke_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_unsupported() {
        let node = TestNode::new();
        let mut invocation = map_get(&node, 2, Duration::from_millis(100), Duration::from_secs(1));
        let err = invocation.cancel().unwrap_err();
        assert!(err.is_unsupported());
        assert!(!invocation.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_node_rejects_invoke() {
        let node = TestNode::new();
        node.engine.shutdown();
        let mut invocation = map_get(&node, 2, Duration::from_millis(100), Duration::from_secs(1));
        let err = invocation.invoke().unwrap_err();
        assert!(err.is_node_inactive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_fails_pending_calls() {
        let node = TestNode::new();
        let remote = node.add_remote_member(1);
        node.partitions.set_owner(PARTITION, REPLICA, remote);

        let mut invocation = map_get(&node, 2, Duration::from_millis(100), Duration::from_secs(1));
        invocation.invoke().unwrap();
        assert_eq!(node.engine.pending_calls(), 1);

        node.engine.shutdown();
        assert_eq!(node.engine.pending_calls(), 0);
        let err = invocation.get_with_timeout(Duration::from_secs(5)).await.unwrap_err();
        assert!(err.is_node_inactive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_not_member_exhausts_retries() {
        let node = TestNode::new();
        // Owner resolves to an address the membership view doesn't know.
        node.partitions
            .set_owner(PARTITION, REPLICA, crate::testing::test_address(9));

        let mut invocation = map_get(&node, 1, Duration::from_millis(10), Duration::from_secs(1));
        invocation.invoke().unwrap();
        let err = invocation.get().await.unwrap_err();
        assert!(err.is_execution_failed());
        assert!(format!("{err:#}").contains("not a member"));
        assert!(node.operations.sent().is_empty());
        assert_eq!(invocation.invoke_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_operation_bypasses_membership_check() {
        let node = TestNode::new();
        let stranger = crate::testing::test_address(9);

        let mut invocation = node
            .engine
            .target_invocation(
                "cluster-service",
                Arc::new(TestOperation::new("cluster.join").join()),
                stranger,
            )
            .try_count(1)
            .call_timeout(Duration::from_secs(1))
            .build();
        invocation.invoke().unwrap();

        let sent = node.operations.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, stranger);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_invocation_policy() {
        use crate::{
            engine::InvocationEngine,
            operation::Operation,
        };

        let node = TestNode::new();
        let parent = Operation::new(Arc::new(TestOperation::new("parent")));

        // The default policy allows nesting.
        let mut allowed = node
            .engine
            .target_invocation(
                "map-service",
                Arc::new(TestOperation::new("child")),
                node.this_address(),
            )
            .build();
        allowed.invoke_nested(&parent).unwrap();

        let restricted = Arc::new(
            InvocationEngine::new(
                node.rt.clone(),
                node.this_address(),
                node.operations.clone(),
                node.cluster.clone(),
                node.partitions.clone(),
            )
            .with_nested_policy(|_, _| false),
        );
        let mut denied = restricted
            .target_invocation(
                "map-service",
                Arc::new(TestOperation::new("child")),
                node.this_address(),
            )
            .build();
        let err = denied.invoke_nested(&parent).unwrap_err();
        assert!(format!("{err}").contains("may not be invoked"));
    }
}
