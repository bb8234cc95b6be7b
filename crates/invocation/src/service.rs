//! Interfaces of the collaborators the invocation core drives. Concrete
//! implementations live with the operation runner, the transport and the
//! cluster services; tests use the fakes in [`crate::testing`].

use std::time::Duration;

use common::knobs::OPERATION_CALL_TIMEOUT;

use crate::{
    inbox::ResponseSink,
    operation::Operation,
    types::{
        Address,
        CallId,
        Member,
        PartitionId,
        ReplicaIndex,
    },
};

/// Local execution and transport surface.
pub trait OperationService: Send + Sync + 'static {
    /// Schedule `op` on the local operation runner. The runner funnels the
    /// operation's outcome into `responder`.
    fn run_operation_local(&self, op: Operation, responder: ResponseSink);

    /// Fire-and-forget packet send. False if the packet could not be handed
    /// to the transport.
    fn send(&self, op: &Operation, target: Address) -> bool;

    /// Per-attempt budget for operations whose caller supplied none.
    fn default_call_timeout(&self) -> Duration {
        *OPERATION_CALL_TIMEOUT
    }

    /// Responder side of liveness probes: is `call_id`, invoked by `caller`,
    /// still running here?
    fn is_operation_executing(&self, caller: Address, call_id: CallId) -> bool;
}

/// Read-only membership view.
pub trait ClusterService: Send + Sync + 'static {
    fn member(&self, address: Address) -> Option<Member>;

    /// Cluster-wide wall clock, in milliseconds.
    fn cluster_time(&self) -> u64;
}

/// Read-only partition-ownership table.
pub trait PartitionService: Send + Sync + 'static {
    /// Current owner of `partition_id` at `replica_index`, if assigned.
    /// Consulted on every dispatch so migrations are observed.
    fn owner(&self, partition_id: PartitionId, replica_index: ReplicaIndex) -> Option<Address>;
}
