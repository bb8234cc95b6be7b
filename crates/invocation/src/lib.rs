//! Remote operation invocation core of the grid.
//!
//! Every data-plane action a node performs against the cluster goes through
//! an [`Invocation`]: the operation is aimed at a partition replica or a
//! fixed member, dispatched to the local runner or across the wire, and the
//! caller awaits exactly one terminal outcome. In between, the engine
//! re-resolves targets across migrations, retries recoverable failures
//! within the caller's budget, and probes stuck remote executions for
//! liveness.
//!
//! Operation payloads, serialization, membership, partition ownership and
//! the transport are collaborators behind the traits in [`service`].

pub mod deadline;
pub mod engine;
pub mod inbox;
pub mod invocation;
mod metrics;
pub mod operation;
pub mod probe;
pub mod registry;
pub mod service;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use crate::{
    engine::{
        InvocationBuilder,
        InvocationEngine,
        NestedInvocationPolicy,
    },
    inbox::{
        InvocationOutcome,
        ResponseInbox,
        ResponseSink,
    },
    invocation::{
        Invocation,
        Target,
    },
    operation::{
        Operation,
        OperationBody,
        OperationHeader,
    },
    probe::IsStillExecuting,
    service::{
        ClusterService,
        OperationService,
        PartitionService,
    },
    types::{
        Address,
        CallId,
        Member,
        PartitionId,
        ReplicaIndex,
    },
};
