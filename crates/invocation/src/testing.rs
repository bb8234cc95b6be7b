//! Fake cluster plumbing for exercising invocations without an operation
//! runner or a transport.

use std::{
    collections::{
        BTreeSet,
        HashMap,
        VecDeque,
    },
    net::SocketAddr,
    sync::{
        atomic::{
            AtomicU64,
            Ordering,
        },
        Arc,
        Weak,
    },
    time::Duration,
};

use common::runtime::testing::TestRuntime;
use parking_lot::Mutex;

use crate::{
    engine::InvocationEngine,
    inbox::{
        InvocationOutcome,
        ResponseSink,
    },
    operation::{
        Operation,
        OperationBody,
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

pub fn test_address(n: u16) -> Address {
    Address::new(SocketAddr::from(([127, 0, 0, 1], 7000 + n)))
}

/// Inert payload with configurable capabilities.
#[derive(Debug)]
pub struct TestOperation {
    name: &'static str,
    join: bool,
    wait_timeout: Option<Duration>,
}

impl TestOperation {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            join: false,
            wait_timeout: None,
        }
    }

    pub fn join(mut self) -> Self {
        self.join = true;
        self
    }

    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = Some(wait_timeout);
        self
    }
}

impl OperationBody for TestOperation {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_join(&self) -> bool {
        self.join
    }

    fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout
    }
}

#[derive(Default)]
struct OperationServiceState {
    local_responses: VecDeque<InvocationOutcome>,
    local_runs: Vec<Operation>,
    sent: Vec<(Operation, Address)>,
    send_results: VecDeque<bool>,
    executing_calls: bool,
    probe_answer: Option<bool>,
}

/// Scripted stand-in for the operation runner and the transport.
///
/// Local runs pop canned outcomes; an operation with no canned outcome
/// "keeps executing" and never answers. Sends are recorded and succeed
/// unless a send result was scripted. With [`Self::answer_probes`] set, a
/// sent liveness probe is answered immediately through the engine, the way
/// the remote's network thread would.
pub struct FakeOperationService {
    state: Mutex<OperationServiceState>,
    default_call_timeout: Mutex<Duration>,
    engine: Mutex<Option<Weak<InvocationEngine<TestRuntime>>>>,
}

impl FakeOperationService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(OperationServiceState::default()),
            default_call_timeout: Mutex::new(Duration::from_secs(60)),
            engine: Mutex::new(None),
        })
    }

    /// Wire up the engine so scripted probe answers can be routed back.
    pub fn attach_engine(&self, engine: &Arc<InvocationEngine<TestRuntime>>) {
        *self.engine.lock() = Some(Arc::downgrade(engine));
    }

    pub fn push_local_response(&self, outcome: InvocationOutcome) {
        self.state.lock().local_responses.push_back(outcome);
    }

    pub fn push_send_result(&self, ok: bool) {
        self.state.lock().send_results.push_back(ok);
    }

    pub fn set_default_call_timeout(&self, timeout: Duration) {
        *self.default_call_timeout.lock() = timeout;
    }

    pub fn set_executing(&self, executing: bool) {
        self.state.lock().executing_calls = executing;
    }

    pub fn answer_probes(&self, executing: bool) {
        self.state.lock().probe_answer = Some(executing);
    }

    pub fn local_runs(&self) -> Vec<Operation> {
        self.state.lock().local_runs.clone()
    }

    pub fn sent(&self) -> Vec<(Operation, Address)> {
        self.state.lock().sent.clone()
    }

    /// Operations sent so far, minus liveness probes.
    pub fn sent_non_probes(&self) -> Vec<(Operation, Address)> {
        self.sent()
            .into_iter()
            .filter(|(op, _)| op.name() != IsStillExecuting::NAME)
            .collect()
    }
}

impl OperationService for FakeOperationService {
    fn run_operation_local(&self, op: Operation, responder: ResponseSink) {
        let outcome = {
            let mut state = self.state.lock();
            state.local_runs.push(op);
            state.local_responses.pop_front()
        };
        if let Some(outcome) = outcome {
            responder.deliver(outcome);
        }
    }

    fn send(&self, op: &Operation, target: Address) -> bool {
        let (ok, probe_answer) = {
            let mut state = self.state.lock();
            state.sent.push((op.clone(), target));
            (
                state.send_results.pop_front().unwrap_or(true),
                state.probe_answer,
            )
        };
        if ok && op.name() == IsStillExecuting::NAME {
            if let Some(executing) = probe_answer {
                let engine = self.engine.lock().as_ref().and_then(Weak::upgrade);
                if let Some(engine) = engine {
                    let call_id = op.call_id().expect("probe sent without a call id");
                    engine.notify(
                        call_id,
                        Ok(Some(IsStillExecuting::encode_response(executing))),
                    );
                }
            }
        }
        ok
    }

    fn default_call_timeout(&self) -> Duration {
        *self.default_call_timeout.lock()
    }

    fn is_operation_executing(&self, _caller: Address, _call_id: CallId) -> bool {
        self.state.lock().executing_calls
    }
}

pub struct FakeClusterService {
    members: Mutex<BTreeSet<Address>>,
    time_millis: AtomicU64,
}

impl FakeClusterService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            members: Mutex::new(BTreeSet::new()),
            time_millis: AtomicU64::new(1_000),
        })
    }

    pub fn add_member(&self, address: Address) {
        self.members.lock().insert(address);
    }

    pub fn remove_member(&self, address: Address) {
        self.members.lock().remove(&address);
    }

    pub fn advance_time(&self, millis: u64) {
        self.time_millis.fetch_add(millis, Ordering::Relaxed);
    }
}

impl ClusterService for FakeClusterService {
    fn member(&self, address: Address) -> Option<Member> {
        self.members.lock().contains(&address).then(|| Member {
            address,
            uuid: format!("member-{address}"),
        })
    }

    fn cluster_time(&self) -> u64 {
        self.time_millis.load(Ordering::Relaxed)
    }
}

pub struct FakePartitionService {
    owners: Mutex<HashMap<(PartitionId, ReplicaIndex), Address>>,
}

impl FakePartitionService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            owners: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_owner(&self, partition_id: PartitionId, replica_index: ReplicaIndex, owner: Address) {
        self.owners.lock().insert((partition_id, replica_index), owner);
    }

    pub fn clear_owner(&self, partition_id: PartitionId, replica_index: ReplicaIndex) {
        self.owners.lock().remove(&(partition_id, replica_index));
    }
}

impl PartitionService for FakePartitionService {
    fn owner(&self, partition_id: PartitionId, replica_index: ReplicaIndex) -> Option<Address> {
        self.owners
            .lock()
            .get(&(partition_id, replica_index))
            .copied()
    }
}

/// A single grid node wired up with fakes: the local member plus whatever
/// remote members a test adds.
pub struct TestNode {
    pub rt: TestRuntime,
    pub engine: Arc<InvocationEngine<TestRuntime>>,
    pub operations: Arc<FakeOperationService>,
    pub cluster: Arc<FakeClusterService>,
    pub partitions: Arc<FakePartitionService>,
}

impl TestNode {
    pub fn new() -> Self {
        let rt = TestRuntime::new();
        let operations = FakeOperationService::new();
        let cluster = FakeClusterService::new();
        let partitions = FakePartitionService::new();
        let this_address = test_address(0);
        cluster.add_member(this_address);
        let engine = Arc::new(InvocationEngine::new(
            rt.clone(),
            this_address,
            operations.clone(),
            cluster.clone(),
            partitions.clone(),
        ));
        operations.attach_engine(&engine);
        Self {
            rt,
            engine,
            operations,
            cluster,
            partitions,
        }
    }

    pub fn this_address(&self) -> Address {
        self.engine.this_address()
    }

    /// Add a remote member and return its address.
    pub fn add_remote_member(&self, n: u16) -> Address {
        let address = test_address(n);
        self.cluster.add_member(address);
        address
    }
}
