//! The responder-side half of liveness probing: an operation asking a member
//! whether a specific call id is still being processed there. The probing
//! side lives in [`crate::invocation`].

use byteorder::{
    BigEndian,
    ByteOrder,
};
use bytes::Bytes;

use crate::{
    inbox::ResponseSink,
    operation::OperationBody,
    service::OperationService,
    types::{
        Address,
        CallId,
    },
};

/// Asks the receiving member whether `call_id` is still executing there.
///
/// Answers through its responder handle rather than a return value, so
/// `returns_response` is false.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IsStillExecuting {
    call_id: CallId,
}

impl IsStillExecuting {
    pub const NAME: &'static str = "is-still-executing";

    pub fn new(call_id: CallId) -> Self {
        Self { call_id }
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Wire format: the probed call id as one big-endian u64.
    pub fn encode(&self) -> Bytes {
        let mut buf = [0u8; 8];
        BigEndian::write_u64(&mut buf, self.call_id.0);
        Bytes::copy_from_slice(&buf)
    }

    pub fn decode(payload: &[u8]) -> anyhow::Result<Self> {
        anyhow::ensure!(
            payload.len() == 8,
            "Bad {} payload length {}",
            Self::NAME,
            payload.len()
        );
        Ok(Self::new(CallId(BigEndian::read_u64(payload))))
    }

    /// The boolean answer: one byte, nonzero means still executing.
    pub fn encode_response(executing: bool) -> Bytes {
        if executing {
            Bytes::from_static(&[1])
        } else {
            Bytes::from_static(&[0])
        }
    }

    pub fn decode_response(payload: &[u8]) -> anyhow::Result<bool> {
        anyhow::ensure!(
            payload.len() == 1,
            "Bad {} response length {}",
            Self::NAME,
            payload.len()
        );
        Ok(payload[0] != 0)
    }

    /// Responder side: consult the local operation service and answer through
    /// the responder handle.
    pub fn execute(
        &self,
        operations: &dyn OperationService,
        caller: Address,
        responder: &ResponseSink,
    ) {
        let executing = operations.is_operation_executing(caller, self.call_id);
        responder.deliver(Ok(Some(Self::encode_response(executing))));
    }
}

impl OperationBody for IsStillExecuting {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn returns_response(&self) -> bool {
        false
    }
}
