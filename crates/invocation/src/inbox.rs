use std::time::Duration;

use bytes::Bytes;
use common::runtime::Runtime;
use futures::{
    select_biased,
    FutureExt,
};
use tokio::sync::mpsc;

/// Terminal outcome of one dispatch attempt. `Ok(None)` is an explicit null
/// result, distinct from "no response yet".
pub type InvocationOutcome = anyhow::Result<Option<Bytes>>;

/// Per-invocation handoff from a responder (local runner or network
/// dispatcher) to the waiting invocation. FIFO; in normal operation it holds
/// at most one element, but duplicate deliveries are tolerated and observed
/// only if the consumer re-polls.
pub fn response_channel() -> (ResponseSink, ResponseInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ResponseSink { tx }, ResponseInbox { rx })
}

/// Producer half. Cloned into the call registry and local response handlers.
#[derive(Clone, Debug)]
pub struct ResponseSink {
    tx: mpsc::UnboundedSender<InvocationOutcome>,
}

impl ResponseSink {
    /// Non-blocking. An outcome for an invocation that is already gone is
    /// dropped.
    pub fn deliver(&self, outcome: InvocationOutcome) {
        if self.tx.send(outcome).is_err() {
            tracing::trace!("Dropping response for a completed invocation");
        }
    }
}

/// Consumer half, owned by the invocation.
#[derive(Debug)]
pub struct ResponseInbox {
    rx: mpsc::UnboundedReceiver<InvocationOutcome>,
}

impl ResponseInbox {
    /// Wait up to `timeout` for the next outcome; None on expiry. An outcome
    /// already queued wins over a zero timeout.
    pub async fn next<RT: Runtime>(
        &mut self,
        rt: &RT,
        timeout: Duration,
    ) -> Option<InvocationOutcome> {
        select_biased! {
            outcome = self.rx.recv().fuse() => outcome,
            _ = rt.wait(timeout) => None,
        }
    }

    /// Non-blocking poll.
    pub fn try_next(&mut self) -> Option<InvocationOutcome> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::runtime::testing::TestRuntime;

    use super::response_channel;

    #[tokio::test(start_paused = true)]
    async fn test_queued_outcome_beats_zero_timeout() {
        let rt = TestRuntime::new();
        let (sink, mut inbox) = response_channel();
        sink.deliver(Ok(None));
        let outcome = inbox.next(&rt, Duration::ZERO).await;
        assert!(matches!(outcome, Some(Ok(None))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_inbox_times_out() {
        let rt = TestRuntime::new();
        let (_sink, mut inbox) = response_channel();
        assert!(inbox.next(&rt, Duration::from_millis(50)).await.is_none());
        assert!(inbox.try_next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_deliveries_are_fifo() {
        let rt = TestRuntime::new();
        let (sink, mut inbox) = response_channel();
        sink.deliver(Ok(Some("first".into())));
        sink.deliver(Ok(Some("second".into())));
        let first = inbox.next(&rt, Duration::ZERO).await;
        assert!(matches!(first, Some(Ok(Some(v))) if v == "first"));
        let second = inbox.try_next();
        assert!(matches!(second, Some(Ok(Some(v))) if v == "second"));
    }

    #[test]
    fn test_deliver_to_dropped_inbox_is_silent() {
        let (sink, inbox) = response_channel();
        drop(inbox);
        sink.deliver(Ok(None));
    }
}
