//! Test implementation of the Runtime trait.
//!
//! Rides on tokio's own executor and virtualized clock: under
//! `#[tokio::test(start_paused = true)]` every `wait` resolves via
//! auto-advance, so time-dependent invocation behavior runs instantly and
//! deterministically.

use std::{
    future::Future,
    pin::Pin,
    time::{
        Duration,
        SystemTime,
    },
};

use futures::{
    future::FusedFuture,
    FutureExt,
};
use rand::RngCore;

use crate::runtime::{
    FutureHandle,
    Runtime,
    SpawnHandle,
};

#[derive(Clone)]
pub struct TestRuntime {
    _priv: (),
}

impl TestRuntime {
    /// Must be created from within a tokio context (e.g. `#[tokio::test]`).
    pub fn new() -> Self {
        cmd_util::env::config_test();
        assert!(
            tokio::runtime::Handle::try_current().is_ok(),
            "TestRuntime must be created inside a tokio runtime"
        );
        Self { _priv: () }
    }
}

impl Runtime for TestRuntime {
    fn wait(&self, duration: Duration) -> Pin<Box<dyn FusedFuture<Output = ()> + Send + 'static>> {
        Box::pin(tokio::time::sleep(duration).fuse())
    }

    fn spawn(
        &self,
        _name: &'static str,
        f: impl Future<Output = ()> + Send + 'static,
    ) -> Box<dyn SpawnHandle> {
        Box::new(FutureHandle::new(tokio::spawn(f)))
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    fn monotonic_now(&self) -> tokio::time::Instant {
        tokio::time::Instant::now()
    }

    fn rng(&self) -> Box<dyn RngCore> {
        Box::new(rand::rng())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::TestRuntime;
    use crate::runtime::Runtime;

    #[tokio::test(start_paused = true)]
    async fn test_wait_advances_virtual_clock() {
        let rt = TestRuntime::new();
        let before = rt.monotonic_now();
        rt.wait(Duration::from_secs(30)).await;
        assert!(rt.monotonic_now() - before >= Duration::from_secs(30));
    }
}
