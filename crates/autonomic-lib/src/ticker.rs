//! Handle for a background control loop
//!
//! Loops observe the shutdown signal only between iterations, so stopping never
//! interrupts an iteration halfway.

use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

pub(crate) struct LoopHandle {
    name: &'static str,
    shutdown: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl LoopHandle {
    /// Spawn a loop body that receives the shutdown signal
    pub(crate) fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(broadcast::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, rx) = broadcast::channel(1);
        let join = tokio::spawn(body(rx));
        Self {
            name,
            shutdown,
            join,
        }
    }

    /// Signal shutdown and wait up to `timeout` for the loop to exit
    pub(crate) async fn shutdown(self, timeout: Duration) {
        let _ = self.shutdown.send(());

        let mut join = self.join;
        match tokio::time::timeout(timeout, &mut join).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(task = self.name, error = %e, "Control loop exited abnormally"),
            Err(_) => {
                warn!(
                    task = self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Control loop did not stop in time, aborting"
                );
                join.abort();
            }
        }
    }
}
