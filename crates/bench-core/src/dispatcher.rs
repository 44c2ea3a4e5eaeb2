use crate::invoker::Invoker;
use crate::rate_source::Token;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Receiving half of the token channel, shared by every worker.
pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<Token>>>;

pub fn shared(rx: mpsc::Receiver<Token>) -> SharedReceiver {
    Arc::new(Mutex::new(rx))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub invocations: u64,
    pub failures: u64,
}

/// Pulls tokens off the shared channel and submits one invocation per token.
pub struct Worker {
    id: usize,
    rx: SharedReceiver,
    invoker: Arc<dyn Invoker>,
    poll_timeout: Duration,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(
        id: usize,
        rx: SharedReceiver,
        invoker: Arc<dyn Invoker>,
        poll_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            rx,
            invoker,
            poll_timeout,
            shutdown,
        }
    }

    /// Run until shutdown or until the channel is closed and drained.
    ///
    /// Waiting for a token (lock included) is bounded by the poll timeout so a
    /// shutdown is noticed within roughly one timeout. Failed invocations are
    /// counted and logged; they never stop the loop.
    pub async fn run(self) -> WorkerReport {
        let mut report = WorkerReport {
            worker_id: self.id,
            ..Default::default()
        };

        while !self.shutdown.is_cancelled() {
            let next = timeout(self.poll_timeout, async {
                let mut rx = self.rx.lock().await;
                rx.recv().await
            })
            .await;

            match next {
                Err(_) => continue,
                Ok(None) => {
                    debug!("Worker [{}] channel closed", self.id);
                    break;
                }
                Ok(Some(Token)) => {
                    debug!("Worker [{}] invoking {}", self.id, self.invoker.name());
                    match self.invoker.invoke().await {
                        Ok(()) => report.invocations += 1,
                        Err(e) => {
                            report.failures += 1;
                            warn!("Worker [{}] invocation error: {:#}", self.id, e);
                        }
                    }
                }
            }
        }

        debug!(
            "Worker [{}] shutting down (invocations={} failures={})",
            self.id, report.invocations, report.failures
        );
        report
    }
}
