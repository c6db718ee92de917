use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{MessageHandler, Worker};

/// Lifecycle surface the supervisor needs from a worker.
#[async_trait]
pub trait ManagedWorker: Send + Sync {
    fn name(&self) -> &'static str;
    fn start(&self) -> bool;
    async fn stop(&self) -> bool;
    fn is_running(&self) -> bool;
}

#[async_trait]
impl<H: MessageHandler> ManagedWorker for Worker<H> {
    fn name(&self) -> &'static str {
        Worker::name(self)
    }

    fn start(&self) -> bool {
        Worker::start(self)
    }

    async fn stop(&self) -> bool {
        Worker::stop(self).await
    }

    fn is_running(&self) -> bool {
        Worker::is_running(self)
    }
}

/// Owns every queue worker of the process.
#[derive(Default)]
pub struct Supervisor {
    workers: Vec<Arc<dyn ManagedWorker>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker(mut self, worker: Arc<dyn ManagedWorker>) -> Self {
        self.workers.push(worker);
        self
    }

    pub fn workers(&self) -> &[Arc<dyn ManagedWorker>] {
        &self.workers
    }

    /// Returns how many workers were newly started.
    pub fn start_all(&self) -> usize {
        let started = self.workers.iter().filter(|w| w.start()).count();
        info!(started, total = self.workers.len(), "Workers started");
        started
    }

    /// Stops every worker, waiting for each loop to exit.
    pub async fn shutdown(&self) {
        info!("Shutting down workers...");
        for worker in &self.workers {
            if worker.stop().await {
                info!(worker = worker.name(), "Worker shut down");
            }
        }
        info!("All workers stopped");
    }
}
