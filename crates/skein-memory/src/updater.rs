use std::sync::Arc;

use parking_lot::Mutex;
use skein_protocol::{MemoryService, Message, SkeinError, SkeinResult, UserId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

struct MemoryJob {
    user_id: UserId,
    messages: Vec<Message>,
}

/// Front door for memory writes.
///
/// Blocking updates call the service directly. Non-blocking updates are
/// queued on a bounded channel drained by a single background task; failures
/// there are logged and dropped. [`MemoryUpdater::shutdown`] closes the queue
/// and waits until every queued update has been attempted.
pub struct MemoryUpdater {
    service: Arc<dyn MemoryService>,
    sender: Mutex<Option<mpsc::Sender<MemoryJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryUpdater {
    /// Start the background consumer. Must be called inside a tokio runtime.
    pub fn spawn(service: Arc<dyn MemoryService>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(drain(service.clone(), receiver));
        Self {
            service,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn service(&self) -> Arc<dyn MemoryService> {
        self.service.clone()
    }

    #[instrument(skip(self, messages), fields(user_id = %user_id, messages = messages.len()))]
    pub async fn update(
        &self,
        user_id: &UserId,
        messages: Vec<Message>,
        blocking: bool,
    ) -> SkeinResult<()> {
        if blocking {
            return self.service.update_memory(user_id, messages).await;
        }

        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or_else(|| SkeinError::Memory("memory update queue is closed".to_owned()))?;
        sender
            .send(MemoryJob {
                user_id: user_id.clone(),
                messages,
            })
            .await
            .map_err(|_| SkeinError::Memory("memory update queue is closed".to_owned()))?;
        debug!("memory update submitted");
        Ok(())
    }

    /// Close the queue and wait for queued updates to finish.
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(error) = worker.await {
                error!(%error, "memory update worker stopped abnormally");
            }
            info!("memory update queue drained");
        }
    }
}

async fn drain(service: Arc<dyn MemoryService>, mut receiver: mpsc::Receiver<MemoryJob>) {
    while let Some(job) = receiver.recv().await {
        match service.update_memory(&job.user_id, job.messages).await {
            Ok(()) => debug!(user_id = %job.user_id, "memory update completed"),
            Err(error) => error!(user_id = %job.user_id, %error, "memory update failed"),
        }
    }
}
