//! Bounded in-process notification queue and the workers draining it.

use crate::error::{IndexerError, IndexerResult};
use crate::notification::{
    DocumentOperationNotification, NotificationHandler, NotificationOutcome, NotificationPublisher
};
use crate::telemetry::Telemetry;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub type NotificationReceiver = mpsc::Receiver<DocumentOperationNotification>;

#[derive(Clone)]
pub struct InProcessChannel {
    sender: mpsc::Sender<DocumentOperationNotification>
}

impl InProcessChannel {
    pub fn bounded(capacity: usize) -> (Self, NotificationReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[async_trait]
impl NotificationPublisher for InProcessChannel {
    async fn publish(&self, notification: DocumentOperationNotification) -> IndexerResult<()> {
        self.sender
            .send(notification)
            .await
            .map_err(|_| IndexerError::Channel("notification channel is closed".to_string()))
    }
}

pub struct WorkerPool {
    stop: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>
}

impl WorkerPool {
    pub fn spawn(
        receiver: NotificationReceiver,
        handler: Arc<dyn NotificationHandler>,
        count: usize
    ) -> Self {
        let receiver = Arc::new(Mutex::new(receiver));
        let (stop, stop_rx) = watch::channel(false);

        let workers = (0..count.max(1))
            .map(|worker_id| {
                let receiver = receiver.clone();
                let handler = handler.clone();
                let stop_rx = stop_rx.clone();
                tokio::spawn(run_worker(worker_id, receiver, handler, stop_rx))
            })
            .collect::<Vec<_>>();

        info!(workers = workers.len(), "Notification workers started");
        Self { stop, workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Closes intake, lets the workers finish what is already queued, and
    /// waits for them to exit.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        self.join().await;
    }

    /// Waits for the workers to exit on their own, which happens once every
    /// publisher has been dropped and the queue is empty.
    pub async fn join(self) {
        for handle in self.workers {
            if let Err(e) = handle.await {
                error!(error = %e, "Notification worker terminated abnormally");
            }
        }
        info!("Notification workers stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<Mutex<NotificationReceiver>>,
    handler: Arc<dyn NotificationHandler>,
    mut stop: watch::Receiver<bool>
) {
    debug!(worker_id, "Notification worker started");
    while let Some(notification) = next_notification(&receiver, &mut stop).await {
        let outcome = handler.handle(notification).await;
        match &outcome {
            NotificationOutcome::Processed => {
                Telemetry::record_notification("processed");
            }
            NotificationOutcome::Rejected(reason) => {
                Telemetry::record_notification("rejected");
                debug!(worker_id, reason = %reason, "Notification rejected");
            }
            NotificationOutcome::Failed(reason) => {
                Telemetry::record_notification("failed");
                warn!(worker_id, reason = %reason, "Notification failed");
            }
        }
    }
    debug!(worker_id, "Notification worker exiting");
}

/// Returns `None` once the queue is closed and drained.
async fn next_notification(
    receiver: &Mutex<NotificationReceiver>,
    stop: &mut watch::Receiver<bool>
) -> Option<DocumentOperationNotification> {
    let mut receiver = receiver.lock().await;
    if *stop.borrow() {
        receiver.close();
        return receiver.recv().await;
    }
    tokio::select! {
        message = receiver.recv() => message,
        _ = stop.changed() => {
            receiver.close();
            receiver.recv().await
        }
    }
}
