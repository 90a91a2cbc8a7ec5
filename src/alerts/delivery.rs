//! Bounded delivery queue decoupling notifier calls from rule evaluation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify, Semaphore};

use super::message::AlertMessage;
use super::notifier::{DeliveryError, Notifier};

/// One pending notifier call
pub struct DeliveryJob {
    pub check_name: String,
    pub notifier: Arc<dyn Notifier>,
    pub message: AlertMessage,
}

/// Queue of pending deliveries drained by a background worker.
///
/// Each delivery runs in its own task under a timeout; at most
/// `max_in_flight` run at once. When the queue is full new jobs are dropped.
pub struct DeliveryQueue {
    tx: mpsc::Sender<DeliveryJob>,
    rx: Mutex<Option<mpsc::Receiver<DeliveryJob>>>,
    timeout: Duration,
    in_flight: Arc<Semaphore>,
    shutdown: Notify,
    running: AtomicBool,
}

impl DeliveryQueue {
    pub fn new(capacity: usize, max_in_flight: usize, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            timeout,
            in_flight: Arc::new(Semaphore::new(max_in_flight.max(1))),
            shutdown: Notify::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Queue a delivery without waiting
    pub fn enqueue(&self, job: DeliveryJob) -> Result<(), DeliveryError> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => {
                DeliveryError::QueueFull(job.notifier.name().to_string())
            }
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Start the worker. Returns `None` if it was already started.
    pub fn start(self: Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        let mut rx = self.rx.lock().take()?;
        self.running.store(true, Ordering::SeqCst);

        Some(tokio::spawn(async move {
            tracing::info!("Delivery worker started with timeout {:?}", self.timeout);

            loop {
                tokio::select! {
                    job = rx.recv() => {
                        let Some(job) = job else { break };
                        let Ok(permit) = Arc::clone(&self.in_flight).acquire_owned().await else {
                            break;
                        };
                        let timeout = self.timeout;
                        tokio::spawn(async move {
                            let _permit = permit;
                            let check = job.check_name.clone();
                            let transport = job.notifier.name().to_string();
                            if let Err(e) = deliver(job, timeout).await {
                                tracing::error!(
                                    check = %check,
                                    transport = %transport,
                                    error = %e,
                                    "Alert delivery failed"
                                );
                            }
                        });
                    }
                    _ = self.shutdown.notified() => break,
                }
            }

            self.running.store(false, Ordering::SeqCst);
            tracing::info!("Delivery worker stopped");
        }))
    }

    /// Stop the worker; queued jobs are discarded
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Run one delivery under a timeout
pub async fn deliver(job: DeliveryJob, timeout: Duration) -> Result<(), DeliveryError> {
    match tokio::time::timeout(timeout, job.notifier.send(&job.message)).await {
        Ok(result) => result,
        Err(_) => Err(DeliveryError::Timeout {
            transport: job.notifier.name().to_string(),
            after: timeout,
        }),
    }
}
