//! Per-job progress fan-out.
//!
//! One `tokio::sync::broadcast` channel per job. Publishing never waits on
//! subscribers: a subscriber that falls behind loses its oldest events.
//! Late subscribers only see events published after they joined; the
//! current state comes from the registry.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use futures_util::Stream;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use sclip_models::{JobId, ProgressEvent};

/// Default per-job buffer size.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

enum Channel {
    Open(broadcast::Sender<ProgressEvent>),
    /// A terminal event was published
    Closed,
}

/// Publish/subscribe hub for progress events.
pub struct ProgressBroadcaster {
    channels: Mutex<HashMap<JobId, Channel>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    fn channels(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, Channel>> {
        // Critical sections never panic, so a poisoned lock still holds a consistent map.
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe to events for one job.
    ///
    /// Subscribing to a job whose terminal event was already published
    /// yields a subscription that ends immediately.
    pub fn subscribe(&self, job_id: &JobId) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut channels = self.channels();
        let receiver = match channels.get(job_id) {
            Some(Channel::Open(sender)) => sender.subscribe(),
            Some(Channel::Closed) => {
                let (_tx, rx) = broadcast::channel(1);
                rx
            }
            None => {
                let (tx, rx) = broadcast::channel(self.capacity);
                channels.insert(job_id.clone(), Channel::Open(tx));
                rx
            }
        };
        debug!(job_id = %job_id, subscription = id, "Progress subscriber joined");
        Subscription {
            id,
            job_id: job_id.clone(),
            receiver,
        }
    }

    /// Drop a subscription. Dropping the handle has the same effect.
    pub fn unsubscribe(&self, subscription: Subscription) {
        debug!(
            job_id = %subscription.job_id,
            subscription = subscription.id,
            "Progress subscriber left"
        );
        drop(subscription);
    }

    /// Publish an event. Returns how many subscribers it reached.
    ///
    /// After a terminal event the channel closes; later publishes are dropped.
    pub fn publish(&self, job_id: &JobId, event: ProgressEvent) -> usize {
        let terminal = event.is_terminal();
        let mut channels = self.channels();

        let sender = match channels.get(job_id) {
            Some(Channel::Open(sender)) => sender.clone(),
            Some(Channel::Closed) => {
                debug!(job_id = %job_id, status = %event.status(), "Dropping event after terminal state");
                return 0;
            }
            None => {
                let (tx, _) = broadcast::channel(self.capacity);
                channels.insert(job_id.clone(), Channel::Open(tx.clone()));
                tx
            }
        };

        let delivered = sender.send(event).unwrap_or(0);
        if terminal {
            // Receivers drain buffered events, then observe end-of-stream.
            channels.insert(job_id.clone(), Channel::Closed);
        }
        delivered
    }

    /// Number of live subscribers for a job.
    pub fn subscriber_count(&self, job_id: &JobId) -> usize {
        match self.channels().get(job_id) {
            Some(Channel::Open(sender)) => sender.receiver_count(),
            _ => 0,
        }
    }

    /// Forget a job's channel state entirely.
    pub fn forget(&self, job_id: &JobId) {
        self.channels().remove(job_id);
    }
}

/// Handle for receiving one job's events.
pub struct Subscription {
    id: u64,
    job_id: JobId,
    receiver: broadcast::Receiver<ProgressEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Next event, or `None` once the job's channel has closed.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        job_id = %self.job_id,
                        subscription = self.id,
                        skipped,
                        "Progress subscriber lagged, oldest events dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Adapt into a stream that ends with the job's channel.
    pub fn into_stream(self) -> Pin<Box<dyn Stream<Item = ProgressEvent> + Send>> {
        Box::pin(futures_util::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        }))
    }
}
