use tokio::sync::broadcast;

/// Lifecycle notification published by the scheduler.
///
/// Events carry identity only; observers re-read the job for its current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronEvent {
    Added { job_id: String },
    Removed { job_id: String },
    Updated { job_id: String },
    /// Published before and again after each execution.
    Fired { job_id: String },
    Error { job_id: String, message: String },
}

impl CronEvent {
    pub fn job_id(&self) -> &str {
        match self {
            CronEvent::Added { job_id }
            | CronEvent::Removed { job_id }
            | CronEvent::Updated { job_id }
            | CronEvent::Fired { job_id }
            | CronEvent::Error { job_id, .. } => job_id,
        }
    }
}

/// Broadcast fan-out. Publishing never waits on subscribers; a slow one
/// lags and skips events instead.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<CronEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CronEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: CronEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}
