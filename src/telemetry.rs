//! Job progress reporting
//!
//! The poller reports every observed poll to a `JobObserver`, so callers can
//! surface progress without being coupled to how it is displayed.

use async_trait::async_trait;
use tokio::sync::mpsc;
use crate::job::JobProgress;

/// Receives progress updates while a job is polled
#[async_trait]
pub trait JobObserver: Send + Sync {
    /// Called once per poll with the monotonic progress value
    async fn on_progress(&self, progress: &JobProgress);

    /// Called only when the status text differs from the previous poll
    async fn on_status_text(&self, progress: &JobProgress) {
        let _ = progress;
    }
}

/// Discards all progress updates
#[derive(Debug, Clone, Default)]
pub struct NoOpObserver;

#[async_trait]
impl JobObserver for NoOpObserver {
    async fn on_progress(&self, _progress: &JobProgress) {}
}

/// Prints status-text changes to stdout as JSON lines
#[derive(Debug, Clone)]
pub struct ConsoleObserver {
    pub pretty_print: bool,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        Self { pretty_print: false }
    }

    pub fn pretty() -> Self {
        Self { pretty_print: true }
    }
}

impl Default for ConsoleObserver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobObserver for ConsoleObserver {
    async fn on_progress(&self, _progress: &JobProgress) {}

    async fn on_status_text(&self, progress: &JobProgress) {
        let rendered = if self.pretty_print {
            serde_json::to_string_pretty(progress)
        } else {
            serde_json::to_string(progress)
        };
        if let Ok(json) = rendered {
            println!("[JOB] {}", json);
        }
    }
}

/// Forwards every progress update into an mpsc channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<JobProgress>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<JobProgress>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl JobObserver for ChannelObserver {
    async fn on_progress(&self, progress: &JobProgress) {
        // Receiver gone means nobody is listening any more
        let _ = self.sender.send(progress.clone());
    }
}
