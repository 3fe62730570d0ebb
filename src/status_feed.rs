//! Background subscriber for controller status messages
//!
//! The controller publishes its state as JSON on a ZeroMQ PUB socket. A
//! `StatusFeed` reads that stream on a background task and keeps only the
//! most recent message, which callers read without blocking or wait on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeromq::{Socket, SocketRecv, SubSocket};
use crate::{ControllerError, Result};

/// Stream of decoded status messages
#[async_trait]
pub trait StatusSource: Send + 'static {
    /// Wait for the next message; a `Json` error skips one malformed message,
    /// any other error ends the feed
    async fn next_message(&mut self) -> Result<Value>;
}

/// `StatusSource` over a ZeroMQ SUB socket subscribed to every topic
pub struct ZmqStatusSource {
    socket: SubSocket,
}

impl ZmqStatusSource {
    /// Connect and subscribe; the socket retries refused connections, so
    /// `timeout` bounds the whole attempt
    pub async fn connect(endpoint: &str, timeout: Duration) -> Result<Self> {
        let mut socket = SubSocket::new();
        let subscribed = tokio::time::timeout(timeout, async {
            socket
                .connect(endpoint)
                .await
                .map_err(|e| ControllerError::Transport(format!("Failed to connect to {}: {}", endpoint, e)))?;
            socket.subscribe("").await?;
            Ok::<_, ControllerError>(())
        })
        .await;

        match subscribed {
            Ok(result) => result?,
            Err(_) => {
                return Err(ControllerError::timeout(
                    format!("status publisher at {}", endpoint),
                    timeout,
                ))
            }
        }
        debug!("Subscribed to status publisher at {}", endpoint);
        Ok(Self { socket })
    }
}

#[async_trait]
impl StatusSource for ZmqStatusSource {
    async fn next_message(&mut self) -> Result<Value> {
        let message = self.socket.recv().await?;
        // Topic frames come first, the JSON body is the last frame
        let body = message
            .len()
            .checked_sub(1)
            .and_then(|last| message.get(last))
            .ok_or_else(|| ControllerError::Transport("Empty status message".to_string()))?;
        Ok(serde_json::from_slice(body)?)
    }
}

/// One received status message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub sequence: u64,
    pub received_at: DateTime<Utc>,
    pub status: Value,
}

/// Latest-value view of a status stream
#[derive(Debug)]
pub struct StatusFeed {
    receiver: watch::Receiver<Option<StatusSnapshot>>,
    shutdown: watch::Sender<bool>,
    task_handle: Option<JoinHandle<()>>,
}

impl StatusFeed {
    /// Spawn the background reader; must be called inside a tokio runtime
    pub fn start<S: StatusSource>(mut source: S) -> Self {
        let (snapshot_sender, receiver) = watch::channel(None);
        let (shutdown, mut shutdown_receiver) = watch::channel(false);

        let task_handle = tokio::spawn(async move {
            info!("Status feed started");
            let mut sequence = 0u64;

            loop {
                tokio::select! {
                    _ = shutdown_receiver.changed() => break,
                    message = source.next_message() => match message {
                        Ok(status) => {
                            sequence += 1;
                            let snapshot = StatusSnapshot {
                                sequence,
                                received_at: Utc::now(),
                                status,
                            };
                            if snapshot_sender.send(Some(snapshot)).is_err() {
                                break;
                            }
                        }
                        Err(ControllerError::Json(e)) => {
                            debug!("Skipping malformed status message: {}", e);
                        }
                        Err(e) => {
                            warn!("Status feed ended: {}", e);
                            break;
                        }
                    },
                }
            }
            info!("Status feed stopped after {} message(s)", sequence);
        });

        Self {
            receiver,
            shutdown,
            task_handle: Some(task_handle),
        }
    }

    /// Most recent snapshot (non-blocking)
    pub fn latest(&self) -> Option<StatusSnapshot> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next snapshot; `None` once the feed has ended
    pub async fn next(&mut self) -> Option<StatusSnapshot> {
        self.receiver.changed().await.ok()?;
        self.receiver.borrow_and_update().clone()
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Signal shutdown and wait for the background task to exit
    pub async fn stop(mut self) -> Result<()> {
        // Fails only when the task already exited
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.task_handle.take() {
            handle.await?;
        }
        Ok(())
    }
}

impl Drop for StatusFeed {
    fn drop(&mut self) {
        if let Some(handle) = &self.task_handle {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct ChannelSource {
        messages: mpsc::UnboundedReceiver<String>,
        dropped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl StatusSource for ChannelSource {
        async fn next_message(&mut self) -> Result<Value> {
            match self.messages.recv().await {
                Some(text) => Ok(serde_json::from_str(&text)?),
                None => Err(ControllerError::Transport("publisher closed".to_string())),
            }
        }
    }

    impl Drop for ChannelSource {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    fn feed() -> (StatusFeed, mpsc::UnboundedSender<String>, Arc<AtomicBool>) {
        let (sender, messages) = mpsc::unbounded_channel();
        let dropped = Arc::new(AtomicBool::new(false));
        let source = ChannelSource {
            messages,
            dropped: Arc::clone(&dropped),
        };
        (StatusFeed::start(source), sender, dropped)
    }

    #[tokio::test]
    async fn test_latest_tracks_newest_message() {
        let (mut feed, sender, _) = feed();
        assert!(feed.latest().is_none());

        sender.send(r#"{"isRobotMoving": false}"#.to_string()).unwrap();
        let first = feed.next().await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(first.status, json!({"isRobotMoving": false}));

        sender.send("not json".to_string()).unwrap();
        sender.send(r#"{"isRobotMoving": true}"#.to_string()).unwrap();
        let second = feed.next().await.unwrap();
        assert_eq!(second.sequence, 2);
        assert_eq!(feed.latest().unwrap().status, json!({"isRobotMoving": true}));
    }

    #[tokio::test]
    async fn test_stop_waits_for_task_exit() {
        let (feed, _sender, dropped) = feed();
        assert!(feed.is_running());

        feed.stop().await.unwrap();
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_feed_ends_when_source_closes() {
        let (mut feed, sender, dropped) = feed();
        drop(sender);

        assert!(feed.next().await.is_none());
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unreachable_publisher_times_out() {
        // Bind then release a port so nothing listens on it
        let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let endpoint = format!("tcp://127.0.0.1:{}", port);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            ZmqStatusSource::connect(&endpoint, Duration::from_millis(100)),
        )
        .await
        .expect("connect must honour its timeout");

        match result {
            Err(err) => assert!(err.is_timeout(), "unexpected error: {}", err),
            Ok(_) => panic!("connected to an endpoint nobody listens on"),
        }
    }
}
