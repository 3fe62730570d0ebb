//! ZeroMQ request/reply command client
//!
//! Commands are sent as a single JSON frame and answered with a single JSON
//! frame. A REQ socket allows exactly one outstanding request, so the client
//! takes `&mut self` and callers share it behind a mutex.

use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use zeromq::{ReqSocket, Socket, SocketRecv, SocketSend, ZmqMessage};
use crate::{ControllerError, Result};

/// One request/reply connection
#[async_trait]
pub trait ReplyChannel: Send {
    /// (Re)create the underlying connection, discarding any previous one
    async fn connect(&mut self) -> Result<()>;

    /// Send one frame and wait for the reply frame
    async fn request(&mut self, frame: Vec<u8>) -> Result<Vec<u8>>;
}

#[async_trait]
impl<T: ReplyChannel + ?Sized> ReplyChannel for Box<T> {
    async fn connect(&mut self) -> Result<()> {
        (**self).connect().await
    }

    async fn request(&mut self, frame: Vec<u8>) -> Result<Vec<u8>> {
        (**self).request(frame).await
    }
}

/// `ReplyChannel` over a ZeroMQ REQ socket
pub struct ZmqChannel {
    endpoint: String,
    socket: Option<ReqSocket>,
}

impl ZmqChannel {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            socket: None,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ReplyChannel for ZmqChannel {
    async fn connect(&mut self) -> Result<()> {
        // Dropping the old socket discards a request left unanswered
        self.socket = None;
        let mut socket = ReqSocket::new();
        socket
            .connect(&self.endpoint)
            .await
            .map_err(|e| ControllerError::Transport(format!("Failed to connect to {}: {}", self.endpoint, e)))?;
        self.socket = Some(socket);
        debug!("Connected REQ socket to {}", self.endpoint);
        Ok(())
    }

    async fn request(&mut self, frame: Vec<u8>) -> Result<Vec<u8>> {
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| ControllerError::Transport("Not connected to command socket".to_string()))?;

        socket.send(ZmqMessage::from(frame)).await?;
        let reply = socket.recv().await?;
        reply
            .get(0)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| ControllerError::Transport("Empty reply message".to_string()))
    }
}

/// Command client with reconnect-once semantics
pub struct QueueClient<C: ReplyChannel = Box<dyn ReplyChannel>> {
    channel: C,
    connected: bool,
    default_timeout: Duration,
}

impl QueueClient {
    /// Create a client for `tcp://host:port`; the socket is opened lazily
    pub fn new(endpoint: &str, default_timeout: Duration) -> Self {
        Self::with_channel(Box::new(ZmqChannel::new(endpoint)), default_timeout)
    }
}

impl<C: ReplyChannel> QueueClient<C> {
    pub fn with_channel(channel: C, default_timeout: Duration) -> Self {
        Self {
            channel,
            connected: false,
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Send a command and wait for its reply
    ///
    /// Connecting, sending and waiting for the reply all share one budget.
    /// A socket error triggers one reconnect and resend. A missing reply
    /// within the budget is reported as `Timeout`, and the socket is
    /// recreated before the next command since the REQ state is unusable.
    pub async fn send_command(&mut self, command: &Value, timeout: Option<Duration>) -> Result<Value> {
        let budget = timeout.unwrap_or(self.default_timeout);
        let frame = serde_json::to_vec(command)?;
        let deadline = Instant::now() + budget;

        if !self.connected {
            self.connect_until(deadline, budget).await?;
        }

        let reply = match self.exchange(frame.clone(), deadline, budget).await {
            Ok(reply) => reply,
            Err(ControllerError::Transport(reason)) => {
                warn!("Command socket failed ({}), reconnecting and resending once", reason);
                self.connected = false;
                self.connect_until(deadline, budget).await?;

                match self.exchange(frame, deadline, budget).await {
                    Ok(reply) => reply,
                    Err(err) => {
                        self.connected = false;
                        return Err(err);
                    }
                }
            }
            Err(err) => {
                self.connected = false;
                return Err(err);
            }
        };

        serde_json::from_slice(&reply).map_err(|e| ControllerError::Server {
            status: 0,
            message: format!("invalid JSON in command reply: {}", e),
            traceback: None,
        })
    }

    async fn connect_until(&mut self, deadline: Instant, budget: Duration) -> Result<()> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, self.channel.connect()).await {
            Ok(result) => {
                result?;
                self.connected = true;
                Ok(())
            }
            Err(_) => {
                info!("Command socket not connected within {:?}", budget);
                Err(ControllerError::timeout("command socket connection", budget))
            }
        }
    }

    async fn exchange(&mut self, frame: Vec<u8>, deadline: Instant, budget: Duration) -> Result<Vec<u8>> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, self.channel.request(frame)).await {
            Ok(result) => result,
            Err(_) => {
                info!("No command reply within {:?}", budget);
                Err(ControllerError::timeout("command reply", budget))
            }
        }
    }
}
