//! ctrlclient - async client for bin-picking and calibration controllers
//!
//! Commands are sent to a controller task either over a ZeroMQ
//! request/reply socket, where the reply is the result, or through the web
//! API, where the command becomes a job that is polled until it finishes and
//! then cleaned up.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ctrlclient::ControllerClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = ControllerClient::connect_with_config("config/controller.yaml").await?;
//!
//!     let binpicking = controller.binpicking(None);
//!     let joints = binpicking.get_joint_values(None).await?;
//!     println!("Joint values: {}", joints);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **ControllerClient**: Owns the web session, queue connection and scene
//! - **CommandDispatcher**: Builds command payloads and picks the transport
//! - **JobPoller**: Drives one web API job to completion
//! - **HttpSession** / **QueueClient**: Web API and ZeroMQ transports
//! - **BinpickingClient** / **HandEyeCalibrationClient**: Task commands
//! - **StatusFeed**: Background subscriber for controller status
//! - **JobObserver**: Transport-agnostic progress reporting

pub mod binpicking;
pub mod capabilities;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handeye;
pub mod job;
pub mod params;
pub mod poller;
pub mod status_feed;
pub mod telemetry;
pub mod webclient;
pub mod zmq_client;

#[cfg(test)]
mod testing;

// High-level exports for easy usage
pub use client::ControllerClient;
pub use binpicking::BinpickingClient;
pub use handeye::{HandEyeCalibrationClient, SensorSelection};
pub use capabilities::{Dispatch, Jog, Viewer};
pub use config::ControllerConfig;
pub use error::{ControllerError, Result};
pub use params::{SceneParams, TaskParameters};

// Core component exports for advanced usage
pub use dispatcher::{normalize_reply, CommandDispatcher, Route, SharedQueue};
pub use job::{JobProgress, JobState, JobStatus, TaskResult};
pub use poller::{JobPoller, PollOptions, PollOutcome, TaskRef};
pub use status_feed::{StatusFeed, StatusSnapshot, StatusSource, ZmqStatusSource};
pub use telemetry::{ChannelObserver, ConsoleObserver, JobObserver, NoOpObserver};
pub use webclient::{HttpSession, WebApi};
pub use zmq_client::{QueueClient, ReplyChannel, ZmqChannel};
