//! Configuration loading for controller connections

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use reqwest::Url;
use crate::{ControllerError, Result};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    pub controller: WebConfig,
    pub scene: SceneConfig,
    pub queue: Option<QueueConfig>,
    pub polling: Option<PollingConfig>,
    pub status_feed: Option<StatusFeedConfig>,
    pub robot: Option<RobotDefaults>,
}

/// Web API endpoint and credentials
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub http_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SceneConfig {
    pub scenepk: String,
    pub scenetype: Option<String>,
    pub sceneuri: Option<String>,
    pub scale: Option<[f64; 3]>,
}

/// ZeroMQ request/reply endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    pub host: String,
    pub port: u16,
    pub timeout_seconds: Option<f64>,
    pub slave_request_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PollingConfig {
    pub interval_ms: Option<u64>,
    pub timeout_seconds: Option<f64>,
    pub assume_finished_on_poll_error: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusFeedConfig {
    pub host: Option<String>,
    pub port: u16,
    pub connect_timeout_seconds: Option<f64>,
}

/// Robot parameters merged under every binpicking command
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RobotDefaults {
    pub robotname: Option<String>,
    pub toolname: Option<String>,
    pub robotspeed: Option<f64>,
    pub robotaccelmult: Option<f64>,
}

impl ControllerConfig {
    pub fn load_from_path(config_path: impl AsRef<Path>) -> Result<Self> {
        let path = config_path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| ControllerError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(contents: &str) -> Result<Self> {
        let config: ControllerConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.controller.url.trim().is_empty() {
            return Err(ControllerError::Config("controller.url must not be empty".to_string()));
        }
        if self.controller.host().is_none() {
            return Err(ControllerError::Config(format!(
                "controller.url '{}' is not an absolute URL with a host",
                self.controller.url
            )));
        }
        if self.scene.scenepk.trim().is_empty() {
            return Err(ControllerError::Config("scene.scenepk must not be empty".to_string()));
        }
        if let Some(polling) = &self.polling {
            if polling.interval_ms == Some(0) {
                return Err(ControllerError::Config("polling.interval_ms must be positive".to_string()));
            }
            check_seconds("polling.timeout_seconds", polling.timeout_seconds)?;
        }
        if let Some(queue) = &self.queue {
            check_seconds("queue.timeout_seconds", queue.timeout_seconds)?;
        }
        if let Some(feed) = &self.status_feed {
            check_seconds("status_feed.connect_timeout_seconds", feed.connect_timeout_seconds)?;
        }
        Ok(())
    }

    /// Get polling configuration with defaults
    pub fn polling(&self) -> PollingConfig {
        self.polling.clone().unwrap_or_default()
    }

    /// Get robot defaults, empty when not configured
    pub fn robot(&self) -> RobotDefaults {
        self.robot.clone().unwrap_or_default()
    }

    /// ZeroMQ endpoint of the status publisher, falling back to the web API host
    pub fn status_feed_endpoint(&self) -> Option<String> {
        let feed = self.status_feed.as_ref()?;
        let host = feed.host.clone().or_else(|| self.controller.host())?;
        Some(format!("tcp://{}:{}", host, feed.port))
    }
}

fn check_seconds(field: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(seconds) if !seconds.is_finite() || seconds < 0.0 => Err(ControllerError::Config(format!(
            "{} must be a non-negative number of seconds, got {}",
            field, seconds
        ))),
        _ => Ok(()),
    }
}

/// Seconds to `Duration`, falling back to `default` for values `validate` rejects
fn seconds_or(value: Option<f64>, default: f64) -> Duration {
    value
        .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
        .unwrap_or_else(|| Duration::from_secs_f64(default))
}

impl WebConfig {
    /// Get HTTP request timeout with default fallback
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds.unwrap_or(10))
    }

    /// Host part of the controller URL; IPv6 literals keep their brackets
    pub fn host(&self) -> Option<String> {
        let url = Url::parse(&self.url).ok()?;
        url.host_str().map(str::to_string)
    }
}

impl QueueConfig {
    pub fn endpoint(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }

    /// Get reply timeout with default fallback
    pub fn timeout(&self) -> Duration {
        seconds_or(self.timeout_seconds, 10.0)
    }
}

impl StatusFeedConfig {
    /// Get publisher connect timeout with default fallback
    pub fn connect_timeout(&self) -> Duration {
        seconds_or(self.connect_timeout_seconds, 10.0)
    }
}

impl PollingConfig {
    /// Get poll interval with default fallback
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.unwrap_or(500))
    }

    /// Get overall job timeout with default fallback
    pub fn timeout(&self) -> Duration {
        seconds_or(self.timeout_seconds, 60.0)
    }

    /// Whether a failed status poll is taken to mean the job already finished
    pub fn assume_finished_on_poll_error(&self) -> bool {
        self.assume_finished_on_poll_error.unwrap_or(true)
    }
}
