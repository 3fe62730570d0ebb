//! Capabilities shared by task clients
//!
//! A task client exposes its dispatcher through `Dispatch`; jogging and
//! viewer control are layered on top as separate traits so each client opts
//! into the capabilities it supports.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use crate::{dispatcher::{CommandDispatcher, Route}, params::TaskParameters, Result};

/// Access to the dispatcher behind a task client
#[async_trait]
pub trait Dispatch: Send + Sync {
    fn dispatcher(&self) -> &CommandDispatcher;

    /// Transport used when the caller does not pick one
    fn default_route(&self) -> Route {
        if self.dispatcher().has_queue() {
            Route::Queue
        } else {
            Route::WebApi
        }
    }

    /// Parameters merged under every command of this client
    fn command_defaults(&self) -> TaskParameters {
        TaskParameters::new()
    }

    /// Send a command over the default route
    async fn send_command(&self, params: TaskParameters, timeout: Option<Duration>) -> Result<Value> {
        self.send_command_via(params, self.default_route(), timeout).await
    }

    async fn send_command_via(
        &self,
        mut params: TaskParameters,
        route: Route,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        params.fill_defaults(&self.command_defaults());
        self.dispatcher().execute(params, route, timeout).await
    }
}

/// Joint jogging
#[async_trait]
pub trait Jog: Dispatch {
    /// Start or update jogging; each entry of `movejointsigns` is -1, 0 or 1
    async fn set_jog_mode_velocities(&self, movejointsigns: &[i32], options: TaskParameters) -> Result<Value> {
        let params = options
            .with("command", "SetJogModeVelocities")
            .with("movejointsigns", movejointsigns.to_vec());
        self.send_command(params, None).await
    }

    async fn end_jog_mode(&self, options: TaskParameters) -> Result<Value> {
        self.send_command(options.with("command", "EndJogMode"), None).await
    }
}

/// 3D viewer control
#[async_trait]
pub trait Viewer: Dispatch {
    async fn set_viewer_from_parameters(&self, viewerparameters: Value) -> Result<Value> {
        let params = TaskParameters::command("SetViewerFromParameters").with("viewerparameters", viewerparameters);
        self.send_command(params, None).await
    }

    async fn move_camera_zoom_out(&self, zoommult: f64, zoomdelta: f64) -> Result<Value> {
        let params = TaskParameters::command("MoveCameraZoomOut")
            .with("zoommult", zoommult)
            .with("zoomdelta", zoomdelta);
        self.send_command(params, None).await
    }
}
