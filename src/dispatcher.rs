//! Command dispatcher
//!
//! Builds the command payload for one task, routes it over the message queue
//! or the web API, and turns every remote failure into a `ControllerError`.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use crate::{
    params::{SceneParams, TaskParameters},
    poller::{JobPoller, PollOptions, TaskRef},
    telemetry::{JobObserver, NoOpObserver},
    webclient::WebApi,
    zmq_client::QueueClient,
    ControllerError, Result,
};

/// Queue connection shared by every dispatcher of one controller
pub type SharedQueue = Arc<Mutex<QueueClient>>;

/// Keys of jobs whose deletion failed, shared by every dispatcher of a task
pub type StaleJobs = Arc<Mutex<Vec<String>>>;

/// Transport a command is sent over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// ZeroMQ request/reply; the reply is the result
    Queue,
    /// Web API job, polled to completion
    WebApi,
}

/// Executes commands against one task resource
#[derive(Clone)]
pub struct CommandDispatcher {
    api: Arc<dyn WebApi>,
    queue: Option<SharedQueue>,
    scene: SceneParams,
    task: TaskRef,
    poll: PollOptions,
    slave_request_id: Option<String>,
    observer: Arc<dyn JobObserver>,
    // Jobs whose deletion failed, cleared before the next web execution
    stale_jobs: StaleJobs,
}

impl CommandDispatcher {
    pub fn new(api: Arc<dyn WebApi>, scene: SceneParams, task: TaskRef, poll: PollOptions) -> Self {
        Self {
            api,
            queue: None,
            scene,
            task,
            poll,
            slave_request_id: None,
            observer: Arc::new(NoOpObserver),
            stale_jobs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_queue(mut self, queue: SharedQueue, slave_request_id: Option<String>) -> Self {
        self.queue = Some(queue);
        self.slave_request_id = slave_request_id;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn JobObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Share the stale-job list with other dispatchers of the same task
    pub fn with_stale_jobs(mut self, stale_jobs: StaleJobs) -> Self {
        self.stale_jobs = stale_jobs;
        self
    }

    pub fn task(&self) -> &TaskRef {
        &self.task
    }

    pub fn scene(&self) -> &SceneParams {
        &self.scene
    }

    pub fn has_queue(&self) -> bool {
        self.queue.is_some()
    }

    pub fn poll_options(&self) -> &PollOptions {
        &self.poll
    }

    /// Run a command and return its output
    ///
    /// `timeout` overrides the configured budget for this call.
    pub async fn execute(&self, params: TaskParameters, route: Route, timeout: Option<Duration>) -> Result<Value> {
        let payload = self.build_payload(&params, route)?;
        debug!(
            "Dispatching {} for task '{}' via {:?}",
            payload.command_name().unwrap_or_default(),
            self.task.name,
            route
        );

        match route {
            Route::Queue => self.execute_via_queue(payload, timeout).await,
            Route::WebApi => self.execute_via_webapi(payload, timeout).await,
        }
    }

    /// Run a command through the web API's synchronous execute endpoint
    pub async fn execute_sync(&self, params: TaskParameters) -> Result<Value> {
        let payload = self.build_payload(&params, Route::WebApi)?;
        let scenepk = &self.scene.scenepk;

        let taskpk = self
            .api
            .get_or_create_task(scenepk, &self.task.name, &self.task.tasktype)
            .await?;
        self.api
            .set_task_parameters(scenepk, &taskpk, &self.task.tasktype, &payload)
            .await?;
        let response = self.api.execute_task_sync(scenepk, &taskpk).await?;
        normalize_reply(response)
    }

    /// Merge the caller's parameters over the command-required fields
    pub fn build_payload(&self, params: &TaskParameters, route: Route) -> Result<TaskParameters> {
        let mut defaults = TaskParameters::new()
            .with("tasktype", self.task.tasktype.as_str())
            .with("sceneparams", self.scene.to_value());
        if route == Route::Queue {
            defaults = defaults.with_opt("slaverequestid", self.slave_request_id.as_deref());
        }

        let payload = params.merged_over(&defaults);
        match payload.command_name() {
            Some(name) if !name.trim().is_empty() => Ok(payload),
            _ => Err(ControllerError::InvalidCommand(
                "parameters must include a non-empty 'command'".to_string(),
            )),
        }
    }

    async fn execute_via_queue(&self, payload: TaskParameters, timeout: Option<Duration>) -> Result<Value> {
        let queue = self.queue.as_ref().ok_or_else(|| {
            ControllerError::Config("no command queue configured for this controller".to_string())
        })?;

        let command = payload.into_value();
        let reply = {
            let mut client = queue.lock().await;
            client.send_command(&command, timeout).await?
        };
        normalize_reply(reply)
    }

    async fn execute_via_webapi(&self, payload: TaskParameters, timeout: Option<Duration>) -> Result<Value> {
        self.purge_stale_jobs().await;

        let mut options = self.poll.clone();
        if timeout.is_some() {
            options.timeout = timeout;
        }

        let poller = JobPoller::new(self.api.as_ref(), options, self.observer.as_ref());
        let outcome = poller.run(&self.scene.scenepk, &self.task, &payload).await;

        if let Some(jobpk) = outcome.undeleted_job {
            self.stale_jobs.lock().await.push(jobpk);
        }
        outcome.result
    }

    /// Delete jobs left behind by earlier executions of this task
    pub async fn purge_stale_jobs(&self) {
        let pending = std::mem::take(&mut *self.stale_jobs.lock().await);
        if pending.is_empty() {
            return;
        }

        info!("Clearing {} stale job(s) for task '{}'", pending.len(), self.task.name);
        let mut remaining = Vec::new();
        for jobpk in pending {
            match self.api.delete_job(&jobpk).await {
                Ok(()) | Err(ControllerError::Server { status: 404, .. }) => {}
                Err(err) => {
                    warn!("Stale job {} still not deleted: {}", jobpk, err);
                    remaining.push(jobpk);
                }
            }
        }
        self.stale_jobs.lock().await.extend(remaining);
    }

    pub async fn stale_jobs(&self) -> Vec<String> {
        self.stale_jobs.lock().await.clone()
    }
}

/// Classify a direct command reply
///
/// A reply carrying `error` or `exception`, or a `status` other than
/// "succeeded", is a task error. Otherwise the `output` field is returned
/// when present and the whole reply when not.
pub fn normalize_reply(reply: Value) -> Result<Value> {
    let mut object = match reply {
        Value::Object(object) => object,
        other => return Ok(other),
    };

    for key in ["error", "exception"] {
        if let Some(error) = object.get(key) {
            if let Some(err) = classify_error(error) {
                return Err(err);
            }
        }
    }

    if let Some(status) = object.get("status").and_then(Value::as_str) {
        if status != "succeeded" {
            let message = object
                .get("status_text")
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("command finished with status '{}'", status));
            return Err(ControllerError::Task {
                code: Some(status.to_string()),
                message,
            });
        }
    }

    Ok(object.remove("output").unwrap_or(Value::Object(object)))
}

fn classify_error(error: &Value) -> Option<ControllerError> {
    match error {
        Value::Null | Value::Bool(false) => None,
        Value::String(message) if message.is_empty() => None,
        Value::String(message) => Some(ControllerError::task(message.clone())),
        Value::Object(details) => {
            let code = ["errorcode", "type", "code"]
                .iter()
                .find_map(|key| details.get(*key))
                .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|c| c.to_string())));
            let message = ["description", "desc", "message", "errormessage"]
                .iter()
                .find_map(|key| details.get(*key).and_then(Value::as_str))
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            Some(ControllerError::Task { code, message })
        }
        other => Some(ControllerError::task(other.to_string())),
    }
}
