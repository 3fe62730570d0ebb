//! Controller connection facade
//!
//! `ControllerClient` owns everything that is shared by the task clients of
//! one controller: the web session, the optional command queue connection,
//! the scene parameters and the polling configuration. Task clients are
//! cheap handles created from it on demand.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::Mutex;
use tracing::info;
use crate::{
    binpicking::{BinpickingClient, BINPICKING_TASKTYPE, DEFAULT_BINPICKING_TASKNAME},
    config::ControllerConfig,
    dispatcher::{CommandDispatcher, SharedQueue, StaleJobs},
    handeye::{HandEyeCalibrationClient, DEFAULT_HANDEYE_TASKNAME, HANDEYE_TASKTYPE},
    params::SceneParams,
    poller::{PollOptions, TaskRef},
    status_feed::{StatusFeed, ZmqStatusSource},
    telemetry::{JobObserver, NoOpObserver},
    webclient::{HttpSession, WebApi},
    zmq_client::QueueClient,
    ControllerError, Result,
};

pub struct ControllerClient {
    api: Arc<dyn WebApi>,
    queue: Option<SharedQueue>,
    config: ControllerConfig,
    scene: SceneParams,
    poll: PollOptions,
    observer: Arc<dyn JobObserver>,
    // One list per task so a job left behind by one task client is cleared
    // by the next client of the same task
    stale_jobs: StdMutex<HashMap<TaskRef, StaleJobs>>,
}

impl ControllerClient {
    /// Log in to the web API and prepare the queue connection
    ///
    /// The queue socket itself is opened on the first queued command.
    pub async fn connect(config: ControllerConfig) -> Result<Self> {
        let session = HttpSession::login(&config.controller).await?;
        let queue = config.queue.as_ref().map(|queue| {
            info!("Using command queue at {}", queue.endpoint());
            Arc::new(Mutex::new(QueueClient::new(&queue.endpoint(), queue.timeout())))
        });
        Ok(Self::from_parts(Arc::new(session), queue, config))
    }

    pub async fn connect_with_config(config_path: impl AsRef<Path>) -> Result<Self> {
        let config = ControllerConfig::load_from_path(config_path)?;
        Self::connect(config).await
    }

    /// Assemble a client from an existing web API and queue
    pub fn from_parts(api: Arc<dyn WebApi>, queue: Option<SharedQueue>, config: ControllerConfig) -> Self {
        let scene = SceneParams::from_config(&config.scene);
        let poll = PollOptions::from(&config.polling());
        Self {
            api,
            queue,
            config,
            scene,
            poll,
            observer: Arc::new(NoOpObserver),
            stale_jobs: StdMutex::new(HashMap::new()),
        }
    }

    /// Report job progress of every task client created afterwards
    pub fn with_observer(mut self, observer: Arc<dyn JobObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn scenepk(&self) -> &str {
        &self.scene.scenepk
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Dispatcher for an arbitrary task of this scene
    pub fn dispatcher(&self, task: TaskRef) -> CommandDispatcher {
        let stale_jobs = self.stale_jobs_for(&task);
        let mut dispatcher = CommandDispatcher::new(Arc::clone(&self.api), self.scene.clone(), task, self.poll.clone())
            .with_observer(Arc::clone(&self.observer))
            .with_stale_jobs(stale_jobs);
        if let Some(queue) = &self.queue {
            let slave_request_id = self.config.queue.as_ref().and_then(|q| q.slave_request_id.clone());
            dispatcher = dispatcher.with_queue(Arc::clone(queue), slave_request_id);
        }
        dispatcher
    }

    fn stale_jobs_for(&self, task: &TaskRef) -> StaleJobs {
        // The map is only touched here, so a poisoned lock still holds valid data
        let mut lists = self.stale_jobs.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(lists.entry(task.clone()).or_default())
    }

    pub fn binpicking(&self, taskname: Option<&str>) -> BinpickingClient {
        let task = TaskRef::new(taskname.unwrap_or(DEFAULT_BINPICKING_TASKNAME), BINPICKING_TASKTYPE);
        BinpickingClient::new(self.dispatcher(task), &self.config.robot())
    }

    pub fn handeye(&self, taskname: Option<&str>) -> HandEyeCalibrationClient {
        let task = TaskRef::new(taskname.unwrap_or(DEFAULT_HANDEYE_TASKNAME), HANDEYE_TASKTYPE);
        HandEyeCalibrationClient::new(self.dispatcher(task))
    }

    /// Delete every job visible to this user, including other clients' jobs
    pub async fn delete_all_jobs(&self) -> Result<()> {
        info!("Deleting all jobs on the controller");
        self.api.delete_jobs().await
    }

    /// Subscribe to the controller's status publisher
    pub async fn start_status_feed(&self) -> Result<StatusFeed> {
        let (feed, endpoint) = self
            .config
            .status_feed
            .as_ref()
            .zip(self.config.status_feed_endpoint())
            .ok_or_else(|| ControllerError::Config("status_feed is not configured".to_string()))?;
        let source = ZmqStatusSource::connect(&endpoint, feed.connect_timeout()).await?;
        info!("Status feed connected to {}", endpoint);
        Ok(StatusFeed::start(source))
    }
}
