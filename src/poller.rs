//! Job poller for asynchronous web API execution
//!
//! One execution moves through `Created -> Submitted -> Polling` and ends in
//! success, failure or timeout. Once a job was submitted it is deleted on
//! every exit path; a deletion that fails is handed back to the caller so it
//! can be retried before the next execution.

use serde_json::Value;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use crate::{
    config::PollingConfig,
    job::{Disposition, ProgressTracker},
    params::TaskParameters,
    telemetry::JobObserver,
    webclient::WebApi,
    ControllerError, Result,
};

/// Task resource targeted by a dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskRef {
    pub name: String,
    pub tasktype: String,
}

impl TaskRef {
    pub fn new(name: &str, tasktype: &str) -> Self {
        Self {
            name: name.to_string(),
            tasktype: tasktype.to_string(),
        }
    }
}

/// Polling behaviour for one execution
#[derive(Debug, Clone, PartialEq)]
pub struct PollOptions {
    pub interval: Duration,
    /// Overall wall-clock budget; `None` waits indefinitely
    pub timeout: Option<Duration>,
    /// Treat a failing status request as "job already finished".
    /// Best effort only: a transient server failure looks the same.
    pub assume_finished_on_poll_error: bool,
}

impl Default for PollOptions {
    fn default() -> Self {
        PollOptions::from(&PollingConfig::default())
    }
}

impl From<&PollingConfig> for PollOptions {
    fn from(config: &PollingConfig) -> Self {
        Self {
            interval: config.interval(),
            timeout: Some(config.timeout()),
            assume_finished_on_poll_error: config.assume_finished_on_poll_error(),
        }
    }
}

/// Execution states, used for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Created,
    Submitted,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
}

/// Result of one execution plus any job that could not be deleted
#[derive(Debug)]
pub struct PollOutcome {
    pub result: Result<Value>,
    pub undeleted_job: Option<String>,
}

impl PollOutcome {
    fn before_submit(err: ControllerError) -> Self {
        Self {
            result: Err(err),
            undeleted_job: None,
        }
    }

    pub fn final_state(&self) -> PollState {
        match &self.result {
            Ok(_) => PollState::Succeeded,
            Err(err) if err.is_timeout() => PollState::TimedOut,
            Err(_) => PollState::Failed,
        }
    }
}

struct TrackedJob {
    jobpk: String,
    known_deleted: bool,
}

pub struct JobPoller<'a> {
    api: &'a dyn WebApi,
    options: PollOptions,
    observer: &'a dyn JobObserver,
}

impl<'a> JobPoller<'a> {
    pub fn new(api: &'a dyn WebApi, options: PollOptions, observer: &'a dyn JobObserver) -> Self {
        Self { api, options, observer }
    }

    /// Write the parameters to the task, run it as a job and return its output
    pub async fn run(&self, scenepk: &str, task: &TaskRef, params: &TaskParameters) -> PollOutcome {
        let started = Instant::now();
        let deadline = self.options.timeout.map(|t| started + t);
        let command = params.command_name().unwrap_or("<none>").to_string();

        debug!("{:?}: preparing task '{}' for {}", PollState::Created, task.name, command);
        let taskpk = match self.prepare(scenepk, task, params, deadline).await {
            Ok(taskpk) => taskpk,
            Err(err) => return PollOutcome::before_submit(err),
        };

        let jobpk = match self.bounded(self.api.create_job(&taskpk), deadline, "job submission").await {
            Ok(jobpk) => jobpk,
            Err(err) => return PollOutcome::before_submit(err),
        };
        info!("{:?}: job {} for {} on task {}", PollState::Submitted, jobpk, command, taskpk);

        let mut job = TrackedJob {
            jobpk,
            known_deleted: false,
        };
        let result = self.wait_and_fetch(&taskpk, &mut job, deadline).await;
        let undeleted_job = self.cleanup(&job).await;

        let outcome = PollOutcome { result, undeleted_job };
        debug!("Job {} for {} ended in {:?} after {:?}", job.jobpk, command, outcome.final_state(), started.elapsed());
        outcome
    }

    async fn prepare(
        &self,
        scenepk: &str,
        task: &TaskRef,
        params: &TaskParameters,
        deadline: Option<Instant>,
    ) -> Result<String> {
        let taskpk = self
            .bounded(
                self.api.get_or_create_task(scenepk, &task.name, &task.tasktype),
                deadline,
                "task lookup",
            )
            .await?;
        self.bounded(
            self.api.set_task_parameters(scenepk, &taskpk, &task.tasktype, params),
            deadline,
            "task parameter update",
        )
        .await?;
        Ok(taskpk)
    }

    async fn wait_and_fetch(
        &self,
        taskpk: &str,
        job: &mut TrackedJob,
        deadline: Option<Instant>,
    ) -> Result<Value> {
        let mut tracker = ProgressTracker::new();
        debug!("{:?}: job {}", PollState::Polling, job.jobpk);

        loop {
            match self.bounded(self.api.get_job(&job.jobpk), deadline, "job completion").await {
                Ok(state) => {
                    let progress = tracker.observe(&job.jobpk, &state);
                    if progress.text_changed {
                        info!("Job {} [{}] {} ({:.0}%)", job.jobpk, progress.status, progress.status_text, progress.progress * 100.0);
                        self.observer.on_status_text(&progress).await;
                    }
                    self.observer.on_progress(&progress).await;

                    match state.status.disposition() {
                        Disposition::Finished => break,
                        Disposition::Fatal => {
                            error!("Job {} entered fatal state {}", job.jobpk, state.status);
                            return Err(ControllerError::FatalJobState {
                                jobpk: job.jobpk.clone(),
                                status: state.status.to_string(),
                            });
                        }
                        Disposition::Pending => {}
                    }
                }
                Err(ControllerError::Server { status, message, .. })
                    if self.options.assume_finished_on_poll_error =>
                {
                    warn!(
                        "Polling job {} failed (HTTP {}: {}); assuming it already finished",
                        job.jobpk, status, message
                    );
                    if status == 404 {
                        job.known_deleted = true;
                    }
                    break;
                }
                Err(err) => return Err(err),
            }

            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(self.timeout_error("job completion"));
                }
                tokio::time::sleep(self.options.interval.min(deadline - now)).await;
            } else {
                tokio::time::sleep(self.options.interval).await;
            }
        }

        let entry = self
            .bounded(self.api.get_task_result(taskpk), deadline, "task result")
            .await?;
        match entry {
            Some(entry) => entry.into_output(),
            None => Err(ControllerError::task(format!("task {} has no result", taskpk))),
        }
    }

    async fn cleanup(&self, job: &TrackedJob) -> Option<String> {
        if job.known_deleted {
            return None;
        }
        match self.api.delete_job(&job.jobpk).await {
            Ok(()) => {
                debug!("Deleted job {}", job.jobpk);
                None
            }
            Err(ControllerError::Server { status: 404, .. }) => None,
            Err(err) => {
                warn!("Failed to delete job {}: {}", job.jobpk, err);
                Some(job.jobpk.clone())
            }
        }
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T>>,
        deadline: Option<Instant>,
        what: &str,
    ) -> Result<T> {
        match deadline {
            None => operation.await,
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                tokio::time::timeout(remaining, operation)
                    .await
                    .map_err(|_| self.timeout_error(what))?
            }
        }
    }

    fn timeout_error(&self, what: &str) -> ControllerError {
        ControllerError::timeout(what, self.options.timeout.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobState, JobStatus, TaskResult};
    use crate::telemetry::{ChannelObserver, NoOpObserver};
    use crate::testing::{PollStep, ScriptedApi};
    use serde_json::json;

    fn options() -> PollOptions {
        PollOptions {
            interval: Duration::from_millis(1),
            timeout: Some(Duration::from_secs(5)),
            assume_finished_on_poll_error: true,
        }
    }

    fn task() -> TaskRef {
        TaskRef::new("binpickingtask1", "binpicking")
    }

    fn state(status: &str) -> PollStep {
        PollStep::State(JobState::new(JobStatus::parse(status)).with_text(status))
    }

    #[tokio::test]
    async fn test_immediate_success_returns_output() {
        let api = ScriptedApi::new(vec![state("succeeded")]).with_result(TaskResult {
            output: json!({"currentjointvalues": [0, 0, 0, 0, 0, 0]}),
            ..Default::default()
        });
        let params = TaskParameters::command("GetJointValues");

        let poller = JobPoller::new(&api, options(), &NoOpObserver);
        let outcome = poller.run("prod.scene", &task(), &params).await;

        assert_eq!(
            outcome.result.unwrap(),
            json!({"currentjointvalues": [0, 0, 0, 0, 0, 0]})
        );
        assert!(outcome.undeleted_job.is_none());

        let calls = api.calls();
        assert_eq!(calls.created_tasks, vec![("binpickingtask1".to_string(), "binpicking".to_string())]);
        assert_eq!(calls.parameter_updates[0].command_name(), Some("GetJointValues"));
        assert_eq!(calls.result_fetches, 1);
        assert_eq!(calls.deleted_jobs, vec!["job-1".to_string()]);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_text_logged_on_change() {
        let steps = [("queued", 0.0), ("running", 0.3), ("running", 0.25), ("succeeded", 1.0)]
            .iter()
            .map(|(s, p)| PollStep::State(JobState::new(JobStatus::parse(s)).with_text(s).with_progress(*p)))
            .collect();
        let api = ScriptedApi::new(steps).with_result(TaskResult::default());
        let (observer, mut updates) = ChannelObserver::new();

        let poller = JobPoller::new(&api, options(), &observer);
        let outcome = poller.run("prod.scene", &task(), &TaskParameters::command("PickAndPlace")).await;
        assert!(outcome.result.is_ok());
        drop(observer);

        let mut progress = Vec::new();
        let mut text_changes = Vec::new();
        while let Some(update) = updates.recv().await {
            progress.push(update.progress);
            if update.text_changed {
                text_changes.push(update.status_text);
            }
        }
        assert_eq!(progress, vec![0.0, 0.3, 0.3, 1.0]);
        assert_eq!(text_changes, vec!["queued", "running", "succeeded"]);
    }

    #[tokio::test]
    async fn test_finished_statuses_fetch_result_exactly_once() {
        for status in ["succeeded", "aborted", "2", "3", "4", "5", "8"] {
            let api = ScriptedApi::new(vec![state("running"), state(status)]).with_result(TaskResult::default());
            let poller = JobPoller::new(&api, options(), &NoOpObserver);
            let outcome = poller.run("prod.scene", &task(), &TaskParameters::command("Noop")).await;

            assert!(outcome.result.is_ok(), "status {}", status);
            assert_eq!(api.calls().result_fetches, 1, "status {}", status);
        }
    }

    #[tokio::test]
    async fn test_fatal_statuses_skip_result_fetch() {
        for status in ["lost", "preempted"] {
            let api = ScriptedApi::new(vec![state("running"), state(status)]).with_result(TaskResult::default());
            let poller = JobPoller::new(&api, options(), &NoOpObserver);
            let outcome = poller.run("prod.scene", &task(), &TaskParameters::command("Noop")).await;

            match outcome.result.unwrap_err() {
                ControllerError::FatalJobState { jobpk, status: reported } => {
                    assert_eq!(jobpk, "job-1");
                    assert_eq!(reported, status);
                }
                other => panic!("unexpected error: {:?}", other),
            }
            let calls = api.calls();
            assert_eq!(calls.result_fetches, 0);
            assert_eq!(calls.job_polls, 2);
            assert_eq!(calls.deleted_jobs, vec!["job-1".to_string()]);
        }
    }

    #[tokio::test]
    async fn test_poll_failure_assumes_job_finished() {
        let api = ScriptedApi::new(vec![PollStep::ServerError(500)]).with_result(TaskResult {
            output: json!("done"),
            ..Default::default()
        });
        let poller = JobPoller::new(&api, options(), &NoOpObserver);
        let outcome = poller.run("prod.scene", &task(), &TaskParameters::command("Noop")).await;

        assert_eq!(outcome.result.unwrap(), json!("done"));
        let calls = api.calls();
        assert_eq!(calls.job_polls, 1);
        assert_eq!(calls.result_fetches, 1);
        assert_eq!(calls.deleted_jobs, vec!["job-1".to_string()]);
    }

    #[tokio::test]
    async fn test_poll_failure_404_skips_delete() {
        let api = ScriptedApi::new(vec![PollStep::ServerError(404)]).with_result(TaskResult::default());
        let poller = JobPoller::new(&api, options(), &NoOpObserver);
        let outcome = poller.run("prod.scene", &task(), &TaskParameters::command("Noop")).await;

        assert!(outcome.result.is_ok());
        assert!(api.calls().deleted_jobs.is_empty());
    }

    #[tokio::test]
    async fn test_poll_failure_propagates_when_heuristic_disabled() {
        let api = ScriptedApi::new(vec![PollStep::ServerError(500)]).with_result(TaskResult::default());
        let mut opts = options();
        opts.assume_finished_on_poll_error = false;

        let poller = JobPoller::new(&api, opts, &NoOpObserver);
        let outcome = poller.run("prod.scene", &task(), &TaskParameters::command("Noop")).await;

        assert_eq!(outcome.result.unwrap_err().http_status(), Some(500));
        let calls = api.calls();
        assert_eq!(calls.result_fetches, 0);
        assert_eq!(calls.deleted_jobs, vec!["job-1".to_string()]);
    }

    #[tokio::test]
    async fn test_timeout_deletes_job() {
        // Exhausted script keeps reporting "running"
        let api = ScriptedApi::new(vec![]).with_result(TaskResult::default());
        let opts = PollOptions {
            interval: Duration::from_millis(5),
            timeout: Some(Duration::from_millis(40)),
            assume_finished_on_poll_error: true,
        };

        let poller = JobPoller::new(&api, opts, &NoOpObserver);
        let outcome = poller.run("prod.scene", &task(), &TaskParameters::command("Noop")).await;

        assert_eq!(outcome.final_state(), PollState::TimedOut);
        assert!(outcome.result.unwrap_err().is_timeout());
        let calls = api.calls();
        assert!(calls.job_polls >= 1);
        assert_eq!(calls.result_fetches, 0);
        assert_eq!(calls.deleted_jobs, vec!["job-1".to_string()]);
    }

    #[tokio::test]
    async fn test_result_error_message_is_task_error() {
        let api = ScriptedApi::new(vec![state("succeeded")]).with_result(TaskResult {
            errormessage: Some("no objects detected".to_string()),
            ..Default::default()
        });
        let poller = JobPoller::new(&api, options(), &NoOpObserver);
        let outcome = poller.run("prod.scene", &task(), &TaskParameters::command("PickAndPlace")).await;

        assert!(outcome.result.unwrap_err().is_task_error());
        assert_eq!(api.calls().deleted_jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_delete_is_reported() {
        let api = ScriptedApi::new(vec![state("succeeded")])
            .with_result(TaskResult::default())
            .failing_deletes(1);
        let poller = JobPoller::new(&api, options(), &NoOpObserver);
        let outcome = poller.run("prod.scene", &task(), &TaskParameters::command("Noop")).await;

        assert!(outcome.result.is_ok());
        assert_eq!(outcome.undeleted_job.as_deref(), Some("job-1"));
    }
}
