//! In-memory `WebApi` used by unit tests

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use crate::{
    job::{JobState, JobStatus, TaskResult},
    params::TaskParameters,
    webclient::WebApi,
    ControllerError, Result,
};

pub enum PollStep {
    State(JobState),
    ServerError(u16),
}

#[derive(Debug, Default, Clone)]
pub struct Calls {
    pub created_tasks: Vec<(String, String)>,
    pub parameter_updates: Vec<TaskParameters>,
    pub sync_executions: usize,
    pub jobs_created: usize,
    pub job_polls: usize,
    pub result_fetches: usize,
    pub deleted_jobs: Vec<String>,
    pub delete_all: usize,
}

/// Replays a fixed sequence of job statuses; keeps answering "running"
/// once the script is exhausted
pub struct ScriptedApi {
    steps: Mutex<VecDeque<PollStep>>,
    result: Option<TaskResult>,
    sync_response: Value,
    failing_deletes: Mutex<usize>,
    calls: Mutex<Calls>,
}

impl ScriptedApi {
    pub fn new(steps: Vec<PollStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            result: None,
            sync_response: json!({}),
            failing_deletes: Mutex::new(0),
            calls: Mutex::new(Calls::default()),
        }
    }

    pub fn with_result(mut self, result: TaskResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_sync_response(mut self, response: Value) -> Self {
        self.sync_response = response;
        self
    }

    /// Make the next `count` job deletions fail
    pub fn failing_deletes(self, count: usize) -> Self {
        *self.failing_deletes.lock().unwrap() = count;
        self
    }

    pub fn calls(&self) -> Calls {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebApi for ScriptedApi {
    async fn get_or_create_task(&self, _scenepk: &str, name: &str, tasktype: &str) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .created_tasks
            .push((name.to_string(), tasktype.to_string()));
        Ok("task-1".to_string())
    }

    async fn set_task_parameters(
        &self,
        _scenepk: &str,
        _taskpk: &str,
        _tasktype: &str,
        params: &TaskParameters,
    ) -> Result<()> {
        self.calls.lock().unwrap().parameter_updates.push(params.clone());
        Ok(())
    }

    async fn execute_task_sync(&self, _scenepk: &str, _taskpk: &str) -> Result<Value> {
        self.calls.lock().unwrap().sync_executions += 1;
        Ok(self.sync_response.clone())
    }

    async fn create_job(&self, _taskpk: &str) -> Result<String> {
        let mut calls = self.calls.lock().unwrap();
        calls.jobs_created += 1;
        Ok(format!("job-{}", calls.jobs_created))
    }

    async fn get_job(&self, _jobpk: &str) -> Result<JobState> {
        self.calls.lock().unwrap().job_polls += 1;
        match self.steps.lock().unwrap().pop_front() {
            Some(PollStep::State(state)) => Ok(state),
            Some(PollStep::ServerError(status)) => Err(ControllerError::Server {
                status,
                message: "job not found".to_string(),
                traceback: None,
            }),
            None => Ok(JobState::new(JobStatus::Running)),
        }
    }

    async fn delete_job(&self, jobpk: &str) -> Result<()> {
        let mut failing = self.failing_deletes.lock().unwrap();
        if *failing > 0 {
            *failing -= 1;
            return Err(ControllerError::Server {
                status: 500,
                message: "delete failed".to_string(),
                traceback: None,
            });
        }
        drop(failing);
        self.calls.lock().unwrap().deleted_jobs.push(jobpk.to_string());
        Ok(())
    }

    async fn delete_jobs(&self) -> Result<()> {
        self.calls.lock().unwrap().delete_all += 1;
        Ok(())
    }

    async fn get_task_result(&self, _taskpk: &str) -> Result<Option<TaskResult>> {
        self.calls.lock().unwrap().result_fetches += 1;
        Ok(self.result.clone())
    }
}
