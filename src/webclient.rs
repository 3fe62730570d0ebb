//! Controller web API client
//!
//! `HttpSession` holds the authenticated HTTP session (cookie store, CSRF
//! token, credentials) for one controller connection. The resource
//! operations the job poller needs are expressed as the `WebApi` trait so the
//! poller and dispatcher do not depend on HTTP directly.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};
use urlencoding::encode;
use crate::{
    config::WebConfig,
    job::{primary_key, JobState, TaskResult},
    params::TaskParameters,
    ControllerError, Result,
};

/// Header carrying the CSRF token on unsafe requests
pub const CSRF_HEADER: &str = "X-CSRFToken";
const CSRF_COOKIE: &str = "csrftoken";
const API_PREFIX: &str = "api/v1/";

/// Task and job resources of the controller web API
#[async_trait]
pub trait WebApi: Send + Sync {
    /// Look up a task by name and type in the scene, creating it when absent
    async fn get_or_create_task(&self, scenepk: &str, name: &str, tasktype: &str) -> Result<String>;

    /// Overwrite the task's parameters
    async fn set_task_parameters(
        &self,
        scenepk: &str,
        taskpk: &str,
        tasktype: &str,
        params: &TaskParameters,
    ) -> Result<()>;

    /// Run the task synchronously and return the raw response
    async fn execute_task_sync(&self, scenepk: &str, taskpk: &str) -> Result<Value>;

    /// Start an asynchronous execution of the task, returning the job key
    async fn create_job(&self, taskpk: &str) -> Result<String>;

    async fn get_job(&self, jobpk: &str) -> Result<JobState>;

    async fn delete_job(&self, jobpk: &str) -> Result<()>;

    /// Delete every job visible to this user
    async fn delete_jobs(&self) -> Result<()>;

    /// Latest result entry of the task, if any
    async fn get_task_result(&self, taskpk: &str) -> Result<Option<TaskResult>>;
}

/// Authenticated HTTP session against one controller
#[derive(Debug)]
pub struct HttpSession {
    client: reqwest::Client,
    api_url: String,
    username: String,
    password: String,
    csrf_token: Option<String>,
    http_timeout: Duration,
}

impl HttpSession {
    /// Log in and capture the CSRF token issued by the controller
    pub async fn login(config: &WebConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| ControllerError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        let api_url = format!("{}/{}", config.url.trim_end_matches('/'), API_PREFIX);
        info!("Logging in to controller at {} as {}", api_url, config.username);

        let http_timeout = config.http_timeout();
        let response = client
            .get(&api_url)
            .basic_auth(&config.username, Some(&config.password))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| http_error(e, http_timeout))?;

        let status = response.status().as_u16();
        let csrf_token = response
            .cookies()
            .find(|cookie| cookie.name() == CSRF_COOKIE)
            .map(|cookie| cookie.value().to_string());
        let body = response.text().await.map_err(|e| http_error(e, http_timeout))?;

        if status == 401 || status == 403 {
            return Err(ControllerError::Authentication(format!(
                "controller rejected credentials for user '{}' (HTTP {})",
                config.username, status
            )));
        }
        decode_response(status, &body)?;

        if csrf_token.is_none() {
            debug!("Controller did not issue a CSRF token");
        }
        info!("Logged in to controller");

        Ok(Self {
            client,
            api_url,
            username: config.username.clone(),
            password: config.password.clone(),
            csrf_token,
            http_timeout,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.api_url, path);
        debug!("{} {}", method, url);

        let mut builder = self
            .client
            .request(method.clone(), &url)
            .basic_auth(&self.username, Some(&self.password))
            .header(ACCEPT, "application/json");
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if method != Method::GET {
            if let Some(token) = &self.csrf_token {
                builder = builder.header(CSRF_HEADER, token);
            }
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| http_error(e, self.http_timeout))?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| http_error(e, self.http_timeout))?;
        decode_response(status, &text)
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        self.request(Method::GET, path, query, None).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.request(Method::POST, path, &[], Some(body)).await
    }

    async fn put(&self, path: &str, body: &Value) -> Result<Value> {
        self.request(Method::PUT, path, &[], Some(body)).await
    }

    async fn delete(&self, path: &str) -> Result<Value> {
        self.request(Method::DELETE, path, &[], None).await
    }
}

#[async_trait]
impl WebApi for HttpSession {
    async fn get_or_create_task(&self, scenepk: &str, name: &str, tasktype: &str) -> Result<String> {
        let path = format!("scene/{}/task/", encode(scenepk));
        let found = self
            .get(&path, &[("name", name), ("tasktype", tasktype), ("fields", "pk,tasktype")])
            .await?;

        let existing = found
            .get("objects")
            .and_then(Value::as_array)
            .and_then(|objects| objects.first())
            .and_then(|task| task.get("pk"))
            .and_then(primary_key);
        if let Some(taskpk) = existing {
            return Ok(taskpk);
        }

        info!("Creating task '{}' of type {} in scene {}", name, tasktype, scenepk);
        let created = self
            .post(&path, &json!({"name": name, "tasktype": tasktype, "taskparameters": {}}))
            .await?;
        created
            .get("pk")
            .or_else(|| created.get("id"))
            .and_then(primary_key)
            .ok_or_else(|| missing_key("task creation", &created))
    }

    async fn set_task_parameters(
        &self,
        scenepk: &str,
        taskpk: &str,
        tasktype: &str,
        params: &TaskParameters,
    ) -> Result<()> {
        let path = format!("scene/{}/task/{}/", encode(scenepk), encode(taskpk));
        self.put(&path, &json!({"tasktype": tasktype, "taskparameters": params}))
            .await?;
        Ok(())
    }

    async fn execute_task_sync(&self, scenepk: &str, taskpk: &str) -> Result<Value> {
        let path = format!("scene/{}/task/{}/", encode(scenepk), encode(taskpk));
        self.post(&path, &json!({})).await
    }

    async fn create_job(&self, taskpk: &str) -> Result<String> {
        let created = self
            .post("job/", &json!({"resource_type": "task", "target_pk": taskpk}))
            .await?;
        ["jobpk", "pk", "id"]
            .iter()
            .find_map(|key| created.get(*key).and_then(primary_key))
            .ok_or_else(|| missing_key("job creation", &created))
    }

    async fn get_job(&self, jobpk: &str) -> Result<JobState> {
        let value = self.get(&format!("job/{}/", encode(jobpk)), &[]).await?;
        JobState::from_value(&value)
    }

    async fn delete_job(&self, jobpk: &str) -> Result<()> {
        self.delete(&format!("job/{}/", encode(jobpk))).await?;
        Ok(())
    }

    async fn delete_jobs(&self) -> Result<()> {
        self.delete("job/").await?;
        Ok(())
    }

    async fn get_task_result(&self, taskpk: &str) -> Result<Option<TaskResult>> {
        let value = self
            .get(&format!("task/{}/result/", encode(taskpk)), &[("limit", "1")])
            .await?;

        if let Some(objects) = value.get("objects").and_then(Value::as_array) {
            return Ok(objects.first().map(TaskResult::from_value));
        }
        if value.is_object() {
            return Ok(Some(TaskResult::from_value(&value)));
        }
        Ok(None)
    }
}

/// Classify an HTTP response and decode its JSON body
pub fn decode_response(status: u16, body: &str) -> Result<Value> {
    if status == 401 || status == 403 {
        return Err(ControllerError::Authentication(format!(
            "HTTP {}: {}",
            status,
            summarize(body)
        )));
    }

    let parsed: Option<Value> = serde_json::from_str(body).ok();

    if !(200..300).contains(&status) {
        let (message, traceback) = match &parsed {
            Some(value) => (
                ["error_message", "message", "detail", "error"]
                    .iter()
                    .find_map(|key| value.get(*key).and_then(Value::as_str))
                    .map(str::to_string)
                    .unwrap_or_else(|| summarize(body)),
                value.get("traceback").and_then(Value::as_str).map(str::to_string),
            ),
            None => (summarize(body), None),
        };
        return Err(ControllerError::Server {
            status,
            message,
            traceback,
        });
    }

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    parsed.ok_or_else(|| ControllerError::Server {
        status,
        message: format!("invalid JSON in response: {}", summarize(body)),
        traceback: None,
    })
}

/// Report client-side timeouts with the configured limit
fn http_error(err: reqwest::Error, http_timeout: Duration) -> ControllerError {
    if err.is_timeout() {
        let operation = match err.url() {
            Some(url) => format!("HTTP response from {}", url),
            None => "HTTP response".to_string(),
        };
        ControllerError::timeout(operation, http_timeout)
    } else {
        err.into()
    }
}

fn summarize(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() > 200 {
        let cut = (0..=200).rev().find(|i| trimmed.is_char_boundary(*i)).unwrap_or(0);
        format!("{}...", &trimmed[..cut])
    } else {
        trimmed.to_string()
    }
}

fn missing_key(operation: &str, response: &Value) -> ControllerError {
    ControllerError::Server {
        status: 200,
        message: format!("{} response has no primary key: {}", operation, response),
        traceback: None,
    }
}
