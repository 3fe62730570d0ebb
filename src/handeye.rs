//! Hand-eye calibration task client

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use crate::{
    capabilities::{Dispatch, Viewer},
    dispatcher::{CommandDispatcher, Route},
    params::TaskParameters,
    Result,
};

pub const HANDEYE_TASKTYPE: &str = "handeyecalibration";
pub const DEFAULT_HANDEYE_TASKNAME: &str = "handeyecalibrationtask1";

/// Camera picked out by the sensor body and sensor names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSelection {
    pub sensorname: String,
    pub sensorlinkname: String,
}

impl SensorSelection {
    pub fn new(sensorname: &str, sensorlinkname: &str) -> Self {
        Self {
            sensorname: sensorname.to_string(),
            sensorlinkname: sensorlinkname.to_string(),
        }
    }

    fn to_value(&self) -> Value {
        serde_json::json!({
            "sensorName": self.sensorname,
            "sensorLinkName": self.sensorlinkname,
        })
    }
}

/// Commands of the `handeyecalibration` task type
///
/// Calibration planning can run for minutes, so commands always go through
/// the web API job path and honour the poll timeout rather than the queue
/// reply timeout.
#[derive(Clone)]
pub struct HandEyeCalibrationClient {
    dispatcher: CommandDispatcher,
}

impl HandEyeCalibrationClient {
    pub fn new(dispatcher: CommandDispatcher) -> Self {
        Self { dispatcher }
    }

    /// Plan robot poses that show the calibration board to one camera
    pub async fn compute_calibration_poses(
        &self,
        sensor: &SensorSelection,
        numsamples: u32,
        calibboardobjectname: &str,
        options: TaskParameters,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let params = options
            .with("command", "ComputeCalibrationPoses")
            .with("primarySensorSelectionInfo", sensor.to_value())
            .with("numsamples", numsamples)
            .with("calibboardObjectName", calibboardobjectname);
        self.send_command(params, timeout).await
    }

    /// Plan poses for a stereo pair; the board must be visible to both cameras
    pub async fn compute_stereo_calibration_poses(
        &self,
        primary: &SensorSelection,
        secondary: &[SensorSelection],
        numsamples: u32,
        calibboardobjectname: &str,
        options: TaskParameters,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let secondaries: Vec<Value> = secondary.iter().map(SensorSelection::to_value).collect();
        let params = options
            .with("command", "ComputeStereoCalibrationPoses")
            .with("primarySensorSelectionInfo", primary.to_value())
            .with("secondarySensorSelectionInfos", secondaries)
            .with("numsamples", numsamples)
            .with("calibboardObjectName", calibboardobjectname);
        self.send_command(params, timeout).await
    }

    /// Reprojection error of captured calibration images
    pub async fn compute_calibration_error(
        &self,
        sensor: &SensorSelection,
        imagecaptures: Value,
        options: TaskParameters,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let params = options
            .with("command", "ComputeCalibrationError")
            .with("primarySensorSelectionInfo", sensor.to_value())
            .with("imageCaptures", imagecaptures);
        self.send_command(params, timeout).await
    }
}

impl Dispatch for HandEyeCalibrationClient {
    fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    fn default_route(&self) -> Route {
        Route::WebApi
    }
}

impl Viewer for HandEyeCalibrationClient {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobState, JobStatus, TaskResult};
    use crate::params::SceneParams;
    use crate::poller::{PollOptions, TaskRef};
    use crate::testing::{PollStep, ScriptedApi};
    use crate::ControllerError;
    use serde_json::json;
    use std::sync::Arc;

    fn client(api: Arc<ScriptedApi>) -> HandEyeCalibrationClient {
        let dispatcher = CommandDispatcher::new(
            api,
            SceneParams::new("calib.scene"),
            TaskRef::new(DEFAULT_HANDEYE_TASKNAME, HANDEYE_TASKTYPE),
            PollOptions {
                interval: Duration::from_millis(1),
                timeout: Some(Duration::from_secs(5)),
                assume_finished_on_poll_error: true,
            },
        );
        HandEyeCalibrationClient::new(dispatcher)
    }

    #[tokio::test]
    async fn test_calibration_poses_use_job_path() {
        let api = Arc::new(
            ScriptedApi::new(vec![
                PollStep::State(JobState::new(JobStatus::Running).with_progress(0.5)),
                PollStep::State(JobState::new(JobStatus::Succeeded).with_progress(1.0)),
            ])
            .with_result(TaskResult {
                output: json!({"poses": [[1, 0, 0, 0, 0, 0, 0]]}),
                ..Default::default()
            }),
        );
        let c = client(Arc::clone(&api));

        let output = c
            .compute_calibration_poses(
                &SensorSelection::new("camera1", "link0"),
                20,
                "calibboard",
                TaskParameters::new(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(output["poses"], json!([[1, 0, 0, 0, 0, 0, 0]]));

        let calls = api.calls();
        assert_eq!(calls.created_tasks[0].1, "handeyecalibration");
        let written = &calls.parameter_updates[0];
        assert_eq!(written.command_name(), Some("ComputeCalibrationPoses"));
        assert_eq!(written.get("numsamples"), Some(&json!(20)));
        assert_eq!(
            written.get("primarySensorSelectionInfo"),
            Some(&json!({"sensorName": "camera1", "sensorLinkName": "link0"}))
        );
    }

    #[tokio::test]
    async fn test_stereo_poses_include_secondary_sensors() {
        let api = Arc::new(
            ScriptedApi::new(vec![PollStep::State(JobState::new(JobStatus::Succeeded))])
                .with_result(TaskResult::default()),
        );
        let c = client(Arc::clone(&api));

        c.compute_stereo_calibration_poses(
            &SensorSelection::new("camera1", "left"),
            &[SensorSelection::new("camera1", "right")],
            10,
            "calibboard",
            TaskParameters::new(),
            None,
        )
        .await
        .unwrap();

        let written = &api.calls().parameter_updates[0];
        assert_eq!(
            written.get("secondarySensorSelectionInfos"),
            Some(&json!([{"sensorName": "camera1", "sensorLinkName": "right"}]))
        );
    }

    #[tokio::test]
    async fn test_calibration_error_surfaces_task_error() {
        let api = Arc::new(
            ScriptedApi::new(vec![PollStep::State(JobState::new(JobStatus::Failed))]).with_result(TaskResult {
                errormessage: Some("calibration board not detected".to_string()),
                ..Default::default()
            }),
        );
        let c = client(api);

        let err = c
            .compute_calibration_error(
                &SensorSelection::new("camera1", "link0"),
                json!([]),
                TaskParameters::new(),
                None,
            )
            .await
            .unwrap_err();
        match err {
            ControllerError::Task { message, .. } => assert_eq!(message, "calibration board not detected"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
