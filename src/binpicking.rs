//! Bin-picking task client

use serde_json::Value;
use std::time::Duration;
use crate::{
    capabilities::{Dispatch, Jog, Viewer},
    config::RobotDefaults,
    dispatcher::CommandDispatcher,
    params::TaskParameters,
    Result,
};

pub const BINPICKING_TASKTYPE: &str = "binpicking";
pub const DEFAULT_BINPICKING_TASKNAME: &str = "binpickingtask1";

/// Commands of the `binpicking` task type
///
/// Every command is merged over the configured robot defaults, so
/// `robotname`, `toolname`, `robotspeed` and `robotaccelmult` only need to be
/// passed when a call should differ from them.
#[derive(Clone)]
pub struct BinpickingClient {
    dispatcher: CommandDispatcher,
    robot_defaults: TaskParameters,
}

impl BinpickingClient {
    pub fn new(dispatcher: CommandDispatcher, robot: &RobotDefaults) -> Self {
        let robot_defaults = TaskParameters::new()
            .with_opt("robotname", robot.robotname.clone())
            .with_opt("toolname", robot.toolname.clone())
            .with_opt("robotspeed", robot.robotspeed)
            .with_opt("robotaccelmult", robot.robotaccelmult);
        Self {
            dispatcher,
            robot_defaults,
        }
    }

    pub async fn get_joint_values(&self, timeout: Option<Duration>) -> Result<Value> {
        self.send_command(TaskParameters::command("GetJointValues"), timeout).await
    }

    /// Move the robot to joint values; `jointindices` selects the joints
    /// `goaljoints` refers to when not all joints are given
    pub async fn move_joints(
        &self,
        goaljoints: &[f64],
        jointindices: Option<&[usize]>,
        options: TaskParameters,
    ) -> Result<Value> {
        let params = options
            .with("command", "MoveJoints")
            .with("goaljoints", goaljoints.to_vec())
            .with_opt("jointindices", jointindices.map(|indices| indices.to_vec()));
        self.send_command(params, None).await
    }

    /// Move the tool to a hand pose; `goaltype` is e.g. "transform6d"
    pub async fn move_to_hand_position(
        &self,
        goaltype: &str,
        goals: &[f64],
        options: TaskParameters,
    ) -> Result<Value> {
        let params = options
            .with("command", "MoveToHandPosition")
            .with("goaltype", goaltype)
            .with("goals", goals.to_vec());
        self.send_command(params, None).await
    }

    pub async fn pick_and_place(
        &self,
        goaltype: &str,
        goals: &[f64],
        targetnamepattern: Option<&str>,
        options: TaskParameters,
    ) -> Result<Value> {
        let params = options
            .with("command", "PickAndPlace")
            .with("goaltype", goaltype)
            .with("goals", goals.to_vec())
            .with_opt("targetnamepattern", targetnamepattern);
        self.send_command(params, None).await
    }

    pub async fn start_pick_and_place_thread(&self, options: TaskParameters) -> Result<Value> {
        self.send_command(options.with("command", "StartPickAndPlaceThread"), None).await
    }

    pub async fn stop_pick_and_place_thread(&self, options: TaskParameters) -> Result<Value> {
        self.send_command(options.with("command", "StopPickAndPlaceThread"), None).await
    }

    pub async fn get_pick_and_place_status(&self, timeout: Option<Duration>) -> Result<Value> {
        self.send_command(TaskParameters::command("GetPickAndPlaceStatus"), timeout).await
    }

    pub async fn is_robot_occluding_source_container(&self, options: TaskParameters) -> Result<bool> {
        let output = self
            .send_command(options.with("command", "IsRobotOccludingSourceContainer"), None)
            .await?;
        Ok(output
            .get("occluding")
            .and_then(Value::as_bool)
            .or_else(|| output.as_bool())
            .unwrap_or(false))
    }

    /// Pose of a scene object; `unit` is "m" or "mm"
    pub async fn get_transform(&self, targetname: &str, unit: &str) -> Result<Value> {
        let params = TaskParameters::command("GetTransform")
            .with("targetname", targetname)
            .with("unit", unit);
        self.send_command(params, None).await
    }

    pub async fn set_transform(
        &self,
        targetname: &str,
        translation: [f64; 3],
        quaternion: Option<[f64; 4]>,
        unit: &str,
    ) -> Result<Value> {
        let params = TaskParameters::command("SetTransform")
            .with("targetname", targetname)
            .with("translation", translation.to_vec())
            .with_opt("quaternion", quaternion.map(|q| q.to_vec()))
            .with("unit", unit);
        self.send_command(params, None).await
    }

    /// Replace the detected objects in the planning environment
    pub async fn update_objects(&self, envstate: Value, options: TaskParameters) -> Result<Value> {
        let params = options
            .with("command", "UpdateObjects")
            .with("envstate", envstate);
        self.send_command(params, None).await
    }
}

impl Dispatch for BinpickingClient {
    fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    fn command_defaults(&self) -> TaskParameters {
        self.robot_defaults.clone()
    }
}

impl Jog for BinpickingClient {}

impl Viewer for BinpickingClient {}
