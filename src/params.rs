//! Task parameter maps and scene parameters
//!
//! Commands are plain JSON objects. `TaskParameters` wraps the object and
//! implements the merge rule used everywhere in the crate: values set by the
//! caller always win over defaults supplied by the dispatcher or a
//! capability client.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use crate::config::SceneConfig;

/// Mapping from parameter name to JSON value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskParameters(Map<String, Value>);

impl TaskParameters {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Start a parameter map for the named command
    pub fn command(name: &str) -> Self {
        Self::new().with("command", name)
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Insert only when the value is present
    pub fn with_opt<V: Into<Value>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.with(key, v),
            None => self,
        }
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.to_string(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Name of the command, if set
    pub fn command_name(&self) -> Option<&str> {
        self.0.get("command").and_then(Value::as_str)
    }

    /// Overlay `self` on top of `defaults`; keys present in `self` win
    pub fn merged_over(&self, defaults: &TaskParameters) -> TaskParameters {
        let mut merged = defaults.0.clone();
        for (key, value) in &self.0 {
            merged.insert(key.clone(), value.clone());
        }
        TaskParameters(merged)
    }

    /// Fill keys that are absent in `self` from `defaults`
    pub fn fill_defaults(&mut self, defaults: &TaskParameters) {
        for (key, value) in &defaults.0 {
            if !self.0.contains_key(key) {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for TaskParameters {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for TaskParameters {
    type Error = crate::ControllerError;

    fn try_from(value: Value) -> crate::Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(crate::ControllerError::InvalidCommand(format!(
                "task parameters must be a JSON object, got {}",
                other
            ))),
        }
    }
}

/// Scene description sent as `sceneparams` with every command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneParams {
    #[serde(skip)]
    pub scenepk: String,
    pub scenetype: String,
    pub sceneuri: String,
    pub scale: [f64; 3],
}

impl SceneParams {
    pub fn new(scenepk: &str) -> Self {
        Self {
            scenepk: scenepk.to_string(),
            scenetype: "scene".to_string(),
            sceneuri: format!("scene:/{}", scenepk),
            scale: [1e-3, 1e-3, 1e-3],
        }
    }

    pub fn from_config(config: &SceneConfig) -> Self {
        let mut params = Self::new(&config.scenepk);
        if let Some(scenetype) = &config.scenetype {
            params.scenetype = scenetype.clone();
        }
        if let Some(sceneuri) = &config.sceneuri {
            params.sceneuri = sceneuri.clone();
        }
        if let Some(scale) = config.scale {
            params.scale = scale;
        }
        params
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "scenetype": self.scenetype,
            "sceneuri": self.sceneuri,
            "scale": self.scale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_caller_values_override_defaults() {
        let defaults = TaskParameters::new()
            .with("tasktype", "binpicking")
            .with("robotspeed", 0.5);
        let caller = TaskParameters::command("MoveJoints").with("robotspeed", 1.0);

        let merged = caller.merged_over(&defaults);

        assert_eq!(merged.get("robotspeed"), Some(&json!(1.0)));
        assert_eq!(merged.get("tasktype"), Some(&json!("binpicking")));
        assert_eq!(merged.command_name(), Some("MoveJoints"));
    }

    #[test]
    fn test_fill_defaults_keeps_existing_keys() {
        let mut params = TaskParameters::new().with("toolname", "suction");
        params.fill_defaults(&TaskParameters::new().with("toolname", "gripper").with("robotname", "arm1"));

        assert_eq!(params.get("toolname"), Some(&json!("suction")));
        assert_eq!(params.get("robotname"), Some(&json!("arm1")));
    }

    #[test]
    fn test_with_opt_skips_none() {
        let params = TaskParameters::new()
            .with_opt("speed", Some(0.2))
            .with_opt::<f64>("accel", None);
        assert!(params.contains_key("speed"));
        assert!(!params.contains_key("accel"));
    }

    #[test]
    fn test_try_from_rejects_non_object() {
        assert!(TaskParameters::try_from(json!([1, 2])).is_err());
        let params = TaskParameters::try_from(json!({"command": "Ping"})).unwrap();
        assert_eq!(params.command_name(), Some("Ping"));
    }

    #[test]
    fn test_scene_params_from_config() {
        let config = SceneConfig {
            scenepk: "cell1.scene".to_string(),
            scenetype: None,
            sceneuri: None,
            scale: Some([1.0, 1.0, 1.0]),
        };
        let scene = SceneParams::from_config(&config);
        assert_eq!(
            scene.to_value(),
            json!({"scenetype": "scene", "sceneuri": "scene:/cell1.scene", "scale": [1.0, 1.0, 1.0]})
        );
    }
}
