use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageCheckpoint {
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Value>,
}

/// Resumption state of a job, carried in its `intermediate_state`.
///
/// Keys this runner does not know about are kept as-is so checkpoints written
/// by newer agents survive a round trip through older ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default)]
    pub stages: BTreeMap<String, StageCheckpoint>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Checkpoint {
    /// An absent or unreadable state starts from scratch.
    pub fn parse(state: Option<&Value>) -> Self {
        let Some(state) = state else {
            return Self::default();
        };
        if state.is_null() {
            return Self::default();
        }
        match serde_json::from_value(state.clone()) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable intermediate state");
                Self::default()
            }
        }
    }

    pub fn is_completed(&self, stage: &str) -> bool {
        self.stages.get(stage).is_some_and(|s| s.completed)
    }

    pub fn cursor(&self, stage: &str) -> Option<Value> {
        self.stages.get(stage).and_then(|s| s.cursor.clone())
    }

    pub fn set_cursor(&mut self, stage: &str, cursor: Option<Value>) {
        self.stages.entry(stage.to_string()).or_default().cursor = cursor;
    }

    /// Completing a stage drops its cursor; it will never be paged again.
    pub fn mark_completed(&mut self, stage: &str) {
        let entry = self.stages.entry(stage.to_string()).or_default();
        entry.completed = true;
        entry.cursor = None;
    }

    pub fn completed_stages(&self) -> Vec<String> {
        self.stages
            .iter()
            .filter(|(_, s)| s.completed)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_or_garbage_state_is_empty() {
        assert_eq!(Checkpoint::parse(None), Checkpoint::default());
        assert_eq!(Checkpoint::parse(Some(&Value::Null)), Checkpoint::default());
        assert_eq!(
            Checkpoint::parse(Some(&json!({"stages": "nope"}))),
            Checkpoint::default()
        );
    }

    #[test]
    fn unknown_keys_survive_round_trip() {
        let raw = json!({
            "stages": {"commits": {"completed": true}},
            "project_cursor": {"project": "ENG", "offset": 40}
        });
        let mut checkpoint = Checkpoint::parse(Some(&raw));
        assert!(checkpoint.is_completed("commits"));
        checkpoint.set_cursor("prs", Some(json!("page-3")));

        let out = checkpoint.to_value();
        assert_eq!(out["project_cursor"]["offset"], 40);
        assert_eq!(out["stages"]["prs"]["cursor"], "page-3");
    }

    #[test]
    fn completing_a_stage_clears_its_cursor() {
        let mut checkpoint = Checkpoint::default();
        checkpoint.set_cursor("commits", Some(json!(7)));
        checkpoint.mark_completed("commits");
        assert!(checkpoint.is_completed("commits"));
        assert_eq!(checkpoint.cursor("commits"), None);
        assert_eq!(checkpoint.completed_stages(), vec!["commits".to_string()]);
    }
}
