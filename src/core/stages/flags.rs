use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagPolicy {
    /// Runs unless a flag explicitly says `false`.
    #[default]
    OptOut,
    /// Runs only when the integration explicitly turns it on.
    OptIn,
}

/// A feature flag gating one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFlag {
    pub name: String,
    #[serde(default)]
    pub policy: FlagPolicy,
}

impl StageFlag {
    pub fn opt_out(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: FlagPolicy::OptOut,
        }
    }

    pub fn opt_in(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: FlagPolicy::OptIn,
        }
    }

    /// Either source saying `false` disables the stage. Integration metadata and
    /// per-request flags never override each other's `false`.
    pub fn enabled(&self, integration_metadata: &Value, request_flags: &Map<String, Value>) -> bool {
        let from_metadata = integration_metadata.get(&self.name).and_then(Value::as_bool);
        let from_request = request_flags.get(&self.name).and_then(Value::as_bool);
        if from_metadata == Some(false) || from_request == Some(false) {
            return false;
        }
        match self.policy {
            FlagPolicy::OptOut => true,
            FlagPolicy::OptIn => from_metadata == Some(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(value: Option<bool>) -> Value {
        match value {
            Some(v) => json!({"fetch_prs": v}),
            None => json!({}),
        }
    }

    fn request(value: Option<bool>) -> Map<String, Value> {
        let mut flags = Map::new();
        if let Some(v) = value {
            flags.insert("fetch_prs".into(), Value::Bool(v));
        }
        flags
    }

    #[test]
    fn opt_out_truth_table() {
        let flag = StageFlag::opt_out("fetch_prs");
        let cases = [
            (None, None, true),
            (None, Some(true), true),
            (None, Some(false), false),
            (Some(true), None, true),
            (Some(true), Some(true), true),
            (Some(true), Some(false), false),
            (Some(false), None, false),
            (Some(false), Some(true), false),
            (Some(false), Some(false), false),
        ];
        for (meta, req, expected) in cases {
            assert_eq!(
                flag.enabled(&metadata(meta), &request(req)),
                expected,
                "metadata={meta:?} request={req:?}"
            );
        }
    }

    #[test]
    fn opt_in_truth_table() {
        let flag = StageFlag::opt_in("fetch_prs");
        let cases = [
            (None, None, false),
            (None, Some(true), false),
            (None, Some(false), false),
            (Some(true), None, true),
            (Some(true), Some(true), true),
            (Some(true), Some(false), false),
            (Some(false), None, false),
            (Some(false), Some(true), false),
            (Some(false), Some(false), false),
        ];
        for (meta, req, expected) in cases {
            assert_eq!(
                flag.enabled(&metadata(meta), &request(req)),
                expected,
                "metadata={meta:?} request={req:?}"
            );
        }
    }

    #[test]
    fn non_boolean_values_count_as_unset() {
        let flag = StageFlag::opt_out("fetch_prs");
        let meta = json!({"fetch_prs": "false"});
        assert!(flag.enabled(&meta, &Map::new()));
    }
}
