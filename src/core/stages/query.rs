use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The known shape of a scan job's query. Anything else is kept in `extra`
/// and written back untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_id: Option<String>,
    /// Lower bound in epoch seconds. Absent on the onboarding scan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_category: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub ingestion_flags: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub integration_metadata: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ScanQuery {
    pub fn decode(query: &Value) -> Result<Self, serde_json::Error> {
        if query.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(query.clone())
    }

    pub fn is_onboarding(&self) -> bool {
        self.from.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_keys_are_preserved() {
        let raw = json!({
            "integration_id": "int-1",
            "from": 100,
            "to": 200,
            "ingestion_flags": {"fetch_prs": false},
            "projects": ["ENG", "OPS"],
        });
        let query = ScanQuery::decode(&raw).unwrap();
        assert_eq!(query.integration_id.as_deref(), Some("int-1"));
        assert!(!query.is_onboarding());
        assert_eq!(query.extra["projects"], json!(["ENG", "OPS"]));
        assert_eq!(serde_json::to_value(&query).unwrap(), raw);
    }

    #[test]
    fn null_query_is_an_onboarding_scan() {
        let query = ScanQuery::decode(&Value::Null).unwrap();
        assert!(query.is_onboarding());
        assert!(query.job_category.is_none());
    }

    #[test]
    fn wrongly_typed_known_key_is_an_error() {
        assert!(ScanQuery::decode(&json!({"from": "yesterday"})).is_err());
    }
}
