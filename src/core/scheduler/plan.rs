use serde_json::{Map, Value};

use crate::core::jobs::NewJob;
use crate::core::store::{PlannedJob, Trigger};

pub fn controller_name(trigger: &Trigger) -> String {
    trigger
        .settings
        .get("controller_name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}-controller", trigger.trigger_type))
}

fn job_categories(trigger: &Trigger) -> Vec<String> {
    trigger
        .settings
        .get("job_categories")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Query for one firing: the trigger's metadata plus the scan window.
/// `from` is left out on the first firing so controllers do a full onboarding scan.
pub fn scan_query(trigger: &Trigger, now: i64) -> Map<String, Value> {
    let mut query = match &trigger.metadata {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("metadata".into(), other.clone());
            map
        }
    };
    if let Some(integration_id) = &trigger.integration_id {
        query.insert("integration_id".into(), Value::from(integration_id.clone()));
    }
    if let Some(last) = trigger.iteration_ts {
        query.insert("from".into(), Value::from(last));
    }
    query.insert("to".into(), Value::from(now));
    if let Some(metadata) = trigger.settings.get("integration_metadata") {
        query.insert("integration_metadata".into(), metadata.clone());
    }
    query
}

/// The jobs one firing of `trigger` creates. Category splits are partial scans.
pub fn plan_jobs(trigger: &Trigger, now: i64, default_attempt_max: Option<i64>) -> Vec<PlannedJob> {
    let base_query = scan_query(trigger, now);
    let attempt_max = trigger
        .settings
        .get("attempt_max")
        .and_then(Value::as_i64)
        .or(default_attempt_max);
    let template = NewJob {
        controller_name: controller_name(trigger),
        query: Value::Null,
        tenant_id: trigger.tenant_id.clone(),
        integration_id: trigger.integration_id.clone(),
        reserved: trigger.reserved(),
        tags: vec![trigger.trigger_type.clone()],
        parent_id: None,
        attempt_max,
        callback_url: trigger.callback_url.clone(),
        intermediate_state: None,
    };

    let categories = job_categories(trigger);
    if categories.is_empty() {
        return vec![PlannedJob {
            job: NewJob {
                query: Value::Object(base_query),
                ..template
            },
            partial: false,
        }];
    }
    categories
        .into_iter()
        .map(|category| {
            let mut query = base_query.clone();
            query.insert("job_category".into(), Value::from(category.clone()));
            let mut job = template.clone();
            job.query = Value::Object(query);
            job.tags.push(category);
            PlannedJob { job, partial: true }
        })
        .collect()
}
