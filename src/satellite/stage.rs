use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::core::config::HttpStageConfig;
use crate::core::stages::{Stage, StageContext, StageError, StageFlag, StagePage};

#[derive(Deserialize)]
struct PageBody {
    #[serde(default)]
    records: Vec<Value>,
    #[serde(default)]
    next_cursor: Option<Value>,
    #[serde(default)]
    done: bool,
}

/// Generic paged source: `GET <url>?cursor=..` answering `{records, next_cursor, done}`.
pub struct HttpPagedStage {
    name: String,
    url: String,
    category: Option<String>,
    flag: Option<StageFlag>,
    onboarding_only: bool,
    client: Client,
}

impl HttpPagedStage {
    pub fn from_config(config: &HttpStageConfig, client: Client) -> Self {
        let flag = config.flag.as_ref().map(|name| {
            if config.opt_in {
                StageFlag::opt_in(name.as_str())
            } else {
                StageFlag::opt_out(name.as_str())
            }
        });
        Self {
            name: config.name.clone(),
            url: config.url.clone(),
            category: config.category.clone(),
            flag,
            onboarding_only: config.onboarding_only,
            client,
        }
    }

    fn params(ctx: &StageContext, cursor: Option<&Value>) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(cursor) = cursor {
            let cursor = match cursor {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            params.push(("cursor", cursor));
        }
        if let Some(integration_id) = &ctx.query.integration_id {
            params.push(("integration_id", integration_id.clone()));
        }
        if let Some(from) = ctx.query.from {
            params.push(("from", from.to_string()));
        }
        if let Some(to) = ctx.query.to {
            params.push(("to", to.to_string()));
        }
        if let Some(category) = &ctx.query.job_category {
            params.push(("job_category", category.clone()));
        }
        params
    }
}

#[async_trait]
impl Stage for HttpPagedStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    fn flag(&self) -> Option<&StageFlag> {
        self.flag.as_ref()
    }

    fn onboarding_only(&self) -> bool {
        self.onboarding_only
    }

    async fn run(&self, ctx: &StageContext, cursor: Option<Value>) -> Result<StagePage, StageError> {
        let resp = self
            .client
            .get(&self.url)
            .query(&Self::params(ctx, cursor.as_ref()))
            .send()
            .await
            .map_err(|e| StageError::Retryable(format!("GET {}: {}", self.url, e)))?;
        let status = resp.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(StageError::Retryable(format!("GET {} answered {}", self.url, status)));
        }
        if !status.is_success() {
            return Err(StageError::Fatal(format!("GET {} answered {}", self.url, status)));
        }
        let body: PageBody = resp
            .json()
            .await
            .map_err(|e| StageError::Fatal(format!("unreadable page from {}: {}", self.url, e)))?;
        Ok(StagePage {
            records: body.records,
            next_cursor: body.next_cursor.filter(|c| !c.is_null()),
            done: body.done,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stages::ScanQuery;
    use axum::{Json, Router, extract::Query, http::StatusCode, routing::get};
    use serde_json::json;
    use std::collections::HashMap;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn config(url: String) -> HttpStageConfig {
        HttpStageConfig {
            name: "issues".into(),
            url,
            category: Some("boards".into()),
            flag: Some("fetch_issues".into()),
            opt_in: true,
            onboarding_only: false,
        }
    }

    fn ctx() -> StageContext {
        StageContext {
            job_id: "job-1".into(),
            query: ScanQuery {
                integration_id: Some("int-1".into()),
                from: Some(100),
                ..Default::default()
            },
        }
    }

    #[test]
    fn config_maps_flag_policy() {
        let stage = HttpPagedStage::from_config(&config("http://x".into()), Client::new());
        assert_eq!(stage.flag(), Some(&StageFlag::opt_in("fetch_issues")));
        assert_eq!(stage.category(), Some("boards"));
    }

    #[tokio::test]
    async fn pages_forward_cursor_and_query() {
        let app = Router::new().route(
            "/issues",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q.get("integration_id").map(String::as_str), Some("int-1"));
                match q.get("cursor").map(String::as_str) {
                    None => Json(json!({"records": [{"id": 1}], "next_cursor": "p2", "done": false})),
                    Some("p2") => Json(json!({"records": [{"id": 2}], "next_cursor": null, "done": true})),
                    Some(other) => panic!("unexpected cursor {other}"),
                }
            }),
        );
        let base = serve(app).await;
        let stage = HttpPagedStage::from_config(&config(format!("{base}/issues")), Client::new());

        let first = stage.run(&ctx(), None).await.unwrap();
        assert_eq!(first.records, vec![json!({"id": 1})]);
        assert_eq!(first.next_cursor, Some(json!("p2")));
        let second = stage.run(&ctx(), first.next_cursor).await.unwrap();
        assert!(second.done);
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn status_codes_split_retryable_from_fatal() {
        let app = Router::new()
            .route("/flaky", get(|| async { StatusCode::BAD_GATEWAY }))
            .route("/gone", get(|| async { StatusCode::FORBIDDEN }));
        let base = serve(app).await;

        let flaky = HttpPagedStage::from_config(&config(format!("{base}/flaky")), Client::new());
        assert!(matches!(
            flaky.run(&ctx(), None).await,
            Err(StageError::Retryable(_))
        ));
        let gone = HttpPagedStage::from_config(&config(format!("{base}/gone")), Client::new());
        assert!(matches!(gone.run(&ctx(), None).await, Err(StageError::Fatal(_))));
    }
}
