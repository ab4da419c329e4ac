use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AppState;

fn is_loopback(host: &str) -> bool {
    host == "127.0.0.1" || host == "::1" || host == "localhost"
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "success": false, "kind": "unauthorized", "error": message })),
    )
        .into_response()
}

pub async fn require_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // No token configured: open access only on loopback (safe for local dev)
    let Some(expected) = state.api_token.as_deref().filter(|t| !t.is_empty()) else {
        if is_loopback(&state.api_host) {
            return next.run(req).await;
        }
        return unauthorized(
            "No API token configured. Set server.api_token before exposing the control plane on a non-loopback address.",
        );
    };

    let presented = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));

    match presented {
        None => unauthorized("Missing or invalid Authorization header. Use: Bearer <token>"),
        Some(token) if token == expected => next.run(req).await,
        Some(_) => unauthorized("Invalid API token"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agents::AgentRegistry;
    use crate::core::jobs::JobDispatcher;
    use crate::core::results::TriggerResultAggregator;
    use crate::core::scheduler::SchedulingSwitch;
    use crate::core::store::ControlPlaneStore;
    use axum::{Router, middleware, routing::get};
    use serde_json::json;
    use tower::util::ServiceExt;

    fn test_state(api_host: &str, api_token: Option<&str>) -> AppState {
        let store = ControlPlaneStore::open_in_memory().unwrap();
        let agents = AgentRegistry::new(300);
        let (log_tx, _) = tokio::sync::broadcast::channel(8);
        AppState {
            dispatcher: JobDispatcher::new(store.clone(), agents.clone(), 25, None),
            results: TriggerResultAggregator::new(store.clone()),
            store,
            agents,
            scheduling: SchedulingSwitch::new(true),
            log_tx,
            api_host: api_host.to_string(),
            api_port: 17900,
            api_token: api_token.map(str::to_string),
        }
    }

    fn protected_app(state: AppState) -> Router {
        Router::new()
            .route(
                "/api/ping",
                get(|| async { axum::Json(json!({ "ok": true })).into_response() }),
            )
            .layer(middleware::from_fn_with_state(state.clone(), super::require_auth))
            .with_state(state)
    }

    async fn ping_status(app: Router, headers: Vec<(&str, String)>) -> StatusCode {
        let mut req_builder = Request::builder().uri("/api/ping");
        for (k, v) in headers {
            req_builder = req_builder.header(k, v);
        }
        let req = req_builder.body(Body::empty()).expect("request should build");
        app.oneshot(req).await.expect("oneshot should succeed").status()
    }

    #[tokio::test]
    async fn no_token_on_loopback_allows_request() {
        let app = protected_app(test_state("127.0.0.1", None));
        assert_eq!(ping_status(app, vec![]).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn no_token_on_non_loopback_rejects_request() {
        let app = protected_app(test_state("0.0.0.0", None));
        assert_eq!(ping_status(app, vec![]).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn configured_token_requires_bearer_header() {
        let app = protected_app(test_state("127.0.0.1", Some("s3cret")));
        assert_eq!(ping_status(app.clone(), vec![]).await, StatusCode::UNAUTHORIZED);
        assert_eq!(
            ping_status(app.clone(), vec![("authorization", "Bearer nope".into())]).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ping_status(app, vec![("authorization", "Bearer s3cret".into())]).await,
            StatusCode::OK
        );
    }
}
