use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::auth;
use super::handlers::{agents, jobs, protocol, scheduling, triggers};

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    // agent-facing pull protocol
    let protocol_routes = Router::new()
        .route("/api/register", post(agents::register_agent))
        .route(
            "/api/heartbeat",
            post(agents::heartbeat).get(agents::heartbeat_ping),
        )
        .route("/api/jobs/report", post(protocol::report_jobs))
        .route("/api/jobs/requests/list", post(protocol::list_job_requests))
        .route("/api/jobs/requests/accept", get(protocol::accept_job_request))
        .route("/api/jobs/requests/reject", get(protocol::reject_job_request));

    let operator_routes = Router::new()
        .route("/api/agents", get(agents::list_agents))
        .route("/api/jobs", get(jobs::list_jobs).post(jobs::submit_job))
        .route("/api/jobs/{job_id}", get(jobs::get_job))
        .route("/api/jobs/{job_id}/schedule", put(jobs::schedule_job))
        .route("/api/jobs/{job_id}/retry", put(jobs::retry_job))
        .route("/api/jobs/{job_id}/children", get(jobs::list_sub_jobs))
        .route(
            "/api/triggers",
            get(triggers::list_triggers)
                .post(triggers::create_trigger)
                .delete(triggers::delete_triggers),
        )
        .route(
            "/api/triggers/{trigger_id}",
            get(triggers::get_trigger).delete(triggers::delete_trigger),
        )
        .route(
            "/api/triggers/{trigger_id}/frequency",
            put(triggers::update_frequency),
        )
        .route(
            "/api/triggers/{trigger_id}/metadata",
            put(triggers::update_metadata),
        )
        .route(
            "/api/triggers/{trigger_id}/jobs",
            get(triggers::list_triggered_jobs),
        )
        .route(
            "/api/triggers/{trigger_id}/iterations",
            get(triggers::list_iterations),
        )
        .route(
            "/api/triggers/{trigger_id}/iterations/{iteration_id}/results",
            get(triggers::iteration_results),
        )
        .route(
            "/api/triggers/{trigger_id}/results",
            get(triggers::trigger_results),
        )
        .route(
            "/api/triggers/{trigger_id}/results/latest",
            get(triggers::latest_trigger_results),
        )
        .route("/api/scheduling/enable", get(scheduling::enable_scheduling))
        .route("/api/scheduling/disable", get(scheduling::disable_scheduling))
        .route("/api/scheduling/enabled", get(scheduling::scheduling_enabled))
        .route("/api/logs", get(super::sse_logs_endpoint));

    protocol_routes
        .merge(operator_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(state.api_port))
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}
