use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Failures surfaced by control-plane operations.
///
/// Store failures wrap the underlying `anyhow` chain so the full context
/// reaches the log line, while the HTTP body only carries the top message.
#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("job {job_id} is no longer available to claim")]
    ClaimConflict { job_id: String },

    #[error("tenant mismatch: caller declared '{declared}' but resource belongs to '{actual}'")]
    TenantMismatch { declared: String, actual: String },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("report for unknown job {job_id}")]
    MalformedReport { job_id: String },

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl ControlPlaneError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClaimConflict { .. } => "claim_conflict",
            Self::TenantMismatch { .. } => "tenant_mismatch",
            Self::NotFound { .. } => "not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::MalformedReport { .. } => "malformed_report",
            Self::Store(_) => "store_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            // Agents treat a lost race exactly like a vanished job.
            Self::ClaimConflict { .. } | Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::TenantMismatch { .. } => StatusCode::FORBIDDEN,
            Self::InvalidRequest(_) | Self::MalformedReport { .. } => StatusCode::BAD_REQUEST,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ControlPlaneError {
    fn into_response(self) -> Response {
        match &self {
            Self::Store(e) => tracing::error!(error = ?e, "control plane store failure"),
            Self::TenantMismatch { declared, actual } => {
                tracing::warn!(%declared, %actual, "rejected cross-tenant request")
            }
            _ => {}
        }
        let body = serde_json::json!({
            "success": false,
            "kind": self.kind(),
            "error": self.to_string(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

pub type ControlPlaneResult<T> = Result<T, ControlPlaneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_conflict_maps_to_not_found() {
        let err = ControlPlaneError::ClaimConflict {
            job_id: "j1".into(),
        };
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.kind(), "claim_conflict");
    }

    #[tokio::test]
    async fn store_error_body_carries_only_the_top_message() {
        let inner = anyhow::anyhow!("disk full").context("insert job");
        let err = ControlPlaneError::from(inner);
        assert_eq!(err.to_string(), "store error: insert job");

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["kind"], "store_error");
        assert_eq!(body["error"], "store error: insert job");
        assert!(!body.to_string().contains("disk full"));
    }
}
