// Tagged error kinds. Input validation, auth, consent, and rate-limit
// errors are surfaced to the caller verbatim with a stable `kind`; geometric
// and state-store errors are logged and returned as InvalidInput/Internal.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("consent required")]
    ConsentRequired,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Unauthenticated => "Unauthenticated",
            EngineError::Unauthorized(_) => "Unauthorized",
            EngineError::RateLimited { .. } => "RateLimited",
            EngineError::InvalidInput(_) => "InvalidInput",
            EngineError::InvalidGeometry(_) => "InvalidGeometry",
            EngineError::ConsentRequired => "ConsentRequired",
            EngineError::NotFound(_) => "NotFound",
            EngineError::Conflict(_) => "Conflict",
            EngineError::DependencyUnavailable(_) => "DependencyUnavailable",
            EngineError::Internal(_) => "Internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            EngineError::Unauthenticated => StatusCode::UNAUTHORIZED,
            EngineError::Unauthorized(_) => StatusCode::FORBIDDEN,
            EngineError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            EngineError::InvalidGeometry(_) => StatusCode::BAD_REQUEST,
            EngineError::ConsentRequired => StatusCode::FORBIDDEN,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody { kind: self.kind(), message: self.to_string() };
        if let EngineError::RateLimited { retry_after_secs } = &self {
            let mut resp = (status, Json(body)).into_response();
            resp.headers_mut().insert(
                "Retry-After",
                axum::http::HeaderValue::from_str(&retry_after_secs.to_string())
                    .unwrap_or_else(|_| axum::http::HeaderValue::from_static("1")),
            );
            return resp;
        }
        (status, Json(body)).into_response()
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_per_variant() {
        assert_eq!(EngineError::ConsentRequired.kind(), "ConsentRequired");
        assert_eq!(
            EngineError::RateLimited { retry_after_secs: 5 }.kind(),
            "RateLimited"
        );
    }

    #[test]
    fn status_codes_match_spec() {
        assert_eq!(EngineError::ConsentRequired.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            EngineError::RateLimited { retry_after_secs: 1 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            EngineError::DependencyUnavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
