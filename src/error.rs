use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

use crate::models::ApiResponse;
use crate::store::{StoreError, StoreResult};

/// Errors surfaced by the graph, activity and directory services.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The store could not be reached or was busy. Safe to retry.
    #[error("Store unavailable during {context}: {source}")]
    StoreUnavailable {
        context: String,
        #[source]
        source: StoreError,
    },

    #[error("Store error during {context}: {source}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn from_store(err: StoreError, context: String) -> Self {
        match err {
            StoreError::NotFound(what) => CoreError::NotFound(what),
            StoreError::Conflict(_) => CoreError::Validation(format!("{} conflicts with existing data", context)),
            StoreError::Unavailable(_) => CoreError::StoreUnavailable { context, source: err },
            other => CoreError::Store { context, source: other },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::StoreUnavailable { .. })
    }
}

/// Attach the failing operation and its identifiers to a store error.
pub trait StoreContext<T> {
    fn context<F: FnOnce() -> String>(self, f: F) -> CoreResult<T>;
}

impl<T> StoreContext<T> for StoreResult<T> {
    fn context<F: FnOnce() -> String>(self, f: F) -> CoreResult<T> {
        self.map_err(|e| CoreError::from_store(e, f()))
    }
}

impl ResponseError for CoreError {
    fn status_code(&self) -> StatusCode {
        match self {
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let CoreError::Store { .. } = self {
            log::error!("{}", self);
        }
        HttpResponse::build(self.status_code()).json(ApiResponse::<()>::error(self.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_core_errors() {
        let err = CoreError::from_store(StoreError::NotFound("User u1".to_string()), "get_user(u1)".to_string());
        assert!(matches!(err, CoreError::NotFound(ref what) if what == "User u1"));

        let err = CoreError::from_store(
            StoreError::Unavailable("database is locked".to_string()),
            "follow(a -> b)".to_string(),
        );
        assert!(err.is_retryable());
        assert!(err.to_string().contains("follow(a -> b)"));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let err = CoreError::from_store(StoreError::Conflict("UNIQUE".to_string()), "upsert_profile(u1)".to_string());
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(!err.is_retryable());
    }
}
