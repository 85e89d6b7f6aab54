use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

use crate::models::MembershipError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found")]
    NotFound,

    #[error("muted until {muted_until}: {reason}")]
    Muted {
        muted_until: DateTime<Utc>,
        reason: String,
    },

    #[error("version conflict on group aggregate")]
    VersionConflict,

    #[error("database error: {0}")]
    Database(String),

    #[error("internal server error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound,
            other => AppError::Database(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        AppError::StartServer(format!("migrations: {e}"))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl From<MembershipError> for AppError {
    fn from(e: MembershipError) -> Self {
        match e {
            MembershipError::NotMember(_) | MembershipError::NotAdmin(_) => AppError::NotFound,
            MembershipError::AlreadyMember(_) | MembershipError::LastAdmin => {
                AppError::BadRequest(e.to_string())
            }
        }
    }
}

impl AppError {
    /// Stable machine-readable code for the error body
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) | AppError::StartServer(_) => "configuration_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound => "not_found",
            AppError::Muted { .. } => "muted",
            AppError::VersionConflict => "version_conflict",
            AppError::Database(_) => "database_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Returns whether retrying the same write may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::VersionConflict)
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::Muted { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::VersionConflict => StatusCode::CONFLICT,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Database(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = match self {
            AppError::Muted {
                muted_until,
                reason,
            } => json!({
                "error": self.code(),
                "message": "you are muted in this group",
                "mutedUntil": muted_until,
                "reason": reason,
            }),
            // Internal details stay in the logs
            AppError::Database(_) | AppError::Internal(_) | AppError::Config(_) => json!({
                "error": self.code(),
                "message": "internal server error",
            }),
            _ => json!({
                "error": self.code(),
                "message": self.to_string(),
            }),
        };

        HttpResponse::build(status).json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::Forbidden("admin only".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(AppError::VersionConflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::Database("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_membership_error_mapping() {
        let err: AppError = MembershipError::LastAdmin.into();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err: AppError = MembershipError::NotMember(Uuid::new_v4()).into();
        assert!(matches!(err, AppError::NotFound));
    }

    #[test]
    fn test_muted_error_is_forbidden() {
        let err = AppError::Muted {
            muted_until: Utc::now(),
            reason: "flood".into(),
        };
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.code(), "muted");
        assert!(!err.is_retryable());
        assert!(AppError::VersionConflict.is_retryable());
    }
}
