use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

use crate::backend::BackendError;
use crate::catalog::ListingError;
use crate::identity::IdentityError;
use crate::purchase::PurchaseError;
use crate::refresh::RefreshError;
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Session expired")]
    AuthExpired,

    #[error("Profile not found")]
    ProfileNotFound,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Self purchase rejected")]
    SelfPurchaseRejected,

    #[error("Purchase failed: {0}")]
    PurchaseFailed(String),

    #[error("Ticket not editable: {0}")]
    NotEditable(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotAuthenticated | AppError::AuthExpired => StatusCode::UNAUTHORIZED,
            AppError::ProfileNotFound | AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::SelfPurchaseRejected
            | AppError::PurchaseFailed(_)
            | AppError::NotEditable(_) => StatusCode::CONFLICT,
            AppError::Backend(_) | AppError::InternalServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::NotAuthenticated => "NOT_AUTHENTICATED",
            AppError::AuthExpired => "AUTH_EXPIRED",
            AppError::ProfileNotFound => "PROFILE_NOT_FOUND",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::SelfPurchaseRejected => "SELF_PURCHASE_REJECTED",
            AppError::PurchaseFailed(_) => "PURCHASE_FAILED",
            AppError::NotEditable(_) => "TICKET_NOT_EDITABLE",
            AppError::Backend(_) => "DATABASE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        match self {
            AppError::Backend(e) => {
                error!(error = ?e, "Backend error");
            }
            AppError::InternalServerError(msg) => {
                error!(message = %msg, "Internal error");
            }
            other => {
                warn!(code = other.code(), error = %other, "Request rejected");
            }
        }
    }

    fn public_message(&self) -> String {
        match self {
            AppError::ValidationError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::PurchaseFailed(msg)
            | AppError::NotEditable(msg) => msg.clone(),
            AppError::NotAuthenticated => "Sign in to continue".to_string(),
            AppError::AuthExpired => "Your session has expired, please sign in again".to_string(),
            AppError::ProfileNotFound => {
                "No marketplace profile exists for this account".to_string()
            }
            AppError::SelfPurchaseRejected => "You cannot buy your own ticket".to_string(),
            AppError::Backend(_) => "A database error occurred".to_string(),
            AppError::InternalServerError(_) => "An internal error occurred".to_string(),
        }
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::NotAuthenticated => AppError::NotAuthenticated,
            IdentityError::ProfileNotFound => AppError::ProfileNotFound,
        }
    }
}

impl From<PurchaseError> for AppError {
    fn from(err: PurchaseError) -> Self {
        match err {
            PurchaseError::NotAuthenticated => AppError::NotAuthenticated,
            PurchaseError::ProfileNotFound => AppError::ProfileNotFound,
            PurchaseError::NotFound => AppError::NotFound("Ticket not found".to_string()),
            PurchaseError::SelfPurchaseRejected => AppError::SelfPurchaseRejected,
            PurchaseError::PurchaseFailed(reason) => AppError::PurchaseFailed(reason),
        }
    }
}

impl From<ListingError> for AppError {
    fn from(err: ListingError) -> Self {
        match err {
            ListingError::Validation(msg) => AppError::ValidationError(msg),
            ListingError::NotFound => AppError::NotFound("Ticket not found".to_string()),
            ListingError::Forbidden => {
                AppError::Forbidden("Only the owner can change this ticket".to_string())
            }
            ListingError::SoldNotEditable => {
                AppError::NotEditable("Sold tickets cannot be edited".to_string())
            }
            ListingError::Backend(e) => AppError::Backend(e),
            ListingError::Unreadable(e) => AppError::InternalServerError(e.to_string()),
        }
    }
}

impl From<RefreshError> for AppError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::AuthExpired => AppError::AuthExpired,
            RefreshError::Load(e) => AppError::Backend(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        self.log();

        // Internal details stay in the logs.
        error_response(code, self.public_message(), None, status)
    }
}
