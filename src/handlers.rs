use auth::AuthError;
use axum::{http::StatusCode, response::Json};
use tracing::{error, warn};

use crate::schemas::ErrorResponse;

pub mod health;
pub mod login;

pub type HandlerError = (StatusCode, Json<ErrorResponse>);

pub fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> HandlerError {
    (status, Json(ErrorResponse::new(code, message)))
}

/// Map a domain error onto the HTTP error tuple returned by handlers.
pub fn auth_error(err: AuthError) -> HandlerError {
    match err {
        AuthError::Invariant(e) => {
            warn!("Rejected request: {}", e);
            error_response(StatusCode::BAD_REQUEST, "INVALID_REQUEST", e.to_string())
        }
        AuthError::InvalidForm(errors) => {
            warn!("Form rejected on fields: {:?}", errors.fields().collect::<Vec<_>>());
            let body = ErrorResponse::new("INVALID_FORM", "Please correct the errors below.")
                .with_field_errors(errors.into_inner());
            (StatusCode::BAD_REQUEST, Json(body))
        }
        AuthError::UserNotFound(id) => {
            warn!("User {} not found", id);
            error_response(StatusCode::NOT_FOUND, "NOT_FOUND", format!("User with ID {} not found", id))
        }
        AuthError::PermissionNotFound(perm) => {
            warn!("Permission {} not found", perm);
            error_response(StatusCode::NOT_FOUND, "NOT_FOUND", format!("Permission '{}' not found", perm))
        }
        other => {
            error!("Request failed: {}", other);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", other.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auth::{FormErrors, InvariantError};

    #[test]
    fn test_invariant_errors_are_bad_requests() {
        let (status, Json(body)) = auth_error(InvariantError::EmailRequired.into());
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "An email address must be provided.");
        assert!(!body.success);
    }

    #[test]
    fn test_form_errors_are_reported_per_field() {
        let mut errors = FormErrors::default();
        errors.add("email", "required", "This field is required.");

        let (status, Json(body)) = auth_error(AuthError::InvalidForm(errors));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, "INVALID_FORM");
        assert_eq!(body.field_errors["email"][0].code, "required");
    }

    #[test]
    fn test_missing_user_is_not_found() {
        let (status, _) = auth_error(AuthError::UserNotFound(7));
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
