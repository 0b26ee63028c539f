use auth::User;
use axum::{
    Json, async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use tracing::{debug, warn};

use crate::handlers::{HandlerError, auth_error, error_response};
use crate::schemas::{AppState, ErrorResponse};

pub const WWW_AUTHENTICATE_VALUE: &str = "Basic realm=\"improved-user admin\", charset=\"UTF-8\"";

/// An authenticated, active staff member taken from HTTP Basic credentials.
#[derive(Debug, Clone)]
pub struct StaffUser(pub User);

impl StaffUser {
    /// Fail with `403` unless the user holds `perm`.
    pub async fn require(&self, state: &AppState, perm: &str) -> Result<(), HandlerError> {
        match self.0.has_perm(&state.backends, perm, None).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!("User {:?} lacks permission {}", self.0.id, perm);
                Err(error_response(
                    StatusCode::FORBIDDEN,
                    "PERMISSION_DENIED",
                    "You do not have permission to perform this action.",
                ))
            }
            Err(e) => Err(auth_error(e)),
        }
    }
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, WWW_AUTHENTICATE_VALUE)],
        Json(ErrorResponse::new("NOT_AUTHENTICATED", message)),
    )
        .into_response()
}

/// Email and password from an `Authorization: Basic …` header.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (email, password) = decoded.split_once(':')?;
    Some((email.to_string(), password.to_string()))
}

#[async_trait]
impl FromRequestParts<AppState> for StaffUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some((email, password)) = basic_credentials(&parts.headers) else {
            debug!("No Basic credentials on admin request");
            return Err(unauthorized("Authentication credentials were not provided."));
        };

        let user = state
            .backends
            .authenticate(&email, &password)
            .await
            .map_err(|e| auth_error(e).into_response())?;
        let Some(user) = user else {
            warn!("Admin credentials rejected");
            return Err(unauthorized(
                "Please enter the correct email address and password for a staff account.",
            ));
        };

        if !user.is_staff() {
            warn!("User {:?} is not staff", user.id);
            return Err(error_response(
                StatusCode::FORBIDDEN,
                "PERMISSION_DENIED",
                "You do not have permission to access the admin.",
            )
            .into_response());
        }

        Ok(StaffUser(user))
    }
}
