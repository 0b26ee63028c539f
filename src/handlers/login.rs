use axum::{extract::State, http::StatusCode, response::Json};
use common::{LoginRequest, UserDto};
use tracing::{debug, info, instrument, trace, warn};

use crate::handlers::{HandlerError, auth_error, error_response};
use crate::schemas::{ApiResponse, AppState, ErrorResponse};

/// Authenticate with email and password
///
/// A successful login records the time in `last_login`.
#[utoipa::path(
    post,
    path = "/api/v1/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Credentials accepted", body = ApiResponse<UserDto>),
        (status = 401, description = "Invalid credentials or inactive account", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[instrument(skip(state, request), fields(email = %request.email))]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<(StatusCode, Json<ApiResponse<UserDto>>), HandlerError> {
    trace!("Entering login function");

    let user = state
        .backends
        .login(&state.manager, &request.email, &request.password)
        .await
        .map_err(auth_error)?;

    match user {
        Some(user) => {
            info!("User {:?} logged in", user.id);
            debug!("Last login recorded at {:?}", user.last_login());
            let response = ApiResponse {
                data: UserDto::from(&user),
                message: "Login successful".to_string(),
                success: true,
            };
            Ok((StatusCode::OK, Json(response)))
        }
        None => {
            warn!("Login rejected");
            Err(error_response(
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                "Please enter a correct email address and password. Note that both fields may be case-sensitive.",
            ))
        }
    }
}
