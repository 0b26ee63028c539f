use std::sync::Arc;

use auth::{Backends, Mailer, ModelBackend, PasswordValidators, UserManager};
use common::{
    FieldError, FieldsetDto, GroupDto, LoginRequest, PasswordChangeRequest, PasswordFieldDto,
    PasswordSummaryItem, PermissionDto, UserAddFormDto, UserChangeFormDto, UserChangeRequest,
    UserCreationRequest, UserDto, UserListDto,
};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

use crate::admin::{ListQuery, UserAdmin};
use crate::config::Settings;

pub use common::{ApiResponse, ErrorResponse};

/// Application state shared across handlers
#[derive(Clone, Debug)]
pub struct AppState {
    /// Database connection
    pub db: DatabaseConnection,
    /// Creates, loads and saves users
    pub manager: UserManager,
    /// Database-backed authentication and permission lookups
    pub backend: Arc<ModelBackend>,
    /// Every configured backend, consulted in order
    pub backends: Backends,
    /// Password strength checks used by the admin forms
    pub validators: Arc<PasswordValidators>,
    /// Outgoing mail
    pub mailer: Arc<dyn Mailer>,
    /// Admin layout for users
    pub admin: Arc<UserAdmin>,
    pub settings: Arc<Settings>,
}

/// Health check response
#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
    /// Database connection status
    pub database: String,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::health::health_check,
        crate::handlers::login::login,
        crate::admin::views::list_users,
        crate::admin::views::add_user_form,
        crate::admin::views::add_user,
        crate::admin::views::change_user_form,
        crate::admin::views::change_user,
        crate::admin::views::change_password,
        crate::admin::views::delete_user,
    ),
    components(
        schemas(
            ApiResponse<UserDto>,
            ApiResponse<UserListDto>,
            ApiResponse<UserAddFormDto>,
            ApiResponse<UserChangeFormDto>,
            ErrorResponse,
            FieldError,
            HealthResponse,
            LoginRequest,
            UserDto,
            UserListDto,
            UserAddFormDto,
            UserChangeFormDto,
            UserCreationRequest,
            UserChangeRequest,
            PasswordChangeRequest,
            PasswordFieldDto,
            PasswordSummaryItem,
            PermissionDto,
            GroupDto,
            FieldsetDto,
            ListQuery,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "auth", description = "Authentication endpoints"),
        (name = "admin", description = "User administration endpoints"),
    ),
    info(
        title = "Improved User API",
        description = "Email-keyed user accounts: authentication, permissions and user administration",
        version = "0.1.0",
        license(
            name = "BSD-2-Clause",
            url = "https://opensource.org/licenses/BSD-2-Clause"
        )
    )
)]
pub struct ApiDoc;
