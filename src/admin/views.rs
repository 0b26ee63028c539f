use auth::{AdminPasswordChangeForm, User, UserChangeForm, UserCreationForm};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use axum_valid::Valid;
use common::{
    GroupDto, PasswordChangeRequest, PermissionDto, UserAddFormDto, UserChangeFormDto,
    UserChangeRequest, UserCreationRequest, UserDto, UserListDto,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, trace, warn};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::admin::guard::StaffUser;
use crate::handlers::{HandlerError, auth_error, error_response};
use crate::schemas::{ApiResponse, AppState, ErrorResponse};

pub const VIEW_PERMISSION: &str = "improved_user.view_user";
pub const ADD_PERMISSION: &str = "improved_user.add_user";
pub const CHANGE_PERMISSION: &str = "improved_user.change_user";
pub const DELETE_PERMISSION: &str = "improved_user.delete_user";

/// Query parameters for the user list
#[derive(Debug, Deserialize, Serialize, ToSchema, IntoParams, Validate)]
pub struct ListQuery {
    /// Matched against every search field
    #[validate(length(max = 254))]
    pub q: Option<String>,
}

type Handled<T> = Result<(StatusCode, Json<ApiResponse<T>>), HandlerError>;

fn ok<T>(status: StatusCode, data: T, message: &str) -> Handled<T> {
    Ok((
        status,
        Json(ApiResponse {
            data,
            message: message.to_string(),
            success: true,
        }),
    ))
}

async fn load_user(state: &AppState, user_id: i32) -> Result<User, HandlerError> {
    match state.manager.get(user_id).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => {
            warn!("User with ID {} not found", user_id);
            Err(error_response(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("User with ID {} not found", user_id),
            ))
        }
        Err(e) => {
            error!("Failed to load user {}: {}", user_id, e);
            Err(auth_error(e))
        }
    }
}

/// List users
#[utoipa::path(
    get,
    path = "/admin/users/",
    tag = "admin",
    params(ListQuery),
    responses(
        (status = 200, description = "Users retrieved successfully", body = ApiResponse<UserListDto>),
        (status = 401, description = "Missing or invalid credentials", body = ErrorResponse),
        (status = 403, description = "Not allowed to view users", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[instrument(skip(staff, state))]
pub async fn list_users(
    staff: StaffUser,
    State(state): State<AppState>,
    Valid(Query(query)): Valid<Query<ListQuery>>,
) -> Handled<UserListDto> {
    trace!("Entering list_users function");
    staff.require(&state, VIEW_PERMISSION).await?;

    let (columns, ordering) = match (state.admin.search_columns(), state.admin.ordering_columns()) {
        (Ok(columns), Ok(ordering)) => (columns, ordering),
        (Err(e), _) | (_, Err(e)) => {
            error!("Invalid admin configuration: {}", e);
            return Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                e.to_string(),
            ));
        }
    };

    let users = state
        .manager
        .search_by(query.q.as_deref(), &columns, &ordering)
        .await
        .map_err(auth_error)?;
    debug!("Found {} users", users.len());

    let list = UserListDto {
        list_display: state.admin.list_display.clone(),
        results: users.iter().map(UserDto::from).collect(),
    };
    ok(StatusCode::OK, list, "Users retrieved successfully")
}

/// Describe the add-user form
#[utoipa::path(
    get,
    path = "/admin/users/add/",
    tag = "admin",
    responses(
        (status = 200, description = "Form layout", body = ApiResponse<UserAddFormDto>),
        (status = 401, description = "Missing or invalid credentials", body = ErrorResponse),
        (status = 403, description = "Not allowed to add users", body = ErrorResponse)
    )
)]
#[instrument(skip(staff, state))]
pub async fn add_user_form(staff: StaffUser, State(state): State<AppState>) -> Handled<UserAddFormDto> {
    staff.require(&state, ADD_PERMISSION).await?;

    let form = UserCreationForm::new(&state.manager, &state.validators, UserCreationRequest::default());
    let dto = UserAddFormDto {
        fieldsets: state.admin.add_fieldsets.clone(),
        password1_help_text: form.password1_help_text(),
        password2_help_text: form.password2_help_text().to_string(),
    };
    ok(StatusCode::OK, dto, "Add user form")
}

/// Add a user
#[utoipa::path(
    post,
    path = "/admin/users/add/",
    tag = "admin",
    request_body = UserCreationRequest,
    responses(
        (status = 201, description = "User created successfully", body = ApiResponse<UserDto>),
        (status = 400, description = "The form has errors", body = ErrorResponse),
        (status = 401, description = "Missing or invalid credentials", body = ErrorResponse),
        (status = 403, description = "Not allowed to add users", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[instrument(skip(staff, state, request), fields(email = %request.email))]
pub async fn add_user(
    staff: StaffUser,
    State(state): State<AppState>,
    Json(request): Json<UserCreationRequest>,
) -> Handled<UserDto> {
    trace!("Entering add_user function");
    staff.require(&state, ADD_PERMISSION).await?;

    let mut form = UserCreationForm::new(&state.manager, &state.validators, request);
    let user = form.save(true).await.map_err(auth_error)?;

    info!("User {:?} added by {:?}", user.id, staff.0.id);
    ok(StatusCode::CREATED, UserDto::from(&user), "User created successfully")
}

/// Describe the change-user form
#[utoipa::path(
    get,
    path = "/admin/users/{user_id}/change/",
    tag = "admin",
    params(
        ("user_id" = i32, Path, description = "User ID"),
    ),
    responses(
        (status = 200, description = "Form layout and current values", body = ApiResponse<UserChangeFormDto>),
        (status = 401, description = "Missing or invalid credentials", body = ErrorResponse),
        (status = 403, description = "Not allowed to view users", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    )
)]
#[instrument(skip(staff, state))]
pub async fn change_user_form(
    staff: StaffUser,
    State(state): State<AppState>,
    Path(user_id): Path<i32>,
) -> Handled<UserChangeFormDto> {
    trace!("Entering change_user_form function for user_id: {}", user_id);
    staff.require(&state, VIEW_PERMISSION).await?;

    let user = load_user(&state, user_id).await?;
    let mut form = UserChangeForm::new(
        &state.manager,
        &state.backend,
        user,
        UserChangeRequest::default(),
    );
    if let Some(url) = &state.settings.password_change_url {
        form = form.with_password_url(url.clone());
    }

    let groups = state.backend.user_group_ids(user_id).await.map_err(auth_error)?;
    let user_permissions = state
        .backend
        .user_permission_ids(user_id)
        .await
        .map_err(auth_error)?;
    let group_choices = form
        .group_choices()
        .await
        .map_err(auth_error)?
        .into_iter()
        .map(|g| GroupDto { id: g.id, name: g.name })
        .collect();
    let permission_choices = form
        .permission_choices()
        .await
        .map_err(auth_error)?
        .into_iter()
        .map(|p| PermissionDto {
            id: p.id,
            perm: p.perm_name(),
            name: p.name,
        })
        .collect();

    let dto = UserChangeFormDto {
        fieldsets: state.admin.fieldsets.clone(),
        user: UserDto::from(form.instance()),
        password: form.password_field(),
        groups,
        user_permissions,
        group_choices,
        permission_choices,
    };
    ok(StatusCode::OK, dto, "Change user form")
}

/// Change a user
///
/// Omitted fields keep their value. A submitted `password` is ignored;
/// use the password endpoint instead.
#[utoipa::path(
    post,
    path = "/admin/users/{user_id}/change/",
    tag = "admin",
    params(
        ("user_id" = i32, Path, description = "User ID"),
    ),
    request_body = UserChangeRequest,
    responses(
        (status = 200, description = "User updated successfully", body = ApiResponse<UserDto>),
        (status = 400, description = "The form has errors", body = ErrorResponse),
        (status = 401, description = "Missing or invalid credentials", body = ErrorResponse),
        (status = 403, description = "Not allowed to change users", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    )
)]
#[instrument(skip(staff, state, request))]
pub async fn change_user(
    staff: StaffUser,
    State(state): State<AppState>,
    Path(user_id): Path<i32>,
    Json(request): Json<UserChangeRequest>,
) -> Handled<UserDto> {
    trace!("Entering change_user function for user_id: {}", user_id);
    staff.require(&state, CHANGE_PERMISSION).await?;

    let user = load_user(&state, user_id).await?;
    let mut form = UserChangeForm::new(&state.manager, &state.backend, user, request);
    let user = form.save(true).await.map_err(auth_error)?;

    info!("User {} changed by {:?}", user_id, staff.0.id);
    ok(StatusCode::OK, UserDto::from(&user), "User updated successfully")
}

/// Set a user's password
#[utoipa::path(
    post,
    path = "/admin/users/{user_id}/password/",
    tag = "admin",
    params(
        ("user_id" = i32, Path, description = "User ID"),
    ),
    request_body = PasswordChangeRequest,
    responses(
        (status = 200, description = "Password changed successfully", body = ApiResponse<UserDto>),
        (status = 400, description = "The form has errors", body = ErrorResponse),
        (status = 401, description = "Missing or invalid credentials", body = ErrorResponse),
        (status = 403, description = "Not allowed to change users", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    )
)]
#[instrument(skip(staff, state, request))]
pub async fn change_password(
    staff: StaffUser,
    State(state): State<AppState>,
    Path(user_id): Path<i32>,
    Json(request): Json<PasswordChangeRequest>,
) -> Handled<UserDto> {
    trace!("Entering change_password function for user_id: {}", user_id);
    staff.require(&state, CHANGE_PERMISSION).await?;

    let user = load_user(&state, user_id).await?;
    let mut form = AdminPasswordChangeForm::new(&state.manager, &state.validators, user, request);
    let user = form.save(true).await.map_err(auth_error)?;

    ok(StatusCode::OK, UserDto::from(&user), "Password changed successfully")
}

/// Delete a user
#[utoipa::path(
    post,
    path = "/admin/users/{user_id}/delete/",
    tag = "admin",
    params(
        ("user_id" = i32, Path, description = "User ID"),
    ),
    responses(
        (status = 200, description = "User deleted successfully", body = ApiResponse<String>),
        (status = 401, description = "Missing or invalid credentials", body = ErrorResponse),
        (status = 403, description = "Not allowed to delete users", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    )
)]
#[instrument(skip(staff, state))]
pub async fn delete_user(
    staff: StaffUser,
    State(state): State<AppState>,
    Path(user_id): Path<i32>,
) -> Handled<String> {
    trace!("Entering delete_user function for user_id: {}", user_id);
    staff.require(&state, DELETE_PERMISSION).await?;

    if !state.manager.delete(user_id).await.map_err(auth_error)? {
        return Err(error_response(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("User with ID {} not found", user_id),
        ));
    }
    state.backend.invalidate(user_id).await;

    info!("User {} deleted by {:?}", user_id, staff.0.id);
    ok(StatusCode::OK, format!("User {} deleted", user_id), "User deleted successfully")
}
