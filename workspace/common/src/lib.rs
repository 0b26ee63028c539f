//! Transport-layer types shared by the HTTP API and its clients.
//! Request bodies here are what the admin and login endpoints accept;
//! response bodies are what they return.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Generic API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    /// Response data
    pub data: T,
    /// Response message
    pub message: String,
    /// Success flag
    pub success: bool,
}

/// A single problem with one submitted field.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct FieldError {
    /// Stable machine-readable code, e.g. `duplicate_email`
    pub code: String,
    /// Human readable message
    pub message: String,
}

/// Error body returned by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code, e.g. `INVALID_FORM`
    pub code: String,
    /// Success status (always false for errors)
    pub success: bool,
    /// Per-field errors when a submitted form was rejected
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_errors: BTreeMap<String, Vec<FieldError>>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            success: false,
            field_errors: BTreeMap::new(),
        }
    }

    pub fn with_field_errors(mut self, field_errors: BTreeMap<String, Vec<FieldError>>) -> Self {
        self.field_errors = field_errors;
        self
    }
}

// ===================== Users =====================

/// A user as shown by the API. The password hash is never included.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct UserDto {
    pub id: i32,
    pub email: String,
    pub full_name: String,
    pub short_name: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Body of the add-user form. Missing fields are treated as empty.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Default)]
#[serde(default)]
pub struct UserCreationRequest {
    pub email: String,
    pub full_name: String,
    pub short_name: String,
    pub password1: String,
    pub password2: String,
}

/// Body of the change-user form. Omitted fields keep their current value;
/// any submitted `password` is ignored.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Default)]
pub struct UserChangeRequest {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub short_name: Option<String>,
    pub is_active: Option<bool>,
    pub is_staff: Option<bool>,
    pub is_superuser: Option<bool>,
    /// Group ids; replaces the current memberships
    pub groups: Option<Vec<i32>>,
    /// Permission ids; replaces the current direct grants
    pub user_permissions: Option<Vec<i32>>,
    pub password: Option<String>,
}

/// Body of the admin set-password form.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Default)]
#[serde(default)]
pub struct PasswordChangeRequest {
    pub password1: String,
    pub password2: String,
}

/// One labelled part of a stored password hash, already masked.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct PasswordSummaryItem {
    pub label: String,
    pub value: String,
}

/// Read-only view of a user's password.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct PasswordFieldDto {
    /// Masked hash parts; empty when there is nothing to show
    pub summary: Vec<PasswordSummaryItem>,
    /// Set instead of `summary` for unusable or unrecognised passwords
    pub message: Option<String>,
    /// Where the password can be changed, relative to the change view
    pub change_url: String,
    pub help_text: String,
}

/// A grantable permission.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct PermissionDto {
    pub id: i32,
    pub name: String,
    /// `"<app_label>.<codename>"`
    pub perm: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct GroupDto {
    pub id: i32,
    pub name: String,
}

/// Everything the change view needs to render the change form.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct UserChangeFormDto {
    pub fieldsets: Vec<FieldsetDto>,
    pub user: UserDto,
    pub password: PasswordFieldDto,
    pub groups: Vec<i32>,
    pub user_permissions: Vec<i32>,
    pub group_choices: Vec<GroupDto>,
    pub permission_choices: Vec<PermissionDto>,
}

/// Form layout for the admin: fieldset titles and the fields in each.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct FieldsetDto {
    pub name: Option<String>,
    pub classes: Vec<String>,
    pub fields: Vec<String>,
}

/// What the add view needs to render the creation form.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct UserAddFormDto {
    pub fieldsets: Vec<FieldsetDto>,
    /// One entry per active password validator
    pub password1_help_text: Vec<String>,
    pub password2_help_text: String,
}

/// Admin list view page.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct UserListDto {
    /// Column names, in display order
    pub list_display: Vec<String>,
    pub results: Vec<UserDto>,
}

/// Credentials for `POST /api/v1/login`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}
