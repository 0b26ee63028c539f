//! User administration over HTTP.
//!
//! [`UserAdmin`] declares how users are laid out (fieldsets, list columns,
//! search and ordering). It is handed to the router through the
//! application state; there is no registry to add it to.

use axum::{
    Router,
    routing::{get, post},
};

use crate::schemas::AppState;

pub mod guard;
pub mod options;
pub mod views;

pub use options::{AdminConfigError, UserAdmin};
pub use views::ListQuery;

/// Routes for the user admin. Paths end in `/` so that relative links such
/// as `../password/` resolve against the change view.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/users/", get(views::list_users))
        .route(
            "/admin/users/add/",
            get(views::add_user_form).post(views::add_user),
        )
        .route(
            "/admin/users/:user_id/change/",
            get(views::change_user_form).post(views::change_user),
        )
        .route("/admin/users/:user_id/password/", post(views::change_password))
        .route("/admin/users/:user_id/delete/", post(views::delete_user))
}
