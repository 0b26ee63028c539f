use thiserror::Error;

use crate::forms::FormErrors;

/// Broken creation-time invariants reported by [`crate::manager::UserManager`].
///
/// These are caller mistakes: nothing is written when one is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantError {
    #[error("An email address must be provided.")]
    EmailRequired,

    #[error("The Improved User model does not have a username; it uses only email")]
    UsernameNotSupported,

    #[error("Superuser must have is_staff=true.")]
    SuperuserMustBeStaff,

    #[error("Superuser must have is_superuser=true.")]
    SuperuserMustBeSuperuser,

    #[error("Unexpected field '{0}' for user creation")]
    UnexpectedField(String),
}

/// Errors from the password hashing subsystem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    #[error("Invalid hasher parameters: {0}")]
    Params(String),

    #[error("Failed to hash password: {0}")]
    Hashing(String),
}

/// Errors from a [`crate::mail::Mailer`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    #[error("No recipients given")]
    NoRecipients,

    #[error("Mail transport failed: {0}")]
    Transport(String),
}

/// Error type for everything in this crate.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Storage failures are passed through untouched, including unique
    /// constraint violations lost to a concurrent writer.
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error(transparent)]
    Invariant(#[from] InvariantError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Mail(#[from] MailError),

    /// A form was saved without passing validation first.
    #[error("Form is not valid: {0:?}")]
    InvalidForm(FormErrors),

    #[error("User {0} not found")]
    UserNotFound(i32),

    #[error("Permission '{0}' not found")]
    PermissionNotFound(String),
}

/// Type alias for Result with AuthError
pub type Result<T> = std::result::Result<T, AuthError>;
