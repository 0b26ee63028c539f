//! The account entity.
//!
//! [`User`] is one concrete type assembled from named field groups rather
//! than a stack of base types. Applications that need more fields embed a
//! `User` next to them and forward to it:
//!
//! ```
//! use auth::User;
//!
//! struct VerifiedUser {
//!     user: User,
//!     verified: bool,
//! }
//!
//! impl VerifiedUser {
//!     fn is_verified(&self) -> bool {
//!         self.user.is_active() && self.verified
//!     }
//! }
//!
//! let mut account = VerifiedUser {
//!     user: User::new("jane@example.com"),
//!     verified: true,
//! };
//! assert!(account.is_verified());
//! assert_eq!(account.user.get_username(), "jane@example.com");
//!
//! account.user.status.is_active = false;
//! assert!(!account.is_verified());
//! ```

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use model::entities::user;
use sea_orm::{ActiveValue::NotSet, Set};
use tracing::warn;

use crate::backends::{Backends, ObjectRef};
use crate::email::normalize_email;
use crate::error::{MailError, Result};
use crate::hashers::{self, Hashers, PasswordCheck};
use crate::mail::{self, MailOptions, Mailer};
use crate::validators::UserAttributes;

/// Field that identifies a user at login.
pub const USERNAME_FIELD: &str = "email";
/// Field holding the address mail is sent to.
pub const EMAIL_FIELD: &str = "email";
/// Fields prompted for by `create-superuser` besides the identifier and password.
pub const REQUIRED_FIELDS: &[&str] = &["full_name", "short_name"];

pub const EMAIL_MAX_LENGTH: u64 = 254;
pub const FULL_NAME_MAX_LENGTH: u64 = 200;
pub const SHORT_NAME_MAX_LENGTH: u64 = 50;

/// Login identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub email: String,
}

/// Optional display names. No uniqueness, empty allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Names {
    pub full_name: String,
    pub short_name: String,
}

/// Admin access and account lifecycle flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub is_active: bool,
    pub is_staff: bool,
    date_joined: DateTime<Utc>,
}

impl Status {
    pub fn date_joined(&self) -> DateTime<Utc> {
        self.date_joined
    }
}

/// Password state and login bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    password: String,
    pub last_login: Option<DateTime<Utc>>,
    /// Set by `set_password`, cleared when the save path reports it.
    password_changed: bool,
}

impl Credentials {
    pub fn password(&self) -> &str {
        &self.password
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Privileges {
    pub is_superuser: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// `None` until the user has been saved.
    pub id: Option<i32>,
    pub identity: Identity,
    pub names: Names,
    pub status: Status,
    pub credentials: Credentials,
    pub privileges: Privileges,
}

impl User {
    /// An unsaved, active, unprivileged user without a usable password.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: None,
            identity: Identity {
                email: email.into(),
            },
            names: Names::default(),
            status: Status {
                is_active: true,
                is_staff: false,
                date_joined: Utc::now(),
            },
            credentials: Credentials {
                password: hashers::make_unusable_password(),
                last_login: None,
                password_changed: false,
            },
            privileges: Privileges::default(),
        }
    }

    pub fn from_model(model: user::Model) -> Self {
        Self {
            id: Some(model.id),
            identity: Identity { email: model.email },
            names: Names {
                full_name: model.full_name,
                short_name: model.short_name,
            },
            status: Status {
                is_active: model.is_active,
                is_staff: model.is_staff,
                date_joined: model.date_joined,
            },
            credentials: Credentials {
                password: model.password,
                last_login: model.last_login,
                password_changed: false,
            },
            privileges: Privileges {
                is_superuser: model.is_superuser,
            },
        }
    }

    /// Every column set, with the id left for the database on first insert.
    pub fn to_active_model(&self) -> user::ActiveModel {
        user::ActiveModel {
            id: match self.id {
                Some(id) => Set(id),
                None => NotSet,
            },
            email: Set(self.identity.email.clone()),
            password: Set(self.credentials.password.clone()),
            full_name: Set(self.names.full_name.clone()),
            short_name: Set(self.names.short_name.clone()),
            is_active: Set(self.status.is_active),
            is_staff: Set(self.status.is_staff),
            is_superuser: Set(self.privileges.is_superuser),
            date_joined: Set(self.status.date_joined),
            last_login: Set(self.credentials.last_login),
        }
    }

    pub(crate) fn set_date_joined(&mut self, date_joined: DateTime<Utc>) {
        self.status.date_joined = date_joined;
    }

    pub fn email(&self) -> &str {
        &self.identity.email
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active
    }

    pub fn is_staff(&self) -> bool {
        self.status.is_staff
    }

    pub fn is_superuser(&self) -> bool {
        self.privileges.is_superuser
    }

    pub fn password(&self) -> &str {
        self.credentials.password()
    }

    pub fn last_login(&self) -> Option<DateTime<Utc>> {
        self.credentials.last_login
    }

    pub fn date_joined(&self) -> DateTime<Utc> {
        self.status.date_joined
    }

    /// The login identifier, which is the email address.
    pub fn get_username(&self) -> &str {
        &self.identity.email
    }

    pub fn get_full_name(&self) -> &str {
        &self.names.full_name
    }

    pub fn get_short_name(&self) -> &str {
        &self.names.short_name
    }

    /// Always true; there is no anonymous `User`.
    pub fn is_authenticated(&self) -> bool {
        true
    }

    pub fn is_anonymous(&self) -> bool {
        false
    }

    /// Hash and store `raw_password`; `None` stores the unusable sentinel.
    ///
    /// A real password change is reported to the password-changed hooks on
    /// the next save.
    pub fn set_password(
        &mut self,
        raw_password: Option<&str>,
        hashers: &Hashers,
    ) -> std::result::Result<(), crate::error::HashError> {
        self.credentials.password = hashers.make_password(raw_password)?;
        self.credentials.password_changed = raw_password.is_some();
        Ok(())
    }

    pub fn set_unusable_password(&mut self) {
        self.credentials.password = hashers::make_unusable_password();
        self.credentials.password_changed = false;
    }

    pub fn has_usable_password(&self) -> bool {
        hashers::is_password_usable(&self.credentials.password)
    }

    /// Check `raw_password` against the stored hash.
    ///
    /// When the hash is outdated it is replaced in memory with one from the
    /// preferred hasher. That replacement is not a password change: the
    /// password-changed hooks will not fire for it. Persisting it is left to
    /// [`crate::manager::UserManager::check_password`].
    pub fn check_password(&mut self, raw_password: &str, hashers: &Hashers) -> PasswordCheck {
        let check = hashers.check_password(raw_password, &self.credentials.password);
        if check == PasswordCheck::MatchNeedsUpgrade {
            match hashers.make_password(Some(raw_password)) {
                Ok(encoded) => self.credentials.password = encoded,
                Err(e) => {
                    warn!("Could not upgrade password hash for {}: {}", self.identity.email, e);
                    return PasswordCheck::Match;
                }
            }
        }
        check
    }

    /// Returns whether a password change is waiting to be reported, and
    /// clears it.
    pub(crate) fn take_password_changed(&mut self) -> bool {
        std::mem::take(&mut self.credentials.password_changed)
    }

    /// Normalize fields before validation. Types embedding a `User` should
    /// call this before their own cleaning.
    pub fn clean(&mut self) {
        self.identity.email = normalize_email(&self.identity.email);
    }

    /// Send a message to this user's address.
    pub async fn email_user(
        &self,
        mailer: &dyn Mailer,
        subject: &str,
        message: &str,
        from_email: Option<&str>,
        options: MailOptions,
    ) -> std::result::Result<(), MailError> {
        mail::send_mail(
            mailer,
            subject,
            message,
            from_email,
            &[self.identity.email.clone()],
            options,
        )
        .await
    }

    /// Active superusers hold every permission. Everyone else, and every
    /// inactive account, goes through the backends.
    pub async fn has_perm(
        &self,
        backends: &Backends,
        perm: &str,
        obj: Option<&ObjectRef>,
    ) -> Result<bool> {
        if self.is_active() && self.is_superuser() {
            return Ok(true);
        }
        backends.has_perm(self, perm, obj).await
    }

    pub async fn has_perms(
        &self,
        backends: &Backends,
        perms: &[&str],
        obj: Option<&ObjectRef>,
    ) -> Result<bool> {
        for perm in perms {
            if !self.has_perm(backends, perm, obj).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub async fn has_module_perms(&self, backends: &Backends, app_label: &str) -> Result<bool> {
        if self.is_active() && self.is_superuser() {
            return Ok(true);
        }
        backends.has_module_perms(self, app_label).await
    }

    pub async fn get_user_permissions(
        &self,
        backends: &Backends,
        obj: Option<&ObjectRef>,
    ) -> Result<BTreeSet<String>> {
        backends.get_user_permissions(self, obj).await
    }

    pub async fn get_group_permissions(
        &self,
        backends: &Backends,
        obj: Option<&ObjectRef>,
    ) -> Result<BTreeSet<String>> {
        backends.get_group_permissions(self, obj).await
    }

    pub async fn get_all_permissions(
        &self,
        backends: &Backends,
        obj: Option<&ObjectRef>,
    ) -> Result<BTreeSet<String>> {
        backends.get_all_permissions(self, obj).await
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity.email)
    }
}

impl UserAttributes for User {
    fn attribute(&self, name: &str) -> Option<&str> {
        match name {
            "email" => Some(&self.identity.email),
            "full_name" => Some(&self.names.full_name),
            "short_name" => Some(&self.names.short_name),
            _ => None,
        }
    }
}

impl From<user::Model> for User {
    fn from(model: user::Model) -> Self {
        User::from_model(model)
    }
}

impl From<&User> for common::UserDto {
    fn from(user: &User) -> Self {
        common::UserDto {
            id: user.id.unwrap_or_default(),
            email: user.identity.email.clone(),
            full_name: user.names.full_name.clone(),
            short_name: user.names.short_name.clone(),
            is_active: user.status.is_active,
            is_staff: user.status.is_staff,
            is_superuser: user.privileges.is_superuser,
            date_joined: user.status.date_joined,
            last_login: user.credentials.last_login,
        }
    }
}
