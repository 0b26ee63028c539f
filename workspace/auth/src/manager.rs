//! Creating, saving and looking up users.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use model::entities::user;
use rand::Rng;
use rand::rngs::OsRng;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, Order,
    PaginatorTrait, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};

use crate::email;
use crate::error::{InvariantError, Result};
use crate::hashers::{Hashers, PasswordCheck};
use crate::signals::Signals;
use crate::user::User;

/// Characters used by [`UserManager::make_random_password`] when none are
/// given. Look-alikes such as `l`, `1`, `O` and `0` are left out.
pub const DEFAULT_RANDOM_PASSWORD_CHARS: &str =
    "abcdefghjkmnpqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Optional fields accepted at creation time.
///
/// Keys that do not correspond to a user field end up in `other` and make
/// creation fail; `username` gets its own error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraFields {
    pub full_name: Option<String>,
    pub short_name: Option<String>,
    pub is_active: Option<bool>,
    pub is_staff: Option<bool>,
    pub is_superuser: Option<bool>,
    pub date_joined: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

impl ExtraFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    pub fn short_name(mut self, short_name: impl Into<String>) -> Self {
        self.short_name = Some(short_name.into());
        self
    }

    pub fn is_active(mut self, is_active: bool) -> Self {
        self.is_active = Some(is_active);
        self
    }

    pub fn is_staff(mut self, is_staff: bool) -> Self {
        self.is_staff = Some(is_staff);
        self
    }

    pub fn is_superuser(mut self, is_superuser: bool) -> Self {
        self.is_superuser = Some(is_superuser);
        self
    }

    /// Any other named field.
    pub fn field(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.other.insert(name.into(), value);
        self
    }
}

#[derive(Debug, Clone)]
pub struct UserManager {
    db: DatabaseConnection,
    hashers: Arc<Hashers>,
    signals: Signals,
}

impl UserManager {
    pub fn new(db: DatabaseConnection, hashers: Arc<Hashers>) -> Self {
        Self {
            db,
            hashers,
            signals: Signals::default(),
        }
    }

    pub fn with_signals(mut self, signals: Signals) -> Self {
        self.signals = signals;
        self
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn hashers(&self) -> &Hashers {
        &self.hashers
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    pub fn normalize_email(email: &str) -> String {
        email::normalize_email(email)
    }

    /// Create and save an unprivileged user.
    ///
    /// A `None` password gives the user an unusable password.
    #[instrument(skip(self, password, extra), fields(email = %email))]
    pub async fn create_user(
        &self,
        email: &str,
        password: Option<&str>,
        extra: ExtraFields,
    ) -> Result<User> {
        let is_staff = extra.is_staff.unwrap_or(false);
        let is_superuser = extra.is_superuser.unwrap_or(false);
        self.create(email, password, is_staff, is_superuser, extra).await
    }

    /// Create and save a user with `is_staff` and `is_superuser` set.
    ///
    /// Passing `false` for either flag is an error.
    #[instrument(skip(self, password, extra), fields(email = %email))]
    pub async fn create_superuser(
        &self,
        email: &str,
        password: Option<&str>,
        extra: ExtraFields,
    ) -> Result<User> {
        let is_staff = extra.is_staff.unwrap_or(true);
        let is_superuser = extra.is_superuser.unwrap_or(true);
        if !is_staff {
            warn!("Refusing to create superuser without is_staff");
            return Err(InvariantError::SuperuserMustBeStaff.into());
        }
        if !is_superuser {
            warn!("Refusing to create superuser without is_superuser");
            return Err(InvariantError::SuperuserMustBeSuperuser.into());
        }
        self.create(email, password, is_staff, is_superuser, extra).await
    }

    async fn create(
        &self,
        email: &str,
        password: Option<&str>,
        is_staff: bool,
        is_superuser: bool,
        extra: ExtraFields,
    ) -> Result<User> {
        trace!("Validating new user");
        if email.is_empty() {
            warn!("Refusing to create user without an email address");
            return Err(InvariantError::EmailRequired.into());
        }
        if extra.other.contains_key("username") {
            warn!("Refusing to create user with a username field");
            return Err(InvariantError::UsernameNotSupported.into());
        }
        if let Some(name) = extra.other.keys().next() {
            warn!("Refusing to create user with unknown field '{}'", name);
            return Err(InvariantError::UnexpectedField(name.clone()).into());
        }

        let mut user = User::new(Self::normalize_email(email));
        user.status.is_staff = is_staff;
        user.privileges.is_superuser = is_superuser;
        if let Some(is_active) = extra.is_active {
            user.status.is_active = is_active;
        }
        if let Some(full_name) = extra.full_name {
            user.names.full_name = full_name;
        }
        if let Some(short_name) = extra.short_name {
            user.names.short_name = short_name;
        }
        if let Some(date_joined) = extra.date_joined {
            user.set_date_joined(date_joined);
        }
        user.set_password(password, &self.hashers)?;

        self.save(&mut user).await?;
        info!("Created user {} (id: {:?})", user.email(), user.id);
        Ok(user)
    }

    /// Insert or update `user`, then run the post-save hooks and, if a new
    /// password was set since the last save, the password-changed hooks.
    #[instrument(skip(self, user), fields(email = %user.email()))]
    pub async fn save(&self, user: &mut User) -> Result<()> {
        let created = user.id.is_none();
        let model = if created {
            debug!("Inserting user");
            user.to_active_model().insert(&self.db).await?
        } else {
            debug!("Updating user {:?}", user.id);
            user.to_active_model().update(&self.db).await?
        };
        user.id = Some(model.id);

        self.signals.emit_post_save(user, created);
        if user.take_password_changed() {
            debug!("Password changed for user {}", model.id);
            self.signals.emit_password_changed(user);
        }
        Ok(())
    }

    /// Verify `raw_password` and persist an upgraded hash when the stored
    /// one is outdated. The upgrade writes only the password column and
    /// runs no hooks. `user` only takes the new hash once it is stored.
    #[instrument(skip(self, user, raw_password), fields(email = %user.email()))]
    pub async fn check_password(&self, user: &mut User, raw_password: &str) -> Result<bool> {
        let mut checked = user.clone();
        let check = checked.check_password(raw_password, &self.hashers);
        if check == PasswordCheck::MatchNeedsUpgrade {
            if let Some(id) = user.id {
                info!("Upgrading password hash for user {}", id);
                user::Entity::update_many()
                    .col_expr(user::Column::Password, Expr::value(checked.password()))
                    .filter(user::Column::Id.eq(id))
                    .exec(&self.db)
                    .await?;
            }
        }
        *user = checked;
        Ok(check.is_match())
    }

    /// Stamp `last_login`. Only the login flow calls this.
    #[instrument(skip(self, user), fields(email = %user.email()))]
    pub async fn record_login(&self, user: &mut User) -> Result<()> {
        let Some(id) = user.id else {
            warn!("Cannot record login for an unsaved user");
            return Ok(());
        };
        let now = Utc::now();
        user::Entity::update_many()
            .col_expr(user::Column::LastLogin, Expr::value(now))
            .filter(user::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        user.credentials.last_login = Some(now);
        self.signals.emit_post_save(user, false);
        debug!("Recorded login for user {}", id);
        Ok(())
    }

    pub async fn get(&self, id: i32) -> Result<Option<User>> {
        trace!("Loading user {}", id);
        Ok(user::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(User::from_model))
    }

    /// Look a user up by email, exactly as stored.
    pub async fn get_by_natural_key(&self, email: &str) -> Result<Option<User>> {
        trace!("Loading user by email");
        Ok(user::Entity::find()
            .filter(user::Column::Email.eq(email))
            .one(&self.db)
            .await?
            .map(User::from_model))
    }

    /// Whether another user already has `email`.
    pub async fn email_exists(&self, email: &str, exclude_id: Option<i32>) -> Result<bool> {
        let mut query = user::Entity::find().filter(user::Column::Email.eq(email));
        if let Some(id) = exclude_id {
            query = query.filter(user::Column::Id.ne(id));
        }
        Ok(query.count(&self.db).await? > 0)
    }

    /// Users whose email or names contain `term`, ordered by email.
    pub async fn search(&self, term: Option<&str>) -> Result<Vec<User>> {
        self.search_by(
            term,
            &[
                user::Column::Email,
                user::Column::FullName,
                user::Column::ShortName,
            ],
            &[(user::Column::Email, Order::Asc)],
        )
        .await
    }

    /// Users where any of `columns` contains `term`, sorted by `ordering`.
    /// A blank term matches everyone.
    pub async fn search_by(
        &self,
        term: Option<&str>,
        columns: &[user::Column],
        ordering: &[(user::Column, Order)],
    ) -> Result<Vec<User>> {
        let mut query = user::Entity::find();
        if let Some(term) = term.map(str::trim).filter(|t| !t.is_empty()) {
            debug!("Searching users for '{}'", term);
            let condition = columns
                .iter()
                .fold(Condition::any(), |cond, column| cond.add(column.contains(term)));
            query = query.filter(condition);
        }
        for (column, order) in ordering {
            query = query.order_by(*column, order.clone());
        }
        let rows = query.all(&self.db).await?;
        Ok(rows.into_iter().map(User::from_model).collect())
    }

    /// Delete the user with `id`. Returns whether a row was removed.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: i32) -> Result<bool> {
        let result = user::Entity::delete_by_id(id).exec(&self.db).await?;
        if result.rows_affected == 0 {
            warn!("User {} not found for deletion", id);
            return Ok(false);
        }
        info!("Deleted user {}", id);
        Ok(true)
    }

    /// A random string of `length` characters drawn from `allowed_chars`,
    /// or from [`DEFAULT_RANDOM_PASSWORD_CHARS`] when that is `None`.
    pub fn make_random_password(length: usize, allowed_chars: Option<&str>) -> String {
        let chars: Vec<char> = allowed_chars
            .unwrap_or(DEFAULT_RANDOM_PASSWORD_CHARS)
            .chars()
            .collect();
        if chars.is_empty() {
            return String::new();
        }
        let mut rng = OsRng;
        (0..length)
            .map(|_| chars[rng.gen_range(0..chars.len())])
            .collect()
    }
}
