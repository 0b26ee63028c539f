//! Forms for adding users, editing them and setting their password.
//!
//! A form takes the submitted data, cleans it with [`is_valid`] and, once
//! valid, can be saved. Field problems are collected in [`FormErrors`]
//! keyed by field name.
//!
//! [`is_valid`]: UserCreationForm::is_valid

use std::collections::BTreeMap;

use common::{
    FieldError, PasswordChangeRequest, PasswordFieldDto, PasswordSummaryItem, UserChangeRequest,
    UserCreationRequest,
};
use model::entities::{group, permission};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use validator::ValidateEmail;

use crate::backends::ModelBackend;
use crate::error::{AuthError, Result};
use crate::hashers::PasswordSummary;
use crate::manager::UserManager;
use crate::user::{EMAIL_MAX_LENGTH, FULL_NAME_MAX_LENGTH, SHORT_NAME_MAX_LENGTH, User};
use crate::validators::PasswordValidators;

pub const REQUIRED_MESSAGE: &str = "This field is required.";
pub const INVALID_EMAIL_MESSAGE: &str = "Enter a valid email address.";
pub const DUPLICATE_EMAIL_MESSAGE: &str = "A user with that email already exists.";
pub const PASSWORD_MISMATCH_MESSAGE: &str = "The two password fields didn't match.";
pub const DEFAULT_PASSWORD_URL: &str = "../password/";

/// Field errors collected while cleaning a form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FormErrors(BTreeMap<String, Vec<FieldError>>);

impl FormErrors {
    pub fn add(&mut self, field: &str, code: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(FieldError {
            code: code.to_string(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn get(&self, field: &str) -> &[FieldError] {
        self.0.get(field).map(Vec::as_slice).unwrap_or_default()
    }

    /// Error codes reported for `field`, in order.
    pub fn codes(&self, field: &str) -> Vec<&str> {
        self.get(field).iter().map(|e| e.code.as_str()).collect()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn into_inner(self) -> BTreeMap<String, Vec<FieldError>> {
        self.0
    }
}

impl From<validator::ValidationErrors> for FormErrors {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut form_errors = FormErrors::default();
        for (field, field_errors) in errors.field_errors() {
            for error in field_errors {
                let message = error
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| error.code.to_string());
                form_errors.add(&field, &error.code, message);
            }
        }
        form_errors
    }
}

fn check_required(errors: &mut FormErrors, field: &str, value: &str) -> bool {
    if value.is_empty() {
        errors.add(field, "required", REQUIRED_MESSAGE);
        return false;
    }
    true
}

fn check_max_length(errors: &mut FormErrors, field: &str, value: &str, max: u64) -> bool {
    let length = value.chars().count() as u64;
    if length > max {
        errors.add(
            field,
            "max_length",
            format!(
                "Ensure this value has at most {} characters (it has {}).",
                max, length
            ),
        );
        return false;
    }
    true
}

/// Strip, require and format-check an email field. Returns the cleaned
/// value when it passed.
fn clean_email_field(errors: &mut FormErrors, raw: &str) -> Option<String> {
    let email = raw.trim().to_string();
    if !check_required(errors, "email", &email) {
        return None;
    }
    if !check_max_length(errors, "email", &email, EMAIL_MAX_LENGTH) {
        return None;
    }
    if !email.validate_email() {
        errors.add("email", "invalid", INVALID_EMAIL_MESSAGE);
        return None;
    }
    Some(email)
}

fn clean_name_field(errors: &mut FormErrors, field: &str, raw: &str, max: u64) -> Option<String> {
    let value = raw.trim().to_string();
    check_max_length(errors, field, &value, max).then_some(value)
}

fn add_validation_issues(
    errors: &mut FormErrors,
    field: &str,
    validators: &PasswordValidators,
    password: &str,
    user: &User,
) {
    if let Err(issues) = validators.validate(password, Some(user)) {
        for issue in issues {
            errors.add(field, issue.code, issue.message);
        }
    }
}

/// Add an unprivileged user from an email address, optional names and a
/// password entered twice.
#[derive(Debug)]
pub struct UserCreationForm<'a> {
    manager: &'a UserManager,
    validators: &'a PasswordValidators,
    data: UserCreationRequest,
    errors: FormErrors,
    cleaned: bool,
    instance: Option<User>,
}

impl<'a> UserCreationForm<'a> {
    pub fn new(
        manager: &'a UserManager,
        validators: &'a PasswordValidators,
        data: UserCreationRequest,
    ) -> Self {
        Self {
            manager,
            validators,
            data,
            errors: FormErrors::default(),
            cleaned: false,
            instance: None,
        }
    }

    /// Help text for the first password field.
    pub fn password1_help_text(&self) -> Vec<String> {
        self.validators.help_texts()
    }

    pub fn password2_help_text(&self) -> &'static str {
        "Enter the same password as above, for verification."
    }

    #[instrument(skip(self), fields(email = %self.data.email))]
    pub async fn is_valid(&mut self) -> Result<bool> {
        if !self.cleaned {
            self.full_clean().await?;
        }
        Ok(self.errors().is_empty())
    }

    /// Errors from the last clean; empty before [`Self::is_valid`] ran.
    pub fn errors(&self) -> &FormErrors {
        &self.errors
    }

    async fn full_clean(&mut self) -> Result<()> {
        let mut errors = FormErrors::default();

        let mut email = clean_email_field(&mut errors, &self.data.email);
        let duplicate = match &email {
            Some(candidate) => {
                let normalized = UserManager::normalize_email(candidate);
                self.manager.email_exists(&normalized, None).await?
            }
            None => false,
        };
        if duplicate {
            errors.add("email", "duplicate_email", DUPLICATE_EMAIL_MESSAGE);
            email = None;
        }
        let full_name =
            clean_name_field(&mut errors, "full_name", &self.data.full_name, FULL_NAME_MAX_LENGTH);
        let short_name = clean_name_field(
            &mut errors,
            "short_name",
            &self.data.short_name,
            SHORT_NAME_MAX_LENGTH,
        );

        let password1_present = check_required(&mut errors, "password1", &self.data.password1);
        let password2_present = check_required(&mut errors, "password2", &self.data.password2);
        // Shown on the first field: either one may hold the typo.
        if password1_present && password2_present && self.data.password1 != self.data.password2 {
            errors.add("password1", "password_mismatch", PASSWORD_MISMATCH_MESSAGE);
        }

        // Only cleaned values reach the instance the validators compare
        // against.
        let mut instance = User::new(email.unwrap_or_default());
        instance.names.full_name = full_name.unwrap_or_default();
        instance.names.short_name = short_name.unwrap_or_default();
        instance.clean();

        if !errors.has_field("password1") {
            add_validation_issues(
                &mut errors,
                "password1",
                self.validators,
                &self.data.password1,
                &instance,
            );
        }

        if !errors.is_empty() {
            debug!("User creation form rejected: {:?}", errors.fields().collect::<Vec<_>>());
        }
        self.instance = Some(instance);
        self.errors = errors;
        self.cleaned = true;
        Ok(())
    }

    /// Build the user with a hashed password and, when `commit` is set,
    /// save it. Saving reports the new password to the password-changed
    /// hooks exactly once; an uncommitted user reports it when it is
    /// eventually saved.
    #[instrument(skip(self))]
    pub async fn save(&mut self, commit: bool) -> Result<User> {
        if !self.is_valid().await? {
            return Err(AuthError::InvalidForm(self.errors().clone()));
        }
        let Some(mut user) = self.instance.clone() else {
            return Err(AuthError::InvalidForm(self.errors().clone()));
        };
        user.set_password(Some(&self.data.password1), self.manager.hashers())?;
        if commit {
            self.manager.save(&mut user).await?;
            info!("Created user {} through the creation form", user.email());
        }
        Ok(user)
    }
}

/// Edit an existing user. The password is shown, never changed.
#[derive(Debug)]
pub struct UserChangeForm<'a> {
    manager: &'a UserManager,
    backend: &'a ModelBackend,
    instance: User,
    initial_password: String,
    data: UserChangeRequest,
    rel_password_url: Option<String>,
    errors: FormErrors,
    cleaned: bool,
}

impl<'a> UserChangeForm<'a> {
    pub fn new(
        manager: &'a UserManager,
        backend: &'a ModelBackend,
        instance: User,
        data: UserChangeRequest,
    ) -> Self {
        let initial_password = instance.password().to_string();
        Self {
            manager,
            backend,
            instance,
            initial_password,
            data,
            rel_password_url: None,
            errors: FormErrors::default(),
            cleaned: false,
        }
    }

    /// Point the password help text somewhere other than `../password/`.
    pub fn with_password_url(mut self, url: impl Into<String>) -> Self {
        self.rel_password_url = Some(url.into());
        self
    }

    pub fn instance(&self) -> &User {
        &self.instance
    }

    pub fn password_url(&self) -> &str {
        self.rel_password_url.as_deref().unwrap_or(DEFAULT_PASSWORD_URL)
    }

    pub fn password_help_text(&self) -> String {
        format!(
            "Raw passwords are not stored, so there is no way to see this user's password, \
             but you can change the password using <a href=\"{}\">this form</a>.",
            self.password_url()
        )
    }

    pub fn password_summary(&self) -> PasswordSummary {
        self.manager.hashers().summary(&self.initial_password)
    }

    /// The read-only password field as the change view shows it.
    pub fn password_field(&self) -> PasswordFieldDto {
        let (summary, message) = match self.password_summary() {
            PasswordSummary::Known(parts) => (
                parts
                    .into_iter()
                    .map(|(label, value)| PasswordSummaryItem { label, value })
                    .collect(),
                None,
            ),
            other => (Vec::new(), Some(other.to_string())),
        };
        PasswordFieldDto {
            summary,
            message,
            change_url: self.password_url().to_string(),
            help_text: self.password_help_text(),
        }
    }

    /// Whatever was submitted, the cleaned password is the stored one.
    pub fn cleaned_password(&self) -> &str {
        &self.initial_password
    }

    pub async fn permission_choices(&self) -> Result<Vec<permission::Model>> {
        self.backend.permission_choices().await
    }

    pub async fn group_choices(&self) -> Result<Vec<group::Model>> {
        self.backend.group_choices().await
    }

    pub async fn is_valid(&mut self) -> Result<bool> {
        if !self.cleaned {
            self.full_clean().await?;
        }
        Ok(self.errors().is_empty())
    }

    pub fn errors(&self) -> &FormErrors {
        &self.errors
    }

    async fn full_clean(&mut self) -> Result<()> {
        let mut errors = FormErrors::default();

        if let Some(raw) = &self.data.email {
            if let Some(email) = clean_email_field(&mut errors, raw) {
                let normalized = UserManager::normalize_email(&email);
                if self.manager.email_exists(&normalized, self.instance.id).await? {
                    errors.add("email", "unique", "User with this Email address already exists.");
                }
            }
        }
        if let Some(raw) = &self.data.full_name {
            clean_name_field(&mut errors, "full_name", raw, FULL_NAME_MAX_LENGTH);
        }
        if let Some(raw) = &self.data.short_name {
            clean_name_field(&mut errors, "short_name", raw, SHORT_NAME_MAX_LENGTH);
        }

        if let Some(ids) = &self.data.groups {
            let known: Vec<i32> = self.group_choices().await?.iter().map(|g| g.id).collect();
            for id in ids.iter().filter(|id| !known.contains(id)) {
                errors.add(
                    "groups",
                    "invalid_choice",
                    format!("Select a valid choice. {} is not one of the available choices.", id),
                );
            }
        }
        if let Some(ids) = &self.data.user_permissions {
            let known: Vec<i32> = self.permission_choices().await?.iter().map(|p| p.id).collect();
            for id in ids.iter().filter(|id| !known.contains(id)) {
                errors.add(
                    "user_permissions",
                    "invalid_choice",
                    format!("Select a valid choice. {} is not one of the available choices.", id),
                );
            }
        }

        if self.data.password.is_some() {
            debug!("Ignoring submitted password on the change form");
        }
        self.errors = errors;
        self.cleaned = true;
        Ok(())
    }

    /// Apply the changes. With `commit`, the row, group memberships and
    /// direct permissions are written.
    #[instrument(skip(self), fields(user_id = ?self.instance.id))]
    pub async fn save(&mut self, commit: bool) -> Result<User> {
        if !self.is_valid().await? {
            return Err(AuthError::InvalidForm(self.errors().clone()));
        }
        let mut user = self.instance.clone();
        if let Some(email) = &self.data.email {
            user.identity.email = email.trim().to_string();
        }
        if let Some(full_name) = &self.data.full_name {
            user.names.full_name = full_name.trim().to_string();
        }
        if let Some(short_name) = &self.data.short_name {
            user.names.short_name = short_name.trim().to_string();
        }
        if let Some(is_active) = self.data.is_active {
            user.status.is_active = is_active;
        }
        if let Some(is_staff) = self.data.is_staff {
            user.status.is_staff = is_staff;
        }
        if let Some(is_superuser) = self.data.is_superuser {
            user.privileges.is_superuser = is_superuser;
        }
        user.clean();

        if commit {
            self.manager.save(&mut user).await?;
            let Some(id) = user.id else {
                warn!("Saved user has no id");
                return Ok(user);
            };
            if let Some(groups) = &self.data.groups {
                self.backend.set_user_groups(id, groups).await?;
            }
            if let Some(perms) = &self.data.user_permissions {
                self.backend.set_user_permissions(id, perms).await?;
            }
            // Superuser or active flags feed the cached permission sets.
            self.backend.invalidate(id).await;
            info!("Updated user {}", id);
        }
        self.instance = user.clone();
        Ok(user)
    }
}

/// Set a user's password from the admin, without knowing the old one.
#[derive(Debug)]
pub struct AdminPasswordChangeForm<'a> {
    manager: &'a UserManager,
    validators: &'a PasswordValidators,
    user: User,
    data: PasswordChangeRequest,
    errors: FormErrors,
    cleaned: bool,
}

impl<'a> AdminPasswordChangeForm<'a> {
    pub fn new(
        manager: &'a UserManager,
        validators: &'a PasswordValidators,
        user: User,
        data: PasswordChangeRequest,
    ) -> Self {
        Self {
            manager,
            validators,
            user,
            data,
            errors: FormErrors::default(),
            cleaned: false,
        }
    }

    pub fn is_valid(&mut self) -> bool {
        if !self.cleaned {
            self.full_clean();
        }
        self.errors().is_empty()
    }

    pub fn errors(&self) -> &FormErrors {
        &self.errors
    }

    fn full_clean(&mut self) {
        let mut errors = FormErrors::default();
        let password1_present = check_required(&mut errors, "password1", &self.data.password1);
        let password2_present = check_required(&mut errors, "password2", &self.data.password2);
        if password1_present && password2_present && self.data.password1 != self.data.password2 {
            errors.add("password2", "password_mismatch", PASSWORD_MISMATCH_MESSAGE);
        }
        if !errors.has_field("password2") {
            add_validation_issues(
                &mut errors,
                "password2",
                self.validators,
                &self.data.password2,
                &self.user,
            );
        }
        self.errors = errors;
        self.cleaned = true;
    }

    #[instrument(skip(self), fields(user_id = ?self.user.id))]
    pub async fn save(&mut self, commit: bool) -> Result<User> {
        if !self.is_valid() {
            return Err(AuthError::InvalidForm(self.errors().clone()));
        }
        self.user
            .set_password(Some(&self.data.password1), self.manager.hashers())?;
        if commit {
            self.manager.save(&mut self.user).await?;
            info!("Password changed for user {:?}", self.user.id);
        }
        Ok(self.user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ExtraFields;
    use crate::signals::Signals;
    use crate::testing::{fast_hashers, setup_db};
    use crate::validators::PasswordValidatorSettings;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    async fn manager_with_counter() -> (UserManager, Arc<AtomicUsize>) {
        let changed = Arc::new(AtomicUsize::new(0));
        let counter = changed.clone();
        let signals = Signals::new().on_password_changed(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let manager =
            UserManager::new(setup_db().await, Arc::new(fast_hashers())).with_signals(signals);
        (manager, changed)
    }

    fn validators() -> PasswordValidators {
        PasswordValidators::from_settings(&PasswordValidatorSettings::default())
    }

    fn creation_data(email: &str, password1: &str, password2: &str) -> UserCreationRequest {
        UserCreationRequest {
            email: email.to_string(),
            full_name: "John Smith".to_string(),
            short_name: "John".to_string(),
            password1: password1.to_string(),
            password2: password2.to_string(),
        }
    }

    #[tokio::test]
    async fn test_creation_form_saves_user() {
        let (manager, changed) = manager_with_counter().await;
        let validators = validators();
        let mut form = UserCreationForm::new(
            &manager,
            &validators,
            creation_data("jsmith@example.com", "k4Gp!r9w2Lq", "k4Gp!r9w2Lq"),
        );

        assert!(form.is_valid().await.unwrap(), "{:?}", form.errors());
        let user = form.save(true).await.unwrap();

        assert!(user.id.is_some());
        assert_eq!(user.get_short_name(), "John");
        assert_ne!(user.password(), "k4Gp!r9w2Lq");
        assert!(manager.check_password(&mut user.clone(), "k4Gp!r9w2Lq").await.unwrap());
        assert_eq!(changed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_creation_form_without_commit_does_not_fire_password_changed() {
        let (manager, changed) = manager_with_counter().await;
        let validators = validators();
        let mut form = UserCreationForm::new(
            &manager,
            &validators,
            creation_data("nocommit@example.com", "k4Gp!r9w2Lq", "k4Gp!r9w2Lq"),
        );

        let user = form.save(false).await.unwrap();
        assert!(user.id.is_none());
        assert!(user.has_usable_password());
        assert_eq!(changed.load(Ordering::SeqCst), 0);
        assert!(manager.get_by_natural_key("nocommit@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_password_mismatch_is_reported_on_password1() {
        let (manager, _) = manager_with_counter().await;
        let validators = validators();
        let mut form = UserCreationForm::new(
            &manager,
            &validators,
            creation_data("jsmith@example.com", "k4Gp!r9w2Lq", "k4Gp!r9w2Lx"),
        );

        assert!(!form.is_valid().await.unwrap());
        assert_eq!(form.errors().codes("password1"), vec!["password_mismatch"]);
        assert_eq!(form.errors().get("password1")[0].message, PASSWORD_MISMATCH_MESSAGE);
        assert!(!form.errors().has_field("password2"));
    }

    #[tokio::test]
    async fn test_missing_fields_are_required() {
        let (manager, _) = manager_with_counter().await;
        let validators = validators();

        let mut form =
            UserCreationForm::new(&manager, &validators, creation_data("a@example.com", "", "x"));
        assert!(!form.is_valid().await.unwrap());
        assert_eq!(form.errors().codes("password1"), vec!["required"]);
        assert!(!form.errors().has_field("password2"));

        let mut form = UserCreationForm::new(
            &manager,
            &validators,
            creation_data("b@example.com", "k4Gp!r9w2Lq", ""),
        );
        assert!(!form.is_valid().await.unwrap());
        assert_eq!(form.errors().codes("password2"), vec!["required"]);
        assert!(!form.errors().has_field("password1"));

        let mut form = UserCreationForm::new(&manager, &validators, UserCreationRequest::default());
        assert!(!form.is_valid().await.unwrap());
        assert_eq!(form.errors().codes("email"), vec!["required"]);
        assert!(!form.errors().has_field("full_name"));
    }

    #[tokio::test]
    async fn test_password_validators_use_in_progress_user() {
        let (manager, _) = manager_with_counter().await;
        let validators = validators();
        let mut form = UserCreationForm::new(
            &manager,
            &validators,
            creation_data("jsmith@example.com", "johnsmith", "johnsmith"),
        );

        assert!(!form.is_valid().await.unwrap());
        let errors = form.errors().get("password1");
        assert_eq!(errors[0].code, "password_too_similar");
        assert!(errors[0].message.starts_with("The password is too similar to the"));
    }

    #[tokio::test]
    async fn test_weak_password_errors_land_on_password1() {
        let (manager, _) = manager_with_counter().await;
        let validators = validators();
        let mut form = UserCreationForm::new(
            &manager,
            &validators,
            creation_data("weak@example.com", "123", "123"),
        );

        assert!(!form.is_valid().await.unwrap());
        assert_eq!(
            form.errors().codes("password1"),
            vec!["password_too_short", "password_entirely_numeric"]
        );
    }

    #[tokio::test]
    async fn test_duplicate_email() {
        let (manager, _) = manager_with_counter().await;
        manager
            .create_user("taken@example.com", None, ExtraFields::new())
            .await
            .unwrap();
        let validators = validators();
        let mut form = UserCreationForm::new(
            &manager,
            &validators,
            creation_data("taken@EXAMPLE.com", "k4Gp!r9w2Lq", "k4Gp!r9w2Lq"),
        );

        assert!(!form.is_valid().await.unwrap());
        assert_eq!(form.errors().codes("email"), vec!["duplicate_email"]);
        assert_eq!(form.errors().get("email")[0].message, DUPLICATE_EMAIL_MESSAGE);
        assert!(matches!(form.save(true).await, Err(AuthError::InvalidForm(_))));
    }

    #[tokio::test]
    async fn test_invalid_and_long_fields() {
        let (manager, _) = manager_with_counter().await;
        let validators = validators();
        let mut data = creation_data("not-an-email", "k4Gp!r9w2Lq", "k4Gp!r9w2Lq");
        data.short_name = "x".repeat(51);
        let mut form = UserCreationForm::new(&manager, &validators, data);

        assert!(!form.is_valid().await.unwrap());
        assert_eq!(form.errors().get("email")[0].message, INVALID_EMAIL_MESSAGE);
        assert_eq!(
            form.errors().get("short_name")[0].message,
            "Ensure this value has at most 50 characters (it has 51)."
        );
    }

    async fn change_fixture() -> (UserManager, ModelBackend, User) {
        let (manager, _) = manager_with_counter().await;
        let user = manager
            .create_user("change@example.com", Some("pw-initial"), ExtraFields::new())
            .await
            .unwrap();
        let backend = ModelBackend::new(manager.clone(), Duration::from_secs(60));
        (manager, backend, user)
    }

    #[tokio::test]
    async fn test_change_form_keeps_initial_password() {
        let (manager, backend, user) = change_fixture().await;
        let initial = user.password().to_string();
        let data = UserChangeRequest {
            short_name: Some("Changed".to_string()),
            password: Some("new password".to_string()),
            ..Default::default()
        };
        let mut form = UserChangeForm::new(&manager, &backend, user, data);

        assert!(form.is_valid().await.unwrap());
        assert_eq!(form.cleaned_password(), initial);
        let saved = form.save(true).await.unwrap();
        assert_eq!(saved.password(), initial);
        assert_eq!(saved.get_short_name(), "Changed");

        let stored = manager.get(saved.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.password(), initial);
    }

    #[tokio::test]
    async fn test_change_form_password_field() {
        let (manager, backend, user) = change_fixture().await;
        let form = UserChangeForm::new(&manager, &backend, user.clone(), UserChangeRequest::default());
        assert_eq!(form.password_url(), "../password/");
        assert!(form.password_help_text().contains("<a href=\"../password/\">this form</a>"));
        let field = form.password_field();
        assert_eq!(field.summary[0].value, "argon2id");
        assert_eq!(field.message, None);

        let form = UserChangeForm::new(&manager, &backend, user.clone(), UserChangeRequest::default())
            .with_password_url("/admin/users/1/password/");
        assert!(form.password_help_text().contains("/admin/users/1/password/"));

        let mut unusable = user;
        unusable.set_unusable_password();
        let form = UserChangeForm::new(&manager, &backend, unusable, UserChangeRequest::default());
        assert_eq!(form.password_field().message.as_deref(), Some("No password set."));
    }

    #[tokio::test]
    async fn test_change_form_email_uniqueness_excludes_self() {
        let (manager, backend, user) = change_fixture().await;
        manager
            .create_user("other@example.com", None, ExtraFields::new())
            .await
            .unwrap();

        let same = UserChangeRequest {
            email: Some("change@example.com".to_string()),
            ..Default::default()
        };
        let mut form = UserChangeForm::new(&manager, &backend, user.clone(), same);
        assert!(form.is_valid().await.unwrap());

        let taken = UserChangeRequest {
            email: Some("other@example.com".to_string()),
            ..Default::default()
        };
        let mut form = UserChangeForm::new(&manager, &backend, user, taken);
        assert!(!form.is_valid().await.unwrap());
        assert_eq!(form.errors().codes("email"), vec!["unique"]);
    }

    #[tokio::test]
    async fn test_change_form_sets_groups_and_permissions() {
        let (manager, backend, user) = change_fixture().await;
        let group = backend.create_group("editors").await.unwrap();
        let perm = backend
            .get_permission("improved_user.change_user")
            .await
            .unwrap()
            .unwrap();

        let data = UserChangeRequest {
            groups: Some(vec![group.id]),
            user_permissions: Some(vec![perm.id]),
            ..Default::default()
        };
        let mut form = UserChangeForm::new(&manager, &backend, user.clone(), data);
        let saved = form.save(true).await.unwrap();
        let id = saved.id.unwrap();
        assert_eq!(backend.user_group_ids(id).await.unwrap(), vec![group.id]);
        assert_eq!(backend.user_permission_ids(id).await.unwrap(), vec![perm.id]);

        let bad = UserChangeRequest {
            groups: Some(vec![9999]),
            ..Default::default()
        };
        let mut form = UserChangeForm::new(&manager, &backend, user, bad);
        assert!(!form.is_valid().await.unwrap());
        assert_eq!(form.errors().codes("groups"), vec!["invalid_choice"]);
    }

    #[tokio::test]
    async fn test_admin_password_change_form() {
        let (manager, changed) = manager_with_counter().await;
        let user = manager
            .create_user("admin-pw@example.com", None, ExtraFields::new())
            .await
            .unwrap();
        let validators = validators();

        let mut form = AdminPasswordChangeForm::new(
            &manager,
            &validators,
            user.clone(),
            PasswordChangeRequest {
                password1: "k4Gp!r9w2Lq".to_string(),
                password2: "something-else".to_string(),
            },
        );
        assert!(!form.is_valid());
        assert_eq!(form.errors().codes("password2"), vec!["password_mismatch"]);

        let mut form = AdminPasswordChangeForm::new(
            &manager,
            &validators,
            user,
            PasswordChangeRequest {
                password1: "k4Gp!r9w2Lq".to_string(),
                password2: "k4Gp!r9w2Lq".to_string(),
            },
        );
        let mut saved = form.save(true).await.unwrap();
        assert!(manager.check_password(&mut saved, "k4Gp!r9w2Lq").await.unwrap());
        assert_eq!(changed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_form_errors_from_validation_errors() {
        let mut errors = validator::ValidationErrors::new();
        let mut error = validator::ValidationError::new("range");
        error.message = Some("out of range".into());
        errors.add("min_length", error);

        let form_errors = FormErrors::from(errors);
        assert_eq!(form_errors.codes("min_length"), vec!["range"]);
        assert_eq!(form_errors.get("min_length")[0].message, "out of range");
    }
}
