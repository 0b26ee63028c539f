//! Password strength checks.
//!
//! Validators see the candidate password and, when available, the user it
//! is meant for. Every validator runs and all of their complaints are
//! reported together.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lowercased passwords rejected by [`CommonPasswordValidator`].
const COMMON_PASSWORDS: &str = include_str!("../data/common-passwords.txt");

/// Named text attributes a validator can compare a password against.
pub trait UserAttributes {
    fn attribute(&self, name: &str) -> Option<&str>;
}

/// One reason a password was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub code: &'static str,
    pub message: String,
}

impl ValidationIssue {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub trait PasswordValidator: Send + Sync + std::fmt::Debug {
    fn validate(
        &self,
        password: &str,
        user: Option<&dyn UserAttributes>,
    ) -> Result<(), ValidationIssue>;

    fn help_text(&self) -> String;
}

/// Rejects passwords that resemble the user's email or names.
#[derive(Debug, Clone)]
pub struct UserAttributeSimilarityValidator {
    user_attributes: Vec<String>,
    max_similarity: f64,
}

impl UserAttributeSimilarityValidator {
    pub const DEFAULT_USER_ATTRIBUTES: &'static [&'static str] =
        &["email", "full_name", "short_name"];
    pub const DEFAULT_MAX_SIMILARITY: f64 = 0.7;

    /// `max_similarity` is clamped to at least 0.1; anything lower would
    /// reject nearly every password.
    pub fn new(user_attributes: Vec<String>, max_similarity: f64) -> Self {
        Self {
            user_attributes,
            max_similarity: max_similarity.max(0.1),
        }
    }

    fn verbose_name(attribute: &str) -> String {
        match attribute {
            "email" => "email address".to_string(),
            other => other.replace('_', " "),
        }
    }

    /// Whether `value` is so much shorter than `password` that it cannot
    /// reach the similarity bound.
    fn exceeds_maximum_length_ratio(&self, password: &str, value: &str) -> bool {
        let password_len = password.chars().count() as f64;
        let value_len = value.chars().count() as f64;
        let length_bound_similarity = self.max_similarity / 2.0 * password_len;
        password_len >= 10.0 * value_len && value_len < length_bound_similarity
    }
}

impl Default for UserAttributeSimilarityValidator {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_USER_ATTRIBUTES
                .iter()
                .map(|a| a.to_string())
                .collect(),
            Self::DEFAULT_MAX_SIMILARITY,
        )
    }
}

/// Upper bound on the similarity of two strings: twice the size of their
/// character multiset intersection over their combined length.
fn quick_ratio(a: &str, b: &str) -> f64 {
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 1.0;
    }
    let mut available: HashMap<char, usize> = HashMap::new();
    for c in b.chars() {
        *available.entry(c).or_default() += 1;
    }
    let mut matches = 0usize;
    for c in a.chars() {
        if let Some(count) = available.get_mut(&c) {
            if *count > 0 {
                *count -= 1;
                matches += 1;
            }
        }
    }
    2.0 * matches as f64 / total as f64
}

impl PasswordValidator for UserAttributeSimilarityValidator {
    fn validate(
        &self,
        password: &str,
        user: Option<&dyn UserAttributes>,
    ) -> Result<(), ValidationIssue> {
        let Some(user) = user else {
            return Ok(());
        };
        let password = password.to_lowercase();
        for attribute in &self.user_attributes {
            let Some(value) = user.attribute(attribute).filter(|v| !v.is_empty()) else {
                continue;
            };
            let value = value.to_lowercase();
            let parts = value
                .split(|c: char| !(c.is_alphanumeric() || c == '_'))
                .chain(std::iter::once(value.as_str()));
            for part in parts {
                if self.exceeds_maximum_length_ratio(&password, part) {
                    continue;
                }
                if quick_ratio(&password, part) >= self.max_similarity {
                    return Err(ValidationIssue::new(
                        "password_too_similar",
                        format!(
                            "The password is too similar to the {}.",
                            Self::verbose_name(attribute)
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    fn help_text(&self) -> String {
        "Your password can’t be too similar to your other personal information.".to_string()
    }
}

#[derive(Debug, Clone)]
pub struct MinimumLengthValidator {
    min_length: usize,
}

impl MinimumLengthValidator {
    pub const DEFAULT_MIN_LENGTH: usize = 8;

    pub fn new(min_length: usize) -> Self {
        Self { min_length }
    }

    fn characters(&self) -> &'static str {
        if self.min_length == 1 { "character" } else { "characters" }
    }
}

impl Default for MinimumLengthValidator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MIN_LENGTH)
    }
}

impl PasswordValidator for MinimumLengthValidator {
    fn validate(&self, password: &str, _: Option<&dyn UserAttributes>) -> Result<(), ValidationIssue> {
        if password.chars().count() < self.min_length {
            return Err(ValidationIssue::new(
                "password_too_short",
                format!(
                    "This password is too short. It must contain at least {} {}.",
                    self.min_length,
                    self.characters()
                ),
            ));
        }
        Ok(())
    }

    fn help_text(&self) -> String {
        format!(
            "Your password must contain at least {} {}.",
            self.min_length,
            self.characters()
        )
    }
}

/// Rejects passwords found in a list of commonly used ones, ignoring case
/// and surrounding whitespace.
#[derive(Debug, Clone)]
pub struct CommonPasswordValidator {
    passwords: Arc<BTreeSet<String>>,
}

impl CommonPasswordValidator {
    pub fn new<I, S>(passwords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            passwords: Arc::new(
                passwords
                    .into_iter()
                    .map(|p| p.as_ref().trim().to_lowercase())
                    .filter(|p| !p.is_empty())
                    .collect(),
            ),
        }
    }
}

impl Default for CommonPasswordValidator {
    fn default() -> Self {
        Self::new(COMMON_PASSWORDS.lines())
    }
}

impl PasswordValidator for CommonPasswordValidator {
    fn validate(&self, password: &str, _: Option<&dyn UserAttributes>) -> Result<(), ValidationIssue> {
        if self.passwords.contains(&password.trim().to_lowercase()) {
            return Err(ValidationIssue::new(
                "password_too_common",
                "This password is too common.",
            ));
        }
        Ok(())
    }

    fn help_text(&self) -> String {
        "Your password can’t be a commonly used password.".to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct NumericPasswordValidator;

impl PasswordValidator for NumericPasswordValidator {
    fn validate(&self, password: &str, _: Option<&dyn UserAttributes>) -> Result<(), ValidationIssue> {
        if !password.is_empty() && password.chars().all(|c| c.is_numeric()) {
            return Err(ValidationIssue::new(
                "password_entirely_numeric",
                "This password is entirely numeric.",
            ));
        }
        Ok(())
    }

    fn help_text(&self) -> String {
        "Your password can’t be entirely numeric.".to_string()
    }
}

/// Which validators to enable, usually part of the application settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PasswordValidatorSettings {
    /// `0` disables the length check.
    pub min_length: usize,
    /// `None` disables the similarity check.
    pub max_similarity: Option<f64>,
    pub user_attributes: Vec<String>,
    pub common_passwords: bool,
    pub numeric: bool,
}

impl Default for PasswordValidatorSettings {
    fn default() -> Self {
        Self {
            min_length: MinimumLengthValidator::DEFAULT_MIN_LENGTH,
            max_similarity: Some(UserAttributeSimilarityValidator::DEFAULT_MAX_SIMILARITY),
            user_attributes: UserAttributeSimilarityValidator::DEFAULT_USER_ATTRIBUTES
                .iter()
                .map(|a| a.to_string())
                .collect(),
            common_passwords: true,
            numeric: true,
        }
    }
}

/// An ordered set of validators.
#[derive(Debug, Clone, Default)]
pub struct PasswordValidators {
    validators: Vec<Arc<dyn PasswordValidator>>,
}

impl PasswordValidators {
    pub fn new(validators: Vec<Arc<dyn PasswordValidator>>) -> Self {
        Self { validators }
    }

    pub fn from_settings(settings: &PasswordValidatorSettings) -> Self {
        let mut validators: Vec<Arc<dyn PasswordValidator>> = Vec::new();
        if let Some(max_similarity) = settings.max_similarity {
            validators.push(Arc::new(UserAttributeSimilarityValidator::new(
                settings.user_attributes.clone(),
                max_similarity,
            )));
        }
        if settings.min_length > 0 {
            validators.push(Arc::new(MinimumLengthValidator::new(settings.min_length)));
        }
        if settings.common_passwords {
            validators.push(Arc::new(CommonPasswordValidator::default()));
        }
        if settings.numeric {
            validators.push(Arc::new(NumericPasswordValidator));
        }
        Self { validators }
    }

    /// Run every validator and collect all issues.
    pub fn validate(
        &self,
        password: &str,
        user: Option<&dyn UserAttributes>,
    ) -> Result<(), Vec<ValidationIssue>> {
        let issues: Vec<ValidationIssue> = self
            .validators
            .iter()
            .filter_map(|v| v.validate(password, user).err())
            .collect();
        if issues.is_empty() {
            Ok(())
        } else {
            debug!("Password rejected by {} validator(s)", issues.len());
            Err(issues)
        }
    }

    pub fn help_texts(&self) -> Vec<String> {
        self.validators.iter().map(|v| v.help_text()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    struct Attrs(HashMap<&'static str, &'static str>);

    impl UserAttributes for Attrs {
        fn attribute(&self, name: &str) -> Option<&str> {
            self.0.get(name).copied()
        }
    }

    fn jsmith() -> Attrs {
        Attrs(HashMap::from([
            ("email", "agent007@example.com"),
            ("full_name", "John Smith"),
            ("short_name", "John"),
        ]))
    }

    #[rstest]
    #[case::email("agent007@example.com", "email address")]
    #[case::email_local_part("agent007x", "email address")]
    #[case::full_name_part("johnsmith", "full name")]
    #[case::case_insensitive("jOhn", "full name")]
    fn test_similarity_rejects(#[case] password: &str, #[case] verbose: &str) {
        let err = UserAttributeSimilarityValidator::default()
            .validate(password, Some(&jsmith()))
            .unwrap_err();
        assert_eq!(err.code, "password_too_similar");
        assert_eq!(err.message, format!("The password is too similar to the {}.", verbose));
    }

    #[test]
    fn test_similarity_accepts_unrelated_password() {
        let validator = UserAttributeSimilarityValidator::default();
        assert!(validator.validate("correct horse battery", Some(&jsmith())).is_ok());
        assert!(validator.validate("agent007", None).is_ok());
    }

    #[test]
    fn test_short_attribute_parts_are_skipped() {
        let validator = UserAttributeSimilarityValidator::default();
        let user = Attrs(HashMap::from([("short_name", "Al")]));
        assert!(validator.validate("alalalalalalalalalalal", Some(&user)).is_ok());
    }

    #[test]
    fn test_quick_ratio() {
        assert_eq!(quick_ratio("abcd", "abcd"), 1.0);
        assert_eq!(quick_ratio("abcd", "efgh"), 0.0);
        assert_eq!(quick_ratio("", ""), 1.0);
        assert_eq!(quick_ratio("ab", "ba"), 1.0);
    }

    #[rstest]
    #[case("1234567", false)]
    #[case("12345678", true)]
    #[case("ünïcödé", false)]
    fn test_minimum_length(#[case] password: &str, #[case] ok: bool) {
        let result = MinimumLengthValidator::default().validate(password, None);
        assert_eq!(result.is_ok(), ok);
        if let Err(issue) = result {
            assert_eq!(
                issue.message,
                "This password is too short. It must contain at least 8 characters."
            );
        }
    }

    #[rstest]
    #[case("password", false)]
    #[case(" PaSsWoRd ", false)]
    #[case("qwerty123", false)]
    #[case("a-rather-unusual-phrase", true)]
    fn test_common_passwords(#[case] password: &str, #[case] ok: bool) {
        assert_eq!(CommonPasswordValidator::default().validate(password, None).is_ok(), ok);
    }

    #[test]
    fn test_numeric() {
        let validator = NumericPasswordValidator;
        let err = validator.validate("0123456789", None).unwrap_err();
        assert_eq!(err.message, "This password is entirely numeric.");
        assert!(validator.validate("0123abc", None).is_ok());
    }

    #[test]
    fn test_validators_report_every_issue() {
        let validators = PasswordValidators::from_settings(&PasswordValidatorSettings::default());
        let issues = validators.validate("123", None).unwrap_err();
        let codes: Vec<_> = issues.iter().map(|i| i.code).collect();
        assert_eq!(codes, vec!["password_too_short", "password_entirely_numeric"]);
        assert_eq!(validators.help_texts().len(), 4);
    }

    #[test]
    fn test_disabled_validators() {
        let settings = PasswordValidatorSettings {
            min_length: 0,
            max_similarity: None,
            common_passwords: false,
            numeric: false,
            ..Default::default()
        };
        let validators = PasswordValidators::from_settings(&settings);
        assert!(validators.validate("1", None).is_ok());
        assert!(validators.help_texts().is_empty());
    }
}
