//! Password hashing.
//!
//! Encoded passwords are PHC strings (`$argon2id$v=19$m=…`,
//! `$pbkdf2-sha256$i=…`), so the algorithm and its cost parameters travel
//! with the hash. [`Hashers`] holds an ordered list of hashers: the first
//! one encodes new passwords, every one of them can verify.

use std::fmt;
use std::sync::Arc;

use argon2::password_hash::{
    PasswordHash, PasswordHasher as PhcHasher, PasswordVerifier, SaltString,
};
use argon2::{Algorithm, Argon2, Params, Version};
use pbkdf2::Pbkdf2;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::HashError;

/// Marks a stored password that can never match.
pub const UNUSABLE_PASSWORD_PREFIX: char = '!';
/// Number of random characters appended to [`UNUSABLE_PASSWORD_PREFIX`].
pub const UNUSABLE_PASSWORD_SUFFIX_LENGTH: usize = 40;

/// A single hashing algorithm.
pub trait PasswordHasher: Send + Sync + fmt::Debug {
    /// PHC algorithm identifier, e.g. `argon2id`.
    fn algorithm(&self) -> &'static str;

    /// Hash `password` with a fresh random salt.
    fn encode(&self, password: &str) -> Result<String, HashError>;

    /// Check `password` against an encoded value produced by this hasher.
    fn verify(&self, password: &str, encoded: &str) -> bool;

    /// Whether `encoded` was produced with different cost parameters than
    /// the ones this hasher is configured with.
    fn must_update(&self, _encoded: &str) -> bool {
        false
    }

    /// Labelled, masked parts of `encoded` that are safe to display.
    fn safe_summary(&self, encoded: &str) -> Vec<(&'static str, String)>;
}

/// Argon2id, the preferred hasher.
#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    memory_kib: u32,
    iterations: u32,
    parallelism: u32,
}

impl Argon2Hasher {
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, HashError> {
        // Reject bad parameters up front instead of on the first login.
        Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| HashError::Params(e.to_string()))?;
        Ok(Self {
            memory_kib,
            iterations,
            parallelism,
        })
    }

    fn context(&self) -> Result<Argon2<'static>, HashError> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None)
            .map_err(|e| HashError::Params(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl PasswordHasher for Argon2Hasher {
    fn algorithm(&self) -> &'static str {
        "argon2id"
    }

    fn encode(&self, password: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        self.context()?
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| HashError::Hashing(e.to_string()))
    }

    fn verify(&self, password: &str, encoded: &str) -> bool {
        match PasswordHash::new(encoded) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    fn must_update(&self, encoded: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(encoded) else {
            return false;
        };
        match Params::try_from(&parsed) {
            Ok(params) => {
                params.m_cost() != self.memory_kib
                    || params.t_cost() != self.iterations
                    || params.p_cost() != self.parallelism
            }
            Err(_) => true,
        }
    }

    fn safe_summary(&self, encoded: &str) -> Vec<(&'static str, String)> {
        let Ok(parsed) = PasswordHash::new(encoded) else {
            return Vec::new();
        };
        let param = |name: &str| {
            parsed
                .params
                .get_decimal(name)
                .map(|value| value.to_string())
                .unwrap_or_default()
        };
        vec![
            ("algorithm", self.algorithm().to_string()),
            ("version", parsed.version.map(|v| v.to_string()).unwrap_or_default()),
            ("memory cost", param("m")),
            ("time cost", param("t")),
            ("parallelism", param("p")),
            ("salt", mask_hash(&parsed.salt.map(|s| s.as_str().to_string()).unwrap_or_default())),
            ("hash", mask_hash(&parsed.hash.map(|h| h.to_string()).unwrap_or_default())),
        ]
    }
}

/// PBKDF2 with HMAC-SHA256. Kept so older hashes keep verifying and are
/// upgraded to the preferred hasher on the next successful login.
#[derive(Debug, Clone)]
pub struct Pbkdf2Hasher {
    rounds: u32,
}

impl Pbkdf2Hasher {
    pub const DEFAULT_ROUNDS: u32 = 600_000;

    pub fn new(rounds: u32) -> Result<Self, HashError> {
        if rounds == 0 {
            return Err(HashError::Params("pbkdf2 rounds must be positive".to_string()));
        }
        Ok(Self { rounds })
    }
}

impl Default for Pbkdf2Hasher {
    fn default() -> Self {
        Self {
            rounds: Self::DEFAULT_ROUNDS,
        }
    }
}

impl PasswordHasher for Pbkdf2Hasher {
    fn algorithm(&self) -> &'static str {
        "pbkdf2-sha256"
    }

    fn encode(&self, password: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        let params = pbkdf2::Params {
            rounds: self.rounds,
            output_length: 32,
        };
        Pbkdf2
            .hash_password_customized(
                password.as_bytes(),
                Some(pbkdf2::Algorithm::Pbkdf2Sha256.ident()),
                None,
                params,
                &salt,
            )
            .map(|hash| hash.to_string())
            .map_err(|e| HashError::Hashing(e.to_string()))
    }

    fn verify(&self, password: &str, encoded: &str) -> bool {
        match PasswordHash::new(encoded) {
            Ok(parsed) => Pbkdf2.verify_password(password.as_bytes(), &parsed).is_ok(),
            Err(_) => false,
        }
    }

    fn must_update(&self, encoded: &str) -> bool {
        match PasswordHash::new(encoded) {
            Ok(parsed) => parsed.params.get_decimal("i") != Some(self.rounds),
            Err(_) => false,
        }
    }

    fn safe_summary(&self, encoded: &str) -> Vec<(&'static str, String)> {
        let Ok(parsed) = PasswordHash::new(encoded) else {
            return Vec::new();
        };
        vec![
            ("algorithm", self.algorithm().to_string()),
            (
                "iterations",
                parsed
                    .params
                    .get_decimal("i")
                    .map(|i| i.to_string())
                    .unwrap_or_default(),
            ),
            ("salt", mask_hash(&parsed.salt.map(|s| s.as_str().to_string()).unwrap_or_default())),
            ("hash", mask_hash(&parsed.hash.map(|h| h.to_string()).unwrap_or_default())),
        ]
    }
}

/// Show the first six characters and star out the rest.
fn mask_hash(value: &str) -> String {
    let shown: String = value.chars().take(6).collect();
    let hidden = value.chars().count().saturating_sub(6);
    format!("{}{}", shown, "*".repeat(hidden))
}

/// Whether `encoded` can ever match a password.
pub fn is_password_usable(encoded: &str) -> bool {
    !encoded.is_empty() && !encoded.starts_with(UNUSABLE_PASSWORD_PREFIX)
}

/// Outcome of checking a raw password against a stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordCheck {
    Mismatch,
    Match,
    /// Matched, and the stored hash should be replaced because it was made
    /// by a non-preferred hasher or with outdated parameters.
    MatchNeedsUpgrade,
}

impl PasswordCheck {
    pub fn is_match(self) -> bool {
        !matches!(self, PasswordCheck::Mismatch)
    }
}

/// What the admin shows in place of a password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "parts", rename_all = "snake_case")]
pub enum PasswordSummary {
    NoPassword,
    UnknownAlgorithm,
    Known(Vec<(String, String)>),
}

impl fmt::Display for PasswordSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PasswordSummary::NoPassword => write!(f, "No password set."),
            PasswordSummary::UnknownAlgorithm => {
                write!(f, "Invalid password format or unknown hashing algorithm.")
            }
            PasswordSummary::Known(parts) => {
                let rendered: Vec<String> = parts
                    .iter()
                    .map(|(label, value)| format!("{}: {}", label, value))
                    .collect();
                write!(f, "{}", rendered.join(" "))
            }
        }
    }
}

/// Which hasher encodes new passwords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HasherAlgorithm {
    #[default]
    Argon2,
    Pbkdf2Sha256,
}

/// Hasher configuration, usually loaded as part of the application settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HasherSettings {
    pub preferred: HasherAlgorithm,
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
    pub argon2_parallelism: u32,
    pub pbkdf2_rounds: u32,
}

impl Default for HasherSettings {
    fn default() -> Self {
        Self {
            preferred: HasherAlgorithm::Argon2,
            argon2_memory_kib: Params::DEFAULT_M_COST,
            argon2_iterations: Params::DEFAULT_T_COST,
            argon2_parallelism: Params::DEFAULT_P_COST,
            pbkdf2_rounds: Pbkdf2Hasher::DEFAULT_ROUNDS,
        }
    }
}

/// Ordered set of hashers; the first is preferred.
#[derive(Debug, Clone)]
pub struct Hashers {
    hashers: Vec<Arc<dyn PasswordHasher>>,
}

impl Hashers {
    pub fn new(preferred: Arc<dyn PasswordHasher>) -> Self {
        Self {
            hashers: vec![preferred],
        }
    }

    /// Add a hasher that is only used to verify existing hashes.
    pub fn with_fallback(mut self, hasher: Arc<dyn PasswordHasher>) -> Self {
        self.hashers.push(hasher);
        self
    }

    /// Build the hasher list from settings. Both algorithms are always
    /// available for verification.
    pub fn from_settings(settings: &HasherSettings) -> Result<Self, HashError> {
        let argon2: Arc<dyn PasswordHasher> = Arc::new(Argon2Hasher::new(
            settings.argon2_memory_kib,
            settings.argon2_iterations,
            settings.argon2_parallelism,
        )?);
        let pbkdf2: Arc<dyn PasswordHasher> = Arc::new(Pbkdf2Hasher::new(settings.pbkdf2_rounds)?);

        Ok(match settings.preferred {
            HasherAlgorithm::Argon2 => Hashers::new(argon2).with_fallback(pbkdf2),
            HasherAlgorithm::Pbkdf2Sha256 => Hashers::new(pbkdf2).with_fallback(argon2),
        })
    }

    pub fn preferred(&self) -> &dyn PasswordHasher {
        self.hashers[0].as_ref()
    }

    /// Find the hasher that produced `encoded`.
    pub fn identify(&self, encoded: &str) -> Option<&dyn PasswordHasher> {
        let parsed = PasswordHash::new(encoded).ok()?;
        let algorithm = parsed.algorithm.as_str();
        self.hashers
            .iter()
            .find(|hasher| hasher.algorithm() == algorithm)
            .map(|hasher| hasher.as_ref())
    }

    /// Encode `password` with the preferred hasher, or produce an unusable
    /// sentinel for `None`.
    pub fn make_password(&self, password: Option<&str>) -> Result<String, HashError> {
        match password {
            Some(password) => self.preferred().encode(password),
            None => Ok(make_unusable_password()),
        }
    }

    pub fn check_password(&self, password: &str, encoded: &str) -> PasswordCheck {
        if !is_password_usable(encoded) {
            return PasswordCheck::Mismatch;
        }
        let Some(hasher) = self.identify(encoded) else {
            warn!("Stored password uses an unknown hashing algorithm");
            return PasswordCheck::Mismatch;
        };
        if !hasher.verify(password, encoded) {
            return PasswordCheck::Mismatch;
        }
        if self.must_update(encoded) {
            debug!("Stored password hash is outdated (algorithm: {})", hasher.algorithm());
            PasswordCheck::MatchNeedsUpgrade
        } else {
            PasswordCheck::Match
        }
    }

    /// Whether `encoded` should be re-hashed with the preferred hasher.
    pub fn must_update(&self, encoded: &str) -> bool {
        let preferred = self.preferred();
        match self.identify(encoded) {
            Some(hasher) if hasher.algorithm() == preferred.algorithm() => {
                preferred.must_update(encoded)
            }
            Some(_) => true,
            None => false,
        }
    }

    pub fn summary(&self, encoded: &str) -> PasswordSummary {
        if !is_password_usable(encoded) {
            return PasswordSummary::NoPassword;
        }
        match self.identify(encoded) {
            Some(hasher) => PasswordSummary::Known(
                hasher
                    .safe_summary(encoded)
                    .into_iter()
                    .map(|(label, value)| (label.to_string(), value))
                    .collect(),
            ),
            None => PasswordSummary::UnknownAlgorithm,
        }
    }

    /// Spend the same effort as a real check. Used when a login names an
    /// account that does not exist so both paths take comparable time.
    pub fn run_dummy(&self, password: &str) {
        let _ = self.preferred().encode(password);
    }
}

/// A fresh sentinel value that no password will ever match.
pub fn make_unusable_password() -> String {
    let suffix: String = OsRng
        .sample_iter(&Alphanumeric)
        .take(UNUSABLE_PASSWORD_SUFFIX_LENGTH)
        .map(char::from)
        .collect();
    format!("{}{}", UNUSABLE_PASSWORD_PREFIX, suffix)
}
