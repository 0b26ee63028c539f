use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use auth::{
    Backends, HasherSettings, Hashers, ModelBackend, PasswordValidatorSettings,
    PasswordValidators, Signals, TracingMailer, UserManager,
};
use sea_orm::{Database, DatabaseConnection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use validator::Validate;

use crate::admin::UserAdmin;
use crate::schemas::AppState;

/// Name of the optional settings file (`improved_user.toml`, `.yaml` or `.json`).
pub const SETTINGS_FILE: &str = "improved_user";
/// Prefix for settings taken from the environment, e.g. `IMPROVED_USER__BIND_ADDRESS`.
pub const ENV_PREFIX: &str = "IMPROVED_USER";

/// Application settings.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct Settings {
    #[validate(length(min = 1))]
    pub database_url: String,
    #[validate(length(min = 1))]
    pub bind_address: String,
    /// Sender for mail that does not name one
    #[validate(email)]
    pub default_from_email: String,
    pub hashers: HasherSettings,
    pub password_validators: PasswordValidatorSettings,
    /// How long resolved permission sets stay cached
    #[validate(range(min = 1))]
    pub permission_cache_ttl_secs: u64,
    /// Overrides the `../password/` link on the change view
    pub password_change_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://improved_user.db?mode=rwc".to_string(),
            bind_address: "0.0.0.0:3000".to_string(),
            default_from_email: "webmaster@localhost".to_string(),
            hashers: HasherSettings::default(),
            password_validators: PasswordValidatorSettings::default(),
            permission_cache_ttl_secs: 300,
            password_change_url: None,
        }
    }
}

impl Settings {
    /// Defaults, then the optional settings file, then the environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(SETTINGS_FILE).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        let settings: Settings = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        settings
            .validate()
            .context("Configuration validation failed")?;

        Ok(settings)
    }

    pub fn permission_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.permission_cache_ttl_secs)
    }
}

/// Connect to the configured database and build the application state.
pub async fn initialize_app_state(settings: Settings) -> Result<AppState> {
    info!("Connecting to database: {}", settings.database_url);
    let db = Database::connect(&settings.database_url)
        .await
        .with_context(|| format!("Failed to connect to database '{}'", settings.database_url))?;

    app_state_with_db(db, settings)
}

/// Build the application state around an existing connection.
pub fn app_state_with_db(db: DatabaseConnection, settings: Settings) -> Result<AppState> {
    let hashers = Hashers::from_settings(&settings.hashers).context("Invalid hasher settings")?;
    debug!("Preferred password hasher: {}", hashers.preferred().algorithm());

    let signals = Signals::new().on_password_changed(|user| {
        info!("Password changed for user {:?} ({})", user.id, user.email());
    });
    let manager = UserManager::new(db.clone(), Arc::new(hashers)).with_signals(signals);

    let backend = Arc::new(ModelBackend::new(
        manager.clone(),
        settings.permission_cache_ttl(),
    ));
    let backends = Backends::single(backend.clone());
    let validators = PasswordValidators::from_settings(&settings.password_validators);
    let mailer = Arc::new(TracingMailer::new(settings.default_from_email.clone()));
    let admin = UserAdmin::default();
    admin.check().context("Invalid user admin configuration")?;

    Ok(AppState {
        db,
        manager,
        backend,
        backends,
        validators: Arc::new(validators),
        mailer,
        admin: Arc::new(admin),
        settings: Arc::new(settings),
    })
}
