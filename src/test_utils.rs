#[cfg(test)]
pub mod test_utils {
    use crate::config::{Settings, app_state_with_db};
    use crate::router::create_router;
    use crate::schemas::AppState;
    use auth::factories::{FACTORY_PASSWORD, UserFactory};
    use auth::hashers::HasherSettings;
    use auth::User;
    use axum::Router;
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{ConnectionTrait, Database, DatabaseConnection};
    use tracing::Level;
    use tracing_subscriber::FmtSubscriber;

    /// Create an in-memory SQLite database for testing
    pub async fn setup_test_db() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("Failed to connect to in-memory database");
        db.execute_unprepared("PRAGMA foreign_keys = ON")
            .await
            .expect("Failed to enable foreign keys");

        // Run migrations
        Migrator::up(&db, None)
            .await
            .expect("Failed to run migrations");

        db
    }

    /// Default settings with hashers cheap enough for tests.
    pub fn test_settings() -> Settings {
        Settings {
            hashers: HasherSettings {
                argon2_memory_kib: 1024,
                argon2_iterations: 1,
                argon2_parallelism: 1,
                pbkdf2_rounds: 1_000,
                ..HasherSettings::default()
            },
            ..Settings::default()
        }
    }

    /// Create AppState for testing
    pub async fn setup_test_app_state() -> AppState {
        let db = setup_test_db().await;
        app_state_with_db(db, test_settings()).expect("Failed to build application state")
    }

    /// Initialize tracing for tests with output to STDERR.
    ///
    /// The log level is determined by the RUST_LOG environment variable,
    /// defaulting to WARN if not set.
    ///
    /// # Returns
    ///
    /// A guard that will clean up the subscriber when dropped.
    pub fn init_test_tracing() -> tracing::subscriber::DefaultGuard {
        let log_level = std::env::var("RUST_LOG")
            .ok()
            .and_then(|level| match level.to_uppercase().as_str() {
                "ERROR" => Some(Level::ERROR),
                "WARN" => Some(Level::WARN),
                "INFO" => Some(Level::INFO),
                "DEBUG" => Some(Level::DEBUG),
                "TRACE" => Some(Level::TRACE),
                _ => None,
            })
            .unwrap_or(Level::WARN);

        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    /// Create axum app for testing
    pub async fn setup_test_app() -> Router {
        setup_test_app_with_state().await.0
    }

    /// Create axum app for testing, keeping a handle on its state
    pub async fn setup_test_app_with_state() -> (Router, AppState) {
        let _guard = init_test_tracing();

        let state = setup_test_app_state().await;
        let router = create_router(state.clone());
        (router, state)
    }

    /// A saved, active staff member holding exactly `perms`. Their password
    /// is [`FACTORY_PASSWORD`].
    pub async fn create_staff(state: &AppState, email: &str, perms: &[&str]) -> User {
        let user = UserFactory::new(&state.manager)
            .email(email)
            .is_staff(true)
            .create()
            .await
            .expect("Failed to create staff user");
        let id = user.id.expect("Saved user has an id");
        for perm in perms {
            state
                .backend
                .grant_to_user(id, perm)
                .await
                .expect("Failed to grant permission");
        }
        user
    }

    /// `Authorization` header value for HTTP Basic credentials.
    pub fn basic_auth(email: &str, password: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:{}", email, password)))
    }

    /// `Authorization` header value for a user created by [`create_staff`].
    pub fn staff_auth(user: &User) -> String {
        basic_auth(user.email(), FACTORY_PASSWORD)
    }
}
