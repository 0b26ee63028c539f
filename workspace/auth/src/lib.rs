//! Email-keyed user accounts: the user entity and its manager, password
//! hashing and validation, permission resolution, and the forms used to
//! add and edit users.

pub mod backends;
pub mod email;
pub mod error;
#[cfg(any(test, feature = "factories"))]
pub mod factories;
pub mod forms;
pub mod hashers;
pub mod mail;
pub mod manager;
pub mod signals;
pub mod user;
pub mod validators;

pub use backends::{AuthBackend, Backends, ModelBackend, ObjectRef};
pub use error::{AuthError, HashError, InvariantError, MailError, Result};
pub use forms::{AdminPasswordChangeForm, FormErrors, UserChangeForm, UserCreationForm};
pub use hashers::{HasherSettings, Hashers, PasswordCheck, PasswordSummary};
pub use mail::{LocmemMailer, MailOptions, Mailer, TracingMailer};
pub use manager::{ExtraFields, UserManager};
pub use signals::Signals;
pub use user::User;
pub use validators::{PasswordValidatorSettings, PasswordValidators};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use migration::{Migrator, MigratorTrait};
    use sea_orm::{ConnectionTrait, Database, DatabaseConnection};

    use crate::hashers::{Argon2Hasher, Hashers, Pbkdf2Hasher};

    /// In-memory database with the full schema and default permissions.
    pub async fn setup_db() -> DatabaseConnection {
        let _ = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_max_level(tracing::Level::DEBUG)
            .try_init();

        let db = Database::connect("sqlite::memory:")
            .await
            .expect("Failed to connect to test database");
        db.execute_unprepared("PRAGMA foreign_keys = ON")
            .await
            .expect("Failed to enable foreign keys");
        Migrator::up(&db, None)
            .await
            .expect("Failed to run migrations");
        db
    }

    /// Argon2 preferred, PBKDF2 for verification, both at minimal cost.
    pub fn fast_hashers() -> Hashers {
        Hashers::new(Arc::new(Argon2Hasher::new(1024, 1, 1).unwrap()))
            .with_fallback(Arc::new(Pbkdf2Hasher::new(1_000).unwrap()))
    }

    /// Only PBKDF2, standing in for hashes written by an older configuration.
    pub fn pbkdf2_only_hashers() -> Hashers {
        Hashers::new(Arc::new(Pbkdf2Hasher::new(1_000).unwrap()))
    }
}
