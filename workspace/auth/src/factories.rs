//! Test data builders.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Result;
use crate::manager::UserManager;
use crate::user::User;

/// Password given to every user built by [`UserFactory`].
pub const FACTORY_PASSWORD: &str = "password!";

const FIRST_NAMES: &[&str] = &["Ada", "Grace", "Alan", "Edsger", "Barbara", "Donald", "Frances"];
const LAST_NAMES: &[&str] = &["Lovelace", "Hopper", "Turing", "Dijkstra", "Liskov", "Knuth", "Allen"];

static SEQUENCE: AtomicUsize = AtomicUsize::new(0);

/// Builds active, unprivileged users with unique emails, believable names
/// and the password [`FACTORY_PASSWORD`].
#[derive(Debug, Clone)]
pub struct UserFactory<'a> {
    manager: &'a UserManager,
    email: Option<String>,
    full_name: Option<String>,
    short_name: Option<String>,
    is_active: bool,
    is_staff: bool,
    is_superuser: bool,
}

impl<'a> UserFactory<'a> {
    pub fn new(manager: &'a UserManager) -> Self {
        Self {
            manager,
            email: None,
            full_name: None,
            short_name: None,
            is_active: true,
            is_staff: false,
            is_superuser: false,
        }
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
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
        self.is_active = is_active;
        self
    }

    pub fn is_staff(mut self, is_staff: bool) -> Self {
        self.is_staff = is_staff;
        self
    }

    pub fn is_superuser(mut self, is_superuser: bool) -> Self {
        self.is_superuser = is_superuser;
        self
    }

    /// An unsaved user.
    pub fn build(&self) -> Result<User> {
        let n = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let first = FIRST_NAMES[n % FIRST_NAMES.len()];
        let last = LAST_NAMES[(n / FIRST_NAMES.len()) % LAST_NAMES.len()];

        let mut user = User::new(self.email.clone().unwrap_or_else(|| {
            format!("{}.{}{}@example.com", first.to_lowercase(), last.to_lowercase(), n)
        }));
        user.names.full_name = self
            .full_name
            .clone()
            .unwrap_or_else(|| format!("{} {}", first, last));
        user.names.short_name = self.short_name.clone().unwrap_or_else(|| first.to_string());
        user.status.is_active = self.is_active;
        user.status.is_staff = self.is_staff;
        user.privileges.is_superuser = self.is_superuser;
        user.set_password(Some(FACTORY_PASSWORD), self.manager.hashers())?;
        Ok(user)
    }

    /// A saved user.
    pub async fn create(&self) -> Result<User> {
        let mut user = self.build()?;
        self.manager.save(&mut user).await?;
        Ok(user)
    }

    pub async fn create_batch(&self, count: usize) -> Result<Vec<User>> {
        let mut users = Vec::with_capacity(count);
        for _ in 0..count {
            users.push(self.create().await?);
        }
        Ok(users)
    }
}
