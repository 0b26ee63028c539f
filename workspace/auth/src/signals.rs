//! Synchronous save notifications.
//!
//! A [`Signals`] value is handed to the [`crate::manager::UserManager`]
//! when it is constructed; nothing here is global. Callbacks run in the
//! order they were registered, on the caller's thread, after the row has
//! been written.

use std::fmt;
use std::sync::Arc;

use crate::user::User;

/// Called after every save. The flag is `true` when the row was inserted.
pub type PostSaveHook = Arc<dyn Fn(&User, bool) + Send + Sync>;
/// Called after a save that persisted a newly set password.
pub type PasswordChangedHook = Arc<dyn Fn(&User) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Signals {
    post_save: Vec<PostSaveHook>,
    password_changed: Vec<PasswordChangedHook>,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_post_save<F>(mut self, hook: F) -> Self
    where
        F: Fn(&User, bool) + Send + Sync + 'static,
    {
        self.post_save.push(Arc::new(hook));
        self
    }

    pub fn on_password_changed<F>(mut self, hook: F) -> Self
    where
        F: Fn(&User) + Send + Sync + 'static,
    {
        self.password_changed.push(Arc::new(hook));
        self
    }

    pub(crate) fn emit_post_save(&self, user: &User, created: bool) {
        for hook in &self.post_save {
            hook(user, created);
        }
    }

    pub(crate) fn emit_password_changed(&self, user: &User) {
        for hook in &self.password_changed {
            hook(user);
        }
    }
}

impl fmt::Debug for Signals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signals")
            .field("post_save", &self.post_save.len())
            .field("password_changed", &self.password_changed.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_hooks_run_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let first = calls.clone();
        let second = calls.clone();
        let signals = Signals::new()
            .on_post_save(move |_, created| first.lock().unwrap().push(("first", created)))
            .on_post_save(move |_, created| second.lock().unwrap().push(("second", created)));

        let user = User::new("order@example.com");
        signals.emit_post_save(&user, true);
        signals.emit_password_changed(&user);

        assert_eq!(*calls.lock().unwrap(), vec![("first", true), ("second", true)]);
    }
}
