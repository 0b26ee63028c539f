//! Authentication and permission resolution.
//!
//! A permission is addressed as `"<app_label>.<codename>"`. A user holds a
//! permission when the account is active and it is either a superuser or
//! the permission is granted directly or through one of its groups.
//! Inactive accounts hold nothing, superusers included.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use model::entities::{group, group_permission, permission, user_group, user_permission};
use moka::future::Cache;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, JoinType, QueryFilter, QueryOrder, QuerySelect,
    RelationTrait, Set,
};
use tracing::{debug, info, instrument, trace, warn};

use crate::error::{AuthError, Result};
use crate::manager::UserManager;
use crate::user::User;

/// A specific object a permission check is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub model: String,
    pub pk: String,
}

#[async_trait]
pub trait AuthBackend: Send + Sync + fmt::Debug {
    /// The user identified by `email` if `password` is theirs and they may
    /// log in.
    async fn authenticate(&self, email: &str, password: &str) -> Result<Option<User>>;

    async fn get_user_permissions(
        &self,
        user: &User,
        obj: Option<&ObjectRef>,
    ) -> Result<BTreeSet<String>>;

    async fn get_group_permissions(
        &self,
        user: &User,
        obj: Option<&ObjectRef>,
    ) -> Result<BTreeSet<String>>;

    async fn get_all_permissions(
        &self,
        user: &User,
        obj: Option<&ObjectRef>,
    ) -> Result<BTreeSet<String>> {
        let mut perms = self.get_user_permissions(user, obj).await?;
        perms.extend(self.get_group_permissions(user, obj).await?);
        Ok(perms)
    }

    async fn has_perm(&self, user: &User, perm: &str, obj: Option<&ObjectRef>) -> Result<bool> {
        Ok(user.is_active() && self.get_all_permissions(user, obj).await?.contains(perm))
    }

    async fn has_module_perms(&self, user: &User, app_label: &str) -> Result<bool> {
        let prefix = format!("{}.", app_label);
        Ok(user.is_active()
            && self
                .get_all_permissions(user, None)
                .await?
                .iter()
                .any(|perm| perm.starts_with(&prefix)))
    }
}

#[derive(Debug, Default)]
struct PermissionSets {
    user: BTreeSet<String>,
    group: BTreeSet<String>,
}

/// Authenticates against the user table and resolves permissions from the
/// grant tables. Resolved permission sets are cached per user.
#[derive(Clone)]
pub struct ModelBackend {
    manager: UserManager,
    cache: Cache<i32, Arc<PermissionSets>>,
}

impl fmt::Debug for ModelBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelBackend")
            .field("cached_users", &self.cache.entry_count())
            .finish()
    }
}

impl ModelBackend {
    pub fn new(manager: UserManager, cache_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(cache_ttl)
            .build();
        Self { manager, cache }
    }

    pub fn manager(&self) -> &UserManager {
        &self.manager
    }

    /// Drop the cached permissions of one user.
    pub async fn invalidate(&self, user_id: i32) {
        self.cache.invalidate(&user_id).await;
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    async fn permission_sets(&self, user: &User) -> Result<Arc<PermissionSets>> {
        let Some(id) = user.id else {
            return Ok(Arc::new(PermissionSets::default()));
        };
        // The cache only holds grants, so flipping `is_superuser` takes
        // effect without an invalidation.
        if user.is_superuser() {
            let all = self.all_permission_names().await?;
            return Ok(Arc::new(PermissionSets {
                user: all.clone(),
                group: all,
            }));
        }
        if let Some(sets) = self.cache.get(&id).await {
            trace!("Permission cache hit for user {}", id);
            return Ok(sets);
        }

        let db = self.manager.db();
        let user_perms = permission::Entity::find()
            .join(JoinType::InnerJoin, permission::Relation::UserPermission.def())
            .filter(user_permission::Column::UserId.eq(id))
            .all(db)
            .await?;
        let group_ids = self.user_group_ids(id).await?;
        let group_perms = if group_ids.is_empty() {
            Vec::new()
        } else {
            permission::Entity::find()
                .join(JoinType::InnerJoin, permission::Relation::GroupPermission.def())
                .filter(group_permission::Column::GroupId.is_in(group_ids))
                .all(db)
                .await?
        };
        let sets = PermissionSets {
            user: user_perms.iter().map(permission::Model::perm_name).collect(),
            group: group_perms.iter().map(permission::Model::perm_name).collect(),
        };

        debug!(
            "Resolved {} user and {} group permissions for user {}",
            sets.user.len(),
            sets.group.len(),
            id
        );
        let sets = Arc::new(sets);
        self.cache.insert(id, sets.clone()).await;
        Ok(sets)
    }

    async fn all_permission_names(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .permission_choices()
            .await?
            .iter()
            .map(permission::Model::perm_name)
            .collect())
    }

    /// Every permission, ordered by app label and codename, in one query.
    pub async fn permission_choices(&self) -> Result<Vec<permission::Model>> {
        Ok(permission::Entity::find()
            .order_by_asc(permission::Column::AppLabel)
            .order_by_asc(permission::Column::Codename)
            .all(self.manager.db())
            .await?)
    }

    pub async fn group_choices(&self) -> Result<Vec<group::Model>> {
        Ok(group::Entity::find()
            .order_by_asc(group::Column::Name)
            .all(self.manager.db())
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn create_permission(
        &self,
        app_label: &str,
        codename: &str,
        name: &str,
    ) -> Result<permission::Model> {
        let model = permission::ActiveModel {
            app_label: Set(app_label.to_string()),
            codename: Set(codename.to_string()),
            name: Set(name.to_string()),
            ..Default::default()
        }
        .insert(self.manager.db())
        .await?;
        info!("Created permission {}", model.perm_name());
        // Superusers hold every permission, so their cached sets are stale.
        self.invalidate_all();
        Ok(model)
    }

    /// Look up a permission by its dotted name.
    pub async fn get_permission(&self, perm: &str) -> Result<Option<permission::Model>> {
        let Some((app_label, codename)) = perm.split_once('.') else {
            warn!("Malformed permission name '{}'", perm);
            return Ok(None);
        };
        Ok(permission::Entity::find()
            .filter(permission::Column::AppLabel.eq(app_label))
            .filter(permission::Column::Codename.eq(codename))
            .one(self.manager.db())
            .await?)
    }

    async fn require_permission(&self, perm: &str) -> Result<permission::Model> {
        self.get_permission(perm)
            .await?
            .ok_or_else(|| AuthError::PermissionNotFound(perm.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn create_group(&self, name: &str) -> Result<group::Model> {
        let model = group::ActiveModel {
            name: Set(name.to_string()),
            ..Default::default()
        }
        .insert(self.manager.db())
        .await?;
        info!("Created group '{}' (id: {})", model.name, model.id);
        Ok(model)
    }

    /// Grant `perm` to every member of the group. Granting twice is a no-op.
    #[instrument(skip(self))]
    pub async fn grant_to_group(&self, group_id: i32, perm: &str) -> Result<()> {
        let permission = self.require_permission(perm).await?;
        group_permission::Entity::insert(group_permission::ActiveModel {
            group_id: Set(group_id),
            permission_id: Set(permission.id),
        })
        .on_conflict(
            OnConflict::columns([
                group_permission::Column::GroupId,
                group_permission::Column::PermissionId,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(self.manager.db())
        .await?;
        self.invalidate_all();
        Ok(())
    }

    /// Grant `perm` to the user directly. Granting twice is a no-op.
    #[instrument(skip(self))]
    pub async fn grant_to_user(&self, user_id: i32, perm: &str) -> Result<()> {
        let permission = self.require_permission(perm).await?;
        user_permission::Entity::insert(user_permission::ActiveModel {
            user_id: Set(user_id),
            permission_id: Set(permission.id),
        })
        .on_conflict(
            OnConflict::columns([
                user_permission::Column::UserId,
                user_permission::Column::PermissionId,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(self.manager.db())
        .await?;
        self.invalidate(user_id).await;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn add_user_to_group(&self, user_id: i32, group_id: i32) -> Result<()> {
        user_group::Entity::insert(user_group::ActiveModel {
            user_id: Set(user_id),
            group_id: Set(group_id),
        })
        .on_conflict(
            OnConflict::columns([user_group::Column::UserId, user_group::Column::GroupId])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(self.manager.db())
        .await?;
        self.invalidate(user_id).await;
        Ok(())
    }

    pub async fn user_group_ids(&self, user_id: i32) -> Result<Vec<i32>> {
        Ok(user_group::Entity::find()
            .filter(user_group::Column::UserId.eq(user_id))
            .all(self.manager.db())
            .await?
            .into_iter()
            .map(|row| row.group_id)
            .collect())
    }

    pub async fn user_permission_ids(&self, user_id: i32) -> Result<Vec<i32>> {
        Ok(user_permission::Entity::find()
            .filter(user_permission::Column::UserId.eq(user_id))
            .all(self.manager.db())
            .await?
            .into_iter()
            .map(|row| row.permission_id)
            .collect())
    }

    /// Replace the user's group memberships.
    #[instrument(skip(self))]
    pub async fn set_user_groups(&self, user_id: i32, group_ids: &[i32]) -> Result<()> {
        let db = self.manager.db();
        user_group::Entity::delete_many()
            .filter(user_group::Column::UserId.eq(user_id))
            .exec(db)
            .await?;
        if !group_ids.is_empty() {
            user_group::Entity::insert_many(group_ids.iter().map(|&group_id| {
                user_group::ActiveModel {
                    user_id: Set(user_id),
                    group_id: Set(group_id),
                }
            }))
            .exec_without_returning(db)
            .await?;
        }
        self.invalidate(user_id).await;
        Ok(())
    }

    /// Replace the user's direct permission grants.
    #[instrument(skip(self))]
    pub async fn set_user_permissions(&self, user_id: i32, permission_ids: &[i32]) -> Result<()> {
        let db = self.manager.db();
        user_permission::Entity::delete_many()
            .filter(user_permission::Column::UserId.eq(user_id))
            .exec(db)
            .await?;
        if !permission_ids.is_empty() {
            user_permission::Entity::insert_many(permission_ids.iter().map(|&permission_id| {
                user_permission::ActiveModel {
                    user_id: Set(user_id),
                    permission_id: Set(permission_id),
                }
            }))
            .exec_without_returning(db)
            .await?;
        }
        self.invalidate(user_id).await;
        Ok(())
    }
}

#[async_trait]
impl AuthBackend for ModelBackend {
    #[instrument(skip(self, password))]
    async fn authenticate(&self, email: &str, password: &str) -> Result<Option<User>> {
        let email = UserManager::normalize_email(email);
        let Some(mut user) = self.manager.get_by_natural_key(&email).await? else {
            self.manager.hashers().run_dummy(password);
            debug!("No user with that email");
            return Ok(None);
        };
        if !self.manager.check_password(&mut user, password).await? {
            debug!("Wrong password for user {:?}", user.id);
            return Ok(None);
        }
        if !user.is_active() {
            warn!("Inactive user {:?} tried to authenticate", user.id);
            return Ok(None);
        }
        Ok(Some(user))
    }

    async fn get_user_permissions(
        &self,
        user: &User,
        obj: Option<&ObjectRef>,
    ) -> Result<BTreeSet<String>> {
        if !user.is_active() || obj.is_some() {
            return Ok(BTreeSet::new());
        }
        Ok(self.permission_sets(user).await?.user.clone())
    }

    async fn get_group_permissions(
        &self,
        user: &User,
        obj: Option<&ObjectRef>,
    ) -> Result<BTreeSet<String>> {
        if !user.is_active() || obj.is_some() {
            return Ok(BTreeSet::new());
        }
        Ok(self.permission_sets(user).await?.group.clone())
    }
}

/// The configured backends, consulted in order.
#[derive(Debug, Clone, Default)]
pub struct Backends {
    backends: Vec<Arc<dyn AuthBackend>>,
}

impl Backends {
    pub fn new(backends: Vec<Arc<dyn AuthBackend>>) -> Self {
        Self { backends }
    }

    pub fn single(backend: Arc<dyn AuthBackend>) -> Self {
        Self::new(vec![backend])
    }

    /// The first backend that accepts the credentials wins.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Option<User>> {
        for backend in &self.backends {
            if let Some(user) = backend.authenticate(email, password).await? {
                return Ok(Some(user));
            }
        }
        Ok(None)
    }

    /// Authenticate and, on success, record the login.
    pub async fn login(
        &self,
        manager: &UserManager,
        email: &str,
        password: &str,
    ) -> Result<Option<User>> {
        let Some(mut user) = self.authenticate(email, password).await? else {
            return Ok(None);
        };
        manager.record_login(&mut user).await?;
        info!("User {:?} logged in", user.id);
        Ok(Some(user))
    }

    pub async fn has_perm(&self, user: &User, perm: &str, obj: Option<&ObjectRef>) -> Result<bool> {
        for backend in &self.backends {
            if backend.has_perm(user, perm, obj).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn has_module_perms(&self, user: &User, app_label: &str) -> Result<bool> {
        for backend in &self.backends {
            if backend.has_module_perms(user, app_label).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn get_user_permissions(
        &self,
        user: &User,
        obj: Option<&ObjectRef>,
    ) -> Result<BTreeSet<String>> {
        let mut perms = BTreeSet::new();
        for backend in &self.backends {
            perms.extend(backend.get_user_permissions(user, obj).await?);
        }
        Ok(perms)
    }

    pub async fn get_group_permissions(
        &self,
        user: &User,
        obj: Option<&ObjectRef>,
    ) -> Result<BTreeSet<String>> {
        let mut perms = BTreeSet::new();
        for backend in &self.backends {
            perms.extend(backend.get_group_permissions(user, obj).await?);
        }
        Ok(perms)
    }

    pub async fn get_all_permissions(
        &self,
        user: &User,
        obj: Option<&ObjectRef>,
    ) -> Result<BTreeSet<String>> {
        let mut perms = BTreeSet::new();
        for backend in &self.backends {
            perms.extend(backend.get_all_permissions(user, obj).await?);
        }
        Ok(perms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ExtraFields;
    use crate::testing::{fast_hashers, setup_db};

    async fn backend() -> Arc<ModelBackend> {
        let manager = UserManager::new(setup_db().await, Arc::new(fast_hashers()));
        Arc::new(ModelBackend::new(manager, Duration::from_secs(60)))
    }

    async fn create(backend: &ModelBackend, email: &str, extra: ExtraFields) -> User {
        backend
            .manager()
            .create_user(email, Some("test"), extra)
            .await
            .unwrap()
    }

    fn set(perms: &[&str]) -> BTreeSet<String> {
        perms.iter().map(|p| p.to_string()).collect()
    }

    #[tokio::test]
    async fn test_authenticate() {
        let backend = backend().await;
        create(&backend, "test@example.com", ExtraFields::new()).await;

        let user = backend.authenticate("test@EXAMPLE.COM", "test").await.unwrap();
        assert_eq!(user.unwrap().email(), "test@example.com");
        assert!(backend.authenticate("test@example.com", "nope").await.unwrap().is_none());
        assert!(backend.authenticate("missing@example.com", "test").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_inactive_user_cannot_authenticate() {
        let backend = backend().await;
        create(&backend, "inactive@example.com", ExtraFields::new().is_active(false)).await;
        assert!(backend
            .authenticate("inactive@example.com", "test")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_login_records_last_login() {
        let backend = backend().await;
        create(&backend, "login@example.com", ExtraFields::new()).await;
        let backends = Backends::single(backend.clone());

        let user = backends
            .login(backend.manager(), "login@example.com", "test")
            .await
            .unwrap()
            .unwrap();
        assert!(user.last_login().is_some());
        assert!(backends
            .login(backend.manager(), "login@example.com", "bad")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_user_and_group_permissions() {
        let backend = backend().await;
        let backends = Backends::single(backend.clone());
        let user = create(&backend, "test@example.com", ExtraFields::new()).await;
        let user_id = user.id.unwrap();

        backend.create_permission("auth", "test", "test").await.unwrap();
        backend.create_permission("auth", "test2", "test2").await.unwrap();
        backend.create_permission("auth", "test3", "test3").await.unwrap();

        backend.grant_to_user(user_id, "auth.test").await.unwrap();
        assert_eq!(user.get_user_permissions(&backends, None).await.unwrap(), set(&["auth.test"]));
        assert!(user.has_perm(&backends, "auth.test", None).await.unwrap());
        assert!(!user.has_perm(&backends, "auth.test2", None).await.unwrap());

        let group = backend.create_group("test_group").await.unwrap();
        backend.grant_to_group(group.id, "auth.test3").await.unwrap();
        backend.add_user_to_group(user_id, group.id).await.unwrap();

        assert_eq!(
            user.get_group_permissions(&backends, None).await.unwrap(),
            set(&["auth.test3"])
        );
        assert_eq!(
            user.get_all_permissions(&backends, None).await.unwrap(),
            set(&["auth.test", "auth.test3"])
        );
        assert!(user.has_perms(&backends, &["auth.test", "auth.test3"], None).await.unwrap());
        assert!(!user.has_perms(&backends, &["auth.test", "auth.test2"], None).await.unwrap());
        assert!(user.has_module_perms(&backends, "auth").await.unwrap());
        assert!(!user.has_module_perms(&backends, "improved_user").await.unwrap());
    }

    #[tokio::test]
    async fn test_superuser_has_every_permission() {
        let backend = backend().await;
        let backends = Backends::single(backend.clone());
        let user = backend
            .manager()
            .create_superuser("super@example.com", Some("test"), ExtraFields::new())
            .await
            .unwrap();

        let all = user.get_all_permissions(&backends, None).await.unwrap();
        assert!(all.contains("improved_user.add_user"));
        assert!(all.contains("auth.view_group"));
        assert!(user.has_perm(&backends, "anything.at_all", None).await.unwrap());

        backend.create_permission("custom", "fly", "Can fly").await.unwrap();
        assert!(user
            .get_all_permissions(&backends, None)
            .await
            .unwrap()
            .contains("custom.fly"));
    }

    #[tokio::test]
    async fn test_demoted_superuser_loses_permissions() {
        let backend = backend().await;
        let backends = Backends::single(backend.clone());
        let mut user = backend
            .manager()
            .create_superuser("demoted@example.com", Some("test"), ExtraFields::new())
            .await
            .unwrap();
        let id = user.id.unwrap();
        backend.grant_to_user(id, "improved_user.view_user").await.unwrap();
        assert!(user
            .get_all_permissions(&backends, None)
            .await
            .unwrap()
            .contains("improved_user.delete_user"));

        user.privileges.is_superuser = false;
        backend.manager().save(&mut user).await.unwrap();
        let user = backend.manager().get(id).await.unwrap().unwrap();

        assert!(!user.has_perm(&backends, "improved_user.delete_user", None).await.unwrap());
        assert!(user.has_perm(&backends, "improved_user.view_user", None).await.unwrap());
        assert_eq!(
            user.get_all_permissions(&backends, None).await.unwrap(),
            set(&["improved_user.view_user"])
        );

        let mut user = user;
        user.privileges.is_superuser = true;
        backend.manager().save(&mut user).await.unwrap();
        assert!(user.has_perm(&backends, "improved_user.delete_user", None).await.unwrap());
        assert!(user
            .get_all_permissions(&backends, None)
            .await
            .unwrap()
            .contains("improved_user.delete_user"));
    }

    #[tokio::test]
    async fn test_inactive_users_have_no_permissions() {
        let backend = backend().await;
        let backends = Backends::single(backend.clone());
        let mut user = backend
            .manager()
            .create_superuser("super@example.com", Some("test"), ExtraFields::new())
            .await
            .unwrap();
        backend.grant_to_user(user.id.unwrap(), "improved_user.view_user").await.unwrap();

        user.status.is_active = false;
        backend.manager().save(&mut user).await.unwrap();

        assert!(!user.has_perm(&backends, "improved_user.view_user", None).await.unwrap());
        assert!(!user.has_module_perms(&backends, "improved_user").await.unwrap());
        assert!(user.get_all_permissions(&backends, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_object_permissions_are_denied() {
        let backend = backend().await;
        let backends = Backends::single(backend.clone());
        let user = create(&backend, "obj@example.com", ExtraFields::new()).await;
        backend.grant_to_user(user.id.unwrap(), "improved_user.change_user").await.unwrap();

        let obj = ObjectRef {
            model: "user".to_string(),
            pk: "1".to_string(),
        };
        assert!(!user.has_perm(&backends, "improved_user.change_user", Some(&obj)).await.unwrap());
        assert!(user.get_all_permissions(&backends, Some(&obj)).await.unwrap().is_empty());
        assert!(user.get_group_permissions(&backends, Some(&obj)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_user_groups_replaces_memberships() {
        let backend = backend().await;
        let user = create(&backend, "groups@example.com", ExtraFields::new()).await;
        let id = user.id.unwrap();
        let a = backend.create_group("a").await.unwrap();
        let b = backend.create_group("b").await.unwrap();

        backend.set_user_groups(id, &[a.id, b.id]).await.unwrap();
        assert_eq!(backend.user_group_ids(id).await.unwrap().len(), 2);
        backend.set_user_groups(id, &[b.id]).await.unwrap();
        assert_eq!(backend.user_group_ids(id).await.unwrap(), vec![b.id]);
        backend.set_user_groups(id, &[]).await.unwrap();
        assert!(backend.user_group_ids(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_permission_cannot_be_granted() {
        let backend = backend().await;
        let user = create(&backend, "x@example.com", ExtraFields::new()).await;
        let err = backend.grant_to_user(user.id.unwrap(), "nope.nothing").await.unwrap_err();
        assert!(matches!(err, AuthError::PermissionNotFound(ref p) if p == "nope.nothing"));
    }
}
