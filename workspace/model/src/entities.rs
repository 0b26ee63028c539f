//! SeaORM entities backing the email-keyed user model.
//!
//! `user` is the account row itself; `group` and `permission` are the
//! authorization records, linked through three join tables.

pub mod group;
pub mod group_permission;
pub mod permission;
pub mod user;
pub mod user_group;
pub mod user_permission;

pub mod prelude {
    //! A prelude module for easy importing of all entities.
    pub use super::group::Entity as Group;
    pub use super::group_permission::Entity as GroupPermission;
    pub use super::permission::Entity as Permission;
    pub use super::user::Entity as User;
    pub use super::user_group::Entity as UserGroup;
    pub use super::user_permission::Entity as UserPermission;
}
