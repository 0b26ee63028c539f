use sea_orm::entity::prelude::*;

/// A single grantable permission, addressed as `"<app_label>.<codename>"`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "permissions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Human readable description, e.g. "Can add user".
    pub name: String,
    pub app_label: String,
    pub codename: String,
}

impl Model {
    /// The dotted name used in permission checks.
    pub fn perm_name(&self) -> String {
        format!("{}.{}", self.app_label, self.codename)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user_permission::Entity")]
    UserPermission,
    #[sea_orm(has_many = "super::group_permission::Entity")]
    GroupPermission,
}

impl Related<super::group::Entity> for Entity {
    fn to() -> RelationDef {
        super::group_permission::Relation::Group.def()
    }
    fn via() -> Option<RelationDef> {
        Some(super::group_permission::Relation::Permission.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
