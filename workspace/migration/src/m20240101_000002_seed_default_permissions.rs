use sea_orm_migration::prelude::*;

use crate::m20240101_000001_create_auth_tables::Permissions;

/// The model-level permissions every installation starts with, in the
/// `(app_label, codename, name)` shape stored in the `permissions` table.
pub const DEFAULT_PERMISSIONS: &[(&str, &str, &str)] = &[
    ("improved_user", "add_user", "Can add user"),
    ("improved_user", "change_user", "Can change user"),
    ("improved_user", "delete_user", "Can delete user"),
    ("improved_user", "view_user", "Can view user"),
    ("auth", "add_group", "Can add group"),
    ("auth", "change_group", "Can change group"),
    ("auth", "delete_group", "Can delete group"),
    ("auth", "view_group", "Can view group"),
    ("auth", "add_permission", "Can add permission"),
    ("auth", "change_permission", "Can change permission"),
    ("auth", "delete_permission", "Can delete permission"),
    ("auth", "view_permission", "Can view permission"),
];

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let mut insert = Query::insert()
            .into_table(Permissions::Table)
            .columns([Permissions::AppLabel, Permissions::Codename, Permissions::Name])
            .to_owned();
        for (app_label, codename, name) in DEFAULT_PERMISSIONS {
            insert.values_panic([(*app_label).into(), (*codename).into(), (*name).into()]);
        }
        manager.exec_stmt(insert).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let mut matching = Cond::any();
        for (app_label, codename, _) in DEFAULT_PERMISSIONS {
            matching = matching.add(
                Cond::all()
                    .add(Expr::col(Permissions::AppLabel).eq(*app_label))
                    .add(Expr::col(Permissions::Codename).eq(*codename)),
            );
        }
        let delete = Query::delete()
            .from_table(Permissions::Table)
            .cond_where(matching)
            .to_owned();
        manager.exec_stmt(delete).await
    }
}
