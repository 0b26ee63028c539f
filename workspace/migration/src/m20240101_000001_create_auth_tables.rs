use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create users table
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(pk_auto(Users::Id))
                    .col(string_len(Users::Email, 254).unique_key())
                    .col(string_len(Users::Password, 128))
                    .col(string_len(Users::FullName, 200).default(""))
                    .col(string_len(Users::ShortName, 50).default(""))
                    .col(boolean(Users::IsActive).default(true))
                    .col(boolean(Users::IsStaff).default(false))
                    .col(boolean(Users::IsSuperuser).default(false))
                    .col(timestamp_with_time_zone(Users::DateJoined))
                    .col(timestamp_with_time_zone_null(Users::LastLogin))
                    .to_owned(),
            )
            .await?;

        // Create groups table
        manager
            .create_table(
                Table::create()
                    .table(Groups::Table)
                    .if_not_exists()
                    .col(pk_auto(Groups::Id))
                    .col(string_len(Groups::Name, 150).unique_key())
                    .to_owned(),
            )
            .await?;

        // Create permissions table
        manager
            .create_table(
                Table::create()
                    .table(Permissions::Table)
                    .if_not_exists()
                    .col(pk_auto(Permissions::Id))
                    .col(string_len(Permissions::Name, 255))
                    .col(string_len(Permissions::AppLabel, 100))
                    .col(string_len(Permissions::Codename, 100))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_permissions_app_label_codename")
                    .table(Permissions::Table)
                    .col(Permissions::AppLabel)
                    .col(Permissions::Codename)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Create users_groups table (join table)
        manager
            .create_table(
                Table::create()
                    .table(UsersGroups::Table)
                    .if_not_exists()
                    .col(integer(UsersGroups::UserId))
                    .col(integer(UsersGroups::GroupId))
                    .primary_key(
                        Index::create()
                            .name("pk_users_groups")
                            .col(UsersGroups::UserId)
                            .col(UsersGroups::GroupId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_users_groups_user")
                            .from(UsersGroups::Table, UsersGroups::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_users_groups_group")
                            .from(UsersGroups::Table, UsersGroups::GroupId)
                            .to(Groups::Table, Groups::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Create users_user_permissions table (join table)
        manager
            .create_table(
                Table::create()
                    .table(UsersUserPermissions::Table)
                    .if_not_exists()
                    .col(integer(UsersUserPermissions::UserId))
                    .col(integer(UsersUserPermissions::PermissionId))
                    .primary_key(
                        Index::create()
                            .name("pk_users_user_permissions")
                            .col(UsersUserPermissions::UserId)
                            .col(UsersUserPermissions::PermissionId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_users_user_permissions_user")
                            .from(UsersUserPermissions::Table, UsersUserPermissions::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_users_user_permissions_permission")
                            .from(UsersUserPermissions::Table, UsersUserPermissions::PermissionId)
                            .to(Permissions::Table, Permissions::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Create groups_permissions table (join table)
        manager
            .create_table(
                Table::create()
                    .table(GroupsPermissions::Table)
                    .if_not_exists()
                    .col(integer(GroupsPermissions::GroupId))
                    .col(integer(GroupsPermissions::PermissionId))
                    .primary_key(
                        Index::create()
                            .name("pk_groups_permissions")
                            .col(GroupsPermissions::GroupId)
                            .col(GroupsPermissions::PermissionId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_groups_permissions_group")
                            .from(GroupsPermissions::Table, GroupsPermissions::GroupId)
                            .to(Groups::Table, Groups::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_groups_permissions_permission")
                            .from(GroupsPermissions::Table, GroupsPermissions::PermissionId)
                            .to(Permissions::Table, Permissions::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(GroupsPermissions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UsersUserPermissions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UsersGroups::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Permissions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Groups::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
pub(crate) enum Users {
    Table,
    Id,
    Email,
    Password,
    FullName,
    ShortName,
    IsActive,
    IsStaff,
    IsSuperuser,
    DateJoined,
    LastLogin,
}

#[derive(DeriveIden)]
pub(crate) enum Groups {
    Table,
    Id,
    Name,
}

#[derive(DeriveIden)]
pub(crate) enum Permissions {
    Table,
    Id,
    Name,
    AppLabel,
    Codename,
}

#[derive(DeriveIden)]
enum UsersGroups {
    Table,
    UserId,
    GroupId,
}

#[derive(DeriveIden)]
enum UsersUserPermissions {
    Table,
    UserId,
    PermissionId,
}

#[derive(DeriveIden)]
enum GroupsPermissions {
    Table,
    GroupId,
    PermissionId,
}
