use std::str::FromStr;

use common::FieldsetDto;
use model::entities::user;
use sea_orm::Order;
use thiserror::Error;

/// Fields the change form knows how to show.
pub const CHANGE_FORM_FIELDS: &[&str] = &[
    "email",
    "password",
    "full_name",
    "short_name",
    "is_active",
    "is_staff",
    "is_superuser",
    "groups",
    "user_permissions",
    "last_login",
    "date_joined",
];

/// Fields the creation form knows how to show.
pub const ADD_FORM_FIELDS: &[&str] = &["email", "full_name", "short_name", "password1", "password2"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdminConfigError {
    #[error("'{0}' is not a user column")]
    UnknownColumn(String),

    #[error("'{0}' is not a form field")]
    UnknownField(String),

    #[error("Field '{0}' appears in more than one fieldset")]
    DuplicateField(String),
}

/// Admin layout for users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAdmin {
    /// Change form layout
    pub fieldsets: Vec<FieldsetDto>,
    /// Creation form layout
    pub add_fieldsets: Vec<FieldsetDto>,
    /// Columns of the list view
    pub list_display: Vec<String>,
    /// Columns matched by the list view's `q` parameter
    pub search_fields: Vec<String>,
    /// Column names; a leading `-` sorts descending
    pub ordering: Vec<String>,
}

fn fieldset(name: Option<&str>, classes: &[&str], fields: &[&str]) -> FieldsetDto {
    FieldsetDto {
        name: name.map(str::to_string),
        classes: classes.iter().map(|c| c.to_string()).collect(),
        fields: fields.iter().map(|f| f.to_string()).collect(),
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl Default for UserAdmin {
    fn default() -> Self {
        Self {
            fieldsets: vec![
                fieldset(None, &[], &["email", "password"]),
                fieldset(Some("Personal info"), &[], &["full_name", "short_name"]),
                fieldset(
                    Some("Permissions"),
                    &[],
                    &["is_active", "is_staff", "is_superuser", "groups", "user_permissions"],
                ),
                fieldset(Some("Important dates"), &[], &["last_login", "date_joined"]),
            ],
            add_fieldsets: vec![fieldset(
                None,
                &["wide"],
                &["email", "short_name", "password1", "password2"],
            )],
            list_display: strings(&["email", "full_name", "short_name", "is_staff"]),
            search_fields: strings(&["email", "full_name", "short_name"]),
            ordering: strings(&["email"]),
        }
    }
}

impl UserAdmin {
    /// Make sure every name refers to something that exists.
    pub fn check(&self) -> Result<(), AdminConfigError> {
        check_fieldsets(&self.fieldsets, CHANGE_FORM_FIELDS)?;
        check_fieldsets(&self.add_fieldsets, ADD_FORM_FIELDS)?;
        for name in &self.list_display {
            column(name)?;
        }
        self.search_columns()?;
        self.ordering_columns()?;
        Ok(())
    }

    pub fn search_columns(&self) -> Result<Vec<user::Column>, AdminConfigError> {
        self.search_fields.iter().map(|name| column(name)).collect()
    }

    pub fn ordering_columns(&self) -> Result<Vec<(user::Column, Order)>, AdminConfigError> {
        self.ordering
            .iter()
            .map(|name| match name.strip_prefix('-') {
                Some(name) => Ok((column(name)?, Order::Desc)),
                None => Ok((column(name)?, Order::Asc)),
            })
            .collect()
    }
}

fn column(name: &str) -> Result<user::Column, AdminConfigError> {
    user::Column::from_str(name).map_err(|_| AdminConfigError::UnknownColumn(name.to_string()))
}

fn check_fieldsets(fieldsets: &[FieldsetDto], known: &[&str]) -> Result<(), AdminConfigError> {
    let mut seen: Vec<&str> = Vec::new();
    for field in fieldsets.iter().flat_map(|f| f.fields.iter()) {
        if !known.contains(&field.as_str()) {
            return Err(AdminConfigError::UnknownField(field.clone()));
        }
        if seen.contains(&field.as_str()) {
            return Err(AdminConfigError::DuplicateField(field.clone()));
        }
        seen.push(field);
    }
    Ok(())
}
