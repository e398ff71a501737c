//! User entity - accounts that sign in to the website and grant OAuth2 access.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const ROLE_USER: &str = "user";
pub const ROLE_ADMIN: &str = "admin";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(unique)]
    pub email: String,
    pub email_verified: bool,
    /// Argon2 PHC string
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub name: Option<String>,
    #[sea_orm(unique)]
    pub username: Option<String>,
    pub bio: Option<String>,
    pub website: Option<String>,
    pub location: Option<String>,
    /// Avatar URL
    pub image: Option<String>,
    /// "user" or "admin"
    pub role: String,
    #[serde(skip_serializing)]
    pub email_verification_token: Option<String>,
    pub email_verification_expires_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub last_login_at: Option<OffsetDateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::user_settings::Entity")]
    Settings,
    #[sea_orm(has_many = "super::session::Entity")]
    Sessions,
}

impl Related<super::user_settings::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Settings.def()
    }
}

impl Related<super::session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sessions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    /// True while an unexpired verification link is outstanding.
    pub fn has_pending_verification(&self) -> bool {
        self.email_verification_token.is_some()
            && self
                .email_verification_expires_at
                .is_some_and(|exp| exp > OffsetDateTime::now_utc())
    }
}
