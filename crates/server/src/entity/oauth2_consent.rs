//! Remembered consent decisions, one row per (user, client).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth2_consent")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub client_id: String,
    /// Space-separated union of every scope granted so far
    pub scope: String,
    pub granted_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// True if every requested scope was granted before.
    pub fn covers(&self, requested: &str) -> bool {
        requested
            .split_whitespace()
            .all(|s| self.scope.split_whitespace().any(|g| g == s))
    }
}
