use sea_orm_migration::{prelude::*, schema::*};

use crate::m20260301_000001_add_oauth2_tables::OAuth2Authorization;

#[derive(DeriveMigrationName)]
pub struct Migration;

/// Remember whether the authorization request named its redirect_uri, so the
/// token request can be required to repeat it
#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(OAuth2Authorization::Table)
                    .add_column(
                        boolean(Alias::new("redirect_uri_explicit"))
                            .default(false)
                            .to_owned(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(OAuth2Authorization::Table)
                    .drop_column(Alias::new("redirect_uri_explicit"))
                    .to_owned(),
            )
            .await
    }
}
