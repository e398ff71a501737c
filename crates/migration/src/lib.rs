pub use sea_orm_migration::prelude::*;

mod m20260301_000000_add_account_tables;
mod m20260301_000001_add_oauth2_tables;
mod m20260301_000002_add_download_and_contact_tables;
mod m20260305_000000_add_redirect_uri_explicit;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000000_add_account_tables::Migration),
            Box::new(m20260301_000001_add_oauth2_tables::Migration),
            Box::new(m20260301_000002_add_download_and_contact_tables::Migration),
            Box::new(m20260305_000000_add_redirect_uri_explicit::Migration),
        ]
    }
}
