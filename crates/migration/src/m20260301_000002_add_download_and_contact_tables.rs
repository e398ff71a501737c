//! Download tracking and contact form messages.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // user_id has no foreign key; account deletion anonymizes events instead
        manager
            .create_table(
                Table::create()
                    .table(DownloadEvent::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DownloadEvent::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DownloadEvent::FileSlug).string().not_null())
                    .col(ColumnDef::new(DownloadEvent::UserId).string().null())
                    .col(ColumnDef::new(DownloadEvent::IpHash).string().null())
                    .col(ColumnDef::new(DownloadEvent::UserAgent).string().null())
                    .col(ColumnDef::new(DownloadEvent::Referer).string().null())
                    .col(
                        ColumnDef::new(DownloadEvent::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_download_event_slug_created")
                    .table(DownloadEvent::Table)
                    .col(DownloadEvent::FileSlug)
                    .col(DownloadEvent::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_download_event_user_id")
                    .table(DownloadEvent::Table)
                    .col(DownloadEvent::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DownloadCounter::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DownloadCounter::FileSlug)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DownloadCounter::Total)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(DownloadCounter::LastDownloadedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ContactMessage::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ContactMessage::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ContactMessage::Name).string().not_null())
                    .col(ColumnDef::new(ContactMessage::Email).string().not_null())
                    .col(ColumnDef::new(ContactMessage::Message).text().not_null())
                    .col(
                        ColumnDef::new(ContactMessage::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ContactMessage::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DownloadCounter::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DownloadEvent::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DownloadEvent {
    Table,
    Id,
    FileSlug,
    UserId,
    IpHash,
    UserAgent,
    Referer,
    CreatedAt,
}

#[derive(DeriveIden)]
enum DownloadCounter {
    Table,
    FileSlug,
    Total,
    LastDownloadedAt,
}

#[derive(DeriveIden)]
enum ContactMessage {
    Table,
    Id,
    Name,
    Email,
    Message,
    CreatedAt,
}
