use crate::entities::prelude::*;
use crate::entities::{leads, scraped_items, searches};
use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Schema;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        let schema = Schema::new(backend);

        manager
            .create_table(
                schema
                    .create_table_from_entity(Searches)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(ScrapedItems)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(Leads)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // The ledger and the lead table are keyed on the natural item identity.
        manager
            .create_index(
                Index::create()
                    .name("idx_scraped_items_identity")
                    .table(ScrapedItems)
                    .col(scraped_items::Column::SearchId)
                    .col(scraped_items::Column::Source)
                    .col(scraped_items::Column::SourceId)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_leads_identity")
                    .table(Leads)
                    .col(leads::Column::SearchId)
                    .col(leads::Column::Source)
                    .col(leads::Column::SourceId)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_searches_due")
                    .table(Searches)
                    .col(searches::Column::Enabled)
                    .col(searches::Column::NextScrapeAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Leads).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ScrapedItems).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Searches).to_owned())
            .await?;

        Ok(())
    }
}
