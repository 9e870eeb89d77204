use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "searches")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    #[sea_orm(column_type = "Text")]
    pub targets: String,
    #[sea_orm(column_type = "Text")]
    pub keywords: String,
    #[sea_orm(column_type = "Text")]
    pub patterns: String,
    #[sea_orm(column_type = "Text")]
    pub fetch_params: String,
    pub scraping_mode: String,
    pub scraping_interval: Option<String>,
    pub enabled: bool,
    pub webhook_url: Option<String>,
    pub last_scrape_at: Option<String>,
    pub next_scrape_at: Option<String>,
    pub scrape_status: Option<String>,
    pub scrape_started_at: Option<String>,
    pub scrape_completed_at: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub scrape_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::leads::Entity")]
    Leads,
    #[sea_orm(has_many = "super::scraped_items::Entity")]
    ScrapedItems,
}

impl Related<super::leads::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Leads.def()
    }
}

impl Related<super::scraped_items::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ScrapedItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
