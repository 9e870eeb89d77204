use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "analysis_cache")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// SHA-256 of the normalized analyzed text and its context.
    pub cache_key: String,
    pub cache_type: String,
    /// JSON analysis result; `None` records a "not a lead" verdict.
    #[sea_orm(column_type = "Text", nullable)]
    pub result: Option<String>,
    pub text_preview: Option<String>,
    pub use_count: i64,
    pub created_at: String,
    pub last_used_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
