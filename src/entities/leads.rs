use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "leads")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub search_id: String,
    pub source: String,
    pub source_type: String,
    pub source_id: String,
    pub parent_item_id: Option<String>,
    pub title: Option<String>,
    #[sea_orm(column_type = "Text")]
    pub content: String,
    pub author: String,
    pub url: String,
    pub target: String,
    #[sea_orm(column_type = "Text")]
    pub matched_keywords: String,
    pub detected_pattern: Option<String>,
    pub opportunity_type: Option<String>,
    pub relevance_score: f64,
    pub status: String,
    pub created_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::searches::Entity",
        from = "Column::SearchId",
        to = "super::searches::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Searches,
}

impl Related<super::searches::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Searches.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
