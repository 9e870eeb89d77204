use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "scraped_items")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub search_id: String,
    pub source: String,
    pub source_id: String,
    pub url: String,
    pub processed_at: String,
    pub created_lead: bool,
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
