pub use super::analysis_cache::Entity as AnalysisCache;
pub use super::leads::Entity as Leads;
pub use super::scraped_items::Entity as ScrapedItems;
pub use super::searches::Entity as Searches;
