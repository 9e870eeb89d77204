pub mod analysis_cache;
pub mod leads;
pub mod scraped_items;
pub mod searches;
