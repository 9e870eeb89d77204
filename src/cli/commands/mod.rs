mod leads;
mod scrape;
mod search;

pub use leads::cmd_leads;
pub use scrape::{cmd_check, cmd_scrape, cmd_status};
pub use search::cmd_search;
