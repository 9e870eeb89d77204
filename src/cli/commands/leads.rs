use crate::config::Config;
use crate::db::Store;
use crate::domain::SearchId;

pub async fn cmd_leads(config: &Config, id: &str, limit: u64) -> anyhow::Result<()> {
    let store = Store::new(&config.general.database_path).await?;
    let id = SearchId::new(id);

    let Some(search) = store.get_search(&id).await? else {
        println!("Search with ID {id} not found.");
        return Ok(());
    };

    let total = store.count_leads(&id).await?;
    let leads = store.list_leads(&id, limit).await?;

    if leads.is_empty() {
        println!("No leads yet for '{}'.", search.name);
        return Ok(());
    }

    println!("Leads for '{}' ({} of {} total)", search.name, leads.len(), total);
    println!("{:-<70}", "");

    for lead in leads {
        let title = lead
            .title
            .as_deref()
            .unwrap_or_else(|| lead.content.lines().next().unwrap_or_default());
        println!("[{:.2}] {}", lead.relevance_score, title);
        println!(
            "  u/{} in r/{} | {} | {}",
            lead.author,
            lead.target,
            lead.opportunity_type.as_deref().unwrap_or("-"),
            lead.created_at
        );
        if !lead.matched_keywords.is_empty() {
            println!("  Keywords: {}", lead.matched_keywords.join(", "));
        }
        println!("  {}", lead.url);
    }

    Ok(())
}
