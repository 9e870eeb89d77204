//! Search management command handlers

use crate::cli::SearchCommands;
use crate::config::Config;
use crate::db::Store;
use crate::domain::{FetchParams, Schedule, Search, SearchId};

pub async fn cmd_search(config: &Config, command: SearchCommands) -> anyhow::Result<()> {
    let store = Store::new(&config.general.database_path).await?;

    match command {
        SearchCommands::Add {
            name,
            targets,
            keywords,
            patterns,
            interval,
            limit,
            comments,
            sort,
            time,
            no_comments,
            min_score,
            max_age_hours,
            webhook,
        } => {
            let schedule = match interval {
                Some(raw) => Schedule::Scheduled(raw.parse()?),
                None => Schedule::OneTime,
            };

            let mut search = Search::new(name, normalize_targets(targets), schedule);
            search.keywords = keywords;
            search.patterns = patterns;
            search.webhook_url = webhook;
            search.params = FetchParams {
                item_limit: limit,
                sub_item_limit: comments,
                sort: sort.parse()?,
                time_window: time.parse()?,
                include_sub_items: !no_comments,
                min_score,
                max_age_hours,
            };

            store.save_search(&search).await?;
            println!("✓ Added search: {} (ID: {})", search.name, search.id);
            if search.schedule == Schedule::OneTime {
                println!("Run it with: leadharvest scrape {}", search.id);
            }
            Ok(())
        }
        SearchCommands::List => list(&store).await,
        SearchCommands::Remove { id } => {
            let id = SearchId::new(id);
            if store.remove_search(&id).await? {
                println!("✓ Removed search {id}");
            } else {
                println!("Search with ID {id} not found.");
            }
            Ok(())
        }
        SearchCommands::Enable { id } => set_enabled(&store, SearchId::new(id), true).await,
        SearchCommands::Disable { id } => set_enabled(&store, SearchId::new(id), false).await,
    }
}

/// Strips `r/` prefixes and drops blanks and repeats.
fn normalize_targets(targets: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(targets.len());
    for target in targets {
        let t = target.trim();
        let t = t
            .strip_prefix("/r/")
            .or_else(|| t.strip_prefix("r/"))
            .unwrap_or(t)
            .trim_matches('/');
        if !t.is_empty() && !out.iter().any(|o| o.eq_ignore_ascii_case(t)) {
            out.push(t.to_string());
        }
    }
    out
}

async fn list(store: &Store) -> anyhow::Result<()> {
    let searches = store.list_searches().await?;

    if searches.is_empty() {
        println!("No searches configured.");
        println!();
        println!("Add one with: leadharvest search add \"name\" -t rust -k hiring");
        return Ok(());
    }

    println!("Searches ({} total)", searches.len());
    println!("{:-<70}", "");

    for search in searches {
        let indicator = if search.enabled { "🟢" } else { "⏸" };
        let schedule = search
            .schedule
            .interval()
            .map_or_else(|| "one-time".to_string(), |i| format!("every {i}"));
        let targets = if search.targets.is_empty() {
            "r/all".to_string()
        } else {
            search.targets.join(", ")
        };
        let leads = store.count_leads(&search.id).await.unwrap_or(0);

        println!("{} {} [{}]", indicator, search.name, schedule);
        println!("  ID: {} | Targets: {} | Leads: {}", search.id, targets, leads);
        if let Some(status) = search.last_status {
            let last = search
                .last_run_at
                .map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
            println!("  Last run: {last} ({status})");
        }
        if let Some(error) = &search.last_error {
            println!("  Last error: {error}");
        }
    }

    Ok(())
}

async fn set_enabled(store: &Store, id: SearchId, enabled: bool) -> anyhow::Result<()> {
    if store.set_search_enabled(&id, enabled).await? {
        println!(
            "✓ Search {id} {}",
            if enabled { "enabled" } else { "disabled" }
        );
    } else {
        println!("Search with ID {id} not found.");
    }
    Ok(())
}
