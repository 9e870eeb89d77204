//! Scrape, status and check command handlers

use crate::config::Config;
use crate::domain::SearchId;
use crate::services::ScrapeError;
use crate::state::SharedState;

pub async fn cmd_scrape(config: &Config, id: &str) -> anyhow::Result<()> {
    let state = SharedState::new(config.clone()).await?;
    let id = SearchId::new(id);

    println!("Scraping search {id}...");
    let report = match state.scrape.scrape_now(&id).await {
        Ok(report) => report,
        Err(ScrapeError::NotFound(_)) => {
            println!("Search with ID {id} not found.");
            println!("Use 'leadharvest search list' to see search IDs.");
            return Ok(());
        }
        Err(ScrapeError::Rejected(reason)) => {
            println!("Cannot start: {reason}");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!("{:-<70}", "");
    println!(
        "Fetched: {} posts, {} comments",
        report.items_fetched, report.sub_items_fetched
    );
    println!("New: {} | Leads: {}", report.new_items, report.leads_created);
    if report.items_skipped > 0 {
        println!("Skipped by score/age: {}", report.items_skipped);
    }
    if report.retries > 0 {
        println!("Retries: {}", report.retries);
    }
    if !report.fetch_failures.is_empty() {
        println!("Failures ({}):", report.fetch_failures.len());
        for failure in &report.fetch_failures {
            match &failure.item_id {
                Some(item) => println!("  r/{} post {}: {}", failure.target, item, failure.error),
                None => println!("  r/{}: {}", failure.target, failure.error),
            }
        }
    }
    if report.item_failures > 0 {
        println!(
            "{} items could not be processed and will be retried next run",
            report.item_failures
        );
    }

    let summary = state.metrics.summary(1);
    println!(
        "Took {:.1}s | success rate {:.0}%",
        report.duration_seconds,
        summary.average_success_rate * 100.0
    );

    Ok(())
}

pub async fn cmd_status(config: &Config, id: &str) -> anyhow::Result<()> {
    let state = SharedState::new(config.clone()).await?;
    let id = SearchId::new(id);

    let status = match state.scrape.get_status(&id).await {
        Ok(status) => status,
        Err(ScrapeError::NotFound(_)) => {
            println!("Search with ID {id} not found.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let fmt_time = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map_or_else(|| "never".to_string(), |t| t.to_rfc3339())
    };

    println!("Search {id}");
    println!("{:-<70}", "");
    println!("Running:    {}", status.is_running);
    println!("Can start:  {}", status.can_start);
    if let Some(reason) = &status.reason {
        println!("Reason:     {reason}");
    }
    println!("Last run:   {}", fmt_time(status.last_run));
    println!("Next run:   {}", fmt_time(status.next_run));
    if let Some(last) = status.last_status {
        println!("Last state: {last}");
    }
    if let Some(error) = &status.last_error {
        println!("Last error: {error}");
    }

    Ok(())
}

pub async fn cmd_check(config: &Config) -> anyhow::Result<()> {
    let state = SharedState::new(config.clone()).await?;

    let summary = state.scheduler.run_once().await?;
    println!(
        "✓ Check complete: {} due, {} processed, {} skipped, {} failed, {} new leads",
        summary.due, summary.processed, summary.skipped, summary.failed, summary.leads_created
    );

    Ok(())
}
