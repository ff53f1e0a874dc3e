//! `lantern crawl`: run one bounded crawl and print the nodes.

use lantern_config::AppConfig;
use lantern_core::crawl::Caller;

use crate::runtime::Runtime;

const CRAWL_INSTRUCTIONS: &str =
    "Summarize the facts stated on these pages in a few sentences. Do not add outside knowledge.";

pub async fn run(url: &str, user: &str, summarize: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let runtime = Runtime::new(config)?;

    let caller = Caller {
        id: user.to_string(),
        tier: runtime.config.crawl.tier_for(user),
    };
    let budget = runtime.config.crawl.budget_for(caller.tier);
    println!(
        "Crawling {url} as {} ({:?}): depth ≤ {}, ≤ {} links/page, ≤ {} fetches",
        caller.id, caller.tier, budget.max_depth, budget.max_links_per_page, budget.max_calls_per_request
    );

    let nodes = runtime.crawler.crawl(url, &caller, &budget).await;
    if nodes.is_empty() {
        println!("Nothing retrieved.");
        return Ok(());
    }

    for node in &nodes {
        println!(
            "{}{} [{} chars, {} links]",
            "  ".repeat(node.depth as usize),
            node.url,
            node.content.chars().count(),
            node.outbound_links.len()
        );
    }
    println!(
        "Remaining crawl calls today: {}",
        runtime.crawler.ledger().remaining(&caller)
    );

    if summarize {
        let text = nodes
            .iter()
            .map(|n| n.content.as_str())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        let summary = runtime.summarizer().summarize(&text, CRAWL_INSTRUCTIONS).await;
        println!();
        println!("{}", summary.summary);
    }

    Ok(())
}
