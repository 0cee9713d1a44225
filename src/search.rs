//! `mem search`: hybrid search from the command line.

use anyhow::Result;

use memory_harness_core::models::SearchResult;

use crate::config::Config;
use crate::index::{MemoryIndex, SearchOptions};

pub async fn run_search(
    config: &Config,
    query: &str,
    max_results: Option<usize>,
    min_score: Option<f64>,
    json: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        print_results(&[], json)?;
        return Ok(());
    }

    if let Some(n) = max_results {
        if n == 0 {
            anyhow::bail!("--max-results must be >= 1");
        }
    }
    if let Some(s) = min_score {
        if !(0.0..=1.0).contains(&s) {
            anyhow::bail!("--min-score must be in [0.0, 1.0]");
        }
    }

    let index = MemoryIndex::open(config.clone()).await?;
    let results = index
        .search(query, SearchOptions { max_results, min_score })
        .await;
    index.close().await;

    print_results(&results?, json)
}

fn print_results(results: &[SearchResult], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.2}] {}:{}-{}",
            i + 1,
            result.score,
            result.path,
            result.start_line,
            result.end_line
        );
        println!(
            "    excerpt: \"{}\"",
            result.snippet.replace('\n', " ").trim()
        );
        println!();
    }
    Ok(())
}
