//! `mem status`: index health overview.
//!
//! Summarizes what's indexed and which embedding provider is active,
//! including any fallback that happened while resolving it.

use anyhow::Result;

use crate::config::Config;
use crate::index::{IndexStatus, MemoryIndex};

/// Run the status command: open the index and print a summary.
pub async fn run_status(config: &Config, json: bool) -> Result<()> {
    let index = MemoryIndex::open(config.clone()).await?;
    let status = index.status().await;
    index.close().await;
    let status = status?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(config, &status);
    }
    Ok(())
}

fn print_status(config: &Config, status: &IndexStatus) {
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Memory Harness Status");
    println!("=====================");
    println!();
    println!("  Workspace:   {}", status.workspace.display());
    println!("  Database:    {}", status.db_path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Files:       {}", status.files);
    println!("  Chunks:      {}", status.chunks);
    println!("  Cached:      {} embeddings", status.cached_embeddings);
    println!();
    println!("  Provider:    {} ({})", status.provider, status.model);
    if status.requested_provider != status.provider {
        println!("  Requested:   {}", status.requested_provider);
    }
    if let Some(from) = &status.fallback_from {
        println!(
            "  Fallback:    from {} ({})",
            from,
            status.fallback_reason.as_deref().unwrap_or("unknown reason")
        );
    }
    println!(
        "  Keyword:     {}",
        if status.keyword_search_available {
            "fts5"
        } else {
            "unavailable (vector-only)"
        }
    );
    println!(
        "  Chunking:    {} tokens, {} overlap",
        status.chunk_tokens, status.chunk_overlap
    );
    println!();
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
