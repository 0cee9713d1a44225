//! `mem get`: print a memory file or a line window of it.
//!
//! Paths are workspace-relative and must name a memory file; anything else
//! is rejected before the filesystem is read. Neither the database nor the
//! embedding provider is needed, so the index is never opened.

use anyhow::Result;

use crate::config::Config;
use crate::index::read_memory_file;

pub async fn run_get(
    config: &Config,
    path: &str,
    from: Option<usize>,
    lines: Option<usize>,
) -> Result<()> {
    let content = read_memory_file(&config.workspace.root, path, from, lines).await?;

    print!("{}", content.text);
    if !content.text.ends_with('\n') {
        println!();
    }
    Ok(())
}
