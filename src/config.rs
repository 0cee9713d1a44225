//! TOML configuration parsing and validation.
//!
//! Every section is optional; missing values fall back to the defaults
//! below. Relative paths are resolved against the config file's directory
//! by [`load_config`], and against the current directory by
//! [`Config::for_workspace`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use memory_harness_core::chunk::ChunkingParams;
use memory_harness_core::embedding::EMBEDDING_BATCH_MAX_TOKENS;
use memory_harness_core::search::SearchParams;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/memory.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_tokens")]
    pub tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            tokens: default_tokens(),
            overlap: default_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkingParams {
        ChunkingParams::new(self.tokens, self.overlap)
    }
}

fn default_tokens() -> usize {
    400
}
fn default_overlap() -> usize {
    80
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_text_weight")]
    pub text_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            min_score: default_min_score(),
            vector_weight: default_vector_weight(),
            text_weight: default_text_weight(),
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> SearchParams {
        SearchParams {
            max_results: self.max_results,
            min_score: self.min_score,
            vector_weight: self.vector_weight,
            text_weight: self.text_weight,
        }
    }
}

fn default_max_results() -> usize {
    6
}
fn default_min_score() -> f64 {
    0.35
}
fn default_vector_weight() -> f64 {
    0.7
}
fn default_text_weight() -> f64 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_fallback")]
    pub fallback: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL of the provider API. Per-provider default when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_batch_max_tokens")]
    pub batch_max_tokens: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            fallback: default_fallback(),
            model: None,
            url: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            batch_max_tokens: default_batch_max_tokens(),
        }
    }
}

impl EmbeddingConfig {
    pub fn has_fallback(&self) -> bool {
        self.fallback != "none"
    }
}

fn default_provider() -> String {
    "auto".to_string()
}
fn default_fallback() -> String {
    "none".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_batch_max_tokens() -> usize {
    EMBEDDING_BATCH_MAX_TOKENS
}

pub const PROVIDERS: &[&str] = &["openai", "ollama", "local", "auto"];
pub const FALLBACKS: &[&str] = &["none", "openai", "ollama", "local"];

impl Config {
    /// Defaults rooted at `root`, with the database under `root/data`.
    pub fn for_workspace(root: &Path) -> Self {
        let mut config = Config::default();
        config.workspace.root = root.to_path_buf();
        config.db.path = root.join("data").join("memory.sqlite");
        config
    }

    /// Check value ranges and provider names.
    pub fn validate(&self) -> Result<()> {
        // Validate chunking
        if self.chunking.tokens == 0 {
            anyhow::bail!("chunking.tokens must be > 0");
        }
        if self.chunking.overlap >= self.chunking.tokens {
            anyhow::bail!(
                "chunking.overlap ({}) must be < chunking.tokens ({})",
                self.chunking.overlap,
                self.chunking.tokens
            );
        }

        // Validate retrieval
        let r = &self.retrieval;
        if r.max_results < 1 {
            anyhow::bail!("retrieval.max_results must be >= 1");
        }
        if !(0.0..=1.0).contains(&r.min_score) {
            anyhow::bail!("retrieval.min_score must be in [0.0, 1.0]");
        }
        if !(0.0..=1.0).contains(&r.vector_weight) {
            anyhow::bail!("retrieval.vector_weight must be in [0.0, 1.0]");
        }
        if !(0.0..=1.0).contains(&r.text_weight) {
            anyhow::bail!("retrieval.text_weight must be in [0.0, 1.0]");
        }

        // Validate embedding
        let e = &self.embedding;
        if !PROVIDERS.contains(&e.provider.as_str()) {
            anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be openai, ollama, local, or auto.",
                e.provider
            );
        }
        if !FALLBACKS.contains(&e.fallback.as_str()) {
            anyhow::bail!(
                "Unknown embedding fallback: '{}'. Must be none, openai, ollama, or local.",
                e.fallback
            );
        }
        if e.batch_max_tokens == 0 {
            anyhow::bail!("embedding.batch_max_tokens must be > 0");
        }

        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        if self.workspace.root.is_relative() {
            self.workspace.root = base.join(&self.workspace.root);
        }
        if self.db.path.is_relative() {
            self.db.path = base.join(&self.db.path);
        }
    }
}

/// Read, parse and validate a config file.
///
/// Relative `workspace.root` and `db.path` are resolved against the
/// directory that contains the config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;

    let base = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    config.resolve_paths(&base);

    Ok(config)
}

/// Parse and validate config text without touching paths.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.chunking.tokens, 400);
        assert_eq!(config.chunking.overlap, 80);
        assert_eq!(config.retrieval.max_results, 6);
        assert_eq!(config.retrieval.min_score, 0.35);
        assert_eq!(config.embedding.provider, "auto");
        assert_eq!(config.embedding.fallback, "none");
        assert_eq!(config.embedding.batch_max_tokens, 8000);
    }

    #[test]
    fn test_overlap_must_be_below_tokens() {
        let err = parse_config("[chunking]\ntokens = 10\noverlap = 10\n").unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_zero_tokens_rejected() {
        assert!(parse_config("[chunking]\ntokens = 0\noverlap = 0\n").is_err());
    }

    #[test]
    fn test_weights_range() {
        assert!(parse_config("[retrieval]\nvector_weight = 1.5\n").is_err());
        assert!(parse_config("[retrieval]\ntext_weight = -0.1\n").is_err());
        assert!(parse_config("[retrieval]\nmin_score = 2.0\n").is_err());
        assert!(parse_config("[retrieval]\nmax_results = 0\n").is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = parse_config("[embedding]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("magic"));
        assert!(parse_config("[embedding]\nprovider = \"ollama\"\nfallback = \"auto\"\n").is_err());
    }

    #[test]
    fn test_paths_resolved_against_config_dir() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("mem.toml");
        std::fs::write(
            &path,
            "[workspace]\nroot = \"notes\"\n[db]\npath = \"db/m.sqlite\"\n",
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.workspace.root, tmp.path().join("notes"));
        assert_eq!(config.db.path, tmp.path().join("db/m.sqlite"));
    }

    #[test]
    fn test_for_workspace() {
        let config = Config::for_workspace(Path::new("/ws"));
        assert_eq!(config.workspace.root, PathBuf::from("/ws"));
        assert_eq!(config.db.path, PathBuf::from("/ws/data/memory.sqlite"));
        config.validate().unwrap();
    }
}
