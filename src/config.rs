use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::retrieve::RetrieveParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub library: LibraryConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub verify: VerifyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LibraryConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    #[serde(default = "default_sources_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            dir: default_sources_dir(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_sources_dir() -> PathBuf {
    PathBuf::from("./sources")
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub vector_top_k: usize,
    #[serde(default = "default_top_k")]
    pub bm25_top_k: usize,
    #[serde(default = "default_final_k")]
    pub final_k: usize,
    #[serde(default = "default_max_per_section")]
    pub max_per_section: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_top_k: default_top_k(),
            bm25_top_k: default_top_k(),
            final_k: default_final_k(),
            max_per_section: default_max_per_section(),
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrieveParams {
        RetrieveParams {
            vector_top_k: self.vector_top_k,
            bm25_top_k: self.bm25_top_k,
            final_k: self.final_k,
            max_per_section: self.max_per_section,
        }
    }
}

fn default_top_k() -> usize {
    50
}
fn default_final_k() -> usize {
    10
}
fn default_max_per_section() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct VerifyConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_cache_ttl_secs() -> u64 {
    3
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.retrieval.final_k < 1 {
        anyhow::bail!("retrieval.final_k must be >= 1");
    }
    if config.retrieval.max_per_section < 1 {
        anyhow::bail!("retrieval.max_per_section must be >= 1");
    }
    if config.sources.include_globs.is_empty() {
        anyhow::bail!("sources.include_globs must not be empty");
    }

    Ok(config)
}
