use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorMode {
    Server,
    Embedded,
    Auto,
}

impl Default for VectorMode {
    fn default() -> Self {
        VectorMode::Auto
    }
}

fn default_user_id() -> String {
    "default".to_string()
}

fn default_chroma_mode() -> VectorMode {
    VectorMode::Auto
}

fn default_chroma_host() -> String {
    "localhost".to_string()
}

fn default_chroma_port() -> u16 {
    8000
}

fn default_falkordb_host() -> String {
    "localhost".to_string()
}

fn default_falkordb_port() -> u16 {
    6379
}

fn default_ollama_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_extractor_timeout_ms() -> u64 {
    10_000
}

fn default_embedder_timeout_ms() -> u64 {
    5_000
}

fn default_keyword_timeout_ms() -> u64 {
    1_000
}

fn default_vector_timeout_ms() -> u64 {
    2_000
}

fn default_graph_timeout_ms() -> u64 {
    2_000
}

/// Mirrors the original Python `Settings` surface, collapsed onto the
/// `KIOKU_`-prefixed environment keys in §6.
#[derive(Debug, Clone, Deserialize)]
pub struct KiokuConfig {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    pub memory_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_chroma_mode")]
    pub chroma_mode: VectorMode,
    #[serde(default = "default_chroma_host")]
    pub chroma_host: String,
    #[serde(default = "default_chroma_port")]
    pub chroma_port: u16,
    pub chroma_persist_dir: Option<PathBuf>,
    #[serde(default = "default_falkordb_host")]
    pub falkordb_host: String,
    #[serde(default = "default_falkordb_port")]
    pub falkordb_port: u16,
    #[serde(default = "default_ollama_host")]
    pub ollama_host: String,
    #[serde(default = "default_ollama_model")]
    pub ollama_model: String,
    pub anthropic_api_key: Option<String>,
    /// Per-leg timeouts for the read path (§5): a leg that blows its
    /// budget degrades to an empty result rather than stalling the fused
    /// search.
    #[serde(default = "default_extractor_timeout_ms")]
    pub extractor_timeout_ms: u64,
    #[serde(default = "default_embedder_timeout_ms")]
    pub embedder_timeout_ms: u64,
    #[serde(default = "default_keyword_timeout_ms")]
    pub keyword_timeout_ms: u64,
    #[serde(default = "default_vector_timeout_ms")]
    pub vector_timeout_ms: u64,
    #[serde(default = "default_graph_timeout_ms")]
    pub graph_timeout_ms: u64,
}

impl KiokuConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(Environment::with_prefix("KIOKU"));

        let mut cfg: Self = builder.build()?.try_deserialize()?;
        cfg.apply_defaults();
        Ok(cfg)
    }

    fn apply_defaults(&mut self) {
        let home = dirs_home();
        let root = home.join(".kioku");
        let root = if self.user_id == "default" {
            root
        } else {
            root.join("users").join(&self.user_id)
        };

        if self.memory_dir.is_none() {
            self.memory_dir = Some(root.join("memory"));
        }
        if self.data_dir.is_none() {
            self.data_dir = Some(root.join("data"));
        }
        if self.chroma_persist_dir.is_none() {
            self.chroma_persist_dir = self.data_dir.as_ref().map(|d| d.join("chroma"));
        }
    }

    /// Creates `memory_dir`/`data_dir` (and `chroma_persist_dir` when the
    /// embedded vector backend is in play). Ported from `Settings.ensure_dirs`.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        if let Some(dir) = &self.memory_dir {
            std::fs::create_dir_all(dir)?;
        }
        if let Some(dir) = &self.data_dir {
            std::fs::create_dir_all(dir)?;
        }
        if let Some(dir) = &self.chroma_persist_dir {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    fn suffix(&self) -> String {
        if self.user_id == "default" {
            String::new()
        } else {
            format!("_{}", self.user_id)
        }
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(format!("keyword{}.db", self.suffix()))
    }

    pub fn chroma_collection(&self) -> String {
        format!("memories{}", self.suffix())
    }

    pub fn falkordb_graph(&self) -> String {
        format!("kioku_kg{}", self.suffix())
    }

    pub fn extractor_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.extractor_timeout_ms)
    }

    pub fn embedder_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.embedder_timeout_ms)
    }

    pub fn keyword_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.keyword_timeout_ms)
    }

    pub fn vector_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.vector_timeout_ms)
    }

    pub fn graph_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.graph_timeout_ms)
    }
}

impl Default for KiokuConfig {
    fn default() -> Self {
        let mut cfg = Self {
            user_id: default_user_id(),
            memory_dir: None,
            data_dir: None,
            chroma_mode: default_chroma_mode(),
            chroma_host: default_chroma_host(),
            chroma_port: default_chroma_port(),
            chroma_persist_dir: None,
            falkordb_host: default_falkordb_host(),
            falkordb_port: default_falkordb_port(),
            ollama_host: default_ollama_host(),
            ollama_model: default_ollama_model(),
            anthropic_api_key: None,
            extractor_timeout_ms: default_extractor_timeout_ms(),
            embedder_timeout_ms: default_embedder_timeout_ms(),
            keyword_timeout_ms: default_keyword_timeout_ms(),
            vector_timeout_ms: default_vector_timeout_ms(),
            graph_timeout_ms: default_graph_timeout_ms(),
        };
        cfg.apply_defaults();
        cfg
    }
}

fn dirs_home() -> PathBuf {
    env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/root"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_user_suffix_is_empty() {
        let cfg = KiokuConfig {
            user_id: "default".to_string(),
            memory_dir: None,
            data_dir: None,
            chroma_mode: VectorMode::Auto,
            chroma_host: default_chroma_host(),
            chroma_port: default_chroma_port(),
            chroma_persist_dir: None,
            falkordb_host: default_falkordb_host(),
            falkordb_port: default_falkordb_port(),
            ollama_host: default_ollama_host(),
            ollama_model: default_ollama_model(),
            anthropic_api_key: None,
            extractor_timeout_ms: default_extractor_timeout_ms(),
            embedder_timeout_ms: default_embedder_timeout_ms(),
            keyword_timeout_ms: default_keyword_timeout_ms(),
            vector_timeout_ms: default_vector_timeout_ms(),
            graph_timeout_ms: default_graph_timeout_ms(),
        };
        assert_eq!(cfg.chroma_collection(), "memories");
        assert_eq!(cfg.falkordb_graph(), "kioku_kg");
    }

    #[test]
    fn named_user_gets_suffixed_names() {
        let mut cfg = KiokuConfig {
            user_id: "alice".to_string(),
            memory_dir: None,
            data_dir: None,
            chroma_mode: VectorMode::Auto,
            chroma_host: default_chroma_host(),
            chroma_port: default_chroma_port(),
            chroma_persist_dir: None,
            falkordb_host: default_falkordb_host(),
            falkordb_port: default_falkordb_port(),
            ollama_host: default_ollama_host(),
            ollama_model: default_ollama_model(),
            anthropic_api_key: None,
            extractor_timeout_ms: default_extractor_timeout_ms(),
            embedder_timeout_ms: default_embedder_timeout_ms(),
            keyword_timeout_ms: default_keyword_timeout_ms(),
            vector_timeout_ms: default_vector_timeout_ms(),
            graph_timeout_ms: default_graph_timeout_ms(),
        };
        cfg.apply_defaults();
        assert_eq!(cfg.chroma_collection(), "memories_alice");
        assert_eq!(cfg.falkordb_graph(), "kioku_kg_alice");
        assert!(cfg.memory_dir.unwrap().ends_with("users/alice/memory"));
    }
}
