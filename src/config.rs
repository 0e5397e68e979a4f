// Copyright 2026 Sift Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

pub const CACHE_FILE: &str = "embeddings.db";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub embedding: String,
    pub embedding_dim: usize,
    pub model2vec_model: String,
    pub reranker: RerankerConfig,
    pub parallel: ParallelConfig,
    pub bm25: Bm25Params,
    pub expansion: ExpansionConfig,
    pub verify: VerifyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".sift"),
            embedding: "hash".to_string(),
            embedding_dim: 256,
            model2vec_model: "minishlab/potion-base-8M".to_string(),
            reranker: RerankerConfig::default(),
            parallel: ParallelConfig::default(),
            bm25: Bm25Params::default(),
            expansion: ExpansionConfig::default(),
            verify: VerifyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    pub enabled: bool,
    pub model: String,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: crate::rerank::DEFAULT_CROSS_ENCODER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    pub enabled: bool,
    pub branch_timeout_ms: u64,
    pub max_expanded_queries: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            branch_timeout_ms: 5000,
            max_expanded_queries: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    pub num_expansions: usize,
    pub synonyms: BTreeMap<String, Vec<String>>,
    pub concepts: BTreeMap<String, Vec<String>>,
    pub question_prefixes: Vec<String>,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            num_expansions: 3,
            synonyms: dictionary(&[
                ("machine learning", &["ML", "statistical learning"]),
                ("artificial intelligence", &["AI", "machine intelligence"]),
                ("deep learning", &["DL", "deep neural networks"]),
                ("natural language processing", &["NLP", "computational linguistics"]),
                ("neural network", &["neural net", "ANN"]),
            ]),
            concepts: dictionary(&[
                ("machine learning", &["algorithms", "training data"]),
                ("deep learning", &["neural networks", "backpropagation"]),
                ("neural network", &["layers", "activation functions"]),
                ("ai", &["automation", "intelligent systems"]),
                ("search", &["retrieval", "ranking"]),
            ]),
            question_prefixes: vec![
                "What is".to_string(),
                "How does".to_string(),
                "Explain".to_string(),
            ],
        }
    }
}

fn dictionary(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    entries
        .iter()
        .map(|(key, values)| {
            (
                key.to_string(),
                values.iter().map(|v| v.to_string()).collect(),
            )
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub high_quality_categories: Vec<String>,
    pub synthesis_similarity: f32,
    pub synthesis_doc_similarity: f32,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            high_quality_categories: vec!["AI".to_string()],
            synthesis_similarity: 0.7,
            synthesis_doc_similarity: 0.8,
        }
    }
}

impl Config {
    pub fn cache_path(&self) -> PathBuf {
        self.cache_dir.join(CACHE_FILE)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bm25.k1 < 0.0 {
            anyhow::bail!("bm25.k1 must be non-negative, got {}", self.bm25.k1);
        }
        if !(0.0..=1.0).contains(&self.bm25.b) {
            anyhow::bail!("bm25.b must be within [0, 1], got {}", self.bm25.b);
        }
        if self.parallel.branch_timeout_ms == 0 {
            anyhow::bail!("parallel.branch_timeout_ms must be positive");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigCtx {
    pub root: PathBuf,
    pub config: Config,
}

impl ConfigCtx {
    pub fn load_from_cwd(explicit: Option<&Path>) -> Result<Self> {
        let cwd = std::env::current_dir().context("get current dir")?;
        Self::load_from(&cwd, explicit)
    }

    pub fn load_from(start: &Path, explicit: Option<&Path>) -> Result<Self> {
        let config = match explicit {
            Some(path) => read_config(path)?,
            None => load_global_config()?,
        };
        let root = find_cache_root(start, &config.cache_dir)
            .ok_or_else(|| anyhow::anyhow!("cache not found; run `sift init` first"))?;
        Ok(Self { root, config })
    }

    /// Config with `cache_dir` made absolute against the discovered root.
    pub fn resolved(&self) -> Config {
        let mut config = self.config.clone();
        if !config.cache_dir.is_absolute() {
            config.cache_dir = self.root.join(&config.cache_dir);
        }
        config
    }
}

fn config_dir() -> Option<PathBuf> {
    if cfg!(target_os = "windows") {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return Some(PathBuf::from(appdata));
        }
        if let Ok(profile) = std::env::var("USERPROFILE") {
            return Some(PathBuf::from(profile).join("AppData").join("Roaming"));
        }
        return None;
    }

    if cfg!(target_os = "macos") {
        let home = std::env::var("HOME").ok()?;
        return Some(
            PathBuf::from(home)
                .join("Library")
                .join("Application Support"),
        );
    }

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg));
    }
    let home = std::env::var("HOME").ok()?;
    Some(PathBuf::from(home).join(".config"))
}

pub fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("sift").join("sift.toml"))
}

pub fn load_global_config() -> Result<Config> {
    let Some(path) = global_config_path() else {
        return Ok(Config::default());
    };
    if !path.exists() {
        return Ok(Config::default());
    }
    read_config(&path)
}

pub fn find_cache_root(start: &Path, cache_dir: &Path) -> Option<PathBuf> {
    if cache_dir.is_absolute() {
        return cache_dir
            .exists()
            .then(|| cache_dir.parent().unwrap_or(cache_dir).to_path_buf());
    }

    let mut cur = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
    loop {
        if cur.join(cache_dir).is_dir() {
            return Some(cur);
        }
        match cur.parent() {
            Some(parent) => cur = parent.to_path_buf(),
            None => return None,
        }
    }
}

pub fn read_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let config: Config = toml::from_str(&text).context("parse sift.toml")?;
    config.validate()?;
    Ok(config)
}
