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

use std::sync::Arc;

use model2vec_rs::model::StaticModel;
use sha2::Digest;
use sha2::Sha256;

use crate::config::Config;
use crate::error::EngineError;
use crate::error::Result;
use crate::tokenize::tokenize;

pub const EMBEDDING_HASH: &str = "hash";
pub const EMBEDDING_MODEL2VEC: &str = "model2vec";

/// Text to dense vector. Implementations must return one vector per input,
/// all of `dim()` length.
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    fn dim(&self) -> usize;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(&[text.to_string()])?;
        out.pop()
            .ok_or_else(|| EngineError::Embedding("provider returned no vector".to_string()))
    }
}

pub fn build_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    let name = config.embedding.trim().to_lowercase();
    match name.as_str() {
        EMBEDDING_HASH => Ok(Arc::new(HashEmbedder::new(config.embedding_dim))),
        EMBEDDING_MODEL2VEC => Ok(Arc::new(Model2VecEmbedder::load(
            &config.model2vec_model,
        )?)),
        _ => Err(EngineError::Config(format!(
            "unsupported embedding '{}'; supported: {} or {}",
            config.embedding, EMBEDDING_MODEL2VEC, EMBEDDING_HASH
        ))),
    }
}

/// Feature-hashing embedder over normalized word tokens. Deterministic and
/// dependency free, so it doubles as the test provider.
#[derive(Clone)]
pub struct HashEmbedder {
    dim: usize,
    name: String,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self {
            dim,
            name: format!("{EMBEDDING_HASH}-{dim}"),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dim];
        for token in tokenize(text) {
            let (idx, sign) = hash_token_feature(&token, self.dim);
            vec[idx] += sign;
        }
        l2_normalize(vec)
    }
}

impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

pub struct Model2VecEmbedder {
    model: StaticModel,
    name: String,
    dim: usize,
}

impl Model2VecEmbedder {
    pub fn load(repo_or_path: &str) -> Result<Self> {
        let model = StaticModel::from_pretrained(repo_or_path, None, Some(true), None)
            .map_err(|err| EngineError::EmbeddingUnavailable(format!("{repo_or_path}: {err}")))?;
        let sample = model.encode(&["sample".to_string()]);
        let dim = sample.first().map(Vec::len).unwrap_or(0);
        if dim == 0 {
            return Err(EngineError::EmbeddingUnavailable(format!(
                "{repo_or_path}: model produced empty embeddings"
            )));
        }
        tracing::info!(model = repo_or_path, dim, "loaded model2vec embedder");
        Ok(Self {
            model,
            name: repo_or_path.to_string(),
            dim,
        })
    }
}

impl Embedder for Model2VecEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.model.encode(texts);
        if vectors.len() != texts.len() {
            return Err(EngineError::Embedding(format!(
                "model returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }
}

pub fn l2_normalize(mut vec: Vec<f32>) -> Vec<f32> {
    let mut norm = 0.0f32;
    for v in &vec {
        norm += v * v;
    }
    if norm > 0.0 {
        let inv = 1.0 / norm.sqrt();
        for v in &mut vec {
            *v *= inv;
        }
    }
    vec
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn hash_token_feature(token: &str, dim: usize) -> (usize, f32) {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let hash = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash[..8]);
    let val = u64::from_le_bytes(bytes);
    let idx = (val as usize) % dim;
    let sign = if (val & (1 << 63)) != 0 { 1.0 } else { -1.0 };
    (idx, sign)
}

pub fn to_bytes(vec: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
