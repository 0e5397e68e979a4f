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

//! Dense index: row-aligned documents, metadata and embedding vectors with
//! exhaustive cosine nearest-neighbor search.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use crate::embed::Embedder;
use crate::embed::cosine_similarity;
use crate::error::EngineError;
use crate::error::Result;
use crate::model::Metadata;

pub struct DenseIndex {
    embedder: Arc<dyn Embedder>,
    documents: Vec<String>,
    metadata: Vec<Metadata>,
    vectors: Vec<Vec<f32>>,
    seen: HashSet<String>,
}

impl DenseIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            documents: Vec::new(),
            metadata: Vec::new(),
            vectors: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Rebuilds from previously persisted rows without re-embedding.
    pub fn restore(
        embedder: Arc<dyn Embedder>,
        rows: Vec<(String, Metadata, Vec<f32>)>,
    ) -> Result<Self> {
        let dim = embedder.dim();
        let mut index = Self::new(embedder);
        for (text, meta, vector) in rows {
            if vector.len() != dim {
                return Err(EngineError::CorpusCorrupted(format!(
                    "cached vector has dim {}, expected {dim}",
                    vector.len()
                )));
            }
            if !index.seen.insert(text.clone()) {
                continue;
            }
            index.documents.push(text);
            index.metadata.push(meta);
            index.vectors.push(vector);
        }
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.embedder.dim()
    }

    pub fn model_name(&self) -> &str {
        self.embedder.name()
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    pub fn documents(&self) -> &[String] {
        &self.documents
    }

    pub fn document(&self, idx: usize) -> Option<&str> {
        self.documents.get(idx).map(String::as_str)
    }

    pub fn metadata(&self, idx: usize) -> Option<&Metadata> {
        self.metadata.get(idx)
    }

    pub fn vector(&self, idx: usize) -> Option<&[f32]> {
        self.vectors.get(idx).map(Vec::as_slice)
    }

    pub fn check_invariant(&self) -> Result<()> {
        if self.documents.len() != self.vectors.len() || self.documents.len() != self.metadata.len()
        {
            return Err(EngineError::CorpusCorrupted(format!(
                "documents {}, vectors {}, metadata {}",
                self.documents.len(),
                self.vectors.len(),
                self.metadata.len()
            )));
        }
        Ok(())
    }

    /// Adds texts not already in the corpus and returns the indices of the
    /// rows that were appended. Metadata is matched positionally; missing
    /// entries default to an empty map.
    pub fn add(&mut self, texts: &[String], metadata: Option<&[Metadata]>) -> Result<Vec<usize>> {
        let mut fresh_texts = Vec::new();
        let mut fresh_meta = Vec::new();
        let mut batch_seen = HashSet::new();
        for (i, text) in texts.iter().enumerate() {
            if self.seen.contains(text) || !batch_seen.insert(text.as_str()) {
                continue;
            }
            fresh_texts.push(text.clone());
            fresh_meta.push(
                metadata
                    .and_then(|m| m.get(i))
                    .cloned()
                    .unwrap_or_default(),
            );
        }
        if fresh_texts.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self.embedder.embed_batch(&fresh_texts)?;
        if vectors.len() != fresh_texts.len() {
            return Err(EngineError::Embedding(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                fresh_texts.len()
            )));
        }
        let dim = self.embedder.dim();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(EngineError::Embedding(format!(
                "provider returned vector of dim {}, expected {dim}",
                bad.len()
            )));
        }

        let start = self.documents.len();
        for ((text, meta), vector) in fresh_texts.into_iter().zip(fresh_meta).zip(vectors) {
            self.seen.insert(text.clone());
            self.documents.push(text);
            self.metadata.push(meta);
            self.vectors.push(vector);
        }
        Ok((start..self.documents.len()).collect())
    }

    pub fn search(&self, query: &str, top_k: usize, min_similarity: f32) -> Result<Vec<(usize, f32)>> {
        if self.is_empty() || top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed(query)?;
        Ok(self.search_vector(&query_vec, top_k, min_similarity))
    }

    /// Same as `search` for a query vector the caller already holds, so a
    /// batch of query variants can be embedded in one call.
    pub fn search_vector(&self, query_vec: &[f32], top_k: usize, min_similarity: f32) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(idx, vec)| (idx, cosine_similarity(query_vec, vec)))
            .filter(|(_, score)| *score >= min_similarity)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(top_k);
        scored
    }

    /// Cosine between an already-embedded query and one stored document.
    pub fn similarity_to(&self, query_vec: &[f32], idx: usize) -> Option<f32> {
        Some(cosine_similarity(query_vec, self.vector(idx)?))
    }

    pub fn document_similarity(&self, a: usize, b: usize) -> Option<f32> {
        Some(cosine_similarity(self.vector(a)?, self.vector(b)?))
    }
}
