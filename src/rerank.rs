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

//! Cross-encoder reranking with a degrade-to-input-order fallback.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::RerankerConfig;
use crate::error::EngineError;
use crate::error::Result;
use crate::tokenize::tokenize;

/// Default model: a BERT-style cross-encoder served through fastembed.
pub const DEFAULT_CROSS_ENCODER: &str = "BAAI/bge-reranker-base";

/// Offline term-overlap scorer. No model download; used in tests and when
/// `reranker.model` names it explicitly.
pub const LEXICAL_CROSS_ENCODER: &str = "lexical-overlap-v1";

/// Score for a pair sharing no terms with the query.
const NO_OVERLAP_LOGIT: f32 = -6.0;

/// Jointly scores (query, document) pairs. Scores are unbounded logits.
pub trait CrossEncoder: Send + Sync {
    fn model_name(&self) -> &str;

    fn score_pairs(&self, query: &str, documents: &[String]) -> Result<Vec<f32>>;
}

pub fn build_cross_encoder(model: &str) -> Result<Arc<dyn CrossEncoder>> {
    match model.trim() {
        LEXICAL_CROSS_ENCODER => Ok(Arc::new(LexicalCrossEncoder)),
        other => load_model(other),
    }
}

#[cfg(feature = "reranker")]
fn load_model(model: &str) -> Result<Arc<dyn CrossEncoder>> {
    Ok(Arc::new(FastEmbedCrossEncoder::load(model)?))
}

#[cfg(not(feature = "reranker"))]
fn load_model(model: &str) -> Result<Arc<dyn CrossEncoder>> {
    Err(EngineError::Rerank(format!(
        "model '{model}' needs sift built with the `reranker` feature"
    )))
}

/// Cross-encoder over fastembed's ONNX `TextRerank`. Weights are fetched
/// into the fastembed cache on first load.
#[cfg(feature = "reranker")]
pub struct FastEmbedCrossEncoder {
    name: String,
    model: parking_lot::Mutex<fastembed::TextRerank>,
}

#[cfg(feature = "reranker")]
impl FastEmbedCrossEncoder {
    pub fn load(name: &str) -> Result<Self> {
        use fastembed::RerankInitOptions;
        use fastembed::RerankerModel;

        let kind = match name {
            "BAAI/bge-reranker-base" => RerankerModel::BGERerankerBase,
            "BAAI/bge-reranker-v2-m3" => RerankerModel::BGERerankerV2M3,
            "jinaai/jina-reranker-v1-turbo-en" => RerankerModel::JINARerankerV1TurboEn,
            other => {
                return Err(EngineError::Config(format!(
                    "unknown reranker model '{other}'; supported: {DEFAULT_CROSS_ENCODER}, \
                     BAAI/bge-reranker-v2-m3, jinaai/jina-reranker-v1-turbo-en, {LEXICAL_CROSS_ENCODER}"
                )));
            }
        };
        let options = RerankInitOptions::new(kind).with_show_download_progress(false);
        let model = fastembed::TextRerank::try_new(options)
            .map_err(|err| EngineError::Rerank(format!("load {name}: {err}")))?;
        tracing::info!(model = name, "cross-encoder loaded");
        Ok(Self {
            name: name.to_string(),
            model: parking_lot::Mutex::new(model),
        })
    }
}

#[cfg(feature = "reranker")]
impl CrossEncoder for FastEmbedCrossEncoder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn score_pairs(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let docs: Vec<&str> = documents.iter().map(String::as_str).collect();
        let ranked = self
            .model
            .lock()
            .rerank(query, &docs, false, None)
            .map_err(|err| EngineError::Rerank(err.to_string()))?;
        // fastembed returns results sorted by score; put them back in input order.
        let mut scores = vec![f32::NAN; documents.len()];
        for hit in ranked {
            if let Some(slot) = scores.get_mut(hit.index) {
                *slot = hit.score;
            }
        }
        if scores.iter().any(|s| s.is_nan()) {
            return Err(EngineError::Rerank(format!(
                "{} scored fewer than {} documents",
                self.name,
                documents.len()
            )));
        }
        Ok(scores)
    }
}

/// Offline pairwise scorer over query-term coverage, in-order bigram matches
/// and a mild length prior.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalCrossEncoder;

impl LexicalCrossEncoder {
    fn score(query_terms: &[String], query_bigrams: &HashSet<(String, String)>, doc: &str) -> f32 {
        if query_terms.is_empty() {
            return NO_OVERLAP_LOGIT;
        }
        let doc_tokens = tokenize(doc);
        let doc_terms: HashSet<&str> = doc_tokens.iter().map(String::as_str).collect();
        let covered = query_terms
            .iter()
            .filter(|t| doc_terms.contains(t.as_str()))
            .count();
        let coverage = covered as f32 / query_terms.len() as f32;

        let bigram_ratio = if query_bigrams.is_empty() {
            0.0
        } else {
            let doc_bigrams: HashSet<(&str, &str)> = doc_tokens
                .windows(2)
                .map(|w| (w[0].as_str(), w[1].as_str()))
                .collect();
            let hits = query_bigrams
                .iter()
                .filter(|(a, b)| doc_bigrams.contains(&(a.as_str(), b.as_str())))
                .count();
            hits as f32 / query_bigrams.len() as f32
        };

        let length_penalty = (doc_tokens.len() as f32 / 200.0).min(1.0);
        12.0 * coverage + 4.0 * bigram_ratio + NO_OVERLAP_LOGIT - length_penalty
    }
}

impl CrossEncoder for LexicalCrossEncoder {
    fn model_name(&self) -> &str {
        LEXICAL_CROSS_ENCODER
    }

    fn score_pairs(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        let tokens = tokenize(query);
        let mut seen = BTreeSet::new();
        let terms: Vec<String> = tokens
            .iter()
            .filter(|t| seen.insert(t.as_str()))
            .cloned()
            .collect();
        let bigrams: HashSet<(String, String)> = tokens
            .windows(2)
            .map(|w| (w[0].clone(), w[1].clone()))
            .collect();
        Ok(documents
            .iter()
            .map(|doc| Self::score(&terms, &bigrams, doc))
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reranked {
    /// `(original_index, score)` sorted by descending score.
    pub scores: Vec<(usize, f32)>,
    /// True when the placeholder ordering was returned instead of model
    /// scores.
    pub degraded: bool,
}

pub struct Reranker {
    model: String,
    encoder: Option<Arc<dyn CrossEncoder>>,
}

impl Reranker {
    pub fn new(encoder: Arc<dyn CrossEncoder>) -> Self {
        Self {
            model: encoder.model_name().to_string(),
            encoder: Some(encoder),
        }
    }

    pub fn unavailable(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            encoder: None,
        }
    }

    /// Loads the configured model. A load failure leaves the reranker in
    /// fallback mode instead of failing engine construction.
    pub fn from_config(config: &RerankerConfig) -> Self {
        if !config.enabled {
            tracing::debug!(model = %config.model, "reranker disabled; model not loaded");
            return Self::unavailable(config.model.clone());
        }
        match build_cross_encoder(&config.model) {
            Ok(encoder) => Self::new(encoder),
            Err(err) => {
                tracing::warn!(model = %config.model, error = %err, "reranker unavailable; results keep retrieval order");
                Self::unavailable(config.model.clone())
            }
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_available(&self) -> bool {
        self.encoder.is_some()
    }

    pub fn rerank(&self, query: &str, documents: &[String], top_k: Option<usize>) -> Reranked {
        let scored = match &self.encoder {
            Some(encoder) => match encoder.score_pairs(query, documents) {
                Ok(scores) if scores.len() == documents.len() => Some(scores),
                Ok(scores) => {
                    tracing::warn!(
                        expected = documents.len(),
                        got = scores.len(),
                        "reranker returned wrong number of scores; using input order"
                    );
                    None
                }
                Err(err) => {
                    tracing::warn!(error = %err, "reranker scoring failed; using input order");
                    None
                }
            },
            None => None,
        };

        let (mut scores, degraded) = match scored {
            Some(scores) => {
                let mut pairs: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
                pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
                (pairs, false)
            }
            None => ((0..documents.len()).map(|i| (i, 1.0)).collect(), true),
        };
        if let Some(k) = top_k {
            scores.truncate(k);
        }
        Reranked { scores, degraded }
    }
}
