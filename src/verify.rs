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

//! Confidence scoring, ranking and near-duplicate synthesis.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::config::VerifyConfig;
use crate::model::SearchResult;
use crate::tokenize::term_set;

const AGREEMENT_STEP: f32 = 0.2;
const AGREEMENT_CAP: f32 = 0.6;
const COVERAGE_WEIGHT: f32 = 0.3;
const RERANK_POSITIVE_BONUS: f32 = 0.3;
const RERANK_NEGATIVE_PENALTY: f32 = -0.2;
const RERANK_NEGATIVE_THRESHOLD: f32 = -5.0;
const CATEGORY_BONUS: f32 = 0.1;
const HIGH_SIMILARITY_THRESHOLD: f32 = 0.8;
const HIGH_SIMILARITY_BONUS: f32 = 0.2;

pub struct Verifier<'a> {
    config: &'a VerifyConfig,
    query_terms: BTreeSet<String>,
}

impl<'a> Verifier<'a> {
    pub fn new(config: &'a VerifyConfig, query: &str) -> Self {
        Self {
            config,
            query_terms: term_set(query),
        }
    }

    pub fn confidence(&self, result: &SearchResult) -> f32 {
        let mut score = (result.agreement as f32 * AGREEMENT_STEP).min(AGREEMENT_CAP);

        if !self.query_terms.is_empty() {
            let doc_terms = term_set(&result.document);
            let covered = self.query_terms.intersection(&doc_terms).count();
            score += covered as f32 / self.query_terms.len() as f32 * COVERAGE_WEIGHT;
        }

        match result.rerank_score {
            Some(s) if s > 0.0 => score += RERANK_POSITIVE_BONUS,
            Some(s) if s < RERANK_NEGATIVE_THRESHOLD => score += RERANK_NEGATIVE_PENALTY,
            _ => {}
        }

        if let Some(category) = result.category()
            && self
                .config
                .high_quality_categories
                .iter()
                .any(|c| c == category)
        {
            score += CATEGORY_BONUS;
        }

        if result.similarity > HIGH_SIMILARITY_THRESHOLD {
            score += HIGH_SIMILARITY_BONUS;
        }

        score.clamp(-1.0, 1.0)
    }

    pub fn score_all(&self, results: &mut [SearchResult]) {
        for result in results.iter_mut() {
            result.confidence = Some(self.confidence(result));
        }
    }
}

/// Stable descending sort on `SearchResult::ranking_key`; equal keys keep
/// their incoming (dispatch) order.
pub fn rank(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.ranking_key()
            .partial_cmp(&a.ranking_key())
            .unwrap_or(Ordering::Equal)
    });
}

/// Folds near-duplicates into the best-ranked member. Expects `results`
/// already ranked. `doc_similarity` compares two results' documents and
/// returns `None` when no embedding is available, in which case token
/// Jaccard is used.
pub fn synthesize<F>(results: Vec<SearchResult>, config: &VerifyConfig, doc_similarity: F) -> Vec<SearchResult>
where
    F: Fn(&SearchResult, &SearchResult) -> Option<f32>,
{
    let mut consumed = vec![false; results.len()];
    let mut out = Vec::with_capacity(results.len());

    for i in 0..results.len() {
        if consumed[i] {
            continue;
        }
        let mut base = results[i].clone();
        let mut confidences = vec![base.confidence.unwrap_or(0.0)];
        let mut merged = base.merged_count;

        if base.similarity > config.synthesis_similarity {
            for j in (i + 1)..results.len() {
                if consumed[j] {
                    continue;
                }
                let other = &results[j];
                if other.similarity <= config.synthesis_similarity {
                    continue;
                }
                let sim = doc_similarity(&results[i], other)
                    .unwrap_or_else(|| crate::tokenize::jaccard(&results[i].document, &other.document));
                if sim <= config.synthesis_doc_similarity {
                    continue;
                }
                consumed[j] = true;
                merged += other.merged_count;
                confidences.push(other.confidence.unwrap_or(0.0));
                for method in &other.methods {
                    if !base.methods.contains(method) {
                        base.methods.push(*method);
                    }
                }
                if base.bm25_score.is_none() {
                    base.bm25_score = other.bm25_score;
                }
            }
        }

        if merged > base.merged_count {
            tracing::debug!(doc = base.doc_index, merged, "synthesized near-duplicate results");
            base.merged_count = merged;
            let avg = confidences.iter().sum::<f32>() / confidences.len() as f32;
            base.confidence = Some(avg.clamp(-1.0, 1.0));
        }
        out.push(base);
    }
    out
}
