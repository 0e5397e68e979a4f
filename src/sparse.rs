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

//! Okapi BM25 over a fully rebuilt term-frequency table.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::config::Bm25Params;
use crate::tokenize::tokenize;

#[derive(Debug, Clone, Default)]
pub struct SparseIndex {
    params: Bm25Params,
    term_freqs: Vec<HashMap<String, u32>>,
    doc_lengths: Vec<usize>,
    doc_freqs: HashMap<String, u32>,
    avg_doc_len: f32,
}

impl SparseIndex {
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    /// Builds a fresh index over `documents`. There is no incremental path:
    /// every statistic is derived from exactly this document set.
    pub fn build<S: AsRef<str>>(params: Bm25Params, documents: &[S]) -> Self {
        let mut index = Self::new(params);
        index.rebuild(documents);
        index
    }

    pub fn rebuild<S: AsRef<str>>(&mut self, documents: &[S]) {
        self.term_freqs.clear();
        self.doc_lengths.clear();
        self.doc_freqs.clear();

        let mut total_len = 0usize;
        for doc in documents {
            let tokens = tokenize(doc.as_ref());
            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *tf.entry(token.clone()).or_default() += 1;
            }
            for term in tf.keys() {
                *self.doc_freqs.entry(term.clone()).or_default() += 1;
            }
            total_len += tokens.len();
            self.doc_lengths.push(tokens.len());
            self.term_freqs.push(tf);
        }
        self.avg_doc_len = if documents.is_empty() {
            0.0
        } else {
            total_len as f32 / documents.len() as f32
        };
    }

    pub fn len(&self) -> usize {
        self.doc_lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lengths.is_empty()
    }

    pub fn avg_doc_len(&self) -> f32 {
        self.avg_doc_len
    }

    pub fn doc_freq(&self, term: &str) -> u32 {
        self.doc_freqs.get(term).copied().unwrap_or(0)
    }

    pub fn idf(&self, term: &str) -> f32 {
        let n = self.len() as f32;
        let df = self.doc_freq(term) as f32;
        ((n - df + 0.5) / (df + 0.5)).ln()
    }

    /// Scores every document, sorts descending (ties keep document order)
    /// and truncates to `top_k`. Zero-score documents stay eligible.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(usize, f32)> {
        let terms = tokenize(query);
        if terms.is_empty() || self.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let k1 = self.params.k1;
        let b = self.params.b;
        let avgdl = if self.avg_doc_len > 0.0 { self.avg_doc_len } else { 1.0 };
        let idfs: Vec<f32> = terms.iter().map(|t| self.idf(t)).collect();

        let mut scored: Vec<(usize, f32)> = self
            .term_freqs
            .iter()
            .zip(&self.doc_lengths)
            .enumerate()
            .map(|(idx, (tf_map, &doc_len))| {
                let mut score = 0.0f32;
                for (term, idf) in terms.iter().zip(&idfs) {
                    let Some(&tf) = tf_map.get(term) else {
                        continue;
                    };
                    let tf = tf as f32;
                    let norm = k1 * (1.0 - b + b * doc_len as f32 / avgdl);
                    score += idf * tf * (k1 + 1.0) / (tf + norm);
                }
                (idx, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(top_k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> SparseIndex {
        SparseIndex::build(
            Bm25Params::default(),
            &[
                "rust programming systems language fast",
                "python programming scripting easy",
                "java enterprise programming verbose",
                "rust memory safety zero cost abstractions",
                "gardening tips for spring",
            ],
        )
    }

    #[test]
    fn rebuild_tracks_statistics() {
        let idx = corpus();
        assert_eq!(idx.len(), 5);
        assert_eq!(idx.doc_freq("programming"), 3);
        assert_eq!(idx.doc_freq("rust"), 2);
        assert!((idx.avg_doc_len() - 23.0 / 5.0).abs() < 1e-6);
    }

    #[test]
    fn idf_uses_unsmoothed_okapi_form() {
        let idx = corpus();
        let expected = ((5.0f32 - 2.0 + 0.5) / (2.0 + 0.5)).ln();
        assert!((idx.idf("rust") - expected).abs() < 1e-6);
        // df > N/2 yields a negative idf in this form.
        assert!(idx.idf("programming") < 0.0);
    }

    #[test]
    fn ranks_matching_documents_first() {
        let idx = corpus();
        let hits = idx.search("rust safety", 5);
        assert_eq!(hits[0].0, 3);
        assert_eq!(hits[1].0, 0);
    }

    #[test]
    fn zero_score_documents_are_kept_within_top_k() {
        let idx = corpus();
        let hits = idx.search("rust", 5);
        assert_eq!(hits.len(), 5);
        assert!(hits[2..].iter().all(|(_, s)| *s == 0.0));
        // Ties keep document order.
        let tail: Vec<usize> = hits[2..].iter().map(|(i, _)| *i).collect();
        assert_eq!(tail, vec![1, 2, 4]);
    }

    #[test]
    fn repeated_searches_are_identical() {
        let idx = corpus();
        let first = idx.search("programming rust", 4);
        for _ in 0..10 {
            assert_eq!(idx.search("programming rust", 4), first);
        }
    }

    #[test]
    fn empty_inputs_return_nothing() {
        assert!(corpus().search("", 3).is_empty());
        assert!(SparseIndex::new(Bm25Params::default()).search("rust", 3).is_empty());
    }

    #[test]
    fn rebuild_replaces_previous_state() {
        let mut idx = corpus();
        idx.rebuild(&["only one doc"]);
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.doc_freq("rust"), 0);
    }
}
