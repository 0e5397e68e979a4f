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

//! Fork-join fan-out of one query across the retrieval branches.
//!
//! Every branch runs on the blocking pool under a shared deadline. A branch
//! that errors, panics or misses the deadline contributes nothing; the other
//! branches are unaffected.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

use crate::dense::DenseIndex;
use crate::error::Result;
use crate::expand::QueryExpander;
use crate::model::Candidate;
use crate::model::Method;
use crate::model::SearchResult;
use crate::sparse::SparseIndex;

/// Per-query pipeline phases, traced at debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Dispatching,
    Collecting,
    Deduplicating,
    Reranking,
    Done,
}

pub trait Retriever: Send + Sync {
    fn method(&self) -> Method;

    fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Candidate>>;
}

fn dense_candidates(
    dense: &DenseIndex,
    hits: Vec<(usize, f32)>,
    method: Method,
) -> Vec<Candidate> {
    hits.into_iter()
        .filter_map(|(idx, similarity)| {
            Some(Candidate {
                doc_index: idx,
                document: dense.document(idx)?.to_string(),
                metadata: dense.metadata(idx).cloned().unwrap_or_default(),
                similarity,
                bm25_score: None,
                method,
            })
        })
        .collect()
}

pub struct DenseRetriever {
    dense: Arc<RwLock<DenseIndex>>,
}

impl DenseRetriever {
    pub fn new(dense: Arc<RwLock<DenseIndex>>) -> Self {
        Self { dense }
    }
}

impl Retriever for DenseRetriever {
    fn method(&self) -> Method {
        Method::Semantic
    }

    fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Candidate>> {
        let dense = self.dense.read();
        let hits = dense.search(query, top_k, 0.0)?;
        Ok(dense_candidates(&dense, hits, Method::Semantic))
    }
}

/// BM25 branch. Hits are ranked by BM25; `similarity` is still the cosine
/// between the query and the stored vector so every branch reports the same
/// quantity. The BM25 score travels in `bm25_score`.
pub struct KeywordRetriever {
    dense: Arc<RwLock<DenseIndex>>,
    sparse: Arc<RwLock<SparseIndex>>,
}

impl KeywordRetriever {
    pub fn new(dense: Arc<RwLock<DenseIndex>>, sparse: Arc<RwLock<SparseIndex>>) -> Self {
        Self { dense, sparse }
    }
}

impl Retriever for KeywordRetriever {
    fn method(&self) -> Method {
        Method::Keyword
    }

    fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Candidate>> {
        let hits = self.sparse.read().search(query, top_k);
        if hits.is_empty() {
            return Ok(Vec::new());
        }
        let dense = self.dense.read();
        let query_vec = match dense.embedder().embed(query) {
            Ok(vec) => Some(vec),
            Err(err) => {
                tracing::warn!(error = %err, "query embedding failed; keyword hits carry zero similarity");
                None
            }
        };
        Ok(hits
            .into_iter()
            .filter_map(|(idx, score)| {
                let similarity = query_vec
                    .as_deref()
                    .and_then(|q| dense.similarity_to(q, idx))
                    .unwrap_or(0.0);
                Some(Candidate {
                    doc_index: idx,
                    document: dense.document(idx)?.to_string(),
                    metadata: dense.metadata(idx).cloned().unwrap_or_default(),
                    similarity,
                    bm25_score: Some(score),
                    method: Method::Keyword,
                })
            })
            .collect())
    }
}

/// Dense search over the non-original expansions of the query.
pub struct ExpandedRetriever {
    dense: Arc<RwLock<DenseIndex>>,
    expander: Arc<QueryExpander>,
    max_queries: usize,
}

impl ExpandedRetriever {
    pub fn new(dense: Arc<RwLock<DenseIndex>>, expander: Arc<QueryExpander>, max_queries: usize) -> Self {
        Self {
            dense,
            expander,
            max_queries,
        }
    }
}

impl Retriever for ExpandedRetriever {
    fn method(&self) -> Method {
        Method::Expanded
    }

    fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Candidate>> {
        let num = self.expander.default_expansions().max(self.max_queries);
        let variants: Vec<String> = self
            .expander
            .expand(query, num)
            .into_iter()
            .skip(1)
            .take(self.max_queries)
            .collect();
        let dense = self.dense.read();
        if variants.is_empty() || dense.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let vectors = dense.embedder().embed_batch(&variants)?;
        let mut out = Vec::new();
        for vector in &vectors {
            let hits = dense.search_vector(vector, top_k, 0.0);
            out.extend(dense_candidates(&dense, hits, Method::Expanded));
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BranchReport {
    pub method: Method,
    pub hits: usize,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BranchOutcome {
    /// Every hit from every branch, in dispatch order, before dedup.
    pub pool: Vec<Candidate>,
    pub reports: Vec<BranchReport>,
}

pub struct Coordinator {
    branches: Vec<Arc<dyn Retriever>>,
    timeout: Duration,
}

impl Coordinator {
    pub fn new(branches: Vec<Arc<dyn Retriever>>, timeout: Duration) -> Self {
        Self { branches, timeout }
    }

    /// Replaces the branch with the same method, or appends a new one.
    pub fn replace(&mut self, retriever: Arc<dyn Retriever>) {
        let method = retriever.method();
        match self.branches.iter_mut().find(|b| b.method() == method) {
            Some(slot) => *slot = retriever,
            None => self.branches.push(retriever),
        }
    }

    pub fn branch_k(method: Method, top_k: usize) -> usize {
        match method {
            Method::Expanded => top_k,
            Method::Semantic | Method::Keyword => top_k.saturating_mul(2),
        }
    }

    pub async fn dispatch(&self, query: &str, top_k: usize) -> BranchOutcome {
        tracing::debug!(phase = ?Phase::Dispatching, branches = self.branches.len(), "parallel search");
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.timeout;

        let handles: Vec<_> = self
            .branches
            .iter()
            .map(|branch| {
                let branch = Arc::clone(branch);
                let query = query.to_string();
                let k = Self::branch_k(branch.method(), top_k);
                let method = branch.method();
                let handle = tokio::task::spawn_blocking(move || branch.retrieve(&query, k));
                (method, handle)
            })
            .collect();

        tracing::debug!(phase = ?Phase::Collecting, "awaiting branches");
        let mut pool = Vec::new();
        let mut reports = Vec::with_capacity(handles.len());
        for (method, handle) in handles {
            let outcome = match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(Ok(hits))) => Ok(hits),
                Ok(Ok(Err(err))) => Err(err.to_string()),
                Ok(Err(join_err)) => Err(format!("branch task failed: {join_err}")),
                Err(_) => Err(format!("timed out after {} ms", self.timeout.as_millis())),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match outcome {
                Ok(hits) => {
                    reports.push(BranchReport {
                        method,
                        hits: hits.len(),
                        elapsed_ms,
                        error: None,
                    });
                    pool.extend(hits);
                }
                Err(error) => {
                    tracing::warn!(branch = method.as_label(), %error, "retrieval branch failed; continuing without it");
                    reports.push(BranchReport {
                        method,
                        hits: 0,
                        elapsed_ms,
                        error: Some(error),
                    });
                }
            }
        }
        BranchOutcome { pool, reports }
    }
}

/// First occurrence of each exact text wins, in pool order. Agreement and
/// the BM25 score are taken from the whole pool so a document found by
/// several branches keeps that evidence after dedup.
pub fn merge(pool: Vec<Candidate>) -> Vec<SearchResult> {
    tracing::debug!(phase = ?Phase::Deduplicating, pool = pool.len(), "merging branch results");
    let mut methods_by_text: HashMap<String, BTreeSet<Method>> = HashMap::new();
    let mut bm25_by_text: HashMap<String, f32> = HashMap::new();
    for candidate in &pool {
        methods_by_text
            .entry(candidate.document.clone())
            .or_default()
            .insert(candidate.method);
        if let Some(score) = candidate.bm25_score {
            bm25_by_text.entry(candidate.document.clone()).or_insert(score);
        }
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for candidate in pool {
        if !seen.insert(candidate.document.clone()) {
            continue;
        }
        let agreement = methods_by_text
            .get(&candidate.document)
            .map(|m| m.len().saturating_sub(1))
            .unwrap_or(0);
        let bm25 = bm25_by_text.get(&candidate.document).copied();
        let mut result = SearchResult::from_candidate(candidate);
        result.agreement = agreement;
        if result.bm25_score.is_none() {
            result.bm25_score = bm25;
        }
        out.push(result);
    }
    out
}
