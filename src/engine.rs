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

//! The engine object: owns the indices, the cache and the query pipeline.
//!
//! Query pipeline, for both entry points: candidates → merge → rerank →
//! confidence → rank → synthesis → top-k.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use parking_lot::RwLock;
use serde::Serialize;

use crate::cache::EmbeddingCache;
use crate::config::Config;
use crate::coordinator::BranchReport;
use crate::coordinator::Coordinator;
use crate::coordinator::DenseRetriever;
use crate::coordinator::ExpandedRetriever;
use crate::coordinator::KeywordRetriever;
use crate::coordinator::Phase;
use crate::coordinator::Retriever;
use crate::coordinator::merge;
use crate::dense::DenseIndex;
use crate::embed::Embedder;
use crate::embed::build_embedder;
use crate::error::EngineError;
use crate::error::Result;
use crate::expand::QueryExpander;
use crate::model::Candidate;
use crate::model::Metadata;
use crate::model::Method;
use crate::model::SearchResult;
use crate::rerank::CrossEncoder;
use crate::rerank::Reranker;
use crate::sparse::SparseIndex;
use crate::verify::Verifier;
use crate::verify::rank;
use crate::verify::synthesize;

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub model_name: String,
    pub num_documents: usize,
    pub embedding_dimension: usize,
    pub reranker_enabled: bool,
    pub reranker_model: String,
    pub reranker_available: bool,
    pub parallel_enabled: bool,
    pub num_sources: usize,
    pub cache_path: PathBuf,
}

/// Results of a hybrid query together with how each branch fared.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub branches: Vec<BranchReport>,
}

/// Rows and sources whose cache write failed, retried on the next write.
#[derive(Default)]
struct Backlog {
    rows: Vec<(String, Metadata, Vec<f32>)>,
    sources: Vec<String>,
}

impl Backlog {
    fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.sources.is_empty()
    }
}

pub struct Engine {
    config: Config,
    dense: Arc<RwLock<DenseIndex>>,
    sparse: Arc<RwLock<SparseIndex>>,
    expander: Arc<QueryExpander>,
    reranker: Reranker,
    coordinator: Coordinator,
    cache: EmbeddingCache,
    sources: RwLock<BTreeSet<String>>,
    writer: Mutex<Backlog>,
    closed: AtomicBool,
}

impl Engine {
    /// Builds the embedder and reranker named in `config`. A reranker that
    /// fails to load leaves the engine in fallback mode; an embedder that
    /// fails to load is fatal.
    pub fn from_config(config: Config) -> Result<Self> {
        let embedder = build_embedder(&config)?;
        let reranker = Reranker::from_config(&config.reranker);
        Self::assemble(config, embedder, reranker)
    }

    /// `cross_encoder = None` starts the reranker in fallback mode.
    pub fn init(
        config: Config,
        embedder: Arc<dyn Embedder>,
        cross_encoder: Option<Arc<dyn CrossEncoder>>,
    ) -> Result<Self> {
        let reranker = match cross_encoder {
            Some(encoder) => Reranker::new(encoder),
            None => Reranker::unavailable(config.reranker.model.clone()),
        };
        Self::assemble(config, embedder, reranker)
    }

    fn assemble(config: Config, embedder: Arc<dyn Embedder>, reranker: Reranker) -> Result<Self> {
        config
            .validate()
            .map_err(|err| EngineError::Config(err.to_string()))?;
        let sample = embedder
            .embed("sample")
            .map_err(|err| EngineError::EmbeddingUnavailable(err.to_string()))?;
        if sample.len() != embedder.dim() {
            return Err(EngineError::EmbeddingUnavailable(format!(
                "{} produced a vector of dim {}, declared {}",
                embedder.name(),
                sample.len(),
                embedder.dim()
            )));
        }

        let cache = EmbeddingCache::new(config.cache_path(), embedder.name(), embedder.dim());
        let bundle = cache.load();
        let (dense, sources) = match DenseIndex::restore(Arc::clone(&embedder), bundle.rows) {
            Ok(dense) => (dense, bundle.sources),
            Err(err) => {
                tracing::warn!(error = %err, "cached corpus rejected; starting empty");
                cache.mark_stale();
                (DenseIndex::new(embedder), BTreeSet::new())
            }
        };
        let sparse = SparseIndex::build(config.bm25, dense.documents());
        tracing::info!(
            model = dense.model_name(),
            documents = dense.len(),
            sources = sources.len(),
            "engine initialized"
        );

        let dense = Arc::new(RwLock::new(dense));
        let sparse = Arc::new(RwLock::new(sparse));
        let expander = Arc::new(QueryExpander::from_config(&config.expansion));
        let coordinator = Coordinator::new(
            vec![
                Arc::new(DenseRetriever::new(Arc::clone(&dense))),
                Arc::new(KeywordRetriever::new(Arc::clone(&dense), Arc::clone(&sparse))),
                Arc::new(ExpandedRetriever::new(
                    Arc::clone(&dense),
                    Arc::clone(&expander),
                    config.parallel.max_expanded_queries,
                )),
            ],
            Duration::from_millis(config.parallel.branch_timeout_ms),
        );

        Ok(Self {
            config,
            dense,
            sparse,
            expander,
            reranker,
            coordinator,
            cache,
            sources: RwLock::new(sources),
            writer: Mutex::new(Backlog::default()),
            closed: AtomicBool::new(false),
        })
    }

    /// Swaps the branch registered for `retriever.method()`.
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.coordinator.replace(retriever);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dense_index(&self) -> Arc<RwLock<DenseIndex>> {
        Arc::clone(&self.dense)
    }

    pub fn sparse_index(&self) -> Arc<RwLock<SparseIndex>> {
        Arc::clone(&self.sparse)
    }

    pub fn expander(&self) -> &QueryExpander {
        &self.expander
    }

    pub fn expand_query(&self, query: &str, num_expansions: Option<usize>) -> Result<Vec<String>> {
        self.ensure_open()?;
        let n = num_expansions.unwrap_or(self.expander.default_expansions());
        Ok(self.expander.expand(query, n))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Marks the engine closed after one last attempt to persist rows whose
    /// cache write failed earlier.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let mut backlog = self.writer.lock();
            self.persist(&mut backlog);
            if !backlog.is_empty() {
                tracing::warn!(
                    pending = backlog.rows.len(),
                    "engine closed with documents missing from the embeddings cache"
                );
            }
            tracing::debug!("engine closed");
        }
    }

    pub fn add_documents(&self, texts: &[String], metadata: Option<&[Metadata]>) -> Result<usize> {
        self.ensure_open()?;
        self.ingest(None, texts, metadata)
    }

    /// Like `add_documents`, but a source already recorded in the cache is
    /// skipped without embedding anything.
    pub fn add_source(
        &self,
        source_id: &str,
        texts: &[String],
        metadata: Option<&[Metadata]>,
    ) -> Result<usize> {
        self.ensure_open()?;
        self.ingest(Some(source_id), texts, metadata)
    }

    pub fn has_source(&self, source_id: &str) -> bool {
        self.sources.read().contains(source_id)
    }

    fn ingest(&self, source: Option<&str>, texts: &[String], metadata: Option<&[Metadata]>) -> Result<usize> {
        let mut backlog = self.writer.lock();
        if let Some(source) = source
            && self.has_source(source)
        {
            tracing::debug!(source, "source already ingested; skipping");
            return Ok(0);
        }

        let (added, rows, snapshot) = {
            let mut dense = self.dense.write();
            let added = dense.add(texts, metadata)?;
            dense.check_invariant()?;
            let rows: Vec<(String, Metadata, Vec<f32>)> = added
                .iter()
                .filter_map(|&idx| {
                    Some((
                        dense.document(idx)?.to_string(),
                        dense.metadata(idx)?.clone(),
                        dense.vector(idx)?.to_vec(),
                    ))
                })
                .collect();
            let snapshot = (!added.is_empty()).then(|| dense.documents().to_vec());
            (added, rows, snapshot)
        };

        if let Some(documents) = snapshot {
            let rebuilt = SparseIndex::build(self.config.bm25, &documents);
            *self.sparse.write() = rebuilt;
        }

        backlog.rows.extend(rows);
        if let Some(source) = source {
            backlog.sources.push(source.to_string());
            self.sources.write().insert(source.to_string());
        }
        self.persist(&mut backlog);
        tracing::debug!(added = added.len(), submitted = texts.len(), "documents ingested");
        Ok(added.len())
    }

    /// Writes everything queued in `backlog` to the cache. On failure the rows
    /// stay queued, so in-memory documents still reach disk once the cache is
    /// writable again.
    fn persist(&self, backlog: &mut Backlog) {
        if backlog.is_empty() {
            return;
        }
        let written = {
            let rows: Vec<(&str, &Metadata, &[f32])> = backlog
                .rows
                .iter()
                .map(|(text, meta, vector)| (text.as_str(), meta, vector.as_slice()))
                .collect();
            let sources: Vec<&str> = backlog.sources.iter().map(String::as_str).collect();
            self.cache.append(&rows, &sources)
        };
        match written {
            Ok(()) => *backlog = Backlog::default(),
            Err(err) => tracing::warn!(
                error = %err,
                pending = backlog.rows.len(),
                "embeddings cache write failed; documents queued for the next write"
            ),
        }
    }

    /// Dense-only search.
    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        min_similarity: f32,
        rerank: bool,
    ) -> Result<Vec<SearchResult>> {
        self.ensure_open()?;
        if top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let candidates: Vec<Candidate> = {
            let dense = self.dense.read();
            let hits = dense.search(query, top_k, min_similarity)?;
            hits.into_iter()
                .filter_map(|(idx, similarity)| {
                    Some(Candidate {
                        doc_index: idx,
                        document: dense.document(idx)?.to_string(),
                        metadata: dense.metadata(idx).cloned().unwrap_or_default(),
                        similarity,
                        bm25_score: None,
                        method: Method::Semantic,
                    })
                })
                .collect()
        };
        Ok(self.finish(query, merge(candidates), top_k, rerank))
    }

    pub async fn parallel_search(&self, query: &str, top_k: usize, rerank: bool) -> Result<Vec<SearchResult>> {
        Ok(self.parallel_search_with_report(query, top_k, rerank).await?.results)
    }

    pub async fn parallel_search_with_report(
        &self,
        query: &str,
        top_k: usize,
        rerank: bool,
    ) -> Result<SearchOutcome> {
        self.ensure_open()?;
        if !self.config.parallel.enabled {
            return Ok(SearchOutcome {
                results: self.search(query, top_k, 0.0, rerank)?,
                branches: Vec::new(),
            });
        }
        if top_k == 0 || query.trim().is_empty() {
            return Ok(SearchOutcome {
                results: Vec::new(),
                branches: Vec::new(),
            });
        }
        tracing::debug!(phase = ?Phase::Idle, query, top_k, "query received");
        let outcome = self.coordinator.dispatch(query, top_k).await;
        let results = self.finish(query, merge(outcome.pool), top_k, rerank);
        Ok(SearchOutcome {
            results,
            branches: outcome.reports,
        })
    }

    fn finish(&self, query: &str, mut results: Vec<SearchResult>, top_k: usize, rerank: bool) -> Vec<SearchResult> {
        if rerank && self.config.reranker.enabled && !results.is_empty() {
            tracing::debug!(phase = ?Phase::Reranking, candidates = results.len(), "reranking");
            let documents: Vec<String> = results.iter().map(|r| r.document.clone()).collect();
            let reranked = self.reranker.rerank(query, &documents, None);
            if !reranked.degraded {
                for (idx, score) in reranked.scores {
                    if let Some(result) = results.get_mut(idx) {
                        result.rerank_score = Some(score);
                    }
                }
            }
        }

        Verifier::new(&self.config.verify, query).score_all(&mut results);
        rank(&mut results);
        let mut results = {
            let dense = self.dense.read();
            synthesize(results, &self.config.verify, |a, b| {
                if dense.document(a.doc_index) != Some(a.document.as_str())
                    || dense.document(b.doc_index) != Some(b.document.as_str())
                {
                    return None;
                }
                dense.document_similarity(a.doc_index, b.doc_index)
            })
        };
        results.truncate(top_k);
        tracing::debug!(phase = ?Phase::Done, results = results.len(), "query complete");
        results
    }

    pub fn get_stats(&self) -> Result<EngineStats> {
        self.ensure_open()?;
        let dense = self.dense.read();
        Ok(EngineStats {
            model_name: dense.model_name().to_string(),
            num_documents: dense.len(),
            embedding_dimension: dense.dim(),
            reranker_enabled: self.config.reranker.enabled,
            reranker_model: self.reranker.model().to_string(),
            reranker_available: self.reranker.is_available(),
            parallel_enabled: self.config.parallel.enabled,
            num_sources: self.sources.read().len(),
            cache_path: self.cache.path().to_path_buf(),
        })
    }

    /// Drops every document and source, in memory and on disk.
    pub fn reset(&self) -> Result<()> {
        self.ensure_open()?;
        let mut backlog = self.writer.lock();
        *backlog = Backlog::default();
        {
            let mut dense = self.dense.write();
            *dense = DenseIndex::new(dense.embedder());
        }
        *self.sparse.write() = SparseIndex::new(self.config.bm25);
        self.sources.write().clear();
        self.cache.clear()?;
        tracing::info!("corpus reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;
    use tempfile::TempDir;
    use tempfile::tempdir;

    use super::*;
    use crate::embed::HashEmbedder;
    use crate::rerank::LexicalCrossEncoder;

    fn open_engine(dir: &TempDir) -> Result<Engine> {
        let config = Config {
            cache_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        Engine::init(config, Arc::new(HashEmbedder::new(256)), Some(Arc::new(LexicalCrossEncoder)))
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn duplicate_documents_are_skipped() -> Result<()> {
        let dir = tempdir()?;
        let engine = open_engine(&dir)?;
        let ai: Vec<Metadata> = (0..3)
            .map(|_| {
                let mut m = Metadata::new();
                m.insert("category".into(), json!("AI"));
                m
            })
            .collect();
        let docs = texts(&[
            "Machine learning is a subset of AI.",
            "Deep learning uses neural networks.",
            "Deep learning uses neural networks.",
        ]);
        assert_eq!(engine.add_documents(&docs, Some(&ai))?, 2);
        assert_eq!(engine.get_stats()?.num_documents, 2);

        let results = engine.search("neural networks", 1, 0.0, true)?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document, "Deep learning uses neural networks.");
        Ok(())
    }

    #[test]
    fn sources_are_ingested_once() -> Result<()> {
        let dir = tempdir()?;
        let engine = open_engine(&dir)?;
        assert_eq!(engine.add_source("a.md#1", &texts(&["alpha", "beta"]), None)?, 2);
        assert_eq!(engine.add_source("a.md#1", &texts(&["gamma"]), None)?, 0);
        let stats = engine.get_stats()?;
        assert_eq!(stats.num_documents, 2);
        assert_eq!(stats.num_sources, 1);
        Ok(())
    }

    #[test]
    fn closed_engine_refuses_operations() -> Result<()> {
        let dir = tempdir()?;
        let engine = open_engine(&dir)?;
        engine.close();
        assert!(matches!(engine.get_stats(), Err(EngineError::Closed)));
        assert!(matches!(
            engine.add_documents(&texts(&["x"]), None),
            Err(EngineError::Closed)
        ));
        Ok(())
    }

    #[test]
    fn reset_empties_corpus_and_cache() -> Result<()> {
        let dir = tempdir()?;
        let engine = open_engine(&dir)?;
        engine.add_source("s", &texts(&["one", "two"]), None)?;
        engine.reset()?;
        assert_eq!(engine.get_stats()?.num_documents, 0);
        assert!(!engine.has_source("s"));
        assert!(engine.search("one", 3, 0.0, false)?.is_empty());
        drop(engine);

        let reopened = open_engine(&dir)?;
        assert_eq!(reopened.get_stats()?.num_documents, 0);
        Ok(())
    }

    #[test]
    fn failed_cache_write_is_retried_on_next_ingest() -> Result<()> {
        let dir = tempdir()?;
        let cache_path = dir.path().join(crate::config::CACHE_FILE);
        fs::create_dir(&cache_path)?;
        let engine = open_engine(&dir)?;
        assert_eq!(engine.add_source("a.md", &texts(&["alpha notes"]), None)?, 1);
        assert_eq!(engine.get_stats()?.num_documents, 1);

        fs::remove_dir(&cache_path)?;
        engine.add_documents(&texts(&["beta notes"]), None)?;
        drop(engine);

        let reopened = open_engine(&dir)?;
        let dense = reopened.dense_index();
        assert_eq!(dense.read().documents(), texts(&["alpha notes", "beta notes"]).as_slice());
        assert!(reopened.has_source("a.md"));
        Ok(())
    }

    #[test]
    fn close_flushes_queued_rows() -> Result<()> {
        let dir = tempdir()?;
        let cache_path = dir.path().join(crate::config::CACHE_FILE);
        fs::create_dir(&cache_path)?;
        let engine = open_engine(&dir)?;
        engine.add_documents(&texts(&["gamma notes"]), None)?;

        fs::remove_dir(&cache_path)?;
        engine.close();
        drop(engine);

        let reopened = open_engine(&dir)?;
        assert_eq!(reopened.get_stats()?.num_documents, 1);
        Ok(())
    }

    #[test]
    fn empty_query_and_zero_k_return_nothing() -> Result<()> {
        let dir = tempdir()?;
        let engine = open_engine(&dir)?;
        engine.add_documents(&texts(&["something"]), None)?;
        assert!(engine.search("   ", 3, 0.0, true)?.is_empty());
        assert!(engine.search("something", 0, 0.0, true)?.is_empty());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn parallel_search_reports_every_branch() -> Result<()> {
        let dir = tempdir()?;
        let engine = open_engine(&dir)?;
        engine.add_documents(
            &texts(&[
                "Machine learning is a subset of AI.",
                "Deep learning uses neural networks.",
                "Gardening tips for spring.",
            ]),
            None,
        )?;
        let outcome = engine
            .parallel_search_with_report("deep learning", 2, true)
            .await?;
        let methods: Vec<Method> = outcome.branches.iter().map(|b| b.method).collect();
        assert_eq!(methods, vec![Method::Semantic, Method::Keyword, Method::Expanded]);
        assert!(outcome.branches.iter().all(|b| b.error.is_none()));
        assert!(!outcome.results.is_empty());
        assert!(outcome.results.len() <= 2);
        assert_eq!(outcome.results[0].document, "Deep learning uses neural networks.");
        Ok(())
    }
}
