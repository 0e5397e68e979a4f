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

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sift::Config;
use sift::Engine;
use sift::EngineError;
use sift::Metadata;
use sift::Method;
use sift::coordinator::DenseRetriever;
use sift::coordinator::Retriever;
use sift::embed::Embedder;
use sift::embed::HashEmbedder;
use sift::error::Result;
use sift::model::Candidate;
use sift::rerank::CrossEncoder;
use sift::rerank::LexicalCrossEncoder;
use tempfile::TempDir;

const CORPUS: &[&str] = &[
    "Rust guarantees memory safety without a garbage collector.",
    "The borrow checker enforces ownership rules at compile time.",
    "Python is a dynamically typed scripting language.",
    "Deep learning uses neural networks with many layers.",
    "Machine learning is a subset of AI.",
    "Search engines combine keyword retrieval with ranking.",
    "Gardening tips for spring planting.",
];

fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn config_in(dir: &TempDir) -> Config {
    Config {
        cache_dir: dir.path().to_path_buf(),
        ..Default::default()
    }
}

fn engine_with(config: Config, cross_encoder: Option<Arc<dyn CrossEncoder>>) -> Result<Engine> {
    Engine::init(config, Arc::new(HashEmbedder::new(256)), cross_encoder)
}

fn open_engine(dir: &TempDir) -> Result<Engine> {
    engine_with(config_in(dir), Some(Arc::new(LexicalCrossEncoder)))
}

fn seeded(dir: &TempDir) -> Result<Engine> {
    let engine = open_engine(dir)?;
    engine.add_documents(&texts(CORPUS), None)?;
    Ok(engine)
}

fn doc_set(results: &[sift::SearchResult]) -> BTreeSet<String> {
    results.iter().map(|r| r.document.clone()).collect()
}

struct FailingKeyword;

impl Retriever for FailingKeyword {
    fn method(&self) -> Method {
        Method::Keyword
    }

    fn retrieve(&self, _query: &str, _top_k: usize) -> Result<Vec<Candidate>> {
        Err(EngineError::Embedding("keyword index offline".to_string()))
    }
}

struct StalledExpanded;

impl Retriever for StalledExpanded {
    fn method(&self) -> Method {
        Method::Expanded
    }

    fn retrieve(&self, _query: &str, _top_k: usize) -> Result<Vec<Candidate>> {
        std::thread::sleep(Duration::from_millis(400));
        Ok(Vec::new())
    }
}

/// Semantic branch that only reports its single best hit.
struct TopDenseHit(DenseRetriever);

impl Retriever for TopDenseHit {
    fn method(&self) -> Method {
        Method::Semantic
    }

    fn retrieve(&self, query: &str, _top_k: usize) -> Result<Vec<Candidate>> {
        self.0.retrieve(query, 1)
    }
}

struct EmptyExpanded;

impl Retriever for EmptyExpanded {
    fn method(&self) -> Method {
        Method::Expanded
    }

    fn retrieve(&self, _query: &str, _top_k: usize) -> Result<Vec<Candidate>> {
        Ok(Vec::new())
    }
}

struct BrokenEncoder;

impl CrossEncoder for BrokenEncoder {
    fn model_name(&self) -> &str {
        "broken-encoder"
    }

    fn score_pairs(&self, _query: &str, _documents: &[String]) -> Result<Vec<f32>> {
        Err(EngineError::Embedding("inference server unreachable".to_string()))
    }
}

struct OfflineEmbedder;

impl Embedder for OfflineEmbedder {
    fn name(&self) -> &str {
        "offline"
    }

    fn dim(&self) -> usize {
        8
    }

    fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(EngineError::Embedding("connection refused".to_string()))
    }
}

#[test]
fn ingestion_is_idempotent() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = open_engine(&dir)?;
    let first = engine.add_documents(&texts(CORPUS), None)?;
    let second = engine.add_documents(&texts(CORPUS), None)?;
    assert_eq!(first, CORPUS.len());
    assert_eq!(second, 0);
    assert_eq!(engine.get_stats()?.num_documents, CORPUS.len());
    Ok(())
}

#[test]
fn documents_vectors_and_metadata_stay_aligned() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = open_engine(&dir)?;
    let mut meta = Metadata::new();
    meta.insert("category".into(), json!("AI"));
    engine.add_documents(&texts(&CORPUS[..3]), Some(&[meta.clone()]))?;
    engine.add_documents(&texts(CORPUS), None)?;

    let dense = engine.dense_index();
    let dense = dense.read();
    dense.check_invariant()?;
    assert_eq!(dense.len(), CORPUS.len());
    assert_eq!(dense.metadata(0), Some(&meta));
    assert_eq!(dense.metadata(1), Some(&Metadata::new()));
    for idx in 0..dense.len() {
        assert_eq!(dense.vector(idx).map(<[f32]>::len), Some(256));
    }
    Ok(())
}

#[test]
fn bm25_search_is_deterministic() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = seeded(&dir)?;
    let sparse = engine.sparse_index();
    let baseline = sparse.read().search("memory safety ownership", 5);
    assert_eq!(baseline.len(), 5);
    for _ in 0..20 {
        assert_eq!(sparse.read().search("memory safety ownership", 5), baseline);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn keyword_failure_does_not_sink_the_query() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = seeded(&dir)?.with_retriever(Arc::new(FailingKeyword));
    let outcome = engine
        .parallel_search_with_report("neural networks deep learning", 3, true)
        .await?;
    assert!(!outcome.results.is_empty());
    assert!(
        outcome
            .results
            .iter()
            .all(|r| !r.methods.contains(&Method::Keyword))
    );
    let keyword = outcome
        .branches
        .iter()
        .find(|b| b.method == Method::Keyword)
        .expect("keyword report");
    assert_eq!(keyword.hits, 0);
    assert!(keyword.error.as_deref().is_some_and(|e| e.contains("offline")));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn stalled_branch_is_cut_off_by_timeout() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = config_in(&dir);
    config.parallel.branch_timeout_ms = 50;
    let engine = engine_with(config, Some(Arc::new(LexicalCrossEncoder)))?;
    engine.add_documents(&texts(CORPUS), None)?;
    let engine = engine.with_retriever(Arc::new(StalledExpanded));

    let outcome = engine
        .parallel_search_with_report("rust memory safety", 2, true)
        .await?;
    assert_eq!(outcome.results[0].document, CORPUS[0]);
    let expanded = outcome
        .branches
        .iter()
        .find(|b| b.method == Method::Expanded)
        .expect("expanded report");
    assert!(expanded.error.as_deref().is_some_and(|e| e.contains("timed out")));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn confidence_stays_within_bounds() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = seeded(&dir)?;
    let mut meta = Metadata::new();
    meta.insert("category".into(), json!("AI"));
    engine.add_documents(
        &texts(&["AI AI AI neural networks deep learning machine learning"]),
        Some(&[meta]),
    )?;
    for query in [
        "neural networks",
        "machine learning",
        "rust",
        "AI",
        "zzz unknown terms",
        "deep learning neural networks machine learning AI",
    ] {
        for result in engine.parallel_search(query, 10, true).await? {
            let confidence = result.confidence.expect("scored");
            assert!((-1.0..=1.0).contains(&confidence), "{query}: {confidence}");
        }
        for result in engine.search(query, 10, 0.0, true)? {
            let confidence = result.confidence.expect("scored");
            assert!((-1.0..=1.0).contains(&confidence), "{query}: {confidence}");
        }
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unavailable_reranker_returns_same_documents() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = engine_with(config_in(&dir), None)?;
    engine.add_documents(&texts(CORPUS), None)?;
    assert!(!engine.get_stats()?.reranker_available);

    let with_rerank = engine.search("learning", 4, 0.0, true)?;
    let without = engine.search("learning", 4, 0.0, false)?;
    assert_eq!(doc_set(&with_rerank), doc_set(&without));
    assert!(with_rerank.iter().all(|r| r.rerank_score.is_none()));

    let with_rerank = engine.parallel_search("learning", 4, true).await?;
    let without = engine.parallel_search("learning", 4, false).await?;
    assert_eq!(doc_set(&with_rerank), doc_set(&without));
    Ok(())
}

#[test]
fn failing_reranker_degrades_instead_of_erroring() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = engine_with(config_in(&dir), Some(Arc::new(BrokenEncoder)))?;
    engine.add_documents(&texts(CORPUS), None)?;
    let with_rerank = engine.search("memory safety", 3, 0.0, true)?;
    let without = engine.search("memory safety", 3, 0.0, false)?;
    assert_eq!(doc_set(&with_rerank), doc_set(&without));
    Ok(())
}

#[test]
fn duplicate_is_skipped_and_neural_query_finds_deep_learning() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = open_engine(&dir)?;
    let mut meta = Metadata::new();
    meta.insert("category".into(), json!("AI"));
    let metadata = vec![meta.clone(), meta.clone(), meta];
    engine.add_documents(
        &texts(&[
            "Machine learning is a subset of AI.",
            "Deep learning uses neural networks.",
            "Deep learning uses neural networks.",
        ]),
        Some(&metadata),
    )?;
    assert_eq!(engine.get_stats()?.num_documents, 2);

    let results = engine.search("neural networks", 1, 0.0, true)?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document, "Deep learning uses neural networks.");

    let all = engine.search("neural networks", 2, -1.0, false)?;
    let deep = all
        .iter()
        .find(|r| r.document.starts_with("Deep"))
        .expect("deep learning doc");
    let ml = all
        .iter()
        .find(|r| r.document.starts_with("Machine"))
        .expect("machine learning doc");
    assert!(deep.similarity > ml.similarity);
    Ok(())
}

#[test]
fn expansion_of_machine_learning_basics_has_three_entries() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = open_engine(&dir)?;
    let variants = engine.expand_query("machine learning basics", Some(2))?;
    assert_eq!(variants.len(), 3);
    assert_eq!(variants[0], "machine learning basics");
    Ok(())
}

#[test]
fn corpus_survives_restart() -> Result<()> {
    let dir = TempDir::new()?;
    {
        let engine = open_engine(&dir)?;
        engine.add_source("notes.md#1", &texts(CORPUS), None)?;
        engine.close();
    }
    let engine = open_engine(&dir)?;
    let stats = engine.get_stats()?;
    assert_eq!(stats.num_documents, CORPUS.len());
    assert_eq!(stats.num_sources, 1);
    assert_eq!(engine.add_source("notes.md#1", &texts(&["new text"]), None)?, 0);

    let results = engine.search("borrow checker ownership", 1, 0.0, true)?;
    assert_eq!(results[0].document, CORPUS[1]);
    Ok(())
}

#[test]
fn corrupted_cache_starts_empty_and_is_rebuilt() -> Result<()> {
    let dir = TempDir::new()?;
    let config = config_in(&dir);
    std::fs::write(config.cache_path(), b"\x00\x01garbage that is not sqlite at all")?;

    let engine = open_engine(&dir)?;
    assert_eq!(engine.get_stats()?.num_documents, 0);
    engine.add_documents(&texts(&CORPUS[..2]), None)?;
    drop(engine);

    let engine = open_engine(&dir)?;
    assert_eq!(engine.get_stats()?.num_documents, 2);
    Ok(())
}

#[test]
fn cache_from_another_model_is_ignored() -> Result<()> {
    let dir = TempDir::new()?;
    {
        let engine = open_engine(&dir)?;
        engine.add_documents(&texts(CORPUS), None)?;
    }
    let engine = Engine::init(config_in(&dir), Arc::new(HashEmbedder::new(64)), None)?;
    assert_eq!(engine.get_stats()?.num_documents, 0);
    assert_eq!(engine.get_stats()?.embedding_dimension, 64);
    Ok(())
}

#[test]
fn unreachable_embedder_fails_init() {
    let dir = TempDir::new().expect("tempdir");
    let result = Engine::init(config_in(&dir), Arc::new(OfflineEmbedder), None);
    assert!(matches!(result, Err(EngineError::EmbeddingUnavailable(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn disabled_parallel_mode_falls_back_to_single_search() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = config_in(&dir);
    config.parallel.enabled = false;
    let engine = engine_with(config, Some(Arc::new(LexicalCrossEncoder)))?;
    engine.add_documents(&texts(CORPUS), None)?;

    let outcome = engine
        .parallel_search_with_report("neural networks", 3, true)
        .await?;
    assert!(outcome.branches.is_empty());
    let single = engine.search("neural networks", 3, 0.0, true)?;
    let docs: Vec<&str> = outcome.results.iter().map(|r| r.document.as_str()).collect();
    let expected: Vec<&str> = single.iter().map(|r| r.document.as_str()).collect();
    assert_eq!(docs, expected);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn agreement_counts_other_branches() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = seeded(&dir)?;
    let results = engine.parallel_search("rust memory safety", 3, true).await?;
    let top = &results[0];
    assert_eq!(top.document, CORPUS[0]);
    assert!(top.agreement >= 1);
    assert!(top.bm25_score.is_some());
    assert!(results.iter().all(|r| r.agreement <= 2));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn near_duplicate_hits_are_synthesized_into_one_result() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = open_engine(&dir)?;
    let original = "Rust guarantees memory safety.";
    let copy = "rust guarantees memory safety";
    let mut docs = vec![original, copy];
    docs.extend_from_slice(&CORPUS[1..]);
    let mut metadata = vec![Metadata::new(); docs.len()];
    metadata[0].insert("category".into(), json!("AI"));
    engine.add_documents(&texts(&docs), Some(&metadata))?;

    let dense = engine.dense_index();
    let engine = engine
        .with_retriever(Arc::new(TopDenseHit(DenseRetriever::new(dense))))
        .with_retriever(Arc::new(EmptyExpanded));
    let results = engine
        .parallel_search("rust guarantees memory safety", 3, false)
        .await?;

    // original: 0.2 agreement + 0.3 coverage + 0.1 category + 0.2 similarity
    // copy: 0.3 coverage + 0.2 similarity
    let top = &results[0];
    assert_eq!(top.document, original);
    assert_eq!(top.merged_count, 2);
    assert_eq!(top.methods, vec![Method::Semantic, Method::Keyword]);
    assert!((top.confidence.unwrap_or_default() - 0.65).abs() < 1e-4);
    assert!(top.bm25_score.is_some());
    assert!(results.iter().all(|r| r.document != copy));
    assert!(results[1..].iter().all(|r| r.merged_count == 1));
    Ok(())
}

#[test]
fn empty_corpus_and_empty_query_are_not_errors() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = open_engine(&dir)?;
    assert!(engine.search("anything", 5, 0.0, true)?.is_empty());
    engine.add_documents(&texts(CORPUS), None)?;
    assert!(engine.search("", 5, 0.0, true)?.is_empty());
    Ok(())
}
