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

//! Shared domain types used across retrieval, verification and output.

use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

pub type Metadata = Map<String, Value>;

/// Which retrieval branch surfaced a result. Declaration order is the
/// dispatch order and therefore the merge tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Semantic,
    Keyword,
    Expanded,
}

impl Method {
    pub fn as_label(self) -> &'static str {
        match self {
            Method::Semantic => "semantic",
            Method::Keyword => "keyword",
            Method::Expanded => "expanded",
        }
    }
}

/// A raw branch hit before merge.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub doc_index: usize,
    pub document: String,
    pub metadata: Metadata,
    pub similarity: f32,
    pub bm25_score: Option<f32>,
    pub method: Method,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub doc_index: usize,
    pub document: String,
    pub metadata: Metadata,
    pub similarity: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub methods: Vec<Method>,
    /// Other methods that also surfaced this exact text, counted over the
    /// full branch pool before dedup.
    pub agreement: usize,
    pub merged_count: usize,
}

impl SearchResult {
    pub fn from_candidate(candidate: Candidate) -> Self {
        Self {
            doc_index: candidate.doc_index,
            document: candidate.document,
            metadata: candidate.metadata,
            similarity: candidate.similarity,
            bm25_score: candidate.bm25_score,
            rerank_score: None,
            confidence: None,
            methods: vec![candidate.method],
            agreement: 0,
            merged_count: 1,
        }
    }

    pub fn category(&self) -> Option<&str> {
        self.metadata.get("category").and_then(Value::as_str)
    }

    /// Ranking key: rerank score when present, else similarity, plus half the
    /// confidence.
    pub fn ranking_key(&self) -> f32 {
        let primary = self.rerank_score.unwrap_or(self.similarity);
        primary + self.confidence.unwrap_or(0.0) * 0.5
    }
}
