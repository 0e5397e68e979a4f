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

//! Error taxonomy for the retrieval engine.
//!
//! Only hard infrastructure failures surface here. Branch failures, reranker
//! failures and cache corruption are recovered where they happen and logged.

use std::path::PathBuf;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("reranker failed: {0}")]
    Rerank(String),

    #[error("cache error at {path}: {message}")]
    Cache { path: PathBuf, message: String },

    #[error("invalid config: {0}")]
    Config(String),

    #[error("engine is closed")]
    Closed,

    #[error("corpus corrupted: {0}")]
    CorpusCorrupted(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub(crate) fn cache(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Cache {
            path: path.into(),
            message: err.to_string(),
        }
    }
}
