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

//! Hybrid parallel retrieval: dense and BM25 search plus rule-based query
//! expansion, fanned out concurrently, merged, reranked by a cross-encoder
//! and scored for confidence.

pub mod cache;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod dense;
pub mod embed;
pub mod engine;
pub mod error;
pub mod expand;
pub mod ingest;
pub mod model;
pub mod output;
pub mod rerank;
pub mod sparse;
pub mod tokenize;
pub mod verify;

pub use crate::config::Config;
pub use crate::engine::Engine;
pub use crate::engine::EngineStats;
pub use crate::engine::SearchOutcome;
pub use crate::error::EngineError;
pub use crate::model::Metadata;
pub use crate::model::Method;
pub use crate::model::SearchResult;
