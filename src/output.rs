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

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

use crate::coordinator::BranchReport;
use crate::engine::EngineStats;
use crate::ingest::IngestReport;
use crate::model::SearchResult;

pub const SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone, Serialize)]
pub struct QueryOut {
    pub text: String,
    pub top_k: usize,
    pub mode: String,
    pub rerank: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_similarity: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorOut {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct JsonResponse {
    pub ok: bool,
    pub schema_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<QueryOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<SearchResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branches: Option<Vec<BranchReport>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expansions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingest: Option<IngestReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<EngineStats>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorOut>,
}

impl JsonResponse {
    pub fn ok() -> Self {
        Self {
            ok: true,
            schema_version: SCHEMA_VERSION.to_string(),
            ..Default::default()
        }
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self {
            ok: false,
            schema_version: SCHEMA_VERSION.to_string(),
            error: Some(ErrorOut {
                code: code.to_string(),
                message: message.to_string(),
                hint: hint_for(message),
            }),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, query: QueryOut) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_results(mut self, results: Vec<SearchResult>) -> Self {
        self.results = Some(results);
        self
    }

    pub fn with_branches(mut self, branches: Vec<BranchReport>) -> Self {
        if branches.is_empty() {
            return self;
        }
        self.branches = Some(branches);
        self
    }

    pub fn with_expansions(mut self, expansions: Vec<String>) -> Self {
        self.expansions = Some(expansions);
        self
    }

    pub fn with_ingest(mut self, report: IngestReport) -> Self {
        self.warnings = report.warnings.clone();
        self.ingest = Some(report);
        self
    }

    pub fn with_stats(mut self, stats: EngineStats) -> Self {
        self.stats = Some(stats);
        self
    }
}

fn hint_for(message: &str) -> Option<String> {
    message
        .contains("cache not found")
        .then(|| "run `sift init` in the project root".to_string())
}

pub fn print_json(resp: &JsonResponse) -> Result<()> {
    let text = serde_json::to_string_pretty(resp)?;
    println!("{text}");
    Ok(())
}

pub fn print_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("No results");
        return;
    }
    for (rank, result) in results.iter().enumerate() {
        let methods: Vec<&str> = result.methods.iter().map(|m| m.as_label()).collect();
        let mut line = format!(
            "{:>2}. sim={:.3} conf={:.2}",
            rank + 1,
            result.similarity,
            result.confidence.unwrap_or(0.0)
        );
        if let Some(score) = result.rerank_score {
            line.push_str(&format!(" rerank={score:.2}"));
        }
        if let Some(score) = result.bm25_score {
            line.push_str(&format!(" bm25={score:.2}"));
        }
        line.push_str(&format!(" [{}]", methods.join(",")));
        if result.merged_count > 1 {
            line.push_str(&format!(" merged={}", result.merged_count));
        }
        if let Some(Value::String(source)) = result.metadata.get("source") {
            line.push_str(&format!(" {source}"));
        }
        println!("{line}");
        println!("    {}", snippet(&result.document, 160));
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{cut}…")
}
