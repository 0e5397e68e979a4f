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

//! Rule-based query expansion.
//!
//! Each strategy proposes variants independently; the expander interleaves
//! them behind the original query. Dictionaries come from config, so the
//! built-ins are data, not code.

use std::collections::BTreeMap;
use std::collections::HashSet;

use regex::Regex;
use regex::RegexBuilder;

use crate::config::ExpansionConfig;

pub trait ExpansionStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn variants(&self, query: &str) -> Vec<String>;
}

/// Whole-phrase, case-insensitive matcher for one dictionary key.
struct Phrase {
    pattern: Regex,
    values: Vec<String>,
}

fn compile_phrases(dict: &BTreeMap<String, Vec<String>>) -> Vec<Phrase> {
    let mut phrases = Vec::new();
    for (key, values) in dict {
        let key = key.trim();
        if key.is_empty() || values.is_empty() {
            continue;
        }
        let source = format!(r"\b{}\b", regex::escape(key));
        match RegexBuilder::new(&source).case_insensitive(true).build() {
            Ok(pattern) => phrases.push(Phrase {
                pattern,
                values: values.clone(),
            }),
            Err(err) => tracing::warn!(phrase = key, error = %err, "skipping expansion phrase"),
        }
    }
    phrases
}

pub struct SynonymStrategy {
    phrases: Vec<Phrase>,
}

impl SynonymStrategy {
    pub fn new(dict: &BTreeMap<String, Vec<String>>) -> Self {
        Self {
            phrases: compile_phrases(dict),
        }
    }
}

impl ExpansionStrategy for SynonymStrategy {
    fn name(&self) -> &str {
        "synonym"
    }

    fn variants(&self, query: &str) -> Vec<String> {
        let mut out = Vec::new();
        for phrase in &self.phrases {
            if !phrase.pattern.is_match(query) {
                continue;
            }
            for synonym in &phrase.values {
                let replaced = phrase
                    .pattern
                    .replace_all(query, regex::NoExpand(synonym))
                    .into_owned();
                out.push(replaced);
            }
        }
        out
    }
}

pub struct ConceptStrategy {
    phrases: Vec<Phrase>,
}

impl ConceptStrategy {
    pub fn new(dict: &BTreeMap<String, Vec<String>>) -> Self {
        Self {
            phrases: compile_phrases(dict),
        }
    }
}

impl ExpansionStrategy for ConceptStrategy {
    fn name(&self) -> &str {
        "concept"
    }

    fn variants(&self, query: &str) -> Vec<String> {
        let mut out = Vec::new();
        for phrase in &self.phrases {
            if phrase.pattern.is_match(query) {
                for related in &phrase.values {
                    out.push(format!("{query} {related}"));
                }
            }
        }
        out
    }
}

pub struct QuestionStrategy {
    prefixes: Vec<String>,
}

impl QuestionStrategy {
    pub fn new(prefixes: &[String]) -> Self {
        Self {
            prefixes: prefixes
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }
}

impl ExpansionStrategy for QuestionStrategy {
    fn name(&self) -> &str {
        "question"
    }

    fn variants(&self, query: &str) -> Vec<String> {
        self.prefixes
            .iter()
            .map(|prefix| format!("{prefix} {query}"))
            .collect()
    }
}

pub struct QueryExpander {
    strategies: Vec<Box<dyn ExpansionStrategy>>,
    default_expansions: usize,
}

impl QueryExpander {
    pub fn empty(default_expansions: usize) -> Self {
        Self {
            strategies: Vec::new(),
            default_expansions,
        }
    }

    pub fn from_config(config: &ExpansionConfig) -> Self {
        Self::empty(config.num_expansions)
            .with_strategy(SynonymStrategy::new(&config.synonyms))
            .with_strategy(ConceptStrategy::new(&config.concepts))
            .with_strategy(QuestionStrategy::new(&config.question_prefixes))
    }

    pub fn with_strategy(mut self, strategy: impl ExpansionStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn default_expansions(&self) -> usize {
        self.default_expansions
    }

    /// Original query first, then one variant per strategy in round-robin
    /// order, case-insensitively deduplicated, at most `num_expansions + 1`
    /// entries in total.
    pub fn expand(&self, query: &str, num_expansions: usize) -> Vec<String> {
        let mut out = vec![query.to_string()];
        if query.trim().is_empty() {
            return out;
        }
        let cap = num_expansions.saturating_add(1);
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(query.to_lowercase());

        let per_strategy: Vec<Vec<String>> =
            self.strategies.iter().map(|s| s.variants(query)).collect();
        let rounds = per_strategy.iter().map(Vec::len).max().unwrap_or(0);
        'outer: for round in 0..rounds {
            for variants in &per_strategy {
                if out.len() >= cap {
                    break 'outer;
                }
                let Some(variant) = variants.get(round) else {
                    continue;
                };
                if seen.insert(variant.to_lowercase()) {
                    out.push(variant.clone());
                }
            }
        }
        out.truncate(cap);
        out
    }
}
