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
use std::sync::LazyLock;

use regex::Regex;

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w+\b").expect("word regex"));

/// Lowercases and splits on word boundaries. Shared by BM25, the built-in
/// embedder, the cross-encoder and confidence scoring so every component
/// agrees on what a term is.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    WORD.find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

pub fn term_set(text: &str) -> BTreeSet<String> {
    tokenize(text).into_iter().collect()
}

/// Token-set Jaccard similarity; 0 when both sides are empty.
pub fn jaccard(a: &str, b: &str) -> f32 {
    let left = term_set(a);
    let right = term_set(b);
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    let inter = left.intersection(&right).count();
    inter as f32 / union as f32
}
