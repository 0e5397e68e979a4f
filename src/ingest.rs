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

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use globset::Glob;
use globset::GlobSet;
use globset::GlobSetBuilder;
use serde::Serialize;
use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;
use walkdir::WalkDir;

use crate::engine::Engine;
use crate::model::Metadata;

const MAX_CHUNK_WORDS: usize = 200;

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub glob: Option<String>,
    pub ignore: Vec<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub files_seen: usize,
    pub files_skipped: usize,
    pub documents_added: usize,
    pub warnings: Vec<String>,
}

/// Walks `paths`, splits each text file into paragraph chunks and adds them
/// to `engine` under a source id of `path#sha256(contents)`. A file whose
/// contents were already ingested is skipped before embedding.
pub fn ingest_paths(engine: &Engine, paths: Vec<PathBuf>, opts: &IngestOptions) -> Result<IngestReport> {
    let include_set = build_globset(opts.glob.as_deref())?;
    let ignore_set = build_ignore_set(&opts.ignore)?;
    let mut report = IngestReport::default();

    for path in resolve_paths(paths) {
        if path.is_file() {
            ingest_file(engine, &path, &include_set, &ignore_set, opts, &mut report)?;
        } else if path.is_dir() {
            for entry in WalkDir::new(&path)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| !is_hidden(e.path(), &path))
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file() {
                    ingest_file(engine, entry.path(), &include_set, &ignore_set, opts, &mut report)?;
                }
            }
        } else {
            report
                .warnings
                .push(format!("path not found: {}", path.display()));
        }
    }
    Ok(report)
}

fn resolve_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    if paths.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        paths
    }
}

fn is_hidden(path: &Path, root: &Path) -> bool {
    path != root
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.') && n != "." && n != "..")
}

fn build_globset(pattern: Option<&str>) -> Result<Option<GlobSet>> {
    if let Some(pat) = pattern {
        let mut builder = GlobSetBuilder::new();
        builder.add(Glob::new(pat).with_context(|| format!("invalid glob {pat}"))?);
        Ok(Some(builder.build()?))
    } else {
        Ok(None)
    }
}

fn build_ignore_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        builder.add(Glob::new(pat).with_context(|| format!("invalid ignore glob {pat}"))?);
    }
    Ok(builder.build()?)
}

fn ingest_file(
    engine: &Engine,
    path: &Path,
    include_set: &Option<GlobSet>,
    ignore_set: &GlobSet,
    opts: &IngestOptions,
    report: &mut IngestReport,
) -> Result<()> {
    if !ignore_set.is_empty() && ignore_set.is_match(path) {
        return Ok(());
    }
    if let Some(set) = include_set
        && !set.is_match(path)
    {
        return Ok(());
    }

    let path_str = path.to_string_lossy();
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(_) => {
            report
                .warnings
                .push(format!("skip non-text file: {path_str}"));
            return Ok(());
        }
    };
    report.files_seen += 1;

    let source_id = format!("{path_str}#{}", sha256_hex(text.as_bytes()));
    if engine.has_source(&source_id) {
        tracing::debug!(path = %path_str, "unchanged since last ingest");
        report.files_skipped += 1;
        return Ok(());
    }

    let (front_matter, body) = split_front_matter(&text);
    let chunks = chunk_text(body);
    if chunks.is_empty() {
        return Ok(());
    }

    let mut base = Metadata::new();
    for (key, value) in front_matter {
        base.insert(key, Value::String(value));
    }
    base.insert("source".into(), Value::String(path_str.to_string()));
    if let Some(category) = &opts.category {
        base.insert("category".into(), Value::String(category.clone()));
    }
    let metadata: Vec<Metadata> = (0..chunks.len())
        .map(|i| {
            let mut m = base.clone();
            m.insert("chunk".into(), Value::from(i));
            m
        })
        .collect();

    let added = engine
        .add_source(&source_id, &chunks, Some(&metadata))
        .with_context(|| format!("ingest {path_str}"))?;
    report.documents_added += added;
    Ok(())
}

fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

/// Leading `---` block of `key: value` lines, returned as normalized keys,
/// and the remaining body.
fn split_front_matter(text: &str) -> (BTreeMap<String, String>, &str) {
    let mut map = BTreeMap::new();
    let Some(rest) = text.strip_prefix("---\n").or_else(|| text.strip_prefix("---\r\n")) else {
        return (map, text);
    };
    let mut consumed = text.len() - rest.len();
    for line in rest.split_inclusive('\n') {
        consumed += line.len();
        let trimmed = line.trim();
        if trimmed == "---" || trimmed == "..." {
            return (map, &text[consumed..]);
        }
        if let Some((k, v)) = trimmed.split_once(':')
            && let Some(key) = normalize_meta_key(k)
        {
            map.insert(key, v.trim().to_string());
        }
    }
    // Unterminated block: treat the whole file as body.
    (BTreeMap::new(), text)
}

fn normalize_meta_key(raw: &str) -> Option<String> {
    let mut out = String::new();
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if (ch == ' ' || ch == '_' || ch == '-') && !out.ends_with('_') {
            out.push('_');
        }
    }
    let cleaned = out.trim_matches('_').to_string();
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

/// Blank-line separated paragraphs, with fenced code kept whole and long
/// paragraphs split into windows of at most `MAX_CHUNK_WORDS` words.
fn chunk_text(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for block in paragraphs(text) {
        let words: Vec<&str> = block.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }
        if words.len() <= MAX_CHUNK_WORDS {
            out.push(block.trim().to_string());
            continue;
        }
        for window in words.chunks(MAX_CHUNK_WORDS) {
            out.push(window.join(" "));
        }
    }
    out
}

fn paragraphs(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_code = false;
    for line in text.lines() {
        let trimmed = line.trim_end();
        if trimmed.trim_start().starts_with("```") {
            current.push(trimmed);
            in_code = !in_code;
            continue;
        }
        if !in_code && trimmed.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
            continue;
        }
        current.push(trimmed);
    }
    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_split_on_blank_lines_but_keep_code_fences() {
        let text = "# Title\nintro line\n\nsecond para\n\n```rs\nfn a() {}\n\nfn b() {}\n```\n\ntail";
        let blocks = paragraphs(text);
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0], "# Title\nintro line");
        assert!(blocks[2].contains("fn a") && blocks[2].contains("fn b"));
        assert_eq!(blocks[3], "tail");
    }

    #[test]
    fn long_paragraphs_are_windowed() {
        let text = vec!["word"; MAX_CHUNK_WORDS * 2 + 5].join(" ");
        let chunks = chunk_text(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].split_whitespace().count(), 5);
    }

    #[test]
    fn front_matter_becomes_metadata() {
        let text = "---\nCategory: AI\nTop Level Topic: retrieval\n---\nBody text here.\n";
        let (meta, body) = split_front_matter(text);
        assert_eq!(meta.get("category").map(String::as_str), Some("AI"));
        assert_eq!(meta.get("top_level_topic").map(String::as_str), Some("retrieval"));
        assert_eq!(body, "Body text here.\n");
    }

    #[test]
    fn unterminated_front_matter_is_body() {
        let text = "---\nnot: closed\nstill body";
        let (meta, body) = split_front_matter(text);
        assert!(meta.is_empty());
        assert_eq!(body, text);
    }
}
