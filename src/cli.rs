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

use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap_complete::Shell;

#[derive(Parser, Debug)]
#[command(name = "sift", version, about = "Hybrid parallel retrieval and reranking")]
pub struct Cli {
    /// Config file (defaults to the global sift.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging on stderr (overridden by SIFT_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the embeddings cache directory
    Init {
        /// Project root
        path: Option<PathBuf>,
    },

    /// Add files or directories to the corpus
    Add(AddArgs),

    /// Search the corpus
    Search(SearchArgs),

    /// Show the query expansions for a query
    Expand(ExpandArgs),

    /// Show engine stats
    Stats {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Drop every document from the corpus
    Reset {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        shell: Shell,
    },
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Files or directories to add
    pub paths: Vec<PathBuf>,

    /// Glob to include
    #[arg(long)]
    pub glob: Option<String>,

    /// Ignore globs
    #[arg(long)]
    pub ignore: Vec<String>,

    /// Category stored in each chunk's metadata
    #[arg(long)]
    pub category: Option<String>,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Query text
    pub query: String,

    /// Top-k results
    #[arg(long, default_value_t = 5)]
    pub k: usize,

    /// Minimum cosine similarity (dense-only search)
    #[arg(long, default_value_t = 0.0)]
    pub min_similarity: f32,

    /// Skip cross-encoder reranking
    #[arg(long)]
    pub no_rerank: bool,

    /// Dense-only search instead of the parallel hybrid pipeline
    #[arg(long)]
    pub single: bool,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ExpandArgs {
    /// Query text
    pub query: String,

    /// Number of expansions (defaults to expansion.num_expansions)
    #[arg(long)]
    pub n: Option<usize>,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}
