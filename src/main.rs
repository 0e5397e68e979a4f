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

use std::path::Path;
use std::path::PathBuf;

use anyhow::Context as _;
use anyhow::Result;
use clap::CommandFactory;
use clap::Parser;
use sift::Engine;
use sift::cli::Cli;
use sift::cli::Commands;
use sift::cli::SearchArgs;
use sift::config::Config;
use sift::config::ConfigCtx;
use sift::config::load_global_config;
use sift::config::read_config;
use sift::expand::QueryExpander;
use sift::ingest::IngestOptions;
use sift::ingest::ingest_paths;
use sift::output::JsonResponse;
use sift::output::QueryOut;
use sift::output::print_json;
use sift::output::print_results;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "sift=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("SIFT_LOG").unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Init { path } => cmd_init(config_path, path),
        Commands::Add(args) => {
            let json = args.json;
            let opts = IngestOptions {
                glob: args.glob,
                ignore: args.ignore,
                category: args.category,
            };
            handle_result(cmd_add(config_path, args.paths, opts, json), json)
        }
        Commands::Search(args) => {
            let json = args.json;
            handle_result(cmd_search(config_path, args).await, json)
        }
        Commands::Expand(args) => handle_result(cmd_expand(config_path, &args.query, args.n, args.json), args.json),
        Commands::Stats { json } => handle_result(cmd_stats(config_path, json), json),
        Commands::Reset { json } => handle_result(cmd_reset(config_path, json), json),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "sift", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn handle_result(result: Result<()>, json: bool) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(err) => {
            if json {
                let resp = JsonResponse::error("error", &format!("{err:#}"));
                print_json(&resp)?;
                Ok(())
            } else {
                Err(err)
            }
        }
    }
}

fn load_config(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => read_config(path),
        None => load_global_config(),
    }
}

fn open_engine(explicit: Option<&Path>) -> Result<Engine> {
    let ctx = ConfigCtx::load_from_cwd(explicit)?;
    let config = ctx.resolved();
    Engine::from_config(config).context("open engine")
}

fn cmd_init(explicit: Option<&Path>, path: Option<PathBuf>) -> Result<()> {
    let root = path.unwrap_or_else(|| PathBuf::from("."));
    let config = load_config(explicit)?;
    let cache_dir = if config.cache_dir.is_absolute() {
        config.cache_dir.clone()
    } else {
        root.join(&config.cache_dir)
    };
    if cache_dir.exists() {
        anyhow::bail!("cache already exists at {}", cache_dir.display());
    }
    std::fs::create_dir_all(&cache_dir).with_context(|| format!("create dir {}", cache_dir.display()))?;
    println!("Initialized sift cache at {}", cache_dir.display());
    Ok(())
}

fn cmd_add(explicit: Option<&Path>, paths: Vec<PathBuf>, opts: IngestOptions, json: bool) -> Result<()> {
    let engine = open_engine(explicit)?;
    let report = ingest_paths(&engine, paths, &opts)?;
    engine.close();

    if json {
        print_json(&JsonResponse::ok().with_ingest(report))?;
    } else {
        println!(
            "Added {} documents from {} files ({} unchanged)",
            report.documents_added, report.files_seen, report.files_skipped
        );
        for warn in report.warnings {
            eprintln!("warning: {warn}");
        }
    }
    Ok(())
}

async fn cmd_search(explicit: Option<&Path>, args: SearchArgs) -> Result<()> {
    let engine = open_engine(explicit)?;
    let rerank = !args.no_rerank;
    let single = args.single || !engine.config().parallel.enabled;

    let (results, branches) = if single {
        let results = engine.search(&args.query, args.k, args.min_similarity, rerank)?;
        (results, Vec::new())
    } else {
        let outcome = engine
            .parallel_search_with_report(&args.query, args.k, rerank)
            .await?;
        (outcome.results, outcome.branches)
    };
    engine.close();

    if args.json {
        let query = QueryOut {
            text: args.query.clone(),
            top_k: args.k,
            mode: if single { "single" } else { "parallel" }.to_string(),
            rerank,
            min_similarity: single.then_some(args.min_similarity),
        };
        let resp = JsonResponse::ok()
            .with_query(query)
            .with_results(results)
            .with_branches(branches);
        print_json(&resp)?;
    } else {
        for branch in branches.iter().filter(|b| b.error.is_some()) {
            eprintln!(
                "warning: {} branch failed: {}",
                branch.method.as_label(),
                branch.error.as_deref().unwrap_or_default()
            );
        }
        print_results(&results);
    }
    Ok(())
}

fn cmd_expand(explicit: Option<&Path>, query: &str, n: Option<usize>, json: bool) -> Result<()> {
    let config = load_config(explicit)?;
    let expander = QueryExpander::from_config(&config.expansion);
    let expansions = expander.expand(query, n.unwrap_or(expander.default_expansions()));
    if json {
        print_json(&JsonResponse::ok().with_expansions(expansions))?;
    } else {
        for variant in expansions {
            println!("{variant}");
        }
    }
    Ok(())
}

fn cmd_stats(explicit: Option<&Path>, json: bool) -> Result<()> {
    let engine = open_engine(explicit)?;
    let stats = engine.get_stats()?;
    engine.close();

    if json {
        print_json(&JsonResponse::ok().with_stats(stats))?;
    } else {
        println!("Model: {} (dim {})", stats.model_name, stats.embedding_dimension);
        println!("Documents: {}", stats.num_documents);
        println!("Sources: {}", stats.num_sources);
        println!(
            "Reranker: {} ({}{})",
            stats.reranker_model,
            if stats.reranker_enabled { "enabled" } else { "disabled" },
            if stats.reranker_available { "" } else { ", unavailable" }
        );
        println!("Parallel: {}", if stats.parallel_enabled { "on" } else { "off" });
        println!("Cache: {}", stats.cache_path.display());
    }
    Ok(())
}

fn cmd_reset(explicit: Option<&Path>, json: bool) -> Result<()> {
    let engine = open_engine(explicit)?;
    engine.reset()?;
    let stats = engine.get_stats()?;
    engine.close();
    if json {
        print_json(&JsonResponse::ok().with_stats(stats))?;
    } else {
        println!("Corpus cleared");
    }
    Ok(())
}
