//! wordtrace CLI: keyword resolution and co-occurrence graph engine with MCP server.
//!
//! Usage:
//!   wordtrace ingest <articles.json> [--db path] [--config file]
//!   wordtrace graph [--from date] [--to date] [--category c]... [--keyword-type t]...
//!   wordtrace keywords [--type t] [--name text]
//!   wordtrace expire [--before ts]
//!   wordtrace reconcile
//!   wordtrace mcp

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use wordtrace::{
    parse_filter, ArticleSubmission, CancellationToken, Engine, EngineConfig, KeywordStore,
    KeywordSummary, KeywordType, PipelineError,
};

#[derive(Parser)]
#[command(
    name = "wordtrace",
    version,
    about = "Keyword entity resolution and co-occurrence graph engine"
)]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Path to SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve and store articles from a JSON file (an array of submissions)
    Ingest {
        /// Path to the JSON file
        path: PathBuf,
    },
    /// Print the co-occurrence graph as JSON
    Graph {
        /// Earliest publication time, inclusive (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,
        /// Latest publication time, exclusive (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
        /// Article category to include (repeatable)
        #[arg(long = "category")]
        categories: Vec<String>,
        /// Keyword type to include (repeatable)
        #[arg(long = "keyword-type")]
        keyword_types: Vec<String>,
        /// Minimum edge weight
        #[arg(long, default_value_t = 1)]
        min_weight: usize,
    },
    /// List canonical keywords
    Keywords {
        /// Restrict to entity or concept
        #[arg(long = "type")]
        keyword_type: Option<String>,
        /// Case-insensitive substring of the name or an alias
        #[arg(long)]
        name: Option<String>,
    },
    /// Remove articles past their retention deadline
    Expire {
        /// Cutoff timestamp (RFC 3339, default now)
        #[arg(long)]
        before: Option<String>,
    },
    /// Merge canonical keywords within the similarity threshold
    Reconcile,
    /// Start the MCP (Model Context Protocol) server on stdio
    Mcp,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<EngineConfig, String> {
    let mut config = EngineConfig::load(cli.config.as_deref()).map_err(|e| e.to_string())?;
    if let Some(db) = &cli.db {
        config.db_path = Some(db.clone());
    }
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn read_submissions(path: &Path) -> Result<Vec<ArticleSubmission>, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("invalid submissions in {}: {}", path.display(), e))
}

async fn cmd_ingest(engine: &Engine, path: &Path) -> i32 {
    let submissions = match read_submissions(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight articles");
            on_signal.cancel();
        }
    });

    match engine.orchestrator().run_batch(submissions, cancel).await {
        Ok(report) => {
            let code = if report.failed.is_empty() { 0 } else { 2 };
            if print_json(&report) != 0 {
                return 1;
            }
            code
        }
        Err(PipelineError::Halted { reason, report }) => {
            error!(%reason, "batch halted");
            print_json(&report);
            1
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_graph(
    engine: &Engine,
    from: Option<&str>,
    to: Option<&str>,
    categories: &[String],
    keyword_types: &[String],
    min_weight: usize,
) -> i32 {
    let filter = match parse_filter(from, to, categories, keyword_types) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match engine.projection().co_occurrence_graph(&filter, min_weight) {
        Ok(graph) => print_json(&graph),
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_keywords(engine: &Engine, keyword_type: Option<&str>, name: Option<&str>) -> i32 {
    let keyword_type = match keyword_type.map(str::parse::<KeywordType>).transpose() {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match engine.store().list_keywords(keyword_type) {
        Ok(keywords) => {
            let summaries: Vec<KeywordSummary> = keywords
                .iter()
                .map(KeywordSummary::from)
                .filter(|s| name.map_or(true, |n| s.matches_name(n)))
                .collect();
            print_json(&summaries)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_expire(engine: &Engine, before: Option<&str>) -> i32 {
    let cutoff = match before {
        Some(text) => match DateTime::parse_from_rfc3339(text) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => {
                eprintln!("Error: invalid timestamp '{}': {}", text, e);
                return 1;
            }
        },
        None => Utc::now(),
    };
    match engine.sweeper().sweep_once(cutoff) {
        Ok(report) => print_json(&report),
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_reconcile(engine: &Engine) -> i32 {
    match engine.reconciler().run_once().await {
        Ok(report) => print_json(&report),
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Commands::Mcp = cli.command {
        std::process::exit(wordtrace::mcp::run_mcp_server(config));
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = rt.block_on(async {
        let engine = match Engine::open(config) {
            Ok(engine) => engine,
            Err(e) => {
                eprintln!("Error: failed to open database: {}", e);
                return 1;
            }
        };
        info!(version = wordtrace::VERSION, "wordtrace ready");

        match &cli.command {
            Commands::Ingest { path } => cmd_ingest(&engine, path).await,
            Commands::Graph {
                from,
                to,
                categories,
                keyword_types,
                min_weight,
            } => cmd_graph(
                &engine,
                from.as_deref(),
                to.as_deref(),
                categories,
                keyword_types,
                *min_weight,
            ),
            Commands::Keywords { keyword_type, name } => {
                cmd_keywords(&engine, keyword_type.as_deref(), name.as_deref())
            }
            Commands::Expire { before } => cmd_expire(&engine, before.as_deref()),
            Commands::Reconcile => cmd_reconcile(&engine).await,
            Commands::Mcp => 0,
        }
    });

    std::process::exit(code);
}
