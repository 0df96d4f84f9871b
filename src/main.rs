mod error;
mod fetch;
mod model;
mod parser;
mod resolver;
mod search;
mod settings;
mod store;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::ResolveError;
use crate::fetch::{HttpFetcher, PageFetcher, SpiderFetcher};
use crate::model::Candidate;
use crate::resolver::{FixedChoice, Lookup, PendingChoice, Resolution, Resolver, Source};
use crate::settings::{Backend, Settings};
use crate::store::RecordStore;

#[derive(Parser)]
#[command(name = "movie_finder", about = "Look up movie details by name, with a local JSON cache")]
struct Cli {
    /// Cache file (overrides MOVIE_FINDER_CACHE_PATH)
    #[arg(long, global = true)]
    cache: Option<PathBuf>,
    /// Page fetch backend (overrides MOVIE_FINDER_BACKEND)
    #[arg(long, global = true, value_enum)]
    backend: Option<Backend>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a movie name: cache first, then search and pick
    Find {
        /// Movie name, optionally with a year: "Heat (1995)"
        #[arg(required = true)]
        query: Vec<String>,
        /// Pick the Nth search result (1-based) instead of prompting
        #[arg(short, long)]
        pick: Option<usize>,
    },
    /// List remote search candidates without fetching details
    Search {
        #[arg(required = true)]
        query: Vec<String>,
    },
    /// Show a cached movie without touching the network
    Show {
        #[arg(required = true)]
        query: Vec<String>,
    },
    /// List cached movies
    List {
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = Settings::load().context("Failed to load settings")?;
    if let Some(cache) = cli.cache {
        settings.cache_path = cache;
    }
    if let Some(backend) = cli.backend {
        settings.backend = backend;
    }

    let store = Arc::new(RecordStore::open(&settings.cache_path));

    let result = match cli.command {
        Commands::Find { query, pick } => {
            let resolver = Resolver::new(store, build_fetcher(&settings)?, &settings.base_url);
            find(&resolver, &query.join(" "), pick).await
        }
        Commands::Search { query } => {
            let resolver = Resolver::new(store, build_fetcher(&settings)?, &settings.base_url);
            let spinner = spinner("Searching...");
            let candidates = resolver.candidates(&query.join(" ")).await;
            spinner.finish_and_clear();
            let candidates = candidates?;
            if candidates.is_empty() {
                println!("No matches.");
            }
            print_candidates(&candidates);
            Ok(())
        }
        Commands::Show { query } => {
            let query = query.join(" ");
            match resolver::cache_lookup(&store, &query) {
                Some(record) => println!("{}", record),
                None => println!("{:?} is not in the cache. Try 'find'.", query.trim()),
            }
            Ok(())
        }
        Commands::List { limit } => {
            if store.is_empty() {
                println!("The cache at {:?} is empty.", store.path());
                return Ok(());
            }
            let records = store.all();

            println!(
                "{:>3} | {:<36} | {:<4} | {:>6} | {:<30}",
                "#", "Title", "Year", "Rating", "Genres"
            );
            println!("{}", "-".repeat(92));
            for (i, r) in records.iter().take(limit).enumerate() {
                println!(
                    "{:>3} | {:<36} | {:<4} | {:>6} | {:<30}",
                    i + 1,
                    truncate(&r.title, 36),
                    r.year,
                    r.rating,
                    truncate(&r.genres.join(", "), 30)
                );
            }
            println!("\n{} of {} cached movies", records.len().min(limit), store.len());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn build_fetcher(settings: &Settings) -> anyhow::Result<Arc<dyn PageFetcher>> {
    match settings.backend {
        Backend::Http => Ok(Arc::new(HttpFetcher::new(settings)?)),
        Backend::Spider => {
            let key = settings
                .spider_key()
                .context("SPIDER_API_KEY must be set for the spider backend")?;
            Ok(Arc::new(SpiderFetcher::new(key, settings.max_retries)?))
        }
    }
}

async fn find(resolver: &Resolver, query: &str, pick: Option<usize>) -> anyhow::Result<()> {
    let spinner = spinner("Looking up...");
    let outcome = match pick {
        // --pick is 1-based; 0 can never match
        Some(n) => {
            resolver
                .resolve(query, &FixedChoice(n.checked_sub(1).unwrap_or(usize::MAX)))
                .await
        }
        None => match resolver.begin(query).await {
            Ok(Lookup::Found(resolution)) => Ok(resolution),
            Ok(Lookup::Choose(pending)) => {
                spinner.finish_and_clear();
                let choice = prompt_choice(&pending)?;
                let fetching = self::spinner("Fetching details...");
                let resolution = resolver.complete(pending, choice).await;
                fetching.finish_and_clear();
                resolution
            }
            Err(e) => Err(e),
        },
    };
    spinner.finish_and_clear();

    match outcome {
        Ok(resolution) => {
            report(&resolution);
            Ok(())
        }
        Err(ResolveError::Cancelled) => {
            println!("Cancelled.");
            Ok(())
        }
        Err(e @ ResolveError::NotFound { .. }) => {
            println!("{}", e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn report(resolution: &Resolution) {
    let origin = match resolution.source {
        Source::Cache => "from cache",
        Source::Remote => "fetched",
    };
    println!("[{}]\n{}", origin, resolution.record);
    if let Some(warning) = &resolution.persist_warning {
        eprintln!("\nWarning: {}", warning);
    }
}

fn print_candidates(candidates: &[Candidate]) {
    for (i, c) in candidates.iter().enumerate() {
        println!("{:>3}. {}", i + 1, c);
    }
}

/// Ask for a 1-based selection on stdin. Blank, `0` or anything invalid cancels.
fn prompt_choice(pending: &PendingChoice) -> anyhow::Result<Option<usize>> {
    let candidates = pending.candidates();
    println!("Matches for {:?}:", pending.query());
    print_candidates(candidates);
    print!("Pick a number (0 or blank to cancel): ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(parse_choice(&line, candidates.len()))
}

fn parse_choice(input: &str, count: usize) -> Option<usize> {
    let n: usize = input.trim().parse().ok()?;
    (1..=count).contains(&n).then(|| n - 1)
}

fn spinner(msg: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

// ── Tests ──
