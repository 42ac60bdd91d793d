//! Plaza Search CLI - multi-provider search command line interface.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use plaza_search::{PlazaConfig, SearchQuery, TimeRange};

/// Plaza Search - aggregate results from Exa, Serper and Perplexity
#[derive(Parser)]
#[command(name = "plaza-search")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search across the configured providers
    Search(SearchArgs),

    /// Probe every configured provider
    Providers,
}

#[derive(Parser)]
struct SearchArgs {
    /// Search query
    query: String,

    /// Providers to use (comma-separated)
    /// Available: exa, serper, perplexity
    #[arg(short, long, value_delimiter = ',')]
    providers: Option<Vec<String>>,

    /// Maximum number of results to display
    #[arg(short, long, default_value = "10")]
    limit: usize,

    /// Per-provider timeout in seconds
    #[arg(short, long, default_value = "30")]
    timeout: u64,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Restrict results to one site (e.g. docs.rs)
    #[arg(long)]
    site: Option<String>,

    /// Result language (e.g. en, de)
    #[arg(long)]
    language: Option<String>,

    /// Only results from the last day, week, month or year
    #[arg(long)]
    time_range: Option<TimeRange>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
    /// Compact single-line output
    Compact,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Search(args) => run_search(args, cli.verbose).await,
        Commands::Providers => list_providers().await,
    }
}

async fn list_providers() -> Result<()> {
    let config = PlazaConfig::from_env();
    let limiters = config.build_limiters()?;
    let search = config.build_search(&limiters)?;

    println!("Search providers:\n");
    println!("  exa        - Exa document search (EXA_API_KEY)");
    println!("  serper     - Serper web index (SERPER_API_KEY)");
    println!("  perplexity - Perplexity answers (PERPLEXITY_API_KEY)");
    println!();

    if search.provider_count() == 0 {
        println!("No provider keys found in the environment.");
        return Ok(());
    }

    println!("Status:");
    for status in search.provider_status().await {
        let state = if status.available { "available" } else { "unavailable" };
        println!("  {:<10} {}", status.name, state);
    }
    println!();
    println!("Usage: plaza-search search \"query\" -p exa,serper");
    Ok(())
}

async fn run_search(args: SearchArgs, verbose: bool) -> Result<()> {
    let mut config = PlazaConfig::from_env();
    config.max_results = args.limit;
    config.timeout_ms = args.timeout.saturating_mul(1000);
    config.audit = verbose;

    if let Some(selected) = &args.providers {
        let selected: Vec<String> = selected.iter().map(|p| p.trim().to_lowercase()).collect();
        for name in &selected {
            if !matches!(name.as_str(), "exa" | "serper" | "perplexity") {
                eprintln!("Warning: Unknown provider '{}', skipping", name);
            }
        }
        let keep = |name: &str| selected.iter().any(|s| s == name);
        if !keep("exa") {
            config.exa = None;
        }
        if !keep("serper") {
            config.serper = None;
        }
        if !keep("perplexity") {
            config.perplexity = None;
        }
    }

    if config.enabled_providers().is_empty() {
        anyhow::bail!(
            "No usable providers; set EXA_API_KEY, SERPER_API_KEY or PERPLEXITY_API_KEY"
        );
    }

    let limiters = config.build_limiters()?;
    let search = config.build_search(&limiters)?;

    let mut query = SearchQuery::new(&args.query).with_limit(args.limit as u32);
    if let Some(site) = args.site {
        query = query.with_site(site);
    }
    if let Some(language) = args.language {
        query = query.with_language(language);
    }
    if let Some(range) = args.time_range {
        query = query.with_time_range(range);
    }

    let response = search.search(query).await?;
    limiters.stop_all(true);

    match args.format {
        OutputFormat::Text => {
            println!(
                "\nSearch results for \"{}\" ({} results in {}ms):\n",
                response.query, response.total_results, response.duration_ms
            );
            if response.is_degraded() {
                println!("Failed providers: {}\n", response.failed_providers.join(", "));
            }

            for (i, result) in response.items().iter().enumerate() {
                println!("{}. {}", i + 1, result.title);
                if !result.url.is_empty() {
                    println!("   URL: {}", result.url);
                }
                if !result.snippet.is_empty() {
                    let snippet: String = result.snippet.chars().take(150).collect();
                    if snippet.len() < result.snippet.len() {
                        println!("   {}...", snippet);
                    } else {
                        println!("   {}", snippet);
                    }
                }
                println!(
                    "   Provider: {} | Score: {:.2}",
                    result.provider, result.score
                );
                println!();
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Compact => {
            for result in response.items() {
                println!("{}\t{}", result.title, result.url);
            }
        }
    }

    Ok(())
}
