//! `courier` — ad-hoc provider query CLI.
//!
//! Exit codes: 0 on success, 1 on any error (unknown provider, missing API
//! key, provider failure).

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use courier_search::providers::WeatherUnits;
use courier_search::registry::build_weather_provider;
use courier_search::{ProviderResult, SearchProvider, build_provider, provider_names};

const SNIPPET_PREVIEW_CHARS: usize = 200;

#[derive(Parser)]
#[command(name = "courier", about = "Modular search provider CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available search providers.
    List,
    /// Execute a search with a specific provider.
    Search {
        /// Provider name (e.g. duckduckgo, weather).
        provider: String,
        /// Search query (a location for the weather provider).
        query: String,
        /// API key for providers that require one (weather).
        #[arg(long)]
        api_key: Option<String>,
        /// Request the forecast instead of current conditions (weather only).
        #[arg(long, short)]
        forecast: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::List => {
            for name in provider_names() {
                println!("{name}");
            }
            println!("weather");
            ExitCode::SUCCESS
        }
        Commands::Search {
            provider,
            query,
            api_key,
            forecast,
        } => run_search(&provider, &query, api_key, forecast).await,
    }
}

async fn run_search(
    provider_name: &str,
    query: &str,
    api_key: Option<String>,
    forecast: bool,
) -> ExitCode {
    let results = if provider_name == "weather" {
        let Some(key) = api_key.or_else(|| std::env::var("OPENWEATHERMAP_API_KEY").ok()) else {
            eprintln!(
                "error: weather provider requires --api-key or OPENWEATHERMAP_API_KEY"
            );
            return ExitCode::FAILURE;
        };
        let provider = build_weather_provider(key, WeatherUnits::Metric);
        if forecast {
            provider.forecast(query).await
        } else {
            provider.current(query).await
        }
    } else {
        let Some(provider) = build_provider(provider_name) else {
            eprintln!(
                "error: provider '{provider_name}' not found; available: {}, weather",
                provider_names().join(", ")
            );
            return ExitCode::FAILURE;
        };
        provider.search(query).await
    };

    let results = match results {
        Ok(results) => results,
        Err(err) => {
            eprintln!("error: search failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    if results.is_empty() {
        println!("No results found.");
        return ExitCode::SUCCESS;
    }

    println!("Results for '{query}' ({}):", results.len());
    for (index, result) in results.iter().enumerate() {
        print_result(index + 1, result);
    }
    ExitCode::SUCCESS
}

fn print_result(index: usize, result: &ProviderResult) {
    println!("{index}. {}", result.title);
    if !result.snippet.is_empty() {
        let preview: String = result.snippet.chars().take(SNIPPET_PREVIEW_CHARS).collect();
        if preview.len() < result.snippet.len() {
            println!("   {preview}...");
        } else {
            println!("   {preview}");
        }
    }
    println!("   {}", result.url);
}
