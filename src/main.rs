use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use news_harvester::api::{self, AppState};
use news_harvester::config::{AppConfig, CONFIG_ENV};
use news_harvester::{Harvester, HttpFetcher, RateGovernor, SiteRegistry};

#[derive(Parser)]
#[command(name = "news-harvester", version, about = "Harvest news listings from configured sites")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API (default)
    Serve,
    /// Run one harvest and print the outcome as JSON
    Harvest {
        #[arg(long)]
        pretty: bool,
    },
    /// List the configured sources
    Sources,
}

#[actix_web::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    let config = AppConfig::load(config_path.as_deref())?;
    let registry = config.registry().context("Invalid site registry")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, registry).await,
        Command::Harvest { pretty } => harvest_once(&config, &registry, pretty).await,
        Command::Sources => {
            for site in registry.sites() {
                println!("{:<20} {}", site.name, site.url);
            }
            Ok(())
        }
    }
}

fn build_harvester(config: &AppConfig) -> Result<Harvester> {
    let fetcher = HttpFetcher::new(config.fetch_settings()).context("Failed to build HTTP client")?;
    Ok(Harvester::new(Arc::new(fetcher), config.harvest_settings()))
}

async fn harvest_once(config: &AppConfig, registry: &SiteRegistry, pretty: bool) -> Result<()> {
    let harvester = build_harvester(config)?;
    let outcome = harvester.harvest(registry.sites()).await?;

    let json = if pretty {
        serde_json::to_string_pretty(&outcome)?
    } else {
        serde_json::to_string(&outcome)?
    };
    println!("{}", json);
    Ok(())
}

async fn serve(config: AppConfig, registry: SiteRegistry) -> Result<()> {
    let state = web::Data::new(AppState {
        harvester: Arc::new(build_harvester(&config)?),
        registry: Arc::new(registry),
        governor: Arc::new(RateGovernor::new(config.rate_limit_settings())),
    });

    let host = config.server.host.clone();
    let port = config.server.port;

    log::info!("🚀 Starting News Harvester ({} sources)", state.registry.len());
    log::info!("🌐 Server running at http://{}:{}", host, port);
    log::info!("📰 Harvest endpoint: http://{}:{}{}", host, port, api::HARVEST_PATH);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(state.clone())
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .wrap(cors)
            .configure(api::configure)
    })
    .bind((host.as_str(), port))
    .with_context(|| format!("Failed to bind {}:{}", host, port))?
    .run()
    .await?;

    Ok(())
}
