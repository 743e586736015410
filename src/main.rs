use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use proxy_pool::{
    catalog::{SqliteCatalog, ValidatorCatalog, ValidatorEndpoint, VendorCatalog, VendorSource},
    config::Config,
    pool::{
        runner, CheckWorker, FetchSettings, FetchWorker, PoolState, ReplenishmentController,
    },
    proxy::{CrawlerConfig, ExtractorRegistry, HttpValidator, ProxyCrawler, ProxyValidator},
    store::{KeyTtl, ProxyStore, RedisStore},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// A self-maintaining pool of validated proxies
#[derive(Parser)]
#[command(name = "proxy-pool")]
#[command(about = "A self-maintaining pool of validated proxies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the configuration
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one check cycle over the pool
    Check,
    /// Run one fetch cycle over all active vendors
    Fetch,
    /// Run one replenishment controller tick
    Tick,
    /// Run the check and replenish loops under supervision until Ctrl-C
    Run,
    /// Print pool size and cooldown flags
    Status,
    /// Manage vendors and validators
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },
}

impl Commands {
    /// Whether the command may fetch vendor pages
    fn crawls_vendors(&self) -> bool {
        matches!(self, Commands::Fetch | Commands::Tick | Commands::Run)
    }
}

#[derive(Subcommand)]
enum CatalogCommands {
    /// Add or update a vendor listing page
    AddVendor {
        /// Unique vendor name
        name: String,
        /// First listing page
        url: String,
        /// Registered extractor that understands the page
        #[arg(short, long, default_value = "plain")]
        extractor: String,
        /// Store the vendor as inactive
        #[arg(long)]
        inactive: bool,
    },
    /// Add or update a validator endpoint
    AddValidator {
        /// Probe URL
        url: String,
        /// Prefix a live response body starts with
        startstring: String,
    },
    /// List vendors and validators
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(format) = cli.log_format {
        config.override_log_format(format)?;
    }
    setup_tracing(&config, cli.verbose);

    let catalog = Arc::new(
        SqliteCatalog::connect(&config.catalog.database_url)
            .await
            .with_context(|| format!("failed to open catalog {}", config.catalog.database_url))?,
    );

    let command = match cli.command {
        Commands::Catalog { command } => return run_catalog(&catalog, command).await,
        other => other,
    };

    let store: Arc<dyn ProxyStore> = Arc::new(
        RedisStore::connect(&config.store)
            .await
            .with_context(|| format!("failed to connect to store at {}", config.store.url))?,
    );
    let state = PoolState::new(store, &config.store.key_prefix);
    let validator: Arc<dyn ProxyValidator> =
        Arc::new(HttpValidator::with_config(config.validator.clone()));

    let registry = Arc::new(ExtractorRegistry::with_defaults());
    if command.crawls_vendors() {
        registry.ensure_known(&catalog.active_vendors().await?)?;
    }

    let crawler = ProxyCrawler::with_config(
        CrawlerConfig::new()
            .with_timeout(config.fetch.timeout())
            .with_user_agent(config.fetch.user_agent.clone()),
    )?;
    let fetch = Arc::new(
        FetchWorker::new(
            state.clone(),
            catalog.clone(),
            catalog.clone(),
            Arc::new(crawler),
            registry,
            validator.clone(),
        )
        .with_settings(FetchSettings::from_config(&config)),
    );
    let check = Arc::new(CheckWorker::new(
        state.clone(),
        catalog.clone(),
        validator,
        config.validator.concurrency,
    ));
    let controller = Arc::new(ReplenishmentController::new(
        state.clone(),
        config.thresholds,
        config.windows,
        fetch.clone(),
    ));

    match command {
        Commands::Check => {
            let report = check.run().await?;
            println!(
                "Checked {} proxies: {} alive, {} evicted, pool size {}",
                report.checked, report.alive, report.evicted, report.pool_size
            );
        }
        Commands::Fetch => {
            let report = fetch.run().await?;
            println!(
                "Fetched {} pages from {} vendors: {} candidates, {} admitted, pool size {}",
                report.pages, report.vendors, report.candidates, report.admitted, report.pool_size
            );
        }
        Commands::Tick => {
            let outcome = controller.tick().await?;
            println!("Pool count {}: {}", outcome.pool_count, outcome.decision);
            if let Some(report) = outcome.fetch {
                println!(
                    "Fetch admitted {} proxies, pool size {}",
                    report.admitted, report.pool_size
                );
            }
        }
        Commands::Run => {
            controller.startup().await?;
            let supervisor = runner::supervisor(check, controller, config.intervals);
            let summary = supervisor
                .run(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                        std::future::pending::<()>().await;
                    }
                    tracing::info!("Interrupt received; shutting down");
                })
                .await;
            for task in summary {
                tracing::info!(task = %task.name, restarts = task.restarts, "Task stopped");
            }
        }
        Commands::Status => {
            let status = state.status().await?;
            println!("Pool size:    {}", status.size);
            match status.cached_count {
                Some(count) => println!("Cached count: {count}"),
                None => println!("Cached count: (unset)"),
            }
            println!("Protect flag: {}", describe_ttl(status.protect));
            println!("Refresh flag: {}", describe_ttl(status.refresh));
        }
        Commands::Catalog { .. } => unreachable!("handled before connecting to the store"),
    }

    Ok(())
}

async fn run_catalog(catalog: &SqliteCatalog, command: CatalogCommands) -> Result<()> {
    match command {
        CatalogCommands::AddVendor {
            name,
            url,
            extractor,
            inactive,
        } => {
            let registry = ExtractorRegistry::with_defaults();
            let mut vendor = VendorSource::new(&name, &url, &extractor);
            if inactive {
                vendor = vendor.inactive();
            }
            registry.resolve(&vendor)?;
            catalog.upsert_vendor(&vendor).await?;
            println!("Vendor saved: {name}");
        }
        CatalogCommands::AddValidator { url, startstring } => {
            catalog
                .upsert_validator(&ValidatorEndpoint::new(&url, &startstring))
                .await?;
            println!("Validator saved: {url}");
        }
        CatalogCommands::List => {
            let vendors = catalog.all_vendors().await?;
            println!("Vendors ({}):", vendors.len());
            for vendor in vendors {
                println!(
                    "  {} [{}] {} ({})",
                    vendor.name, vendor.status, vendor.url, vendor.extractor
                );
            }
            let validators = catalog.validators().await?;
            println!("Validators ({}):", validators.len());
            for validator in validators {
                println!("  {} -> {:?}", validator.url, validator.startstring);
            }
        }
    }
    Ok(())
}

fn describe_ttl(ttl: KeyTtl) -> String {
    match ttl {
        KeyTtl::Missing => "absent".to_string(),
        KeyTtl::Persistent => "set, no expiry".to_string(),
        KeyTtl::Expires(remaining) => format!("set, {}s left", remaining.as_secs()),
    }
}

fn setup_tracing(config: &Config, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("proxy_pool={level},warn")));

    match config.logging.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}
