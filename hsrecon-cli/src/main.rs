//! hsrecon CLI
//!
//! Probes hidden services over Tor and correlates what they leak.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;

use hsrecon_core::{is_onion_address, normalize_hidden_service, EvidenceStore, ScanConfig};
use hsrecon_runtime::ScanEngine;

#[derive(Parser)]
#[command(name = "hsrecon")]
#[command(author, version, about = "hsrecon: hidden-service reconnaissance", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (0-3)
    #[arg(short, long, default_value = "1", global = true)]
    verbose: u8,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// TOML configuration file
    #[arg(short, long, env = "HSRECON_CONFIG")]
    config: Option<PathBuf>,

    /// Evidence store directory
    #[arg(long, env = "HSRECON_DB")]
    db: Option<PathBuf>,

    /// Tor SOCKS5 proxy address
    #[arg(long, env = "HSRECON_TOR_PROXY")]
    tor_proxy: Option<String>,

    /// Per-connection timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

impl ConfigArgs {
    /// File config (or defaults) with flags applied on top
    fn load(&self) -> Result<ScanConfig> {
        let mut config = match &self.config {
            Some(path) => ScanConfig::from_toml_file(path)?,
            None => ScanConfig::default(),
        };

        if let Some(db) = &self.db {
            config.db_dir = db.clone();
        }
        if let Some(proxy) = &self.tor_proxy {
            config.tor.socks_addr = proxy.clone();
        }
        if let Some(secs) = self.timeout {
            config.tor.timeout_secs = secs;
        }

        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Scan one or more hidden services
    Scan {
        /// Hidden services to scan
        services: Vec<String>,

        /// File with one hidden service per line
        #[arg(short, long)]
        list: Option<PathBuf>,

        /// Write the JSON results here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Show stored relationships for an identifier
    Related {
        /// Email address, onion, or any other identifier
        identifier: String,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Check Tor connection status
    Status {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match cli.command {
        Commands::Scan {
            services,
            list,
            output,
            config,
        } => {
            run_scan(services, list, output, config.load()?).await?;
        }
        Commands::Related { identifier, config } => {
            show_related(&identifier, &config.load()?)?;
        }
        Commands::Status { config } => {
            check_status(&config.load()?).await;
        }
    }

    Ok(())
}

/// Normalize the requested services, dropping anything that is not an onion name
fn collect_services(services: Vec<String>, list: Option<&str>) -> Vec<String> {
    let listed = list
        .map(|text| text.lines().map(str::to_string).collect::<Vec<_>>())
        .unwrap_or_default();

    let mut accepted = Vec::new();
    for raw in services.into_iter().chain(listed) {
        let name = normalize_hidden_service(&raw);
        if name.is_empty() {
            continue;
        }
        if !is_onion_address(&name) {
            warn!("Skipping {:?}: not a hidden service address", raw);
            continue;
        }
        if !accepted.contains(&name) {
            accepted.push(name);
        }
    }
    accepted
}

async fn run_scan(
    services: Vec<String>,
    list: Option<PathBuf>,
    output: Option<PathBuf>,
    config: ScanConfig,
) -> Result<()> {
    let listed = match &list {
        Some(path) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("Failed to read service list {}", path.display()))?,
        ),
        None => None,
    };

    let services = collect_services(services, listed.as_deref());
    if services.is_empty() {
        bail!("No valid hidden services to scan");
    }

    if !hsrecon_tor::check_tor_connection(&config.tor).await {
        warn!(
            "Tor proxy at {} did not answer; every probe will report not detected",
            config.tor.socks_addr
        );
    }

    let engine = ScanEngine::open(config)?;
    let outcomes = engine.scan_batch(services).await;
    let json = serde_json::to_string_pretty(&outcomes)?;

    match output {
        Some(path) => {
            fs::write(&path, json)?;
            eprintln!("📄 Results saved to: {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}

fn show_related(identifier: &str, config: &ScanConfig) -> Result<()> {
    let store = EvidenceStore::open(&config.db_dir).with_context(|| {
        format!("Failed to open evidence store at {}", config.db_dir.display())
    })?;

    let edges = store.relationships_for_identifier(identifier)?;
    eprintln!(
        "🔗 {} matches for {} ({} edges in store)",
        edges.len(),
        identifier,
        store.count_all_relationships()
    );
    println!("{}", serde_json::to_string_pretty(&edges)?);

    Ok(())
}

async fn check_status(config: &ScanConfig) {
    println!("🔌 Checking Tor connection...\n");

    if hsrecon_tor::check_tor_connection(&config.tor).await {
        println!("✅ Tor is running and accessible");
        println!("   Proxy: {}", config.tor.socks_addr);
    } else {
        println!("❌ Tor is not accessible");
        println!("   Expected proxy at: {}", config.tor.socks_addr);
        println!("\n   To install Tor:");
        println!("   - Linux: sudo apt install tor");
        println!("   - Mac: brew install tor");
        println!("   - Then start: sudo systemctl start tor (or brew services start tor)");
    }
}
