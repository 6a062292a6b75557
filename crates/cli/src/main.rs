//! shellcache command-line host.
//!
//! Drives the proxy lifecycle from the shell: install a deployment, activate
//! it, and send single requests through the configured strategies.
//! Logging goes to stderr so response bodies on stdout stay clean.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use http::Method;
use tracing_subscriber::EnvFilter;

use shellcache_client::{FetchClient, FetchConfig};
use shellcache_core::identity::canonicalize;
use shellcache_core::{AppConfig, CacheDb, CacheProxy, Destination, ProxyRequest};

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline-first HTTP response cache with generation lifecycle")]
#[command(version)]
struct Args {
    /// Path to a TOML config file (default: $SHELLCACHE_CONFIG_FILE)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Seed the static generation from the manifest.
    Install,

    /// Remove every generation that is not current.
    Activate,

    /// Send one request through the proxy.
    Fetch {
        /// Absolute URL, or relative to the configured origin
        url: String,

        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Treat the request as a top-level navigation
        #[arg(long)]
        navigate: bool,

        /// Request destination (document, script, style, font, image, ...)
        #[arg(short, long)]
        destination: Option<Destination>,
    },

    /// List stored generations with entry counts.
    Generations,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AppConfig::load_from(Some(&path.to_string_lossy())),
        None => AppConfig::load(),
    }
    .context("loading configuration")?;

    let db = CacheDb::open(&config.db_path)
        .await
        .with_context(|| format!("opening store at {}", config.db_path.display()))?;

    match args.command {
        Command::Install => {
            let proxy = build_proxy(&config, db)?;
            proxy.on_install().await?;
            let ids = proxy.generations().current_ids().await;
            println!("{}", serde_json::to_string(&ids)?);
        }
        Command::Activate => {
            let proxy = build_proxy(&config, db)?;
            proxy.resume().await?;
            let removed = proxy.on_activate().await?;
            println!("{}", serde_json::to_string(&removed)?);
        }
        Command::Fetch { url, method, navigate, destination } => {
            let proxy = build_proxy(&config, db)?;
            proxy.resume().await?;
            let request = build_request(&config, &url, &method, navigate, destination)?;
            let response = proxy.on_request(request).await;
            proxy.drain().await;

            let response = response?;
            eprintln!("{} ({:?})", response.status, response.source);
            for (name, value) in &response.headers {
                eprintln!("{}: {}", name, String::from_utf8_lossy(value.as_bytes()));
            }
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&response.body)?;
            stdout.flush()?;
        }
        Command::Generations => {
            let generations = db.list_generations().await?;
            println!("{}", serde_json::to_string_pretty(&generations)?);
        }
    }

    Ok(())
}

fn build_proxy(config: &AppConfig, db: CacheDb) -> Result<CacheProxy> {
    let fetcher = Arc::new(FetchClient::new(FetchConfig::from(config))?);
    Ok(CacheProxy::from_config(config, db, fetcher)?)
}

fn build_request(
    config: &AppConfig, url: &str, method: &str, navigate: bool, destination: Option<Destination>,
) -> Result<ProxyRequest> {
    let origin = config.origin_url()?;
    let url = canonicalize(url, origin.as_ref()).with_context(|| format!("invalid url {url}"))?;
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes()).context("invalid method")?;

    let mut request = if navigate { ProxyRequest::navigate(url) } else { ProxyRequest::get(url) };
    request.method = method;
    if let Some(destination) = destination {
        request = request.with_destination(destination);
    }
    Ok(request)
}
