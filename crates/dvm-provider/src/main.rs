//! Provider daemon entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dvm_protocol::Keys;
use dvm_relay::{RelayPool, WsConnector};
use dvm_provider::{
    tasks::{ContentDiscovery, InactiveFollows},
    AdminConfig, Engine, ExecutorRegistry, KeywordFilter, LnBitsGateway, NoGateway, Profile,
    ProviderConfig, SeenStore,
};

#[derive(Parser)]
#[command(name = "dvm-provider")]
#[command(about = "NIP-90 service provider daemon", long_about = None)]
struct Cli {
    /// Relay urls; overrides DVM_RELAYS when given
    #[arg(long = "relay")]
    relays: Vec<String>,

    /// Path to an env file (defaults to ./.env when present)
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Rebroadcast the service announcements at startup
    #[arg(long)]
    announce: bool,

    /// Publish the profile metadata at startup
    #[arg(long)]
    publish_profile: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("loading env file {}", path.display()))?;
        }
        None => {
            let _ = dotenvy::dotenv();
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut config = ProviderConfig::from_env().context("reading provider configuration")?;
    if !cli.relays.is_empty() {
        config.relays = cli.relays.clone();
    }
    let keys = Keys::from_hex(&config.secret_key).context("parsing DVM_SECRET_KEY")?;

    let gateway: Arc<dyn dvm_provider::PaymentGateway> =
        match (&config.lnbits_url, &config.lnbits_invoice_key) {
            (Some(url), Some(key)) => Arc::new(LnBitsGateway::new(url.clone(), key.clone())?),
            _ => {
                info!("no payment gateway configured; paid jobs will be rejected");
                Arc::new(NoGateway)
            }
        };

    let store_path = std::env::var("DVM_STORE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/seen.json"));
    let store = Arc::new(SeenStore::open(
        store_path,
        Duration::from_secs(48 * 60 * 60),
    )?);

    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(InactiveFollows::new()));
    registry.register(Arc::new(ContentDiscovery::new(
        "content-discovery",
        "Recent Notes",
        KeywordFilter::new(env_list("DVM_MUST_LIST"), env_list("DVM_AVOID_LIST")),
    )));

    let admin = AdminConfig {
        rebroadcast_announcement: cli.announce,
        update_profile: cli.publish_profile,
        profile: Profile {
            name: std::env::var("DVM_PROFILE_NAME").ok(),
            about: std::env::var("DVM_PROFILE_ABOUT").ok(),
            picture: std::env::var("DVM_PROFILE_PICTURE").ok(),
            lud16: std::env::var("DVM_PROFILE_LUD16").ok(),
        },
        admin_pubkeys: env_list("DVM_ADMIN_PUBKEYS"),
    };

    let relay = Arc::new(
        RelayPool::connect(&config.relays, config.relay_timeout)
            .await
            .context("connecting to relays")?,
    );
    info!(relays = relay.relay_count(), "relay pool ready");

    let connector = Arc::new(WsConnector::new(config.relay_timeout));
    let engine = Arc::new(Engine::new(
        config, keys, relay, connector, registry, gateway, store, admin,
    ));

    tokio::select! {
        result = Arc::clone(&engine).run() => {
            result.context("engine stopped unexpectedly")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            engine.shutdown().await;
        }
    }

    Ok(())
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
