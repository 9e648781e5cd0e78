//! The sender daemon.
//!
//! Boots the cache, vendor registry, dispatch pipeline, and RPC listener,
//! then hands control to the maintenance loop. Pass `--master` (or set
//! `sender.is_master`) on exactly one process per deployment.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use klaxon_crypto::ApplicationKey;
use klaxon_db::Db;
use klaxon_email::EmailVendor;
use klaxon_sender::{
    AggregationEngine, AuditLog, Cache, ContactResolver, Dispatcher, EscalationEngine,
    MaintenanceConfig, MaintenanceLoop, OneclickSigner, Renderer, RpcServer, SenderConfig,
    SenderMetrics, SlavePool, VendorSender,
};
use klaxon_slack::SlackVendor;
use klaxon_twilio::TwilioVendor;
use klaxon_vendor::{DummyVendor, VendorRegistry};

#[derive(Debug, Parser)]
#[command(name = "klaxon-sender", about = "Incident notification sender")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Run as the master regardless of the configured role.
    #[arg(long)]
    master: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut config = SenderConfig::load(&args.config)?;
    if args.master {
        config.sender.is_master = true;
    }
    info!(is_master = config.sender.is_master, "bootstrapping sender");

    let db = Db::connect(&config.db).await?;
    let metrics = Arc::new(SenderMetrics::default());
    let audit = AuditLog::new(db.clone(), Arc::clone(&metrics));
    let cache = Arc::new(Cache::new(db.clone()));
    cache.refresh().await?;

    let mut registry = VendorRegistry::new();
    if config.sender.skip_send {
        info!("skip-send enabled, every mode goes to the dummy vendor");
        registry.register(Arc::new(DummyVendor::new()));
    } else {
        if let Some(email) = &config.vendors.email {
            registry.register(Arc::new(EmailVendor::new(email)?));
        }
        if let Some(twilio) = &config.vendors.twilio {
            registry.register(Arc::new(TwilioVendor::new(twilio.clone())));
        }
        if let Some(slack) = &config.vendors.slack {
            registry.register(Arc::new(SlackVendor::new(slack.clone())));
        }
    }
    let local = VendorSender::new(Arc::new(registry), Arc::clone(&metrics));

    let (send_tx, send_rx) = tokio::sync::mpsc::unbounded_channel();
    let send_rx = Arc::new(tokio::sync::Mutex::new(send_rx));

    let oneclick = config
        .oneclick
        .as_ref()
        .filter(|oneclick| oneclick.enabled)
        .map(|oneclick| {
            OneclickSigner::new(
                oneclick.base_url.clone(),
                ApplicationKey::new(oneclick.key.clone().into_bytes()),
            )
        });
    let renderer = Arc::new(Renderer::new(Arc::clone(&cache), db.clone(), oneclick));

    let resolver = ContactResolver::new(
        db.clone(),
        Arc::clone(&cache),
        config.sender.target_fallback_mode.clone(),
    );
    let slaves = SlavePool::new(
        config.sender.slaves.clone(),
        config.sender.slave_timeout(),
        Arc::clone(&metrics),
    );
    let dispatcher = Arc::new(Dispatcher::new(
        db.clone(),
        resolver,
        Arc::clone(&renderer),
        audit.clone(),
        Arc::clone(&metrics),
        local.clone(),
        slaves,
        send_rx,
    ));

    let aggregation = Arc::new(AggregationEngine::new(
        db.clone(),
        Arc::clone(&cache),
        audit.clone(),
        send_tx.clone(),
    ));
    let escalation = EscalationEngine::new(
        db.clone(),
        Arc::clone(&cache),
        Arc::clone(&metrics),
        audit,
        renderer,
        send_tx.clone(),
    );

    let rpc = Arc::new(RpcServer::new(
        config.sender.rpc_bind.clone(),
        send_tx,
        local,
        Arc::clone(&metrics),
    ));
    let listener = rpc.bind().await?;
    tokio::spawn(rpc.run(listener));

    MaintenanceLoop::new(
        db,
        cache,
        escalation,
        aggregation,
        dispatcher,
        metrics,
        MaintenanceConfig {
            tick: config.sender.tick_interval(),
            is_master: config.sender.is_master,
            workers: config.sender.workers,
        },
    )
    .run()
    .await;

    Ok(())
}
