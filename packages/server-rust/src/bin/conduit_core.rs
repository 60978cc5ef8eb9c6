//! The core process: registry, config negotiation, route compilation,
//! gateway and documentation surfaces behind one listener.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use conduit_server::network::{NetworkConfig, NetworkModule, TlsConfig};
use conduit_server::service::telemetry::{describe_metrics, init_tracing, install_prometheus};
use conduit_server::service::{
    spawn_config_listener, BackgroundWorker, CoreConfig, CoreState, HttpModuleClient,
    ModuleClient, Reconciler, Telemetry,
};
use conduit_server::storage::{MemoryOverrideStore, OverrideStore};

#[derive(Debug, Parser)]
#[command(name = "conduit-core", version, about)]
struct Args {
    #[arg(long, env = "CONDUIT_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "CONDUIT_PORT", default_value_t = 55152)]
    port: u16,

    #[arg(long, env = "CONDUIT_NODE_ID", default_value = "conduit-core")]
    node_id: String,

    /// redb file for config overrides; in-memory when unset.
    #[arg(long, env = "CONDUIT_DB")]
    db: Option<PathBuf>,

    #[arg(long, env = "CONDUIT_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    #[arg(long, env = "CONDUIT_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Per-call gateway timeout.
    #[arg(long, default_value_t = 30_000)]
    call_timeout_ms: u64,

    #[arg(long, default_value_t = 15_000)]
    reconcile_interval_ms: u64,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

fn open_store(path: Option<&PathBuf>) -> anyhow::Result<Arc<dyn OverrideStore>> {
    match path {
        #[cfg(feature = "redb")]
        Some(path) => Ok(Arc::new(
            conduit_server::storage::RedbOverrideStore::open(path)?,
        )),
        #[cfg(not(feature = "redb"))]
        Some(_) => anyhow::bail!("built without the redb feature"),
        None => Ok(Arc::new(MemoryOverrideStore::new())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json)?;

    if let Some(port) = args.metrics_port {
        install_prometheus(port)?;
    }
    describe_metrics();

    let core_config = CoreConfig {
        node_id: args.node_id.clone(),
        call_timeout_ms: args.call_timeout_ms,
        reconcile_interval_ms: args.reconcile_interval_ms,
        ..CoreConfig::default()
    };
    let telemetry = Telemetry::new(&core_config.node_id);
    let client: Arc<dyn ModuleClient> = Arc::new(HttpModuleClient::new(reqwest::Client::new()));
    let core = Arc::new(CoreState::new(
        core_config,
        open_store(args.db.as_ref())?,
        client,
        telemetry.clone(),
    ));

    let network_config = NetworkConfig {
        host: args.host,
        port: args.port,
        tls: args.tls_cert.zip(args.tls_key).map(|(cert_path, key_path)| TlsConfig {
            cert_path,
            key_path,
        }),
        request_timeout: Duration::from_millis(args.call_timeout_ms).max(Duration::from_secs(60)),
        ..NetworkConfig::default()
    };

    let mut network = NetworkModule::new(network_config, Arc::clone(&core));
    let shutdown = network.shutdown_controller();

    let mut reconciler = BackgroundWorker::start(
        Reconciler::new(
            Arc::clone(&core.registry),
            Arc::clone(&core.compiler),
            Arc::clone(&core.client),
            Arc::clone(&core.bus),
            telemetry.child("reconciler"),
        ),
        core.config.reconcile_interval_ms,
    );
    let listener = spawn_config_listener(&core.bus, reconciler.handle()?, shutdown.receiver());

    let port = network.start().await?;
    info!(port, node = %core.config.node_id, "conduit core starting");

    network
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    reconciler.stop().await;
    let _ = listener.await;
    info!("conduit core stopped");
    Ok(())
}
