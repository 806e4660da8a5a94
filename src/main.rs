//! berth server - template materialization for tenant namespaces

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::CustomResourceExt;

use berth::{build, serve_webhook};
use berth_api::ServerConfig;
use berth_common::crd::ServiceTemplate;
use berth_common::kube_utils::create_client_with_timeout;
use berth_common::telemetry::{init_logging, LogFormat, TelemetryConfig};
use berth_engine::{FileLedger, KubeClusterClient};

/// berth - materialize service templates into tenant namespaces
#[derive(Parser, Debug)]
#[command(name = "berth-server", version, about, long_about = None)]
struct Cli {
    /// Generate the ServiceTemplate CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Server configuration file
    #[arg(long, env = "BERTH_CONFIG", default_value = "/etc/berth/config.yaml")]
    config: PathBuf,

    /// Kubeconfig to use instead of in-cluster configuration
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the API and the admission webhook (default mode)
    Serve,

    /// Delete a tenant's namespace, identities, ledger records and reservations
    RemoveTenant {
        /// Tenant name
        tenant: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&ServiceTemplate::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_logging(TelemetryConfig {
        format: cli.log_format,
        ..Default::default()
    })?;

    let config = ServerConfig::load(&cli.config)
        .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", cli.config.display(), e))?;
    let timeouts = &config.engine.kube;
    let client =
        create_client_with_timeout(cli.kubeconfig.as_deref(), timeouts.connect(), timeouts.read())
            .await?;
    let cluster = Arc::new(KubeClusterClient::new(client, timeouts.call()));
    let ledger = Arc::new(FileLedger::open(&config.engine.ledger_dir).await?);

    let app = build(&config, cluster, ledger);

    match cli.command {
        Some(Commands::RemoveTenant { tenant }) => {
            let records = app.services.remove_tenant(&tenant).await?;
            println!("Removed tenant {tenant} ({records} ownership records)");
            Ok(())
        }
        Some(Commands::Serve) | None => {
            tracing::info!(
                tenants = config.tenants.len(),
                api = %config.listen_addr,
                webhook = %config.webhook_listen_addr,
                "Starting berth"
            );
            tokio::try_join!(
                berth_api::serve(config.listen_addr, app.api),
                serve_webhook(
                    config.webhook_listen_addr,
                    app.webhook,
                    config.webhook_tls.as_ref()
                ),
            )?;
            Ok(())
        }
    }
}
