use std::error::Error;

use clap::Parser;
use live_relay::{GeminiSessionFactory, RelayConfig, RelayServer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "live-relay",
    version,
    about = "WebSocket relay between browser clients and Gemini Live sessions"
)]
struct Cli {
    #[command(flatten)]
    config: RelayConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "live_relay=info".into()),
        )
        .init();

    // tungstenite's rustls connector needs a process-wide provider.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cli = Cli::parse();
    let template = cli.config.session_template().inspect_err(|e| {
        error!("{}", e);
    })?;
    info!(
        backend = ?template.backend,
        model = %template.model,
        "Using Live API backend"
    );

    let factory = GeminiSessionFactory::new(template);
    let server = RelayServer::bind(cli.config.listen_addr(), factory, cli.config.relay_settings()).await?;

    server
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("Ctrl-C received, shutting down");
        })
        .await?;

    Ok(())
}
