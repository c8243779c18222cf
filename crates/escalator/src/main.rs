use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use escalation_engine::Engine;
use escalator::{twilio, AppConfig, AppState, PlanFile, TwilioClient};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Escalating notifications over Twilio SMS and voice
#[derive(Parser, Debug)]
#[command(name = "escalator", version)]
struct Args {
    /// Service configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Plans to submit at start-up (TOML)
    #[arg(long)]
    plans: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.service.listen = listen;
    }
    if !config.twilio_configured() {
        warn!("Twilio credentials are incomplete; contact attempts will fail");
    }

    let client = TwilioClient::new(config.twilio.clone(), &config.service.callback_url_base)
        .context("Failed to build Twilio client")?
        .shared();
    let engine = Engine::spawn(&config.engine, twilio::contact_book(&client));
    info!(
        listen = %config.service.listen,
        callback_base = %config.service.callback_url_base,
        ack_code_digits = config.engine.ack_code_digits,
        "Escalator starting"
    );

    if let Some(path) = &args.plans {
        let file = PlanFile::from_file(path)?;
        for plan in file.plans {
            let recipient = plan.recipient.clone();
            match engine.submit(plan).await {
                Ok(plan_id) => info!(%plan_id, %recipient, "Submitted start-up plan"),
                Err(e) => error!(%recipient, error = %e, "Start-up plan rejected"),
            }
        }
    }

    let listener = TcpListener::bind(config.service.listen)
        .await
        .context(format!("Failed to bind {}", config.service.listen))?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for interrupt");
            return;
        }
        info!("Interrupt received");
        on_signal.cancel();
    });

    let state = AppState::new(engine.clone(), client).shared();
    escalator::serve(listener, state, shutdown).await?;

    let report = engine.shutdown(config.engine.shutdown_grace).await;
    info!(
        active = report.active_at_shutdown,
        remaining = report.remaining,
        drained = report.drained,
        "Escalator stopped"
    );
    Ok(())
}
