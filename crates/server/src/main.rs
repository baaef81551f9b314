mod bootstrap;

use anyhow::{Context, Result};
use replybot_core::config::{AppConfig, LoadOptions, LogFormat};
use tokio::sync::watch;
use tracing::Level;

fn init_logging(config: &AppConfig) {
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    init_logging_with(log_level, config.logging.format);
}

fn init_logging_with(log_level: Level, format: LogFormat) {
    use replybot_core::config::LogFormat::*;

    match format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let app = match bootstrap::bootstrap(LoadOptions::default()) {
        Ok(app) => app,
        Err(error) => {
            // Without a config there are no logging settings; use the defaults.
            init_logging_with(Level::INFO, LogFormat::Json);
            bootstrap::log_failure(&error);
            return Err(error).context("startup failed");
        }
    };
    init_logging(&app.config);
    tracing::info!(
        event_name = "system.bootstrap.ready",
        api_base_url = %app.config.slack.api_base_url,
        max_retries = ?app.config.socket.max_retries,
        "slack socket mode runner assembled"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_seen = shutdown_rx.clone();
    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => tracing::info!(
                event_name = "system.server.stopping",
                signal,
                "shutdown signal received"
            ),
            Err(error) => tracing::error!(
                event_name = "system.server.signal_error",
                error = %error,
                "could not listen for shutdown signals; stopping"
            ),
        }
        let _ = shutdown_tx.send(true);
    });

    tracing::info!(event_name = "system.server.started", "replybot-server started");
    let report = app.slack_runner.start(shutdown_rx).await?;
    tracing::info!(
        event_name = "system.server.stopped",
        events_handled = report.events_handled,
        "replybot-server stopped"
    );

    if !*shutdown_seen.borrow() {
        anyhow::bail!(
            "socket mode session stopped in state {:?} without a shutdown request",
            report.final_state
        );
    }
    Ok(())
}

async fn wait_for_shutdown() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("ctrl-c")
    }
}
