use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tower_http::trace::TraceLayer;

use pm_domain::config::Config;
use pm_gateway::{api, bootstrap, cors, telemetry};
use pm_gateway::bridge::{Bridge, WatchTarget};
use pm_gateway::cli::{Cli, Command, ConfigCommand};

const RETENTION_SWEEP: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None => serve(None, false, None).await,
        Some(Command::Serve {
            port,
            mcp_only,
            http_url,
        }) => serve(port, mcp_only, http_url).await,
        Some(Command::Agent(command)) => {
            telemetry::init_cli();
            let (config, _) = pm_gateway::cli::load_config()?;
            pm_gateway::cli::agent::run(&config, command).await
        }
        Some(Command::Watch {
            http_url,
            session,
            domain,
        }) => {
            telemetry::init_cli();
            let (config, _) = pm_gateway::cli::load_config()?;
            let url = http_url.unwrap_or_else(|| config.server.local_url());
            watch(&config, &url, WatchTarget::new(session, domain)).await
        }
        Some(Command::Tenant(command)) => {
            telemetry::init_cli();
            let (config, _) = pm_gateway::cli::load_config()?;
            pm_gateway::cli::tenant::run(&config, command)
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = pm_gateway::cli::load_config()?;
            let valid = pm_gateway::cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = pm_gateway::cli::load_config()?;
            pm_gateway::cli::config::show(&config)
        }
        Some(Command::Version) => {
            println!("pinmark {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn serve(port: Option<u16>, mcp_only: bool, http_url: Option<String>) -> anyhow::Result<()> {
    let (mut config, _config_path) = pm_gateway::cli::load_config()?;
    if let Some(port) = port {
        config.server.port = port;
    }

    if mcp_only {
        telemetry::init_cli();
        let url = http_url.unwrap_or_else(|| config.server.local_url());
        tracing::info!(url = %url, "bridge mode, not listening");
        return watch(&config, &url, WatchTarget::All).await;
    }

    let spans = telemetry::init_server(&config.observability);
    if http_url.is_some() {
        tracing::warn!("--http-url only applies together with --mcp-only");
    }
    let result = run_server(Arc::new(config), spans.exporting()).await;
    spans.shutdown();
    tracing::info!("shutdown complete");
    result
}

/// Print every event from `target` as one JSON line until Ctrl-C.
async fn watch(config: &Config, url: &str, target: WatchTarget) -> anyhow::Result<()> {
    let bridge = Bridge::new(url, Bridge::token_from_env(config))?;
    let stdout = std::io::stdout();
    let print = |line: &str| {
        let mut out = stdout.lock();
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    };

    tokio::select! {
        result = bridge.watch(&target, print) => result,
        _ = tokio::signal::ctrl_c() => Ok(()),
    }
}

/// Start the annotation server with the given configuration.
async fn run_server(config: Arc<Config>, exporting_spans: bool) -> anyhow::Result<()> {
    tracing::info!(mode = ?config.server.mode, exporting_spans, "Pinmark starting");

    let state = bootstrap::build_app_state(config.clone())?;
    let sweeper = bootstrap::spawn_retention(
        state.store.clone(),
        config.store.event_retention_days,
        RETENTION_SWEEP,
    );

    // ── Concurrency limit (backpressure protection) ────────────────
    let max_concurrent = std::env::var("PINMARK_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);
    tracing::info!(max_concurrent, "concurrency limit set");

    // ── Router ───────────────────────────────────────────────────────
    let app = api::router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(cors::layer(&config.server.cors))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state.clone());

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "Pinmark listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server error")?;

    sweeper.abort();
    tracing::info!("server stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM, then return to trigger graceful shutdown of
/// the Axum server.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                let _ = ctrl_c.await;
                tracing::info!("received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("received SIGINT, shutting down");
    }
}
