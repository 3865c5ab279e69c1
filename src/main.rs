#![cfg_attr(not(test), deny(clippy::panic))]

use clap::Parser;
use grimoire_server::config;
use grimoire_server::logging;
use grimoire_server::server::GameServer;
use grimoire_server::websocket;
use std::net::SocketAddr;

/// Grimoire -- event-sourced WebSocket server for hidden-role games
#[derive(Parser, Debug)]
#[command(name = "grimoire-server")]
#[command(about = "An event-sourced WebSocket server for hidden-role social deduction games")]
#[command(version)]
struct Cli {
    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines and pre-deployment checks.
    #[arg(long, short = 'c', conflicts_with = "print_config")]
    validate_config: bool,

    /// Print the loaded configuration to stdout (as JSON) and exit.
    #[arg(long, conflicts_with = "validate_config")]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from config.json if present; otherwise defaults.
    let cfg = config::load();

    if cli.print_config {
        let json = serde_json::to_string_pretty(&cfg)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    // config::load() already reported problems to stderr; capture the
    // result again here for a proper exit code and production enforcement.
    let validation_result = config::validate_config_security(&cfg);

    if cli.validate_config {
        match validation_result {
            Ok(()) => {
                println!("Configuration validation passed");
                println!();
                println!("Configuration summary:");
                println!("  Bind address: {}", cfg.http_addr);
                println!("  Storage backend: {}", cfg.db_dsn);
                println!("  Snapshot interval: {} events", cfg.engine.snapshot_interval);
                println!("  Room idle timeout: {}s", cfg.engine.room_idle_timeout);
                println!("  Command deadline: {}ms", cfg.engine.command_deadline_ms);
                println!(
                    "  Subscriber queue depth: {}",
                    cfg.engine.subscriber_queue_depth
                );
                return Ok(());
            }
            Err(e) => {
                eprintln!("Configuration validation failed:\n{e}");
                std::process::exit(1);
            }
        }
    }

    validation_result.map_err(|e| anyhow::anyhow!("invalid configuration:\n{e}"))?;

    logging::init_with_config(&cfg.logging);

    let addr: SocketAddr = cfg
        .http_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid http_addr '{}': {e}", cfg.http_addr))?;

    tracing::info!(%addr, "Starting Grimoire server");

    let cors_origins = cfg.gateway.cors_origins.clone();
    let server = GameServer::new(cfg)?;

    // Maintenance: idle room unload and ended-room GC.
    let maintenance = server.start_maintenance();

    let app = websocket::create_router(&cors_origins).with_state(server.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        cors_origins = %cors_origins,
        "Server started - WebSocket: /ws, health: /health, metrics: /metrics"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Drain room queues before exiting; aborted commands are not applied.
    maintenance.abort();
    server.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl-C, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod cli_tests {
    use super::Cli;
    use clap::Parser;

    #[test]
    fn test_cli_default_no_flags() {
        let cli = Cli::try_parse_from(["grimoire-server"]).unwrap();
        assert!(!cli.validate_config);
        assert!(!cli.print_config);
    }

    #[test]
    fn test_cli_validate_config_short() {
        let cli = Cli::try_parse_from(["grimoire-server", "-c"]).unwrap();
        assert!(cli.validate_config);
    }

    #[test]
    fn test_cli_validate_and_print_config_conflict() {
        let result =
            Cli::try_parse_from(["grimoire-server", "--validate-config", "--print-config"]);
        assert!(result.is_err());
    }
}
