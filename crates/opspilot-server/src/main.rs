//! OpsPilot: natural-language operations assistant for containers and clusters.

use std::sync::Arc;

use opspilot_core::OpsPilotConfig;
use opspilot_server::{build_router, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

const CLI_SESSION: &str = "cli";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = OpsPilotConfig::from_env();

    // Handle CLI subcommands
    if args.len() > 1 {
        match args[1].as_str() {
            "ask" => {
                if args.len() < 3 {
                    eprintln!("Usage: opspilot ask \"<query>\"");
                    std::process::exit(1);
                }
                let query = args[2..].join(" ");
                let state = AppState::from_config(config)?;
                let turn = state.orchestrator.handle_turn(CLI_SESSION, &query).await;
                println!("{}", turn.output);
                if let Some(request) = &turn.confirmation_request {
                    println!();
                    println!("{} ({})", request.reason, request.capability);
                    println!("Approve it through POST /api/turn/confirm on a running server.");
                }
                if turn.disambiguation_needed {
                    println!();
                    for call in &turn.tool_calls {
                        println!("  - {}", call.capability);
                    }
                }
                return Ok(());
            }
            "capabilities" => {
                let state = AppState::from_config(config)?;
                let policy = state.orchestrator.safety_policy();
                for capability in state.orchestrator.registry().iter() {
                    let marker = if policy.is_dangerous(capability) { "!" } else { " " };
                    println!("{} {:<36} {}", marker, capability.name, capability.description);
                }
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("OpsPilot: natural-language operations assistant");
                println!();
                println!("Usage: opspilot [command]");
                println!();
                println!("Commands:");
                println!("  (none)                   Start the server");
                println!("  ask \"<query>\"            Run one turn and print the result");
                println!("  capabilities             List capabilities (! = needs approval)");
                println!("  help                     Show this help message");
                return Ok(());
            }
            _ => {
                eprintln!("Unknown command: {}. Use 'opspilot help' for usage.", args[1]);
                std::process::exit(1);
            }
        }
    }

    // Normal server startup
    info!("Data directory: {}", config.data_dir.display());
    let port = config.port;

    let state = Arc::new(AppState::from_config(config)?);
    state.orchestrator.start_background();

    let app = build_router(state.clone());

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("OpsPilot server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.orchestrator.shutdown().await;
    info!("OpsPilot server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
