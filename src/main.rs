//! torchd: Background daemon driving a camera flash LED as a torch
//!
//! This daemon provides:
//! - Torch capability detection on the Linux LED class
//! - A single controller owning the torch session, with Steady and SOS
//!   blink patterns at an operator-chosen period
//! - IPC server through which UI clients toggle the torch, pick the
//!   pattern and speed, and receive state notifications

mod config;
mod controller;
mod events;
mod ipc;
mod lifecycle;
mod platform;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::controller::{ControllerHandle, TorchController};
use crate::events::TorchEvent;
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::platform::SysfsTorch;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "torchd starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, ?config.leds_root, "configuration loaded");

    // Create shutdown signal handler
    let mut shutdown = ShutdownSignal::new()?;

    // Create channels for inter-component communication
    // UI commands, acquisitions and timers -> controller
    let (inbox_tx, inbox_rx) = mpsc::channel(64);
    // Controller -> IPC subscribers
    let (event_tx, _event_rx) = broadcast::channel::<TorchEvent>(64);

    // Create the controller; this runs the capability check
    let platform = Arc::new(SysfsTorch::new(&config.leds_root, config.led_name.clone()));
    let controller = TorchController::init(
        platform,
        config.selection,
        config.bounds,
        inbox_tx.clone(),
        event_tx.clone(),
    );
    let handle = ControllerHandle::new(inbox_tx);
    let mut controller_task = tokio::spawn(controller.run(inbox_rx));

    // Create IPC server
    let server = Server::new(&config.socket_path, handle.clone(), event_tx)?;

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // The controller only exits after a dispose
        result = &mut controller_task => {
            if let Err(e) = result {
                error!(?e, "torch controller task failed");
            }
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    // Leave the torch dark
    if let Err(e) = handle.dispose().await {
        warn!(%e, "torch controller already gone");
    }
    server.shutdown().await;

    info!("torchd stopped");

    Ok(())
}
