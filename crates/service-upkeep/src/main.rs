// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{error, info, warn};

use service_upkeep::{
    feed_events, logger, AgentConfig, DriverAllocator, MemoryDescriptorStore, MemoryLeaseStore,
    Registry,
};

/// Reads container lifecycle events, one JSON object per line on stdin, and keeps the leases of
/// the described services alive until stdin closes or the process is interrupted.
#[tokio::main]
pub async fn main() {
    let config = AgentConfig::from_env();
    let log_level = config.as_ref().map_or("info", |c| c.log_level.as_str());
    if let Err(e) = logger::init(log_level) {
        eprintln!("failed to set up logging: {e}");
    }

    let config = match config {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Invalid configuration: {e}");
            return;
        }
    };
    info!(
        advertise = %config.advertise,
        probe = %config.probe_family,
        "starting upkeep agent"
    );
    warn!(
        discovery = %config.discovery,
        "no remote store client configured, leases are kept in process memory"
    );

    let allocator = DriverAllocator::from_family(config.probe_family);
    let registry = Registry::new(
        Arc::clone(&config),
        Arc::new(MemoryLeaseStore::new()),
        Arc::new(MemoryDescriptorStore::new()),
        allocator,
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(err = %e, "failed to listen for interrupts");
            std::future::pending::<()>().await;
        }
    };
    let end = feed_events(&registry, BufReader::new(tokio::io::stdin()), shutdown).await;

    registry.shutdown().await;
    info!(?end, "upkeep agent stopped");
}
