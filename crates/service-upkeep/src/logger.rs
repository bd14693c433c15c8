// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Logging setup for processes embedding the agent.

use crate::config::normalize_log_level;
use crate::error::UpkeepError;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Filter for `log_level`, accepting the legacy upper-case level names.
pub fn env_filter(log_level: &str) -> Result<EnvFilter, UpkeepError> {
    EnvFilter::try_new(normalize_log_level(log_level))
        .map_err(|e| UpkeepError::Logging(e.to_string()))
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(log_level: &str) -> Result<(), UpkeepError> {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter(log_level)?)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| UpkeepError::Logging(e.to_string()))?;

    debug!("Logging subsystem enabled");
    Ok(())
}
