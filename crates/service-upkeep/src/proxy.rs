// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ambassador proxy routes a service asks for through its labels.

use crate::descriptor::ProxyInfo;
use crate::error::UpkeepError;
use async_trait::async_trait;
use tracing::debug;

/// Opens the proxy routes of a service before it is first advertised.
#[async_trait]
pub trait ProxyConfigurator: Send + Sync {
    /// `cfg` is the `proxy_cfg` label, `routes` the inspected proxy requests. Called once per
    /// supervisor start; a failure is logged and does not stop the supervisor.
    async fn open(&self, cfg: Option<&str>, routes: &[ProxyInfo]) -> Result<(), UpkeepError>;
}

/// Configurator for processes without an ambassador.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProxy;

#[async_trait]
impl ProxyConfigurator for NoopProxy {
    async fn open(&self, cfg: Option<&str>, routes: &[ProxyInfo]) -> Result<(), UpkeepError> {
        if cfg.is_some() || !routes.is_empty() {
            debug!(?cfg, routes = routes.len(), "no proxy configured, skipping routes");
        }
        Ok(())
    }
}
