// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Static per-container configuration.
//!
//! A [`Descriptor`] is built once from container metadata and never mutated afterwards; a later
//! placement for the same container replaces it wholesale. It also knows how to derive the lease
//! keys a service is advertised under and the endpoint its probe targets.

use crate::config::{parse_duration_or, DEFAULT_HEARTBEAT, DEFAULT_PROBE_INTERVAL, DEFAULT_TTL};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Address a published port must be bound to for the service to be advertised.
pub const WILDCARD_ADDRESS: &str = "0.0.0.0";

pub const LABEL_SERVICE: &str = "service";
pub const LABEL_PORT: &str = "port";
pub const LABEL_HEARTBEAT: &str = "heartbeat";
pub const LABEL_TTL: &str = "ttl";
pub const LABEL_PROBE_HEARTBEAT: &str = "probe_heartbeat";
pub const LABEL_PROBE_TYPE: &str = "probe_type";
pub const LABEL_PROBE_ENDPOINT: &str = "probe_endpoint";
pub const LABEL_PROXY_CFG: &str = "proxy_cfg";

/// One published port of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub private_port: u16,
    /// Host port, 0 when the container port is not published
    pub public_port: u16,
    /// Host address the public port is bound to
    pub ip: String,
}

impl PortMapping {
    pub fn new(private_port: u16, public_port: u16, ip: impl Into<String>) -> Self {
        Self {
            private_port,
            public_port,
            ip: ip.into(),
        }
    }

    /// A mapping is advertisable when it is published on the wildcard address.
    pub fn is_advertisable(&self) -> bool {
        self.public_port != 0 && self.ip == WILDCARD_ADDRESS
    }
}

/// Ambassador proxy request carried along with the descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyInfo {
    pub name: String,
    pub src: String,
    pub dst: Vec<String>,
}

/// What the runtime inspection hands over for one container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerMetadata {
    pub id: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub mappings: Vec<PortMapping>,
    #[serde(default)]
    pub proxy: Vec<ProxyInfo>,
}

/// Immutable configuration snapshot for one tracked container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub heartbeat: Duration,
    pub ttl: Duration,

    pub probe_interval: Duration,
    pub probe_type: Option<String>,
    pub probe_endpoint: Option<String>,

    pub container_id: String,
    pub service: String,
    /// Explicit port to advertise, takes precedence over `mappings`
    pub port: Option<String>,
    pub mappings: Vec<PortMapping>,
    pub proxy: Vec<ProxyInfo>,
    pub proxy_cfg: Option<String>,
}

impl Descriptor {
    /// Creates a descriptor with default timings. Mostly useful for callers that do their own
    /// inspection; [`Descriptor::from_metadata`] is the usual entry point.
    pub fn new(container_id: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            heartbeat: DEFAULT_HEARTBEAT,
            ttl: DEFAULT_TTL,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            probe_type: None,
            probe_endpoint: None,
            container_id: container_id.into(),
            service: service.into(),
            port: None,
            mappings: Vec::new(),
            proxy: Vec::new(),
            proxy_cfg: None,
        }
    }

    /// Builds a descriptor from container labels and port mappings.
    ///
    /// Returns `None` when the container should not be tracked: no `service` label, or no port
    /// that could be advertised. That is not an error; it is logged and the container ignored.
    pub fn from_metadata(meta: &ContainerMetadata) -> Option<Self> {
        let label = |name: &str| {
            meta.labels
                .get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let descriptor = Self {
            heartbeat: parse_duration_or(label(LABEL_HEARTBEAT).as_deref(), DEFAULT_HEARTBEAT),
            ttl: parse_duration_or(label(LABEL_TTL).as_deref(), DEFAULT_TTL),
            probe_interval: parse_duration_or(
                label(LABEL_PROBE_HEARTBEAT).as_deref(),
                DEFAULT_PROBE_INTERVAL,
            ),
            probe_type: label(LABEL_PROBE_TYPE),
            probe_endpoint: label(LABEL_PROBE_ENDPOINT),
            container_id: meta.id.clone(),
            service: label(LABEL_SERVICE).unwrap_or_default(),
            port: label(LABEL_PORT),
            mappings: meta.mappings.clone(),
            proxy: meta.proxy.clone(),
            proxy_cfg: label(LABEL_PROXY_CFG),
        };

        if !descriptor.is_trackable() {
            warn!(id = %short_id(&meta.id), "not tracking container");
            return None;
        }
        Some(descriptor)
    }

    /// A descriptor is usable only with a service name and at least one advertisable port.
    pub fn is_trackable(&self) -> bool {
        !self.service.trim().is_empty()
            && (self.explicit_port().is_some() || self.mappings.iter().any(|p| p.is_advertisable()))
    }

    fn explicit_port(&self) -> Option<&str> {
        self.port.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }

    /// Derives the lease keys this service is advertised under, formatted as
    /// `<service>/<advertise>:<port>`.
    pub fn lease_keys(&self, advertise: &str) -> Vec<String> {
        if let Some(port) = self.explicit_port() {
            return vec![format!("{}/{}:{}", self.service, advertise, port)];
        }
        self.mappings
            .iter()
            .filter(|p| p.is_advertisable())
            .map(|p| format!("{}/{}:{}", self.service, advertise, p.public_port))
            .collect()
    }

    /// Endpoint handed to the probe driver: the `<advertise>:<port>` part of the first key,
    /// with the explicit probe endpoint appended when one is configured.
    pub fn probe_target(&self, keys: &[String]) -> Option<String> {
        let first = keys.first()?;
        let base = first.rsplit('/').next().unwrap_or(first);
        Some(match self.probe_endpoint.as_deref() {
            Some(endpoint) => format!("{}/{}", base, endpoint.trim_start_matches('/')),
            None => base.to_string(),
        })
    }
}

/// Abbreviated container id for log lines.
pub(crate) fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
