// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Probe drivers and the allocator that hands them out.
//!
//! One probe family is chosen when the process is configured; every service registered during
//! the run gets a fresh driver from the same [`DriverAllocator`].

use crate::error::UpkeepError;
use async_trait::async_trait;
use std::fmt::{self, Debug, Display};
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::Instant;

/// Active health check for one endpoint.
#[async_trait]
pub trait ProbeDriver: Send + Sync {
    /// Probes the endpoint, giving up once `deadline` passes.
    async fn probe(&self, deadline: Instant) -> Result<(), UpkeepError>;
}

pub type AllocFn =
    Arc<dyn Fn(&str) -> Result<Arc<dyn ProbeDriver>, UpkeepError> + Send + Sync>;

/// Probe families a process run can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFamily {
    /// Plain TCP connect to the advertised endpoint
    Tcp,
    /// mongod/mongos liveness command
    MongoDb,
}

impl ProbeFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::MongoDb => "mgo",
        }
    }
}

impl Display for ProbeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProbeFamily {
    type Err = UpkeepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "mgo" | "mongo" | "mongodb" => Ok(Self::MongoDb),
            other => Err(UpkeepError::InvalidConfig(format!(
                "unknown probe family '{other}'"
            ))),
        }
    }
}

/// Configuration-time strategy producing a probe driver per registered service.
#[derive(Clone)]
pub struct DriverAllocator {
    family: String,
    alloc: AllocFn,
}

impl DriverAllocator {
    /// Allocator with a caller supplied constructor, registered under `family`.
    pub fn new(family: impl Into<String>, alloc: AllocFn) -> Self {
        Self {
            family: family.into(),
            alloc,
        }
    }

    pub fn from_family(family: ProbeFamily) -> Self {
        let alloc: AllocFn = match family {
            ProbeFamily::Tcp => Arc::new(
                |endpoint: &str| -> Result<Arc<dyn ProbeDriver>, UpkeepError> {
                    Ok(Arc::new(TcpProbe::new(endpoint)?))
                },
            ),
            ProbeFamily::MongoDb => Arc::new(
                |_: &str| -> Result<Arc<dyn ProbeDriver>, UpkeepError> {
                    Err(UpkeepError::DriverAllocation(
                        "mongodb probe is not implemented".to_string(),
                    ))
                },
            ),
        };
        Self::new(family.as_str(), alloc)
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    /// Allocates a driver for `endpoint`.
    ///
    /// A descriptor asking for a probe type other than the one this process runs with fails
    /// here instead of being tracked with a probe that does not match it.
    pub fn allocate(
        &self,
        probe_type: Option<&str>,
        endpoint: &str,
    ) -> Result<Arc<dyn ProbeDriver>, UpkeepError> {
        if let Some(requested) = probe_type {
            let enabled = self.family.parse::<ProbeFamily>();
            let matches = match (requested.parse::<ProbeFamily>(), enabled) {
                (Ok(a), Ok(b)) => a == b,
                _ => requested.eq_ignore_ascii_case(&self.family),
            };
            if !matches {
                return Err(UpkeepError::DriverAllocation(format!(
                    "probe type '{requested}' is not enabled, this process probes with '{}'",
                    self.family
                )));
            }
        }
        (self.alloc)(endpoint)
    }
}

impl Debug for DriverAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DriverAllocator({})", self.family)
    }
}

/// Checks that something accepts TCP connections on the endpoint.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
}

impl TcpProbe {
    /// `endpoint` is `<host>:<port>`, optionally followed by a path which a TCP probe ignores.
    pub fn new(endpoint: &str) -> Result<Self, UpkeepError> {
        let addr = endpoint.split('/').next().unwrap_or_default().trim();
        if addr.rsplit_once(':').map_or(true, |(host, port)| {
            host.is_empty() || port.parse::<u16>().is_err()
        }) {
            return Err(UpkeepError::DriverAllocation(format!(
                "invalid tcp endpoint '{endpoint}'"
            )));
        }
        Ok(Self {
            addr: addr.to_string(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl ProbeDriver for TcpProbe {
    async fn probe(&self, deadline: Instant) -> Result<(), UpkeepError> {
        let limit = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout_at(deadline, TcpStream::connect(self.addr.as_str())).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(UpkeepError::Probe(format!("{}: {e}", self.addr))),
            Err(_) => Err(UpkeepError::DeadlineExceeded(limit)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[test]
    fn test_family_parse() {
        assert_eq!("tcp".parse::<ProbeFamily>(), Ok(ProbeFamily::Tcp));
        assert_eq!("MGO".parse::<ProbeFamily>(), Ok(ProbeFamily::MongoDb));
        assert!("icmp".parse::<ProbeFamily>().is_err());
    }

    #[test]
    fn test_unimplemented_family_fails_allocation() {
        let allocator = DriverAllocator::from_family(ProbeFamily::MongoDb);
        let result = allocator.allocate(None, "10.0.0.1:27017");
        assert!(matches!(result, Err(UpkeepError::DriverAllocation(_))));
    }

    #[test]
    fn test_mismatched_probe_type_fails_allocation() {
        let allocator = DriverAllocator::from_family(ProbeFamily::Tcp);
        assert!(allocator.allocate(Some("mongodb"), "10.0.0.1:27017").is_err());
        assert!(allocator.allocate(Some("tcp"), "10.0.0.1:80").is_ok());
        assert!(allocator.allocate(None, "10.0.0.1:80").is_ok());
    }

    #[test]
    fn test_tcp_endpoint_validation() {
        assert_eq!(
            TcpProbe::new("10.0.0.1:8080/health").map(|p| p.addr().to_string()),
            Ok("10.0.0.1:8080".to_string())
        );
        assert!(TcpProbe::new("10.0.0.1").is_err());
        assert!(TcpProbe::new(":8080").is_err());
        assert!(TcpProbe::new("host:http").is_err());
    }

    #[tokio::test]
    async fn test_tcp_probe_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let probe = TcpProbe::new(&addr.to_string()).expect("valid endpoint");

        let deadline = Instant::now() + Duration::from_secs(1);
        assert!(probe.probe(deadline).await.is_ok());
    }

    #[tokio::test]
    async fn test_tcp_probe_fails_when_nothing_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);

        let probe = TcpProbe::new(&addr.to_string()).expect("valid endpoint");
        let deadline = Instant::now() + Duration::from_secs(1);
        assert!(matches!(
            probe.probe(deadline).await,
            Err(UpkeepError::Probe(_))
        ));
    }
}
