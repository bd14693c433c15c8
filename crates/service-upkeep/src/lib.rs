// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Service Upkeep
//!
//! Keeps the services running in local containers discoverable. For every container labelled as
//! a service the agent maintains TTL bound keys in a coordination store, named
//! `<service>/<advertise>:<port>`, and health-checks the endpoint behind them. Other nodes find
//! healthy endpoints only through those keys.
//!
//! ## Architecture
//!
//! - [`registry`]: one [`Registry`] per process, at most one supervisor per container
//! - [`supervisor`]: the heartbeat and probe loop of a single service
//! - [`lease`]: the lease protocol and the [`LeaseStore`] seam to the coordination store
//! - [`gate`]: consecutive probe failure counter
//! - [`driver`]: probe drivers and the allocator selected at configuration time
//! - [`descriptor`]: per-container configuration built from labels
//! - [`store`]: descriptor lookup surviving supervisor restarts
//! - [`proxy`]: ambassador routes opened before a service is advertised
//! - [`events`]: line-delimited lifecycle event feed

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod descriptor;
pub mod driver;
pub mod error;
pub mod events;
pub mod gate;
pub mod lease;
pub mod logger;
pub mod proxy;
pub mod registry;
pub mod store;
pub mod supervisor;

pub use config::AgentConfig;
pub use descriptor::{ContainerMetadata, Descriptor, PortMapping, ProxyInfo};
pub use driver::{DriverAllocator, ProbeDriver, ProbeFamily};
pub use error::UpkeepError;
pub use events::{feed_events, FeedEnd};
pub use lease::{ExistenceGuard, LeaseStore, MemoryLeaseStore, WriteOptions};
pub use proxy::{NoopProxy, ProxyConfigurator};
pub use registry::{LifecycleEvent, Registry};
pub use store::{DescriptorStore, MemoryDescriptorStore};
pub use supervisor::SupervisorStatus;
