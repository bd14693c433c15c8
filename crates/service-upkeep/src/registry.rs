// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bookkeeping of active supervisors.
//!
//! The [`Registry`] is built once per process and shared by reference with whatever feeds it
//! container lifecycle events. It keeps at most one running supervisor per container id: every
//! operation that starts a supervisor first cancels the previous one and waits for it to exit.

use crate::config::AgentConfig;
use crate::descriptor::{short_id, ContainerMetadata, Descriptor};
use crate::driver::DriverAllocator;
use crate::error::UpkeepError;
use crate::lease::{Lease, LeaseStore, LeaseValue};
use crate::proxy::{NoopProxy, ProxyConfigurator};
use crate::store::DescriptorStore;
use crate::supervisor::{Deadlines, Supervisor, SupervisorStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};

/// Container lifecycle events the registry reacts to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEvent {
    /// Container started; carries its inspected metadata
    Start(ContainerMetadata),
    /// Container stopped but may come back
    Die(String),
    /// Container removed for good
    Destroy(String),
}

struct RunningRecord {
    service: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    status: watch::Receiver<SupervisorStatus>,
}

impl RunningRecord {
    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancels the supervisor and waits for its task to exit.
    async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                if err.is_panic() {
                    error!(srv = %self.service, "supervisor panicked");
                }
            }
        }
    }
}

pub struct Registry {
    config: Arc<AgentConfig>,
    leases: Arc<dyn LeaseStore>,
    descriptors: Arc<dyn DescriptorStore>,
    allocator: DriverAllocator,
    proxy: Arc<dyn ProxyConfigurator>,
    root: CancellationToken,
    records: Mutex<HashMap<String, RunningRecord>>,
}

impl Registry {
    pub fn new(
        config: Arc<AgentConfig>,
        leases: Arc<dyn LeaseStore>,
        descriptors: Arc<dyn DescriptorStore>,
        allocator: DriverAllocator,
    ) -> Self {
        Self::with_root(config, leases, descriptors, allocator, CancellationToken::new())
    }

    /// Like [`Registry::new`], with supervisors cancelled together with `root`.
    pub fn with_root(
        config: Arc<AgentConfig>,
        leases: Arc<dyn LeaseStore>,
        descriptors: Arc<dyn DescriptorStore>,
        allocator: DriverAllocator,
        root: CancellationToken,
    ) -> Self {
        Self {
            config,
            leases,
            descriptors,
            allocator,
            proxy: Arc::new(NoopProxy),
            root,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the configurator every supervisor calls before its first lease write.
    pub fn with_proxy(mut self, proxy: Arc<dyn ProxyConfigurator>) -> Self {
        self.proxy = proxy;
        self
    }

    /// Stored descriptor for `id`, if any.
    pub fn get(&self, id: &str) -> Option<Descriptor> {
        match self.descriptors.get(id) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                error!(id = %short_id(id), %err, "descriptor lookup failed");
                None
            }
        }
    }

    /// Replaces whatever is known about the container with `descriptor` and starts supervising
    /// it: the old supervisor is stopped, the descriptor stored, a new supervisor spawned.
    pub async fn place(&self, descriptor: Descriptor) -> Result<(), UpkeepError> {
        if !descriptor.is_trackable() {
            warn!(id = %short_id(&descriptor.container_id), "not tracking container");
            return Ok(());
        }

        let mut records = self.records.lock().await;
        let id = descriptor.container_id.clone();
        if let Some(mut old) = records.remove(&id) {
            old.stop().await;
        }
        if let Err(err) = self.descriptors.set(&id, descriptor.clone()) {
            error!(id = %short_id(&id), %err, "descriptor store failed");
            return Err(err);
        }
        self.spawn(&mut records, descriptor)
    }

    /// Starts a fresh supervisor for `descriptor`, replacing a running one for the same id.
    /// An unusable descriptor is logged and leaves the current state untouched.
    pub async fn register(&self, descriptor: Descriptor) -> Result<(), UpkeepError> {
        if !descriptor.is_trackable() {
            warn!(id = %short_id(&descriptor.container_id), "not tracking container");
            return Ok(());
        }

        let mut records = self.records.lock().await;
        if let Some(mut old) = records.remove(&descriptor.container_id) {
            if old.is_running() {
                warn!(
                    id = %short_id(&descriptor.container_id),
                    srv = %old.service,
                    "inconsistent record"
                );
            }
            old.stop().await;
        }
        self.spawn(&mut records, descriptor)
    }

    /// Re-registers the stored descriptor for `id`. Returns whether one was found.
    pub async fn resume(&self, id: &str) -> Result<bool, UpkeepError> {
        match self.get(id) {
            Some(descriptor) => self.register(descriptor).await.map(|()| true),
            None => Ok(false),
        }
    }

    /// Stops the supervisor but keeps its bookkeeping, for containers that may restart.
    pub async fn suspend(&self, id: &str) {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(id) {
            record.stop().await;
            debug!(id = %short_id(id), srv = %record.service, "suspend");
        }
    }

    /// Stops the supervisor and forgets the container.
    pub async fn unregister(&self, id: &str) {
        let mut records = self.records.lock().await;
        if let Some(mut record) = records.remove(id) {
            record.stop().await;
            warn!(id = %short_id(id), srv = %record.service, "die");
        }
        if let Err(err) = self.descriptors.del(id) {
            error!(id = %short_id(id), %err, "descriptor removal failed");
        }
    }

    /// Dispatches one container lifecycle event.
    pub async fn handle_event(&self, event: LifecycleEvent) -> Result<(), UpkeepError> {
        match event {
            LifecycleEvent::Start(meta) => {
                if self.resume(&meta.id).await? {
                    return Ok(());
                }
                match Descriptor::from_metadata(&meta) {
                    Some(descriptor) => self.place(descriptor).await,
                    None => Ok(()),
                }
            }
            LifecycleEvent::Die(id) => {
                self.suspend(&id).await;
                Ok(())
            }
            LifecycleEvent::Destroy(id) => {
                self.unregister(&id).await;
                Ok(())
            }
        }
    }

    /// Latest status published by the supervisor of `id`.
    pub async fn status(&self, id: &str) -> Option<SupervisorStatus> {
        let records = self.records.lock().await;
        records.get(id).map(|r| r.status.borrow().clone())
    }

    pub async fn is_active(&self, id: &str) -> bool {
        let records = self.records.lock().await;
        records.get(id).is_some_and(RunningRecord::is_running)
    }

    pub async fn active_count(&self) -> usize {
        let records = self.records.lock().await;
        records.values().filter(|r| r.is_running()).count()
    }

    /// Cancels every supervisor and waits for all of them to exit.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let mut records = self.records.lock().await;
        for record in records.values_mut() {
            record.stop().await;
        }
        debug!(count = records.len(), "registry shut down");
    }

    fn spawn(
        &self,
        records: &mut HashMap<String, RunningRecord>,
        descriptor: Descriptor,
    ) -> Result<(), UpkeepError> {
        let id = descriptor.container_id.clone();
        let span = info_span!("supervisor", id = %short_id(&id), srv = %descriptor.service);
        let entered = span.enter();

        let keys = descriptor.lease_keys(&self.config.advertise);
        let Some(endpoint) = descriptor.probe_target(&keys) else {
            warn!("not tracking container");
            return Ok(());
        };

        let driver = match self
            .allocator
            .allocate(descriptor.probe_type.as_deref(), &endpoint)
        {
            Ok(driver) => driver,
            Err(err) => {
                error!(%err, "-register");
                return Err(err);
            }
        };

        let value = LeaseValue {
            advertise: &self.config.advertise,
            service: &descriptor.service,
            container: &descriptor.container_id,
        };
        let value = match value.to_json() {
            Ok(value) => value,
            Err(err) => {
                error!(%err, "-register");
                return Err(err);
            }
        };
        let lease = Lease::new(keys, value, descriptor.ttl);
        let service = descriptor.service.clone();
        let cancel = self.root.child_token();
        let deadlines = Deadlines {
            upkeep: self.config.upkeep_timeout,
            probe: self.config.probe_timeout,
        };

        let (supervisor, status) = Supervisor::new(
            Arc::new(descriptor),
            lease,
            Arc::clone(&self.leases),
            driver,
            self.config.max_fail_attempts,
            deadlines,
            cancel.clone(),
        );
        let supervisor = supervisor.with_proxy(Arc::clone(&self.proxy));
        debug!(%endpoint, "+register");
        drop(entered);

        let task = tokio::spawn(supervisor.run().instrument(span));
        records.insert(
            id,
            RunningRecord {
                service,
                cancel,
                task: Some(task),
                status,
            },
        );
        Ok(())
    }
}
