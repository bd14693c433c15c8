// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Runtime owner of one container's liveness.
//!
//! A [`Supervisor`] opens the service's proxy routes and writes its lease once when it starts,
//! then loops over two independent
//! timers: the heartbeat rewrites the lease keys, the probe feeds the [`FailureGate`]. Every I/O
//! call runs in its own short-lived task and is raced against its deadline and against the
//! supervisor's cancellation token, so a slow store or a hung probe never stalls the loop.
//!
//! When the gate closes the next heartbeat skips the write and relaxes the guard, letting the
//! lease lapse through its TTL. Once a probe succeeds again the following heartbeat recreates
//! the keys. Cancellation is the only way a supervisor stops.

use crate::descriptor::Descriptor;
use crate::driver::ProbeDriver;
use crate::gate::FailureGate;
use crate::lease::{ExistenceGuard, Lease, LeaseStore};
use crate::proxy::{NoopProxy, ProxyConfigurator};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// Shortest timer period a supervisor accepts.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Time limits for the I/O a supervisor performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    /// One heartbeat cycle against the store
    pub upkeep: Duration,
    /// One probe
    pub probe: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeartbeatOutcome {
    /// Every key was written
    Refreshed,
    /// A write failed; the remaining keys were skipped
    Failed,
    /// The store did not answer before the deadline
    TimedOut,
    /// The failure gate is closed, nothing was written
    Relaxed,
    /// The supervisor was cancelled mid-cycle
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProbeOutcome {
    Healthy,
    /// Probe reported an error; carries the failure streak
    Unhealthy(u32),
    /// Probe did not finish before the deadline; carries the failure streak
    TimedOut(u32),
    Cancelled,
}

/// Snapshot published by a supervisor after every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorStatus {
    pub service: String,
    pub keys: Vec<String>,
    pub healthy: bool,
    pub failures: u32,
    pub guard: ExistenceGuard,
    pub last_heartbeat: Option<HeartbeatOutcome>,
}

enum Bounded<T> {
    Done(T),
    TimedOut,
    Cancelled,
    /// The task went away without reporting, e.g. it panicked
    Lost,
}

/// Runs `op` in its own task and waits for it until `deadline` or cancellation, whichever comes
/// first. A task that loses the race is aborted and whatever it would have reported is dropped.
async fn bounded<T, F>(cancel: &CancellationToken, deadline: Instant, op: F) -> Bounded<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        let _ = tx.send(op.await);
    });

    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => Bounded::Cancelled,
        res = rx => match res {
            Ok(value) => Bounded::Done(value),
            Err(_) => Bounded::Lost,
        },
        () = tokio::time::sleep_until(deadline) => Bounded::TimedOut,
    };

    if !matches!(result, Bounded::Done(_)) {
        task.abort();
    }
    result
}

pub struct Supervisor {
    descriptor: Arc<Descriptor>,
    lease: Lease,
    store: Arc<dyn LeaseStore>,
    driver: Arc<dyn ProbeDriver>,
    proxy: Arc<dyn ProxyConfigurator>,
    gate: FailureGate,
    deadlines: Deadlines,
    cancel: CancellationToken,
    status: watch::Sender<SupervisorStatus>,
}

impl Supervisor {
    pub fn new(
        descriptor: Arc<Descriptor>,
        lease: Lease,
        store: Arc<dyn LeaseStore>,
        driver: Arc<dyn ProbeDriver>,
        max_fail_attempts: u32,
        deadlines: Deadlines,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<SupervisorStatus>) {
        let gate = FailureGate::new(max_fail_attempts);
        let (status, status_rx) = watch::channel(SupervisorStatus {
            service: descriptor.service.clone(),
            keys: lease.keys().to_vec(),
            healthy: gate.pass(),
            failures: gate.count(),
            guard: lease.guard(),
            last_heartbeat: None,
        });

        let supervisor = Self {
            descriptor,
            lease,
            store,
            driver,
            proxy: Arc::new(NoopProxy),
            gate,
            deadlines,
            cancel,
            status,
        };
        (supervisor, status_rx)
    }

    /// Replaces the proxy configurator called once when the supervisor starts.
    pub fn with_proxy(mut self, proxy: Arc<dyn ProxyConfigurator>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    pub fn gate(&self) -> &FailureGate {
        &self.gate
    }

    /// Main loop. Returns once the cancellation token fires.
    pub async fn run(mut self) {
        let heartbeat_period = self.descriptor.heartbeat.max(MIN_INTERVAL);
        let probe_period = self.descriptor.probe_interval.max(MIN_INTERVAL);
        info!(
            heartbeat = ?heartbeat_period,
            ttl = ?self.descriptor.ttl,
            probe = ?probe_period,
            "start"
        );

        if !self.open_proxy().await || self.keep().await == HeartbeatOutcome::Cancelled {
            info!("down");
            return;
        }

        let start = Instant::now();
        let mut heartbeat = interval_at(start + heartbeat_period, heartbeat_period);
        let mut probe = interval_at(start + probe_period, probe_period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = heartbeat.tick() => {
                    self.heartbeat().await;
                }
                _ = probe.tick() => {
                    self.probe().await;
                }
            }
        }
        info!("down");
    }

    /// Opens the proxy routes of the service. Returns false only when cancelled.
    async fn open_proxy(&mut self) -> bool {
        let deadline = Instant::now() + self.deadlines.upkeep;
        let proxy = Arc::clone(&self.proxy);
        let descriptor = Arc::clone(&self.descriptor);
        let op = async move {
            proxy
                .open(descriptor.proxy_cfg.as_deref(), &descriptor.proxy)
                .await
        };

        match bounded(&self.cancel, deadline, op).await {
            Bounded::Done(Ok(())) => debug!("proxy ready"),
            Bounded::Done(Err(err)) => error!(%err, "proxy setup failed"),
            Bounded::TimedOut => error!(timeout = ?self.deadlines.upkeep, "proxy setup timed out"),
            Bounded::Lost => error!("proxy setup task aborted"),
            Bounded::Cancelled => return false,
        }
        true
    }

    /// One heartbeat cycle: refresh the lease, or let it lapse while the gate is closed.
    pub async fn heartbeat(&mut self) -> HeartbeatOutcome {
        if !self.gate.pass() {
            self.lease.relax();
            error!(fail = self.gate.count(), "service unhealthy, letting lease lapse");
            self.publish(Some(HeartbeatOutcome::Relaxed));
            return HeartbeatOutcome::Relaxed;
        }
        self.keep().await
    }

    async fn keep(&mut self) -> HeartbeatOutcome {
        let deadline = Instant::now() + self.deadlines.upkeep;
        let op = self.lease.keep(Arc::clone(&self.store), deadline);

        let outcome = match bounded(&self.cancel, deadline, op).await {
            Bounded::Done(kept) => {
                self.lease.apply(&kept);
                match kept.result {
                    Ok(()) => {
                        debug!(keys = ?self.lease.keys(), "lease refreshed");
                        HeartbeatOutcome::Refreshed
                    }
                    Err(err) => {
                        error!(%err, written = kept.written, "lease refresh failed");
                        HeartbeatOutcome::Failed
                    }
                }
            }
            Bounded::TimedOut => {
                self.lease.relax();
                error!(timeout = ?self.deadlines.upkeep, "lease refresh timed out");
                HeartbeatOutcome::TimedOut
            }
            Bounded::Lost => {
                self.lease.relax();
                error!("lease refresh task aborted");
                HeartbeatOutcome::Failed
            }
            Bounded::Cancelled => return HeartbeatOutcome::Cancelled,
        };

        self.publish(Some(outcome));
        outcome
    }

    /// One probe cycle, feeding the failure gate.
    pub async fn probe(&mut self) -> ProbeOutcome {
        let deadline = Instant::now() + self.deadlines.probe;
        let driver = Arc::clone(&self.driver);
        let op = async move { driver.probe(deadline).await };

        let outcome = match bounded(&self.cancel, deadline, op).await {
            Bounded::Done(Ok(())) => {
                self.gate.good();
                debug!("probe ok");
                ProbeOutcome::Healthy
            }
            Bounded::Done(Err(err)) => {
                let count = self.gate.bad();
                warn!(%err, fail = count, "probe failed");
                ProbeOutcome::Unhealthy(count)
            }
            Bounded::TimedOut => {
                let count = self.gate.bad();
                warn!(timeout = ?self.deadlines.probe, fail = count, "probe timed out");
                ProbeOutcome::TimedOut(count)
            }
            Bounded::Lost => {
                let count = self.gate.bad();
                warn!(fail = count, "probe task aborted");
                ProbeOutcome::Unhealthy(count)
            }
            Bounded::Cancelled => return ProbeOutcome::Cancelled,
        };

        self.publish(None);
        outcome
    }

    fn publish(&self, heartbeat: Option<HeartbeatOutcome>) {
        let healthy = self.gate.pass();
        let failures = self.gate.count();
        let guard = self.lease.guard();
        self.status.send_modify(|status| {
            status.healthy = healthy;
            status.failures = failures;
            status.guard = guard;
            if heartbeat.is_some() {
                status.last_heartbeat = heartbeat;
            }
        });
    }
}
