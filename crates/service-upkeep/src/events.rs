// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Line-delimited JSON feed of container lifecycle events.
//!
//! One [`LifecycleEvent`] per line: `{"start":{...}}`, `{"die":"<id>"}`, `{"destroy":"<id>"}`.
//! Malformed lines are logged and skipped.

use crate::registry::{LifecycleEvent, Registry};
use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, info, warn};

/// Why [`feed_events`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEnd {
    /// The reader reached end of input
    Closed,
    /// `shutdown` completed
    Interrupted,
    /// Reading failed
    ReadFailed,
}

/// Applies every event read from `reader` to `registry` until the input ends or `shutdown`
/// completes. `shutdown` is also observed while an event is being handled.
pub async fn feed_events<R, S>(registry: &Registry, reader: R, shutdown: S) -> FeedEnd
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    let mut lines = reader.lines();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            biased;
            () = &mut shutdown => {
                info!("interrupted");
                return FeedEnd::Interrupted;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("event stream closed");
                return FeedEnd::Closed;
            }
            Err(e) => {
                error!(err = %e, "failed to read events");
                return FeedEnd::ReadFailed;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let event = match serde_json::from_str::<LifecycleEvent>(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!(err = %e, "skipping malformed event");
                continue;
            }
        };
        debug!(?event, "event");

        tokio::select! {
            biased;
            () = &mut shutdown => {
                info!("interrupted");
                return FeedEnd::Interrupted;
            }
            res = registry.handle_event(event) => {
                if let Err(e) = res {
                    error!(err = %e, "event handling failed");
                }
            }
        }
    }
}
