// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Errors that can occur while supervising service leases
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpkeepError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to allocate probe driver: {0}")]
    DriverAllocation(String),

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Lease write for {key} failed: {reason}")]
    LeaseWrite { key: String, reason: String },

    #[error("Lease {0} is not present in the store")]
    LeaseMissing(String),

    #[error("Deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("Failed to encode lease value: {0}")]
    LeaseValue(String),

    #[error("Proxy setup failed: {0}")]
    Proxy(String),

    #[error("Descriptor store error: {0}")]
    DescriptorStore(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}
