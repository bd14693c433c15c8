// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::descriptor::Descriptor;
use crate::error::UpkeepError;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Lookup of descriptors by container id. Survives suspension of a supervisor so a restarted
/// container can be resumed without inspecting it again.
pub trait DescriptorStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<Descriptor>, UpkeepError>;
    fn set(&self, id: &str, descriptor: Descriptor) -> Result<(), UpkeepError>;
    fn del(&self, id: &str) -> Result<(), UpkeepError>;
}

#[derive(Debug, Default)]
pub struct MemoryDescriptorStore {
    descriptors: Mutex<HashMap<String, Descriptor>>,
}

impl MemoryDescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.descriptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DescriptorStore for MemoryDescriptorStore {
    fn get(&self, id: &str) -> Result<Option<Descriptor>, UpkeepError> {
        let descriptors = self
            .descriptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(descriptors.get(id).cloned())
    }

    fn set(&self, id: &str, descriptor: Descriptor) -> Result<(), UpkeepError> {
        let mut descriptors = self
            .descriptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        descriptors.insert(id.to_string(), descriptor);
        Ok(())
    }

    fn del(&self, id: &str) -> Result<(), UpkeepError> {
        let mut descriptors = self
            .descriptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        descriptors.remove(id);
        Ok(())
    }
}
