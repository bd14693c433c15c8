// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Consecutive-failure counter. Saturates instead of wrapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureGate {
    count: u32,
    max: u32,
}

impl FailureGate {
    pub fn new(max: u32) -> Self {
        Self { count: 0, max }
    }

    /// Resets the failure streak.
    pub fn good(&mut self) {
        self.count = 0;
    }

    /// Records a failure and returns the streak length.
    pub fn bad(&mut self) -> u32 {
        self.count = self.count.saturating_add(1);
        self.count
    }

    /// True while fewer than `max` failures happened in a row.
    pub fn pass(&self) -> bool {
        self.count < self.max
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_after_max_failures() {
        let mut gate = FailureGate::new(3);
        assert!(gate.pass());
        assert_eq!(gate.bad(), 1);
        assert_eq!(gate.bad(), 2);
        assert!(gate.pass());
        assert_eq!(gate.bad(), 3);
        assert!(!gate.pass());
    }

    #[test]
    fn test_good_resets_streak() {
        let mut gate = FailureGate::new(3);
        gate.bad();
        gate.bad();
        gate.good();
        gate.bad();
        gate.bad();
        assert!(gate.pass());
        assert_eq!(gate.count(), 2);
    }

    #[test]
    fn test_recovers_after_exhaustion() {
        let mut gate = FailureGate::new(3);
        for _ in 0..5 {
            gate.bad();
        }
        assert!(!gate.pass());
        gate.good();
        assert!(gate.pass());
    }

    #[test]
    fn test_saturates() {
        let mut gate = FailureGate {
            count: u32::MAX - 1,
            max: 3,
        };
        assert_eq!(gate.bad(), u32::MAX);
        assert_eq!(gate.bad(), u32::MAX);
        assert!(!gate.pass());
    }
}
