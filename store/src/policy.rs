//! Adapter selection.

use crate::config::DEFAULT_UPGRADE_THRESHOLD;

/// Record counts an [`AdapterPolicy`] decides from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterCounts {
    /// Records held by the current primary
    pub primary: usize,
    /// Records held by the upgrade target, when one is configured
    pub target: Option<usize>,
}

/// What the store should do with its primary adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterChoice {
    /// Keep the current primary
    Primary,
    /// Copy everything into the target and switch to it
    Upgrade,
    /// Switch to the target as is; it already holds the data
    Target,
}

/// Decides which adapter backs the store.
pub trait AdapterPolicy: Send + Sync {
    fn choose(&self, counts: &AdapterCounts) -> AdapterChoice;
}

/// Upgrade once the primary holds more than `threshold` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdPolicy {
    pub threshold: usize,
}

impl ThresholdPolicy {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_UPGRADE_THRESHOLD)
    }
}

impl AdapterPolicy for ThresholdPolicy {
    fn choose(&self, counts: &AdapterCounts) -> AdapterChoice {
        match counts.target {
            None => AdapterChoice::Primary,
            Some(_) if counts.primary > self.threshold => AdapterChoice::Upgrade,
            // A previous run already moved the data.
            Some(target) if counts.primary == 0 && target > 0 => AdapterChoice::Target,
            Some(_) => AdapterChoice::Primary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(primary: usize, target: Option<usize>) -> AdapterCounts {
        AdapterCounts { primary, target }
    }

    #[test]
    fn threshold_is_exclusive() {
        let policy = ThresholdPolicy::default();
        assert_eq!(policy.choose(&counts(5000, Some(0))), AdapterChoice::Primary);
        assert_eq!(policy.choose(&counts(5001, Some(0))), AdapterChoice::Upgrade);
    }

    #[test]
    fn no_target_never_moves() {
        let policy = ThresholdPolicy::new(1);
        assert_eq!(policy.choose(&counts(100, None)), AdapterChoice::Primary);
    }

    #[test]
    fn populated_target_is_reused() {
        let policy = ThresholdPolicy::new(10);
        assert_eq!(policy.choose(&counts(0, Some(20))), AdapterChoice::Target);
        assert_eq!(policy.choose(&counts(0, Some(0))), AdapterChoice::Primary);
    }
}
