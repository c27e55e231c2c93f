//! When a transaction commit goes through a namespace copy.

use crate::config::NamespaceConfig;

/// Copy-on-write thresholds, swapped as a whole on config updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyPolicy {
    /// Minimum transaction size that may trigger a copy.
    pub start_copy_policy_tx_size: u32,
    /// A copy happens when `items <= multiplier * steps`.
    pub copy_policy_multiplier: u32,
    /// Transactions at least this large always copy.
    pub tx_size_to_always_copy: u32,
}

impl Default for CopyPolicy {
    fn default() -> Self {
        Self::from(&NamespaceConfig::default())
    }
}

impl From<&NamespaceConfig> for CopyPolicy {
    fn from(config: &NamespaceConfig) -> Self {
        Self {
            start_copy_policy_tx_size: config.start_copy_policy_tx_size,
            copy_policy_multiplier: config.copy_policy_multiplier,
            tx_size_to_always_copy: config.tx_size_to_always_copy,
        }
    }
}

impl CopyPolicy {
    /// Returns true if a transaction of `steps` steps against a namespace
    /// holding `items` items should be committed on a copy.
    #[must_use]
    pub fn need_copy(&self, steps: usize, items: usize) -> bool {
        let steps = steps as u64;
        let items = items as u64;
        (steps >= u64::from(self.start_copy_policy_tx_size)
            && items <= u64::from(self.copy_policy_multiplier) * steps)
            || steps >= u64::from(self.tx_size_to_always_copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds() {
        let p = CopyPolicy::default();
        assert!(!p.need_copy(9_999, 0));
        assert!(p.need_copy(10_000, 0));
        assert!(p.need_copy(10_000, 50_000));
        assert!(!p.need_copy(10_000, 50_001));
        assert!(p.need_copy(100_000, 10_000_000));
    }

    #[test]
    fn from_config() {
        let config = NamespaceConfig::new()
            .start_copy_policy_tx_size(10)
            .copy_policy_multiplier(2)
            .tx_size_to_always_copy(1_000);
        let p = CopyPolicy::from(&config);
        assert!(p.need_copy(10, 20));
        assert!(!p.need_copy(10, 21));
        assert!(p.need_copy(1_000, 1_000_000));
    }
}
