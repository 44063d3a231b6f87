//! CPU topology detection and placement of stage threads.
//!
//! Stages spend most of their time parked on a semaphore, so pinning only
//! pays off when every stage thread can have a core to itself. Auto placement
//! therefore pins one thread per available core and leaves everything
//! unpinned on smaller machines.
//!
//! Uses `num_cpus` for core counts and `core_affinity` for pinning. On most
//! systems core IDs 0..N map to separate physical cores before SMT siblings
//! are enumerated.

use core_affinity::CoreId;
use serde::{Deserialize, Serialize};

/// CPU topology information detected at runtime.
#[derive(Debug, Clone)]
pub struct CpuTopology {
    /// Total logical cores (including SMT/hyperthreads).
    pub logical_cores: usize,
    /// Total physical cores.
    pub physical_cores: usize,
    /// Available core IDs for pinning.
    pub available_cores: Vec<usize>,
}

impl CpuTopology {
    /// Detects the CPU topology of the current system.
    #[must_use]
    pub fn detect() -> Self {
        let logical_cores = num_cpus::get();
        let physical_cores = num_cpus::get_physical();

        let available_cores = core_affinity::get_core_ids()
            .map(|ids| ids.into_iter().map(|id| id.id).collect())
            .unwrap_or_else(|| (0..logical_cores).collect());

        Self {
            logical_cores,
            physical_cores,
            available_cores,
        }
    }

    #[must_use]
    pub fn has_smt(&self) -> bool {
        self.logical_cores > self.physical_cores
    }

    /// One core per thread when physical cores allow it, otherwise none.
    #[must_use]
    pub fn select_placement(&self, threads: usize) -> ThreadPlacement {
        if threads == 0 || self.physical_cores < threads || self.available_cores.len() < threads {
            return ThreadPlacement::unpinned(threads);
        }
        ThreadPlacement {
            cores: self.available_cores.iter().take(threads).copied().map(Some).collect(),
            strategy: PlacementStrategy::Dedicated,
        }
    }
}

/// Core assignment for each stage thread, in spawn order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadPlacement {
    cores: Vec<Option<usize>>,
    pub strategy: PlacementStrategy,
}

impl ThreadPlacement {
    #[must_use]
    pub fn unpinned(threads: usize) -> Self {
        Self {
            cores: vec![None; threads],
            strategy: PlacementStrategy::NoPin,
        }
    }

    /// Core for the `thread`-th stage thread; `None` means unpinned.
    #[must_use]
    pub fn core_for(&self, thread: usize) -> Option<usize> {
        self.cores.get(thread).copied().flatten()
    }

    /// Number of threads that will be pinned.
    #[must_use]
    pub fn pinned(&self) -> usize {
        self.cores.iter().flatten().count()
    }
}

/// Strategy used for thread placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementStrategy {
    /// Every stage thread on its own core.
    Dedicated,
    /// No pinning (fallback).
    NoPin,
    /// Manual assignment by user.
    Manual,
}

impl std::fmt::Display for PlacementStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dedicated => write!(f, "dedicated"),
            Self::NoPin => write!(f, "no-pin"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Configuration for CPU pinning behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuConfig {
    /// Auto-detect topology and pin when there is a core per thread.
    #[default]
    Auto,
    /// Explicit cores in spawn order (clients, then proxies, then servers).
    /// Threads past the end of the list are unpinned.
    Manual(Vec<usize>),
    /// Disable CPU pinning entirely.
    Disabled,
}

impl CpuConfig {
    /// Resolves the config to a concrete placement for `threads` threads.
    #[must_use]
    pub fn resolve(&self, threads: usize) -> ThreadPlacement {
        match self {
            Self::Auto => CpuTopology::detect().select_placement(threads),
            Self::Manual(cores) => ThreadPlacement {
                cores: (0..threads).map(|i| cores.get(i).copied()).collect(),
                strategy: PlacementStrategy::Manual,
            },
            Self::Disabled => ThreadPlacement::unpinned(threads),
        }
    }
}

/// Pins the current thread to the specified core.
///
/// Returns `true` if pinning succeeded, `false` otherwise.
/// Pinning may fail if the core ID is invalid or the OS denies the request.
pub fn pin_to_core(core_id: usize) -> bool {
    core_affinity::set_for_current(CoreId { id: core_id })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_detection_returns_valid_counts() {
        let topo = CpuTopology::detect();

        assert!(topo.logical_cores > 0, "should have at least 1 logical core");
        assert!(topo.physical_cores > 0, "should have at least 1 physical core");
        assert!(!topo.available_cores.is_empty(), "should have available cores");
        assert_eq!(topo.has_smt(), topo.logical_cores > topo.physical_cores);
    }

    #[test]
    fn auto_placement_uses_distinct_available_cores() {
        let topo = CpuTopology::detect();
        let placement = topo.select_placement(1);

        assert_eq!(placement.strategy, PlacementStrategy::Dedicated);
        let core = placement.core_for(0).unwrap();
        assert!(topo.available_cores.contains(&core));
    }

    #[test]
    fn oversubscribed_auto_placement_does_not_pin() {
        let topo = CpuTopology::detect();
        let threads = topo.physical_cores + 1;
        let placement = topo.select_placement(threads);

        assert_eq!(placement.strategy, PlacementStrategy::NoPin);
        assert_eq!(placement.pinned(), 0);
    }

    #[test]
    fn cpu_config_disabled_returns_unpinned() {
        let placement = CpuConfig::Disabled.resolve(3);

        assert_eq!(placement.pinned(), 0);
        assert_eq!(placement.core_for(2), None);
        assert_eq!(placement.strategy, PlacementStrategy::NoPin);
    }

    #[test]
    fn cpu_config_manual_uses_specified_cores() {
        let placement = CpuConfig::Manual(vec![5, 6]).resolve(3);

        assert_eq!(placement.core_for(0), Some(5));
        assert_eq!(placement.core_for(1), Some(6));
        assert_eq!(placement.core_for(2), None);
        assert_eq!(placement.pinned(), 2);
        assert_eq!(placement.strategy, PlacementStrategy::Manual);
    }
}
