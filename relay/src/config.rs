//! Pipeline configuration.

use serde::{Deserialize, Serialize};

use crate::dispatcher::Route;
use crate::stage::Role;
use crate::topology::CpuConfig;

/// Shape of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Slots in every buffer.
    pub buffer_capacity: usize,
    /// Size of the operation id space and of the results table.
    pub max_ops: usize,
    pub clients: usize,
    pub proxies: usize,
    pub servers: usize,
    /// Client selection for dispatched operations.
    pub route: Route,
    /// Placement of stage threads.
    pub cpu: CpuConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 8,
            max_ops: 1024,
            clients: 1,
            proxies: 1,
            servers: 1,
            route: Route::RoundRobin,
            cpu: CpuConfig::Auto,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("buffer capacity must be at least 1")]
    ZeroCapacity,
    #[error("max_ops must be at least 1")]
    ZeroMaxOps,
    #[error("max_ops {0} exceeds the operation id space ({max})", max = i32::MAX)]
    MaxOpsTooLarge(usize),
    #[error("at least one {0} instance is required")]
    NoInstances(Role),
}

impl PipelineConfig {
    /// Number of instances configured for `role`.
    #[must_use]
    pub const fn instances(&self, role: Role) -> usize {
        match role {
            Role::Client => self.clients,
            Role::Proxy => self.proxies,
            Role::Server => self.servers,
        }
    }

    /// Total stage threads the pipeline will spawn.
    #[must_use]
    pub const fn stage_threads(&self) -> usize {
        self.clients + self.proxies + self.servers
    }

    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.max_ops == 0 {
            return Err(ConfigError::ZeroMaxOps);
        }
        if i32::try_from(self.max_ops).is_err() {
            return Err(ConfigError::MaxOpsTooLarge(self.max_ops));
        }
        if let Some(role) = Role::ALL.into_iter().find(|&role| self.instances(role) == 0) {
            return Err(ConfigError::NoInstances(role));
        }
        Ok(())
    }
}
