//! Runtime configuration for the simulation server.

use std::path::Path;
use std::time::Duration;

use glam::DVec3;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{SimError, SimResult};

/// Top-level configuration. Every field has a sensible default so a bare
/// `SimConfig::default()` yields a runnable single-process setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Target tick period in seconds.
    pub tick_period: f64,
    /// Number of fixed sub-steps a worker subdivides one tick into.
    pub max_substeps: u32,
    /// Per-worker-request timeout in seconds.
    pub worker_timeout: f64,
    /// Global dispatch deadline as a multiple of the tick period.
    pub deadline_multiplier: f64,
    /// Number of in-process solver workers to spawn.
    pub pool_size: usize,
    /// Per-worker request queue depth; in-flight requests are bounded by
    /// `pool_size * queue_depth`.
    pub queue_depth: usize,
    /// Capacity of the command intake queue.
    pub command_queue_capacity: usize,
    /// Islands larger than this are still dispatched whole, but logged.
    pub max_island: usize,
    /// CAS retry budget for command application.
    pub k_retries: u32,
    /// Orientation drift beyond which quaternions are renormalized.
    pub quaternion_renorm_eps: f64,
    /// Ambient force grid layout.
    pub force_grid: GridConfig,
    /// Sleep thresholds.
    pub sleep: SleepConfig,
    /// Endpoint addresses for the collaborating services.
    pub endpoints: EndpointConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_period: 0.05,
            max_substeps: 10,
            worker_timeout: 1.0,
            deadline_multiplier: 3.0,
            pool_size: 3,
            queue_depth: 4,
            command_queue_capacity: 512,
            max_island: 256,
            k_retries: 3,
            quaternion_renorm_eps: 1e-9,
            force_grid: GridConfig::default(),
            sleep: SleepConfig::default(),
            endpoints: EndpointConfig::default(),
        }
    }
}

impl SimConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> SimResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let cfg: SimConfig =
            serde_json::from_str(&text).map_err(|e| SimError::Validation(e.to_string()))?;
        cfg.validate()?;
        info!(path = %path.display(), "configuration loaded");
        Ok(cfg)
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> SimResult<()> {
        if self.tick_period <= 0.0 {
            return Err(SimError::Validation("tick_period must be positive".into()));
        }
        if self.max_substeps == 0 {
            return Err(SimError::Validation("max_substeps must be at least 1".into()));
        }
        if self.worker_timeout <= 0.0 {
            return Err(SimError::Validation("worker_timeout must be positive".into()));
        }
        if self.deadline_multiplier < 1.0 {
            return Err(SimError::Validation(
                "deadline_multiplier must be at least 1".into(),
            ));
        }
        if self.force_grid.spacing <= 0.0 {
            return Err(SimError::Validation("force_grid.spacing must be positive".into()));
        }
        Ok(())
    }

    /// Tick period as a [`Duration`].
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(self.tick_period)
    }

    /// Per-request worker timeout as a [`Duration`].
    pub fn worker_timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.worker_timeout)
    }

    /// Global dispatch deadline for one tick.
    pub fn tick_deadline(&self) -> Duration {
        Duration::from_secs_f64(self.tick_period * self.deadline_multiplier)
    }
}

/// Layout of the ambient force grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// World position of the lattice corner.
    pub origin: DVec3,
    /// Cell edge length.
    pub spacing: f64,
    /// Cell counts per axis.
    pub dims: [usize; 3],
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            origin: DVec3::splat(-64.0),
            spacing: 1.0,
            dims: [128, 128, 128],
        }
    }
}

/// Velocity thresholds below which a body is put to sleep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SleepConfig {
    /// Linear speed threshold.
    pub linear: f64,
    /// Angular speed threshold.
    pub angular: f64,
    /// Consecutive quiet ticks before the body sleeps.
    pub ticks: u32,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            linear: 0.05,
            angular: 0.05,
            ticks: 10,
        }
    }
}

/// Addresses of the collaborating services. `None` disables the listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// TCP address the worker broker listens on for remote workers.
    pub worker_addr: Option<String>,
    /// Address the command intake is reachable at (façade-facing).
    pub command_addr: Option<String>,
    /// Address of the change/contact feed (façade-facing).
    pub feed_addr: Option<String>,
}
