use crate::bank::arrivals::{DEFAULT_BATCH_RANGE, DEFAULT_SPACING_RANGE};
use crate::bank::storage::DEFAULT_STORAGE_MAX;
use crate::bank::window::DEFAULT_SERVICE_RANGE;
use crate::{SimError, SimTime};

/// Federation and scenario parameters shared by every node.
///
/// Ranges are inclusive and mirror the branch being modelled: service and
/// inter-arrival spacing in 1..=10 ticks, produced/consumed batches in 1..=4.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub federation_name: String,
    pub lookahead: SimTime,
    pub terminal: SimTime,
    pub seed: u64,
    pub storage_max: u32,
    pub windows: u32,
    pub rebalance_interval: SimTime,
    pub service_range: (SimTime, SimTime),
    pub spacing_range: (SimTime, SimTime),
    pub batch_range: (u32, u32),
}

impl SimConfig {
    pub fn new(federation_name: impl Into<String>) -> Self {
        Self {
            federation_name: federation_name.into(),
            lookahead: 1,
            terminal: 200,
            seed: 0,
            storage_max: DEFAULT_STORAGE_MAX,
            windows: 2,
            rebalance_interval: 5,
            service_range: DEFAULT_SERVICE_RANGE,
            spacing_range: DEFAULT_SPACING_RANGE,
            batch_range: DEFAULT_BATCH_RANGE,
        }
    }

    /// Configure the simulated time bounds.
    pub fn with_time_bounds(mut self, terminal: SimTime, lookahead: SimTime) -> Self {
        self.terminal = terminal;
        self.lookahead = lookahead;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_storage_max(mut self, max: u32) -> Self {
        self.storage_max = max;
        self
    }

    pub fn with_windows(mut self, windows: u32) -> Self {
        self.windows = windows;
        self
    }

    pub fn with_rebalance_interval(mut self, interval: SimTime) -> Self {
        self.rebalance_interval = interval;
        self
    }

    /// Validate that all required fields have been configured sensibly.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.terminal == 0 {
            return Err(SimError::Config("terminal time must be positive".into()));
        }
        if self.lookahead == 0 {
            return Err(SimError::Config("lookahead must be at least one tick".into()));
        }
        if self.windows == 0 {
            return Err(SimError::Config("at least one window is required".into()));
        }
        if self.rebalance_interval == 0 {
            return Err(SimError::Config("rebalance interval must be positive".into()));
        }
        for (label, (lo, hi)) in [
            ("service", self.service_range),
            ("spacing", self.spacing_range),
        ] {
            if lo == 0 || hi < lo {
                return Err(SimError::Config(format!("bad {label} range [{lo}, {hi}]")));
            }
        }
        let (lo, hi) = self.batch_range;
        if lo == 0 || hi < lo {
            return Err(SimError::Config(format!("bad batch range [{lo}, {hi}]")));
        }
        Ok(())
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new("BankBranch")
    }
}
