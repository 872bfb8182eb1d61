//! Fault injection parameters
//!
//! An [`InjectorConfig`] is built once per session and handed to the injector
//! before activation. It never changes while the injector is active; switching
//! strategy means deactivating and starting a new session.

use crate::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};

/// Wire value of the "pause until resumed" sentinel.
pub const PAUSE_FOREVER: u32 = 0;

/// Duty cycle the simulated injector uses when no strategy is configured.
pub const DEFAULT_DUTY_CYCLE: u32 = 32;

/// Which allocation requests the injector denies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaultStrategy {
    /// Each unpaused allocation fails with probability `1 / duty_cycle`
    Random {
        /// Inverse failure probability; smaller means more failures
        duty_cycle: u32,
        /// Seed for a reproducible schedule
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seed: Option<u64>,
    },
    /// The first `delay` unpaused allocations succeed, then they fail
    Step {
        /// Successful allocations before the first failure
        delay: u64,
        /// Consecutive failures after the delay; unset keeps failing
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<u64>,
    },
}

impl FaultStrategy {
    /// Random strategy with an entropy-seeded schedule
    pub fn random(duty_cycle: u32) -> Self {
        FaultStrategy::Random {
            duty_cycle,
            seed: None,
        }
    }

    /// Step strategy that keeps failing after `delay` successes
    pub fn step(delay: u64) -> Self {
        FaultStrategy::Step {
            delay,
            duration: None,
        }
    }

    /// Injector-side identifier of the strategy kind
    pub fn kind_code(&self) -> u32 {
        match self {
            FaultStrategy::Random { .. } => 0,
            FaultStrategy::Step { .. } => 1,
        }
    }

    /// Reject parameters the injector cannot honour
    pub fn validate(&self) -> HarnessResult<()> {
        match self {
            FaultStrategy::Random { duty_cycle: 0, .. } => {
                Err(HarnessError::config("random strategy requires a duty cycle of at least 1"))
            }
            FaultStrategy::Step {
                duration: Some(0), ..
            } => Err(HarnessError::config("step strategy duration must be positive when set")),
            _ => Ok(()),
        }
    }
}

/// Configuration handed to the injector for one session
///
/// `strategy: None` leaves the injector on its own balanced default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectorConfig {
    /// Strategy for this activation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<FaultStrategy>,
}

impl InjectorConfig {
    /// Config selecting an explicit strategy
    pub fn with_strategy(strategy: FaultStrategy) -> Self {
        InjectorConfig {
            strategy: Some(strategy),
        }
    }

    /// Shorthand for a Step sweep iteration
    pub fn step(delay: u64) -> Self {
        Self::with_strategy(FaultStrategy::step(delay))
    }

    /// Shorthand for a Random activation
    pub fn random(duty_cycle: u32, seed: Option<u64>) -> Self {
        Self::with_strategy(FaultStrategy::Random { duty_cycle, seed })
    }

    /// Validate the selected strategy
    pub fn validate(&self) -> HarnessResult<()> {
        match &self.strategy {
            Some(strategy) => strategy.validate(),
            None => Ok(()),
        }
    }
}

/// How long a pause shields allocations from injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PauseDuration {
    /// No injection until the matching resume
    Forever,
    /// Shield the next `n` allocation decisions, then inject again.
    /// `Decisions(0)` shields nothing; it only occupies a stack slot.
    Decisions(u32),
}

impl PauseDuration {
    /// Grace window for retry attempt `index`
    pub fn grace(index: u64) -> Self {
        PauseDuration::Decisions(u32::try_from(index).unwrap_or(u32::MAX))
    }

    /// Decode the injector's wire value, where `0` means forever
    pub fn from_wire(duration: u32) -> Self {
        if duration == PAUSE_FOREVER {
            PauseDuration::Forever
        } else {
            PauseDuration::Decisions(duration)
        }
    }

    /// `true` for [`PauseDuration::Forever`]
    pub fn is_forever(self) -> bool {
        self == PauseDuration::Forever
    }

    /// Value to pass to the injector, or `None` if nothing needs forwarding
    pub fn wire(self) -> Option<u32> {
        match self {
            PauseDuration::Forever => Some(PAUSE_FOREVER),
            PauseDuration::Decisions(0) => None,
            PauseDuration::Decisions(n) => Some(n),
        }
    }
}
