//! In-process stand-in for the allocation-failure injector
//!
//! The real injector hooks `malloc`. This one only sees allocations that
//! are routed through an [`AllocationGate`], which is how the simulated
//! storage library allocates. Everything else about it follows the real
//! control interface: a configuration consumed at activation, a pause stack
//! whose top decides whether the next decision is shielded, and a count of
//! blocks still live at deactivation.
//!
//! # Example
//!
//! ```ignore
//! let injector = SimulatedInjector::seeded(7);
//! let gate = injector.gate();
//! // hand `gate` to the simulated library, `injector` to a session
//! ```

use crate::FaultInjector;
use oomsweep_core::{
    FaultStrategy, HarnessError, HarnessResult, InjectorConfig, PauseDuration, DEFAULT_DUTY_CYCLE,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

/// Identifier of one simulated heap block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u64);

/// Counters for one configured activation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InjectorStats {
    /// Allocation decisions taken while active
    pub decisions: u64,
    /// Decisions answered by a pause frame
    pub shielded: u64,
    /// Decisions the strategy denied
    pub denied: u64,
}

#[derive(Debug)]
enum Schedule {
    Random { rng: StdRng, duty_cycle: u32 },
    Step { delay: u64, burst: Option<u64> },
}

impl Schedule {
    fn from_config(config: &InjectorConfig, base_seed: Option<u64>) -> Self {
        match &config.strategy {
            None => Schedule::random(DEFAULT_DUTY_CYCLE, base_seed),
            Some(FaultStrategy::Random { duty_cycle, seed }) => {
                Schedule::random(*duty_cycle, seed.or(base_seed))
            }
            Some(FaultStrategy::Step { delay, duration }) => Schedule::Step {
                delay: *delay,
                burst: *duration,
            },
        }
    }

    fn random(duty_cycle: u32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Schedule::Random { rng, duty_cycle }
    }

    fn allows_next(&mut self) -> bool {
        match self {
            Schedule::Random { rng, duty_cycle } => !rng.gen_ratio(1, *duty_cycle),
            Schedule::Step { delay, burst } => {
                if *delay > 0 {
                    *delay -= 1;
                    return true;
                }
                match burst {
                    None => false,
                    Some(0) => true,
                    Some(remaining) => {
                        *remaining -= 1;
                        false
                    }
                }
            }
        }
    }
}

#[derive(Debug)]
struct InjectorState {
    base_seed: Option<u64>,
    schedule: Schedule,
    active: bool,
    pauses: Vec<PauseDuration>,
    live: HashSet<BlockId>,
    next_block: u64,
    stats: InjectorStats,
}

impl InjectorState {
    fn allows_next(&mut self) -> bool {
        if !self.active {
            return true;
        }
        self.stats.decisions += 1;
        match self.pauses.last_mut() {
            Some(PauseDuration::Forever) => {
                self.stats.shielded += 1;
                return true;
            }
            Some(PauseDuration::Decisions(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                self.stats.shielded += 1;
                return true;
            }
            _ => {}
        }
        let allowed = self.schedule.allows_next();
        if !allowed {
            self.stats.denied += 1;
        }
        allowed
    }
}

/// Simulated injector handle
///
/// Clones share state, so a test can keep one handle for inspection while a
/// session owns another.
#[derive(Debug, Clone)]
pub struct SimulatedInjector {
    state: Arc<Mutex<InjectorState>>,
}

impl Default for SimulatedInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedInjector {
    /// Injector whose unseeded Random schedules draw from entropy
    pub fn new() -> Self {
        Self::with_base_seed(None)
    }

    /// Injector whose unseeded Random schedules use `seed`
    pub fn seeded(seed: u64) -> Self {
        Self::with_base_seed(Some(seed))
    }

    fn with_base_seed(base_seed: Option<u64>) -> Self {
        SimulatedInjector {
            state: Arc::new(Mutex::new(InjectorState {
                base_seed,
                schedule: Schedule::from_config(&InjectorConfig::default(), base_seed),
                active: false,
                pauses: Vec::new(),
                live: HashSet::new(),
                next_block: 0,
                stats: InjectorStats::default(),
            })),
        }
    }

    /// Gate through which simulated allocations are routed
    pub fn gate(&self) -> AllocationGate {
        AllocationGate {
            state: Arc::clone(&self.state),
        }
    }

    /// Counters since the last `configure`
    pub fn stats(&self) -> InjectorStats {
        self.state.lock().stats
    }

    /// Whether allocations are currently intercepted
    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Depth of the injector-side pause stack
    pub fn pause_depth(&self) -> usize {
        self.state.lock().pauses.len()
    }

    /// Top of the injector-side pause stack
    pub fn current_pause(&self) -> Option<PauseDuration> {
        self.state.lock().pauses.last().copied()
    }

    /// Blocks allocated while active and not yet freed
    pub fn live_blocks(&self) -> usize {
        self.state.lock().live.len()
    }
}

impl FaultInjector for SimulatedInjector {
    fn configure(&mut self, config: &InjectorConfig) -> HarnessResult<()> {
        config.validate()?;
        let mut state = self.state.lock();
        if state.active {
            return Err(HarnessError::usage("cannot reconfigure an active injector"));
        }
        state.schedule = Schedule::from_config(config, state.base_seed);
        state.stats = InjectorStats::default();
        Ok(())
    }

    fn clear_configuration(&mut self) {
        let mut state = self.state.lock();
        state.schedule = Schedule::from_config(&InjectorConfig::default(), state.base_seed);
    }

    fn activate(&mut self) {
        let mut state = self.state.lock();
        state.active = true;
        state.live.clear();
    }

    fn deactivate(&mut self) -> u32 {
        let mut state = self.state.lock();
        state.active = false;
        let leaked = state.live.len();
        state.live.clear();
        u32::try_from(leaked).unwrap_or(u32::MAX)
    }

    fn pause(&mut self, duration: u32) {
        self.state
            .lock()
            .pauses
            .push(PauseDuration::from_wire(duration));
    }

    fn resume(&mut self) {
        if self.state.lock().pauses.pop().is_none() {
            warn!(target: "oomsweep::injector", "resume with an empty pause stack");
        }
    }
}

/// Allocation entry point handed to simulated libraries
#[derive(Debug, Clone)]
pub struct AllocationGate {
    state: Arc<Mutex<InjectorState>>,
}

impl AllocationGate {
    /// Request one block. `None` means the injector denied it.
    pub fn allocate(&self) -> Option<BlockId> {
        let mut state = self.state.lock();
        if !state.allows_next() {
            return None;
        }
        let block = BlockId(state.next_block);
        state.next_block += 1;
        if state.active {
            state.live.insert(block);
        }
        Some(block)
    }

    /// Return a block
    pub fn free(&self, block: BlockId) {
        self.state.lock().live.remove(&block);
    }
}
