//! Fault injector control for oomsweep
//!
//! This crate drives an allocation-failure injector:
//! - FaultInjector: the six-call control interface
//! - Overthrower: binding to the injector preloaded into the process
//! - SimulatedInjector: in-process injector for self-tests
//! - FaultInjectorSession: activation lifecycle and nested pause/resume

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod control;
pub mod overthrower;
pub mod session;
pub mod simulated;
pub mod testing;

pub use control::FaultInjector;
pub use overthrower::Overthrower;
pub use session::{FaultInjectorSession, PauseGuard};
pub use simulated::{AllocationGate, BlockId, InjectorStats, SimulatedInjector};
