//! Control interface of the allocation-failure injector
//!
//! The injector lives outside this workspace. It intercepts the process
//! allocator and denies requests according to its configured strategy; the
//! harness only ever drives it through the six calls below.

use oomsweep_core::{HarnessResult, InjectorConfig};

/// Control surface of an allocation-failure injector
///
/// Implementations do not police call order. Protocol checks (double
/// activation, unbalanced resume) belong to
/// [`FaultInjectorSession`](crate::FaultInjectorSession).
pub trait FaultInjector {
    /// Push a configuration through the injector's configuration channel.
    ///
    /// Called once per session, before activation.
    fn configure(&mut self, config: &InjectorConfig) -> HarnessResult<()>;

    /// Remove everything `configure` installed
    fn clear_configuration(&mut self);

    /// Begin intercepting allocations
    fn activate(&mut self);

    /// Stop intercepting and return the number of allocations made while
    /// active that were never freed
    fn deactivate(&mut self) -> u32;

    /// Suspend injection. `0` suspends until the matching `resume`; any
    /// other value shields that many allocation decisions.
    fn pause(&mut self, duration: u32);

    /// End the most recent pause
    fn resume(&mut self);
}
