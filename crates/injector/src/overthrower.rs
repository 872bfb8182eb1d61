//! Binding to an injector preloaded into the process
//!
//! The injector is a shared library injected with `LD_PRELOAD` (or
//! `DYLD_INSERT_LIBRARIES`). It exports four C entry points and reads its
//! strategy from environment variables at activation. Nothing links against
//! it: the entry points are resolved from the global symbol scope at
//! startup, and a missing one is reported immediately instead of turning
//! every control call into a silent no-op.

use crate::FaultInjector;
use once_cell::sync::OnceCell;
use oomsweep_core::{FaultStrategy, HarnessError, HarnessResult, InjectorConfig};
use std::ffi::CStr;
use std::os::raw::{c_uint, c_void};

/// Environment variable selecting the strategy (0 random, 1 step).
pub const ENV_STRATEGY: &str = "OVERTHROWER_STRATEGY";
/// Environment variable holding the Random strategy seed.
pub const ENV_SEED: &str = "OVERTHROWER_SEED";
/// Environment variable holding the Random strategy duty cycle.
pub const ENV_DUTY_CYCLE: &str = "OVERTHROWER_DUTY_CYCLE";
/// Environment variable holding the Step strategy delay.
pub const ENV_DELAY: &str = "OVERTHROWER_DELAY";
/// Environment variable holding the Step strategy failure duration.
pub const ENV_DURATION: &str = "OVERTHROWER_DURATION";

const ALL_ENV: [&str; 5] = [ENV_STRATEGY, ENV_SEED, ENV_DUTY_CYCLE, ENV_DELAY, ENV_DURATION];

type ActivateFn = unsafe extern "C" fn();
type DeactivateFn = unsafe extern "C" fn() -> c_uint;
type PauseFn = unsafe extern "C" fn(c_uint);
type ResumeFn = unsafe extern "C" fn();

static BINDING: OnceCell<Result<Overthrower, String>> = OnceCell::new();

/// Resolved control entry points of the preloaded injector
#[derive(Clone, Copy)]
pub struct Overthrower {
    activate: ActivateFn,
    deactivate: DeactivateFn,
    pause: PauseFn,
    resume: ResumeFn,
}

impl std::fmt::Debug for Overthrower {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Overthrower").finish_non_exhaustive()
    }
}

impl Overthrower {
    /// Resolve the injector's entry points.
    ///
    /// The lookup runs once per process; later calls return the cached
    /// binding (or the cached failure).
    ///
    /// # Errors
    ///
    /// `InjectorUnavailable` naming the first missing symbol.
    pub fn resolve() -> HarnessResult<Self> {
        BINDING
            .get_or_init(Self::lookup)
            .clone()
            .map_err(HarnessError::InjectorUnavailable)
    }

    fn lookup() -> Result<Self, String> {
        // SAFETY: each symbol is exported by the injector with exactly the
        // C signature it is transmuted to here.
        unsafe {
            Ok(Overthrower {
                activate: std::mem::transmute::<*mut c_void, ActivateFn>(symbol(
                    c"activateOverthrower",
                )?),
                deactivate: std::mem::transmute::<*mut c_void, DeactivateFn>(symbol(
                    c"deactivateOverthrower",
                )?),
                pause: std::mem::transmute::<*mut c_void, PauseFn>(symbol(c"pauseOverthrower")?),
                resume: std::mem::transmute::<*mut c_void, ResumeFn>(symbol(
                    c"resumeOverthrower",
                )?),
            })
        }
    }
}

impl FaultInjector for Overthrower {
    fn configure(&mut self, config: &InjectorConfig) -> HarnessResult<()> {
        config.validate()?;
        self.clear_configuration();
        let Some(strategy) = &config.strategy else {
            return Ok(());
        };
        std::env::set_var(ENV_STRATEGY, strategy.kind_code().to_string());
        match strategy {
            FaultStrategy::Random { duty_cycle, seed } => {
                std::env::set_var(ENV_DUTY_CYCLE, duty_cycle.to_string());
                if let Some(seed) = seed {
                    std::env::set_var(ENV_SEED, seed.to_string());
                }
            }
            FaultStrategy::Step { delay, duration } => {
                std::env::set_var(ENV_DELAY, delay.to_string());
                if let Some(duration) = duration {
                    std::env::set_var(ENV_DURATION, duration.to_string());
                }
            }
        }
        Ok(())
    }

    fn clear_configuration(&mut self) {
        for name in ALL_ENV {
            std::env::remove_var(name);
        }
    }

    fn activate(&mut self) {
        // SAFETY: resolved from the injector; takes no arguments.
        unsafe { (self.activate)() }
    }

    fn deactivate(&mut self) -> u32 {
        // SAFETY: resolved from the injector; takes no arguments.
        unsafe { (self.deactivate)() }
    }

    fn pause(&mut self, duration: u32) {
        // SAFETY: resolved from the injector; any duration is accepted.
        unsafe { (self.pause)(duration) }
    }

    fn resume(&mut self) {
        // SAFETY: resolved from the injector; takes no arguments.
        unsafe { (self.resume)() }
    }
}

/// Look up `name` in the process's global symbol scope.
///
/// # Safety
///
/// The caller must cast the returned pointer to the symbol's real type.
#[cfg(unix)]
unsafe fn symbol(name: &CStr) -> Result<*mut c_void, String> {
    // Clear any previous error.
    dlerror();
    let ptr = dlsym(RTLD_DEFAULT, name.as_ptr());
    if ptr.is_null() {
        let err = dlerror();
        let reason = if err.is_null() {
            "not exported".to_string()
        } else {
            CStr::from_ptr(err).to_string_lossy().into_owned()
        };
        return Err(format!(
            "symbol {} not found ({}); is the injector preloaded?",
            name.to_string_lossy(),
            reason
        ));
    }
    Ok(ptr)
}

#[cfg(not(unix))]
unsafe fn symbol(name: &CStr) -> Result<*mut c_void, String> {
    Err(format!(
        "cannot resolve {}: symbol lookup not supported on this platform",
        name.to_string_lossy()
    ))
}

// --- Unix (Linux + macOS) bindings ---

#[cfg(all(unix, not(target_os = "macos")))]
const RTLD_DEFAULT: *mut c_void = std::ptr::null_mut();
#[cfg(target_os = "macos")]
const RTLD_DEFAULT: *mut c_void = -2isize as *mut c_void;

#[cfg(unix)]
extern "C" {
    fn dlsym(handle: *mut c_void, symbol: *const std::os::raw::c_char) -> *mut c_void;
    fn dlerror() -> *const std::os::raw::c_char;
}
