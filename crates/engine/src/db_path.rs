//! Location of the database under test

use oomsweep_core::{HarnessError, HarnessResult};
use oomsweep_injector::{FaultInjector, FaultInjectorSession};
use oomsweep_storage::StorageLibrary;
use std::ffi::{CStr, CString};
use std::path::{Path, PathBuf};

/// Database path, also held as a C string so opening allocates nothing on
/// the harness side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabasePath {
    path: PathBuf,
    c_path: CString,
}

impl DatabasePath {
    /// Validate and convert `path`.
    ///
    /// # Errors
    ///
    /// Configuration error for paths that are not UTF-8 or contain NUL.
    pub fn new(path: impl Into<PathBuf>) -> HarnessResult<Self> {
        let path = path.into();
        let text = path
            .to_str()
            .ok_or_else(|| HarnessError::config(format!("database path {:?} is not UTF-8", path)))?;
        let c_path = CString::new(text)
            .map_err(|_| HarnessError::config(format!("database path {:?} contains NUL", path)))?;
        Ok(DatabasePath { path, c_path })
    }

    /// Filesystem path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// NUL-terminated path for the library
    pub fn as_c_str(&self) -> &CStr {
        &self.c_path
    }

    /// Delete the database with injection paused
    pub fn remove<I: FaultInjector, L: StorageLibrary>(
        &self,
        session: &mut FaultInjectorSession<I>,
        library: &L,
    ) -> HarnessResult<()> {
        session.quietly(|| library.remove_database(&self.path))?;
        Ok(())
    }
}
