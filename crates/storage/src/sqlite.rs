//! SQLite adapter over the raw C API
//!
//! Uses `rusqlite::ffi` rather than rusqlite's safe wrapper: the harness
//! has to see every raw result code, including the out-of-memory ones the
//! wrapper would fold into `rusqlite::Error`, and has to control exactly
//! when `sqlite3_close` and `sqlite3_finalize` run.

use crate::library::{Connection, Statement, StorageLibrary};
use oomsweep_core::Status;
use rusqlite::ffi;
use std::ffi::CStr;
use std::os::raw::c_int;
use std::ptr::{self, NonNull};

// Exported by the bundled sqlite3.c but absent from the generated bindings.
extern "C" {
    fn sqlite3_close_v2(db: *mut ffi::sqlite3) -> c_int;
}

/// The bundled SQLite library
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteLibrary;

impl SqliteLibrary {
    /// Version string of the linked SQLite
    pub fn version() -> &'static str {
        // SAFETY: sqlite3_libversion returns a static NUL-terminated string.
        unsafe { CStr::from_ptr(ffi::sqlite3_libversion()) }
            .to_str()
            .unwrap_or("unknown")
    }
}

impl StorageLibrary for SqliteLibrary {
    type Connection = SqliteConnection;

    fn open(&self, path: &CStr) -> (Status, Option<SqliteConnection>) {
        let mut db = ptr::null_mut();
        // SAFETY: `path` is NUL-terminated and `db` is a valid out pointer.
        let rc = unsafe { ffi::sqlite3_open(path.as_ptr(), &mut db) };
        (
            Status::from_code(rc),
            NonNull::new(db).map(|db| SqliteConnection { db }),
        )
    }
}

/// An open `sqlite3*`
#[derive(Debug)]
pub struct SqliteConnection {
    db: NonNull<ffi::sqlite3>,
}

// SAFETY: the bundled SQLite is built threadsafe, and the handle is only
// ever used through `&mut self`.
unsafe impl Send for SqliteConnection {}

impl Connection for SqliteConnection {
    type Statement = SqliteStatement;

    fn exec(&mut self, sql: &CStr) -> Status {
        // SAFETY: valid handle, NUL-terminated SQL, no callback and no
        // error message buffer requested.
        let rc = unsafe {
            ffi::sqlite3_exec(
                self.db.as_ptr(),
                sql.as_ptr(),
                None,
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        Status::from_code(rc)
    }

    fn prepare(&mut self, sql: &CStr) -> (Status, Option<SqliteStatement>) {
        let mut stmt = ptr::null_mut();
        // SAFETY: valid handle and NUL-terminated SQL (length -1 reads up to
        // the terminator); `stmt` is a valid out pointer.
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                self.db.as_ptr(),
                sql.as_ptr(),
                -1,
                &mut stmt,
                ptr::null_mut(),
            )
        };
        (
            Status::from_code(rc),
            NonNull::new(stmt).map(|stmt| SqliteStatement { stmt }),
        )
    }

    fn autocommit(&self) -> bool {
        // SAFETY: valid handle.
        unsafe { ffi::sqlite3_get_autocommit(self.db.as_ptr()) != 0 }
    }

    fn close(self) -> Status {
        let db = self.db.as_ptr();
        std::mem::forget(self);
        // SAFETY: the handle is valid and ownership was released above.
        let rc = unsafe { ffi::sqlite3_close(db) };
        if rc != ffi::SQLITE_OK {
            // Busy: hand the handle to SQLite to free after the last
            // statement is finalized.
            // SAFETY: sqlite3_close failed, so the handle is still valid.
            unsafe { sqlite3_close_v2(db) };
        }
        Status::from_code(rc)
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        // SAFETY: the handle is valid; close_v2 defers if statements remain.
        unsafe { sqlite3_close_v2(self.db.as_ptr()) };
    }
}

/// A prepared `sqlite3_stmt*`
#[derive(Debug)]
pub struct SqliteStatement {
    stmt: NonNull<ffi::sqlite3_stmt>,
}

// SAFETY: see `SqliteConnection`.
unsafe impl Send for SqliteStatement {}

impl Statement for SqliteStatement {
    fn reset(&mut self) -> Status {
        // SAFETY: valid statement.
        Status::from_code(unsafe { ffi::sqlite3_reset(self.stmt.as_ptr()) })
    }

    fn bind_int(&mut self, index: i32, value: i64) -> Status {
        // SAFETY: valid statement; out-of-range indexes are reported.
        Status::from_code(unsafe {
            ffi::sqlite3_bind_int64(self.stmt.as_ptr(), index as c_int, value)
        })
    }

    fn bind_text(&mut self, index: i32, value: &'static str) -> Status {
        let len = c_int::try_from(value.len()).unwrap_or(c_int::MAX);
        // SAFETY: `value` outlives the statement, so SQLite may keep
        // referencing it instead of copying (static destructor).
        Status::from_code(unsafe {
            ffi::sqlite3_bind_text(
                self.stmt.as_ptr(),
                index as c_int,
                value.as_ptr().cast(),
                len,
                ffi::SQLITE_STATIC(),
            )
        })
    }

    fn step(&mut self) -> Status {
        // SAFETY: valid statement.
        Status::from_code(unsafe { ffi::sqlite3_step(self.stmt.as_ptr()) })
    }

    fn column_int(&self, column: i32) -> i64 {
        // SAFETY: valid statement; SQLite converts or returns 0 for
        // columns without a current row.
        unsafe { ffi::sqlite3_column_int64(self.stmt.as_ptr(), column as c_int) }
    }

    fn finalize(self) -> Status {
        let stmt = self.stmt.as_ptr();
        std::mem::forget(self);
        // SAFETY: valid statement, finalized exactly once.
        Status::from_code(unsafe { ffi::sqlite3_finalize(stmt) })
    }
}

impl Drop for SqliteStatement {
    fn drop(&mut self) {
        // SAFETY: valid statement, finalized exactly once.
        unsafe { ffi::sqlite3_finalize(self.stmt.as_ptr()) };
    }
}
