//! In-process storage library for exercising the harness
//!
//! A small transactional engine that understands the statements the
//! scenarios issue and allocates every piece of working memory through an
//! [`AllocationGate`], so a [`SimulatedInjector`](oomsweep_injector::SimulatedInjector)
//! can fail it anywhere. Its failure behavior follows SQLite's:
//!
//! - A statement that fails leaves no partial effects.
//! - Running out of memory while writing inside an explicit transaction,
//!   or while committing it, rolls back the whole transaction, which the
//!   caller observes as autocommit turning back on.
//! - `reset` reports the error of the step before it.
//! - Closing with outstanding statements reports busy and defers the
//!   release until the last one is finalized.
//!
//! [`Defect`]s break one of these rules on purpose, so tests can show the
//! harness notices.

mod catalog;
mod sql;

pub use catalog::{Catalog, ExecError, Value};
pub use sql::{parse, Command, SyntaxError, Term};

use crate::library::{Connection, Statement, StorageLibrary};
use catalog::Scratch;
use oomsweep_core::status::{CODE_BUSY, CODE_MISUSE, CODE_RANGE};
use oomsweep_core::Status;
use oomsweep_injector::{AllocationGate, BlockId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::CStr;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// Path that opens a private database discarded at close
pub const IN_MEMORY: &str = ":memory:";

/// Blocks held by an open connection
const CONNECTION_BLOCKS: usize = 3;

/// A deliberately broken behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Defect {
    /// `close` forgets the connection's memory instead of freeing it
    LeakOnClose,
    /// A failed `open` still hands back a connection
    HandleOnNoMem,
    /// Running out of memory inside a transaction ends it but keeps the
    /// statements that had already succeeded
    PartialCommit,
    /// `BEGIN` reports success without starting a transaction
    IgnoreBegin,
    /// `ROLLBACK` reports success but leaves the transaction open
    IgnoreRollback,
    /// `END` reports success but leaves the transaction open
    IgnoreCommit,
}

/// Simulated storage library
///
/// Databases live in memory, keyed by path, and survive their connections.
/// Clones share them.
#[derive(Debug, Clone)]
pub struct SimulatedLibrary {
    gate: AllocationGate,
    files: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<Catalog>>>>>,
    defects: Vec<Defect>,
}

impl SimulatedLibrary {
    /// Library allocating through `gate`
    pub fn new(gate: AllocationGate) -> Self {
        SimulatedLibrary {
            gate,
            files: Arc::new(Mutex::new(HashMap::new())),
            defects: Vec::new(),
        }
    }

    /// Add a deliberate defect
    pub fn with_defect(mut self, defect: Defect) -> Self {
        self.defects.push(defect);
        self
    }

    /// Snapshot of the committed database at `path`
    pub fn database(&self, path: &Path) -> Option<Catalog> {
        self.files.lock().get(path).map(|db| db.lock().clone())
    }

    fn has(&self, defect: Defect) -> bool {
        self.defects.contains(&defect)
    }
}

impl StorageLibrary for SimulatedLibrary {
    type Connection = SimConnection;

    fn open(&self, path: &CStr) -> (Status, Option<SimConnection>) {
        let mut resident = Vec::with_capacity(CONNECTION_BLOCKS);
        for _ in 0..CONNECTION_BLOCKS {
            match self.gate.allocate() {
                Some(block) => resident.push(block),
                None if self.has(Defect::HandleOnNoMem) => {
                    let conn = self.connect(path, resident);
                    return (Status::NoMem, Some(conn));
                }
                None => {
                    for block in resident {
                        self.gate.free(block);
                    }
                    return (Status::NoMem, None);
                }
            }
        }
        (Status::Ok, Some(self.connect(path, resident)))
    }

    fn remove_database(&self, path: &Path) -> io::Result<()> {
        self.files.lock().remove(path);
        Ok(())
    }
}

impl SimulatedLibrary {
    fn connect(&self, path: &CStr, resident: Vec<BlockId>) -> SimConnection {
        let path = PathBuf::from(path.to_string_lossy().as_ref());
        let db = if path.as_os_str() == IN_MEMORY {
            Arc::new(Mutex::new(Catalog::default()))
        } else {
            Arc::clone(self.files.lock().entry(path).or_default())
        };
        SimConnection {
            state: Arc::new(Mutex::new(ConnectionState {
                gate: self.gate.clone(),
                db,
                defects: self.defects.clone(),
                resident,
                cache: None,
                journal: None,
                statements: 0,
                closing: false,
                released: false,
            })),
        }
    }
}

#[derive(Debug)]
struct ConnectionState {
    gate: AllocationGate,
    db: Arc<Mutex<Catalog>>,
    defects: Vec<Defect>,
    resident: Vec<BlockId>,
    /// Page cache, allocated on first data access
    cache: Option<BlockId>,
    /// Database as of BEGIN
    journal: Option<Catalog>,
    statements: usize,
    closing: bool,
    released: bool,
}

impl ConnectionState {
    fn has(&self, defect: Defect) -> bool {
        self.defects.contains(&defect)
    }

    fn run(&mut self, command: &Command, params: &[Value]) -> Result<Option<i64>, ExecError> {
        let mut scratch = Scratch::new(&self.gate);
        scratch.take()?;

        match command {
            Command::Begin => {
                if self.journal.is_some() {
                    return Err(ExecError::sql(
                        "cannot start a transaction within a transaction",
                    ));
                }
                if !self.has(Defect::IgnoreBegin) {
                    self.journal = Some(self.db.lock().clone());
                }
                Ok(None)
            }
            Command::Commit => {
                if self.journal.is_none() {
                    return Err(ExecError::sql("cannot commit - no transaction is active"));
                }
                if let Err(e) = scratch.take() {
                    if let Some(snapshot) = self.journal.take() {
                        if !self.has(Defect::PartialCommit) {
                            *self.db.lock() = snapshot;
                        }
                        debug!(target: "oomsweep::storage", "Commit failed; transaction rolled back");
                    }
                    return Err(e);
                }
                if !self.has(Defect::IgnoreCommit) {
                    self.journal = None;
                }
                Ok(None)
            }
            Command::Rollback if self.journal.is_some() && self.has(Defect::IgnoreRollback) => {
                Ok(None)
            }
            Command::Rollback => match self.journal.take() {
                Some(snapshot) => {
                    *self.db.lock() = snapshot;
                    trace!(target: "oomsweep::storage", "Transaction rolled back");
                    Ok(None)
                }
                None => Err(ExecError::sql(
                    "cannot rollback - no transaction is active",
                )),
            },
            Command::Vacuum if self.journal.is_some() => Err(ExecError::sql(
                "cannot VACUUM from within a transaction",
            )),
            _ => {
                if self.cache.is_none() {
                    self.cache = Some(self.gate.allocate().ok_or(ExecError::NoMem)?);
                }
                let mut db = self.db.lock();
                if !command.is_write() {
                    return db.apply(command, params, &mut scratch);
                }
                let before = db.clone();
                let result = db.apply(command, params, &mut scratch);
                if let Err(e) = &result {
                    *db = before;
                    if *e == ExecError::NoMem {
                        if let Some(snapshot) = self.journal.take() {
                            if !self.defects.contains(&Defect::PartialCommit) {
                                *db = snapshot;
                            }
                            debug!(
                                target: "oomsweep::storage",
                                "Out of memory inside a transaction; rolled back"
                            );
                        }
                    }
                }
                result
            }
        }
    }

    /// Free everything the connection holds. Idempotent.
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(snapshot) = self.journal.take() {
            *self.db.lock() = snapshot;
        }
        let blocks: Vec<BlockId> = self.resident.drain(..).chain(self.cache.take()).collect();
        if self.defects.contains(&Defect::LeakOnClose) {
            debug!(target: "oomsweep::storage", blocks = blocks.len(), "Leaking connection memory");
            return;
        }
        for block in blocks {
            self.gate.free(block);
        }
    }
}

/// Connection to a simulated database
#[derive(Debug)]
pub struct SimConnection {
    state: Arc<Mutex<ConnectionState>>,
}

impl Connection for SimConnection {
    type Statement = SimStatement;

    fn exec(&mut self, sql: &CStr) -> Status {
        let mut state = self.state.lock();
        let parsed = {
            let mut parse_buffer = Scratch::new(&state.gate);
            parse_buffer
                .take()
                .and_then(|_| parse_sql(sql))
        };
        match parsed.and_then(|command| state.run(&command, &[])) {
            Ok(_) => Status::Ok,
            Err(e) => e.status(),
        }
    }

    fn prepare(&mut self, sql: &CStr) -> (Status, Option<SimStatement>) {
        let mut state = self.state.lock();
        let command = {
            let mut parse_buffer = Scratch::new(&state.gate);
            match parse_buffer.take().and_then(|_| parse_sql(sql)) {
                Ok(command) => command,
                Err(e) => return (e.status(), None),
            }
        };
        let Some(program) = state.gate.allocate() else {
            return (Status::NoMem, None);
        };
        state.statements += 1;
        let params = vec![None; command.parameter_count()];
        (
            Status::Ok,
            Some(SimStatement {
                state: Arc::clone(&self.state),
                command,
                program: Some(program),
                params,
                phase: Phase::Ready,
                pending: None,
            }),
        )
    }

    fn autocommit(&self) -> bool {
        self.state.lock().journal.is_none()
    }

    fn close(self) -> Status {
        let mut state = self.state.lock();
        state.closing = true;
        if state.statements > 0 {
            return Status::Error(CODE_BUSY);
        }
        state.release();
        Status::Ok
    }
}

impl Drop for SimConnection {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.closing = true;
        if state.statements == 0 {
            state.release();
        }
    }
}

fn parse_sql(sql: &CStr) -> Result<Command, ExecError> {
    let text = sql
        .to_str()
        .map_err(|_| ExecError::sql("SQL is not valid UTF-8"))?;
    parse(text).map_err(|e| ExecError::sql(e.to_string()))
}

#[derive(Debug, Clone)]
enum Bound {
    Int(i64),
    Text { value: &'static str, copy: BlockId },
}

impl Bound {
    fn value(&self) -> Value {
        match self {
            Bound::Int(v) => Value::Int(*v),
            Bound::Text { value, .. } => Value::Text((*value).to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Ready,
    Row(i64),
    Halted,
}

/// Prepared statement on a simulated connection
#[derive(Debug)]
pub struct SimStatement {
    state: Arc<Mutex<ConnectionState>>,
    command: Command,
    /// `None` once finalized
    program: Option<BlockId>,
    params: Vec<Option<Bound>>,
    phase: Phase,
    /// Error of the most recent step, reported by the next reset
    pending: Option<Status>,
}

impl SimStatement {
    fn bind(&mut self, index: i32, bound: impl FnOnce(&AllocationGate) -> Option<Bound>) -> Status {
        if self.phase != Phase::Ready {
            return Status::Error(CODE_MISUSE);
        }
        let slot = match usize::try_from(index).ok().filter(|i| *i >= 1) {
            Some(i) if i <= self.params.len() => i - 1,
            _ => return Status::Error(CODE_RANGE),
        };
        let state = self.state.lock();
        let Some(bound) = bound(&state.gate) else {
            return Status::NoMem;
        };
        if let Some(Bound::Text { copy, .. }) = self.params[slot].replace(bound) {
            state.gate.free(copy);
        }
        Status::Ok
    }
}

impl Statement for SimStatement {
    fn reset(&mut self) -> Status {
        self.phase = Phase::Ready;
        self.pending.take().unwrap_or(Status::Ok)
    }

    fn bind_int(&mut self, index: i32, value: i64) -> Status {
        self.bind(index, |_| Some(Bound::Int(value)))
    }

    fn bind_text(&mut self, index: i32, value: &'static str) -> Status {
        self.bind(index, |gate| {
            gate.allocate().map(|copy| Bound::Text { value, copy })
        })
    }

    fn step(&mut self) -> Status {
        match self.phase {
            Phase::Row(_) => {
                self.phase = Phase::Halted;
                return Status::Done;
            }
            // A halted statement rewinds itself
            Phase::Halted => self.pending = None,
            Phase::Ready => {}
        }
        let params: Vec<Value> = self
            .params
            .iter()
            .map(|p| p.as_ref().map_or(Value::Null, Bound::value))
            .collect();
        let result = self.state.lock().run(&self.command, &params);
        match result {
            Ok(Some(count)) => {
                self.phase = Phase::Row(count);
                Status::Row
            }
            Ok(None) => {
                self.phase = Phase::Halted;
                Status::Done
            }
            Err(e) => {
                self.phase = Phase::Halted;
                self.pending = Some(e.status());
                e.status()
            }
        }
    }

    fn column_int(&self, column: i32) -> i64 {
        match self.phase {
            Phase::Row(count) if column == 0 => count,
            _ => 0,
        }
    }

    fn finalize(mut self) -> Status {
        self.release();
        self.pending.take().unwrap_or(Status::Ok)
    }
}

impl SimStatement {
    fn release(&mut self) {
        let Some(program) = self.program.take() else {
            return;
        };
        let mut state = self.state.lock();
        state.gate.free(program);
        for bound in self.params.drain(..).flatten() {
            if let Bound::Text { copy, .. } = bound {
                state.gate.free(copy);
            }
        }
        state.statements -= 1;
        if state.closing && state.statements == 0 {
            state.release();
        }
    }
}

impl Drop for SimStatement {
    fn drop(&mut self) {
        self.release();
    }
}
