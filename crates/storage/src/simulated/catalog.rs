//! Tables, indexes and rows of a simulated database
//!
//! A `Catalog` is plain data and clones cheaply enough to serve as its own
//! undo log: connections snapshot it before each write statement and at
//! BEGIN. Every operation charges its working memory to a [`Scratch`] arena,
//! so a denied allocation can abort it at any row.

use super::sql::{Command, Term};
use oomsweep_core::status::{CODE_CONSTRAINT, CODE_ERROR};
use oomsweep_core::Status;
use oomsweep_injector::{AllocationGate, BlockId};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Why a statement did not complete
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// An allocation was denied
    #[error("out of memory")]
    NoMem,

    /// Malformed or inapplicable SQL
    #[error("{0}")]
    Sql(String),

    /// Uniqueness violated
    #[error("constraint failed: {0}")]
    Constraint(String),
}

impl ExecError {
    pub(crate) fn sql(msg: impl Into<String>) -> Self {
        ExecError::Sql(msg.into())
    }

    /// Status reported to the caller
    pub fn status(&self) -> Status {
        match self {
            ExecError::NoMem => Status::NoMem,
            ExecError::Sql(_) => Status::Error(CODE_ERROR),
            ExecError::Constraint(_) => Status::Error(CODE_CONSTRAINT),
        }
    }
}

/// Working memory of one operation, returned when dropped
pub(crate) struct Scratch<'g> {
    gate: &'g AllocationGate,
    blocks: Vec<BlockId>,
}

impl<'g> Scratch<'g> {
    pub(crate) fn new(gate: &'g AllocationGate) -> Self {
        Scratch {
            gate,
            blocks: Vec::new(),
        }
    }

    /// Charge one allocation
    pub(crate) fn take(&mut self) -> Result<(), ExecError> {
        let block = self.gate.allocate().ok_or(ExecError::NoMem)?;
        self.blocks.push(block);
        Ok(())
    }
}

impl Drop for Scratch<'_> {
    fn drop(&mut self) {
        for block in self.blocks.drain(..) {
            self.gate.free(block);
        }
    }
}

/// A stored value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Integer
    Int(i64),
    /// Text
    Text(String),
}

#[derive(Debug, Clone)]
struct Table {
    columns: Vec<String>,
    rowid_alias: Option<usize>,
    rows: BTreeMap<i64, Vec<Value>>,
    last_rowid: i64,
}

impl Table {
    fn column(&self, name: &str) -> Result<usize, ExecError> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .ok_or_else(|| ExecError::sql(format!("no such column: {}", name)))
    }
}

#[derive(Debug, Clone)]
struct Index {
    table: String,
    columns: Vec<usize>,
    entries: BTreeSet<(Vec<Value>, i64)>,
}

impl Index {
    fn key(&self, row: &[Value]) -> Vec<Value> {
        self.columns.iter().map(|&c| row[c].clone()).collect()
    }
}

/// Schema and contents of one database
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: BTreeMap<String, Table>,
    indexes: BTreeMap<String, Index>,
}

impl Catalog {
    /// Rows in `table`
    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.tables.get(table).map(|t| t.rows.len())
    }

    /// Entries in `index`
    pub fn index_len(&self, index: &str) -> Option<usize> {
        self.indexes.get(index).map(|i| i.entries.len())
    }

    /// `true` if neither tables nor indexes exist
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.indexes.is_empty()
    }

    /// Apply a data statement. Partial effects are left in place on error;
    /// the caller restores its snapshot.
    pub(crate) fn apply(
        &mut self,
        command: &Command,
        params: &[Value],
        scratch: &mut Scratch<'_>,
    ) -> Result<Option<i64>, ExecError> {
        match command {
            Command::CreateTable {
                name,
                columns,
                rowid_alias,
            } => {
                if self.tables.contains_key(name) {
                    return Err(ExecError::sql(format!("table {} already exists", name)));
                }
                scratch.take()?;
                self.tables.insert(
                    name.clone(),
                    Table {
                        columns: columns.clone(),
                        rowid_alias: *rowid_alias,
                        rows: BTreeMap::new(),
                        last_rowid: 0,
                    },
                );
                Ok(None)
            }
            Command::CreateIndex {
                name,
                table,
                columns,
            } => self.create_index(name, table, columns, scratch).map(|_| None),
            Command::Insert {
                table,
                columns,
                rows,
            } => self.insert(table, columns, rows, params, scratch).map(|_| None),
            Command::Count { table } => {
                let rows = self
                    .row_count(table)
                    .ok_or_else(|| ExecError::sql(format!("no such table: {}", table)))?;
                scratch.take()?;
                Ok(Some(rows as i64))
            }
            Command::DropIndex { name } => {
                if !self.indexes.contains_key(name) {
                    return Err(ExecError::sql(format!("no such index: {}", name)));
                }
                scratch.take()?;
                self.indexes.remove(name);
                Ok(None)
            }
            Command::DropTable { name } => {
                if !self.tables.contains_key(name) {
                    return Err(ExecError::sql(format!("no such table: {}", name)));
                }
                scratch.take()?;
                self.indexes.retain(|_, index| index.table != *name);
                self.tables.remove(name);
                Ok(None)
            }
            Command::Vacuum => {
                // Copy-out and copy-back buffers, then one page per 8 rows
                scratch.take()?;
                scratch.take()?;
                let rows: usize = self.tables.values().map(|t| t.rows.len()).sum();
                for _ in 0..rows.div_ceil(8) {
                    scratch.take()?;
                }
                Ok(None)
            }
            Command::Begin | Command::Commit | Command::Rollback => Err(ExecError::sql(
                "transaction control is handled by the connection",
            )),
        }
    }

    fn create_index(
        &mut self,
        name: &str,
        table: &str,
        columns: &[String],
        scratch: &mut Scratch<'_>,
    ) -> Result<(), ExecError> {
        if self.indexes.contains_key(name) {
            return Err(ExecError::sql(format!("index {} already exists", name)));
        }
        let target = self
            .tables
            .get(table)
            .ok_or_else(|| ExecError::sql(format!("no such table: {}", table)))?;
        let positions = columns
            .iter()
            .map(|c| target.column(c))
            .collect::<Result<Vec<_>, _>>()?;
        scratch.take()?;
        let mut index = Index {
            table: table.to_string(),
            columns: positions,
            entries: BTreeSet::new(),
        };
        for (rowid, row) in &target.rows {
            scratch.take()?;
            index.entries.insert((index.key(row), *rowid));
        }
        self.indexes.insert(name.to_string(), index);
        Ok(())
    }

    fn insert(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Term>],
        params: &[Value],
        scratch: &mut Scratch<'_>,
    ) -> Result<(), ExecError> {
        let target = self
            .tables
            .get_mut(table)
            .ok_or_else(|| ExecError::sql(format!("no such table: {}", table)))?;
        let positions = columns
            .iter()
            .map(|c| target.column(c))
            .collect::<Result<Vec<_>, _>>()?;

        for terms in rows {
            scratch.take()?;
            let mut row = vec![Value::Null; target.columns.len()];
            for (&position, term) in positions.iter().zip(terms) {
                row[position] = match term {
                    Term::Int(v) => Value::Int(*v),
                    Term::Text(t) => Value::Text(t.clone()),
                    Term::Null => Value::Null,
                    Term::Param(n) => params.get(n - 1).cloned().unwrap_or(Value::Null),
                };
            }

            let rowid = match target.rowid_alias.map(|c| &row[c]) {
                Some(Value::Int(explicit)) => *explicit,
                _ => target.last_rowid + 1,
            };
            if target.rows.contains_key(&rowid) {
                return Err(ExecError::Constraint(format!("{}.rowid", table)));
            }
            if let Some(alias) = target.rowid_alias {
                row[alias] = Value::Int(rowid);
            }
            target.last_rowid = target.last_rowid.max(rowid);

            for index in self.indexes.values_mut().filter(|i| i.table == table) {
                scratch.take()?;
                index.entries.insert((index.key(&row), rowid));
            }
            target.rows.insert(rowid, row);
        }
        Ok(())
    }
}
