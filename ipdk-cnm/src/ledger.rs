//! Durable, table-namespaced key-value ledger backed by redb.
//!
//! Every `put`/`delete` runs in its own write transaction and returns only
//! after the commit is durable. Reads see the last committed state.

use redb::{Database, ReadOnlyTable, ReadTransaction, ReadableTable, TableDefinition, TableError};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

/// Ledger errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Table not initialized: {0}")]
    UnknownTable(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

fn table_def(name: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
    TableDefinition::new(name)
}

/// Open `table` for reading. A table missing from the file is reported as
/// unknown, the same as one that was never initialized.
fn open_read(
    txn: &ReadTransaction,
    table: &str,
) -> Result<ReadOnlyTable<&'static str, &'static [u8]>> {
    match txn.open_table(table_def(table)) {
        Ok(t) => Ok(t),
        Err(TableError::TableDoesNotExist(_)) => Err(LedgerError::UnknownTable(table.to_string())),
        Err(e) => Err(e.into()),
    }
}

pub struct Ledger {
    db: Database,
    tables: Mutex<BTreeSet<String>>,
}

impl Ledger {
    /// Open (or create) the ledger file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Opened ledger");
        Ok(Self {
            db,
            tables: Mutex::new(BTreeSet::new()),
        })
    }

    /// Create the named tables if they do not exist yet.
    pub fn init_tables(&self, names: &[&str]) -> Result<()> {
        let txn = self.db.begin_write()?;
        for name in names {
            txn.open_table(table_def(name))?;
            debug!(table = %name, "Ledger table ready");
        }
        txn.commit()?;

        let mut tables = self.tables.lock().unwrap();
        tables.extend(names.iter().map(|n| n.to_string()));
        Ok(())
    }

    fn check_table(&self, table: &str) -> Result<()> {
        let tables = self.tables.lock().unwrap();
        if tables.contains(table) {
            Ok(())
        } else {
            Err(LedgerError::UnknownTable(table.to_string()))
        }
    }

    pub fn put(&self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        self.check_table(table)?;
        let txn = self.db.begin_write()?;
        {
            let mut t = txn.open_table(table_def(table))?;
            t.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn delete(&self, table: &str, key: &str) -> Result<()> {
        self.check_table(table)?;
        let txn = self.db.begin_write()?;
        {
            let mut t = txn.open_table(table_def(table))?;
            t.remove(key)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Returns `None` when the key is absent.
    pub fn get(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_table(table)?;
        let txn = self.db.begin_read()?;
        let t = open_read(&txn, table)?;
        Ok(t.get(key)?.map(|v| v.value().to_vec()))
    }

    /// Visit every entry of `table`. Iteration stops at the first visitor error.
    pub fn for_each<F, E>(&self, table: &str, mut visit: F) -> std::result::Result<(), E>
    where
        F: FnMut(&str, &[u8]) -> std::result::Result<(), E>,
        E: From<LedgerError>,
    {
        self.check_table(table)?;
        let txn = self.db.begin_read().map_err(LedgerError::from)?;
        let t = open_read(&txn, table)?;

        for item in t.iter().map_err(LedgerError::from)? {
            let (key, value) = item.map_err(LedgerError::from)?;
            visit(key.value(), value.value())?;
        }
        Ok(())
    }

    /// Stop accepting operations on `table` until it is initialized again.
    /// Lets tests make every write to it fail.
    #[cfg(test)]
    pub(crate) fn forget_table(&self, table: &str) {
        self.tables.lock().unwrap().remove(table);
    }
}
