use crate::dsn::{Dsn, DsnError};
use crate::twopc::{BoxError, Worker};
use crate::types::{ExecLog, TxId};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Invalid DSN: {0}")]
    Dsn(#[from] DsnError),
    #[error("Inconsistent state, currently in tx: {0}")]
    InconsistentState(TxId),
    #[error("Tx not prepared")]
    TxNotPrepared,
    #[error("Operation cancelled")]
    Cancelled,
}

/// Process-wide cache of database handles keyed by canonical filename, so
/// multiple `Storage` instances over the same file share one handle
static DB_HANDLES: OnceLock<Mutex<HashMap<String, Arc<Mutex<Connection>>>>> = OnceLock::new();

fn db_handles() -> &'static Mutex<HashMap<String, Arc<Mutex<Connection>>>> {
    DB_HANDLES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Open a database handle for the given DSN.
///
/// Journal mode WAL and synchronous FULL are force-set. Private in-memory
/// databases get a fresh handle every time; everything else goes through
/// the process-wide cache.
fn open_db(dsn: &str) -> Result<Arc<Mutex<Connection>>, StorageError> {
    let mut dsn = Dsn::parse(dsn)?;
    dsn.add_param("_journal_mode", "WAL");
    dsn.add_param("_synchronous", "FULL");

    let filename = dsn.filename().to_string();
    let in_memory = filename == ":memory:" || dsn.param("mode") == Some("memory");

    if in_memory && dsn.param("cache") != Some("shared") {
        return Ok(Arc::new(Mutex::new(open_connection(&dsn)?)));
    }

    let mut handles = db_handles().lock();
    if let Some(db) = handles.get(&filename) {
        return Ok(db.clone());
    }

    let db = Arc::new(Mutex::new(open_connection(&dsn)?));
    handles.insert(filename, db.clone());
    Ok(db)
}

fn open_connection(dsn: &Dsn) -> Result<Connection, StorageError> {
    let filename = dsn.filename();
    let conn = if filename.is_empty() || filename == ":memory:" || dsn.param("mode") == Some("memory")
    {
        Connection::open_in_memory()?
    } else {
        Connection::open(filename)?
    };
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = FULL;")?;
    Ok(conn)
}

/// Transaction state of a storage worker: at most one open transaction
#[derive(Default)]
struct TxState {
    open: bool,
    id: TxId,
    queries: Vec<String>,
}

impl TxState {
    /// Terminal phase: close the transaction and drop the buffered
    /// statements. The last TxId is kept for mismatch diagnostics.
    fn clear(&mut self) {
        self.open = false;
        self.queries.clear();
    }
}

/// SQL storage worker backed by an embedded SQLite database.
///
/// Maps 2PC phases onto a single-writer database transaction: `prepare`
/// opens the transaction and buffers the statements, `commit` executes them
/// in order and commits, `rollback` discards them. Re-presenting the same
/// transaction identity to `prepare` is idempotent.
pub struct Storage {
    dsn: String,
    db: Arc<Mutex<Connection>>,
    state: Mutex<TxState>,
}

impl Storage {
    /// Open a storage worker over the database named by `dsn`
    pub fn new(dsn: &str) -> Result<Self, StorageError> {
        let db = open_db(dsn)?;
        Ok(Self {
            dsn: dsn.to_string(),
            db,
            state: Mutex::new(TxState::default()),
        })
    }

    /// The DSN this storage was opened with
    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    fn do_prepare(&self, ctx: &CancellationToken, batch: &ExecLog) -> Result<(), StorageError> {
        let mut state = self.state.lock();

        if state.open {
            if state.id == batch.tx_id {
                // Idempotent re-prepare replaces the buffered statements
                state.queries = batch.queries.clone();
                return Ok(());
            }
            return Err(StorageError::InconsistentState(state.id));
        }

        if ctx.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        self.db.lock().execute_batch("BEGIN")?;
        state.open = true;
        state.id = batch.tx_id;
        state.queries = batch.queries.clone();
        debug!(tx = %batch.tx_id, "storage prepared");
        Ok(())
    }

    fn do_commit(&self, ctx: &CancellationToken, batch: &ExecLog) -> Result<(), StorageError> {
        let mut state = self.state.lock();

        if !state.open {
            return Err(StorageError::TxNotPrepared);
        }
        if state.id != batch.tx_id {
            return Err(StorageError::InconsistentState(state.id));
        }

        let queries = std::mem::take(&mut state.queries);
        let db = self.db.lock();
        for query in &queries {
            if ctx.is_cancelled() {
                let _ = db.execute_batch("ROLLBACK");
                state.clear();
                return Err(StorageError::Cancelled);
            }
            if let Err(err) = db.execute_batch(query) {
                warn!(tx = %state.id, "statement failed, rolling back: {}", err);
                let _ = db.execute_batch("ROLLBACK");
                state.clear();
                return Err(err.into());
            }
        }

        if let Err(err) = db.execute_batch("COMMIT") {
            state.clear();
            return Err(err.into());
        }
        debug!(tx = %state.id, "storage committed");
        state.clear();
        Ok(())
    }

    fn do_rollback(&self, batch: &ExecLog) -> Result<(), StorageError> {
        let mut state = self.state.lock();

        if state.id != batch.tx_id {
            return Err(StorageError::InconsistentState(state.id));
        }

        if state.open {
            self.db.lock().execute_batch("ROLLBACK")?;
            debug!(tx = %state.id, "storage rolled back");
            state.clear();
        }

        Ok(())
    }
}

#[async_trait]
impl Worker<ExecLog> for Storage {
    async fn prepare(&self, ctx: &CancellationToken, batch: &ExecLog) -> Result<(), BoxError> {
        Ok(self.do_prepare(ctx, batch)?)
    }

    async fn commit(&self, ctx: &CancellationToken, batch: &ExecLog) -> Result<(), BoxError> {
        Ok(self.do_commit(ctx, batch)?)
    }

    async fn rollback(&self, _ctx: &CancellationToken, batch: &ExecLog) -> Result<(), BoxError> {
        Ok(self.do_rollback(batch)?)
    }
}
