//! Ordered key-value environment backed by one SQLite file.
//!
//! Every call takes an [`OpContext`]; a progress handler polls it while a
//! statement runs, so cancellation interrupts in-flight I/O.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use chatvault_core::{Error, OpContext, Result};

use crate::schema::{prefix_upper_bound, CONNECTION_PRAGMAS, DB_FILE, KV_SCHEMA_SQL};

/// SQLite VM instructions between context polls.
const PROGRESS_OPS: i32 = 1000;

/// A single mutation applied by [`KvEnv::apply`].
#[derive(Debug, Clone)]
pub enum KvOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

pub struct KvEnv {
    conn: Mutex<Connection>,
    dir: PathBuf,
}

impl KvEnv {
    /// Open or create the environment directory `dir`.
    ///
    /// A second environment on the same directory waits up to `busy_timeout`
    /// for the other writer's transaction instead of failing.
    pub fn open(ctx: &OpContext, dir: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        ctx.check()?;
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| Error::storage("open_env", e))?;

        let conn = Connection::open(dir.join(DB_FILE)).map_err(|e| Error::storage("open_env", e))?;
        conn.busy_timeout(busy_timeout)
            .map_err(|e| Error::storage("open_env", e))?;
        conn.execute_batch(CONNECTION_PRAGMAS)
            .map_err(|e| Error::storage("open_env", e))?;
        conn.execute_batch(KV_SCHEMA_SQL)
            .map_err(|e| Error::storage("init_schema", e))?;

        debug!("Opened KV environment at {}", dir.display());
        Ok(Self {
            conn: Mutex::new(conn),
            dir,
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Run `f` with the context installed as the connection's interrupt check.
    fn run<T>(
        &self,
        ctx: &OpContext,
        op: &'static str,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        ctx.check()?;
        let mut conn = self.conn.lock();
        let watched = AssertUnwindSafe(ctx.clone());
        conn.progress_handler(PROGRESS_OPS, Some(move || watched.is_done()));
        let out = f(&mut *conn);
        conn.progress_handler(0, None::<fn() -> bool>);
        out.map_err(|e| interrupt_or(ctx, op, e))
    }

    pub fn get(&self, ctx: &OpContext, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.run(ctx, "kv_get", |conn| {
            conn.prepare_cached("SELECT value FROM kv WHERE key = ?1")?
                .query_row(params![key], |row| row.get::<_, Vec<u8>>(0))
                .optional()
        })
    }

    pub fn put(&self, ctx: &OpContext, key: &[u8], value: &[u8]) -> Result<()> {
        self.run(ctx, "kv_put", |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.prepare_cached("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")?
                .execute(params![key, value])?;
            tx.commit()
        })
    }

    /// Returns whether the key existed.
    pub fn delete(&self, ctx: &OpContext, key: &[u8]) -> Result<bool> {
        self.run(ctx, "kv_delete", |conn| {
            let n = conn
                .prepare_cached("DELETE FROM kv WHERE key = ?1")?
                .execute(params![key])?;
            Ok(n > 0)
        })
    }

    /// All entries whose key starts with `prefix`, in ascending key order.
    pub fn scan_prefix(&self, ctx: &OpContext, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let upper = prefix_upper_bound(prefix);
        self.run(ctx, "kv_scan", |conn| {
            let mut out: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
            match &upper {
                Some(upper) => {
                    let mut stmt = conn.prepare_cached(
                        "SELECT key, value FROM kv WHERE key >= ?1 AND key < ?2 ORDER BY key",
                    )?;
                    let rows = stmt.query_map(params![prefix, upper], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?;
                    for row in rows {
                        out.push(row?);
                    }
                }
                None => {
                    let mut stmt =
                        conn.prepare_cached("SELECT key, value FROM kv WHERE key >= ?1 ORDER BY key")?;
                    let rows =
                        stmt.query_map(params![prefix], |row| Ok((row.get(0)?, row.get(1)?)))?;
                    for row in rows {
                        out.push(row?);
                    }
                }
            }
            Ok(out)
        })
    }

    /// Apply all ops in one write transaction.
    pub fn apply(&self, ctx: &OpContext, ops: &[KvOp]) -> Result<()> {
        self.run(ctx, "kv_apply", |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            {
                let mut put =
                    tx.prepare_cached("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")?;
                let mut del = tx.prepare_cached("DELETE FROM kv WHERE key = ?1")?;
                for op in ops {
                    match op {
                        KvOp::Put { key, value } => {
                            put.execute(params![key, value])?;
                        }
                        KvOp::Delete { key } => {
                            del.execute(params![key])?;
                        }
                    }
                }
            }
            tx.commit()
        })
    }

    /// Checkpoint the WAL and close the connection.
    pub fn close(self) -> Result<()> {
        let conn = self.conn.into_inner();
        if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);") {
            debug!("WAL checkpoint skipped for {}: {}", self.dir.display(), e);
        }
        conn.close()
            .map_err(|(_, e)| Error::storage("close_env", e))?;
        debug!("Closed KV environment at {}", self.dir.display());
        Ok(())
    }
}

fn interrupt_or(ctx: &OpContext, op: &'static str, err: rusqlite::Error) -> Error {
    match ctx.check() {
        Err(interrupt) => interrupt,
        Ok(()) => Error::storage(op, err),
    }
}
