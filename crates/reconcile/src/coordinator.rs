use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{Connection, InterruptHandle, TransactionBehavior};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use usage_db::{DbError, Pool, PooledConnection};

use crate::error::{ReconcileError, Result, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    CatalogTxOpen,
    CatalogRead,
    CatalogTxClosed,
    RecordTxOpen,
    RecordWrite,
    Committed,
    RolledBack,
}

fn enter(operation: &'static str, phase: CyclePhase) {
    tracing::debug!(operation, ?phase, "cycle phase");
}

struct InterruptState {
    handle: Option<InterruptHandle>,
    cancelled: bool,
}

/// Interrupts a connection only while the owning task still holds it.
#[derive(Clone)]
struct Interrupter {
    state: Arc<Mutex<InterruptState>>,
}

impl Interrupter {
    fn new(conn: &Connection) -> Self {
        Self {
            state: Arc::new(Mutex::new(InterruptState {
                handle: Some(conn.get_interrupt_handle()),
                cancelled: false,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InterruptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cancels the task unless it already passed its commit point.
    fn cancel(&self) -> bool {
        let mut state = self.lock();
        let Some(handle) = state.handle.as_ref() else {
            return false;
        };
        handle.interrupt();
        state.cancelled = true;
        true
    }

    /// Claims the commit point; false once the deadline has cancelled the task.
    fn claim(&self) -> bool {
        let mut state = self.lock();
        if state.cancelled {
            return false;
        }
        state.handle.take();
        true
    }
}

#[derive(Clone)]
pub struct TransactionCoordinator {
    catalog: Pool,
    record: Pool,
}

impl TransactionCoordinator {
    pub fn new(catalog: Pool, record: Pool) -> Self {
        Self { catalog, record }
    }

    pub fn catalog_pool(&self) -> &Pool {
        &self.catalog
    }

    pub fn record_pool(&self) -> &Pool {
        &self.record
    }

    pub async fn run<R, T, F, G>(
        &self,
        operation: &'static str,
        timeout: Duration,
        read: F,
        write: G,
    ) -> Result<T>
    where
        F: FnOnce(&Connection) -> usage_db::Result<R> + Send + 'static,
        G: FnOnce(&Connection, R) -> Result<T> + Send + 'static,
        R: Send + 'static,
        T: Send + 'static,
    {
        let deadline = Instant::now() + timeout;
        enter(operation, CyclePhase::Idle);
        let observed = self.catalog_phase(operation, timeout, deadline, read).await?;
        self.record_phase(operation, timeout, deadline, move |conn| write(conn, observed))
            .await
    }

    pub async fn read_catalog<R, F>(
        &self,
        operation: &'static str,
        timeout: Duration,
        read: F,
    ) -> Result<R>
    where
        F: FnOnce(&Connection) -> usage_db::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let deadline = Instant::now() + timeout;
        enter(operation, CyclePhase::Idle);
        self.catalog_phase(operation, timeout, deadline, read).await
    }

    pub async fn read_record<R, F>(
        &self,
        operation: &'static str,
        timeout: Duration,
        read: F,
    ) -> Result<R>
    where
        F: FnOnce(&Connection) -> usage_db::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let deadline = Instant::now() + timeout;
        let conn = acquire(&self.record, Store::Record, operation, timeout, deadline).await?;
        let interrupter = Interrupter::new(&conn);
        let guard = interrupter.clone();
        let task = tokio::task::spawn_blocking(move || {
            let result = read(&conn).map_err(ReconcileError::ReadFailed);
            guard.claim();
            drop(conn);
            result
        });
        finish(task, interrupter, operation, timeout, deadline).await
    }

    async fn catalog_phase<R, F>(
        &self,
        operation: &'static str,
        timeout: Duration,
        deadline: Instant,
        read: F,
    ) -> Result<R>
    where
        F: FnOnce(&Connection) -> usage_db::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let mut conn = acquire(&self.catalog, Store::Catalog, operation, timeout, deadline).await?;
        let interrupter = Interrupter::new(&conn);
        let guard = interrupter.clone();
        let task = tokio::task::spawn_blocking(move || {
            let result = read_in_catalog_tx(&mut conn, operation, read);
            guard.claim();
            drop(conn);
            result
        });
        finish(task, interrupter, operation, timeout, deadline).await
    }

    async fn record_phase<T, G>(
        &self,
        operation: &'static str,
        timeout: Duration,
        deadline: Instant,
        write: G,
    ) -> Result<T>
    where
        G: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut conn = acquire(&self.record, Store::Record, operation, timeout, deadline).await?;
        let interrupter = Interrupter::new(&conn);
        let guard = interrupter.clone();
        let task = tokio::task::spawn_blocking(move || {
            let result = write_in_record_tx(&mut conn, operation, timeout, &guard, write);
            guard.claim();
            drop(conn);
            result
        });
        finish(task, interrupter, operation, timeout, deadline).await
    }
}

async fn acquire(
    pool: &Pool,
    store: Store,
    operation: &'static str,
    timeout: Duration,
    deadline: Instant,
) -> Result<PooledConnection> {
    match tokio::time::timeout_at(deadline, pool.acquire()).await {
        Ok(conn) => conn.map_err(|source| ReconcileError::Pool { store, source }),
        Err(_) => {
            tracing::warn!(operation, %store, "deadline expired waiting for a connection");
            Err(ReconcileError::TimedOut { operation, timeout })
        }
    }
}

async fn finish<T>(
    mut task: JoinHandle<Result<T>>,
    interrupter: Interrupter,
    operation: &'static str,
    timeout: Duration,
    deadline: Instant,
) -> Result<T> {
    match tokio::time::timeout_at(deadline, &mut task).await {
        Ok(joined) => joined.map_err(|err| ReconcileError::Task(err.to_string()))?,
        Err(_) if interrupter.cancel() => {
            tracing::warn!(operation, ?timeout, "deadline expired, interrupting query");
            Err(ReconcileError::TimedOut { operation, timeout })
        }
        // Past the commit point: the outcome is already decided, report it.
        Err(_) => task
            .await
            .map_err(|err| ReconcileError::Task(err.to_string()))?,
    }
}

fn read_in_catalog_tx<R, F>(conn: &mut Connection, operation: &'static str, read: F) -> Result<R>
where
    F: FnOnce(&Connection) -> usage_db::Result<R>,
{
    let tx = conn
        .transaction()
        .map_err(|err| ReconcileError::TransactionSetupFailed {
            store: Store::Catalog,
            source: DbError::from(err),
        })?;
    enter(operation, CyclePhase::CatalogTxOpen);
    enter(operation, CyclePhase::CatalogRead);
    let result = read(&tx).map_err(ReconcileError::AggregationFailed);
    // The catalog is never written; a failed rollback only loses temp tables.
    if let Err(err) = tx.rollback() {
        tracing::warn!(operation, error = %err, "catalog rollback failed");
    }
    enter(operation, CyclePhase::CatalogTxClosed);
    result
}

fn write_in_record_tx<T, G>(
    conn: &mut Connection,
    operation: &'static str,
    timeout: Duration,
    interrupter: &Interrupter,
    write: G,
) -> Result<T>
where
    G: FnOnce(&Connection) -> Result<T>,
{
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|err| ReconcileError::TransactionSetupFailed {
            store: Store::Record,
            source: DbError::from(err),
        })?;
    enter(operation, CyclePhase::RecordTxOpen);
    enter(operation, CyclePhase::RecordWrite);
    match write(&tx) {
        Ok(_) if !interrupter.claim() => {
            if let Err(rollback) = tx.rollback() {
                tracing::error!(operation, error = %rollback, "record rollback failed");
            }
            enter(operation, CyclePhase::RolledBack);
            Err(ReconcileError::TimedOut { operation, timeout })
        }
        Ok(value) => {
            tx.commit()
                .map_err(|err| ReconcileError::WriteFailed(DbError::from(err)))?;
            enter(operation, CyclePhase::Committed);
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback() {
                tracing::error!(operation, error = %rollback, "record rollback failed");
            }
            enter(operation, CyclePhase::RolledBack);
            Err(err)
        }
    }
}
