use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use rusqlite::Connection;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{DbError, Result};

type Opener = dyn Fn() -> Result<Connection> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: usize,
    pub max_idle: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            max_idle: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub max_connections: usize,
    pub in_use: usize,
    pub idle: usize,
}

struct IdleConnection {
    conn: Connection,
    since: Instant,
}

struct PoolInner {
    name: String,
    settings: PoolSettings,
    opener: Box<Opener>,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<IdleConnection>>,
}

impl PoolInner {
    fn idle_list(&self) -> std::sync::MutexGuard<'_, Vec<IdleConnection>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Idle list with every connection past `max_idle` already closed.
    fn fresh_idle_list(&self) -> std::sync::MutexGuard<'_, Vec<IdleConnection>> {
        let max_idle = self.settings.max_idle;
        let mut idle = self.idle_list();
        let before = idle.len();
        idle.retain(|candidate| candidate.since.elapsed() <= max_idle);
        if idle.len() < before {
            tracing::trace!(pool = %self.name, closed = before - idle.len(), "closed idle connections");
        }
        idle
    }
}

/// Bounded pool of SQLite connections for one store; `acquire` waits for a free slot.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    pub fn new<F>(name: impl Into<String>, settings: PoolSettings, opener: F) -> Self
    where
        F: Fn() -> Result<Connection> + Send + Sync + 'static,
    {
        let max_connections = settings.max_connections.max(1);
        let pool = Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                settings: PoolSettings {
                    max_connections,
                    ..settings
                },
                opener: Box::new(opener),
                permits: Arc::new(Semaphore::new(max_connections)),
                idle: Mutex::new(Vec::new()),
            }),
        };
        // Outside a runtime, expiry happens on acquire and release only.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(reap_idle(Arc::downgrade(&pool.inner)));
        }
        pool
    }

    /// Pool over a database file opened with the workspace pragmas.
    pub fn open(name: impl Into<String>, path: impl Into<PathBuf>, settings: PoolSettings) -> Self {
        let path = path.into();
        Self::new(name, settings, move || crate::open_connection(&path))
    }

    pub async fn acquire(&self) -> Result<PooledConnection> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DbError::PoolClosed(self.inner.name.clone()))?;
        let reused = self
            .inner
            .fresh_idle_list()
            .pop()
            .map(|candidate| candidate.conn);
        let conn = match reused {
            Some(conn) => conn,
            None => {
                tracing::trace!(pool = %self.inner.name, "opening connection");
                (self.inner.opener)()?
            }
        };
        Ok(PooledConnection {
            conn: Some(conn),
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    pub fn stats(&self) -> PoolStats {
        let max_connections = self.inner.settings.max_connections;
        PoolStats {
            max_connections,
            in_use: max_connections - self.inner.permits.available_permits(),
            idle: self.inner.idle_list().len(),
        }
    }

    pub fn close(&self) {
        self.inner.permits.close();
        self.inner.idle_list().clear();
    }
}

async fn reap_idle(pool: Weak<PoolInner>) {
    let period = match pool.upgrade() {
        Some(inner) => (inner.settings.max_idle / 2).max(Duration::from_millis(10)),
        None => return,
    };
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let Some(inner) = pool.upgrade() else {
            return;
        };
        if inner.permits.is_closed() {
            return;
        }
        drop(inner.fresh_idle_list());
    }
}

/// Connection checked out of a [`Pool`]; returned to the idle list on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
            .as_ref()
            .unwrap_or_else(|| unreachable!("connection taken before drop"))
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn
            .as_mut()
            .unwrap_or_else(|| unreachable!("connection taken before drop"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        // A connection still inside a transaction is discarded, not recycled.
        if !conn.is_autocommit() || self.pool.permits.is_closed() {
            return;
        }
        self.pool.fresh_idle_list().push(IdleConnection {
            conn,
            since: Instant::now(),
        });
    }
}
