use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use super::{BackendResolver, ConstructionError, Repository};
use crate::config::PoolConfig;

struct IdleHandle {
    repo: Repository,
    since: Instant,
}

#[derive(Default)]
struct Counters {
    constructed: AtomicU64,
    borrowed: AtomicU64,
    in_use: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub constructed: u64,
    pub borrowed: u64,
    pub in_use: u64,
    pub idle: usize,
}

/// Free list of constructed backend handles.
///
/// A handle is either in the free list or owned by exactly one `PooledRepository`.
/// Neither side is capped. Every returned handle goes back on the free list and
/// only the idle reaper takes handles off it.
pub struct HandlePool {
    resolver: Arc<BackendResolver>,
    idle: Mutex<Vec<IdleHandle>>,
    counters: Counters,
    idle_timeout: Duration,
}

impl HandlePool {
    pub fn new(resolver: Arc<BackendResolver>, config: &PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            resolver,
            idle: Mutex::new(Vec::new()),
            counters: Counters::default(),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
        })
    }

    fn free_list(&self) -> MutexGuard<'_, Vec<IdleHandle>> {
        // Entries are plain values; a panic elsewhere cannot leave one half-written.
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check out a handle bound to `user` and `coa`, constructing one if the free
    /// list is empty.
    pub async fn borrow(
        self: &Arc<Self>,
        user: impl Into<String>,
        coa: impl Into<String>,
    ) -> Result<PooledRepository, ConstructionError> {
        let reused = self.free_list().pop().map(|idle| idle.repo);

        let mut repo = match reused {
            Some(repo) => repo,
            None => {
                let repo = self.resolver.resolve().await?;
                self.counters.constructed.fetch_add(1, Ordering::Relaxed);
                debug!("Constructed backend handle #{}", repo.serial());
                repo
            }
        };

        repo.rebind(user, coa);
        self.counters.borrowed.fetch_add(1, Ordering::Relaxed);
        self.counters.in_use.fetch_add(1, Ordering::Relaxed);

        Ok(PooledRepository {
            repo: Some(repo),
            pool: Arc::clone(self),
        })
    }

    /// Return a handle. Health is not checked; a backend that lost its connection
    /// is expected to recover on its own.
    fn release(&self, repo: Repository) {
        self.counters.in_use.fetch_sub(1, Ordering::Relaxed);
        self.free_list().push(IdleHandle {
            repo,
            since: Instant::now(),
        });
    }

    /// Drop idle handles that have not been borrowed within `idle_timeout`.
    pub fn reap_idle(&self) -> usize {
        let timeout = self.idle_timeout;
        let mut idle = self.free_list();
        let before = idle.len();
        idle.retain(|handle| handle.since.elapsed() < timeout);
        before - idle.len()
    }

    /// Periodically reap idle handles until the pool is dropped.
    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pool: Weak<Self> = Arc::downgrade(self);
        let period = (self.idle_timeout / 2).max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else { break };
                let reaped = pool.reap_idle();
                if reaped > 0 {
                    info!("Reclaimed {} idle backend handles", reaped);
                }
            }
        })
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            constructed: self.counters.constructed.load(Ordering::Relaxed),
            borrowed: self.counters.borrowed.load(Ordering::Relaxed),
            in_use: self.counters.in_use.load(Ordering::Relaxed),
            idle: self.free_list().len(),
        }
    }
}

/// A checked-out handle. Dropping it returns the handle to the pool, so every
/// exit path of a request releases it, including cancellation.
pub struct PooledRepository {
    repo: Option<Repository>,
    pool: Arc<HandlePool>,
}

impl PooledRepository {
    /// Return the handle now rather than at end of scope.
    pub fn release(self) {}
}

impl Deref for PooledRepository {
    type Target = Repository;

    fn deref(&self) -> &Repository {
        self.repo.as_ref().expect("repository present until drop")
    }
}

impl DerefMut for PooledRepository {
    fn deref_mut(&mut self) -> &mut Repository {
        self.repo.as_mut().expect("repository present until drop")
    }
}

impl Drop for PooledRepository {
    fn drop(&mut self) {
        if let Some(repo) = self.repo.take() {
            debug!("Releasing backend handle #{}", repo.serial());
            self.pool.release(repo);
        }
    }
}
