//! Manager lifecycle substrate
//!
//! Every data manager embeds a [`ManagerCore`] and implements
//! [`DataManager`]. The shared behavior lives in [`ManagerLifecycle`],
//! implemented for `Arc<M>`:
//!
//! - `load()` runs `initialize()` and only then marks the manager ready
//! - `unload()` marks it not ready first, stops the cleanup timer, detaches
//!   listeners and runs `cleanup()`; it never fails
//! - a periodic timer compares [`MemoryStats`] against the configured limits
//!   and calls `perform_memory_cleanup()` when either is exceeded

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::config::LifecycleConfig;
use crate::error::{IndexError, IndexResult};
use crate::events::{EventBus, EventKind, EventPayload, ManagerEvent};

/// Memory accounting reported by one manager, or aggregated over several
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub cache_size: usize,
    /// Bytes
    pub estimated_memory_usage: usize,
    pub active_listeners: usize,
    pub last_cleanup_time: DateTime<Utc>,
}

impl MemoryStats {
    /// Sum sizes and listeners, keep the oldest cleanup time
    pub fn aggregate<'a>(stats: impl IntoIterator<Item = &'a MemoryStats>) -> MemoryStats {
        stats.into_iter().fold(
            MemoryStats {
                cache_size: 0,
                estimated_memory_usage: 0,
                active_listeners: 0,
                last_cleanup_time: Utc::now(),
            },
            |acc, s| MemoryStats {
                cache_size: acc.cache_size + s.cache_size,
                estimated_memory_usage: acc.estimated_memory_usage + s.estimated_memory_usage,
                active_listeners: acc.active_listeners + s.active_listeners,
                last_cleanup_time: acc.last_cleanup_time.min(s.last_cleanup_time),
            },
        )
    }
}

/// State shared by every manager: identity, bus handle, readiness flag and
/// the background tasks that must be stopped on unload
pub struct ManagerCore {
    id: String,
    lifecycle: LifecycleConfig,
    bus: EventBus,
    initialized: AtomicBool,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    cleanup_timer: Mutex<Option<JoinHandle<()>>>,
    last_cleanup: Mutex<DateTime<Utc>>,
    // Serializes load/unload so a reload cannot interleave with teardown
    transition: tokio::sync::Mutex<()>,
}

impl ManagerCore {
    pub fn new(id: impl Into<String>, lifecycle: LifecycleConfig, bus: EventBus) -> Self {
        Self {
            id: id.into(),
            lifecycle,
            bus,
            initialized: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            cleanup_timer: Mutex::new(None),
            last_cleanup: Mutex::new(Utc::now()),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn lifecycle(&self) -> &LifecycleConfig {
        &self.lifecycle
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Fail fast when called before `load()` or after `unload()`
    pub fn ensure_initialized(&self) -> IndexResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(IndexError::not_initialized(&self.id))
        }
    }

    /// Publish an event stamped with this manager's id
    pub fn emit(&self, kind: EventKind, data: EventPayload) {
        self.bus.publish(ManagerEvent::new(kind, data, self.id.clone()));
    }

    /// Keep a listener task so `unload()` can detach it
    pub fn track_listener(&self, handle: JoinHandle<()>) {
        self.listeners.lock().push(handle);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().iter().filter(|h| !h.is_finished()).count()
    }

    pub fn last_cleanup(&self) -> DateTime<Utc> {
        *self.last_cleanup.lock()
    }

    /// Stats with this core's listener count and cleanup time filled in
    pub fn stats(&self, cache_size: usize, estimated_memory_usage: usize) -> MemoryStats {
        MemoryStats {
            cache_size,
            estimated_memory_usage,
            active_listeners: self.listener_count(),
            last_cleanup_time: self.last_cleanup(),
        }
    }

    fn detach_listeners(&self) {
        for handle in self.listeners.lock().drain(..) {
            handle.abort();
        }
    }

    fn stop_timer(&self) {
        if let Some(handle) = self.cleanup_timer.lock().take() {
            handle.abort();
        }
    }

    fn over_limits(&self, stats: &MemoryStats) -> bool {
        stats.cache_size > self.lifecycle.max_cache_size
            || stats.estimated_memory_usage > self.lifecycle.memory_limit_bytes
    }
}

/// Contract implemented by every data manager
#[async_trait]
pub trait DataManager: Send + Sync + 'static {
    fn core(&self) -> &ManagerCore;

    /// Build caches and register listeners
    async fn initialize(&self) -> IndexResult<()>;

    /// Release caches; errors are logged by `unload()`, never propagated
    async fn cleanup(&self) -> IndexResult<()>;

    fn memory_stats(&self) -> MemoryStats;

    /// Reclaim memory when over the configured limits
    async fn perform_memory_cleanup(&self) -> IndexResult<()> {
        Ok(())
    }

    fn id(&self) -> &str {
        self.core().id()
    }

    fn is_initialized(&self) -> bool {
        self.core().is_initialized()
    }
}

/// Lifecycle operations shared by every manager
#[async_trait]
pub trait ManagerLifecycle {
    /// Initialize and start the cleanup timer; a second call is a no-op
    async fn load(&self) -> IndexResult<()>;

    /// Tear down; safe to call at any time, any number of times
    async fn unload(&self);

    /// Run the memory cleanup hook now, regardless of limits
    async fn force_cleanup(&self) -> IndexResult<()>;

    /// Run the periodic check once; returns whether cleanup ran
    async fn check_memory(&self) -> IndexResult<bool>;
}

#[async_trait]
impl<M: DataManager> ManagerLifecycle for Arc<M> {
    async fn load(&self) -> IndexResult<()> {
        let core = self.core();
        let _guard = core.transition.lock().await;
        if core.is_initialized() {
            debug!(manager = %core.id(), "Already loaded");
            return Ok(());
        }

        if let Err(e) = self.initialize().await {
            // Listeners registered before the failure must not outlive it
            core.detach_listeners();
            warn!(manager = %core.id(), error = %e, "Initialization failed");
            return Err(match e {
                IndexError::InitializationFailed { .. } => e,
                other => IndexError::InitializationFailed {
                    manager: core.id().to_string(),
                    message: other.to_string(),
                },
            });
        }

        core.initialized.store(true, Ordering::SeqCst);
        *core.cleanup_timer.lock() = Some(spawn_cleanup_timer(Arc::downgrade(self)));
        info!(manager = %core.id(), "Manager loaded");
        Ok(())
    }

    async fn unload(&self) {
        let core = self.core();
        let _guard = core.transition.lock().await;
        let was_initialized = core.initialized.swap(false, Ordering::SeqCst);
        core.stop_timer();
        core.detach_listeners();

        if !was_initialized {
            return;
        }
        if let Err(e) = self.cleanup().await {
            warn!(manager = %core.id(), error = %e, "Cleanup failed during unload");
        }
        info!(manager = %core.id(), "Manager unloaded");
    }

    async fn force_cleanup(&self) -> IndexResult<()> {
        self.core().ensure_initialized()?;
        run_cleanup(self.as_ref()).await
    }

    async fn check_memory(&self) -> IndexResult<bool> {
        check_memory(self.as_ref()).await
    }
}

async fn run_cleanup<M: DataManager>(manager: &M) -> IndexResult<()> {
    let result = manager.perform_memory_cleanup().await;
    *manager.core().last_cleanup.lock() = Utc::now();
    result
}

async fn check_memory<M: DataManager>(manager: &M) -> IndexResult<bool> {
    let stats = manager.memory_stats();
    if !manager.core().over_limits(&stats) {
        return Ok(false);
    }
    debug!(
        manager = %manager.id(),
        cache_size = stats.cache_size,
        bytes = stats.estimated_memory_usage,
        "Memory limits exceeded, cleaning up"
    );
    run_cleanup(manager).await?;
    Ok(true)
}

fn spawn_cleanup_timer<M: DataManager>(manager: Weak<M>) -> JoinHandle<()> {
    let period = match manager.upgrade() {
        Some(m) => m.core().lifecycle().cleanup_interval(),
        None => return tokio::spawn(async {}),
    };
    tokio::spawn(async move {
        let mut interval = time::interval(period);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(manager) = manager.upgrade() else {
                break;
            };
            if !manager.is_initialized() {
                break;
            }
            if let Err(e) = check_memory(manager.as_ref()).await {
                warn!(manager = %manager.id(), error = %e, "Periodic cleanup failed");
            }
        }
    })
}
