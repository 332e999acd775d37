//! Fixed-size pool of rendering engines
//!
//! The pool owns an arena of slots, one engine per slot. A dispatcher borrows
//! a slot through an [`EngineLease`]; dropping the lease returns the slot to
//! the pool whatever happened while it was held.

use crate::{Config, EngineCapabilities, EngineFactory, Job, Metrics, RenderEngine, RenderError, Viewport};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Index of a slot in the pool's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SlotId(pub usize);

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot-{}", self.0)
    }
}

struct Slot {
    /// `None` while a replacement is in progress or after a failed launch
    engine: Option<Arc<dyn RenderEngine>>,
    busy: bool,
    jobs_served: u64,
}

impl Slot {
    fn new(engine: Arc<dyn RenderEngine>) -> Self {
        Self {
            engine: Some(engine),
            busy: false,
            jobs_served: 0,
        }
    }

    fn is_idle(&self) -> bool {
        !self.busy
    }
}

struct PoolInner {
    slots: Mutex<Vec<Slot>>,
    factory: Arc<dyn EngineFactory>,
    viewport: Viewport,
    user_agent: String,
    default_capabilities: EngineCapabilities,
    metrics: Arc<Metrics>,
    shutting_down: AtomicBool,
    replacements: AtomicU64,
}

impl PoolInner {
    // Bookkeeping never panics while holding the lock, but a panicking
    // dispatcher may still poison it; the data stays consistent either way.
    fn slots(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, slot: SlotId) {
        let busy = {
            let mut slots = self.slots();
            if let Some(entry) = slots.get_mut(slot.0) {
                entry.busy = false;
                entry.jobs_served += 1;
            }
            slots.iter().filter(|s| s.busy).count()
        };

        self.metrics.set_busy_engines(busy);
        debug!("{} released", slot);
    }

    fn clear(&self, slot: SlotId) {
        if let Some(entry) = self.slots().get_mut(slot.0) {
            entry.engine = None;
        }
    }

    /// Put a rebuilt engine into its slot unless shutdown has begun. Checked
    /// under the lock shutdown collects engines with, so no engine is missed.
    fn store(&self, slot: SlotId, engine: Arc<dyn RenderEngine>) -> bool {
        let mut slots = self.slots();
        if self.shutting_down.load(Ordering::Acquire) {
            return false;
        }
        if let Some(entry) = slots.get_mut(slot.0) {
            entry.engine = Some(engine);
        }
        true
    }
}

/// Marks one slot busy for as long as it lives
struct SlotReservation {
    pool: Arc<PoolInner>,
    slot: SlotId,
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        self.pool.release(self.slot);
    }
}

/// Exclusive loan of one engine for the duration of a job
pub struct EngineLease {
    reservation: SlotReservation,
    engine: Arc<dyn RenderEngine>,
}

impl EngineLease {
    pub fn slot(&self) -> SlotId {
        self.reservation.slot
    }

    pub fn engine(&self) -> &dyn RenderEngine {
        self.engine.as_ref()
    }
}

impl std::fmt::Debug for EngineLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineLease").field("slot", &self.slot()).finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub busy: usize,
    pub idle: usize,
    /// Slots whose engine failed to launch and will be rebuilt on next use
    pub empty: usize,
    pub jobs_served: u64,
    pub replacements: u64,
}

#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create `config.pool_size` engines with the default capabilities.
    ///
    /// Engines are launched one after another; if any launch fails the ones
    /// already running are destroyed and the error is returned.
    pub async fn new(
        config: &Config,
        factory: Arc<dyn EngineFactory>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, RenderError> {
        let mut slots = Vec::with_capacity(config.pool_size);

        for i in 0..config.pool_size {
            let launched = launch(
                factory.as_ref(),
                config.viewport,
                config.default_capabilities.clone(),
                &config.user_agent,
            )
            .await;

            match launched {
                Ok(engine) => {
                    slots.push(Slot::new(engine));
                    debug!("Engine for {} created", SlotId(i));
                }
                Err(e) => {
                    error!("Failed to create engine for {}: {}", SlotId(i), e);
                    for slot in slots {
                        if let Some(engine) = slot.engine {
                            engine.destroy().await;
                        }
                    }
                    return Err(e);
                }
            }
        }

        info!("Worker pool initialized with {} engines", slots.len());

        Ok(Self {
            inner: Arc::new(PoolInner {
                slots: Mutex::new(slots),
                factory,
                viewport: config.viewport,
                user_agent: config.user_agent.clone(),
                default_capabilities: config.default_capabilities.clone(),
                metrics,
                shutting_down: AtomicBool::new(false),
                replacements: AtomicU64::new(0),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.slots().len()
    }

    pub fn default_capabilities(&self) -> &EngineCapabilities {
        &self.inner.default_capabilities
    }

    /// Lock an idle engine able to serve `job`.
    ///
    /// A job with custom capabilities always gets a freshly built engine: the
    /// reserved slot's engine is destroyed and rebuilt for it, even when an
    /// identical custom engine sits idle. A default job rebuilds only when
    /// the slot it lands on is empty or holds a custom engine. The slot stays
    /// busy throughout, so the new engine is never visible to another job
    /// before this one releases it.
    pub async fn acquire(&self, job: &Job) -> Result<EngineLease, RenderError> {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(RenderError::ShuttingDown);
        }

        let defaults = &self.inner.default_capabilities;
        let custom = job.engine_config.as_ref().filter(|caps| *caps != defaults);

        let (reservation, current) = self.reserve(custom.is_some())?;

        let engine = match (custom, current) {
            (Some(caps), stale) => self.rebuild(reservation.slot, stale, caps.clone()).await?,
            (None, Some(engine)) if engine.capabilities() == defaults => engine,
            (None, stale) => self.rebuild(reservation.slot, stale, defaults.clone()).await?,
        };

        Ok(EngineLease { reservation, engine })
    }

    fn reserve(
        &self,
        custom: bool,
    ) -> Result<(SlotReservation, Option<Arc<dyn RenderEngine>>), RenderError> {
        let defaults = &self.inner.default_capabilities;
        // Lower is better: an engine of the wanted sort, then an empty slot
        let rank = |slot: &Slot| match &slot.engine {
            Some(engine) if (engine.capabilities() == defaults) != custom => 0,
            None => 1,
            Some(_) => 2,
        };

        let (index, engine, busy) = {
            let mut slots = self.inner.slots();

            let Some(index) = slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.is_idle())
                .min_by_key(|(_, slot)| rank(*slot))
                .map(|(index, _)| index)
            else {
                error!(
                    "No idle engine among {} slots; admission let too many jobs through",
                    slots.len()
                );
                return Err(RenderError::PoolExhausted);
            };

            slots[index].busy = true;
            let engine = slots[index].engine.clone();
            let busy = slots.iter().filter(|s| s.busy).count();
            (index, engine, busy)
        };

        self.inner.metrics.set_busy_engines(busy);
        debug!("{} reserved", SlotId(index));

        Ok((
            SlotReservation {
                pool: self.inner.clone(),
                slot: SlotId(index),
            },
            engine,
        ))
    }

    /// Replace the engine in a reserved slot. On failure the slot is left
    /// empty and the next acquire that lands on it tries again.
    async fn rebuild(
        &self,
        slot: SlotId,
        stale: Option<Arc<dyn RenderEngine>>,
        capabilities: EngineCapabilities,
    ) -> Result<Arc<dyn RenderEngine>, RenderError> {
        if let Some(stale) = stale {
            info!("Replacing engine in {}", slot);
            self.inner.clear(slot);
            stale.destroy().await;
        } else {
            info!("Recreating engine in empty {}", slot);
        }

        let engine = launch(
            self.inner.factory.as_ref(),
            self.inner.viewport,
            capabilities,
            &self.inner.user_agent,
        )
        .await
        .map_err(|e| {
            error!("Failed to rebuild engine in {}: {}", slot, e);
            e
        })?;

        if !self.inner.store(slot, engine.clone()) {
            warn!("Discarding engine rebuilt for {} during shutdown", slot);
            engine.destroy().await;
            return Err(RenderError::ShuttingDown);
        }
        self.inner.replacements.fetch_add(1, Ordering::Relaxed);
        self.inner.metrics.record_replacement();

        Ok(engine)
    }

    pub fn stats(&self) -> PoolStats {
        let slots = self.inner.slots();

        let mut stats = PoolStats {
            total: slots.len(),
            replacements: self.inner.replacements.load(Ordering::Relaxed),
            ..Default::default()
        };

        for slot in slots.iter() {
            stats.jobs_served += slot.jobs_served;
            if slot.busy {
                stats.busy += 1;
            } else if slot.engine.is_some() {
                stats.idle += 1;
            } else {
                stats.empty += 1;
            }
        }

        stats
    }

    /// Stop handing out engines, wait up to `grace` for running jobs to
    /// release theirs, then destroy every engine.
    pub async fn shutdown(&self, grace: Duration) {
        info!("Shutting down worker pool...");
        self.inner.shutting_down.store(true, Ordering::Release);

        let deadline = Instant::now() + grace;
        loop {
            let busy = self.stats().busy;
            if busy == 0 {
                break;
            }
            if Instant::now() >= deadline {
                warn!("{} engines still busy after {:?}; destroying anyway", busy, grace);
                break;
            }
            sleep(Duration::from_millis(100)).await;
        }

        let engines: Vec<_> = self
            .inner
            .slots()
            .iter_mut()
            .filter_map(|slot| slot.engine.take())
            .collect();

        for engine in engines {
            engine.destroy().await;
        }

        info!("Worker pool shutdown complete");
    }
}

async fn launch(
    factory: &dyn EngineFactory,
    viewport: Viewport,
    capabilities: EngineCapabilities,
    user_agent: &str,
) -> Result<Arc<dyn RenderEngine>, RenderError> {
    let engine = factory.create(viewport, capabilities).await?;

    if let Err(e) = engine.set_user_agent(user_agent).await {
        engine.destroy().await;
        return Err(e);
    }

    Ok(engine)
}
