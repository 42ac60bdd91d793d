//! Per-domain admission control for outbound work.
//!
//! A [`Limiter`] caps how many tasks of one domain run at once, spaces task
//! starts by a minimum interval, and optionally draws every start from a
//! refillable quota (the reservoir). Waiting tasks are admitted strictly in
//! FIFO order. All bookkeeping for a domain happens under one mutex, and a
//! task holds its slot until its future completes or is dropped.
//!
//! [`Limiters`] is an explicitly constructed registry keyed by domain name;
//! whoever wires the process together owns it and hands it to collaborators.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::{Result, SearchError};

/// Domain for page fetches.
pub const SCRAPE: &str = "scrape";
/// Domain for headless browser operations.
pub const BROWSE: &str = "browse";
/// Domain for search provider calls.
pub const SEARCH: &str = "search";

/// Refillable quota over a fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservoirConfig {
    /// Starts allowed per window.
    pub capacity: u32,
    /// Window length in milliseconds.
    pub refill_interval_ms: u64,
}

impl ReservoirConfig {
    pub fn new(capacity: u32, refill_interval: Duration) -> Self {
        Self {
            capacity,
            refill_interval_ms: refill_interval.as_millis() as u64,
        }
    }

    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }
}

/// Admission rules for one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Tasks allowed in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Minimum gap between two task starts, in milliseconds.
    #[serde(default)]
    pub min_spacing_ms: u64,
    /// Optional start quota.
    #[serde(default)]
    pub reservoir: Option<ReservoirConfig>,
}

fn default_max_concurrent() -> usize {
    5
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            min_spacing_ms: 100,
            reservoir: None,
        }
    }
}

impl LimiterConfig {
    pub fn new(max_concurrent: usize, min_spacing: Duration) -> Self {
        Self {
            max_concurrent,
            min_spacing_ms: min_spacing.as_millis() as u64,
            reservoir: None,
        }
    }

    pub fn with_reservoir(mut self, reservoir: ReservoirConfig) -> Self {
        self.reservoir = Some(reservoir);
        self
    }

    /// Page fetches: 3 at a time, 500ms apart.
    pub fn scrape() -> Self {
        Self::new(3, Duration::from_millis(500))
    }

    /// Browser operations: 2 at a time, 1s apart.
    pub fn browse() -> Self {
        Self::new(2, Duration::from_millis(1000))
    }

    /// Provider calls: 5 at a time, 200ms apart, 100 per minute.
    pub fn search() -> Self {
        Self::new(5, Duration::from_millis(200))
            .with_reservoir(ReservoirConfig::new(100, Duration::from_secs(60)))
    }

    pub fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.min_spacing_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(SearchError::Config(
                "max_concurrent must be greater than 0".into(),
            ));
        }
        if let Some(reservoir) = &self.reservoir {
            if reservoir.capacity == 0 {
                return Err(SearchError::Config(
                    "reservoir capacity must be greater than 0".into(),
                ));
            }
            if reservoir.refill_interval_ms == 0 {
                return Err(SearchError::Config(
                    "reservoir refill_interval_ms must be greater than 0".into(),
                ));
            }
        }
        Ok(())
    }
}

struct Waiter {
    key: Option<String>,
    tx: oneshot::Sender<Result<Slot>>,
}

struct Admission {
    waiter: Waiter,
    slot: Slot,
}

struct State {
    running: usize,
    remaining: Option<u32>,
    window_start: Instant,
    last_start: Option<Instant>,
    queue: VecDeque<Waiter>,
    wake_at: Option<Instant>,
    stopped: bool,
}

struct Inner {
    domain: String,
    config: LimiterConfig,
    state: Mutex<State>,
}

/// Occupied concurrency slot; releasing it admits the next waiter.
struct Slot {
    inner: Option<Arc<Inner>>,
}

impl Slot {
    fn disarm(&mut self) {
        self.inner = None;
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.release();
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(self: &Arc<Self>) {
        let admitted = {
            let mut state = self.lock();
            state.running = state.running.saturating_sub(1);
            self.dispatch(&mut state)
        };
        self.deliver(admitted);
    }

    fn refill(&self, state: &mut State, now: Instant) {
        let (Some(reservoir), Some(remaining)) = (&self.config.reservoir, &mut state.remaining)
        else {
            return;
        };
        let interval = reservoir.refill_interval();
        if interval.is_zero() {
            *remaining = reservoir.capacity;
            return;
        }
        let elapsed = now.saturating_duration_since(state.window_start);
        if elapsed >= interval {
            let windows = (elapsed.as_nanos() / interval.as_nanos()) as u32;
            state.window_start += interval * windows;
            *remaining = reservoir.capacity;
        }
    }

    /// Admits queued tasks for as long as every rule allows it.
    ///
    /// Admitted waiters are returned rather than notified; callers hand them
    /// to [`deliver`](Self::deliver) once the state lock is released.
    #[must_use]
    fn dispatch(self: &Arc<Self>, state: &mut State) -> Vec<Admission> {
        let mut admitted = Vec::new();
        loop {
            while state.queue.front().is_some_and(|w| w.tx.is_closed()) {
                state.queue.pop_front();
            }
            if state.queue.is_empty() || state.running >= self.config.max_concurrent {
                return admitted;
            }

            let now = Instant::now();
            self.refill(state, now);

            if state.remaining == Some(0) {
                if let Some(reservoir) = &self.config.reservoir {
                    let next_window = state.window_start + reservoir.refill_interval();
                    trace!("Limiter {} waiting for reservoir refill", self.domain);
                    self.wake_at(state, next_window);
                }
                return admitted;
            }

            if let Some(last) = state.last_start {
                let ready = last + self.config.min_spacing();
                if ready > now {
                    self.wake_at(state, ready);
                    return admitted;
                }
            }

            let Some(waiter) = state.queue.pop_front() else {
                return admitted;
            };
            state.running += 1;
            if let Some(remaining) = state.remaining.as_mut() {
                *remaining -= 1;
            }
            state.last_start = Some(now);
            trace!(
                "Limiter {} started {} ({} running)",
                self.domain,
                waiter.key.as_deref().unwrap_or("task"),
                state.running
            );

            admitted.push(Admission {
                waiter,
                slot: Slot {
                    inner: Some(Arc::clone(self)),
                },
            });
        }
    }

    /// Hands slots to admitted waiters. Must be called without the state lock.
    ///
    /// A waiter that went away after admission gives its slot and quota back,
    /// and the freed capacity is offered to the rest of the queue.
    fn deliver(self: &Arc<Self>, mut admitted: Vec<Admission>) {
        while !admitted.is_empty() {
            let mut refunded = 0;
            for Admission { waiter, slot } in admitted.drain(..) {
                if let Err(Ok(mut slot)) = waiter.tx.send(Ok(slot)) {
                    slot.disarm();
                    refunded += 1;
                }
            }
            if refunded == 0 {
                return;
            }

            let mut state = self.lock();
            state.running = state.running.saturating_sub(refunded);
            if let (Some(reservoir), Some(remaining)) =
                (&self.config.reservoir, state.remaining.as_mut())
            {
                *remaining = remaining
                    .saturating_add(refunded as u32)
                    .min(reservoir.capacity);
            }
            trace!(
                "Limiter {} reclaimed {} abandoned slots",
                self.domain,
                refunded
            );
            admitted = self.dispatch(&mut state);
        }
    }

    fn wake_at(self: &Arc<Self>, state: &mut State, deadline: Instant) {
        if state.wake_at.is_some_and(|pending| pending <= deadline) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        state.wake_at = Some(deadline);
        let inner = Arc::clone(self);
        handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let admitted = {
                let mut state = inner.lock();
                if state.wake_at == Some(deadline) {
                    state.wake_at = None;
                }
                inner.dispatch(&mut state)
            };
            inner.deliver(admitted);
        });
    }
}

/// Admission control for one domain. Cloning shares the same state.
#[derive(Clone)]
pub struct Limiter {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Limiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Limiter")
            .field("domain", &self.inner.domain)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Limiter {
    /// Creates a limiter for `domain`.
    pub fn new(domain: impl Into<String>, config: LimiterConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                domain: domain.into(),
                config,
                state: Mutex::new(State {
                    running: 0,
                    remaining: config.reservoir.map(|r| r.capacity),
                    window_start: Instant::now(),
                    last_start: None,
                    queue: VecDeque::new(),
                    wake_at: None,
                    stopped: false,
                }),
            }),
        }
    }

    /// Returns the domain name.
    pub fn domain(&self) -> &str {
        &self.inner.domain
    }

    /// Returns the admission rules.
    pub fn config(&self) -> &LimiterConfig {
        &self.inner.config
    }

    /// Runs `task` once admitted.
    pub async fn schedule<T, Fut>(&self, task: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        self.run(None, task).await
    }

    /// Runs `task` once admitted, tagging the slot with `key` in logs.
    ///
    /// Keys do not coalesce: two tasks with the same key both run.
    pub async fn schedule_keyed<T, Fut>(&self, key: &str, task: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        self.run(Some(key), task).await
    }

    async fn run<T, Fut>(&self, key: Option<&str>, task: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let (rx, admitted) = {
            let mut state = self.inner.lock();
            if state.stopped {
                return Err(self.shutdown_error());
            }
            let (tx, rx) = oneshot::channel();
            state.queue.push_back(Waiter {
                key: key.map(str::to_string),
                tx,
            });
            trace!(
                "Limiter {} queued {} ({} waiting)",
                self.inner.domain,
                key.unwrap_or("task"),
                state.queue.len()
            );
            (rx, self.inner.dispatch(&mut state))
        };
        self.inner.deliver(admitted);

        let _slot = match rx.await {
            Ok(admission) => admission?,
            Err(_) => return Err(self.shutdown_error()),
        };

        let outcome = task.await;
        if let Err(e) = &outcome {
            warn!(
                "Job {} failed in {}: {}",
                key.unwrap_or("task"),
                self.inner.domain,
                e
            );
        }
        outcome
    }

    /// Stops accepting work.
    ///
    /// With `drop_waiting_jobs`, tasks still in the queue fail with
    /// [`SearchError::Shutdown`]; otherwise they are still admitted. Running
    /// tasks always finish.
    pub fn stop(&self, drop_waiting_jobs: bool) {
        let mut state = self.inner.lock();
        state.stopped = true;
        if drop_waiting_jobs {
            let dropped = state.queue.len();
            for waiter in state.queue.drain(..) {
                let _ = waiter.tx.send(Err(self.shutdown_error()));
            }
            debug!(
                "Limiter {} stopped, dropped {} waiting jobs",
                self.inner.domain, dropped
            );
        } else {
            debug!("Limiter {} stopped", self.inner.domain);
        }
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.lock().stopped
    }

    /// Tasks currently holding a slot.
    pub fn running(&self) -> usize {
        self.inner.lock().running
    }

    /// Tasks waiting for admission.
    pub fn queued(&self) -> usize {
        self.inner
            .lock()
            .queue
            .iter()
            .filter(|w| !w.tx.is_closed())
            .count()
    }

    /// Starts left in the current reservoir window, if a reservoir is configured.
    pub fn remaining(&self) -> Option<u32> {
        let mut state = self.inner.lock();
        self.inner.refill(&mut state, Instant::now());
        state.remaining
    }

    fn shutdown_error(&self) -> SearchError {
        SearchError::Shutdown {
            domain: self.inner.domain.clone(),
        }
    }
}

/// Limiters keyed by domain name.
#[derive(Debug, Clone, Default)]
pub struct Limiters {
    limiters: HashMap<String, Limiter>,
}

impl Limiters {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the stock `scrape`, `browse` and `search` domains.
    pub fn with_defaults() -> Self {
        let mut limiters = Self::new();
        limiters.insert(SCRAPE, LimiterConfig::scrape());
        limiters.insert(BROWSE, LimiterConfig::browse());
        limiters.insert(SEARCH, LimiterConfig::search());
        limiters
    }

    /// Registers (or replaces) the limiter for `domain`.
    pub fn insert(&mut self, domain: impl Into<String>, config: LimiterConfig) -> Limiter {
        let domain = domain.into();
        let limiter = Limiter::new(domain.clone(), config);
        self.limiters.insert(domain, limiter.clone());
        limiter
    }

    /// Returns the limiter for `domain`.
    pub fn get(&self, domain: &str) -> Option<&Limiter> {
        self.limiters.get(domain)
    }

    /// Returns the limiter for `domain` or [`SearchError::UnknownDomain`].
    pub fn require(&self, domain: &str) -> Result<&Limiter> {
        self.get(domain)
            .ok_or_else(|| SearchError::UnknownDomain(domain.to_string()))
    }

    /// Returns the registered domain names.
    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.limiters.keys().map(String::as_str)
    }

    /// Runs `task` through the limiter of `domain`.
    pub async fn schedule<T, Fut>(&self, domain: &str, task: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        self.require(domain)?.schedule(task).await
    }

    /// Runs `task` through the limiter of `domain`, tagged with `key`.
    pub async fn schedule_keyed<T, Fut>(&self, domain: &str, key: &str, task: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        self.require(domain)?.schedule_keyed(key, task).await
    }

    /// Stops the limiter of `domain`.
    pub fn stop(&self, domain: &str, drop_waiting_jobs: bool) -> Result<()> {
        self.require(domain)?.stop(drop_waiting_jobs);
        Ok(())
    }

    /// Stops every limiter.
    pub fn stop_all(&self, drop_waiting_jobs: bool) {
        for limiter in self.limiters.values() {
            limiter.stop(drop_waiting_jobs);
        }
    }
}
