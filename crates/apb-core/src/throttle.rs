//! Outbound throttling.
//!
//! Every outbound platform call clears the bucket for its destination class
//! (group chat or private chat) and then the global bucket, right before it
//! runs. The class buckets never hold global capacity while they wait, so a
//! backlog in one class cannot stall the other. A bucket releases
//! a call only when it has a token, the minimum spacing since its previous
//! release has passed, and it is not cooling down after a queue overflow.
//! Waiting calls queue FIFO.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep_until, Instant};

use crate::domain::ChatId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BucketConfig {
    /// Burst size; also the ceiling for refills.
    pub capacity: u32,
    pub refill_amount: u32,
    pub refill_interval: Duration,
    /// Minimum gap between two releases from this bucket.
    pub min_spacing: Duration,
    /// Queue depth beyond which the bucket cools down for `penalty`.
    pub high_water: usize,
    pub penalty: Duration,
    /// Released calls allowed in flight at once.
    pub max_concurrent: usize,
}

impl BucketConfig {
    /// All outbound calls.
    pub fn global_default() -> Self {
        Self {
            capacity: 58,
            refill_amount: 58,
            refill_interval: Duration::from_millis(5000),
            min_spacing: Duration::from_millis(200),
            high_water: 58,
            penalty: Duration::from_millis(3000),
            max_concurrent: 2,
        }
    }

    /// Calls addressed to groups and channels.
    pub fn group_default() -> Self {
        Self {
            capacity: 58,
            refill_amount: 58,
            refill_interval: Duration::from_millis(2000),
            min_spacing: Duration::ZERO,
            high_water: 58,
            penalty: Duration::from_millis(3000),
            max_concurrent: 2,
        }
    }

    /// Calls addressed to a single user.
    pub fn private_default() -> Self {
        Self {
            capacity: 58,
            refill_amount: 58,
            refill_interval: Duration::from_millis(2000),
            min_spacing: Duration::from_millis(200),
            high_water: 58,
            penalty: Duration::from_millis(3000),
            max_concurrent: 2,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: u32,
    last_refill: Instant,
    last_release: Option<Instant>,
    penalty_until: Option<Instant>,
    /// Set on overflow; cleared once the queue is back under `high_water`.
    overflowed: bool,
}

/// Leaky bucket with a FIFO wait queue.
#[derive(Debug)]
pub struct RateBucket {
    name: &'static str,
    cfg: BucketConfig,
    state: Mutex<BucketState>,
    /// Fair async mutex: the holder is the head of the wait queue.
    turn: tokio::sync::Mutex<()>,
    queued: AtomicUsize,
    in_flight: Arc<Semaphore>,
    released: AtomicU64,
}

/// Held for the duration of a released call.
#[derive(Debug)]
pub struct BucketPermit {
    _in_flight: OwnedSemaphorePermit,
}

impl RateBucket {
    pub fn new(name: &'static str, cfg: BucketConfig) -> Self {
        Self::new_at(name, cfg, Instant::now())
    }

    pub fn new_at(name: &'static str, cfg: BucketConfig, now: Instant) -> Self {
        Self {
            name,
            cfg,
            state: Mutex::new(BucketState {
                tokens: cfg.capacity,
                last_refill: now,
                last_release: None,
                penalty_until: None,
                overflowed: false,
            }),
            turn: tokio::sync::Mutex::new(()),
            queued: AtomicUsize::new(0),
            in_flight: Arc::new(Semaphore::new(cfg.max_concurrent.max(1))),
            released: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn lock_state(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait in line until this bucket releases the caller.
    pub async fn acquire(&self) -> BucketPermit {
        let slot = QueueSlot::enter(self);

        let _turn = self.turn.lock().await;
        let in_flight = match Arc::clone(&self.in_flight).acquire_owned().await {
            Ok(p) => p,
            // The semaphore is never closed.
            Err(_) => unreachable!("bucket semaphore closed"),
        };

        loop {
            let next = self.lock_state().try_release(&self.cfg, Instant::now());
            match next {
                Ok(()) => break,
                Err(until) => sleep_until(until).await,
            }
        }

        self.released.fetch_add(1, Ordering::Relaxed);
        drop(slot);
        BucketPermit {
            _in_flight: in_flight,
        }
    }

    /// Tokens available right now (after applying any due refill).
    pub fn tokens(&self) -> u32 {
        let mut st = self.lock_state();
        st.refill(&self.cfg, Instant::now());
        st.tokens
    }

    /// Calls currently waiting in this bucket's queue.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    pub fn cooling_down(&self) -> bool {
        let st = self.lock_state();
        st.penalty_until.is_some_and(|until| Instant::now() < until)
    }
}

impl BucketState {
    fn refill(&mut self, cfg: &BucketConfig, now: Instant) {
        if cfg.refill_interval.is_zero() {
            self.tokens = cfg.capacity;
            self.last_refill = now;
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_refill);
        let periods = elapsed.as_nanos() / cfg.refill_interval.as_nanos();
        if periods == 0 {
            return;
        }
        let periods = u32::try_from(periods).unwrap_or(u32::MAX);
        self.tokens = self
            .tokens
            .saturating_add(periods.saturating_mul(cfg.refill_amount))
            .min(cfg.capacity);
        self.last_refill += cfg.refill_interval * periods;
    }

    /// Take a token if every release condition holds, else report when to retry.
    fn try_release(&mut self, cfg: &BucketConfig, now: Instant) -> Result<(), Instant> {
        self.refill(cfg, now);

        if let Some(until) = self.penalty_until {
            if now < until {
                return Err(until);
            }
            self.penalty_until = None;
        }
        if let Some(last) = self.last_release {
            let earliest = last + cfg.min_spacing;
            if now < earliest {
                return Err(earliest);
            }
        }
        if self.tokens == 0 {
            return Err(self.last_refill + cfg.refill_interval);
        }

        self.tokens -= 1;
        self.last_release = Some(now);
        Ok(())
    }
}

/// Counts a caller as queued from arrival until release (or cancellation).
struct QueueSlot<'a> {
    bucket: &'a RateBucket,
}

impl<'a> QueueSlot<'a> {
    fn enter(bucket: &'a RateBucket) -> Self {
        let depth = bucket.queued.fetch_add(1, Ordering::SeqCst) + 1;
        if depth > bucket.cfg.high_water {
            let mut st = bucket.lock_state();
            // One cooldown per overflow; the queue must drain below the
            // high-water mark before another can start.
            if !st.overflowed {
                st.overflowed = true;
                st.penalty_until = Some(Instant::now() + bucket.cfg.penalty);
                tracing::warn!(
                    bucket = bucket.name,
                    depth,
                    penalty_ms = bucket.cfg.penalty.as_millis() as u64,
                    "outbound queue over high water; cooling down"
                );
            }
        }
        Self { bucket }
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        let depth = self.bucket.queued.fetch_sub(1, Ordering::SeqCst) - 1;
        if depth <= self.bucket.cfg.high_water {
            let mut st = self.bucket.lock_state();
            st.overflowed = false;
        }
    }
}

/// Which destination-class bucket a call goes through (besides the global one).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// No destination chat: global bucket only.
    Global,
    Group,
    Private,
}

impl Route {
    pub fn for_chat(chat: ChatId) -> Self {
        if chat.is_group() {
            Route::Group
        } else {
            Route::Private
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThrottleConfig {
    pub global: BucketConfig,
    pub group: BucketConfig,
    pub private: BucketConfig,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global: BucketConfig::global_default(),
            group: BucketConfig::group_default(),
            private: BucketConfig::private_default(),
        }
    }
}

/// The three outbound buckets.
#[derive(Debug)]
pub struct OutboundThrottler {
    global: RateBucket,
    group: RateBucket,
    private: RateBucket,
}

impl OutboundThrottler {
    pub fn new(cfg: ThrottleConfig) -> Self {
        Self {
            global: RateBucket::new("global", cfg.global),
            group: RateBucket::new("group", cfg.group),
            private: RateBucket::new("private", cfg.private),
        }
    }

    /// Run `call` once the route's bucket and then the global bucket release it.
    pub async fn schedule<T, F, Fut>(&self, route: Route, call: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _class = match route {
            Route::Global => None,
            Route::Group => Some(self.group.acquire().await),
            Route::Private => Some(self.private.acquire().await),
        };
        // Taken last so the global window counts the call when it actually runs.
        let _global = self.global.acquire().await;
        call().await
    }

    pub fn global(&self) -> &RateBucket {
        &self.global
    }

    pub fn group(&self) -> &RateBucket {
        &self.group
    }

    pub fn private(&self) -> &RateBucket {
        &self.private
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_bucket(capacity: u32, interval_ms: u64) -> BucketConfig {
        BucketConfig {
            capacity,
            refill_amount: capacity,
            refill_interval: Duration::from_millis(interval_ms),
            min_spacing: Duration::ZERO,
            high_water: 1000,
            penalty: Duration::from_millis(3000),
            max_concurrent: 1000,
        }
    }

    async fn release_offsets(bucket: Arc<RateBucket>, n: usize) -> Vec<u64> {
        let start = Instant::now();
        let mut tasks = Vec::new();
        for _ in 0..n {
            let b = bucket.clone();
            tasks.push(tokio::spawn(async move {
                let _p = b.acquire().await;
                Instant::now().duration_since(start).as_millis() as u64
            }));
        }
        let mut out = Vec::new();
        for t in tasks {
            out.push(t.await.unwrap());
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn never_releases_more_than_capacity_per_refill_window() {
        let bucket = Arc::new(RateBucket::new("t", open_bucket(5, 1000)));
        let offsets = release_offsets(bucket.clone(), 12).await;

        for window_start in [0u64, 1000, 2000] {
            let in_window = offsets
                .iter()
                .filter(|o| **o >= window_start && **o < window_start + 1000)
                .count();
            assert!(in_window <= 5, "window {window_start}: {in_window} releases");
        }
        assert_eq!(offsets.iter().filter(|o| **o < 1000).count(), 5);
        assert_eq!(*offsets.iter().max().unwrap(), 2000);
        assert_eq!(bucket.released(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_capacity() {
        let bucket = RateBucket::new("t", open_bucket(3, 100));
        let _a = bucket.acquire().await;
        let _b = bucket.acquire().await;
        assert_eq!(bucket.tokens(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(bucket.tokens(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn min_spacing_separates_releases() {
        let cfg = BucketConfig {
            min_spacing: Duration::from_millis(200),
            ..open_bucket(10, 10_000)
        };
        let offsets = release_offsets(Arc::new(RateBucket::new("t", cfg)), 3).await;
        assert_eq!(offsets, vec![0, 200, 400]);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_overflow_triggers_cooldown() {
        let cfg = BucketConfig {
            high_water: 2,
            penalty: Duration::from_millis(3000),
            ..open_bucket(1, 100)
        };
        let bucket = Arc::new(RateBucket::new("t", cfg));
        assert_eq!(bucket.name(), "t");
        assert!(!bucket.cooling_down());

        let watcher = {
            let b = bucket.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                (b.queued(), b.cooling_down())
            })
        };
        let offsets = release_offsets(bucket.clone(), 4).await;
        let (queued_mid_cooldown, cooling_mid_cooldown) = watcher.await.unwrap();
        assert_eq!(queued_mid_cooldown, 3);
        assert!(cooling_mid_cooldown);
        assert_eq!(bucket.queued(), 0);
        assert!(!bucket.cooling_down());

        assert_eq!(offsets[0], 0);
        // The fourth arrival overflowed the queue: nothing else leaves before
        // the cooldown ends, then draining resumes.
        assert!(offsets[1] >= 3000, "released during cooldown: {offsets:?}");
        assert!(offsets[2] > offsets[1] && offsets[3] > offsets[2]);
        assert!(offsets[3] < 3000 + 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn max_concurrent_limits_calls_in_flight() {
        let cfg = BucketConfig {
            max_concurrent: 2,
            ..open_bucket(100, 1000)
        };
        let bucket = Arc::new(RateBucket::new("t", cfg));
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let (b, live, peak) = (bucket.clone(), live.clone(), peak.clone());
            tasks.push(tokio::spawn(async move {
                let _p = b.acquire().await;
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                live.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn calls_clear_global_and_their_class_bucket() {
        let t = OutboundThrottler::new(ThrottleConfig {
            global: open_bucket(10, 1000),
            group: open_bucket(10, 1000),
            private: open_bucket(10, 1000),
        });

        let v = t
            .schedule(Route::for_chat(ChatId(-100)), || async { 7 })
            .await;
        assert_eq!(v, 7);
        t.schedule(Route::for_chat(ChatId(42)), || async {}).await;
        t.schedule(Route::Global, || async {}).await;

        assert_eq!(t.global().released(), 3);
        assert_eq!(t.group().released(), 1);
        assert_eq!(t.private().released(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn private_backlog_does_not_stall_group_calls() {
        let t = Arc::new(OutboundThrottler::new(ThrottleConfig {
            global: BucketConfig {
                max_concurrent: 2,
                ..open_bucket(100, 1000)
            },
            group: open_bucket(100, 1000),
            private: open_bucket(1, 10_000),
        }));

        let mut parked = Vec::new();
        for _ in 0..3 {
            let t = t.clone();
            parked.push(tokio::spawn(async move {
                t.schedule(Route::Private, || async {}).await;
            }));
        }
        tokio::time::sleep(Duration::from_millis(1)).await;

        let start = Instant::now();
        t.schedule(Route::Group, || async {}).await;
        assert!(
            start.elapsed() < Duration::from_millis(10),
            "group call waited {:?}",
            start.elapsed()
        );
        assert_eq!(t.private().released(), 1);
        assert_eq!(t.private().queued(), 2);

        for p in parked {
            p.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_calls_count_in_the_global_window_they_run_in() {
        let start = Instant::now();
        let t = Arc::new(OutboundThrottler::new(ThrottleConfig {
            global: open_bucket(3, 1000),
            group: open_bucket(100, 1000),
            private: open_bucket(1, 1000),
        }));
        let ran = Arc::new(Mutex::new(Vec::new()));

        let spawn = |route: Route| {
            let (t, ran) = (t.clone(), ran.clone());
            tokio::spawn(async move {
                t.schedule(route, || async {
                    let at = Instant::now().duration_since(start).as_millis() as u64;
                    ran.lock().unwrap().push(at);
                })
                .await;
            })
        };

        let mut tasks: Vec<_> = (0..3).map(|_| spawn(Route::Private)).collect();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        tasks.extend((0..3).map(|_| spawn(Route::Group)));
        for task in tasks {
            task.await.unwrap();
        }

        let ran = ran.lock().unwrap().clone();
        assert_eq!(ran.len(), 6);
        for window_start in [0u64, 1000, 2000] {
            let in_window = ran
                .iter()
                .filter(|at| **at >= window_start && **at < window_start + 1000)
                .count();
            assert!(in_window <= 3, "window {window_start}: {ran:?}");
        }
    }
}
