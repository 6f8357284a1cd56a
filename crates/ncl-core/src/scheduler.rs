//! Download Scheduler
//!
//! Drives icon fetching one item per tick so the feed stays responsive.
//! Each tick goes `Idle -> (pending?) -> SelectCandidate -> Fetch -> Idle`.
//!
//! Priority: identities behind visible feed rows come first, scanned from the
//! oldest visible row; otherwise the most recently inserted cache entries.
//! Two consecutive ticks that find nothing put the scheduler to sleep until
//! the next metadata event.

use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::IconError;
use crate::event::FeedEvent;
use crate::fetcher::{CacheResult, IconFetcher};
use crate::identity::IdentityKey;
use crate::net::{HttpIconSource, IconSource};
use crate::pool::PoolIndex;

/// Consecutive empty ticks before pending work is cleared
const IDLE_TICKS_BEFORE_SLEEP: u8 = 2;

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No work pending
    Idle,
    /// Work pending but no candidate qualified (or the pool is full)
    NoCandidate,
    Completed { key: IdentityKey, tile: PoolIndex },
    Failed { key: IdentityKey, error: IconError },
    Skipped { key: IdentityKey, error: IconError },
}

pub struct DownloadScheduler<S> {
    engine: Engine,
    fetcher: IconFetcher<S>,
    pending: bool,
    idle_ticks: u8,
}

impl DownloadScheduler<HttpIconSource> {
    /// Engine plus scheduler fetching over HTTP(S).
    pub fn http(config: EngineConfig) -> Result<Self, String> {
        let source = HttpIconSource::new(&config).map_err(|e| e.to_string())?;
        Ok(Self::new(Engine::new(config)?, source))
    }
}

impl<S: IconSource> DownloadScheduler<S> {
    pub fn new(engine: Engine, source: S) -> Self {
        let config = engine.config();
        let fetcher = IconFetcher::new(source, config.fetch_limits(), config.decode_limits(), config.tile_size());
        Self {
            engine,
            fetcher,
            pending: false,
            idle_ticks: 0,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn fetcher(&self) -> &IconFetcher<S> {
        &self.fetcher
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Apply an event to the engine, arming the scheduler if it may yield work.
    pub fn ingest(&mut self, event: FeedEvent) {
        if self.engine.ingest(event) {
            self.pending = true;
            self.idle_ticks = 0;
        }
    }

    /// Next identity whose icon should be fetched, if any.
    pub fn select_candidate(&self) -> Option<IdentityKey> {
        if self.engine.pool().is_full() {
            return None;
        }
        let identities = self.engine.identities();

        // Visible rows are newest first, so reverse to start from the oldest
        let visible = self
            .engine
            .feed()
            .visible()
            .rev()
            .filter_map(|row| identities.lookup(&row.identity))
            .find(|entry| entry.wants_icon())
            .map(|entry| entry.key);

        visible.or_else(|| {
            identities
                .iter_newest_first()
                .find(|entry| entry.wants_icon())
                .map(|entry| entry.key)
        })
    }

    /// Run one scheduling step: at most one fetch and one decode.
    pub async fn tick(&mut self) -> TickOutcome {
        if !self.pending {
            return TickOutcome::Idle;
        }

        let Some(key) = self.select_candidate() else {
            self.idle_ticks += 1;
            if self.idle_ticks >= IDLE_TICKS_BEFORE_SLEEP {
                debug!("[Scheduler] Nothing to fetch, sleeping until new metadata");
                self.pending = false;
                self.idle_ticks = 0;
            }
            return TickOutcome::NoCandidate;
        };
        self.idle_ticks = 0;

        let (cache, pool) = self.engine.cache_and_pool();
        let Some(entry) = cache.get_mut(&key) else {
            return TickOutcome::NoCandidate;
        };

        match self.fetcher.fetch(entry, pool).await {
            CacheResult::Cached(tile) | CacheResult::AlreadyCached(tile) => TickOutcome::Completed { key, tile },
            CacheResult::Failed(error) => TickOutcome::Failed { key, error },
            CacheResult::Skipped(error) => TickOutcome::Skipped { key, error },
        }
    }

    /// Tick until the scheduler goes idle or `max_ticks` runs out.
    ///
    /// Returns every non-idle outcome in order.
    pub async fn run_until_idle(&mut self, max_ticks: usize) -> Vec<TickOutcome> {
        let mut outcomes = Vec::new();
        for _ in 0..max_ticks {
            match self.tick().await {
                TickOutcome::Idle => break,
                outcome => outcomes.push(outcome),
            }
        }
        outcomes
    }

    /// Cooperative main loop: apply events as they arrive and tick once per
    /// `period`. Returns once the event channel closes and pending work drains.
    pub async fn run(&mut self, mut events: mpsc::Receiver<FeedEvent>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("[Scheduler] Started (tick every {:?})", period);

        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => self.ingest(event),
                    None => break,
                },
                _ = interval.tick() => {
                    if let TickOutcome::Failed { key, error } = self.tick().await {
                        warn!("[Scheduler] Icon for {:02x}{:02x}.. failed: {}", key[0], key[1], error);
                    }
                }
            }
        }

        // Bounded by the number of identities that could still want an icon
        let limit = self.engine.identities().capacity() + IDLE_TICKS_BEFORE_SLEEP as usize;
        let drained = self.run_until_idle(limit).await;
        info!("[Scheduler] Event stream closed, drained {} ticks", drained.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::mock::MockSource;
    use crate::image::png::fixtures as png;

    fn key(n: u8) -> IdentityKey {
        [n; 32]
    }

    fn url(n: u8) -> String {
        format!("https://icons.test/{}.png", n)
    }

    fn config(pool_slots: usize) -> EngineConfig {
        EngineConfig {
            tile_width: 8,
            tile_height: 8,
            pool_slots,
            identity_capacity: 16,
            feed_capacity: 8,
            visible_rows: 3,
            ..EngineConfig::default()
        }
    }

    fn scheduler(pool_slots: usize, source: MockSource) -> DownloadScheduler<MockSource> {
        DownloadScheduler::new(Engine::new(config(pool_slots)).unwrap(), source)
    }

    fn metadata(n: u8, icon: Option<String>) -> FeedEvent {
        FeedEvent::Metadata {
            identity: key(n),
            display_name: Some(format!("user{}", n)),
            icon_url: icon,
        }
    }

    fn post(n: u8, ts: u64) -> FeedEvent {
        FeedEvent::Post {
            identity: key(n),
            content: format!("post by {}", n),
            timestamp: ts,
        }
    }

    fn source_for(ids: impl IntoIterator<Item = u8>) -> MockSource {
        ids.into_iter()
            .fold(MockSource::default(), |s, n| s.with(&url(n), Ok(png::solid_rgb(8, 8, [n, n, n]))))
    }

    #[tokio::test]
    async fn test_visible_rows_take_priority() {
        let mut sched = scheduler(4, source_for((1..=3).chain(10..20)));
        for n in 1..=3 {
            sched.ingest(metadata(n, Some(url(n))));
        }
        for n in 10..20 {
            sched.ingest(metadata(n, Some(url(n))));
        }
        for n in 1..=3 {
            sched.ingest(post(n, n as u64));
        }

        // Oldest visible row already has its tile
        let (cache, pool) = sched.engine_mut().cache_and_pool();
        let idx = pool.allocate().unwrap();
        cache.get_mut(&key(1)).unwrap().tile = Some(idx);

        assert_eq!(sched.select_candidate(), Some(key(2)));
        assert!(matches!(sched.tick().await, TickOutcome::Completed { key: k, .. } if k == key(2)));
        assert!(matches!(sched.tick().await, TickOutcome::Completed { key: k, .. } if k == key(3)));
        // Visible rows satisfied: newest cache-only entry next
        assert_eq!(sched.select_candidate(), Some(key(19)));
        assert_eq!(*sched.fetcher().source().requests.borrow(), vec![url(2), url(3)]);
    }

    #[test]
    fn test_viewport_moves_priority() {
        let mut sched = scheduler(4, source_for(1..=4));
        for n in 1..=4 {
            sched.ingest(metadata(n, Some(url(n))));
            sched.ingest(post(n, n as u64));
        }
        // Rows 4, 3, 2 on screen by default
        assert_eq!(sched.select_candidate(), Some(key(2)));

        sched.engine_mut().set_viewport(3, 1);
        assert_eq!(sched.select_candidate(), Some(key(1)));
    }

    #[tokio::test]
    async fn test_two_empty_ticks_clear_pending() {
        let mut sched = scheduler(2, source_for([5]));
        sched.ingest(metadata(4, None));
        assert!(sched.is_pending());

        assert_eq!(sched.tick().await, TickOutcome::NoCandidate);
        assert!(sched.is_pending());
        assert_eq!(sched.tick().await, TickOutcome::NoCandidate);
        assert!(!sched.is_pending());
        assert_eq!(sched.tick().await, TickOutcome::Idle);

        // Posts alone never re-arm
        sched.ingest(post(4, 1));
        assert_eq!(sched.tick().await, TickOutcome::Idle);

        sched.ingest(metadata(5, Some(url(5))));
        assert!(matches!(sched.tick().await, TickOutcome::Completed { key: k, .. } if k == key(5)));
    }

    #[tokio::test]
    async fn test_full_pool_yields_no_candidate() {
        let mut sched = scheduler(1, source_for([1, 2]));
        sched.ingest(metadata(1, Some(url(1))));
        sched.ingest(metadata(2, Some(url(2))));

        let outcomes = sched.run_until_idle(10).await;
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0], TickOutcome::Completed { .. }));
        assert_eq!(outcomes[1..], [TickOutcome::NoCandidate, TickOutcome::NoCandidate]);
        assert_eq!(sched.engine().stats().tiles_used, 1);
    }

    #[tokio::test]
    async fn test_failed_identity_not_retried() {
        let source = MockSource::default().with(&url(1), Ok(b"\x89PNG\r\n\x1a\ntruncated".to_vec()));
        let mut sched = scheduler(2, source);
        sched.ingest(metadata(1, Some(url(1))));

        assert!(matches!(sched.tick().await, TickOutcome::Failed { key: k, .. } if k == key(1)));
        assert_eq!(sched.engine().pool().used_count(), 0);
        assert_eq!(sched.run_until_idle(5).await.len(), 2);
        assert_eq!(sched.fetcher().source().requests.borrow().len(), 1);

        // A new URL clears the failure
        sched.ingest(metadata(1, Some(url(7))));
        assert_eq!(sched.select_candidate(), Some(key(1)));
    }

    #[tokio::test]
    async fn test_run_drains_after_channel_closes() {
        let mut sched = scheduler(4, source_for([1, 2]));
        let (tx, rx) = mpsc::channel(8);
        tx.send(metadata(1, Some(url(1)))).await.unwrap();
        tx.send(post(2, 5)).await.unwrap();
        tx.send(metadata(2, Some(url(2)))).await.unwrap();
        drop(tx);

        sched.run(rx, Duration::from_millis(1)).await;

        let stats = sched.engine().stats();
        assert_eq!(stats.tiles_used, 2);
        assert_eq!(stats.feed_entries, 1);
        assert!(!sched.is_pending());
    }
}
