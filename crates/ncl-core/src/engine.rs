//! Engine
//!
//! Owns every bounded store (tile pool, identity cache, feed) and applies
//! incoming [`FeedEvent`]s to them. Renderers read avatars and feed rows
//! from here; the download scheduler borrows the cache and pool through it.

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::event::FeedEvent;
use crate::feed::FeedStore;
use crate::identity::{derive_color, IdentityCache, IdentityKey, UpsertOutcome};
use crate::pool::{PixelBufferPool, Rgb565};

/// What the renderer should draw for an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Avatar<'a> {
    /// Decoded canonical tile, row-major
    Tile(&'a [Rgb565]),
    /// No tile yet; fill with this colour
    Placeholder(Rgb565),
}

/// Snapshot of cache occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub identities: usize,
    pub identity_capacity: usize,
    pub tiles_used: usize,
    /// Tiles owned by cache entries; equals `tiles_used` between ticks
    pub tiles_held: usize,
    pub pool_slots: usize,
    pub failed_fetches: usize,
    pub feed_entries: usize,
    pub feed_capacity: usize,
}

impl CacheStats {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

pub struct Engine {
    config: EngineConfig,
    pool: PixelBufferPool,
    identities: IdentityCache,
    feed: FeedStore,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, String> {
        config.validate()?;
        let pool = PixelBufferPool::new(config.pool_slots, config.tile_size());
        info!(
            "[Engine] {} tile slots of {}x{} ({} bytes), {} identities, {} feed rows",
            config.pool_slots,
            config.tile_width,
            config.tile_height,
            pool.tile_bytes() * config.pool_slots,
            config.identity_capacity,
            config.feed_capacity
        );
        Ok(Self {
            identities: IdentityCache::new(config.identity_capacity),
            feed: FeedStore::new(config.feed_capacity, config.max_content_len, config.visible_rows),
            pool,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &PixelBufferPool {
        &self.pool
    }

    pub fn identities(&self) -> &IdentityCache {
        &self.identities
    }

    pub fn feed(&self) -> &FeedStore {
        &self.feed
    }

    /// Move the renderer's viewport; the scheduler prioritises these rows.
    pub fn set_viewport(&mut self, first: usize, rows: usize) {
        self.feed.set_viewport(first, rows);
    }

    /// Split borrow for the fetcher, which mutates one entry and the pool.
    pub(crate) fn cache_and_pool(&mut self) -> (&mut IdentityCache, &mut PixelBufferPool) {
        (&mut self.identities, &mut self.pool)
    }

    /// Apply an event. Returns `true` when icon work may have become available.
    ///
    /// Authors of rows still in the feed are pinned in the identity cache,
    /// so every row keeps its entry for as long as it is shown.
    pub fn ingest(&mut self, event: FeedEvent) -> bool {
        let feed = &self.feed;
        match event {
            FeedEvent::Metadata {
                identity,
                display_name,
                icon_url,
            } => {
                let outcome = self.identities.upsert_pinned(
                    &identity,
                    display_name.as_deref(),
                    icon_url.as_deref(),
                    &mut self.pool,
                    |k| feed.references(k),
                );
                match outcome {
                    UpsertOutcome::Inserted { evicted: Some(old) } => {
                        debug!("[Engine] Metadata for {:02x}{:02x}.. evicted {:02x}{:02x}..", identity[0], identity[1], old[0], old[1]);
                        true
                    }
                    UpsertOutcome::Rejected(e) => {
                        warn!("[Engine] Metadata for {:02x}{:02x}.. dropped: {}", identity[0], identity[1], e);
                        false
                    }
                    _ => true,
                }
            }
            FeedEvent::Post {
                identity,
                content,
                timestamp,
            } => {
                // Every post's author must exist in the cache before the row does
                let outcome = self.identities.upsert_pinned(&identity, None, None, &mut self.pool, |k| feed.references(k));
                if let UpsertOutcome::Rejected(e) = outcome {
                    warn!("[Engine] Post by {:02x}{:02x}.. dropped: {}", identity[0], identity[1], e);
                    return false;
                }
                self.feed.push(identity, &content, timestamp);
                false
            }
        }
    }

    /// Avatar for `key`: its tile if decoded, else its placeholder colour.
    pub fn avatar(&self, key: &IdentityKey) -> Avatar<'_> {
        match self.identities.lookup(key) {
            Some(entry) => match entry.tile.and_then(|idx| self.pool.read(idx)) {
                Some(pixels) => Avatar::Tile(pixels),
                None => Avatar::Placeholder(entry.color),
            },
            None => Avatar::Placeholder(derive_color(key)),
        }
    }

    pub fn display_name(&self, key: &IdentityKey) -> Option<&str> {
        self.identities.lookup(key)?.display_name.as_deref()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            identities: self.identities.len(),
            identity_capacity: self.identities.capacity(),
            tiles_used: self.pool.used_count(),
            tiles_held: self.identities.tiles_held(),
            pool_slots: self.pool.capacity(),
            failed_fetches: self.identities.failed_count(),
            feed_entries: self.feed.len(),
            feed_capacity: self.feed.capacity(),
        }
    }
}
