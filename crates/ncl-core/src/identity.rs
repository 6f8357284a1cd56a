//! Identity Cache
//!
//! Bounded mapping from identity key to display metadata and an optional
//! owned pool tile. Storage is a fixed ring with a cursor at the oldest
//! entry, so eviction is FIFO by insertion and never shifts entries.
//!
//! Eviction always releases the evicted entry's tile before its slot is
//! reused, keeping pool ownership exclusive. Entries still referenced from
//! outside (feed rows) are pinned: eviction rotates them to the newest end
//! and takes the next oldest instead.

use log::{debug, warn};

use crate::error::IconError;
use crate::pool::{PixelBufferPool, PoolIndex, Rgb565};

/// Stable author identifier (a Nostr x-only public key).
pub type IdentityKey = [u8; 32];

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityEntry {
    pub key: IdentityKey,
    pub display_name: Option<String>,
    pub icon_url: Option<String>,
    /// Placeholder colour shown until (or instead of) a decoded icon
    pub color: Rgb565,
    /// Pool slot exclusively owned by this entry
    pub tile: Option<PoolIndex>,
    pub meta_received: bool,
    pub fetch_failed: bool,
}

impl IdentityEntry {
    pub fn new(key: IdentityKey) -> Self {
        Self {
            key,
            display_name: None,
            icon_url: None,
            color: derive_color(&key),
            tile: None,
            meta_received: false,
            fetch_failed: false,
        }
    }

    /// Whether the scheduler should consider fetching this entry's icon.
    pub fn wants_icon(&self) -> bool {
        self.tile.is_none() && !self.fetch_failed && self.icon_url.is_some()
    }
}

/// Result of an [`IdentityCache::upsert`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new entry was created; `evicted` is the key pushed out to make room
    Inserted { evicted: Option<IdentityKey> },
    /// An existing entry had at least one field changed
    Updated,
    /// An existing entry was already up to date
    Unchanged,
    /// Cache is full and every entry is pinned; nothing was inserted
    Rejected(IconError),
}

/// Deterministic placeholder colour from the key's leading bytes.
///
/// The top bits of each channel are forced on so placeholders are never
/// near-black against the background.
pub fn derive_color(key: &[u8]) -> Rgb565 {
    let byte = |i: usize| key.get(i).copied().unwrap_or(0);
    Rgb565::from_rgb(byte(0) | 0x40, byte(1) | 0x40, byte(2) | 0x40)
}

/// Treat empty strings as absent so they never overwrite real values.
fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

pub struct IdentityCache {
    slots: Vec<Option<IdentityEntry>>,
    /// Ring position of the oldest entry
    head: usize,
    len: usize,
}

impl IdentityCache {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "identity cache capacity must be non-zero");
        Self {
            slots: vec![None; capacity],
            head: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn ring_pos(&self, nth: usize) -> usize {
        (self.head + nth) % self.slots.len()
    }

    fn position(&self, key: &IdentityKey) -> Option<usize> {
        (0..self.len)
            .map(|n| self.ring_pos(n))
            .find(|&pos| self.slots[pos].as_ref().is_some_and(|e| &e.key == key))
    }

    /// Linear scan; no allocation.
    pub fn lookup(&self, key: &IdentityKey) -> Option<&IdentityEntry> {
        self.position(key).and_then(|pos| self.slots[pos].as_ref())
    }

    pub fn get_mut(&mut self, key: &IdentityKey) -> Option<&mut IdentityEntry> {
        let pos = self.position(key)?;
        self.slots[pos].as_mut()
    }

    /// Insert or merge metadata for `key`.
    ///
    /// Non-empty incoming fields replace stored ones; empty or missing fields
    /// never clear existing values. A changed icon URL drops the old tile and
    /// the failure mark so the new icon gets fetched.
    pub fn upsert(
        &mut self,
        key: &IdentityKey,
        display_name: Option<&str>,
        icon_url: Option<&str>,
        pool: &mut PixelBufferPool,
    ) -> UpsertOutcome {
        self.upsert_pinned(key, display_name, icon_url, pool, |_| false)
    }

    /// [`upsert`](Self::upsert), never evicting a key for which `pinned`
    /// returns `true`.
    pub fn upsert_pinned(
        &mut self,
        key: &IdentityKey,
        display_name: Option<&str>,
        icon_url: Option<&str>,
        pool: &mut PixelBufferPool,
        pinned: impl Fn(&IdentityKey) -> bool,
    ) -> UpsertOutcome {
        let display_name = non_empty(display_name);
        let icon_url = non_empty(icon_url);

        if let Some(pos) = self.position(key) {
            let Some(entry) = self.slots[pos].as_mut() else {
                return UpsertOutcome::Unchanged;
            };
            return Self::merge(entry, display_name, icon_url, pool);
        }

        let mut entry = IdentityEntry::new(*key);
        entry.display_name = display_name.map(str::to_string);
        entry.icon_url = icon_url.map(str::to_string);
        entry.meta_received = display_name.is_some() || icon_url.is_some();

        let evicted = if self.len == self.slots.len() {
            debug!("[IdentityCache] {}, evicting to admit {:02x}{:02x}..", IconError::CacheFull, key[0], key[1]);
            match self.evict_oldest(pool, &pinned) {
                Some(old) => Some(old),
                None => {
                    warn!("[IdentityCache] Every entry is pinned, dropping {:02x}{:02x}..", key[0], key[1]);
                    return UpsertOutcome::Rejected(IconError::CacheFull);
                }
            }
        } else {
            None
        };

        let pos = self.ring_pos(self.len);
        self.slots[pos] = Some(entry);
        self.len += 1;
        UpsertOutcome::Inserted { evicted }
    }

    fn merge(
        entry: &mut IdentityEntry,
        display_name: Option<&str>,
        icon_url: Option<&str>,
        pool: &mut PixelBufferPool,
    ) -> UpsertOutcome {
        let mut changed = false;

        if let Some(name) = display_name {
            if entry.display_name.as_deref() != Some(name) {
                entry.display_name = Some(name.to_string());
                changed = true;
            }
        }

        if let Some(url) = icon_url {
            if entry.icon_url.as_deref() != Some(url) {
                if let Some(idx) = entry.tile.take() {
                    pool.release(idx);
                }
                entry.fetch_failed = false;
                entry.icon_url = Some(url.to_string());
                changed = true;
            }
        }

        if (display_name.is_some() || icon_url.is_some()) && !entry.meta_received {
            entry.meta_received = true;
            changed = true;
        }

        if changed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Unchanged
        }
    }

    /// Drop the oldest unpinned entry, releasing its tile first. Only called
    /// on a full ring, where advancing `head` turns the oldest into the newest.
    fn evict_oldest(
        &mut self,
        pool: &mut PixelBufferPool,
        pinned: &impl Fn(&IdentityKey) -> bool,
    ) -> Option<IdentityKey> {
        if self.len == 0 {
            return None;
        }
        debug_assert_eq!(self.len, self.slots.len());
        let mut rotated = 0;
        while self.slots[self.head].as_ref().is_some_and(|e| pinned(&e.key)) {
            rotated += 1;
            if rotated > self.len {
                return None;
            }
            self.head = (self.head + 1) % self.slots.len();
        }

        let old = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;

        let old = old?;
        if let Some(idx) = old.tile {
            pool.release(idx);
        }
        debug!("[IdentityCache] Evicted {:02x}{:02x}.. (tile: {:?})", old.key[0], old.key[1], old.tile);
        Some(old.key)
    }

    /// Entries in insertion order, oldest first.
    pub fn iter_oldest_first(&self) -> impl DoubleEndedIterator<Item = &IdentityEntry> + '_ {
        (0..self.len).filter_map(move |n| self.slots[self.ring_pos(n)].as_ref())
    }

    /// Entries in insertion order, newest first.
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &IdentityEntry> + '_ {
        self.iter_oldest_first().rev()
    }

    pub fn tiles_held(&self) -> usize {
        self.iter_oldest_first().filter(|e| e.tile.is_some()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.iter_oldest_first().filter(|e| e.fetch_failed).count()
    }
}
