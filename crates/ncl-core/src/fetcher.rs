//! Icon Fetcher
//!
//! Fetches one identity's icon, sniffs and decodes it at canonical size and
//! commits it to a pool slot. The slot is claimed through a [`SlotGuard`],
//! so every failure path hands it back before returning.

use log::{debug, info, warn};

use crate::error::IconError;
use crate::identity::IdentityEntry;
use crate::image::{self, DecodeLimits, DecodeRequest, ImageFormat};
use crate::net::{FetchLimits, IconSource};
use crate::pool::{PixelBufferPool, PoolIndex, SlotGuard, TileSize};

/// Result of a fetch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheResult {
    /// Icon was fetched, decoded and committed to this slot
    Cached(PoolIndex),
    /// Entry already owns a decoded tile
    AlreadyCached(PoolIndex),
    /// Nothing was attempted; the entry is unchanged
    Skipped(IconError),
    /// Attempt failed; the entry is now marked failed for the session
    Failed(IconError),
}

pub struct IconFetcher<S> {
    source: S,
    fetch_limits: FetchLimits,
    decode_limits: DecodeLimits,
    tile_size: TileSize,
}

impl<S: IconSource> IconFetcher<S> {
    pub fn new(source: S, fetch_limits: FetchLimits, decode_limits: DecodeLimits, tile_size: TileSize) -> Self {
        Self {
            source,
            fetch_limits,
            decode_limits,
            tile_size,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch and decode `entry`'s icon into a fresh pool slot.
    ///
    /// Blocks the caller for at most one bounded download plus one bounded
    /// decode.
    pub async fn fetch(&self, entry: &mut IdentityEntry, pool: &mut PixelBufferPool) -> CacheResult {
        if let Some(idx) = entry.tile {
            return CacheResult::AlreadyCached(idx);
        }
        if entry.fetch_failed {
            return CacheResult::Skipped(IconError::PreviouslyFailed);
        }
        let url = match entry.icon_url.as_deref() {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => return CacheResult::Skipped(IconError::MissingUrl),
        };

        let Some(mut slot) = SlotGuard::allocate(pool) else {
            debug!("[IconFetcher] Pool saturated, skipping {}", url);
            return CacheResult::Skipped(IconError::PoolExhausted);
        };

        match self.download_and_decode(&url).await {
            Ok(tile) => {
                slot.write(&tile.pixels);
                let idx = slot.commit();
                entry.tile = Some(idx);
                info!("[IconFetcher] Cached {} -> slot {}", url, idx.get());
                CacheResult::Cached(idx)
            }
            Err(e) => {
                // Dropping the guard releases the slot
                drop(slot);
                entry.fetch_failed = true;
                warn!("[IconFetcher] Failed to cache {}: {}", url, e);
                CacheResult::Failed(e)
            }
        }
    }

    async fn download_and_decode(&self, url: &str) -> Result<image::Tile, IconError> {
        let bytes = self.source.fetch(url, &self.fetch_limits).await?;
        if bytes.len() > self.fetch_limits.max_bytes {
            return Err(IconError::ceiling("icon download", bytes.len(), self.fetch_limits.max_bytes));
        }

        let request = DecodeRequest::sniffed(&bytes, self.tile_size);
        if request.format == ImageFormat::Unknown {
            return Err(IconError::unsupported("unrecognised image container"));
        }
        debug!("[IconFetcher] {} bytes of {:?} from {}", bytes.len(), request.format, url);
        image::decode(&request, &self.decode_limits)
    }
}
