//! ncl-core: bounded avatar decoding and icon caching for a compact Nostr
//! feed client.
//!
//! Everything here is sized up front. A fixed pool of RGB565 tiles holds
//! decoded avatars, a fixed-capacity identity cache holds profile metadata
//! and a fixed ring holds recent posts. Icons are fetched and decoded one per
//! scheduler tick, and every download and decode is bounded before it starts.
//!
//! ```no_run
//! use ncl_core::{DownloadScheduler, EngineConfig, FeedEvent};
//!
//! # async fn demo() -> Result<(), String> {
//! let mut scheduler = DownloadScheduler::http(EngineConfig::default())?;
//! scheduler.ingest(FeedEvent::Metadata {
//!     identity: [7; 32],
//!     display_name: Some("satoshi".into()),
//!     icon_url: Some("https://example.com/avatar.png".into()),
//! });
//! scheduler.tick().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod feed;
pub mod fetcher;
pub mod identity;
pub mod image;
pub mod net;
pub mod pool;
pub mod scheduler;

pub use config::EngineConfig;
pub use engine::{Avatar, CacheStats, Engine};
pub use error::{IconError, ResultExt};
pub use event::FeedEvent;
pub use feed::{FeedEntry, FeedStore};
pub use fetcher::{CacheResult, IconFetcher};
pub use identity::{IdentityCache, IdentityEntry, IdentityKey};
pub use net::{FetchLimits, HttpIconSource, IconSource};
pub use pool::{PixelBufferPool, PoolIndex, Rgb565, SlotGuard, TileSize};
pub use scheduler::{DownloadScheduler, TickOutcome};
