//! Avatar decode pipeline
//!
//! Sniffs the container from its leading bytes, runs the matching decoder
//! and resamples the result into a canonical [`Tile`]. Each decoder validates
//! declared dimensions against [`DecodeLimits`] before doing any real work,
//! so a started decode is always bounded.
//!
//! - [`png`] - in-crate decoder (streaming inflate, filter reconstruction)
//! - [`jpeg`] - marker scan + DCT-scaled decode (baseline and progressive)
//! - [`webp`] - library decode scaled to fit the tile
//! - [`resample`] - nearest-neighbour resampler shared by all three

pub mod jpeg;
pub mod png;
pub mod resample;
pub mod webp;

use std::panic::{self, AssertUnwindSafe};

use crate::error::IconError;
use crate::pool::{Rgb565, TileSize};

/// Container formats recognised by [`sniff`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    WebP,
    Unknown,
}

const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";

/// Detect the container format from magic bytes, never from a URL or header.
pub fn sniff(bytes: &[u8]) -> ImageFormat {
    if bytes.starts_with(PNG_SIGNATURE) {
        ImageFormat::Png
    } else if bytes.starts_with(&[0xFF, 0xD8]) {
        ImageFormat::Jpeg
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        ImageFormat::WebP
    } else {
        ImageFormat::Unknown
    }
}

/// Pre-decode ceilings that bound memory and time of a single decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    pub png_max_raw_bytes: usize,
    pub jpeg_max_dimension: u32,
    pub jpeg_progressive_max_dimension: u32,
    pub webp_max_dimension: u32,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        crate::config::EngineConfig::default().decode_limits()
    }
}

/// One decode job; consumed once and never stored.
#[derive(Debug, Clone, Copy)]
pub struct DecodeRequest<'a> {
    pub source: &'a [u8],
    pub format: ImageFormat,
    pub target: TileSize,
}

impl<'a> DecodeRequest<'a> {
    /// Build a request whose format comes from sniffing `source`.
    pub fn sniffed(source: &'a [u8], target: TileSize) -> Self {
        Self {
            source,
            format: sniff(source),
            target,
        }
    }
}

/// A decoded icon at canonical size, not yet committed to the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub size: TileSize,
    pub pixels: Vec<Rgb565>,
}

impl Tile {
    pub fn new(size: TileSize) -> Self {
        Self {
            size,
            pixels: vec![Rgb565::BLACK; size.pixels()],
        }
    }

    #[inline]
    pub fn pixel(&self, x: u16, y: u16) -> Rgb565 {
        self.pixels[y as usize * self.size.width as usize + x as usize]
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [Rgb565] {
        let w = self.size.width as usize;
        &mut self.pixels[y * w..(y + 1) * w]
    }
}

/// Composite an 8-bit RGBA sample over black.
#[inline]
pub(crate) fn over_black(r: u8, g: u8, b: u8, a: u8) -> Rgb565 {
    if a == 255 {
        return Rgb565::from_rgb(r, g, b);
    }
    let mul = |c: u8| ((c as u16 * a as u16 + 127) / 255) as u8;
    Rgb565::from_rgb(mul(r), mul(g), mul(b))
}

/// Run a third-party decoder call, converting a panic inside it into
/// [`IconError::DecodeLibraryFault`].
pub(crate) fn guarded<T>(what: &str, f: impl FnOnce() -> Result<T, IconError>) -> Result<T, IconError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(IconError::DecodeLibraryFault(format!("{}: {}", what, msg)))
        }
    }
}

/// Decode `req` into a canonical tile using the format it declares.
pub fn decode(req: &DecodeRequest<'_>, limits: &DecodeLimits) -> Result<Tile, IconError> {
    if req.target.pixels() == 0 {
        return Err(IconError::unsupported("empty target tile"));
    }
    match req.format {
        ImageFormat::Png => png::decode(req.source, req.target, limits),
        ImageFormat::Jpeg => jpeg::decode(req.source, req.target, limits),
        ImageFormat::WebP => webp::decode(req.source, req.target, limits),
        ImageFormat::Unknown => Err(IconError::unsupported("unrecognised image container")),
    }
}
