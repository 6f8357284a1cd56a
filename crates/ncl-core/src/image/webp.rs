//! WebP decode scaled to fit the canonical tile.
//!
//! Dimensions are probed from the container before decoding, and the decode
//! itself runs under the `image` crate's allocation limits. The result keeps
//! its aspect ratio: the longer side fills the tile, the shorter side shrinks
//! proportionally and the image is centred on black.

use std::io::Cursor;

use ::image::imageops::FilterType;
use ::image::{DynamicImage, ImageFormat, ImageReader, Limits};

use super::{guarded, over_black, DecodeLimits, Tile};
use crate::error::{IconError, ResultExt};
use crate::pool::TileSize;

/// Size of `(width, height)` scaled to fit inside `target`, at least 1x1.
pub fn fit_within(width: u32, height: u32, target: TileSize) -> (u32, u32) {
    let (tw, th) = (target.width as u64, target.height as u64);
    let (w, h) = (width as u64, height as u64);
    // Compare tw/w against th/h without floating point
    if tw * h <= th * w {
        (tw as u32, ((h * tw) / w).max(1) as u32)
    } else {
        (((w * th) / h).max(1) as u32, th as u32)
    }
}

fn reader<'a>(data: &'a [u8], limits: &DecodeLimits) -> ImageReader<Cursor<&'a [u8]>> {
    let mut reader = ImageReader::with_format(Cursor::new(data), ImageFormat::WebP);
    let mut lib_limits = Limits::default();
    lib_limits.max_image_width = Some(limits.webp_max_dimension);
    lib_limits.max_image_height = Some(limits.webp_max_dimension);
    lib_limits.max_alloc = Some(limits.webp_max_dimension as u64 * limits.webp_max_dimension as u64 * 8);
    reader.limits(lib_limits);
    reader
}

/// Decode a WebP into a canonical tile.
pub fn decode(data: &[u8], target: TileSize, limits: &DecodeLimits) -> Result<Tile, IconError> {
    let (width, height) = guarded("webp", || {
        ImageReader::with_format(Cursor::new(data), ImageFormat::WebP)
            .into_dimensions()
            .context("WebP header")
    })?;
    let largest = width.max(height);
    if largest > limits.webp_max_dimension {
        return Err(IconError::ceiling("WebP dimension", largest, limits.webp_max_dimension));
    }
    if width == 0 || height == 0 {
        return Err(IconError::malformed("WebP with empty dimensions"));
    }

    let (fit_w, fit_h) = fit_within(width, height, target);
    let scaled: DynamicImage = guarded("webp", || {
        let img = reader(data, limits).decode().context("WebP decode")?;
        Ok(img.resize_exact(fit_w, fit_h, FilterType::Nearest))
    })?;
    let rgba = scaled.to_rgba8();

    let mut tile = Tile::new(target);
    let off_x = (target.width as u32 - fit_w) / 2;
    let off_y = (target.height as u32 - fit_h) / 2;
    for (x, y, px) in rgba.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        let idx = (y + off_y) as usize * target.width as usize + (x + off_x) as usize;
        tile.pixels[idx] = over_black(r, g, b, a);
    }
    Ok(tile)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::pool::Rgb565;

    #[test]
    fn test_fit_within() {
        let tile = TileSize::new(48, 48);
        assert_eq!(fit_within(96, 48, tile), (48, 24));
        assert_eq!(fit_within(30, 60, tile), (24, 48));
        assert_eq!(fit_within(10, 10, tile), (48, 48));
        assert_eq!(fit_within(1000, 1, tile), (48, 1));
    }

    #[test]
    fn test_square_decode() {
        let webp = solid_rgba(32, 32, [0, 0, 255, 255]);
        let tile = decode(&webp, TileSize::new(8, 8), &DecodeLimits::default()).unwrap();
        assert!(tile.pixels.iter().all(|p| *p == Rgb565::from_rgb(0, 0, 255)));
    }

    #[test]
    fn test_wide_image_letterboxed() {
        let webp = solid_rgba(40, 20, [255, 255, 255, 255]);
        let tile = decode(&webp, TileSize::new(8, 8), &DecodeLimits::default()).unwrap();
        let white = Rgb565(0xFFFF);
        // 8x4 band centred vertically: rows 2..6
        assert_eq!(tile.pixel(0, 0), Rgb565::BLACK);
        assert_eq!(tile.pixel(7, 1), Rgb565::BLACK);
        assert_eq!(tile.pixel(0, 2), white);
        assert_eq!(tile.pixel(7, 5), white);
        assert_eq!(tile.pixel(3, 6), Rgb565::BLACK);
    }

    #[test]
    fn test_oversized_rejected() {
        let webp = solid_rgba(64, 8, [1, 2, 3, 255]);
        let limits = DecodeLimits { webp_max_dimension: 32, ..DecodeLimits::default() };
        assert!(matches!(
            decode(&webp, TileSize::new(8, 8), &limits),
            Err(IconError::SizeCeilingExceeded { what: "WebP dimension", actual: 64, limit: 32 })
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        let mut webp = b"RIFF\x20\0\0\0WEBPVP8L".to_vec();
        webp.extend_from_slice(&[0xAB; 24]);
        assert!(decode(&webp, TileSize::new(8, 8), &DecodeLimits::default()).is_err());
    }
}
