//! JPEG decode with DCT-domain scaling.
//!
//! The frame header is located with a marker scan of our own before the
//! decoder library sees the data, so oversized or unsupported frames are
//! refused without allocating anything.
//!
//! - Baseline (`SOF0`/`SOF1`): decode at the coarsest 1/1, 1/2, 1/4 or 1/8
//!   scale that still covers the tile, then resample.
//! - Progressive (`SOF2`): full-resolution coefficients must be held during
//!   decode, so the original size is capped and the output is always 1/8.

use jpeg_decoder::PixelFormat;

use super::resample::resample_canvas;
use super::{guarded, DecodeLimits, Tile};
use crate::error::IconError;
use crate::pool::{Rgb565, TileSize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Baseline,
    Progressive,
}

/// Frame header fields needed to plan a decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub kind: FrameKind,
    pub width: u32,
    pub height: u32,
}

#[inline]
fn be16(data: &[u8], pos: usize) -> u32 {
    u16::from_be_bytes([data[pos], data[pos + 1]]) as u32
}

/// Walk the marker segments up to the first start-of-frame.
pub fn scan_frame(data: &[u8]) -> Result<FrameInfo, IconError> {
    if !data.starts_with(&[0xFF, 0xD8]) {
        return Err(IconError::malformed("missing JPEG SOI marker"));
    }

    let mut pos = 2;
    loop {
        if pos >= data.len() || data[pos] != 0xFF {
            return Err(IconError::malformed("JPEG ends before frame header"));
        }
        // Fill bytes
        while pos < data.len() && data[pos] == 0xFF {
            pos += 1;
        }
        let Some(&marker) = data.get(pos) else {
            return Err(IconError::malformed("JPEG ends inside marker"));
        };
        pos += 1;

        match marker {
            // Standalone markers carry no length
            0x01 | 0xD0..=0xD8 => continue,
            0xD9 | 0xDA => return Err(IconError::malformed("JPEG scan before frame header")),
            _ => {}
        }

        if pos + 2 > data.len() {
            return Err(IconError::malformed("truncated JPEG segment"));
        }
        let seg_len = be16(data, pos) as usize;
        let seg_end = pos + seg_len;
        if seg_len < 2 || seg_end > data.len() {
            return Err(IconError::malformed("truncated JPEG segment"));
        }

        match marker {
            0xC0 | 0xC1 | 0xC2 => {
                if seg_len < 8 {
                    return Err(IconError::malformed("short SOF segment"));
                }
                let height = be16(data, pos + 3);
                let width = be16(data, pos + 5);
                if width == 0 || height == 0 {
                    return Err(IconError::unsupported("JPEG with deferred (DNL) height"));
                }
                let kind = if marker == 0xC2 { FrameKind::Progressive } else { FrameKind::Baseline };
                return Ok(FrameInfo { kind, width, height });
            }
            0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF => {
                return Err(IconError::unsupported(format!("JPEG frame type SOF{:X}", marker - 0xC0)));
            }
            _ => pos = seg_end,
        }
    }
}

/// Coarsest power-of-two reduction (8, 4, 2 or 1) whose output still covers
/// the target in both axes.
pub fn pick_scale(width: u32, height: u32, target: TileSize) -> u32 {
    [8, 4, 2]
        .into_iter()
        .find(|&d| width.div_ceil(d) >= target.width as u32 && height.div_ceil(d) >= target.height as u32)
        .unwrap_or(1)
}

/// Apply the size ceilings and choose the scale denominator.
pub fn plan(frame: &FrameInfo, target: TileSize, limits: &DecodeLimits) -> Result<u32, IconError> {
    let largest = frame.width.max(frame.height);
    match frame.kind {
        FrameKind::Baseline => {
            if largest > limits.jpeg_max_dimension {
                return Err(IconError::ceiling("JPEG dimension", largest, limits.jpeg_max_dimension));
            }
            Ok(pick_scale(frame.width, frame.height, target))
        }
        FrameKind::Progressive => {
            if largest > limits.jpeg_progressive_max_dimension {
                return Err(IconError::ceiling(
                    "progressive JPEG dimension",
                    largest,
                    limits.jpeg_progressive_max_dimension,
                ));
            }
            Ok(8)
        }
    }
}

fn library_error(e: jpeg_decoder::Error) -> IconError {
    match e {
        jpeg_decoder::Error::Format(msg) => IconError::MalformedContainer(msg),
        jpeg_decoder::Error::Unsupported(feature) => IconError::unsupported(format!("{:?}", feature)),
        other => IconError::DecodeLibraryFault(other.to_string()),
    }
}

#[inline]
fn cmyk_to_rgb565(p: &[u8]) -> Rgb565 {
    let k = p[3] as u16;
    let ch = |c: u8| ((c as u16 * k) / 255) as u8;
    Rgb565::from_rgb(ch(p[0]), ch(p[1]), ch(p[2]))
}

/// Decode a JPEG into a canonical tile.
pub fn decode(data: &[u8], target: TileSize, limits: &DecodeLimits) -> Result<Tile, IconError> {
    let frame = scan_frame(data)?;
    let denom = plan(&frame, target, limits)?;
    let request_w = frame.width.div_ceil(denom) as u16;
    let request_h = frame.height.div_ceil(denom) as u16;

    let ceiling = limits.jpeg_max_dimension.max(limits.jpeg_progressive_max_dimension) as usize;
    let (pixels, width, height, format) = guarded("jpeg", || {
        let mut decoder = jpeg_decoder::Decoder::new(data);
        decoder.set_max_decoding_buffer_size(ceiling * ceiling * 8);
        let (w, h) = decoder.scale(request_w, request_h).map_err(library_error)?;
        let pixels = decoder.decode().map_err(library_error)?;
        let info = decoder
            .info()
            .ok_or_else(|| IconError::malformed("JPEG decoded without frame info"))?;
        Ok((pixels, w as u32, h as u32, info.pixel_format))
    })?;

    let channels = match format {
        PixelFormat::L8 => 1,
        PixelFormat::RGB24 => 3,
        PixelFormat::CMYK32 => 4,
        other => return Err(IconError::unsupported(format!("JPEG pixel format {:?}", other))),
    };
    let needed = width as usize * height as usize * channels;
    if width == 0 || height == 0 || pixels.len() < needed {
        return Err(IconError::malformed("JPEG output shorter than its dimensions"));
    }

    log::debug!(
        "[JPEG] {:?} {}x{} decoded at 1/{} -> {}x{}",
        frame.kind, frame.width, frame.height, denom, width, height
    );

    let mut tile = Tile::new(target);
    resample_canvas(&mut tile, width, height, |x, y| {
        let i = (y as usize * width as usize + x as usize) * channels;
        match channels {
            1 => Rgb565::from_rgb(pixels[i], pixels[i], pixels[i]),
            3 => Rgb565::from_rgb(pixels[i], pixels[i + 1], pixels[i + 2]),
            _ => cmyk_to_rgb565(&pixels[i..i + 4]),
        }
    });
    Ok(tile)
}
