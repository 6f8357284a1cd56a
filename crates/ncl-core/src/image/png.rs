//! PNG Decoder (RFC 2083 subset)
//!
//! Supports non-interlaced grayscale, RGB, palette and RGBA images at bit
//! depths 1/2/4/8. IDAT data is inflated as a stream, one scanline at a time,
//! so only the previous and current rows are ever held in memory.

use std::io::Read;

use flate2::read::ZlibDecoder;
use flate2::Crc;

use super::resample::RowResampler;
use super::{over_black, DecodeLimits, Tile, PNG_SIGNATURE};
use crate::error::IconError;
use crate::pool::{Rgb565, TileSize};

/// PNG color types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColorType {
    Grayscale = 0,
    Rgb = 2,
    Indexed = 3,
    Rgba = 6,
}

impl ColorType {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Grayscale),
            2 => Some(Self::Rgb),
            3 => Some(Self::Indexed),
            6 => Some(Self::Rgba),
            _ => None,
        }
    }

    /// Channels per pixel
    fn channels(self) -> usize {
        match self {
            Self::Grayscale | Self::Indexed => 1,
            Self::Rgb => 3,
            Self::Rgba => 4,
        }
    }
}

/// IHDR chunk data
#[derive(Debug, Clone, Copy)]
struct Header {
    width: u32,
    height: u32,
    bit_depth: u8,
    color_type: ColorType,
}

impl Header {
    fn parse(data: &[u8]) -> Result<Self, IconError> {
        if data.len() != 13 {
            return Err(IconError::malformed("IHDR must be 13 bytes"));
        }
        let width = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let height = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let bit_depth = data[8];
        let (compression, filter, interlace) = (data[10], data[11], data[12]);

        if width == 0 || height == 0 || width > i32::MAX as u32 || height > i32::MAX as u32 {
            return Err(IconError::malformed(format!("invalid dimensions {}x{}", width, height)));
        }
        if compression != 0 || filter != 0 {
            return Err(IconError::malformed("unknown compression or filter method"));
        }
        if interlace != 0 {
            return Err(IconError::unsupported("interlaced PNG"));
        }

        let color_type = ColorType::from_u8(data[9])
            .ok_or_else(|| IconError::unsupported(format!("PNG color type {}", data[9])))?;

        let valid = match color_type {
            ColorType::Grayscale | ColorType::Indexed => matches!(bit_depth, 1 | 2 | 4 | 8),
            ColorType::Rgb | ColorType::Rgba => bit_depth == 8,
        };
        if !valid {
            return Err(IconError::unsupported(format!(
                "PNG bit depth {} for {:?}",
                bit_depth, color_type
            )));
        }

        Ok(Self { width, height, bit_depth, color_type })
    }

    /// Filter step: bytes per complete pixel, at least one
    fn bpp(&self) -> usize {
        ((self.color_type.channels() * self.bit_depth as usize) / 8).max(1)
    }

    /// Bytes per scanline, excluding the filter byte
    fn stride(&self) -> u64 {
        (self.width as u64 * self.color_type.channels() as u64 * self.bit_depth as u64).div_ceil(8)
    }

    /// Upper bound on inflated bytes, from the header alone
    fn raw_size(&self) -> u64 {
        self.height as u64 * (1 + self.stride())
    }
}

/// Walk the chunk list and collect what decoding needs.
struct Chunks {
    header: Header,
    palette: Vec<[u8; 3]>,
    idat: Vec<u8>,
}

fn read_chunks(data: &[u8], limits: &DecodeLimits) -> Result<Chunks, IconError> {
    if data.len() < 8 || &data[..8] != PNG_SIGNATURE {
        return Err(IconError::malformed("invalid PNG signature"));
    }

    let mut pos = 8;
    let mut header: Option<Header> = None;
    let mut palette: Vec<[u8; 3]> = Vec::new();
    let mut idat = Vec::new();
    let mut seen_iend = false;

    while pos < data.len() {
        if pos + 12 > data.len() {
            return Err(IconError::malformed("truncated chunk header"));
        }
        let length = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
        let end = pos
            .checked_add(12)
            .and_then(|p| p.checked_add(length))
            .filter(|&end| end <= data.len())
            .ok_or_else(|| IconError::malformed("truncated chunk"))?;

        let chunk_type = &data[pos + 4..pos + 8];
        let chunk_data = &data[pos + 8..end - 4];
        let stored_crc = u32::from_be_bytes([data[end - 4], data[end - 3], data[end - 2], data[end - 1]]);

        let mut crc = Crc::new();
        crc.update(chunk_type);
        crc.update(chunk_data);
        if crc.sum() != stored_crc {
            return Err(IconError::malformed(format!(
                "CRC mismatch in {} chunk",
                String::from_utf8_lossy(chunk_type)
            )));
        }

        if header.is_none() && chunk_type != b"IHDR" {
            return Err(IconError::malformed("first chunk is not IHDR"));
        }

        match chunk_type {
            b"IHDR" => {
                if header.is_some() {
                    return Err(IconError::malformed("duplicate IHDR"));
                }
                let parsed = Header::parse(chunk_data)?;
                // Memory gate: refuse before touching any compressed data
                let raw = parsed.raw_size();
                if raw > limits.png_max_raw_bytes as u64 {
                    return Err(IconError::ceiling("PNG raw size", raw, limits.png_max_raw_bytes));
                }
                header = Some(parsed);
            }
            b"PLTE" => {
                if !idat.is_empty() {
                    return Err(IconError::malformed("PLTE after IDAT"));
                }
                if chunk_data.is_empty() || chunk_data.len() % 3 != 0 || chunk_data.len() > 256 * 3 {
                    return Err(IconError::malformed("invalid PLTE length"));
                }
                palette = chunk_data.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();
            }
            b"IDAT" => idat.extend_from_slice(chunk_data),
            b"IEND" => {
                seen_iend = true;
                break;
            }
            _ => {
                // Ancillary chunks are not needed for thumbnails
            }
        }

        pos = end;
    }

    let header = header.ok_or_else(|| IconError::malformed("missing IHDR"))?;
    if idat.is_empty() {
        return Err(IconError::malformed("missing IDAT"));
    }
    if header.color_type == ColorType::Indexed && palette.is_empty() {
        return Err(IconError::malformed("indexed PNG without PLTE"));
    }
    if !seen_iend {
        log::debug!("[PNG] No IEND chunk; decoding what is present");
    }

    Ok(Chunks { header, palette, idat })
}

// ============================================================================
// Filter reconstruction
// ============================================================================

#[inline]
fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Undo the adaptive filter of `row` in place against the previous
/// reconstructed row (all zeros for the first row).
fn unfilter_row(filter: u8, row: &mut [u8], prev: &[u8], bpp: usize) -> Result<(), IconError> {
    match filter {
        0 => {}
        1 => {
            for i in bpp..row.len() {
                row[i] = row[i].wrapping_add(row[i - bpp]);
            }
        }
        2 => {
            for (cur, up) in row.iter_mut().zip(prev) {
                *cur = cur.wrapping_add(*up);
            }
        }
        3 => {
            for i in 0..row.len() {
                let left = if i >= bpp { row[i - bpp] as u16 } else { 0 };
                row[i] = row[i].wrapping_add(((left + prev[i] as u16) / 2) as u8);
            }
        }
        4 => {
            for i in 0..row.len() {
                let (left, up_left) = if i >= bpp { (row[i - bpp], prev[i - bpp]) } else { (0, 0) };
                row[i] = row[i].wrapping_add(paeth(left, prev[i], up_left));
            }
        }
        other => return Err(IconError::malformed(format!("invalid filter type {}", other))),
    }
    Ok(())
}

/// Read the `x`-th sample of a sub-byte or 8-bit single-channel row,
/// most significant bits first.
#[inline]
fn unpack_sample(row: &[u8], x: usize, bit_depth: u8) -> u8 {
    if bit_depth == 8 {
        return row[x];
    }
    let per_byte = 8 / bit_depth as usize;
    let byte = row[x / per_byte];
    let shift = 8 - bit_depth as usize * (x % per_byte + 1);
    (byte >> shift) & ((1u16 << bit_depth) - 1) as u8
}

/// Scale a sub-byte grayscale sample to the full 8-bit range
#[inline]
fn scale_gray(v: u8, bit_depth: u8) -> u8 {
    match bit_depth {
        1 => v * 255,
        2 => v * 85,
        4 => v * 17,
        _ => v,
    }
}

/// Decode a PNG straight into a canonical tile.
pub fn decode(data: &[u8], target: TileSize, limits: &DecodeLimits) -> Result<Tile, IconError> {
    let Chunks { header, palette, idat } = read_chunks(data, limits)?;

    let stride = header.stride() as usize;
    let bpp = header.bpp();
    let mut prev = vec![0u8; stride];
    // Filter byte followed by the scanline
    let mut line = vec![0u8; stride + 1];

    let mut tile = Tile::new(target);
    let mut resampler = RowResampler::new(&mut tile, header.width, header.height);
    let mut inflater = ZlibDecoder::new(&idat[..]);
    let mut bad_index = false;

    for y in 0..header.height {
        inflater.read_exact(&mut line).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => IconError::malformed(format!("image data ends at row {}", y)),
            _ => IconError::malformed(format!("corrupt zlib stream: {}", e)),
        })?;

        let (filter, row) = line.split_at_mut(1);
        unfilter_row(filter[0], row, &prev, bpp)?;

        resampler.push_row(y, |x| {
            let x = x as usize;
            match header.color_type {
                ColorType::Grayscale => {
                    let v = scale_gray(unpack_sample(row, x, header.bit_depth), header.bit_depth);
                    Rgb565::from_rgb(v, v, v)
                }
                ColorType::Rgb => Rgb565::from_rgb(row[x * 3], row[x * 3 + 1], row[x * 3 + 2]),
                ColorType::Rgba => {
                    let p = &row[x * 4..x * 4 + 4];
                    over_black(p[0], p[1], p[2], p[3])
                }
                ColorType::Indexed => {
                    let idx = unpack_sample(row, x, header.bit_depth) as usize;
                    match palette.get(idx) {
                        Some(&[r, g, b]) => Rgb565::from_rgb(r, g, b),
                        None => {
                            bad_index = true;
                            Rgb565::BLACK
                        }
                    }
                }
            }
        });
        if bad_index {
            return Err(IconError::malformed("palette index out of range"));
        }

        prev.copy_from_slice(row);
    }

    Ok(tile)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::Write;

    use flate2::write::ZlibEncoder;
    use flate2::{Compression, Crc};

    pub fn chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(data);
        let mut crc = Crc::new();
        crc.update(kind);
        crc.update(data);
        out.extend_from_slice(&crc.sum().to_be_bytes());
    }

    pub fn ihdr(width: u32, height: u32, bit_depth: u8, color_type: u8, interlace: u8) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&[bit_depth, color_type, 0, 0, interlace]);
        data
    }

    pub fn zlib(raw: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(raw).unwrap();
        enc.finish().unwrap()
    }

    /// Assemble a PNG from an IHDR, optional palette and filtered scanlines.
    pub fn build(ihdr_data: &[u8], palette: Option<&[u8]>, scanlines: &[u8]) -> Vec<u8> {
        let mut out = super::PNG_SIGNATURE.to_vec();
        chunk(&mut out, b"IHDR", ihdr_data);
        if let Some(plte) = palette {
            chunk(&mut out, b"PLTE", plte);
        }
        chunk(&mut out, b"IDAT", &zlib(scanlines));
        chunk(&mut out, b"IEND", &[]);
        out
    }

    /// A solid-colour 8-bit RGB PNG.
    pub fn solid_rgb(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let mut raw = Vec::new();
        for _ in 0..height {
            raw.push(0);
            for _ in 0..width {
                raw.extend_from_slice(&rgb);
            }
        }
        build(&ihdr(width, height, 8, 2, 0), None, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn limits() -> DecodeLimits {
        DecodeLimits::default()
    }

    #[test]
    fn test_rgb_2x2_exact() {
        let raw = [
            0, 255, 0, 0, 0, 255, 0, //
            0, 0, 0, 255, 255, 255, 255,
        ];
        let png = build(&ihdr(2, 2, 8, 2, 0), None, &raw);
        let tile = decode(&png, TileSize::new(2, 2), &limits()).unwrap();
        assert_eq!(
            tile.pixels,
            vec![
                Rgb565::from_rgb(255, 0, 0),
                Rgb565::from_rgb(0, 255, 0),
                Rgb565::from_rgb(0, 0, 255),
                Rgb565::from_rgb(255, 255, 255),
            ]
        );
    }

    #[test]
    fn test_palette_1bit_msb_first() {
        let palette = [255, 0, 0, 0, 0, 255];
        // Indices 1,0,1,1,0,0,0,1 packed MSB-first
        let raw = [0, 0b1011_0001];
        let png = build(&ihdr(8, 1, 1, 3, 0), Some(&palette), &raw);
        let tile = decode(&png, TileSize::new(8, 1), &limits()).unwrap();
        let red = Rgb565::from_rgb(255, 0, 0);
        let blue = Rgb565::from_rgb(0, 0, 255);
        assert_eq!(tile.pixels, vec![blue, red, blue, blue, red, red, red, blue]);
    }

    #[test]
    fn test_palette_index_out_of_range() {
        let palette = [255, 0, 0];
        let raw = [0, 0b0100_0000];
        let png = build(&ihdr(4, 1, 2, 3, 0), Some(&palette), &raw);
        assert!(matches!(
            decode(&png, TileSize::new(4, 1), &limits()),
            Err(IconError::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_filters_reconstruct() {
        let raw = [
            1, 10, 5, 5, // Sub   -> 10 15 20
            2, 1, 1, 1, //  Up    -> 11 16 21
            3, 0, 0, 0, //  Avg
        ];
        let png = build(&ihdr(3, 3, 8, 0, 0), None, &raw);
        let tile = decode(&png, TileSize::new(3, 3), &limits()).unwrap();
        let gray = |v: u8| Rgb565::from_rgb(v, v, v);
        assert_eq!(&tile.pixels[0..3], &[gray(10), gray(15), gray(20)]);
        assert_eq!(&tile.pixels[3..6], &[gray(11), gray(16), gray(21)]);
        // Avg: 11/2=5, (5+16)/2=10, (10+21)/2=15
        assert_eq!(&tile.pixels[6..9], &[gray(5), gray(10), gray(15)]);
    }

    #[test]
    fn test_paeth_filter() {
        let raw = [
            0, 10, 20, 30, //
            4, 1, 1, 1,
        ];
        let png = build(&ihdr(3, 2, 8, 0, 0), None, &raw);
        let tile = decode(&png, TileSize::new(3, 2), &limits()).unwrap();
        let gray = |v: u8| Rgb565::from_rgb(v, v, v);
        assert_eq!(&tile.pixels[3..6], &[gray(11), gray(21), gray(31)]);
    }

    #[test]
    fn test_gray_2bit_scaled() {
        // 0b00_01_10_11 -> 0, 85, 170, 255
        let png = build(&ihdr(4, 1, 2, 0, 0), None, &[0, 0b0001_1011]);
        let tile = decode(&png, TileSize::new(4, 1), &limits()).unwrap();
        let gray = |v: u8| Rgb565::from_rgb(v, v, v);
        assert_eq!(tile.pixels, vec![gray(0), gray(85), gray(170), gray(255)]);
    }

    #[test]
    fn test_rgba_composited_over_black() {
        let raw = [0, 255, 255, 255, 0, 255, 255, 255, 255];
        let png = build(&ihdr(2, 1, 8, 6, 0), None, &raw);
        let tile = decode(&png, TileSize::new(2, 1), &limits()).unwrap();
        assert_eq!(tile.pixels, vec![Rgb565::BLACK, Rgb565(0xFFFF)]);
    }

    #[test]
    fn test_downscale_to_tile() {
        let png = solid_rgb(64, 32, [0, 255, 0]);
        let tile = decode(&png, TileSize::new(8, 8), &limits()).unwrap();
        assert!(tile.pixels.iter().all(|p| *p == Rgb565::from_rgb(0, 255, 0)));
    }

    #[test]
    fn test_truncated_idat() {
        let full = [0u8, 1, 2, 3, 4, 5, 6, 0, 7, 8, 9, 10, 11, 12];
        // Only the first scanline made it into the stream
        let png = build(&ihdr(2, 2, 8, 2, 0), None, &full[..7]);
        let err = decode(&png, TileSize::new(2, 2), &limits()).unwrap_err();
        assert!(matches!(err, IconError::MalformedContainer(_)), "{:?}", err);
    }

    #[test]
    fn test_truncated_file() {
        let png = solid_rgb(4, 4, [1, 2, 3]);
        for cut in [4, 12, 20, 33, png.len() - 20] {
            assert!(decode(&png[..cut], TileSize::new(4, 4), &limits()).is_err());
        }
    }

    #[test]
    fn test_crc_mismatch() {
        let mut png = solid_rgb(2, 2, [1, 2, 3]);
        // Flip a byte inside IHDR's width field
        png[16 + 3] ^= 0x01;
        assert!(matches!(
            decode(&png, TileSize::new(2, 2), &limits()),
            Err(IconError::MalformedContainer(msg)) if msg.contains("CRC")
        ));
    }

    #[test]
    fn test_interlaced_and_16bit_rejected() {
        let png = build(&ihdr(2, 2, 8, 2, 1), None, &[0; 14]);
        assert!(matches!(
            decode(&png, TileSize::new(2, 2), &limits()),
            Err(IconError::UnsupportedEncoding(_))
        ));
        let png = build(&ihdr(2, 2, 16, 2, 0), None, &[0; 26]);
        assert!(matches!(
            decode(&png, TileSize::new(2, 2), &limits()),
            Err(IconError::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn test_declared_size_over_ceiling() {
        // The IDAT is tiny; the header alone must trigger the refusal
        let png = build(&ihdr(10_000, 10_000, 8, 6, 0), None, &[0; 8]);
        assert!(matches!(
            decode(&png, TileSize::new(8, 8), &limits()),
            Err(IconError::SizeCeilingExceeded { what: "PNG raw size", .. })
        ));
    }

    #[test]
    fn test_palette_without_plte() {
        let png = build(&ihdr(8, 1, 1, 3, 0), None, &[0, 0]);
        assert!(matches!(
            decode(&png, TileSize::new(8, 1), &limits()),
            Err(IconError::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_bad_filter_type() {
        let png = build(&ihdr(1, 1, 8, 0, 0), None, &[9, 0]);
        assert!(decode(&png, TileSize::new(1, 1), &limits()).is_err());
    }
}
