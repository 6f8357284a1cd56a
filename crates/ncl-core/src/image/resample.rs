//! Nearest-neighbour resampling into a canonical tile.
//!
//! Source rows are pushed top to bottom as a decoder produces them.
//! Destination row `ty` samples source row `ty * src_h / dst_h` (same integer
//! mapping for columns), so a source row that no destination row maps to is
//! never converted, and a source row mapped by several destination rows is
//! sampled once and then copied.

use super::Tile;
use crate::pool::Rgb565;

pub struct RowResampler<'a> {
    tile: &'a mut Tile,
    src_width: u32,
    src_height: u32,
    /// Next destination row still to be written
    next_row: u32,
    /// Source column for each destination column, computed once
    columns: Vec<u32>,
}

impl<'a> RowResampler<'a> {
    pub fn new(tile: &'a mut Tile, src_width: u32, src_height: u32) -> Self {
        let dst_width = tile.size.width as u32;
        let columns = (0..dst_width)
            .map(|tx| (tx as u64 * src_width as u64 / dst_width as u64) as u32)
            .collect();
        Self {
            tile,
            src_width,
            src_height,
            next_row: 0,
            columns,
        }
    }

    #[inline]
    fn source_row_for(&self, ty: u32) -> u32 {
        (ty as u64 * self.src_height as u64 / self.tile.size.height as u64) as u32
    }

    /// Whether any destination row still needs source row `y`.
    pub fn wants_row(&self, y: u32) -> bool {
        self.next_row < self.tile.size.height as u32 && self.source_row_for(self.next_row) == y
    }

    /// Offer source row `y`; `sample(x)` is only called if the row is needed.
    pub fn push_row(&mut self, y: u32, mut sample: impl FnMut(u32) -> Rgb565) {
        if !self.wants_row(y) {
            return;
        }
        let first = self.next_row as usize;
        {
            let columns = &self.columns;
            let row = self.tile.row_mut(first);
            for (dst, &sx) in row.iter_mut().zip(columns.iter()) {
                *dst = sample(sx.min(self.src_width.saturating_sub(1)));
            }
        }
        self.next_row += 1;

        // Upscaled rows repeat the one just produced
        while self.wants_row(y) {
            let w = self.tile.size.width as usize;
            let dst = self.next_row as usize * w;
            self.tile.pixels.copy_within(first * w..(first + 1) * w, dst);
            self.next_row += 1;
        }
    }

    /// True once every destination row has been written.
    pub fn is_complete(&self) -> bool {
        self.next_row >= self.tile.size.height as u32
    }
}

/// Resample a fully decoded canvas; `sample(x, y)` reads one source pixel.
pub fn resample_canvas(
    tile: &mut Tile,
    src_width: u32,
    src_height: u32,
    mut sample: impl FnMut(u32, u32) -> Rgb565,
) {
    let mut resampler = RowResampler::new(tile, src_width, src_height);
    for y in 0..src_height {
        resampler.push_row(y, |x| sample(x, y));
        if resampler.is_complete() {
            break;
        }
    }
}
