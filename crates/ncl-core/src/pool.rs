//! Pixel Buffer Pool
//!
//! A fixed number of canonical RGB565 tiles plus a used/free mask. The pool,
//! not the identity cache, is the binding memory constraint: decoded avatar
//! memory never exceeds `slots × tile_bytes` no matter how many identities
//! are known.

/// A 16-bit RGB565 pixel, the native format of the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Rgb565(pub u16);

impl Rgb565 {
    pub const BLACK: Rgb565 = Rgb565(0);

    /// Pack 8-bit channels, dropping the low bits.
    #[inline]
    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Rgb565(((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3))
    }

    /// Expand back to 8-bit channels (low bits replicated from the high bits).
    #[inline]
    pub const fn to_rgb(self) -> (u8, u8, u8) {
        let r = ((self.0 >> 11) & 0x1F) as u8;
        let g = ((self.0 >> 5) & 0x3F) as u8;
        let b = (self.0 & 0x1F) as u8;
        ((r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2))
    }
}

/// Canonical tile dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileSize {
    pub width: u16,
    pub height: u16,
}

impl TileSize {
    pub const fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Bytes occupied by one tile (2 bytes per RGB565 pixel)
    #[inline]
    pub fn bytes(&self) -> usize {
        self.pixels() * 2
    }
}

/// Index of a slot in the [`PixelBufferPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolIndex(pub(crate) u16);

impl PoolIndex {
    pub fn get(self) -> usize {
        self.0 as usize
    }
}

/// Fixed-capacity pool of canonical tiles.
pub struct PixelBufferPool {
    size: TileSize,
    /// One contiguous allocation: slot `i` owns `pixels[i*len..(i+1)*len]`
    pixels: Vec<Rgb565>,
    /// Used/free mask, one bit per slot
    used: Vec<u64>,
    slots: usize,
}

impl PixelBufferPool {
    /// Allocate the whole pool up front; no further allocation happens.
    pub fn new(slots: usize, size: TileSize) -> Self {
        assert!(slots <= u16::MAX as usize, "pool slot count must fit in a u16 index");
        Self {
            size,
            pixels: vec![Rgb565::BLACK; slots * size.pixels()],
            used: vec![0; slots.div_ceil(64)],
            slots,
        }
    }

    pub fn tile_size(&self) -> TileSize {
        self.size
    }

    pub fn tile_bytes(&self) -> usize {
        self.size.bytes()
    }

    pub fn capacity(&self) -> usize {
        self.slots
    }

    /// Number of slots currently granted
    pub fn used_count(&self) -> usize {
        self.used.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_full(&self) -> bool {
        self.used_count() == self.slots
    }

    #[inline]
    pub fn is_used(&self, idx: PoolIndex) -> bool {
        let i = idx.get();
        i < self.slots && self.used[i / 64] & (1 << (i % 64)) != 0
    }

    /// First-fit allocation. `None` means the pool is saturated; callers skip
    /// the icon this round rather than treating it as fatal.
    ///
    /// The granted tile is cleared so nothing leaks from a previous occupant.
    pub fn allocate(&mut self) -> Option<PoolIndex> {
        let (word_idx, word) = self
            .used
            .iter()
            .enumerate()
            .find(|(_, w)| **w != u64::MAX)?;
        let bit = word.trailing_ones() as usize;
        let slot = word_idx * 64 + bit;
        if slot >= self.slots {
            return None;
        }

        let idx = PoolIndex(slot as u16);
        debug_assert!(!self.is_used(idx), "pool slot {} handed out twice", slot);
        self.used[word_idx] |= 1 << bit;
        self.tile_mut(idx).fill(Rgb565::BLACK);
        Some(idx)
    }

    /// Return a slot to the pool. Releasing a free slot is a no-op.
    pub fn release(&mut self, idx: PoolIndex) {
        let i = idx.get();
        if i < self.slots {
            self.used[i / 64] &= !(1 << (i % 64));
        }
    }

    /// Copy a fully decoded tile into a granted slot.
    pub fn write(&mut self, idx: PoolIndex, tile: &[Rgb565]) {
        debug_assert!(self.is_used(idx), "write to free pool slot {}", idx.get());
        debug_assert_eq!(tile.len(), self.size.pixels());
        let dst = self.tile_mut(idx);
        let n = dst.len().min(tile.len());
        dst[..n].copy_from_slice(&tile[..n]);
    }

    /// Read-only view of a granted slot.
    pub fn read(&self, idx: PoolIndex) -> Option<&[Rgb565]> {
        if !self.is_used(idx) {
            return None;
        }
        let len = self.size.pixels();
        let start = idx.get() * len;
        Some(&self.pixels[start..start + len])
    }

    fn tile_mut(&mut self, idx: PoolIndex) -> &mut [Rgb565] {
        let len = self.size.pixels();
        let start = idx.get() * len;
        &mut self.pixels[start..start + len]
    }
}

/// Scoped slot allocation: the slot goes back to the pool on drop unless
/// [`SlotGuard::commit`] was called.
pub struct SlotGuard<'a> {
    pool: &'a mut PixelBufferPool,
    idx: PoolIndex,
    committed: bool,
}

impl<'a> SlotGuard<'a> {
    pub fn allocate(pool: &'a mut PixelBufferPool) -> Option<Self> {
        let idx = pool.allocate()?;
        Some(Self { pool, idx, committed: false })
    }

    pub fn index(&self) -> PoolIndex {
        self.idx
    }

    pub fn write(&mut self, tile: &[Rgb565]) {
        self.pool.write(self.idx, tile);
    }

    /// Keep the slot; ownership passes to the caller.
    pub fn commit(mut self) -> PoolIndex {
        self.committed = true;
        self.idx
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.pool.release(self.idx);
        }
    }
}
