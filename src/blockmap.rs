/// Bitmap with one bit per fixed-size region of an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMap {
    region_size: usize,
    regions: usize,
    bits: Vec<u64>,
}

impl BlockMap {
    /// Empty map covering `capacity` bytes split into `region_size` regions
    pub fn new(capacity: usize, region_size: usize) -> Self {
        debug_assert!(region_size.is_power_of_two());
        let regions = capacity.div_ceil(region_size);
        Self {
            region_size,
            regions,
            bits: vec![0; regions.div_ceil(64)],
        }
    }

    /// Map of the regions of `image` holding at least one byte accepted by `used`
    pub fn from_content(image: &[u8], region_size: usize, used: impl Fn(u8) -> bool) -> Self {
        let mut map = Self::new(image.len(), region_size);
        for (i, region) in image.chunks(region_size).enumerate() {
            if region.iter().any(|&b| used(b)) {
                map.set(i);
            }
        }
        map
    }

    pub fn region_size(&self) -> usize {
        self.region_size
    }

    /// Number of regions the map covers
    pub fn len(&self) -> usize {
        self.regions
    }

    pub fn is_empty(&self) -> bool {
        self.used_count() == 0
    }

    fn set(&mut self, region: usize) {
        self.bits[region / 64] |= 1u64 << (region % 64);
    }

    /// Mark every region touched by `start..start + len` as used.
    /// Bytes past the end of the map are ignored.
    pub fn mark_range(&mut self, start: usize, len: usize) {
        if len == 0 {
            return;
        }
        let first = start / self.region_size;
        let last = ((start + len - 1) / self.region_size).min(self.regions.saturating_sub(1));
        for region in first..=last {
            if region < self.regions {
                self.set(region);
            }
        }
    }

    pub fn is_used(&self, region: usize) -> bool {
        region < self.regions && self.bits[region / 64] & (1u64 << (region % 64)) != 0
    }

    pub fn used_regions(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.regions).filter(move |&r| self.is_used(r))
    }

    pub fn used_count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn last_used(&self) -> Option<usize> {
        (0..self.regions).rev().find(|&r| self.is_used(r))
    }

    /// The first 16 regions as a bitfield, bit N set when region N is used
    pub fn page_bits(&self) -> u16 {
        (0..self.regions.min(16))
            .filter(|&r| self.is_used(r))
            .fold(0u16, |bits, r| bits | (1u16 << r))
    }
}
