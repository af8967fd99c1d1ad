/// Address range occupied by a registered foreign image.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ImageRecord {
    pub base: u64,
    pub size: u64,
}

impl ImageRecord {
    pub const fn new(base: u64, size: u64) -> Self {
        Self { base, size }
    }

    /// One past the last byte of the image. Saturates instead of wrapping.
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    /// Half-open containment: `base <= addr < base + size`.
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end()
    }

    pub const fn overlaps(&self, other: &ImageRecord) -> bool {
        self.base < other.end() && other.base < self.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containment_is_half_open() {
        let rec = ImageRecord::new(0x1000, 0x200);
        assert!(!rec.contains(0xfff));
        assert!(rec.contains(0x1000));
        assert!(rec.contains(0x11ff));
        assert!(!rec.contains(0x1200));
    }

    #[test]
    fn adjacent_ranges_do_not_overlap() {
        let a = ImageRecord::new(0x1000, 0x1000);
        let b = ImageRecord::new(0x2000, 0x1000);
        let c = ImageRecord::new(0x1800, 0x1000);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
    }
}
