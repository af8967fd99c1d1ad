/// Firmware page size in bytes (4 KiB).
pub const PAGE_SIZE: u64 = 4096;
pub const PAGE_SHIFT: u32 = 12;

/// Memory attribute bits understood by the CPU architecture protocol.
pub const EFI_MEMORY_XP: u64 = 0x0000_0000_0000_4000;

/// Access attributes requested for a range of memory.
///
/// Foreign images are mapped with `EXECUTE_PROTECT` so that the first native
/// instruction fetch from them raises a permission fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryAttributes(pub u64);

impl MemoryAttributes {
    pub const NONE: Self = Self(0);
    pub const EXECUTE_PROTECT: Self = Self(EFI_MEMORY_XP);

    pub const fn is_executable(self) -> bool {
        self.0 & EFI_MEMORY_XP == 0
    }
}

pub const fn pages_to_size(pages: u64) -> u64 {
    pages << PAGE_SHIFT
}

pub const fn align_down(val: u64, align: u64) -> u64 {
    val & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_math() {
        assert_eq!(pages_to_size(3), 3 * PAGE_SIZE);
        assert_eq!(align_down(0x1fff, 16), 0x1ff0);
    }

    #[test]
    fn execute_protect_is_not_executable() {
        assert!(!MemoryAttributes::EXECUTE_PROTECT.is_executable());
        assert!(MemoryAttributes::NONE.is_executable());
    }
}
