use core::ops::Range;

use types::mmu::{pages_to_size, PAGE_SIZE};

use crate::error::EmuError;

pub struct Config;

impl Config {
    /// Reentrant foreign invocations that can be active at once.
    pub const MAX_NESTING: usize = 8;
    /// Private foreign stack per nesting level.
    pub const STACK_SIZE: usize = 1024 * 1024;
    pub const MIN_STACK_SIZE: usize = PAGE_SIZE as usize;

    pub const MAX_ARGS: usize = 16;
    pub const REGISTER_ARGS: usize = 4;
    /// Shadow space the caller reserves below stack arguments.
    pub const HOME_ZONE_SLOTS: usize = 4;

    /// Synthetic foreign return address marking the bridge itself.
    pub const CALL_SENTINEL: u64 = 0x1234_5678_90ab_cdef;

    /// Native call targets below this are treated as corrupt pointers.
    pub const NULL_PAGE_LIMIT: u64 = PAGE_SIZE;

    /// Width of the native instruction skipped by a fault fixup.
    pub const INSN_WIDTH: u64 = 4;

    /// Translated code buffer, preceded by one page of prologue.
    pub const CODE_GEN_BUFFER_PAGES: u64 = 8 * 1024;

    /// Bytes of foreign code shown around the PC in state dumps.
    pub const DISASM_WINDOW: usize = 0x100;

    pub const TPL_APPLICATION: usize = 4;
    /// Priority held while the engine runs.
    pub const TPL_NOTIFY: usize = 16;
}

/// Code buffer carved out of an allocation of `CODE_GEN_BUFFER_PAGES + 1`
/// pages starting at `alloc_base`.
pub const fn code_gen_region(alloc_base: u64) -> Range<u64> {
    let start = alloc_base + PAGE_SIZE;
    start..start + pages_to_size(Config::CODE_GEN_BUFFER_PAGES)
}

/// Runtime knobs for one emulator instance.
#[derive(Clone, Debug)]
pub struct EmulatorConfig {
    /// Native address of the entry thunk faults are redirected to.
    pub trampoline: u64,
    /// Extra integrity checking on the bridge.
    pub paranoid: bool,
    pub stack_size: usize,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            trampoline: 0,
            paranoid: cfg!(feature = "paranoid"),
            stack_size: Config::STACK_SIZE,
        }
    }
}

impl EmulatorConfig {
    pub fn with_trampoline(mut self, trampoline: u64) -> Self {
        self.trampoline = trampoline;
        self
    }

    pub fn with_paranoid(mut self, paranoid: bool) -> Self {
        self.paranoid = paranoid;
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Rejects settings the emulator cannot run with. The trampoline has no
    /// usable default and must be supplied by the platform.
    pub fn validate(&self) -> Result<(), EmuError> {
        if self.trampoline == 0 {
            return Err(EmuError::InvalidConfig("entry trampoline address is not set"));
        }
        if self.stack_size < Config::MIN_STACK_SIZE {
            return Err(EmuError::InvalidConfig("foreign stack is smaller than one page"));
        }
        Ok(())
    }
}
