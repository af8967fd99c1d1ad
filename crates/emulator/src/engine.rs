use core::fmt::Debug;
use core::ops::Range;

use types::X86Cpu;

use crate::error::EmuError;
use crate::frame::ExecutionFrame;
use crate::global::Config;
use crate::registry::ImageRegistry;

/// Why the engine stopped executing foreign instructions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TrapSignal {
    /// A `ret` reached the call sentinel: the invocation is complete.
    ReturnToNative,
    /// Foreign code called an address outside every registered image. The
    /// target is in `rip`, the return address at `[rsp]`. Stack slots
    /// outside the frame's private stack are fetched with
    /// `ExecutionEngine::read_u64`.
    CallToNative,
    /// Foreign code executed `hlt`.
    Halt,
    /// Any other exception or interrupt vector raised by foreign code.
    Fault(u32),
}

/// What the engine may ask the bridge while it runs.
pub struct RunContext<'a> {
    images: &'a ImageRegistry,
}

impl<'a> RunContext<'a> {
    pub fn new(images: &'a ImageRegistry) -> Self {
        Self { images }
    }

    /// Control reached the synthetic return address pushed by the bridge.
    pub fn is_native_return(&self, pc: u64) -> bool {
        pc == Config::CALL_SENTINEL
    }

    /// `pc` lies outside every registered foreign image.
    pub fn is_native_call(&self, pc: u64) -> bool {
        !self.is_native_return(pc) && !self.images.contains(pc)
    }
}

/// The foreign instruction interpreter/translator.
///
/// The bridge prepares `frame.cpu` and `frame.stack`, calls `run`, and reacts
/// to the returned signal. It never looks at engine-internal state.
pub trait ExecutionEngine: Debug {
    /// Global one-time setup, called before the first `create_cpu`.
    fn init(&mut self) -> Result<(), EmuError>;

    /// A fresh virtual CPU for one nesting level.
    fn create_cpu(&mut self) -> X86Cpu {
        X86Cpu::long_mode_user()
    }

    /// Runs foreign code from `frame.cpu.rip` until a control transfer.
    fn run(&mut self, frame: &mut ExecutionFrame, ctx: &RunContext<'_>) -> TrapSignal;

    /// Native range holding translated code. Faults with a PC in here
    /// happened while foreign code was running. Queried once when the
    /// emulator is built, so it must be fixed before `init`.
    fn code_gen_buffer(&self) -> Range<u64>;

    /// Raw foreign instruction bytes for diagnostics.
    fn read_code(&self, _addr: u64, _len: usize) -> Option<Vec<u8>> {
        None
    }

    /// Foreign memory outside the private stacks, for code that moved `rsp`
    /// away from the stack the bridge gave it.
    fn read_u64(&self, _addr: u64) -> Option<u64> {
        None
    }
}
