use std::cell::RefCell;
use std::rc::Rc;

use tracing::{error, trace, warn};
use types::x86::ARG_REGISTERS;
use types::{Register, Status};

use crate::diag::{self, SharedSnapshot, StateSnapshot};
use crate::engine::{ExecutionEngine, RunContext, TrapSignal};
use crate::error::{Fatal, StackError};
use crate::frame::{ExecutionFrame, SLOT};
use crate::global::{Config, EmulatorConfig};
use crate::host::{NativeArgs, NativeHost};
use crate::platform::Platform;
use crate::registry::ImageRegistry;

/// Nesting bookkeeping shared by all frames.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NestingState {
    /// Active invocations. The innermost one runs on `frames[depth - 1]`.
    pub depth: usize,
    /// Set only while the engine is running.
    pub in_critical: bool,
}

/// Counters kept across all invocations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    pub invocations: u64,
    pub native_calls: u64,
    pub rejected_native_calls: u64,
    pub halts: u64,
    /// Stack arguments foreign code changed before returning. Counted in
    /// paranoid mode only.
    pub argument_mismatches: u64,
    pub max_depth: usize,
}

/// Runs foreign functions on behalf of native callers.
///
/// Owns the engine and a fixed pool of `Config::MAX_NESTING` frames. Each
/// invocation claims the next frame, so foreign code can call native code
/// that calls foreign code again, up to the pool size.
#[derive(Debug)]
pub struct Bridge {
    engine: Box<dyn ExecutionEngine>,
    platform: Rc<dyn Platform>,
    images: Rc<RefCell<ImageRegistry>>,
    frames: Vec<ExecutionFrame>,
    snapshot: SharedSnapshot,
    nesting: NestingState,
    initialized: bool,
    paranoid: bool,
    stack_size: usize,
    stats: BridgeStats,
}

impl Bridge {
    pub fn new(
        engine: Box<dyn ExecutionEngine>,
        platform: Rc<dyn Platform>,
        images: Rc<RefCell<ImageRegistry>>,
        snapshot: SharedSnapshot,
        config: &EmulatorConfig,
    ) -> Self {
        Self {
            engine,
            platform,
            images,
            frames: Vec::new(),
            snapshot,
            nesting: NestingState::default(),
            initialized: false,
            paranoid: config.paranoid,
            stack_size: config.stack_size,
            stats: BridgeStats::default(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn nesting(&self) -> NestingState {
        self.nesting
    }

    pub fn depth(&self) -> usize {
        self.nesting.depth
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    pub fn engine(&self) -> &dyn ExecutionEngine {
        self.engine.as_ref()
    }

    /// Frame for nesting level `level`, once the pool exists.
    pub fn frame(&self, level: usize) -> Option<&ExecutionFrame> {
        self.frames.get(level)
    }

    /// Frame of the innermost active invocation.
    pub fn current_frame(&self) -> Option<&ExecutionFrame> {
        self.nesting.depth.checked_sub(1).and_then(|i| self.frames.get(i))
    }

    /// Sets up the engine and the frame pool. Runs once; later calls are no-ops.
    pub fn ensure_initialized(&mut self) {
        if self.initialized {
            return;
        }
        if let Err(err) = self.engine.init() {
            self.fatal(Fatal::EngineInit(err.to_string()));
        }

        let mut frames = Vec::with_capacity(Config::MAX_NESTING);
        for level in 0..Config::MAX_NESTING {
            let cpu = self.engine.create_cpu();
            frames.push(ExecutionFrame::new(level, cpu, self.stack_size));
        }
        self.frames = frames;
        self.initialized = true;
        trace!("x86 emulator initialised with {} frames", Config::MAX_NESTING);
    }

    /// Calls the foreign function at `entry` with up to sixteen integer
    /// arguments and returns its `rax`.
    pub fn invoke(&mut self, entry: u64, args: &[u64], host: &mut dyn NativeHost) -> u64 {
        self.ensure_initialized();

        // The engine cannot be re-entered mid-translation.
        if self.nesting.in_critical {
            self.fatal(Fatal::Reentrance);
        }
        if args.len() > Config::MAX_ARGS {
            self.fatal(Fatal::TooManyArguments { count: args.len(), max: Config::MAX_ARGS });
        }
        let level = self.nesting.depth;
        if level >= Config::MAX_NESTING {
            self.fatal(Fatal::NestingOverflow { max: Config::MAX_NESTING });
        }

        let mut argv: NativeArgs = [0; Config::MAX_ARGS];
        argv[..args.len()].copy_from_slice(args);

        self.nesting.depth += 1;
        self.stats.invocations += 1;
        self.stats.max_depth = self.stats.max_depth.max(self.nesting.depth);

        trace!(
            "calling x86_64 0x{:x}({:x?}) at level {}",
            entry,
            &argv[..args.len()],
            level
        );

        let stack_top = self.frames[level].reset_stack();
        let pushed = Self::marshal_call(&mut self.frames[level], entry, &argv);
        self.check(pushed);

        self.trap_loop(level, host);

        let result = self.unwind_call(level, &argv, stack_top);
        self.nesting.depth -= 1;
        if self.nesting.depth == 0 {
            self.snapshot.borrow_mut().take();
        }
        trace!("x86_64 0x{:x} returned 0x{:x}", entry, result);
        result
    }

    /// Microsoft x64 call setup: four register arguments, the rest on the
    /// stack in reverse order, the home zone, then the return address.
    fn marshal_call(frame: &mut ExecutionFrame, entry: u64, args: &NativeArgs) -> Result<(), StackError> {
        for (reg, value) in ARG_REGISTERS.iter().zip(args.iter()) {
            frame.cpu.set_reg(*reg, *value);
        }
        for value in args[Config::REGISTER_ARGS..].iter().rev() {
            frame.push64(*value)?;
        }
        for _ in 0..Config::HOME_ZONE_SLOTS {
            frame.push64(0)?;
        }
        frame.cpu.rip = entry;
        frame.push64(Config::CALL_SENTINEL)
    }

    fn trap_loop(&mut self, level: usize, host: &mut dyn NativeHost) {
        loop {
            let signal = self.run_engine(level);
            match signal {
                TrapSignal::ReturnToNative => {
                    trace!("return from x86 at level {}", level);
                    break;
                }
                TrapSignal::CallToNative => self.call_native(level, host),
                TrapSignal::Halt => {
                    self.stats.halts += 1;
                    self.platform.cpu_sleep();
                    self.frames[level].cpu.halted = false;
                }
                TrapSignal::Fault(code) => {
                    let rip = self.frames[level].cpu.rip;
                    error!("x86 trap #{:x} (rip=0x{:x})", code, rip);
                    self.fatal(Fatal::UnexpectedTrap { code, rip });
                }
            }
        }
    }

    /// One engine run at `TPL_NOTIFY`. Publishes the frame first so the
    /// exception hook can dump it if translated code crashes.
    fn run_engine(&mut self, level: usize) -> TrapSignal {
        let images = self.images.borrow();
        let ctx = RunContext::new(&images);
        let frame = &mut self.frames[level];

        let code = self.engine.read_code(frame.cpu.rip, Config::DISASM_WINDOW);
        *self.snapshot.borrow_mut() = Some(StateSnapshot::capture(frame, code));

        trace!("entering x86 at 0x{:x} (rsp=0x{:x})", frame.cpu.rip, frame.cpu.rsp());
        let old_tpl = self.platform.raise_tpl(Config::TPL_NOTIFY);
        self.nesting.in_critical = true;
        let signal = self.engine.run(frame, &ctx);
        self.nesting.in_critical = false;
        self.platform.restore_tpl(old_tpl);
        trace!("left x86 at 0x{:x} with {:?}", frame.cpu.rip, signal);

        signal
    }

    /// Performs the call foreign code made to `rip`, then returns into
    /// foreign code as `ret` would.
    ///
    /// Stack at entry, in quadwords above `rsp`: return address, four home
    /// zone slots, then arguments 4 through 15.
    fn call_native(&mut self, level: usize, host: &mut dyn NativeHost) {
        let target = self.frames[level].cpu.rip;
        let caller = self.stack_slot(level, 0);
        let caller = self.check(caller);

        if target < Config::NULL_PAGE_LIMIT {
            error!("invalid jump to zero page 0x{:x} from caller 0x{:x}", target, caller);
            self.dump_state();
            if self.paranoid {
                self.fatal(Fatal::ZeroPageCall { target, caller });
            }
            self.stats.rejected_native_calls += 1;
            self.finish_native_call(level, Status::UNSUPPORTED.0);
            return;
        }
        // Native code is always 4-byte aligned.
        if target & 0x3 != 0 {
            self.fatal(Fatal::MisalignedNativeTarget(target));
        }

        let args = self.native_args(level);
        trace!("calling native 0x{:x}({:x?}) from 0x{:x}", target, &args[..8], caller);

        self.stats.native_calls += 1;
        let result = host.call_native(self, target, &args);

        trace!("native call to 0x{:x} finished, returning to 0x{:x}", target, caller);
        self.finish_native_call(level, result);
    }

    fn native_args(&self, level: usize) -> NativeArgs {
        let mut args: NativeArgs = [0; Config::MAX_ARGS];
        let frame = &self.frames[level];
        for (slot, reg) in args.iter_mut().zip(ARG_REGISTERS.iter()) {
            *slot = frame.cpu.reg(*reg);
        }
        // Skip the return address and the home zone.
        let first = 1 + Config::HOME_ZONE_SLOTS;
        let mut failed = None;
        for (i, slot) in args[Config::REGISTER_ARGS..].iter_mut().enumerate() {
            match self.stack_slot(level, first + i) {
                Ok(value) => *slot = value,
                Err(err) => {
                    failed = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = failed {
            self.fatal(Fatal::Stack(err));
        }
        args
    }

    fn finish_native_call(&mut self, level: usize, result: u64) {
        self.frames[level].cpu.set_reg(Register::Rax, result);
        let ret = self.pop_return(level);
        let ret = self.check(ret);
        self.frames[level].cpu.rip = ret;
    }

    /// Quadword `index` slots above `rsp`, from the private stack or, when
    /// foreign code switched stacks, from the engine.
    fn stack_slot(&self, level: usize, index: usize) -> Result<u64, StackError> {
        let frame = &self.frames[level];
        frame.stack_slot(index).or_else(|err| {
            let addr = frame.cpu.rsp().wrapping_add(index as u64 * SLOT);
            self.engine.read_u64(addr).ok_or(err)
        })
    }

    fn pop_return(&mut self, level: usize) -> Result<u64, StackError> {
        let frame = &mut self.frames[level];
        match frame.pop64() {
            Ok(ret) => Ok(ret),
            Err(err) => {
                let rsp = frame.cpu.rsp();
                let ret = self.engine.read_u64(rsp).ok_or(err)?;
                frame.cpu.set_rsp(rsp.wrapping_add(SLOT));
                Ok(ret)
            }
        }
    }

    /// Releases the home zone and stack arguments and checks the frame is
    /// balanced. Returns the foreign `rax`.
    fn unwind_call(&mut self, level: usize, args: &NativeArgs, stack_top: u64) -> u64 {
        for _ in 0..Config::HOME_ZONE_SLOTS {
            let popped = self.frames[level].pop64();
            self.check(popped);
        }
        for (i, expected) in args.iter().enumerate().skip(Config::REGISTER_ARGS) {
            let popped = self.frames[level].pop64();
            let current = self.check(popped);
            if self.paranoid && current != *expected {
                self.stats.argument_mismatches += 1;
                warn!(
                    "argument {} mismatch at rsp=0x{:x}: 0x{:x} vs 0x{:x}",
                    i,
                    self.frames[level].cpu.rsp(),
                    current,
                    expected
                );
            }
        }

        let rsp = self.frames[level].cpu.rsp();
        if rsp != stack_top {
            self.fatal(Fatal::StackImbalance { expected: stack_top, actual: rsp });
        }
        self.frames[level].cpu.reg(Register::Rax)
    }

    /// Logs the innermost frame: PC, code window and registers.
    pub fn dump_state(&self) {
        let Some(frame) = self.current_frame() else {
            error!("no foreign invocation is active");
            return;
        };
        let code = self.engine.read_code(frame.cpu.rip, Config::DISASM_WINDOW);
        error!("{}", diag::format_state(&StateSnapshot::capture(frame, code)));
    }

    fn check<T>(&self, result: Result<T, StackError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => self.fatal(Fatal::Stack(err)),
        }
    }

    /// There is nothing to return to: log, dump and stop.
    fn fatal(&self, reason: Fatal) -> ! {
        error!("fatal emulator error: {}", reason);
        self.dump_state();
        panic!("{}", reason);
    }
}
