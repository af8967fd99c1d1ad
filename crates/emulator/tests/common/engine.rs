use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::rc::Rc;

use emulator::error::EmuError;
use emulator::global::code_gen_region;
use emulator::{
    ExceptionHook, ExceptionOutcome, ExecutionEngine, ExecutionFrame, RunContext, StateSnapshot, TrapSignal,
};
use types::x86::ARG_REGISTERS;
use types::{Register, Syndrome, SystemContext, X86Cpu};

pub const VECTOR_SS: u32 = 12;
pub const VECTOR_GP: u32 = 13;

/// Foreign memory outside the bridge's stacks that routines may switch to.
pub const ALT_STACK: Range<u64> = 0x7e00_0000..0x7e00_1000;

/// One scripted foreign instruction. Each op occupies one byte of address
/// space, so the op at index `i` of a routine lives at `entry + i`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    SetRax(u64),
    /// `sub rsp, frame` + stack argument stores + register setup + `call`.
    Call { target: u64, args: Vec<u64> },
    /// `add rsp, n`
    AddRsp(u64),
    Ret,
    /// `jmp [rsp]`: returns without releasing the return address.
    JmpToReturn,
    /// `mov [rsp + offset], value`
    StoreStack { offset: u64, value: u64 },
    Halt,
    Raise(u32),
    /// Records the argument registers and the twelve stack argument slots.
    Capture,
    /// Moves `rsp` into `ALT_STACK`, below room for the caller frames, and
    /// remembers the old value.
    SwitchStack,
    RestoreStack,
    /// Translated code at `code_gen.start + offset` takes a synchronous
    /// exception. The hook's verdict is recorded and execution continues.
    HostFault { syndrome: Syndrome, offset: u64, far: u64 },
}

/// Stack bytes a caller reserves for `nargs` arguments: home zone plus the
/// stack-passed ones, rounded to 16.
pub fn call_frame_size(nargs: usize) -> u64 {
    let slots = 4 + nargs.saturating_sub(4) as u64;
    (slots * 8 + 15) & !15
}

/// A complete call sequence including the caller's stack cleanup.
pub fn call(target: u64, args: &[u64]) -> Vec<Op> {
    vec![
        Op::Call { target, args: args.to_vec() },
        Op::AddRsp(call_frame_size(args.len())),
    ]
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Captured {
    pub regs: [u64; 4],
    pub stack: [u64; 12],
    pub rsp: u64,
}

impl Captured {
    pub fn args(&self) -> Vec<u64> {
        self.regs.iter().chain(self.stack.iter()).copied().collect()
    }
}

/// One exception raised from inside a run.
#[derive(Clone, Debug)]
pub struct HostFault {
    pub outcome: ExceptionOutcome,
    pub ctx: SystemContext,
    /// What the hook would dump at that moment.
    pub active_state: Option<StateSnapshot>,
}

#[derive(Debug, Default)]
pub struct Program {
    routines: BTreeMap<u64, Vec<Op>>,
    pub captures: Vec<Captured>,
    pub faults: Vec<HostFault>,
    pub hook: Option<Rc<ExceptionHook>>,
    pub runs: usize,
}

impl Program {
    pub fn add(&mut self, entry: u64, ops: Vec<Op>) {
        self.routines.insert(entry, ops);
    }

    fn op_at(&self, rip: u64) -> Option<Op> {
        let (entry, ops) = self.routines.range(..=rip).next_back()?;
        ops.get((rip - entry) as usize).cloned()
    }
}

pub type SharedProgram = Rc<RefCell<Program>>;

#[derive(Debug)]
pub struct ScriptedEngine {
    program: SharedProgram,
    code_gen: Range<u64>,
    memory: HashMap<u64, u64>,
    saved_rsp: Vec<u64>,
    pub cpus_created: usize,
}

impl ScriptedEngine {
    pub fn new(program: SharedProgram, code_gen_alloc: u64) -> Self {
        Self {
            program,
            code_gen: code_gen_region(code_gen_alloc),
            memory: HashMap::new(),
            saved_rsp: Vec::new(),
            cpus_created: 0,
        }
    }

    fn write(&mut self, frame: &mut ExecutionFrame, addr: u64, value: u64) -> Result<(), TrapSignal> {
        if frame.stack.write_u64(addr, value) {
            return Ok(());
        }
        if !ALT_STACK.contains(&addr) {
            return Err(TrapSignal::Fault(VECTOR_SS));
        }
        self.memory.insert(addr, value);
        Ok(())
    }

    fn read(&self, frame: &ExecutionFrame, addr: u64) -> Result<u64, TrapSignal> {
        frame
            .stack
            .read_u64(addr)
            .or_else(|| self.read_u64(addr))
            .ok_or(TrapSignal::Fault(VECTOR_SS))
    }

    fn push(&mut self, frame: &mut ExecutionFrame, value: u64) -> Result<(), TrapSignal> {
        let rsp = frame.cpu.rsp() - 8;
        self.write(frame, rsp, value)?;
        frame.cpu.set_rsp(rsp);
        Ok(())
    }

    fn pop(&mut self, frame: &mut ExecutionFrame) -> Result<u64, TrapSignal> {
        let rsp = frame.cpu.rsp();
        let value = self.read(frame, rsp)?;
        frame.cpu.set_rsp(rsp + 8);
        Ok(value)
    }

    fn host_fault(&mut self, syndrome: Syndrome, offset: u64, far: u64) -> Result<(), TrapSignal> {
        let hook = self.program.borrow().hook.clone();
        let Some(hook) = hook else {
            return Err(TrapSignal::Fault(VECTOR_GP));
        };

        let mut ctx = SystemContext::default();
        for index in 0..31u8 {
            ctx.set_gpr(index, 0xffff_0000 + index as u64);
        }
        ctx.esr = syndrome.0;
        ctx.elr = self.code_gen.start + offset;
        ctx.far = far;

        let active_state = hook.active_state();
        let outcome = hook.handle(&mut ctx);
        self.program.borrow_mut().faults.push(HostFault { outcome, ctx, active_state });
        Ok(())
    }

    fn step(&mut self, frame: &mut ExecutionFrame, op: Op) -> Result<(), TrapSignal> {
        match op {
            Op::SetRax(value) => frame.cpu.set_reg(Register::Rax, value),
            Op::Call { target, args } => {
                let rsp = frame.cpu.rsp() - call_frame_size(args.len());
                frame.cpu.set_rsp(rsp);
                for (i, value) in args.iter().enumerate().skip(4) {
                    self.write(frame, rsp + 8 * i as u64, *value)?;
                }
                for (reg, value) in ARG_REGISTERS.iter().zip(args.iter()) {
                    frame.cpu.set_reg(*reg, *value);
                }
                let ret = frame.cpu.rip;
                self.push(frame, ret)?;
                frame.cpu.rip = target;
            }
            Op::AddRsp(n) => {
                let rsp = frame.cpu.rsp() + n;
                frame.cpu.set_rsp(rsp);
            }
            Op::Ret => {
                frame.cpu.rip = self.pop(frame)?;
            }
            Op::JmpToReturn => {
                frame.cpu.rip = self.read(frame, frame.cpu.rsp())?;
            }
            Op::StoreStack { offset, value } => {
                let addr = frame.cpu.rsp() + offset;
                self.write(frame, addr, value)?;
            }
            Op::Halt => {
                frame.cpu.halted = true;
                return Err(TrapSignal::Halt);
            }
            Op::Raise(vector) => return Err(TrapSignal::Fault(vector)),
            Op::Capture => {
                let mut captured = Captured { rsp: frame.cpu.rsp(), ..Default::default() };
                for (slot, reg) in captured.regs.iter_mut().zip(ARG_REGISTERS.iter()) {
                    *slot = frame.cpu.reg(*reg);
                }
                for (i, slot) in captured.stack.iter_mut().enumerate() {
                    *slot = self.read(frame, captured.rsp + 8 * (5 + i as u64))?;
                }
                self.program.borrow_mut().captures.push(captured);
            }
            Op::SwitchStack => {
                self.saved_rsp.push(frame.cpu.rsp());
                frame.cpu.set_rsp(ALT_STACK.end - 0x100);
            }
            Op::RestoreStack => {
                let rsp = self.saved_rsp.pop().ok_or(TrapSignal::Fault(VECTOR_GP))?;
                frame.cpu.set_rsp(rsp);
            }
            Op::HostFault { syndrome, offset, far } => self.host_fault(syndrome, offset, far)?,
        }
        Ok(())
    }
}

impl ExecutionEngine for ScriptedEngine {
    fn init(&mut self) -> Result<(), EmuError> {
        Ok(())
    }

    fn create_cpu(&mut self) -> X86Cpu {
        self.cpus_created += 1;
        X86Cpu::long_mode_user()
    }

    fn run(&mut self, frame: &mut ExecutionFrame, ctx: &RunContext<'_>) -> TrapSignal {
        self.program.borrow_mut().runs += 1;
        loop {
            let rip = frame.cpu.rip;
            if ctx.is_native_return(rip) {
                return TrapSignal::ReturnToNative;
            }
            if ctx.is_native_call(rip) {
                return TrapSignal::CallToNative;
            }

            let op = self.program.borrow().op_at(rip);
            let Some(op) = op else {
                return TrapSignal::Fault(VECTOR_GP);
            };
            frame.cpu.rip = rip + 1;
            if let Err(signal) = self.step(frame, op) {
                return signal;
            }
        }
    }

    fn code_gen_buffer(&self) -> Range<u64> {
        self.code_gen.clone()
    }

    fn read_code(&self, addr: u64, len: usize) -> Option<Vec<u8>> {
        // One byte per op; the op index stands in for the encoding.
        let program = self.program.borrow();
        let (entry, ops) = program.routines.range(..=addr).next_back()?;
        let start = (addr - entry) as usize;
        let end = ops.len().min(start + len);
        Some((start..end).map(|i| i as u8).collect())
    }

    fn read_u64(&self, addr: u64) -> Option<u64> {
        if !ALT_STACK.contains(&addr) {
            return None;
        }
        Some(self.memory.get(&addr).copied().unwrap_or(0))
    }
}

/// Engine whose `init` fails.
#[derive(Debug)]
pub struct BrokenEngine;

impl ExecutionEngine for BrokenEngine {
    fn init(&mut self) -> Result<(), EmuError> {
        Err(EmuError::Engine("code buffer allocation failed".into()))
    }

    fn run(&mut self, _frame: &mut ExecutionFrame, _ctx: &RunContext<'_>) -> TrapSignal {
        TrapSignal::Fault(VECTOR_GP)
    }

    fn code_gen_buffer(&self) -> Range<u64> {
        0..0
    }
}
