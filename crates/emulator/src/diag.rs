use core::fmt::Write;
use std::cell::RefCell;
use std::rc::Rc;

use types::x86::{REGISTER_NAMES, SEGMENT_NAMES};
use types::X86Cpu;

use crate::frame::ExecutionFrame;

/// Copy of a foreign frame taken outside the engine, so it can be dumped
/// without borrowing the bridge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateSnapshot {
    pub level: usize,
    pub cpu: X86Cpu,
    pub stack_base: u64,
    pub stack_top: u64,
    pub code: Option<Vec<u8>>,
}

impl StateSnapshot {
    pub fn capture(frame: &ExecutionFrame, code: Option<Vec<u8>>) -> Self {
        Self {
            level: frame.level(),
            cpu: frame.cpu.clone(),
            stack_base: frame.stack.base(),
            stack_top: frame.stack.top(),
            code,
        }
    }
}

/// State of the innermost engine run, refreshed by the bridge each time it
/// enters the engine and cleared when the outermost invocation returns.
pub type SharedSnapshot = Rc<RefCell<Option<StateSnapshot>>>;

/// Human-readable dump of a foreign frame: PC, code window, register file.
pub fn format_state(state: &StateSnapshot) -> String {
    let cpu = &state.cpu;
    let mut out = String::new();

    let _ = writeln!(out, "--- x86 state (nesting level {}) ---", state.level);
    let _ = writeln!(out, "rip = 0x{:016x}", cpu.rip);
    match &state.code {
        Some(bytes) => {
            let _ = writeln!(out, "Input code: {}", hex::encode(bytes));
        }
        None => {
            let _ = writeln!(out, "Input code: <unavailable>");
        }
    }

    for (i, pair) in cpu.regs.chunks(2).enumerate() {
        let _ = writeln!(
            out,
            "{:<3} = 0x{:016x}  {:<3} = 0x{:016x}",
            REGISTER_NAMES[i * 2],
            pair[0],
            REGISTER_NAMES[i * 2 + 1],
            pair[1]
        );
    }
    let _ = writeln!(out, "rflags = 0x{:016x} cpl = {} halted = {}", cpu.rflags, cpu.cpl, cpu.halted);

    let segs: Vec<String> = SEGMENT_NAMES
        .iter()
        .zip(cpu.segs.iter())
        .map(|(name, sel)| format!("{}={:04x}", name, sel))
        .collect();
    let _ = writeln!(out, "{}", segs.join(" "));

    let _ = writeln!(
        out,
        "stack: base=0x{:x} top=0x{:x} rsp=0x{:x}",
        state.stack_base,
        state.stack_top,
        cpu.rsp()
    );
    out.push_str("------------------------------------");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::Register;

    #[test]
    fn dump_contains_pc_code_and_registers() {
        let mut cpu = X86Cpu::long_mode_user();
        cpu.rip = 0x4000_1000;
        cpu.set_reg(Register::Rax, 0xdead_beef);
        cpu.set_reg(Register::R15, 0x15);
        let frame = ExecutionFrame::new(2, cpu, 4096);

        let state = StateSnapshot::capture(&frame, Some(vec![0x48, 0x31, 0xc0, 0xc3]));
        let dump = format_state(&state);
        assert!(dump.contains("nesting level 2"));
        assert!(dump.contains("rip = 0x0000000040001000"));
        assert!(dump.contains("Input code: 4831c0c3"));
        assert!(dump.contains("rax = 0x00000000deadbeef"));
        assert!(dump.contains("r15 = 0x0000000000000015"));
        assert!(dump.contains("cs=0033"));
    }

    #[test]
    fn dump_without_code() {
        let frame = ExecutionFrame::new(0, X86Cpu::default(), 4096);
        let state = StateSnapshot::capture(&frame, None);
        assert!(format_state(&state).contains("<unavailable>"));
    }

    #[test]
    fn snapshot_is_detached_from_the_frame() {
        let mut frame = ExecutionFrame::new(1, X86Cpu::long_mode_user(), 4096);
        let top = frame.reset_stack();
        let state = StateSnapshot::capture(&frame, None);

        frame.push64(7).unwrap();
        frame.cpu.rip = 0x1234;

        assert_eq!(state.cpu.rsp(), top);
        assert_eq!(state.stack_top, top);
        assert_ne!(state.cpu.rip, 0x1234);
    }
}
