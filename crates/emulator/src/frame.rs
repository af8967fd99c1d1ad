use core::fmt;

use types::mmu::align_down;
use types::X86Cpu;

use crate::error::StackError;

pub const SLOT: u64 = 8;
const STACK_ALIGN: u64 = 16;

/// Private stack for one nesting level.
///
/// Foreign code addresses the stack through flat pointers, so `rsp` values
/// are the real host addresses of this buffer. The buffer is heap allocated
/// once and never moves.
pub struct ForeignStack {
    mem: Box<[u8]>,
}

impl fmt::Debug for ForeignStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignStack")
            .field("base", &format_args!("0x{:x}", self.base()))
            .field("size", &self.mem.len())
            .finish()
    }
}

impl ForeignStack {
    pub fn new(size: usize) -> Self {
        assert!(size as u64 >= STACK_ALIGN * 2, "stack too small: {} bytes", size);
        Self { mem: vec![0u8; size].into_boxed_slice() }
    }

    pub fn base(&self) -> u64 {
        self.mem.as_ptr() as u64
    }

    pub fn end(&self) -> u64 {
        self.base() + self.mem.len() as u64
    }

    /// Initial stack pointer: the end of the buffer, 16-byte aligned.
    pub fn top(&self) -> u64 {
        align_down(self.end(), STACK_ALIGN)
    }

    pub fn size(&self) -> usize {
        self.mem.len()
    }

    fn offset(&self, addr: u64, len: u64) -> Option<usize> {
        if addr < self.base() || addr.checked_add(len)? > self.end() {
            return None;
        }
        Some((addr - self.base()) as usize)
    }

    pub fn read_u64(&self, addr: u64) -> Option<u64> {
        let off = self.offset(addr, SLOT)?;
        let bytes: [u8; 8] = self.mem[off..off + 8].try_into().ok()?;
        Some(u64::from_le_bytes(bytes))
    }

    pub fn write_u64(&mut self, addr: u64, value: u64) -> bool {
        match self.offset(addr, SLOT) {
            Some(off) => {
                self.mem[off..off + 8].copy_from_slice(&value.to_le_bytes());
                true
            }
            None => false,
        }
    }

    pub fn bytes(&self, addr: u64, len: usize) -> Option<&[u8]> {
        let off = self.offset(addr, len as u64)?;
        Some(&self.mem[off..off + len])
    }
}

/// One reentrant execution context: a virtual CPU and its private stack.
#[derive(Debug)]
pub struct ExecutionFrame {
    pub cpu: X86Cpu,
    pub stack: ForeignStack,
    level: usize,
}

impl ExecutionFrame {
    pub fn new(level: usize, cpu: X86Cpu, stack_size: usize) -> Self {
        Self { cpu, stack: ForeignStack::new(stack_size), level }
    }

    /// Nesting level this frame serves.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Points `rsp` at the top of the private stack and returns it.
    pub fn reset_stack(&mut self) -> u64 {
        let top = self.stack.top();
        self.cpu.set_rsp(top);
        top
    }

    pub fn push64(&mut self, value: u64) -> Result<(), StackError> {
        let rsp = self.cpu.rsp().wrapping_sub(SLOT);
        if !self.stack.write_u64(rsp, value) {
            return Err(StackError::Overflow { rsp, base: self.stack.base() });
        }
        self.cpu.set_rsp(rsp);
        Ok(())
    }

    pub fn pop64(&mut self) -> Result<u64, StackError> {
        let rsp = self.cpu.rsp();
        let value = self
            .stack
            .read_u64(rsp)
            .ok_or(StackError::Underflow { rsp, top: self.stack.top() })?;
        self.cpu.set_rsp(rsp + SLOT);
        Ok(value)
    }

    /// Quadword `index` slots above the current `rsp`; slot 0 is the return
    /// address of the call being made.
    pub fn stack_slot(&self, index: usize) -> Result<u64, StackError> {
        let addr = self.cpu.rsp().wrapping_add(index as u64 * SLOT);
        self.stack
            .read_u64(addr)
            .ok_or(StackError::Underflow { rsp: addr, top: self.stack.top() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_is_aligned_and_inside_the_buffer() {
        let stack = ForeignStack::new(4096 + 5);
        assert_eq!(stack.top() % 16, 0);
        assert!(stack.top() <= stack.end());
        assert!(stack.top() > stack.base());
    }

    #[test]
    fn push_pop_is_lifo() {
        let mut frame = ExecutionFrame::new(0, X86Cpu::default(), 4096);
        let top = frame.reset_stack();
        frame.push64(1).unwrap();
        frame.push64(2).unwrap();
        assert_eq!(frame.cpu.rsp(), top - 16);
        assert_eq!(frame.stack_slot(0).unwrap(), 2);
        assert_eq!(frame.stack_slot(1).unwrap(), 1);
        assert_eq!(frame.pop64().unwrap(), 2);
        assert_eq!(frame.pop64().unwrap(), 1);
        assert_eq!(frame.cpu.rsp(), top);
    }

    #[test]
    fn overflow_is_reported_and_rsp_kept() {
        let mut frame = ExecutionFrame::new(0, X86Cpu::default(), 32);
        frame.reset_stack();
        let mut pushed = 0;
        while frame.push64(pushed).is_ok() {
            pushed += 1;
        }
        let rsp = frame.cpu.rsp();
        assert!(matches!(frame.push64(0), Err(StackError::Overflow { .. })));
        assert_eq!(frame.cpu.rsp(), rsp);
        assert!(rsp >= frame.stack.base());
    }

    #[test]
    fn reads_outside_the_stack_fail() {
        let frame = ExecutionFrame::new(0, X86Cpu::default(), 64);
        assert_eq!(frame.stack.read_u64(frame.stack.end()), None);
        assert_eq!(frame.stack.read_u64(frame.stack.base().wrapping_sub(8)), None);
    }
}
