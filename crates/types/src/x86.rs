/// x86-64 general-purpose registers in hardware encoding order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Register {
    Rax = 0, // return value
    Rcx = 1, // argument 0
    Rdx = 2, // argument 1
    Rbx = 3,
    Rsp = 4, // stack pointer
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8, // argument 2
    R9 = 9, // argument 3
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

/// Registers carrying the first four integer arguments (Microsoft x64 ABI).
pub const ARG_REGISTERS: [Register; 4] = [Register::Rcx, Register::Rdx, Register::R8, Register::R9];

pub const REGISTER_NAMES: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi",
    "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15",
];

/// Segment register slots.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Es = 0,
    Cs = 1,
    Ss = 2,
    Ds = 3,
    Fs = 4,
    Gs = 5,
}

pub const SEGMENT_NAMES: [&str; 6] = ["es", "cs", "ss", "ds", "fs", "gs"];

pub const CR0_PE: u64 = 1 << 0;
pub const CR0_WP: u64 = 1 << 16;
pub const CR0_PG: u64 = 1 << 31;

pub const CR4_PAE: u64 = 1 << 5;
pub const CR4_OSFXSR: u64 = 1 << 9;

pub const EFER_LME: u64 = 1 << 8;
pub const EFER_LMA: u64 = 1 << 10;

/// Engine-side cached mode flags.
pub const HF_PE: u32 = 1 << 7;
pub const HF_LMA: u32 = 1 << 14;
pub const HF_OSFXSR: u32 = 1 << 22;

/// RFLAGS bit 1 is reserved and always reads as one.
pub const RFLAGS_FIXED: u64 = 1 << 1;

const DESC_TYPE_SHIFT: u64 = 8;
const DESC_S: u64 = 1 << 12;
const DESC_DPL_SHIFT: u64 = 13;
const DESC_P: u64 = 1 << 15;
const DESC_L: u64 = 1 << 21;
const DESC_B: u64 = 1 << 22;
const DESC_G: u64 = 1 << 23;

const fn flat_descriptor(flags: u64) -> u64 {
    0xffff | (0xf_0000 << 32) | (flags << 32)
}

/// Flat GDT: slot 5 is a ring-3 data segment, slot 6 a ring-3 64-bit code segment.
pub static GDT_TABLE: [u64; 16] = {
    let mut table = [0u64; 16];
    table[5] = flat_descriptor(DESC_G | DESC_B | DESC_P | DESC_S | (3 << DESC_DPL_SHIFT) | (0x2 << DESC_TYPE_SHIFT));
    table[6] = flat_descriptor(
        DESC_G | DESC_B | DESC_P | DESC_S | DESC_L | (3 << DESC_DPL_SHIFT) | (0xa << DESC_TYPE_SHIFT),
    );
    table
};

/// Ring-3 selector for GDT slot 6.
pub const USER_CODE64_SELECTOR: u16 = 0x33;
/// Ring-3 selector for GDT slot 5.
pub const USER_DATA_SELECTOR: u16 = 0x2b;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DescriptorTable {
    pub base: u64,
    pub limit: u16,
}

/// Architectural state of one virtual x86-64 CPU.
///
/// The bridge only touches `regs`, `rip` and `halted`; the rest belongs to
/// the execution engine and is set up once per CPU.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct X86Cpu {
    pub regs: [u64; 16],
    pub rip: u64,
    pub rflags: u64,
    pub segs: [u16; 6],
    pub cr0: u64,
    pub cr4: u64,
    pub efer: u64,
    pub hflags: u32,
    pub cpl: u8,
    pub gdt: DescriptorTable,
    pub halted: bool,
}

impl Default for X86Cpu {
    fn default() -> Self {
        Self {
            regs: [0; 16],
            rip: 0,
            rflags: RFLAGS_FIXED,
            segs: [0; 6],
            cr0: 0,
            cr4: 0,
            efer: 0,
            hflags: 0,
            cpl: 0,
            gdt: DescriptorTable::default(),
            halted: false,
        }
    }
}

impl X86Cpu {
    /// A CPU in 64-bit user mode with paging, flat segments and SSE enabled.
    /// Firmware drivers are not expected to need ring 0.
    pub fn long_mode_user() -> Self {
        let mut cpu = Self::default();
        cpu.cpl = 3;
        cpu.cr0 = CR0_PG | CR0_WP | CR0_PE;
        cpu.cr4 |= CR4_OSFXSR | CR4_PAE;
        cpu.hflags |= HF_PE | HF_OSFXSR | HF_LMA;
        cpu.efer |= EFER_LMA | EFER_LME;
        cpu.gdt = DescriptorTable {
            base: GDT_TABLE.as_ptr() as u64,
            limit: (core::mem::size_of_val(&GDT_TABLE) - 1) as u16,
        };
        cpu.set_segment(Segment::Cs, USER_CODE64_SELECTOR);
        cpu.set_segment(Segment::Ss, USER_DATA_SELECTOR);
        cpu
    }

    #[inline]
    pub fn reg(&self, reg: Register) -> u64 {
        self.regs[reg as usize]
    }

    #[inline]
    pub fn set_reg(&mut self, reg: Register, value: u64) {
        self.regs[reg as usize] = value;
    }

    #[inline]
    pub fn rsp(&self) -> u64 {
        self.reg(Register::Rsp)
    }

    #[inline]
    pub fn set_rsp(&mut self, value: u64) {
        self.set_reg(Register::Rsp, value);
    }

    pub fn segment(&self, seg: Segment) -> u16 {
        self.segs[seg as usize]
    }

    pub fn set_segment(&mut self, seg: Segment, selector: u16) {
        self.segs[seg as usize] = selector;
    }

    pub fn is_long_mode(&self) -> bool {
        self.efer & EFER_LMA != 0 && self.hflags & HF_LMA != 0
    }
}
