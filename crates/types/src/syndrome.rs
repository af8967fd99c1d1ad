//! Decoding of the AArch64 Exception Syndrome Register (ESR_ELx).

const EC_SHIFT: u32 = 26;
const ISS_MASK: u64 = 0x01ff_ffff;

/// Data abort: instruction syndrome valid.
const ISV: u64 = 1 << 24;
/// Data abort: syndrome register transfer (destination register).
const SRT_SHIFT: u32 = 16;
const SRT_MASK: u64 = 0x1f;
/// Data abort: write-not-read.
const WNR: u64 = 1 << 6;

/// Fault status code groups (IFSC/DFSC bits [5:2]).
const FSC_GROUP_MASK: u64 = 0x3c;
const FSC_PERMISSION: u64 = 0x0c;

/// Register index that encodes the zero register in load/store syndromes.
pub const ZERO_REGISTER: u8 = 31;

/// Exception classes the emulator cares about. Everything else is `Other`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExceptionClass {
    /// Instruction abort taken without a change in exception level.
    InstructionAbort,
    /// PC alignment fault.
    PcAlignment,
    /// Data abort taken without a change in exception level.
    DataAbort,
    Other(u8),
}

pub const EC_INSTRUCTION_ABORT_SAME_EL: u8 = 0x21;
pub const EC_PC_ALIGNMENT: u8 = 0x22;
pub const EC_DATA_ABORT_SAME_EL: u8 = 0x25;

impl ExceptionClass {
    pub const fn from_code(ec: u8) -> Self {
        match ec {
            EC_INSTRUCTION_ABORT_SAME_EL => ExceptionClass::InstructionAbort,
            EC_PC_ALIGNMENT => ExceptionClass::PcAlignment,
            EC_DATA_ABORT_SAME_EL => ExceptionClass::DataAbort,
            other => ExceptionClass::Other(other),
        }
    }

    pub const fn code(self) -> u8 {
        match self {
            ExceptionClass::InstructionAbort => EC_INSTRUCTION_ABORT_SAME_EL,
            ExceptionClass::PcAlignment => EC_PC_ALIGNMENT,
            ExceptionClass::DataAbort => EC_DATA_ABORT_SAME_EL,
            ExceptionClass::Other(ec) => ec,
        }
    }
}

/// Raw ESR value with typed accessors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Syndrome(pub u64);

impl Syndrome {
    /// Builds a syndrome from an exception class code and its ISS field.
    pub const fn compose(ec: u8, iss: u32) -> Self {
        Syndrome(((ec as u64) << EC_SHIFT) | (iss as u64 & ISS_MASK))
    }

    /// Instruction abort with a permission fault at the given translation level.
    pub const fn instruction_permission_fault(level: u8) -> Self {
        Self::compose(EC_INSTRUCTION_ABORT_SAME_EL, (FSC_PERMISSION as u32) | (level as u32 & 3))
    }

    /// Data abort with the given destination register and direction.
    pub const fn data_abort(isv: bool, srt: u8, write: bool) -> Self {
        let mut iss = ((srt as u64 & SRT_MASK) << SRT_SHIFT) as u32;
        if isv {
            iss |= ISV as u32;
        }
        if write {
            iss |= WNR as u32;
        }
        Self::compose(EC_DATA_ABORT_SAME_EL, iss)
    }

    pub const fn ec(self) -> u8 {
        ((self.0 >> EC_SHIFT) & 0x3f) as u8
    }

    pub const fn class(self) -> ExceptionClass {
        ExceptionClass::from_code(self.ec())
    }

    pub const fn iss(self) -> u32 {
        (self.0 & ISS_MASK) as u32
    }

    /// Fault status code of an abort (IFSC or DFSC).
    pub const fn fault_status(self) -> u8 {
        (self.0 & 0x3f) as u8
    }

    pub const fn is_permission_fault(self) -> bool {
        self.0 & FSC_GROUP_MASK == FSC_PERMISSION
    }

    pub const fn instruction_syndrome_valid(self) -> bool {
        self.0 & ISV != 0
    }

    pub const fn is_write(self) -> bool {
        self.0 & WNR != 0
    }

    /// Destination (loads) or source (stores) register index.
    pub const fn transfer_register(self) -> u8 {
        ((self.0 >> SRT_SHIFT) & SRT_MASK) as u8
    }
}
