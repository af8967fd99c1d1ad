//! Saved AArch64 machine state handed to the synchronous exception handler.

/// Interrupted machine state as captured by the exception vector.
///
/// Writes to this structure take effect when the handler returns: changing
/// `elr` resumes execution elsewhere.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SystemContext {
    pub x0: u64,
    pub x1: u64,
    pub x2: u64,
    pub x3: u64,
    pub x4: u64,
    pub x5: u64,
    pub x6: u64,
    pub x7: u64,
    pub x8: u64,
    pub x9: u64,
    pub x10: u64,
    pub x11: u64,
    pub x12: u64,
    pub x13: u64,
    pub x14: u64,
    pub x15: u64,
    pub x16: u64, // ip0, scratch
    pub x17: u64, // ip1, scratch
    pub x18: u64,
    pub x19: u64,
    pub x20: u64,
    pub x21: u64,
    pub x22: u64,
    pub x23: u64,
    pub x24: u64,
    pub x25: u64,
    pub x26: u64,
    pub x27: u64,
    pub x28: u64,
    pub fp: u64,
    pub lr: u64,
    pub sp: u64,
    pub elr: u64,
    pub spsr: u64,
    pub fpsr: u64,
    pub esr: u64,
    pub far: u64,
}

/// Named accessor for one general-purpose register slot.
#[derive(Copy, Clone)]
pub struct GprAccessor {
    pub name: &'static str,
    pub get: fn(&SystemContext) -> u64,
    pub get_mut: fn(&mut SystemContext) -> &mut u64,
}

macro_rules! gpr_accessors {
    ($($name:literal => $field:ident),* $(,)?) => {
        [$(
            GprAccessor {
                name: $name,
                get: {
                    fn get(ctx: &SystemContext) -> u64 {
                        ctx.$field
                    }
                    get
                },
                get_mut: {
                    fn get_mut(ctx: &mut SystemContext) -> &mut u64 {
                        &mut ctx.$field
                    }
                    get_mut
                },
            },
        )*]
    };
}

/// Register number (as encoded in instruction syndromes) to field. Index 31
/// has no entry: in load/store encodings it is the zero register.
pub static GPR_ACCESSORS: [GprAccessor; 31] = gpr_accessors![
    "x0" => x0, "x1" => x1, "x2" => x2, "x3" => x3,
    "x4" => x4, "x5" => x5, "x6" => x6, "x7" => x7,
    "x8" => x8, "x9" => x9, "x10" => x10, "x11" => x11,
    "x12" => x12, "x13" => x13, "x14" => x14, "x15" => x15,
    "x16" => x16, "x17" => x17, "x18" => x18, "x19" => x19,
    "x20" => x20, "x21" => x21, "x22" => x22, "x23" => x23,
    "x24" => x24, "x25" => x25, "x26" => x26, "x27" => x27,
    "x28" => x28, "fp" => fp, "lr" => lr,
];

impl SystemContext {
    /// Reads register `index`; `None` for the zero register or out of range.
    pub fn gpr(&self, index: u8) -> Option<u64> {
        GPR_ACCESSORS.get(index as usize).map(|acc| (acc.get)(self))
    }

    /// Mutable slot for register `index`; `None` for the zero register.
    pub fn gpr_mut(&mut self, index: u8) -> Option<&mut u64> {
        match GPR_ACCESSORS.get(index as usize) {
            Some(acc) => Some((acc.get_mut)(self)),
            None => None,
        }
    }

    /// Writes register `index`. Returns false when there is no such slot.
    pub fn set_gpr(&mut self, index: u8, value: u64) -> bool {
        match self.gpr_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}
