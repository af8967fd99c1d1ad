//! Synchronous exception triage.
//!
//! `classify` decides what a fault means without touching the machine
//! context; `apply` carries the decision out.

use core::ops::Range;

use tracing::warn;
use types::mmu::PAGE_SIZE;
use types::syndrome::ZERO_REGISTER;
use types::{ExceptionClass, Syndrome, SystemContext};

use crate::global::Config;
use crate::registry::ImageRegistry;

/// Fault fields the classifier looks at.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FaultInfo {
    pub syndrome: Syndrome,
    /// Faulting PC.
    pub elr: u64,
    /// Faulting data address (data aborts only).
    pub far: u64,
}

impl From<&SystemContext> for FaultInfo {
    fn from(ctx: &SystemContext) -> Self {
        Self { syndrome: Syndrome(ctx.esr), elr: ctx.elr, far: ctx.far }
    }
}

/// Values handed to the entry trampoline in x16/x17.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Stash {
    /// Foreign address native code tried to execute.
    pub target: u64,
    /// Base of the image it belongs to.
    pub image_base: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl Access {
    fn describe(self) -> &'static str {
        match self {
            Access::Read => "read from",
            Access::Write => "write to",
        }
    }
}

/// Recovery for a null-page access made by translated code.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FixupOp {
    /// Load destination to clear; `None` for stores, the zero register, or
    /// when the syndrome carries no register information.
    pub zero_register: Option<u8>,
    pub access: Access,
    pub address: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Native code jumped into a foreign image: resume at the trampoline.
    Redirect { to: u64, stash: Stash },
    /// Benign null-page access from translated code.
    Fixup(FixupOp),
    /// Unrecoverable fault while foreign code was running.
    Crash { pc: u64 },
    /// Not ours.
    Defer,
}

/// Result of handling an exception.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExceptionOutcome {
    /// The context was updated; return from the exception.
    Resumed,
    /// Fall through to the platform's default handling.
    Unhandled,
}

/// Instruction fetch from an execute-protected page, or a PC misalignment
/// fault (x86 entry points have no alignment requirement).
fn is_foreign_entry(syndrome: Syndrome) -> bool {
    match syndrome.class() {
        ExceptionClass::InstructionAbort => syndrome.is_permission_fault(),
        ExceptionClass::PcAlignment => true,
        _ => false,
    }
}

pub fn classify(fault: &FaultInfo, images: &ImageRegistry, code_gen: &Range<u64>, trampoline: u64) -> Transition {
    if is_foreign_entry(fault.syndrome) {
        if let Some(record) = images.find(fault.elr) {
            return Transition::Redirect {
                to: trampoline,
                stash: Stash { target: fault.elr, image_base: record.base },
            };
        }
    }

    if !code_gen.contains(&fault.elr) {
        return Transition::Defer;
    }

    if fault.syndrome.class() == ExceptionClass::DataAbort && fault.far < PAGE_SIZE {
        let access = if fault.syndrome.is_write() { Access::Write } else { Access::Read };
        let zero_register = match access {
            Access::Read if fault.syndrome.instruction_syndrome_valid() => {
                Some(fault.syndrome.transfer_register()).filter(|rt| *rt != ZERO_REGISTER)
            }
            _ => None,
        };
        return Transition::Fixup(FixupOp { zero_register, access, address: fault.far });
    }

    Transition::Crash { pc: fault.elr }
}

pub fn apply(ctx: &mut SystemContext, transition: &Transition) -> ExceptionOutcome {
    match *transition {
        Transition::Redirect { to, stash } => {
            ctx.x16 = stash.target;
            ctx.x17 = stash.image_base;
            ctx.elr = to;
            ExceptionOutcome::Resumed
        }
        Transition::Fixup(op) => {
            if let Some(rt) = op.zero_register {
                ctx.set_gpr(rt, 0);
            }
            warn!(
                "illegal {} address 0x{:x} from x86 code, fixing up",
                op.access.describe(),
                op.address
            );
            ctx.elr = ctx.elr.wrapping_add(Config::INSN_WIDTH);
            ExceptionOutcome::Resumed
        }
        Transition::Crash { .. } | Transition::Defer => ExceptionOutcome::Unhandled,
    }
}
