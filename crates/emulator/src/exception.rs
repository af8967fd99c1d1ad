//! The synchronous exception hook installed in the firmware's vector table.
//!
//! The hook runs in exception context, possibly while the engine is in the
//! middle of a run on behalf of the bridge. It therefore owns nothing the
//! bridge holds mutably: the registry is shared, the code buffer range is
//! fixed at construction, and crash dumps read a snapshot the bridge
//! publishes before each run.

use core::cell::{Cell, RefCell};
use core::ops::Range;
use std::rc::Rc;

use tracing::error;
use types::SystemContext;

use crate::classifier::{self, ExceptionOutcome, FaultInfo, Transition};
use crate::diag::{self, SharedSnapshot, StateSnapshot};
use crate::platform::Platform;
use crate::registry::ImageRegistry;

/// What the hook has done so far.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HookStats {
    pub redirects: u64,
    pub fixups: u64,
    pub crashes: u64,
    pub deferred: u64,
    /// Crashes that had an active foreign frame to dump.
    pub dumps: u64,
}

#[derive(Debug)]
pub struct ExceptionHook {
    images: Rc<RefCell<ImageRegistry>>,
    code_gen: Range<u64>,
    trampoline: u64,
    platform: Rc<dyn Platform>,
    snapshot: SharedSnapshot,
    stats: Cell<HookStats>,
}

impl ExceptionHook {
    pub fn new(
        images: Rc<RefCell<ImageRegistry>>,
        code_gen: Range<u64>,
        trampoline: u64,
        platform: Rc<dyn Platform>,
        snapshot: SharedSnapshot,
    ) -> Self {
        Self { images, code_gen, trampoline, platform, snapshot, stats: Cell::new(HookStats::default()) }
    }

    /// Classifies the fault in `ctx` and applies the outcome. Faults the
    /// emulator does not claim go to the platform's default handler.
    pub fn handle(&self, ctx: &mut SystemContext) -> ExceptionOutcome {
        let fault = FaultInfo::from(&*ctx);
        let transition = classifier::classify(&fault, &self.images.borrow(), &self.code_gen, self.trampoline);
        self.count(&transition);

        if let Transition::Crash { pc } = transition {
            error!("fault in translated code at 0x{:x} (esr=0x{:x} far=0x{:x})", pc, ctx.esr, ctx.far);
            self.dump_state();
        }

        let outcome = classifier::apply(ctx, &transition);
        if outcome == ExceptionOutcome::Unhandled {
            self.platform.default_exception_handler(ctx);
        }
        outcome
    }

    fn count(&self, transition: &Transition) {
        let mut stats = self.stats.get();
        match transition {
            Transition::Redirect { .. } => stats.redirects += 1,
            Transition::Fixup(_) => stats.fixups += 1,
            Transition::Crash { .. } => stats.crashes += 1,
            Transition::Defer => stats.deferred += 1,
        }
        self.stats.set(stats);
    }

    fn dump_state(&self) {
        let snapshot = self.snapshot.borrow();
        let Some(state) = snapshot.as_ref() else {
            error!("no foreign invocation is active");
            return;
        };
        let mut stats = self.stats.get();
        stats.dumps += 1;
        self.stats.set(stats);
        error!("{}", diag::format_state(state));
    }

    pub fn stats(&self) -> HookStats {
        self.stats.get()
    }

    /// Foreign state as of the start of the current engine run.
    pub fn active_state(&self) -> Option<StateSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn code_gen_buffer(&self) -> Range<u64> {
        self.code_gen.clone()
    }

    pub fn trampoline(&self) -> u64 {
        self.trampoline
    }
}
