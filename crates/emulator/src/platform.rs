use core::cell::{Cell, RefCell};
use core::fmt::Debug;

use tracing::error;
use types::mmu::MemoryAttributes;
use types::{Status, SystemContext};

use crate::global::Config;

/// Task priority level.
pub type Tpl = usize;

/// Firmware services the emulator depends on.
///
/// Methods take `&self`: the platform is shared between the bridge and the
/// image protocol, and everything runs on one thread.
pub trait Platform: Debug {
    /// Raises the task priority and returns the previous level.
    fn raise_tpl(&self, new: Tpl) -> Tpl;

    fn restore_tpl(&self, old: Tpl);

    /// Waits for the next event. Used when foreign code executes `hlt`.
    fn cpu_sleep(&self);

    fn set_memory_attributes(&self, base: u64, len: u64, attrs: MemoryAttributes) -> Result<(), Status>;

    /// Handling for exceptions the emulator does not claim. On real firmware
    /// this dumps the context and does not return.
    fn default_exception_handler(&self, ctx: &mut SystemContext) {
        error!(
            "unhandled synchronous exception: esr=0x{:x} elr=0x{:x} far=0x{:x}",
            ctx.esr, ctx.elr, ctx.far
        );
    }
}

/// In-process platform for hosted builds and tests.
///
/// Keeps the current TPL in a cell, records every attribute change and
/// every exception that fell through to the default handler.
#[derive(Debug)]
pub struct HostedPlatform {
    tpl: Cell<Tpl>,
    max_tpl: Cell<Tpl>,
    sleeps: Cell<usize>,
    attributes: RefCell<Vec<(u64, u64, MemoryAttributes)>>,
    unhandled: RefCell<Vec<SystemContext>>,
    fail_attributes: Cell<Option<Status>>,
}

impl Default for HostedPlatform {
    fn default() -> Self {
        Self {
            tpl: Cell::new(Config::TPL_APPLICATION),
            max_tpl: Cell::new(Config::TPL_APPLICATION),
            sleeps: Cell::new(0),
            attributes: RefCell::new(Vec::new()),
            unhandled: RefCell::new(Vec::new()),
            fail_attributes: Cell::new(None),
        }
    }
}

impl HostedPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_tpl(&self) -> Tpl {
        self.tpl.get()
    }

    /// Highest TPL ever raised to.
    pub fn max_tpl(&self) -> Tpl {
        self.max_tpl.get()
    }

    pub fn sleeps(&self) -> usize {
        self.sleeps.get()
    }

    /// Every `set_memory_attributes` call that succeeded, in order.
    pub fn attribute_log(&self) -> Vec<(u64, u64, MemoryAttributes)> {
        self.attributes.borrow().clone()
    }

    /// Current attributes of the range starting at `base`, if ever set.
    pub fn attributes_of(&self, base: u64) -> Option<MemoryAttributes> {
        self.attributes
            .borrow()
            .iter()
            .rev()
            .find(|(b, _, _)| *b == base)
            .map(|(_, _, attrs)| *attrs)
    }

    pub fn unhandled_exceptions(&self) -> Vec<SystemContext> {
        self.unhandled.borrow().clone()
    }

    /// Makes subsequent attribute updates fail with `status`.
    pub fn fail_attribute_updates(&self, status: Option<Status>) {
        self.fail_attributes.set(status);
    }
}

impl Platform for HostedPlatform {
    fn raise_tpl(&self, new: Tpl) -> Tpl {
        let old = self.tpl.get();
        assert!(new >= old, "raise_tpl to a lower level ({} < {})", new, old);
        self.tpl.set(new);
        if new > self.max_tpl.get() {
            self.max_tpl.set(new);
        }
        old
    }

    fn restore_tpl(&self, old: Tpl) {
        self.tpl.set(old);
    }

    fn cpu_sleep(&self) {
        self.sleeps.set(self.sleeps.get() + 1);
        std::thread::yield_now();
    }

    fn set_memory_attributes(&self, base: u64, len: u64, attrs: MemoryAttributes) -> Result<(), Status> {
        if let Some(status) = self.fail_attributes.get() {
            return Err(status);
        }
        self.attributes.borrow_mut().push((base, len, attrs));
        Ok(())
    }

    fn default_exception_handler(&self, ctx: &mut SystemContext) {
        self.unhandled.borrow_mut().push(ctx.clone());
    }
}
