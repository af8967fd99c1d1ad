use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::warn;
use types::Status;

use crate::bridge::Bridge;
use crate::global::Config;

pub type NativeArgs = [u64; Config::MAX_ARGS];

/// Receives calls that foreign code makes into native code.
///
/// `bridge` is handed back so the callee can re-enter foreign code; nested
/// invocations run on the next frame of the pool.
pub trait NativeHost {
    fn call_native(&mut self, bridge: &mut Bridge, target: u64, args: &NativeArgs) -> u64;
}

pub type NativeFn = Rc<dyn Fn(&mut Bridge, &mut dyn NativeHost, &NativeArgs) -> u64>;

/// Native functions looked up by address.
///
/// Used by hosted builds, where foreign code can only reach native code that
/// was explicitly exported to it. Unknown targets answer `UNSUPPORTED`.
#[derive(Default)]
pub struct NativeTable {
    entries: HashMap<u64, NativeFn>,
}

impl fmt::Debug for NativeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeTable")
            .field("registered", &self.entries.len())
            .finish()
    }
}

impl NativeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, addr: u64, f: F)
    where
        F: Fn(&mut Bridge, &mut dyn NativeHost, &NativeArgs) -> u64 + 'static,
    {
        self.entries.insert(addr, Rc::new(f));
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.entries.contains_key(&addr)
    }
}

impl NativeHost for NativeTable {
    fn call_native(&mut self, bridge: &mut Bridge, target: u64, args: &NativeArgs) -> u64 {
        let Some(f) = self.entries.get(&target).cloned() else {
            warn!("foreign code called unknown native function 0x{:x}", target);
            return Status::UNSUPPORTED.0;
        };
        f(bridge, self, args)
    }
}

type RawNativeFn = extern "C" fn(
    u64, u64, u64, u64, u64, u64, u64, u64,
    u64, u64, u64, u64, u64, u64, u64, u64,
) -> u64;

/// Calls native targets directly through their address.
///
/// Every argument slot is passed; callees taking fewer simply ignore the
/// rest. A callee that jumps into a registered image faults into
/// `ExceptionHook::handle`, which holds no borrow of the bridge. The
/// trampoline it is redirected to must land on the same `Bridge` that is
/// making this call, which then runs it on the next nesting level.
#[derive(Debug)]
pub struct RawNativeHost {
    _private: (),
}

impl RawNativeHost {
    /// # Safety
    /// Every address foreign code can call out to must be a native function
    /// following the platform C calling convention with at most sixteen
    /// integer arguments and an integer return value.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl NativeHost for RawNativeHost {
    fn call_native(&mut self, _bridge: &mut Bridge, target: u64, args: &NativeArgs) -> u64 {
        // SAFETY: the caller of `RawNativeHost::new` vouched for every target;
        // the bridge has already rejected null-page and misaligned addresses.
        let f: RawNativeFn = unsafe { core::mem::transmute::<usize, RawNativeFn>(target as usize) };
        f(
            args[0], args[1], args[2], args[3], args[4], args[5], args[6], args[7],
            args[8], args[9], args[10], args[11], args[12], args[13], args[14], args[15],
        )
    }
}
