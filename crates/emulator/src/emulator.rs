use std::cell::{Ref, RefCell};
use std::rc::Rc;

use tracing::{debug, error};
use types::mmu::MemoryAttributes;
use types::{ImageRecord, SystemContext};

use crate::bridge::Bridge;
use crate::classifier::ExceptionOutcome;
use crate::diag::SharedSnapshot;
use crate::engine::ExecutionEngine;
use crate::error::{EmuError, Fatal, RegistryError};
use crate::exception::ExceptionHook;
use crate::global::EmulatorConfig;
use crate::host::NativeHost;
use crate::pe::{self, PeImageInfo};
use crate::platform::Platform;
use crate::registry::ImageRegistry;

/// The image-emulator protocol: decides which images run under emulation,
/// protects them so native jumps fault, and turns those faults into
/// foreign invocations.
#[derive(Debug)]
pub struct Emulator {
    images: Rc<RefCell<ImageRegistry>>,
    bridge: Bridge,
    platform: Rc<dyn Platform>,
    hook: Rc<ExceptionHook>,
}

impl Emulator {
    pub fn new(
        engine: Box<dyn ExecutionEngine>,
        platform: Rc<dyn Platform>,
        config: EmulatorConfig,
    ) -> Result<Self, EmuError> {
        config.validate()?;

        let images = Rc::new(RefCell::new(ImageRegistry::new()));
        let snapshot = SharedSnapshot::default();
        let hook = Rc::new(ExceptionHook::new(
            images.clone(),
            engine.code_gen_buffer(),
            config.trampoline,
            platform.clone(),
            snapshot.clone(),
        ));
        let bridge = Bridge::new(engine, platform.clone(), images.clone(), snapshot, &config);
        Ok(Self { images, bridge, platform, hook })
    }

    pub fn is_image_supported(&self, image_type: u16) -> bool {
        pe::is_supported_subsystem(image_type)
    }

    /// Records `[base, base + size)` as foreign code and makes it
    /// non-executable for native code.
    pub fn register_image(&self, base: u64, size: u64) -> Result<ImageRecord, EmuError> {
        let record = self.images.borrow_mut().register(base, size)?;

        if let Err(status) = self
            .platform
            .set_memory_attributes(base, size, MemoryAttributes::EXECUTE_PROTECT)
        {
            error!("failed to protect image 0x{:x}+0x{:x}: {}", base, size, status);
            let _ = self.images.borrow_mut().unregister(base);
            return Err(EmuError::Platform { op: "SetMemoryAttributes", status });
        }
        Ok(record)
    }

    /// Validates the PE header of an image loaded at `base` and registers
    /// its full virtual size.
    pub fn register_pe_image(&self, base: u64, bytes: &[u8]) -> Result<PeImageInfo, EmuError> {
        let info = pe::inspect(bytes)?;
        self.register_image(base, info.size_of_image)?;
        debug!(
            "PE image at 0x{:x}: {} entry 0x{:x}",
            base,
            pe::subsystem_name(info.subsystem),
            base.wrapping_add(info.entry)
        );
        Ok(info)
    }

    /// Lifts the protection and forgets the image. If the attributes cannot
    /// be cleared the image stays registered and protected.
    pub fn unregister_image(&self, base: u64) -> Result<(), EmuError> {
        let size = self
            .images
            .borrow()
            .iter()
            .find(|r| r.base == base)
            .map(|r| r.size)
            .ok_or(RegistryError::NotFound(base))?;

        if let Err(status) = self
            .platform
            .set_memory_attributes(base, size, MemoryAttributes::NONE)
        {
            return Err(EmuError::Platform { op: "SetMemoryAttributes", status });
        }
        self.images.borrow_mut().unregister(base)?;
        Ok(())
    }

    /// Synchronous exception hook. Safe to call while a foreign invocation
    /// is running; see `exception_hook` for installing it on its own.
    pub fn handle_sync_exception(&self, ctx: &mut SystemContext) -> ExceptionOutcome {
        self.hook.handle(ctx)
    }

    /// The hook alone, for registration with the CPU exception vectors.
    pub fn exception_hook(&self) -> Rc<ExceptionHook> {
        self.hook.clone()
    }

    /// Trampoline landing: native code branched to `pc` inside a foreign
    /// image with `args` in its argument registers.
    pub fn vm_entry(&mut self, pc: u64, args: &[u64], host: &mut dyn NativeHost) -> u64 {
        if !self.images.borrow().contains(pc) {
            let reason = Fatal::NotForeignCode(pc);
            error!("fatal emulator error: {}", reason);
            panic!("{}", reason);
        }
        self.bridge.invoke(pc, args, host)
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut Bridge {
        &mut self.bridge
    }

    pub fn images(&self) -> Ref<'_, ImageRegistry> {
        self.images.borrow()
    }

    pub fn trampoline(&self) -> u64 {
        self.hook.trampoline()
    }
}
