#![allow(dead_code)]

pub mod engine;

use std::cell::RefCell;
use std::rc::Rc;

use emulator::{Emulator, EmulatorConfig, NativeTable, Platform};
use emulator::platform::HostedPlatform;
use engine::{Op, Program, ScriptedEngine, SharedProgram};

pub const IMAGE_BASE: u64 = 0x4000_0000;
pub const IMAGE_SIZE: u64 = 0x10_0000;
pub const CODE_GEN_ALLOC: u64 = 0x6000_0000;
pub const TRAMPOLINE: u64 = 0x7f00_0000;

/// Native functions foreign code can call.
pub const NATIVE_G: u64 = 0x7000_1000;
pub const NATIVE_RECURSE: u64 = 0x7000_2000;
pub const NATIVE_UNKNOWN: u64 = 0x7000_3000;

/// Address of the `index`th scripted routine inside the test image.
pub fn routine_addr(index: u64) -> u64 {
    IMAGE_BASE + index * 0x100
}

pub fn test_config() -> EmulatorConfig {
    EmulatorConfig::default()
        .with_trampoline(TRAMPOLINE)
        .with_paranoid(false)
}

/// An emulator with one registered image and a scripted engine.
pub struct Harness {
    pub emulator: Emulator,
    pub platform: Rc<HostedPlatform>,
    pub program: SharedProgram,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: EmulatorConfig) -> Self {
        let program: SharedProgram = Rc::new(RefCell::new(Program::default()));
        let platform = Rc::new(HostedPlatform::new());
        let shared: Rc<dyn Platform> = platform.clone();

        let engine = ScriptedEngine::new(program.clone(), CODE_GEN_ALLOC);
        let emulator = Emulator::new(Box::new(engine), shared, config).expect("valid test config");
        emulator
            .register_image(IMAGE_BASE, IMAGE_SIZE)
            .expect("register test image");
        program.borrow_mut().hook = Some(emulator.exception_hook());

        Self { emulator, platform, program }
    }

    /// Installs `ops` as routine `index` and returns its entry address.
    pub fn routine(&self, index: u64, ops: Vec<Op>) -> u64 {
        let entry = routine_addr(index);
        self.program.borrow_mut().add(entry, ops);
        entry
    }

    pub fn invoke(&mut self, entry: u64, args: &[u64], host: &mut NativeTable) -> u64 {
        self.emulator.bridge_mut().invoke(entry, args, host)
    }

    pub fn captures(&self) -> Vec<engine::Captured> {
        self.program.borrow().captures.clone()
    }

    pub fn faults(&self) -> Vec<engine::HostFault> {
        self.program.borrow().faults.clone()
    }

    /// Address inside the code buffer, as seen by the exception hook.
    pub fn translated_pc(&self, offset: u64) -> u64 {
        self.emulator.exception_hook().code_gen_buffer().start + offset
    }

    /// The first `levels` frames are back at their stack tops.
    pub fn assert_frames_balanced(&self, levels: usize) {
        let bridge = self.emulator.bridge();
        for level in 0..levels {
            let frame = bridge.frame(level).expect("frame pool initialised");
            assert_eq!(
                frame.cpu.rsp(),
                frame.stack.top(),
                "frame {} left unbalanced",
                level
            );
        }
    }
}
