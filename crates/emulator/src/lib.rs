// external
pub extern crate hex;

// exports
pub mod global;
pub mod error;
pub mod registry;
pub mod classifier;
pub mod exception;
pub mod engine;
pub mod frame;
pub mod bridge;
pub mod host;
pub mod platform;
pub mod port_io;
pub mod diag;
pub mod pe;
pub mod emulator;

pub use bridge::{Bridge, BridgeStats, NestingState};
pub use classifier::{ExceptionOutcome, Transition};
pub use diag::{SharedSnapshot, StateSnapshot};
pub use emulator::Emulator;
pub use engine::{ExecutionEngine, RunContext, TrapSignal};
pub use error::{EmuError, Fatal, ImageError, RegistryError};
pub use exception::{ExceptionHook, HookStats};
pub use frame::ExecutionFrame;
pub use global::{Config, EmulatorConfig};
pub use host::{NativeArgs, NativeHost, NativeTable, RawNativeHost};
pub use platform::{HostedPlatform, Platform};
pub use registry::ImageRegistry;
