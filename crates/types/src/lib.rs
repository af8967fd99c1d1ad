#![no_std]

//! Plain data shared by the emulator: the AArch64 exception context and its
//! syndrome, the x86-64 register file driven by the execution engine, image
//! records, memory attributes and firmware status codes.

pub mod context;
pub use context::SystemContext;

pub mod syndrome;
pub use syndrome::{ExceptionClass, Syndrome};

pub mod x86;
pub use x86::{Register, X86Cpu};

pub mod image;
pub use image::ImageRecord;

pub mod mmu;

pub mod status;
pub use status::Status;
