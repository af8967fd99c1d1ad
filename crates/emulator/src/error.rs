use thiserror::Error;
use types::Status;

/// Image registry failures. All of these are reported back to the loader.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("out of resources registering image at 0x{base:x}")]
    OutOfResources { base: u64 },
    #[error("invalid image range 0x{base:x}+0x{size:x}")]
    InvalidRange { base: u64, size: u64 },
    #[error("image 0x{base:x}+0x{size:x} overlaps the image registered at 0x{existing_base:x}")]
    Overlap { base: u64, size: u64, existing_base: u64 },
    #[error("no image registered at 0x{0:x}")]
    NotFound(u64),
}

/// Reasons a PE image is refused by the emulator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("malformed PE image: {0}")]
    Parse(String),
    #[error("PE image has no optional header")]
    MissingOptionalHeader,
    #[error("unsupported machine type 0x{0:04x}")]
    UnsupportedMachine(u16),
    #[error("unsupported subsystem {0}")]
    UnsupportedSubsystem(u16),
}

impl From<goblin::error::Error> for ImageError {
    fn from(err: goblin::error::Error) -> Self {
        ImageError::Parse(err.to_string())
    }
}

/// Errors surfaced to callers of the emulator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmuError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("{op} failed: {status}")]
    Platform { op: &'static str, status: Status },
    #[error("execution engine: {0}")]
    Engine(String),
    #[error("invalid emulator configuration: {0}")]
    InvalidConfig(&'static str),
}

impl From<&EmuError> for Status {
    fn from(err: &EmuError) -> Status {
        match err {
            EmuError::Registry(RegistryError::OutOfResources { .. }) => Status::OUT_OF_RESOURCES,
            EmuError::Registry(RegistryError::NotFound(_)) => Status::NOT_FOUND,
            EmuError::Registry(_) => Status::INVALID_PARAMETER,
            EmuError::Image(_) => Status::UNSUPPORTED,
            EmuError::Platform { status, .. } => *status,
            EmuError::Engine(_) => Status::DEVICE_ERROR,
            EmuError::InvalidConfig(_) => Status::INVALID_PARAMETER,
        }
    }
}

/// Foreign stack access outside the frame's private buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StackError {
    #[error("foreign stack overflow (rsp=0x{rsp:x}, base=0x{base:x})")]
    Overflow { rsp: u64, base: u64 },
    #[error("foreign stack underflow (rsp=0x{rsp:x}, top=0x{top:x})")]
    Underflow { rsp: u64, top: u64 },
}

/// Conditions the bridge cannot recover from. These are logged and halt
/// execution; they are never returned to a caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fatal {
    #[error("bridge re-entered while the engine is running")]
    Reentrance,
    #[error("nesting overflow: more than {max} active foreign calls")]
    NestingOverflow { max: usize },
    #[error("too many arguments: {count} (max {max})")]
    TooManyArguments { count: usize, max: usize },
    #[error("execution engine initialisation failed: {0}")]
    EngineInit(String),
    #[error(transparent)]
    Stack(#[from] StackError),
    #[error("stack imbalance after foreign call: rsp=0x{actual:x}, expected 0x{expected:x}")]
    StackImbalance { expected: u64, actual: u64 },
    #[error("call into the zero page: target=0x{target:x} caller=0x{caller:x}")]
    ZeroPageCall { target: u64, caller: u64 },
    #[error("misaligned native call target 0x{0:x}")]
    MisalignedNativeTarget(u64),
    #[error("unexpected trap #{code:x} (rip=0x{rip:x})")]
    UnexpectedTrap { code: u32, rip: u64 },
    #[error("entry 0x{0:x} is not inside a registered image")]
    NotForeignCode(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let oom = EmuError::from(RegistryError::OutOfResources { base: 0x1000 });
        assert_eq!(Status::from(&oom), Status::OUT_OF_RESOURCES);
        let missing = EmuError::from(RegistryError::NotFound(0x1000));
        assert_eq!(Status::from(&missing), Status::NOT_FOUND);
        let image = EmuError::from(ImageError::UnsupportedMachine(0xaa64));
        assert_eq!(Status::from(&image), Status::UNSUPPORTED);
        let platform = EmuError::Platform { op: "SetMemoryAttributes", status: Status::ACCESS_DENIED };
        assert_eq!(Status::from(&platform), Status::ACCESS_DENIED);
        let config = EmuError::InvalidConfig("entry trampoline address is not set");
        assert_eq!(Status::from(&config), Status::INVALID_PARAMETER);
    }

    #[test]
    fn fatal_messages_name_the_condition() {
        let msg = Fatal::NestingOverflow { max: 8 }.to_string();
        assert!(msg.starts_with("nesting overflow"));
        let msg = Fatal::from(StackError::Overflow { rsp: 0x10, base: 0x20 }).to_string();
        assert!(msg.contains("overflow"));
    }
}
