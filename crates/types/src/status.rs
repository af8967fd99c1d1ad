use core::fmt;

const ERROR_BIT: u64 = 1 << 63;

/// Firmware status code as returned across the native/foreign boundary.
///
/// Error codes carry the high bit, so a foreign caller testing the sign of
/// `rax` sees every error as negative.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Status(pub u64);

impl Status {
    pub const SUCCESS: Status = Status(0);
    pub const INVALID_PARAMETER: Status = Status(ERROR_BIT | 2);
    pub const UNSUPPORTED: Status = Status(ERROR_BIT | 3);
    pub const DEVICE_ERROR: Status = Status(ERROR_BIT | 7);
    pub const OUT_OF_RESOURCES: Status = Status(ERROR_BIT | 9);
    pub const NOT_FOUND: Status = Status(ERROR_BIT | 14);
    pub const ACCESS_DENIED: Status = Status(ERROR_BIT | 15);

    pub const fn is_error(self) -> bool {
        self.0 & ERROR_BIT != 0
    }

    pub const fn code(self) -> u64 {
        self.0 & !ERROR_BIT
    }
}

impl From<Status> for u64 {
    fn from(status: Status) -> u64 {
        status.0
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Status::SUCCESS => "Success",
            Status::INVALID_PARAMETER => "Invalid Parameter",
            Status::UNSUPPORTED => "Unsupported",
            Status::DEVICE_ERROR => "Device Error",
            Status::OUT_OF_RESOURCES => "Out of Resources",
            Status::NOT_FOUND => "Not Found",
            Status::ACCESS_DENIED => "Access Denied",
            _ => return write!(f, "Status(0x{:x})", self.0),
        };
        f.write_str(name)
    }
}
