use goblin::pe::PE;

use crate::error::ImageError;

pub const MACHINE_X64: u16 = 0x8664;
pub const SUBSYSTEM_EFI_APPLICATION: u16 = 10;
pub const SUBSYSTEM_EFI_BOOT_SERVICE_DRIVER: u16 = 11;

/// Runtime drivers have to survive ExitBootServices, which the emulator
/// does not, so only these two subsystems are accepted.
pub fn is_supported_subsystem(subsystem: u16) -> bool {
    matches!(subsystem, SUBSYSTEM_EFI_APPLICATION | SUBSYSTEM_EFI_BOOT_SERVICE_DRIVER)
}

/// Header fields needed to register and start an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeImageInfo {
    pub machine: u16,
    pub subsystem: u16,
    /// Entry point RVA.
    pub entry: u64,
    pub size_of_image: u64,
}

pub fn check_header(machine: u16, subsystem: u16) -> Result<(), ImageError> {
    if machine != MACHINE_X64 {
        return Err(ImageError::UnsupportedMachine(machine));
    }
    if !is_supported_subsystem(subsystem) {
        return Err(ImageError::UnsupportedSubsystem(subsystem));
    }
    Ok(())
}

/// Parses the PE headers in `bytes` and checks the image can be emulated.
pub fn inspect(bytes: &[u8]) -> Result<PeImageInfo, ImageError> {
    let pe = PE::parse(bytes)?;
    let optional = pe
        .header
        .optional_header
        .ok_or(ImageError::MissingOptionalHeader)?;

    let info = PeImageInfo {
        machine: pe.header.coff_header.machine,
        subsystem: optional.windows_fields.subsystem,
        entry: pe.entry as u64,
        size_of_image: optional.windows_fields.size_of_image as u64,
    };
    check_header(info.machine, info.subsystem)?;
    Ok(info)
}

pub fn subsystem_name(subsystem: u16) -> &'static str {
    match subsystem {
        SUBSYSTEM_EFI_APPLICATION => "EFI application",
        SUBSYSTEM_EFI_BOOT_SERVICE_DRIVER => "EFI boot service driver",
        12 => "EFI runtime driver",
        13 => "EFI ROM",
        2 => "Windows GUI",
        3 => "Windows console",
        _ => "unknown",
    }
}
