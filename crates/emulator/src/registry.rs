use tracing::debug;
use types::ImageRecord;

use crate::error::RegistryError;

/// Address ranges known to contain foreign code.
///
/// Registrations are few and long-lived, so lookups are a linear scan.
/// Overlapping ranges are refused at registration time, which keeps `find`
/// unambiguous.
#[derive(Debug, Default)]
pub struct ImageRegistry {
    records: Vec<ImageRecord>,
}

impl ImageRegistry {
    pub fn new() -> Self {
        Self { records: Vec::new() }
    }

    pub fn register(&mut self, base: u64, size: u64) -> Result<ImageRecord, RegistryError> {
        if size == 0 || base.checked_add(size).is_none() {
            return Err(RegistryError::InvalidRange { base, size });
        }

        let record = ImageRecord::new(base, size);
        if let Some(existing) = self.records.iter().find(|r| r.overlaps(&record)) {
            return Err(RegistryError::Overlap { base, size, existing_base: existing.base });
        }

        self.records
            .try_reserve(1)
            .map_err(|_| RegistryError::OutOfResources { base })?;
        self.records.push(record);

        debug!("registered foreign image 0x{:x}+0x{:x}", base, size);
        Ok(record)
    }

    /// Removes the record registered with exactly this base address.
    pub fn unregister(&mut self, base: u64) -> Result<ImageRecord, RegistryError> {
        let index = self
            .records
            .iter()
            .position(|r| r.base == base)
            .ok_or(RegistryError::NotFound(base))?;
        let record = self.records.swap_remove(index);

        debug!("unregistered foreign image 0x{:x}", base);
        Ok(record)
    }

    /// The record whose `[base, base + size)` contains `addr`.
    pub fn find(&self, addr: u64) -> Option<&ImageRecord> {
        self.records.iter().find(|r| r.contains(addr))
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.find(addr).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
