/// Access width of a port I/O operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IoWidth {
    U8,
    U16,
    U32,
}

impl IoWidth {
    pub const fn mask(self) -> u32 {
        match self {
            IoWidth::U8 => 0xff,
            IoWidth::U16 => 0xffff,
            IoWidth::U32 => 0xffff_ffff,
        }
    }
}

/// Port-mapped I/O as provided by the platform's CPU I/O protocol.
pub trait CpuIo {
    fn io_read(&self, width: IoWidth, port: u64) -> Option<u32>;
    fn io_write(&self, width: IoWidth, port: u64, value: u32) -> bool;
}

/// `in`/`out` helpers the execution engine calls when foreign code touches
/// I/O ports. A failed read yields all ones, like a floating bus.
pub struct PortIo<'a> {
    io: &'a dyn CpuIo,
}

impl<'a> PortIo<'a> {
    pub fn new(io: &'a dyn CpuIo) -> Self {
        Self { io }
    }

    fn read(&self, width: IoWidth, port: u64) -> u32 {
        self.io.io_read(width, port).unwrap_or(u32::MAX) & width.mask()
    }

    fn write(&self, width: IoWidth, port: u64, value: u32) {
        if !self.io.io_write(width, port, value & width.mask()) {
            tracing::trace!("port write 0x{:x} dropped", port);
        }
    }

    pub fn inb(&self, port: u64) -> u8 {
        self.read(IoWidth::U8, port) as u8
    }

    pub fn inw(&self, port: u64) -> u16 {
        self.read(IoWidth::U16, port) as u16
    }

    pub fn inl(&self, port: u64) -> u32 {
        self.read(IoWidth::U32, port)
    }

    pub fn outb(&self, port: u64, value: u8) {
        self.write(IoWidth::U8, port, value as u32);
    }

    pub fn outw(&self, port: u64, value: u16) {
        self.write(IoWidth::U16, port, value as u32);
    }

    pub fn outl(&self, port: u64, value: u32) {
        self.write(IoWidth::U32, port, value);
    }
}
