//! Memory and I/O bus interface.

/// Memory and I/O bus interface.
///
/// The CPU performs exactly one call per cycle. The bus implementation
/// decodes the address and routes the access to whichever device owns it.
pub trait Bus {
    /// Read a byte from the given address.
    fn read(&mut self, address: u16) -> u8;

    /// Write a byte to the given address.
    fn write(&mut self, address: u16, value: u8);
}

/// Flat 64 KiB RAM bus for CPU tests and tools.
///
/// Records every access so tests can assert on the exact bus trace.
pub struct SimpleBus {
    memory: Box<[u8; 0x10000]>,
    trace: Vec<(u16, u8, bool)>,
    tracing: bool,
}

impl SimpleBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            memory: Box::new([0; 0x10000]),
            trace: Vec::new(),
            tracing: false,
        }
    }

    /// Copy `data` into memory starting at `address`, wrapping at $FFFF.
    pub fn load(&mut self, address: u16, data: &[u8]) {
        for (offset, &byte) in data.iter().enumerate() {
            self.memory[usize::from(address.wrapping_add(offset as u16))] = byte;
        }
    }

    /// Read without recording a bus access.
    #[must_use]
    pub fn peek(&self, address: u16) -> u8 {
        self.memory[usize::from(address)]
    }

    /// Write without recording a bus access.
    pub fn poke(&mut self, address: u16, value: u8) {
        self.memory[usize::from(address)] = value;
    }

    /// Start recording `(address, value, is_write)` for every access.
    pub fn enable_trace(&mut self) {
        self.tracing = true;
        self.trace.clear();
    }

    /// Accesses recorded since [`enable_trace`](Self::enable_trace).
    #[must_use]
    pub fn trace(&self) -> &[(u16, u8, bool)] {
        &self.trace
    }
}

impl Default for SimpleBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for SimpleBus {
    fn read(&mut self, address: u16) -> u8 {
        let value = self.memory[usize::from(address)];
        if self.tracing {
            self.trace.push((address, value, false));
        }
        value
    }

    fn write(&mut self, address: u16, value: u8) {
        if self.tracing {
            self.trace.push((address, value, true));
        }
        self.memory[usize::from(address)] = value;
    }
}
