//! Shadow register file
//!
//! Writes land in a shadow copy first and are queued for the backend only
//! when they change a value, except for strobe registers whose write itself
//! is the event.

use crate::chip::{ChipBackend, RegisterWrite};

/// Port 0 and port 1
const REGISTER_SPACE: usize = 0x200;

/// One buffered direct register write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterUnit {
    pub address: u32,
    pub value: u8,
    pub has_completed: bool,
}

impl RegisterUnit {
    pub fn new(address: u32) -> Self {
        Self {
            address,
            value: 0,
            has_completed: false,
        }
    }

    pub fn set_value(&mut self, value: u8) {
        self.value = value;
        self.has_completed = true;
    }
}

fn is_strobe(address: u32) -> bool {
    let reg = address & 0xFF;
    match address & 0x100 {
        0 => matches!(reg, 0x0D | 0x10 | 0x28) || (0xA0..=0xAE).contains(&reg),
        _ => matches!(reg, 0x00 | 0x08) || (0xA0..=0xAE).contains(&reg),
    }
}

#[derive(Debug)]
pub struct RegisterCache {
    shadow: Vec<i16>,
    pending: Vec<RegisterWrite>,
}

impl RegisterCache {
    pub fn new() -> Self {
        Self {
            shadow: vec![-1; REGISTER_SPACE],
            pending: Vec::new(),
        }
    }

    pub fn write(&mut self, address: u32, value: u8) {
        let index = address as usize & (REGISTER_SPACE - 1);
        if self.shadow[index] != value as i16 || is_strobe(address) {
            self.shadow[index] = value as i16;
            self.pending.push(RegisterWrite {
                address: index as u32,
                value,
            });
        }
    }

    /// Last value written, `None` if never written since reset
    pub fn value(&self, address: u32) -> Option<u8> {
        let v = self.shadow[address as usize & (REGISTER_SPACE - 1)];
        (v >= 0).then_some(v as u8)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn flush(&mut self, backend: &mut dyn ChipBackend) {
        for w in self.pending.drain(..) {
            backend.set_register(w.address, w.value);
        }
    }

    /// Forget every cached value and drop queued writes
    pub fn invalidate(&mut self) {
        self.shadow.fill(-1);
        self.pending.clear();
    }
}

impl Default for RegisterCache {
    fn default() -> Self {
        Self::new()
    }
}
