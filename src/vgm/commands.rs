//! VGM command definitions

/// VGM command opcodes
pub mod opcode {
    pub const YM2608_PORT0: u8 = 0x56;
    pub const YM2608_PORT1: u8 = 0x57;
    pub const WAIT_NNNN: u8 = 0x61;
    pub const WAIT_60TH: u8 = 0x62;
    pub const WAIT_50TH: u8 = 0x63;
    pub const END: u8 = 0x66;
    pub const DATA_BLOCK: u8 = 0x67;
}

/// A parsed VGM command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VgmCommand {
    /// YM2608 (OPNA) write
    Ym2608Write { port: u8, reg: u8, data: u8 },
    /// Wait N samples
    Wait { samples: u32 },
    /// End of sound data
    End,
    /// Data block, content skipped
    DataBlock { block_type: u8, size: u32 },
    /// Any other command, operands kept raw
    Unknown { opcode: u8, bytes: Vec<u8> },
}

impl VgmCommand {
    pub fn is_wait(&self) -> bool {
        matches!(self, VgmCommand::Wait { .. })
    }

    pub fn wait_samples(&self) -> Option<u32> {
        match self {
            VgmCommand::Wait { samples } => Some(*samples),
            _ => None,
        }
    }

    /// Register address as used by the controller (port in bit 8)
    pub fn ym2608_address(&self) -> Option<(u32, u8)> {
        match self {
            VgmCommand::Ym2608Write { port, reg, data } => {
                Some(((u32::from(*port) << 8) | u32::from(*reg), *data))
            }
            _ => None,
        }
    }
}

/// Get the number of bytes to read after the opcode for a command
pub fn command_size(opcode: u8) -> usize {
    match opcode {
        0x62 | 0x63 | 0x66 => 0,
        0x4F | 0x50 => 1,
        0x51..=0x5F | 0x61 | 0xA0 | 0xB0..=0xBF => 2,
        0xC0..=0xC8 => 3,
        0xD0..=0xD6 | 0xE0 | 0xE1 => 4,
        // Short waits and YM2612 DAC writes
        0x70..=0x8F => 0,
        0x68 => 11,
        0x90 | 0x91 | 0x95 => 4,
        0x92 => 5,
        0x93 => 10,
        0x94 => 1,
        _ => 0,
    }
}
