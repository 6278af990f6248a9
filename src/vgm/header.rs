//! VGM header layout and writing

/// VGM file version
pub const VGM_VERSION: u32 = 0x161;

/// Header size in 32-bit words
pub const VGM_MAX_HEADER: usize = 32;

/// Header size in bytes; 0x80 covers every field up to the loop modifier
pub const VGM_HEADER_SIZE: usize = VGM_MAX_HEADER * 4;

/// Sample rate every VGM wait is expressed in
pub const VGM_SAMPLE_RATE: u32 = 44100;

/// VGM header offsets (in bytes)
pub mod offset {
    /// "Vgm " identifier
    pub const IDENT: usize = 0x00;
    /// End of file offset (relative to 0x04)
    pub const EOF_OFFSET: usize = 0x04;
    pub const VERSION: usize = 0x08;
    /// GD3 offset (relative to 0x14)
    pub const GD3_OFFSET: usize = 0x14;
    pub const TOTAL_SAMPLES: usize = 0x18;
    /// Loop offset (relative to 0x1C)
    pub const LOOP_OFFSET: usize = 0x1C;
    pub const LOOP_SAMPLES: usize = 0x20;
    /// Recording rate
    pub const RATE: usize = 0x24;
    /// VGM data offset (relative to 0x34)
    pub const DATA_OFFSET: usize = 0x34;
    pub const YM2608_CLOCK: usize = 0x48;
    /// SSG flags of the YM2608
    pub const YM2608_FLAGS: usize = 0x7B;
    pub const VOLUME_MODIFIER: usize = 0x7C;
    pub const LOOP_BASE: usize = 0x7E;
    pub const LOOP_MODIFIER: usize = 0x7F;
}

/// VGM header structure
#[derive(Debug, Clone)]
pub struct VgmHeader {
    data: [u8; VGM_HEADER_SIZE],
}

impl VgmHeader {
    pub fn new() -> Self {
        let mut header = Self {
            data: [0; VGM_HEADER_SIZE],
        };
        header.data[offset::IDENT..offset::IDENT + 4].copy_from_slice(b"Vgm ");
        header.write_u32(offset::VERSION, VGM_VERSION);
        // Data follows the header directly
        header.write_u32(offset::DATA_OFFSET, (VGM_HEADER_SIZE - offset::DATA_OFFSET) as u32);
        header
    }

    /// Header for a single YM2608 running at `clock`
    pub fn ym2608(clock: u32) -> Self {
        let mut header = Self::new();
        header.write_u32(offset::YM2608_CLOCK, clock);
        header
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) {
        if offset < VGM_HEADER_SIZE {
            self.data[offset] = value;
        }
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) {
        if offset + 3 < VGM_HEADER_SIZE {
            self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        if offset + 3 < VGM_HEADER_SIZE {
            u32::from_le_bytes([
                self.data[offset],
                self.data[offset + 1],
                self.data[offset + 2],
                self.data[offset + 3],
            ])
        } else {
            0
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Default for VgmHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ym2608_header_fields() {
        let header = VgmHeader::ym2608(7_987_200);
        let bytes = header.as_bytes();
        assert_eq!(&bytes[0..4], b"Vgm ");
        assert_eq!(header.read_u32(offset::VERSION), 0x161);
        assert_eq!(header.read_u32(offset::YM2608_CLOCK), 7_987_200);
        assert_eq!(header.read_u32(offset::DATA_OFFSET) as usize + 0x34, VGM_HEADER_SIZE);
    }

    #[test]
    fn test_out_of_range_write_ignored() {
        let mut header = VgmHeader::new();
        header.write_u32(VGM_HEADER_SIZE - 2, 0xFFFF_FFFF);
        assert_eq!(header.read_u32(VGM_HEADER_SIZE - 2), 0);
    }
}
