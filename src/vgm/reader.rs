//! VGM file reader and parser

use super::commands::{command_size, opcode, VgmCommand};
use super::delay::short_wait_samples;
use super::header::offset;
use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::fs;
use std::io::Read;
use std::path::Path;

/// Parsed VGM header information
#[derive(Debug, Clone, Default)]
pub struct VgmHeader {
    pub version: u32,
    pub eof_offset: u32,
    pub total_samples: u32,
    pub loop_offset: u32,
    pub loop_samples: u32,
    pub rate: u32,
    pub data_offset: u32,
    pub gd3_offset: u32,
    pub ym2608: Option<ChipInfo>,
}

/// Information about a chip in the VGM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipInfo {
    pub clock: u32,
    pub dual: bool,
}

/// Parsed GD3 metadata
#[derive(Debug, Clone, Default)]
pub struct Gd3Info {
    pub title: String,
    pub title_jp: String,
    pub game: String,
    pub game_jp: String,
    pub system: String,
    pub system_jp: String,
    pub composer: String,
    pub composer_jp: String,
    pub date: String,
    pub converter: String,
    pub notes: String,
}

/// Inflate gzip data (VGZ); anything else is returned unchanged
pub fn decompress(data: Vec<u8>) -> Result<Vec<u8>> {
    if data.starts_with(&[0x1F, 0x8B]) {
        let mut decoder = GzDecoder::new(data.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(out)
    } else {
        Ok(data)
    }
}

/// Read a VGM or VGZ file
pub fn read_vgm_file(path: &Path) -> Result<Vec<u8>> {
    decompress(fs::read(path)?)
}

/// VGM file reader
pub struct VgmReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> VgmReader<'a> {
    /// Create a new reader from raw VGM data
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| Error::VgmParse("Unexpected end of data".into()))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        let lo = self.read_u8()? as u16;
        let hi = self.read_u8()? as u16;
        Ok(lo | (hi << 8))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let lo = self.read_u16_le()? as u32;
        let hi = self.read_u16_le()? as u32;
        Ok(lo | (hi << 16))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let bytes = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or_else(|| Error::VgmParse("Unexpected end of data".into()))?
            .to_vec();
        self.pos += len;
        Ok(bytes)
    }

    /// Read a u32 at a specific offset without advancing position
    fn peek_u32_at(&self, offset: usize) -> Result<u32> {
        match self.data.get(offset..offset + 4) {
            Some(b) => Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            None => Err(Error::VgmParse("Offset out of bounds".into())),
        }
    }

    /// Validate VGM magic and parse header
    pub fn parse_header(&mut self) -> Result<VgmHeader> {
        if self.data.len() < 64 {
            return Err(Error::VgmParse("File too small for VGM header".into()));
        }
        if &self.data[0..4] != b"Vgm " {
            return Err(Error::VgmParse("Invalid VGM magic".into()));
        }

        let version = self.peek_u32_at(offset::VERSION)?;
        // Files before 1.50 always start data at 0x40
        let data_offset = match self.peek_u32_at(offset::DATA_OFFSET)? {
            rel if version >= 0x150 && rel != 0 => rel,
            _ => 0x0C,
        };
        let ym2608 = if version >= 0x151 {
            self.peek_u32_at(offset::YM2608_CLOCK)
                .ok()
                .filter(|&c| c != 0)
                .map(|clock| ChipInfo {
                    clock: clock & 0x3FFF_FFFF,
                    dual: clock & 0x4000_0000 != 0,
                })
        } else {
            None
        };

        Ok(VgmHeader {
            version,
            eof_offset: self.peek_u32_at(offset::EOF_OFFSET)?,
            total_samples: self.peek_u32_at(offset::TOTAL_SAMPLES)?,
            loop_offset: self.peek_u32_at(offset::LOOP_OFFSET)?,
            loop_samples: self.peek_u32_at(offset::LOOP_SAMPLES)?,
            rate: self.peek_u32_at(offset::RATE)?,
            data_offset,
            gd3_offset: self.peek_u32_at(offset::GD3_OFFSET)?,
            ym2608,
        })
    }

    /// Parse GD3 metadata
    pub fn parse_gd3(&mut self, header: &VgmHeader) -> Result<Option<Gd3Info>> {
        if header.gd3_offset == 0 {
            return Ok(None);
        }
        let gd3_pos = (header.gd3_offset as usize) + offset::GD3_OFFSET;
        if gd3_pos + 12 > self.data.len() {
            return Ok(None);
        }
        self.seek(gd3_pos);
        if self.read_bytes(4)? != b"Gd3 " {
            return Ok(None);
        }
        let _version = self.read_u32_le()?;
        let _size = self.read_u32_le()?;

        Ok(Some(Gd3Info {
            title: self.read_utf16_string()?,
            title_jp: self.read_utf16_string()?,
            game: self.read_utf16_string()?,
            game_jp: self.read_utf16_string()?,
            system: self.read_utf16_string()?,
            system_jp: self.read_utf16_string()?,
            composer: self.read_utf16_string()?,
            composer_jp: self.read_utf16_string()?,
            date: self.read_utf16_string()?,
            converter: self.read_utf16_string()?,
            notes: self.read_utf16_string()?,
        }))
    }

    /// Read a null-terminated UTF-16LE string
    fn read_utf16_string(&mut self) -> Result<String> {
        let mut units = Vec::new();
        while self.pos + 2 <= self.data.len() {
            let unit = self.read_u16_le()?;
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        Ok(char::decode_utf16(units)
            .filter_map(std::result::Result::ok)
            .collect())
    }

    /// Parse all VGM commands from the data section
    pub fn parse_commands(&mut self, header: &VgmHeader) -> Result<Vec<VgmCommand>> {
        self.seek((header.data_offset as usize) + offset::DATA_OFFSET);

        let mut commands = Vec::new();
        while let Some(cmd) = self.parse_command()? {
            let is_end = cmd == VgmCommand::End;
            commands.push(cmd);
            if is_end {
                break;
            }
        }
        Ok(commands)
    }

    fn parse_command(&mut self) -> Result<Option<VgmCommand>> {
        if self.is_eof() {
            return Ok(None);
        }
        let op = self.read_u8()?;

        let cmd = match op {
            opcode::YM2608_PORT0 | opcode::YM2608_PORT1 => {
                let reg = self.read_u8()?;
                let data = self.read_u8()?;
                VgmCommand::Ym2608Write {
                    port: op - opcode::YM2608_PORT0,
                    reg,
                    data,
                }
            }
            opcode::WAIT_NNNN => VgmCommand::Wait {
                samples: u32::from(self.read_u16_le()?),
            },
            opcode::END => VgmCommand::End,
            opcode::DATA_BLOCK => {
                // 0x67 0x66 tt ss ss ss ss (data)
                let _compat = self.read_u8()?;
                let block_type = self.read_u8()?;
                let size = self.read_u32_le()?;
                let len = (size & 0x7FFF_FFFF) as usize;
                self.pos = (self.pos + len).min(self.data.len());
                VgmCommand::DataBlock { block_type, size }
            }
            _ => match short_wait_samples(op) {
                Some(samples) => VgmCommand::Wait { samples },
                None => VgmCommand::Unknown {
                    opcode: op,
                    bytes: self.read_bytes(command_size(op))?,
                },
            },
        };
        Ok(Some(cmd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vgm::gd3::Gd3Metadata;
    use crate::vgm::VgmWriter;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn sample_file() -> Vec<u8> {
        let mut writer = VgmWriter::new(7_987_200);
        writer.write_register(0x29, 0x80);
        writer.write_delay(735);
        writer.write_register(0x101, 0xC2);
        writer.write_delay(3);
        let metadata = Gd3Metadata {
            title_en: "Test".into(),
            ..Gd3Metadata::default()
        };
        writer.to_bytes(&metadata)
    }

    #[test]
    fn test_parse_written_file() {
        let data = sample_file();
        let mut reader = VgmReader::new(&data);
        let header = reader.parse_header().unwrap();
        assert_eq!(header.version, 0x161);
        assert_eq!(header.total_samples, 738);
        assert_eq!(header.ym2608.map(|c| c.clock), Some(7_987_200));

        let commands = reader.parse_commands(&header).unwrap();
        assert_eq!(
            commands,
            vec![
                VgmCommand::Ym2608Write { port: 0, reg: 0x29, data: 0x80 },
                VgmCommand::Wait { samples: 735 },
                VgmCommand::Ym2608Write { port: 1, reg: 0x01, data: 0xC2 },
                VgmCommand::Wait { samples: 3 },
                VgmCommand::End,
            ]
        );
        let gd3 = reader.parse_gd3(&header).unwrap().unwrap();
        assert_eq!(gd3.title, "Test");
    }

    #[test]
    fn test_gzip_transparent() {
        let data = sample_file();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&data).unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(decompress(compressed).unwrap(), data);
        assert_eq!(decompress(data.clone()).unwrap(), data);
    }

    #[test]
    fn test_bad_magic() {
        let data = vec![0u8; 128];
        assert!(matches!(
            VgmReader::new(&data).parse_header(),
            Err(Error::VgmParse(_))
        ));
    }
}
