//! VGM stream writer
//!
//! Commands are collected in memory; the header, end marker and GD3 tag are
//! assembled when the file is produced.

use super::commands::opcode;
use super::delay;
use super::gd3::{generate_gd3, Gd3Metadata};
use super::header::{offset, VgmHeader, VGM_HEADER_SIZE};
use crate::error::Result;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct VgmWriter {
    header: VgmHeader,
    data: Vec<u8>,
    /// Data position and sample count where the loop starts
    loop_start: Option<(usize, u64)>,
    total_samples: u64,
}

impl VgmWriter {
    /// Writer for a single YM2608 at `clock` Hz
    pub fn new(clock: u32) -> Self {
        Self {
            header: VgmHeader::ym2608(clock),
            data: Vec::new(),
            loop_start: None,
            total_samples: 0,
        }
    }

    /// YM2608 register write; bit 8 of `address` selects the port
    pub fn write_register(&mut self, address: u32, value: u8) {
        let op = if address & 0x100 != 0 {
            opcode::YM2608_PORT1
        } else {
            opcode::YM2608_PORT0
        };
        self.data.extend_from_slice(&[op, (address & 0xFF) as u8, value]);
    }

    /// Wait `samples` at 44.1 kHz
    pub fn write_delay(&mut self, samples: u64) {
        if samples == 0 {
            return;
        }
        self.data.extend(delay::generate_delay(samples));
        self.total_samples += samples;
    }

    /// Mark current position as loop start
    pub fn mark_loop_start(&mut self) {
        self.loop_start = Some((self.data.len(), self.total_samples));
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// Bytes of command data written so far
    pub fn position(&self) -> usize {
        self.data.len()
    }

    /// Complete file image
    pub fn to_bytes(&self, metadata: &Gd3Metadata) -> Vec<u8> {
        let mut header = self.header.clone();
        let mut body = self.data.clone();
        body.push(opcode::END);

        let gd3_pos = VGM_HEADER_SIZE + body.len();
        body.extend(generate_gd3(metadata));
        header.write_u32(offset::GD3_OFFSET, (gd3_pos - offset::GD3_OFFSET) as u32);

        let file_len = VGM_HEADER_SIZE + body.len();
        header.write_u32(offset::EOF_OFFSET, (file_len - offset::EOF_OFFSET) as u32);
        header.write_u32(offset::TOTAL_SAMPLES, self.total_samples as u32);

        if let Some((pos, samples)) = self.loop_start {
            header.write_u32(
                offset::LOOP_OFFSET,
                (VGM_HEADER_SIZE + pos - offset::LOOP_OFFSET) as u32,
            );
            header.write_u32(offset::LOOP_SAMPLES, (self.total_samples - samples) as u32);
        }

        let mut bytes = Vec::with_capacity(file_len);
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend(body);
        bytes
    }

    /// Write the file, gzip-compressed (VGZ) when `compress` is set
    pub fn save(&self, path: &Path, metadata: &Gd3Metadata, compress: bool) -> Result<()> {
        let bytes = self.to_bytes(metadata);
        let file = BufWriter::new(File::create(path)?);
        if compress {
            let mut encoder = GzEncoder::new(file, Compression::best());
            encoder.write_all(&bytes)?;
            encoder.finish()?.flush()?;
        } else {
            let mut file = file;
            file.write_all(&bytes)?;
            file.flush()?;
        }
        Ok(())
    }
}
