//! S98 v3 register log export
//!
//! S98 is the PC-88/PC-98 counterpart of VGM: a fixed header, one device
//! entry per chip, a dump of register writes and sync waits, and an
//! optional `[S98]` tag of `key=value` lines. The writer uses one sync per
//! 44.1 kHz sample so waits carry over from the recorder unchanged.

use crate::error::{Error, Result};
use crate::vgm::recorder::{Recorder, StreamWriter};
use crate::vgm::Gd3Metadata;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

pub const S98_MAGIC: &[u8; 4] = b"S983";

/// Sync period is `TIMER_NUMERATOR / TIMER_DENOMINATOR` seconds
pub const TIMER_NUMERATOR: u32 = 1;
pub const TIMER_DENOMINATOR: u32 = 44100;

/// Device type code for the YM2608
pub const DEVICE_YM2608: u32 = 4;

const HEADER_SIZE: usize = 0x20;
const DEVICE_INFO_SIZE: usize = 0x10;

const TAG_MAGIC: &[u8; 5] = b"[S98]";
const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Header field offsets
pub mod offset {
    pub const TIMER_NUMERATOR: usize = 0x04;
    pub const TIMER_DENOMINATOR: usize = 0x08;
    pub const COMPRESSION: usize = 0x0C;
    pub const TAG_OFFSET: usize = 0x10;
    pub const DUMP_OFFSET: usize = 0x14;
    pub const LOOP_OFFSET: usize = 0x18;
    pub const DEVICE_COUNT: usize = 0x1C;
    pub const DEVICE_INFO: usize = 0x20;
}

/// Dump command bytes
pub mod opcode {
    /// Device 0 normal (port 0) write
    pub const PORT0: u8 = 0x00;
    /// Device 0 extended (port 1) write
    pub const PORT1: u8 = 0x01;
    /// Jump to the loop point, or stop when there is none
    pub const END: u8 = 0xFD;
    /// Wait n+2 syncs, n as a 7-bit little-endian varint
    pub const WAIT_N: u8 = 0xFE;
    /// Wait one sync
    pub const WAIT_1: u8 = 0xFF;
}

/// Shared access to the writer owned by an [`S98Recorder`]
pub type S98WriterHandle = Arc<Mutex<S98Writer>>;

pub type S98Recorder = Recorder<S98Writer>;

impl S98Recorder {
    pub fn new(clock: u32, rate: u32) -> Self {
        Self::with_writer(S98Writer::new(clock), rate)
    }
}

/// Wait command for `syncs` syncs
pub fn generate_wait(syncs: u64) -> Vec<u8> {
    match syncs {
        0 => Vec::new(),
        1 => vec![opcode::WAIT_1],
        _ => {
            let mut bytes = vec![opcode::WAIT_N];
            let mut n = syncs - 2;
            loop {
                let low = (n & 0x7F) as u8;
                n >>= 7;
                if n == 0 {
                    bytes.push(low);
                    break;
                }
                bytes.push(low | 0x80);
            }
            bytes
        }
    }
}

/// `[S98]` tag built from the same metadata as the GD3 tag
pub fn generate_tag(metadata: &Gd3Metadata) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(TAG_MAGIC);
    data.extend_from_slice(&UTF8_BOM);
    for (key, value) in [
        ("title", &metadata.title_en),
        ("artist", &metadata.composer_en),
        ("game", &metadata.game_en),
        ("year", &metadata.date),
        ("copyright", &metadata.notes),
        ("s98by", &metadata.converter),
        ("system", &metadata.system_en),
    ] {
        if value.is_empty() {
            continue;
        }
        // Values are single lines
        let line: String = value.chars().filter(|&c| c != '\n' && c != '\r').collect();
        data.extend_from_slice(key.as_bytes());
        data.push(b'=');
        data.extend_from_slice(line.as_bytes());
        data.push(0x0A);
    }
    data.push(0x00);
    data
}

/// Builds an S98 file for a single YM2608
pub struct S98Writer {
    clock: u32,
    data: Vec<u8>,
    loop_start: Option<usize>,
    total_samples: u64,
}

impl S98Writer {
    pub fn new(clock: u32) -> Self {
        Self {
            clock,
            data: Vec::new(),
            loop_start: None,
            total_samples: 0,
        }
    }

    pub fn write_register(&mut self, address: u32, value: u8) {
        let op = if address & 0x100 != 0 {
            opcode::PORT1
        } else {
            opcode::PORT0
        };
        self.data.extend_from_slice(&[op, (address & 0xFF) as u8, value]);
    }

    /// Wait `samples` at 44.1 kHz, one sync each
    pub fn write_delay(&mut self, samples: u64) {
        self.data.extend(generate_wait(samples));
        self.total_samples += samples;
    }

    pub fn mark_loop_start(&mut self) {
        self.loop_start = Some(self.data.len());
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// Complete file image, with a tag when `metadata` is given
    pub fn to_bytes(&self, metadata: Option<&Gd3Metadata>) -> Vec<u8> {
        let dump_pos = HEADER_SIZE + DEVICE_INFO_SIZE;
        let mut bytes = vec![0u8; dump_pos];
        bytes[..4].copy_from_slice(S98_MAGIC);
        put_u32(&mut bytes, offset::TIMER_NUMERATOR, TIMER_NUMERATOR);
        put_u32(&mut bytes, offset::TIMER_DENOMINATOR, TIMER_DENOMINATOR);
        put_u32(&mut bytes, offset::DUMP_OFFSET, dump_pos as u32);
        put_u32(&mut bytes, offset::DEVICE_COUNT, 1);
        put_u32(&mut bytes, offset::DEVICE_INFO, DEVICE_YM2608);
        put_u32(&mut bytes, offset::DEVICE_INFO + 4, self.clock);
        if let Some(pos) = self.loop_start {
            put_u32(&mut bytes, offset::LOOP_OFFSET, (dump_pos + pos) as u32);
        }

        bytes.extend_from_slice(&self.data);
        bytes.push(opcode::END);

        if let Some(metadata) = metadata {
            let tag_pos = bytes.len();
            put_u32(&mut bytes, offset::TAG_OFFSET, tag_pos as u32);
            bytes.extend(generate_tag(metadata));
        }
        bytes
    }

    pub fn save(&self, path: &Path, metadata: Option<&Gd3Metadata>) -> Result<()> {
        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(&self.to_bytes(metadata))?;
        file.flush()?;
        Ok(())
    }
}

impl StreamWriter for S98Writer {
    fn write_register(&mut self, address: u32, value: u8) {
        S98Writer::write_register(self, address, value);
    }

    fn write_delay(&mut self, samples: u64) {
        S98Writer::write_delay(self, samples);
    }
}

fn put_u32(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

/// One dump command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S98Command {
    /// Register write with bit 8 of the address selecting the port
    Write { address: u32, value: u8 },
    Wait(u64),
    End,
}

/// Parsed S98 file with a single device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S98File {
    pub timer: (u32, u32),
    pub device_type: u32,
    pub clock: u32,
    /// Index into `commands` where playback loops back to
    pub loop_command: Option<usize>,
    pub commands: Vec<S98Command>,
    pub tag: Option<String>,
}

impl S98File {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE || &bytes[..4] != S98_MAGIC {
            return Err(Error::S98Parse("not an S98 v3 file".into()));
        }
        let timer = (
            read_u32(bytes, offset::TIMER_NUMERATOR)?,
            read_u32(bytes, offset::TIMER_DENOMINATOR)?,
        );
        if read_u32(bytes, offset::COMPRESSION)? != 0 {
            return Err(Error::S98Parse("compressed dumps are not supported".into()));
        }
        let (device_type, clock) = match read_u32(bytes, offset::DEVICE_COUNT)? {
            0 => (DEVICE_YM2608, 7_987_200),
            _ => (
                read_u32(bytes, offset::DEVICE_INFO)?,
                read_u32(bytes, offset::DEVICE_INFO + 4)?,
            ),
        };

        let dump = read_u32(bytes, offset::DUMP_OFFSET)? as usize;
        let loop_offset = read_u32(bytes, offset::LOOP_OFFSET)? as usize;
        let mut commands = Vec::new();
        let mut loop_command = None;
        let mut pos = dump;
        loop {
            if loop_offset != 0 && pos == loop_offset {
                loop_command = Some(commands.len());
            }
            let op = *bytes
                .get(pos)
                .ok_or_else(|| Error::S98Parse(format!("dump runs past the end at 0x{pos:X}")))?;
            pos += 1;
            let command = match op {
                opcode::PORT0 | opcode::PORT1 => {
                    let pair = bytes
                        .get(pos..pos + 2)
                        .ok_or_else(|| Error::S98Parse("truncated register write".into()))?;
                    pos += 2;
                    S98Command::Write {
                        address: (u32::from(op) << 8) | u32::from(pair[0]),
                        value: pair[1],
                    }
                }
                opcode::WAIT_1 => S98Command::Wait(1),
                opcode::WAIT_N => {
                    let mut n = 0u64;
                    let mut shift = 0;
                    loop {
                        if shift > 56 {
                            return Err(Error::S98Parse("wait length overflows".into()));
                        }
                        let b = *bytes
                            .get(pos)
                            .ok_or_else(|| Error::S98Parse("truncated wait".into()))?;
                        pos += 1;
                        n |= u64::from(b & 0x7F) << shift;
                        shift += 7;
                        if b & 0x80 == 0 {
                            break;
                        }
                    }
                    S98Command::Wait(n + 2)
                }
                opcode::END => S98Command::End,
                other => {
                    return Err(Error::S98Parse(format!(
                        "unknown command 0x{other:02X} at 0x{:X}",
                        pos - 1
                    )))
                }
            };
            commands.push(command);
            if command == S98Command::End {
                break;
            }
        }

        let tag = match read_u32(bytes, offset::TAG_OFFSET)? as usize {
            0 => None,
            at => Some(parse_tag(bytes.get(at..).unwrap_or_default())?),
        };

        Ok(Self {
            timer,
            device_type,
            clock,
            loop_command,
            commands,
            tag,
        })
    }

    /// Total wait in syncs
    pub fn total_syncs(&self) -> u64 {
        self.commands
            .iter()
            .map(|c| match c {
                S98Command::Wait(n) => *n,
                _ => 0,
            })
            .sum()
    }

    /// Value of tag line `key`
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tag.as_deref()?.split('\n').find_map(|line| {
            let (k, v) = line.split_once('=')?;
            (k == key).then_some(v)
        })
    }
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| Error::S98Parse(format!("header field at 0x{at:X} out of range")))
}

fn parse_tag(data: &[u8]) -> Result<String> {
    let body = data
        .strip_prefix(TAG_MAGIC.as_slice())
        .ok_or_else(|| Error::S98Parse("tag does not start with [S98]".into()))?;
    let body = body.strip_prefix(UTF8_BOM.as_slice()).unwrap_or(body);
    let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
    String::from_utf8(body[..end].to_vec()).map_err(|e| Error::S98Parse(e.to_string()))
}
