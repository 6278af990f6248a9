//! FM voice parameters

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Per-operator parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FmOperatorParameter {
    Ar,
    Dr,
    Sr,
    Rr,
    Sl,
    Tl,
    Ks,
    Ml,
    Dt,
    SsgEg,
}

impl FmOperatorParameter {
    /// Register base address carrying this parameter
    pub fn register_base(self) -> u32 {
        match self {
            Self::Dt | Self::Ml => 0x30,
            Self::Tl => 0x40,
            Self::Ks | Self::Ar => 0x50,
            Self::Dr => 0x60,
            Self::Sr => 0x70,
            Self::Sl | Self::Rr => 0x80,
            Self::SsgEg => 0x90,
        }
    }
}

/// Any parameter of an FM voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FmEnvelopeParameter {
    Al,
    Fb,
    Op(usize, FmOperatorParameter),
}

fn operator(op: usize, param: FmOperatorParameter) -> Result<FmEnvelopeParameter> {
    if op < 4 {
        Ok(FmEnvelopeParameter::Op(op, param))
    } else {
        Err(Error::InvalidOperator(op))
    }
}

pub fn parameter_tl(op: usize) -> Result<FmEnvelopeParameter> {
    operator(op, FmOperatorParameter::Tl)
}

pub fn parameter_ml(op: usize) -> Result<FmEnvelopeParameter> {
    operator(op, FmOperatorParameter::Ml)
}

pub fn parameter_ar(op: usize) -> Result<FmEnvelopeParameter> {
    operator(op, FmOperatorParameter::Ar)
}

pub fn parameter_dr(op: usize) -> Result<FmEnvelopeParameter> {
    operator(op, FmOperatorParameter::Dr)
}

pub fn parameter_rr(op: usize) -> Result<FmEnvelopeParameter> {
    operator(op, FmOperatorParameter::Rr)
}

/// One FM operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FmOperator {
    pub enabled: bool,
    pub ar: u8,
    pub dr: u8,
    pub sr: u8,
    pub rr: u8,
    pub sl: u8,
    pub tl: u8,
    pub ks: u8,
    pub ml: u8,
    pub dt: u8,
    /// SSG-EG shape 0-7, `None` when off
    pub ssgeg: Option<u8>,
}

impl Default for FmOperator {
    fn default() -> Self {
        Self {
            enabled: true,
            ar: 31,
            dr: 0,
            sr: 0,
            rr: 7,
            sl: 0,
            tl: 0,
            ks: 0,
            ml: 1,
            dt: 0,
            ssgeg: None,
        }
    }
}

/// Algorithm, feedback and four operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeFm {
    #[serde(default)]
    pub index: usize,
    #[serde(default = "default_al")]
    pub al: u8,
    #[serde(default)]
    pub fb: u8,
    #[serde(default = "default_operators")]
    pub ops: [FmOperator; 4],
}

fn default_al() -> u8 {
    4
}

fn default_operators() -> [FmOperator; 4] {
    let modulator = FmOperator {
        tl: 32,
        ..FmOperator::default()
    };
    [modulator, FmOperator::default(), modulator, FmOperator::default()]
}

impl EnvelopeFm {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            al: default_al(),
            fb: 0,
            ops: default_operators(),
        }
    }

    /// Parameter value; SSG-EG reads as -1 when off
    pub fn get(&self, param: FmEnvelopeParameter) -> i32 {
        match param {
            FmEnvelopeParameter::Al => self.al as i32,
            FmEnvelopeParameter::Fb => self.fb as i32,
            FmEnvelopeParameter::Op(op, p) => {
                let o = &self.ops[op & 3];
                match p {
                    FmOperatorParameter::Ar => o.ar as i32,
                    FmOperatorParameter::Dr => o.dr as i32,
                    FmOperatorParameter::Sr => o.sr as i32,
                    FmOperatorParameter::Rr => o.rr as i32,
                    FmOperatorParameter::Sl => o.sl as i32,
                    FmOperatorParameter::Tl => o.tl as i32,
                    FmOperatorParameter::Ks => o.ks as i32,
                    FmOperatorParameter::Ml => o.ml as i32,
                    FmOperatorParameter::Dt => o.dt as i32,
                    FmOperatorParameter::SsgEg => o.ssgeg.map_or(-1, i32::from),
                }
            }
        }
    }

    /// Store a parameter, masking it to its register width
    pub fn set(&mut self, param: FmEnvelopeParameter, value: i32) {
        match param {
            FmEnvelopeParameter::Al => self.al = (value & 7) as u8,
            FmEnvelopeParameter::Fb => self.fb = (value & 7) as u8,
            FmEnvelopeParameter::Op(op, p) => {
                let o = &mut self.ops[op & 3];
                match p {
                    FmOperatorParameter::Ar => o.ar = (value & 31) as u8,
                    FmOperatorParameter::Dr => o.dr = (value & 31) as u8,
                    FmOperatorParameter::Sr => o.sr = (value & 31) as u8,
                    FmOperatorParameter::Rr => o.rr = (value & 15) as u8,
                    FmOperatorParameter::Sl => o.sl = (value & 15) as u8,
                    FmOperatorParameter::Tl => o.tl = value.clamp(0, 127) as u8,
                    FmOperatorParameter::Ks => o.ks = (value & 3) as u8,
                    FmOperatorParameter::Ml => o.ml = (value & 15) as u8,
                    FmOperatorParameter::Dt => o.dt = (value & 7) as u8,
                    FmOperatorParameter::SsgEg => {
                        o.ssgeg = if value < 0 { None } else { Some((value & 7) as u8) }
                    }
                }
            }
        }
    }

    /// Key-on slot mask (bits 4-7) of enabled operators
    pub fn slot_mask(&self) -> u8 {
        self.ops
            .iter()
            .enumerate()
            .filter(|(_, o)| o.enabled)
            .fold(0, |mask, (i, _)| mask | (0x10 << i))
    }
}

/// Whether an operator feeds the output for an algorithm
pub fn is_carrier(op: usize, al: u8) -> bool {
    match op {
        0 => al == 7,
        1 => al >= 4,
        2 => al >= 5,
        3 => true,
        _ => false,
    }
}
