use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid FM operator index: {0} (expected 0-3)")]
    InvalidOperator(usize),

    #[error("Loop arrays differ in length: {begins} begins, {ends} ends, {times} times")]
    LoopMismatch {
        begins: usize,
        ends: usize,
        times: usize,
    },

    #[error("Instrument {0} not found")]
    InstrumentNotFound(usize),

    #[error("Song {0} not found")]
    SongNotFound(usize),

    #[error("Position outside the song: order {order}, step {step}")]
    InvalidPosition { order: usize, step: usize },

    #[error("ADPCM memory full: sample needs {required} units, {available} left")]
    AdpcmMemoryFull { required: usize, available: usize },

    #[error("Config error: {0}")]
    Config(String),

    #[error("VGM parse error: {0}")]
    VgmParse(String),

    #[error("S98 parse error: {0}")]
    S98Parse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
