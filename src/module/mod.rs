//! Module data model: songs, tracks, patterns and steps

pub mod effect;
pub mod pattern;
pub mod step;
pub mod track;

pub use effect::{Effect, EffectClass, EffectType};
pub use pattern::Pattern;
pub use step::{EffectCell, Step, StepNote};
pub use track::{Track, TrackAttribute};

use crate::error::{Error, Result};
use crate::instrument::InstrumentsManager;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Sound sources of the YM2608
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundSource {
    Fm,
    Ssg,
    Drum,
    Adpcm,
}

impl SoundSource {
    pub const ALL: [SoundSource; 4] = [
        SoundSource::Fm,
        SoundSource::Ssg,
        SoundSource::Drum,
        SoundSource::Adpcm,
    ];

    pub fn channel_count(self) -> usize {
        match self {
            SoundSource::Fm => 6,
            SoundSource::Ssg => 3,
            SoundSource::Drum => 6,
            SoundSource::Adpcm => 1,
        }
    }
}

impl fmt::Display for SoundSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SoundSource::Fm => "FM",
            SoundSource::Ssg => "SSG",
            SoundSource::Drum => "Drum",
            SoundSource::Adpcm => "ADPCM",
        };
        f.write_str(name)
    }
}

fn default_tempo() -> u32 {
    150
}

fn default_speed() -> u32 {
    6
}

fn default_pattern_size() -> usize {
    64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    #[serde(default)]
    pub number: usize,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_tempo")]
    pub tempo: u32,
    #[serde(default = "default_speed")]
    pub speed: u32,
    /// Groove index replacing `speed` when set
    #[serde(default)]
    pub groove: Option<usize>,
    #[serde(default = "default_pattern_size")]
    pub pattern_size: usize,
    pub tracks: Vec<Track>,
}

impl Song {
    /// FM1-6, SSG1-3, BD SD TOP HH TOM RIM, ADPCM with one empty order
    pub fn new_standard(number: usize, pattern_size: usize) -> Self {
        let tracks = SoundSource::ALL
            .iter()
            .flat_map(|&source| (0..source.channel_count()).map(move |ch| (source, ch)))
            .enumerate()
            .map(|(number, (source, channel_in_source))| {
                Track::new(
                    TrackAttribute {
                        number,
                        source,
                        channel_in_source,
                    },
                    pattern_size,
                )
            })
            .collect();
        Self {
            number,
            title: String::new(),
            tempo: default_tempo(),
            speed: default_speed(),
            groove: None,
            pattern_size,
            tracks,
        }
    }

    /// Song with an explicit track layout
    pub fn with_tracks(number: usize, pattern_size: usize, attributes: &[TrackAttribute]) -> Self {
        Self {
            number,
            title: String::new(),
            tempo: default_tempo(),
            speed: default_speed(),
            groove: None,
            pattern_size,
            tracks: attributes
                .iter()
                .map(|&a| Track::new(a, pattern_size))
                .collect(),
        }
    }

    pub fn order_len(&self) -> usize {
        self.tracks.first().map_or(0, |t| t.orders.len())
    }

    /// Shortest effective pattern length over all tracks at `order`
    pub fn pattern_size_at(&self, order: usize) -> usize {
        self.tracks
            .iter()
            .filter_map(|t| t.pattern_from_order(order))
            .map(Pattern::size)
            .min()
            .unwrap_or(0)
    }

    pub fn track_mut(&mut self, number: usize) -> Option<&mut Track> {
        self.tracks.get_mut(number)
    }

    /// Append an order that uses pattern `pattern` on every track
    pub fn push_order(&mut self, pattern: usize) {
        let size = self.pattern_size;
        for track in &mut self.tracks {
            track.push_order(pattern, size);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Module {
    pub title: String,
    pub author: String,
    pub copyright: String,
    /// Ticks per step sequences selectable with the groove effect
    pub grooves: Vec<Vec<u32>>,
    pub songs: Vec<Song>,
}

impl Module {
    pub fn new() -> Self {
        Self {
            grooves: vec![vec![6, 6]],
            ..Self::default()
        }
    }

    pub fn song(&self, number: usize) -> Result<&Song> {
        self.songs.get(number).ok_or(Error::SongNotFound(number))
    }

    pub fn song_mut(&mut self, number: usize) -> Result<&mut Song> {
        self.songs.get_mut(number).ok_or(Error::SongNotFound(number))
    }

    pub fn groove(&self, index: usize) -> Option<&[u32]> {
        self.grooves.get(index).map(Vec::as_slice)
    }
}

/// Module and instruments as stored in a project file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Project {
    pub module: Module,
    #[serde(default)]
    pub instruments: InstrumentsManager,
}

impl Project {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
