//! Instrument store
//!
//! Property pools hold `Arc` snapshots. Editing goes through
//! `Arc::make_mut`, so a channel that is still iterating an old snapshot keeps
//! it alive until the controller is told to resynchronize.

use super::{
    AdpcmSample, CommandSequence, EnvelopeFm, FmEnvelopeParameter, Instrument, LfoFm,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Highest instrument number a step can address
pub const MAX_INSTRUMENTS: usize = 128;

/// FM instrument with every property resolved
#[derive(Debug, Clone)]
pub struct FmPatch {
    pub number: usize,
    pub envelope: Arc<EnvelopeFm>,
    pub lfo: Option<Arc<LfoFm>>,
    pub operator_sequences: Vec<(FmEnvelopeParameter, Arc<CommandSequence>)>,
    pub arpeggio: Option<Arc<CommandSequence>>,
    pub pitch: Option<Arc<CommandSequence>>,
    pub envelope_reset: bool,
}

/// SSG instrument with every property resolved
#[derive(Debug, Clone)]
pub struct SsgPatch {
    pub number: usize,
    pub waveform: Option<Arc<CommandSequence>>,
    pub tone_noise: Option<Arc<CommandSequence>>,
    pub envelope: Option<Arc<CommandSequence>>,
    pub arpeggio: Option<Arc<CommandSequence>>,
    pub pitch: Option<Arc<CommandSequence>>,
}

/// ADPCM instrument with every property resolved
#[derive(Debug, Clone)]
pub struct AdpcmPatch {
    pub number: usize,
    pub sample: Arc<AdpcmSample>,
    pub envelope: Option<Arc<CommandSequence>>,
    pub arpeggio: Option<Arc<CommandSequence>>,
    pub pitch: Option<Arc<CommandSequence>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstrumentsManager {
    #[serde(default)]
    instruments: BTreeMap<usize, Arc<Instrument>>,
    #[serde(default)]
    envelopes_fm: Vec<Arc<EnvelopeFm>>,
    #[serde(default)]
    lfos_fm: Vec<Arc<LfoFm>>,
    #[serde(default)]
    sequences: Vec<Arc<CommandSequence>>,
    #[serde(default)]
    samples: Vec<Arc<AdpcmSample>>,
}

impl InstrumentsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instrument under `number`, replacing any previous one
    pub fn add_instrument(&mut self, number: usize, mut instrument: Instrument) -> Result<()> {
        if number >= MAX_INSTRUMENTS {
            return Err(Error::InstrumentNotFound(number));
        }
        instrument.set_number(number);
        self.instruments.insert(number, Arc::new(instrument));
        Ok(())
    }

    pub fn remove_instrument(&mut self, number: usize) -> Option<Arc<Instrument>> {
        self.instruments.remove(&number)
    }

    pub fn instrument(&self, number: usize) -> Option<Arc<Instrument>> {
        self.instruments.get(&number).cloned()
    }

    pub fn instrument_numbers(&self) -> impl Iterator<Item = usize> + '_ {
        self.instruments.keys().copied()
    }

    pub fn add_envelope_fm(&mut self, mut envelope: EnvelopeFm) -> usize {
        let index = self.envelopes_fm.len();
        envelope.index = index;
        self.envelopes_fm.push(Arc::new(envelope));
        index
    }

    pub fn envelope_fm(&self, index: usize) -> Option<Arc<EnvelopeFm>> {
        self.envelopes_fm.get(index).cloned()
    }

    pub fn envelope_fm_mut(&mut self, index: usize) -> Option<&mut EnvelopeFm> {
        self.envelopes_fm.get_mut(index).map(Arc::make_mut)
    }

    pub fn add_lfo_fm(&mut self, mut lfo: LfoFm) -> usize {
        let index = self.lfos_fm.len();
        lfo.index = index;
        self.lfos_fm.push(Arc::new(lfo));
        index
    }

    pub fn lfo_fm(&self, index: usize) -> Option<Arc<LfoFm>> {
        self.lfos_fm.get(index).cloned()
    }

    pub fn add_sequence(&mut self, mut sequence: CommandSequence) -> usize {
        let index = self.sequences.len();
        sequence.index = index;
        self.sequences.push(Arc::new(sequence));
        index
    }

    pub fn sequence(&self, index: usize) -> Option<Arc<CommandSequence>> {
        self.sequences.get(index).cloned()
    }

    pub fn sequence_mut(&mut self, index: usize) -> Option<&mut CommandSequence> {
        self.sequences.get_mut(index).map(Arc::make_mut)
    }

    pub fn add_sample(&mut self, mut sample: AdpcmSample) -> usize {
        let index = self.samples.len();
        sample.index = index;
        self.samples.push(Arc::new(sample));
        index
    }

    pub fn sample(&self, index: usize) -> Option<Arc<AdpcmSample>> {
        self.samples.get(index).cloned()
    }

    pub fn samples(&self) -> &[Arc<AdpcmSample>] {
        &self.samples
    }

    fn optional_sequence(&self, index: Option<usize>) -> Option<Arc<CommandSequence>> {
        index.and_then(|i| self.sequence(i))
    }

    /// Resolve an FM instrument; `None` if it is absent or of another source
    pub fn fm_patch(&self, number: usize) -> Option<FmPatch> {
        let Instrument::Fm(inst) = self.instruments.get(&number)?.as_ref() else {
            return None;
        };
        Some(FmPatch {
            number,
            envelope: self.envelope_fm(inst.envelope)?,
            lfo: inst.lfo.and_then(|i| self.lfo_fm(i)),
            operator_sequences: inst
                .operator_sequences
                .iter()
                .filter_map(|r| self.sequence(r.sequence).map(|s| (r.parameter, s)))
                .collect(),
            arpeggio: self.optional_sequence(inst.arpeggio),
            pitch: self.optional_sequence(inst.pitch),
            envelope_reset: inst.envelope_reset,
        })
    }

    pub fn ssg_patch(&self, number: usize) -> Option<SsgPatch> {
        let Instrument::Ssg(inst) = self.instruments.get(&number)?.as_ref() else {
            return None;
        };
        Some(SsgPatch {
            number,
            waveform: self.optional_sequence(inst.waveform),
            tone_noise: self.optional_sequence(inst.tone_noise),
            envelope: self.optional_sequence(inst.envelope),
            arpeggio: self.optional_sequence(inst.arpeggio),
            pitch: self.optional_sequence(inst.pitch),
        })
    }

    pub fn adpcm_patch(&self, number: usize) -> Option<AdpcmPatch> {
        let Instrument::Adpcm(inst) = self.instruments.get(&number)?.as_ref() else {
            return None;
        };
        Some(AdpcmPatch {
            number,
            sample: self.sample(inst.sample)?,
            envelope: self.optional_sequence(inst.envelope),
            arpeggio: self.optional_sequence(inst.arpeggio),
            pitch: self.optional_sequence(inst.pitch),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{InstrumentFm, InstrumentSsg, SequenceType};

    fn fm_instrument(envelope: usize) -> Instrument {
        Instrument::Fm(InstrumentFm {
            number: 0,
            name: "lead".into(),
            envelope,
            lfo: None,
            operator_sequences: Vec::new(),
            arpeggio: None,
            pitch: None,
            envelope_reset: false,
        })
    }

    #[test]
    fn test_patch_resolution() {
        let mut man = InstrumentsManager::new();
        let env = man.add_envelope_fm(EnvelopeFm::new(0));
        man.add_instrument(3, fm_instrument(env)).unwrap();
        let patch = man.fm_patch(3).unwrap();
        assert_eq!(patch.number, 3);
        assert_eq!(patch.envelope.al, 4);
        assert!(man.ssg_patch(3).is_none());
        assert!(man.fm_patch(4).is_none());
    }

    #[test]
    fn test_missing_envelope_does_not_resolve() {
        let mut man = InstrumentsManager::new();
        man.add_instrument(0, fm_instrument(9)).unwrap();
        assert!(man.fm_patch(0).is_none());
    }

    #[test]
    fn test_edit_keeps_old_snapshot() {
        let mut man = InstrumentsManager::new();
        let seq = man.add_sequence(CommandSequence::new(0, SequenceType::Absolute, 15, -1));
        man.add_instrument(
            1,
            Instrument::Ssg(InstrumentSsg {
                number: 0,
                name: String::new(),
                waveform: None,
                tone_noise: None,
                envelope: Some(seq),
                arpeggio: None,
                pitch: None,
            }),
        )
        .unwrap();
        let before = man.ssg_patch(1).unwrap().envelope.unwrap();
        man.sequence_mut(seq).unwrap().add_sequence_command(8, -1);
        assert_eq!(before.len(), 1);
        assert_eq!(man.ssg_patch(1).unwrap().envelope.unwrap().len(), 2);
    }

    #[test]
    fn test_instrument_number_range() {
        let mut man = InstrumentsManager::new();
        assert!(man.add_instrument(MAX_INSTRUMENTS, fm_instrument(0)).is_err());
    }

    #[test]
    fn test_json_roundtrip_keys() {
        let mut man = InstrumentsManager::new();
        let env = man.add_envelope_fm(EnvelopeFm::new(0));
        man.add_instrument(5, fm_instrument(env)).unwrap();
        let json = serde_json::to_string(&man).unwrap();
        let back: InstrumentsManager = serde_json::from_str(&json).unwrap();
        assert!(back.fm_patch(5).is_some());
    }
}
