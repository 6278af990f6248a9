//! Effect column decoding
//!
//! Ids are two characters. The meaning of some ids depends on the sound
//! source of the track they appear on (`0E`, `0V`).

use super::SoundSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectType {
    /// 00xy: cycle base, +x, +y semitones
    Arpeggio,
    /// 01xx
    PortamentoUp,
    /// 02xx
    PortamentoDown,
    /// 03xx: glide to the new note at xx pitch steps per tick
    TonePortamento,
    /// 04xy: period x, depth y
    Vibrato,
    /// 07xy: period x, depth y
    Tremolo,
    /// 08xx: bit 1 left, bit 0 right
    Pan,
    /// 0Axy: x up, y down per tick
    VolumeSlide,
    /// 0Bxx: continue at order xx
    PositionJump,
    /// 0Cxx: stop after this step
    SongEnd,
    /// 0Dxx: continue at step xx of the next order
    PatternBreak,
    /// 0Fxx: speed below 0x20, tempo otherwise
    SpeedTempoChange,
    /// 0Oxx
    GrooveChange,
    /// 0Gxx: delay the step by xx ticks
    NoteDelay,
    /// 0Sxx: key off after xx ticks
    NoteCut,
    /// 0Mxy: after x ticks set volume y
    VolumeDelay,
    /// 0Txy: after x & 7 ticks transpose y semitones, down if x & 8
    TransposeDelay,
    /// 0Pxx: 0x80 is centre
    Detune,
    /// 0Qxy: speed x, y semitones
    NoteSlideUp,
    /// 0Rxy
    NoteSlideDown,
    /// 0Exx on FM
    EnvelopeReset,
    /// 0Exy on SSG: x shift (0 disables), y shape
    AutoEnvelope,
    /// 0Vxx on SSG: bit 0 tone, bit 1 noise
    ToneNoiseMix,
    /// 0Vxx on rhythm: total level
    MasterVolume,
    /// 0Wxx
    NoisePitch,
    /// 0Hxx
    HardEnvHighPeriod,
    /// 0Ixx
    HardEnvLowPeriod,
    /// FBxx
    FbControl,
    /// Tnxx, operator n-1
    TlControl(usize),
    /// Mnxx
    MlControl(usize),
    /// Anxx
    ArControl(usize),
    /// Dnxx
    DrControl(usize),
    /// Rnxx
    RrControl(usize),
    /// 0Lxx: modulator TL offset, 0x80 is centre
    Brightness,
    /// Y0xx / Y1xx: address in port 0 / 1
    RegisterAddress(u32),
    /// Z0xx
    RegisterValue,
    NoEffect,
}

/// When an effect is processed relative to the step and its key-on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectClass {
    /// Transport and timing, applied once at step entry
    Global,
    /// Applied right before the step's key-on (or at step entry without a note)
    KeyOnBased,
    /// Applied at step entry even when the note is delayed
    StepBeginBased,
    DirectRegister,
    None,
}

impl EffectType {
    pub fn class(self) -> EffectClass {
        use EffectType::*;
        match self {
            PositionJump | SongEnd | PatternBreak | SpeedTempoChange | GrooveChange => {
                EffectClass::Global
            }
            VolumeSlide | Tremolo | NoteDelay | NoteCut | VolumeDelay | TransposeDelay
            | ToneNoiseMix | MasterVolume | NoisePitch | HardEnvHighPeriod
            | HardEnvLowPeriod => EffectClass::StepBeginBased,
            RegisterAddress(_) | RegisterValue => EffectClass::DirectRegister,
            NoEffect => EffectClass::None,
            _ => EffectClass::KeyOnBased,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Effect {
    pub ty: EffectType,
    pub value: i32,
}

impl Effect {
    pub fn none() -> Self {
        Self {
            ty: EffectType::NoEffect,
            value: -1,
        }
    }

    /// High nibble of the value
    pub fn x(&self) -> i32 {
        self.value >> 4
    }

    /// Low nibble of the value
    pub fn y(&self) -> i32 {
        self.value & 0x0F
    }
}

fn operator_digit(c: char) -> Option<usize> {
    match c {
        '1'..='4' => Some(c as usize - '1' as usize),
        _ => None,
    }
}

/// Decode an effect column for a track of `src`
pub fn make_effect_data(src: SoundSource, id: &str, value: Option<u8>) -> Effect {
    use EffectType::*;
    use SoundSource::*;

    let Some(value) = value else {
        return Effect::none();
    };
    let tone = matches!(src, Fm | Ssg | Adpcm);
    let mut chars = id.chars();
    let (Some(c0), Some(c1), None) = (chars.next(), chars.next(), chars.next()) else {
        return Effect::none();
    };

    let ty = match (c0, c1) {
        ('0', '0') if tone => Arpeggio,
        ('0', '1') if tone => PortamentoUp,
        ('0', '2') if tone => PortamentoDown,
        ('0', '3') if tone => TonePortamento,
        ('0', '4') if tone => Vibrato,
        ('0', '7') if tone => Tremolo,
        ('0', '8') if src != Ssg => Pan,
        ('0', 'A') if tone => VolumeSlide,
        ('0', 'B') => PositionJump,
        ('0', 'C') => SongEnd,
        ('0', 'D') => PatternBreak,
        ('0', 'E') if src == Fm => EnvelopeReset,
        ('0', 'E') if src == Ssg => AutoEnvelope,
        ('0', 'F') => SpeedTempoChange,
        ('0', 'G') => NoteDelay,
        ('0', 'H') if src == Ssg => HardEnvHighPeriod,
        ('0', 'I') if src == Ssg => HardEnvLowPeriod,
        ('0', 'L') if src == Fm => Brightness,
        ('0', 'M') => VolumeDelay,
        ('0', 'O') => GrooveChange,
        ('0', 'P') if tone => Detune,
        ('0', 'Q') if tone => NoteSlideUp,
        ('0', 'R') if tone => NoteSlideDown,
        ('0', 'S') => NoteCut,
        ('0', 'T') if tone => TransposeDelay,
        ('0', 'V') if src == Ssg => ToneNoiseMix,
        ('0', 'V') if src == Drum => MasterVolume,
        ('0', 'W') if src == Ssg => NoisePitch,
        ('F', 'B') if src == Fm => FbControl,
        ('T', n) if src == Fm => match operator_digit(n) {
            Some(op) => TlControl(op),
            None => NoEffect,
        },
        ('M', n) if src == Fm => match operator_digit(n) {
            Some(op) => MlControl(op),
            None => NoEffect,
        },
        ('A', n) if src == Fm => match operator_digit(n) {
            Some(op) => ArControl(op),
            None => NoEffect,
        },
        ('D', n) if src == Fm => match operator_digit(n) {
            Some(op) => DrControl(op),
            None => NoEffect,
        },
        ('R', n) if src == Fm => match operator_digit(n) {
            Some(op) => RrControl(op),
            None => NoEffect,
        },
        ('Y', '0') => RegisterAddress(0),
        ('Y', '1') => RegisterAddress(1),
        ('Z', '0') => RegisterValue,
        _ => NoEffect,
    };

    if ty == NoEffect {
        Effect::none()
    } else {
        Effect {
            ty,
            value: value as i32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_dependent_ids() {
        assert_eq!(
            make_effect_data(SoundSource::Fm, "0E", Some(1)).ty,
            EffectType::EnvelopeReset
        );
        assert_eq!(
            make_effect_data(SoundSource::Ssg, "0E", Some(0x12)).ty,
            EffectType::AutoEnvelope
        );
        assert_eq!(
            make_effect_data(SoundSource::Drum, "0V", Some(0x3F)).ty,
            EffectType::MasterVolume
        );
        assert_eq!(
            make_effect_data(SoundSource::Drum, "00", Some(0x37)).ty,
            EffectType::NoEffect
        );
    }

    #[test]
    fn test_operator_controls() {
        let eff = make_effect_data(SoundSource::Fm, "T3", Some(0x20));
        assert_eq!(eff.ty, EffectType::TlControl(2));
        assert_eq!(eff.value, 0x20);
        assert_eq!(
            make_effect_data(SoundSource::Fm, "T5", Some(0x20)).ty,
            EffectType::NoEffect
        );
        assert_eq!(
            make_effect_data(SoundSource::Ssg, "T1", Some(0x20)).ty,
            EffectType::NoEffect
        );
    }

    #[test]
    fn test_missing_value_is_no_effect() {
        assert_eq!(make_effect_data(SoundSource::Fm, "0F", None), Effect::none());
        assert_eq!(make_effect_data(SoundSource::Fm, "0FF", Some(3)), Effect::none());
    }

    #[test]
    fn test_classes() {
        assert_eq!(EffectType::PatternBreak.class(), EffectClass::Global);
        assert_eq!(EffectType::Arpeggio.class(), EffectClass::KeyOnBased);
        assert_eq!(EffectType::NoteDelay.class(), EffectClass::StepBeginBased);
        assert_eq!(EffectType::RegisterValue.class(), EffectClass::DirectRegister);
        let eff = make_effect_data(SoundSource::Ssg, "04", Some(0x37));
        assert_eq!((eff.x(), eff.y()), (3, 7));
    }
}
