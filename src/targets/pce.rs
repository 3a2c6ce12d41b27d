//! NEC PC Engine (HuC6280)

use super::{ChannelCaps, PcmSpec, Target, WaveSpec};
use crate::compiler::command::Param;
use crate::compiler::effects::EffectKind;

const WAVE_EFFECTS: &[EffectKind] = &[
    EffectKind::Volume,
    EffectKind::Vibrato,
    EffectKind::Arpeggio,
    EffectKind::Pitch,
    EffectKind::Pan,
    EffectKind::Waveform,
    EffectKind::WaveformMacro,
    EffectKind::Pcm,
];

const fn wave(name: &'static str) -> ChannelCaps {
    ChannelCaps {
        name,
        chip: "HuC6280",
        min_octave: 1,
        max_octave: 7,
        max_volume: 31,
        volume_resolution: 31,
        max_duty: 0,
        effects: WAVE_EFFECTS,
        params: &[Param::Detune, Param::Transpose],
        pcm: true,
    }
}

static CHANNELS: [ChannelCaps; 6] = [wave("A"), wave("B"), wave("C"), wave("D"), wave("E"), wave("F")];

pub struct Pce;

impl Target for Pce {
    fn name(&self) -> &'static str {
        "pce"
    }

    fn description(&self) -> &'static str {
        "NEC PC Engine / TurboGrafx-16"
    }

    fn channels(&self) -> &'static [ChannelCaps] {
        &CHANNELS
    }

    fn wave(&self) -> Option<WaveSpec> {
        Some(WaveSpec { len: 32, max: 31 })
    }

    fn pcm(&self) -> Option<PcmSpec> {
        Some(PcmSpec { max_rate: 7000, bits: 5 })
    }

    fn pan_range(&self) -> Option<(i64, i64)> {
        Some((-15, 15))
    }
}
