//! Nintendo Entertainment System (2A03)

use super::{ChannelCaps, PcmSpec, Target, Tunable};
use crate::compiler::command::Param;
use crate::compiler::effects::EffectKind;

const PULSE_EFFECTS: &[EffectKind] = &[
    EffectKind::Duty,
    EffectKind::Volume,
    EffectKind::Vibrato,
    EffectKind::Arpeggio,
    EffectKind::Pitch,
];

const PULSE_PARAMS: &[Param] = &[Param::Duty, Param::Detune, Param::Transpose];

const fn pulse(name: &'static str) -> ChannelCaps {
    ChannelCaps {
        name,
        chip: "2A03",
        min_octave: 1,
        max_octave: 7,
        max_volume: 15,
        volume_resolution: 15,
        max_duty: 3,
        effects: PULSE_EFFECTS,
        params: PULSE_PARAMS,
        pcm: false,
    }
}

static CHANNELS: [ChannelCaps; 5] = [
    pulse("A"),
    pulse("B"),
    ChannelCaps {
        name: "C",
        chip: "2A03",
        min_octave: 0,
        max_octave: 6,
        max_volume: 1,
        volume_resolution: 1,
        max_duty: 0,
        effects: &[EffectKind::Vibrato, EffectKind::Arpeggio, EffectKind::Pitch],
        params: &[Param::Detune, Param::Transpose],
        pcm: false,
    },
    ChannelCaps {
        name: "D",
        chip: "2A03",
        min_octave: 0,
        max_octave: 1,
        max_volume: 15,
        volume_resolution: 15,
        max_duty: 1,
        effects: &[EffectKind::Duty, EffectKind::Volume, EffectKind::Arpeggio],
        params: &[Param::Duty, Param::Transpose],
        pcm: false,
    },
    ChannelCaps {
        name: "E",
        chip: "2A03",
        min_octave: 0,
        max_octave: 7,
        max_volume: 0,
        volume_resolution: 0,
        max_duty: 0,
        effects: &[EffectKind::Pcm],
        params: &[],
        pcm: true,
    },
];

static TUNABLES: [Tunable; 1] = [Tunable { name: "NES-PAL", min: 0, max: 1, default: 0 }];

pub struct Nes;

impl Target for Nes {
    fn name(&self) -> &'static str {
        "nes"
    }

    fn description(&self) -> &'static str {
        "Nintendo Entertainment System"
    }

    fn channels(&self) -> &'static [ChannelCaps] {
        &CHANNELS
    }

    fn pcm(&self) -> Option<PcmSpec> {
        Some(PcmSpec { max_rate: 33144, bits: 7 })
    }

    fn tunables(&self) -> &'static [Tunable] {
        &TUNABLES
    }
}
