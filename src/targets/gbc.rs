//! Nintendo Game Boy (DMG)

use super::{ChannelCaps, Target, Tunable, WaveSpec};
use crate::compiler::command::Param;
use crate::compiler::effects::EffectKind;

const PULSE_EFFECTS: &[EffectKind] = &[
    EffectKind::Duty,
    EffectKind::Volume,
    EffectKind::Vibrato,
    EffectKind::Arpeggio,
    EffectKind::Pitch,
    EffectKind::Pan,
];

const fn pulse(name: &'static str) -> ChannelCaps {
    ChannelCaps {
        name,
        chip: "DMG",
        min_octave: 2,
        max_octave: 7,
        max_volume: 15,
        volume_resolution: 15,
        max_duty: 3,
        effects: PULSE_EFFECTS,
        params: &[Param::Duty, Param::Detune, Param::Transpose],
        pcm: false,
    }
}

static CHANNELS: [ChannelCaps; 4] = [
    pulse("A"),
    pulse("B"),
    ChannelCaps {
        name: "C",
        chip: "DMG",
        min_octave: 1,
        max_octave: 6,
        max_volume: 3,
        volume_resolution: 3,
        max_duty: 0,
        effects: &[
            EffectKind::Volume,
            EffectKind::Vibrato,
            EffectKind::Arpeggio,
            EffectKind::Pitch,
            EffectKind::Pan,
            EffectKind::Waveform,
            EffectKind::WaveformMacro,
        ],
        params: &[Param::Detune, Param::Transpose],
        pcm: false,
    },
    ChannelCaps {
        name: "D",
        chip: "DMG",
        min_octave: 0,
        max_octave: 5,
        max_volume: 15,
        volume_resolution: 15,
        max_duty: 1,
        effects: &[EffectKind::Duty, EffectKind::Volume, EffectKind::Arpeggio, EffectKind::Pan],
        params: &[Param::Duty, Param::Transpose],
        pcm: false,
    },
];

static TUNABLES: [Tunable; 2] = [
    Tunable { name: "GB-VOLUME-CONTROL", min: 0, max: 1, default: 0 },
    Tunable { name: "GB-NOTE-OFFSET", min: -12, max: 12, default: 0 },
];

pub struct Gbc;

impl Target for Gbc {
    fn name(&self) -> &'static str {
        "gbc"
    }

    fn description(&self) -> &'static str {
        "Nintendo Game Boy / Game Boy Color"
    }

    fn channels(&self) -> &'static [ChannelCaps] {
        &CHANNELS
    }

    fn wave(&self) -> Option<WaveSpec> {
        Some(WaveSpec { len: 32, max: 15 })
    }

    fn pan_range(&self) -> Option<(i64, i64)> {
        Some((-1, 1))
    }

    fn tunables(&self) -> &'static [Tunable] {
        &TUNABLES
    }
}
