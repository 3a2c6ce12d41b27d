//! Atari 8-bit (POKEY)

use super::{ChannelCaps, Target};
use crate::compiler::command::Param;
use crate::compiler::effects::EffectKind;

const fn voice(name: &'static str) -> ChannelCaps {
    ChannelCaps {
        name,
        chip: "POKEY",
        min_octave: 2,
        max_octave: 7,
        max_volume: 15,
        volume_resolution: 15,
        max_duty: 7,
        effects: &[
            EffectKind::Duty,
            EffectKind::Volume,
            EffectKind::Vibrato,
            EffectKind::Arpeggio,
            EffectKind::Pitch,
        ],
        params: &[Param::Duty, Param::Detune, Param::Transpose],
        pcm: false,
    }
}

static CHANNELS: [ChannelCaps; 4] = [voice("A"), voice("B"), voice("C"), voice("D")];

pub struct At8;

impl Target for At8 {
    fn name(&self) -> &'static str {
        "at8"
    }

    fn description(&self) -> &'static str {
        "Atari 8-bit"
    }

    fn channels(&self) -> &'static [ChannelCaps] {
        &CHANNELS
    }

    fn update_rate(&self) -> u32 {
        50
    }
}
