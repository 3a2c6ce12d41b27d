//! Amstrad CPC (AY-3-8910)

use super::{ChannelCaps, Target};
use crate::compiler::command::Param;
use crate::compiler::effects::EffectKind;

const fn tone(name: &'static str) -> ChannelCaps {
    ChannelCaps {
        name,
        chip: "AY-3-8910",
        min_octave: 1,
        max_octave: 8,
        max_volume: 15,
        volume_resolution: 15,
        max_duty: 0,
        effects: &[EffectKind::Volume, EffectKind::Vibrato, EffectKind::Arpeggio, EffectKind::Pitch],
        params: &[Param::Detune, Param::Transpose, Param::Noise, Param::Mode],
        pcm: false,
    }
}

static CHANNELS: [ChannelCaps; 3] = [tone("A"), tone("B"), tone("C")];

pub struct Cpc;

impl Target for Cpc {
    fn name(&self) -> &'static str {
        "cpc"
    }

    fn description(&self) -> &'static str {
        "Amstrad CPC"
    }

    fn channels(&self) -> &'static [ChannelCaps] {
        &CHANNELS
    }

    fn update_rate(&self) -> u32 {
        50
    }
}
