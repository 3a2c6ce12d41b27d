//! Commodore 64 (SID)

use super::{AdsrSpec, ChannelCaps, Target};
use crate::compiler::command::Param;
use crate::compiler::effects::EffectKind;

const fn voice(name: &'static str) -> ChannelCaps {
    ChannelCaps {
        name,
        chip: "SID",
        min_octave: 0,
        max_octave: 7,
        max_volume: 15,
        volume_resolution: 15,
        max_duty: 3,
        effects: &[
            EffectKind::Duty,
            EffectKind::Vibrato,
            EffectKind::Arpeggio,
            EffectKind::Pitch,
            EffectKind::PulseWidth,
            EffectKind::Filter,
            EffectKind::Adsr,
        ],
        params: &[
            Param::Duty,
            Param::Detune,
            Param::Transpose,
            Param::Ring,
            Param::Sync,
            Param::PulseWidth,
        ],
        pcm: false,
    }
}

static CHANNELS: [ChannelCaps; 3] = [voice("A"), voice("B"), voice("C")];

pub struct C64;

impl Target for C64 {
    fn name(&self) -> &'static str {
        "c64"
    }

    fn description(&self) -> &'static str {
        "Commodore 64"
    }

    fn channels(&self) -> &'static [ChannelCaps] {
        &CHANNELS
    }

    fn update_rate(&self) -> u32 {
        50
    }

    fn adsr(&self) -> Option<AdsrSpec> {
        Some(AdsrSpec { len: 4, max: 15 })
    }

    fn pulse_width_range(&self) -> Option<(i64, i64)> {
        Some((0, 4095))
    }

    fn filter_max(&self) -> Option<i64> {
        Some(2047)
    }
}
