//! Sega Master System (SN76489)

use super::{ChannelCaps, Target, Tunable};
use crate::compiler::command::Param;
use crate::compiler::effects::EffectKind;

/// Effects the PSG tone channels understand
pub(crate) const PSG_EFFECTS: &[EffectKind] = &[
    EffectKind::Volume,
    EffectKind::Vibrato,
    EffectKind::Arpeggio,
    EffectKind::Pitch,
];

pub(crate) const PSG_PARAMS: &[Param] = &[Param::Detune, Param::Transpose];

pub(crate) const fn psg_tone(name: &'static str) -> ChannelCaps {
    ChannelCaps {
        name,
        chip: "SN76489",
        min_octave: 2,
        max_octave: 7,
        max_volume: 15,
        volume_resolution: 15,
        max_duty: 0,
        effects: PSG_EFFECTS,
        params: PSG_PARAMS,
        pcm: false,
    }
}

pub(crate) const fn psg_noise(name: &'static str) -> ChannelCaps {
    ChannelCaps {
        name,
        chip: "SN76489",
        min_octave: 0,
        max_octave: 7,
        max_volume: 15,
        volume_resolution: 15,
        max_duty: 1,
        effects: &[EffectKind::Duty, EffectKind::Volume, EffectKind::Arpeggio],
        params: &[Param::Transpose, Param::Duty],
        pcm: false,
    }
}

static CHANNELS: [ChannelCaps; 4] = [psg_tone("A"), psg_tone("B"), psg_tone("C"), psg_noise("D")];

static TUNABLES: [Tunable; 1] = [Tunable { name: "SMS-PAL", min: 0, max: 1, default: 0 }];

pub struct Sms;

impl Target for Sms {
    fn name(&self) -> &'static str {
        "sms"
    }

    fn description(&self) -> &'static str {
        "Sega Master System"
    }

    fn channels(&self) -> &'static [ChannelCaps] {
        &CHANNELS
    }

    fn tunables(&self) -> &'static [Tunable] {
        &TUNABLES
    }
}
