//! Sega Genesis / Mega Drive (YM2612 + SN76489)

use super::sms::{psg_noise, psg_tone};
use super::{ChannelCaps, PcmSpec, Target, Tunable};
use crate::compiler::command::Param;
use crate::compiler::effects::EffectKind;

const FM_EFFECTS: &[EffectKind] = &[
    EffectKind::Volume,
    EffectKind::Vibrato,
    EffectKind::Arpeggio,
    EffectKind::Pitch,
    EffectKind::Feedback,
    EffectKind::Modulation,
    EffectKind::Pan,
];

const FM_PCM_EFFECTS: &[EffectKind] = &[
    EffectKind::Volume,
    EffectKind::Vibrato,
    EffectKind::Arpeggio,
    EffectKind::Pitch,
    EffectKind::Feedback,
    EffectKind::Modulation,
    EffectKind::Pan,
    EffectKind::Pcm,
];

const FM_PARAMS: &[Param] = &[
    Param::Detune,
    Param::Transpose,
    Param::Feedback,
    Param::Am,
    Param::Operator,
    Param::RateScale,
    Param::Multiplier,
    Param::Ssg,
    Param::Mode,
];

const fn fm(name: &'static str, pcm: bool) -> ChannelCaps {
    ChannelCaps {
        name,
        chip: "YM2612",
        min_octave: 0,
        max_octave: 7,
        max_volume: 15,
        volume_resolution: 127,
        max_duty: 0,
        effects: if pcm { FM_PCM_EFFECTS } else { FM_EFFECTS },
        params: FM_PARAMS,
        pcm,
    }
}

static CHANNELS: [ChannelCaps; 10] = [
    fm("A", false),
    fm("B", false),
    fm("C", false),
    fm("D", false),
    fm("E", false),
    fm("F", true),
    psg_tone("G"),
    psg_tone("H"),
    psg_tone("I"),
    psg_noise("J"),
];

static TUNABLES: [Tunable; 1] = [Tunable { name: "GEN-DAC-RATE", min: 0, max: 3, default: 1 }];

pub struct Gen;

impl Target for Gen {
    fn name(&self) -> &'static str {
        "gen"
    }

    fn description(&self) -> &'static str {
        "Sega Genesis / Mega Drive"
    }

    fn channels(&self) -> &'static [ChannelCaps] {
        &CHANNELS
    }

    fn pcm(&self) -> Option<PcmSpec> {
        Some(PcmSpec { max_rate: 17500, bits: 8 })
    }

    fn pan_range(&self) -> Option<(i64, i64)> {
        Some((-1, 1))
    }

    fn tunables(&self) -> &'static [Tunable] {
        &TUNABLES
    }
}
