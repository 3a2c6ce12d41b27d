//! Target machine profiles
//!
//! A target describes the channels of a machine and the value ranges its
//! player accepts. The compiler only reads it; nothing here emits code.

pub mod at8;
pub mod c64;
pub mod cpc;
pub mod gbc;
pub mod gen;
pub mod nes;
pub mod pce;
pub mod sms;

use crate::compiler::command::Param;
use crate::compiler::effects::EffectKind;
use crate::error::{Error, Result};

/// Shape of an ADSR envelope definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdsrSpec {
    /// Number of values per definition
    pub len: usize,
    /// Largest value of each parameter
    pub max: i64,
}

/// Shape of a waveform table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveSpec {
    /// Samples per waveform
    pub len: usize,
    /// Largest sample value
    pub max: i64,
}

/// PCM playback format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmSpec {
    /// Highest playback rate in Hz
    pub max_rate: u32,
    /// Bits per output sample (unsigned)
    pub bits: u8,
}

/// Capabilities of one output channel
#[derive(Debug)]
pub struct ChannelCaps {
    /// Channel letter as written in MML
    pub name: &'static str,
    /// Sound chip driving the channel
    pub chip: &'static str,
    pub min_octave: i32,
    pub max_octave: i32,
    /// Largest `v` value
    pub max_volume: i32,
    /// Largest VOLSET operand the player understands
    pub volume_resolution: i32,
    /// Largest `@` duty value, 0 if the channel has no duty control
    pub max_duty: i32,
    /// Effect kinds selectable on this channel
    pub effects: &'static [EffectKind],
    /// Parameters settable on this channel
    pub params: &'static [Param],
    /// Channel can play PCM samples
    pub pcm: bool,
}

impl ChannelCaps {
    pub fn supports(&self, kind: EffectKind) -> bool {
        self.effects.contains(&kind)
    }

    pub fn supports_param(&self, param: Param) -> bool {
        self.params.contains(&param)
    }

    /// Map a `v` value onto the player's volume scale
    pub fn scale_volume(&self, volume: i32) -> u8 {
        if self.max_volume <= 0 {
            return 0;
        }
        let scaled = (2 * volume * self.volume_resolution + self.max_volume) / (2 * self.max_volume);
        scaled.clamp(0, 255) as u8
    }
}

/// A target specific `#` directive taking a number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tunable {
    pub name: &'static str,
    pub min: i64,
    pub max: i64,
    pub default: i64,
}

/// Machine profile trait
pub trait Target: Send + Sync {
    /// Short identifier used on the command line (e.g. "nes")
    fn name(&self) -> &'static str;

    /// Human readable machine name
    fn description(&self) -> &'static str;

    /// Physical channels in selection order
    fn channels(&self) -> &'static [ChannelCaps];

    /// Player updates per second
    fn update_rate(&self) -> u32 {
        60
    }

    fn max_tempo(&self) -> f64 {
        1000.0
    }

    fn max_loop_depth(&self) -> usize {
        8
    }

    fn adsr(&self) -> Option<AdsrSpec> {
        None
    }

    fn wave(&self) -> Option<WaveSpec> {
        None
    }

    fn pcm(&self) -> Option<PcmSpec> {
        None
    }

    /// Accepted `@PT` values
    fn pulse_width_range(&self) -> Option<(i64, i64)> {
        None
    }

    /// Largest `@FT` value
    fn filter_max(&self) -> Option<i64> {
        None
    }

    /// Accepted `@CS` values
    fn pan_range(&self) -> Option<(i64, i64)> {
        None
    }

    fn tunables(&self) -> &'static [Tunable] {
        &[]
    }

    fn channel(&self, name: &str) -> Option<&'static ChannelCaps> {
        self.channels().iter().find(|c| c.name == name)
    }

    fn is_channel_name(&self, c: u8) -> bool {
        self.channels().iter().any(|caps| caps.name.as_bytes() == [c])
    }

    /// True if any channel can select `kind`
    fn supports(&self, kind: EffectKind) -> bool {
        self.channels().iter().any(|c| c.supports(kind))
    }

    fn max_duty(&self) -> i32 {
        self.channels().iter().map(|c| c.max_duty).max().unwrap_or(0)
    }

    fn max_volume(&self) -> i32 {
        self.channels().iter().map(|c| c.max_volume).max().unwrap_or(0)
    }

    fn tunable(&self, name: &str) -> Option<&'static Tunable> {
        self.tunables().iter().find(|t| t.name == name)
    }
}

/// Create a target by name
pub fn create_target(name: &str) -> Result<Box<dyn Target>> {
    let target: Box<dyn Target> = match name.to_ascii_lowercase().as_str() {
        "sms" => Box::new(sms::Sms),
        "nes" => Box::new(nes::Nes),
        "gbc" | "gb" => Box::new(gbc::Gbc),
        "pce" => Box::new(pce::Pce),
        "cpc" => Box::new(cpc::Cpc),
        "gen" | "smd" => Box::new(gen::Gen),
        "at8" => Box::new(at8::At8),
        "c64" => Box::new(c64::C64),
        _ => return Err(Error::UnknownTarget(name.to_string())),
    };
    Ok(target)
}

/// All target names with their descriptions
pub fn list_targets() -> Vec<(&'static str, &'static str)> {
    ["sms", "nes", "gbc", "pce", "cpc", "gen", "at8", "c64"]
        .iter()
        .filter_map(|name| create_target(name).ok())
        .map(|t| (t.name(), t.description()))
        .collect()
}
