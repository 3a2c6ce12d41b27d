//! Effect definitions (`@EN1 = {...}` and friends)

use super::list::{ParamList, ParamValue};
use super::sample::PcmSample;
use crate::targets::Target;
use serde::Serialize;
use std::collections::BTreeMap;

/// First id handed out to inline `ADSR(...)` envelopes
pub const FIRST_IMPLICIT_ADSR: u32 = 128;

/// Largest id usable in a definition; ids are a single byte in MAC
pub const MAX_EFFECT_ID: u32 = 255;

/// Extra slot holding the apply frequency
pub const EXTRA_FREQ: u32 = 0;

/// Effect table kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum EffectKind {
    Duty,
    Volume,
    PulseWidth,
    Vibrato,
    Arpeggio,
    Pitch,
    Feedback,
    Filter,
    Modulation,
    Adsr,
    Waveform,
    WaveformMacro,
    Pan,
    Pcm,
}

impl EffectKind {
    pub const ALL: [EffectKind; 14] = [
        EffectKind::Duty,
        EffectKind::Volume,
        EffectKind::PulseWidth,
        EffectKind::Vibrato,
        EffectKind::Arpeggio,
        EffectKind::Pitch,
        EffectKind::Feedback,
        EffectKind::Filter,
        EffectKind::Modulation,
        EffectKind::Adsr,
        EffectKind::Waveform,
        EffectKind::WaveformMacro,
        EffectKind::Pan,
        EffectKind::Pcm,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Definition prefix, e.g. `@EN`
    pub fn prefix(self) -> &'static str {
        match self {
            EffectKind::Duty => "@",
            EffectKind::Volume => "@v",
            EffectKind::PulseWidth => "@PT",
            EffectKind::Vibrato => "@MP",
            EffectKind::Arpeggio => "@EN",
            EffectKind::Pitch => "@EP",
            EffectKind::Feedback => "@FB",
            EffectKind::Filter => "@FT",
            EffectKind::Modulation => "@MOD",
            EffectKind::Adsr => "@ADSR",
            EffectKind::Waveform => "@WT",
            EffectKind::WaveformMacro => "@WTM",
            EffectKind::Pan => "@CS",
            EffectKind::Pcm => "@XPCM",
        }
    }

    /// Selection command in the note stream, e.g. `EN`
    pub fn selector(self) -> &'static str {
        match self {
            EffectKind::Duty => "@",
            EffectKind::Volume => "@v",
            EffectKind::PulseWidth => "PT",
            EffectKind::Vibrato => "MP",
            EffectKind::Arpeggio => "EN",
            EffectKind::Pitch => "EP",
            EffectKind::Feedback => "FBM",
            EffectKind::Filter => "FT",
            EffectKind::Modulation => "MOD",
            EffectKind::Adsr => "ADSR",
            EffectKind::Waveform => "WT",
            EffectKind::WaveformMacro => "WTM",
            EffectKind::Pan => "CS",
            EffectKind::Pcm => "@",
        }
    }

    /// Kinds that may carry `EVERY-NOTE`/`EVERY-FRAME`
    pub fn has_frequency(self) -> bool {
        !matches!(
            self,
            EffectKind::Vibrato
                | EffectKind::Adsr
                | EffectKind::Waveform
                | EffectKind::Modulation
                | EffectKind::Pcm
        )
    }
}

/// When an effect steps to its next value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApplyFreq {
    EveryFrame,
    EveryNote,
}

impl ApplyFreq {
    fn to_extra(self) -> i64 {
        match self {
            ApplyFreq::EveryFrame => 0,
            ApplyFreq::EveryNote => 1,
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum EffectError {
    #[error("Redefinition of {prefix}{id}")]
    Redefined { prefix: &'static str, id: u32 },

    #[error("Undefined effect: {selector}{id}")]
    Undefined { selector: &'static str, id: u32 },

    #[error("Bad id for {prefix}: {id} (valid range 0..{max})")]
    BadId { prefix: &'static str, id: i64, max: u32 },

    #[error("Value out of range in {prefix}: {value} (valid range {min}..{max})")]
    OutOfRange { prefix: &'static str, value: i64, min: i64, max: i64 },

    #[error("{prefix} takes {expected} values, got {found}")]
    BadLength { prefix: &'static str, expected: String, found: usize },

    #[error("{0} does not support a loop part")]
    UnexpectedLoop(&'static str),

    #[error("Expected a number in {0}")]
    NotANumber(&'static str),

    #[error("Undefined waveform referenced in @WTM: {0}")]
    UndefinedWave(u32),

    #[error("Too many inline ADSR envelopes")]
    TooManyImplicit,

    #[error("{0}")]
    Pcm(String),
}

/// One defined effect
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Effect {
    pub id: u32,
    pub list: ParamList,
    refs: u32,
    extra: BTreeMap<u32, i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<PcmSample>,
}

impl Effect {
    fn new(id: u32, list: ParamList) -> Self {
        Self {
            id,
            list,
            refs: 0,
            extra: BTreeMap::new(),
            sample: None,
        }
    }

    pub fn ref_count(&self) -> u32 {
        self.refs
    }

    pub fn freq(&self) -> ApplyFreq {
        match self.extra.get(&EXTRA_FREQ) {
            Some(1) => ApplyFreq::EveryNote,
            _ => ApplyFreq::EveryFrame,
        }
    }
}

/// Store for one effect kind, in definition order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectTable {
    kind: EffectKind,
    entries: Vec<Effect>,
}

impl EffectTable {
    pub fn new(kind: EffectKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
        }
    }

    pub fn kind(&self) -> EffectKind {
        self.kind
    }

    /// Position of `id` in definition order
    pub fn find_key(&self, id: u32) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    pub fn append(&mut self, id: u32, list: ParamList) -> Result<usize, EffectError> {
        if self.find_key(id).is_some() {
            return Err(EffectError::Redefined {
                prefix: self.kind.prefix(),
                id,
            });
        }
        self.entries.push(Effect::new(id, list));
        Ok(self.entries.len() - 1)
    }

    /// Id of an entry with exactly this content
    pub fn get_key_for(&self, list: &ParamList) -> Option<u32> {
        self.entries.iter().find(|e| &e.list == list).map(|e| e.id)
    }

    pub fn get(&self, id: u32) -> Option<&Effect> {
        self.entries.iter().find(|e| e.id == id)
    }

    fn get_mut(&mut self, id: u32) -> Result<&mut Effect, EffectError> {
        let selector = self.kind.selector();
        self.entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(EffectError::Undefined { selector, id })
    }

    pub fn put_extra_int(&mut self, id: u32, slot: u32, value: i64) -> Result<(), EffectError> {
        self.get_mut(id)?.extra.insert(slot, value);
        Ok(())
    }

    pub fn get_extra_int(&self, id: u32, slot: u32) -> Option<i64> {
        self.get(id).and_then(|e| e.extra.get(&slot).copied())
    }

    pub fn set_freq(&mut self, id: u32, freq: ApplyFreq) -> Result<(), EffectError> {
        self.put_extra_int(id, EXTRA_FREQ, freq.to_extra())
    }

    pub fn set_sample(&mut self, id: u32, sample: PcmSample) -> Result<(), EffectError> {
        self.get_mut(id)?.sample = Some(sample);
        Ok(())
    }

    /// Count one more use of `id`
    pub fn add_ref(&mut self, id: u32) -> Result<(), EffectError> {
        self.get_mut(id)?.refs += 1;
        Ok(())
    }

    pub fn ref_count(&self, id: u32) -> u32 {
        self.get(id).map_or(0, Effect::ref_count)
    }

    /// True if `id` is undefined or has no values
    pub fn is_empty(&self, id: u32) -> bool {
        self.get(id).map_or(true, |e| e.list.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Effect> {
        self.entries.iter()
    }
}

/// All effect tables of a compilation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectTables {
    tables: Vec<EffectTable>,
    #[serde(skip)]
    next_implicit_adsr: u32,
}

impl Default for EffectTables {
    fn default() -> Self {
        Self {
            tables: EffectKind::ALL.iter().map(|&k| EffectTable::new(k)).collect(),
            next_implicit_adsr: FIRST_IMPLICIT_ADSR,
        }
    }
}

impl EffectTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, kind: EffectKind) -> &EffectTable {
        &self.tables[kind.index() as usize]
    }

    pub fn table_mut(&mut self, kind: EffectKind) -> &mut EffectTable {
        &mut self.tables[kind.index() as usize]
    }

    pub fn is_defined(&self, kind: EffectKind, id: u32) -> bool {
        self.table(kind).find_key(id).is_some()
    }

    /// Tables with at least one entry
    pub fn iter(&self) -> impl Iterator<Item = &EffectTable> {
        self.tables.iter().filter(|t| t.len() > 0)
    }

    /// Id for an inline ADSR, reusing any envelope with the same values
    pub fn define_implicit_adsr(&mut self, list: ParamList) -> Result<u32, EffectError> {
        if let Some(id) = self.table(EffectKind::Adsr).get_key_for(&list) {
            return Ok(id);
        }
        if self.next_implicit_adsr > MAX_EFFECT_ID {
            return Err(EffectError::TooManyImplicit);
        }
        let id = self.next_implicit_adsr;
        self.next_implicit_adsr += 1;
        self.table_mut(EffectKind::Adsr).append(id, list)?;
        Ok(id)
    }
}

/// Largest id accepted in an explicit definition of `kind`
pub fn max_explicit_id(kind: EffectKind) -> u32 {
    match kind {
        EffectKind::Adsr => FIRST_IMPLICIT_ADSR - 1,
        _ => MAX_EFFECT_ID,
    }
}

fn check_ints(prefix: &'static str, list: &ParamList, min: i64, max: i64) -> Result<(), EffectError> {
    for v in list.values() {
        match *v {
            ParamValue::Int(value) if value < min || value > max => {
                return Err(EffectError::OutOfRange { prefix, value, min, max });
            }
            ParamValue::Int(_) => {}
            _ => return Err(EffectError::NotANumber(prefix)),
        }
    }
    Ok(())
}

fn check_no_loop(prefix: &'static str, list: &ParamList) -> Result<(), EffectError> {
    if list.has_loop() {
        return Err(EffectError::UnexpectedLoop(prefix));
    }
    Ok(())
}

/// Check a definition against the target and normalize it
///
/// Waveforms are padded or truncated to the target's length and `WT<n>`
/// references are resolved to plain ids. Returns the warnings produced.
/// PCM definitions are only shape checked; decoding happens in the sample
/// loader.
pub fn validate_effect(
    kind: EffectKind,
    list: &mut ParamList,
    target: &dyn Target,
    tables: &EffectTables,
) -> Result<Vec<String>, EffectError> {
    let prefix = kind.prefix();
    let mut warnings = Vec::new();

    if !target.supports(kind) {
        warnings.push(format!("{} is not supported by target {}", prefix, target.name()));
        return Ok(warnings);
    }

    match kind {
        EffectKind::Duty => check_ints(prefix, list, 0, target.max_duty() as i64)?,
        EffectKind::Volume => check_ints(prefix, list, 0, target.max_volume() as i64)?,
        EffectKind::PulseWidth => {
            let (min, max) = target.pulse_width_range().unwrap_or((0, 0));
            check_ints(prefix, list, min, max)?;
        }
        EffectKind::Vibrato => {
            check_no_loop(prefix, list)?;
            let values = list.main_ints().ok_or(EffectError::NotANumber(prefix))?;
            if values.len() != 3 {
                return Err(EffectError::BadLength {
                    prefix,
                    expected: "3".into(),
                    found: values.len(),
                });
            }
            for (value, (min, max)) in values.into_iter().zip([(0, 127), (1, 127), (0, 63)]) {
                if value < min || value > max {
                    return Err(EffectError::OutOfRange { prefix, value, min, max });
                }
            }
        }
        EffectKind::Arpeggio | EffectKind::Pitch => check_ints(prefix, list, -128, 127)?,
        EffectKind::Feedback => check_ints(prefix, list, 0, 7)?,
        EffectKind::Filter => check_ints(prefix, list, 0, target.filter_max().unwrap_or(0))?,
        EffectKind::Modulation => {
            check_no_loop(prefix, list)?;
            if !(2..=4).contains(&list.main.len()) {
                return Err(EffectError::BadLength {
                    prefix,
                    expected: "2 to 4".into(),
                    found: list.main.len(),
                });
            }
            check_ints(prefix, list, 0, 255)?;
        }
        EffectKind::Adsr => {
            check_no_loop(prefix, list)?;
            if let Some(spec) = target.adsr() {
                if list.main.len() != spec.len {
                    return Err(EffectError::BadLength {
                        prefix,
                        expected: spec.len.to_string(),
                        found: list.main.len(),
                    });
                }
                check_ints(prefix, list, 0, spec.max)?;
            }
        }
        EffectKind::Waveform => {
            check_no_loop(prefix, list)?;
            if let Some(spec) = target.wave() {
                check_ints(prefix, list, 0, spec.max)?;
                let found = list.main.len();
                if found == 0 {
                    return Err(EffectError::BadLength {
                        prefix,
                        expected: spec.len.to_string(),
                        found,
                    });
                }
                if found < spec.len {
                    warnings.push(format!(
                        "{} has {} samples, padding to {}",
                        prefix, found, spec.len
                    ));
                    let last = list.main[found - 1].clone();
                    list.main.resize(spec.len, last);
                } else if found > spec.len {
                    warnings.push(format!(
                        "{} has {} samples, truncating to {}",
                        prefix, found, spec.len
                    ));
                    list.main.truncate(spec.len);
                }
            }
        }
        EffectKind::WaveformMacro => {
            for v in list.main.iter_mut().chain(list.looped.iter_mut()) {
                let id = match *v {
                    ParamValue::WaveRef(id) => id,
                    ParamValue::Int(n) if n >= 0 => n as u32,
                    _ => return Err(EffectError::NotANumber(prefix)),
                };
                if !tables.is_defined(EffectKind::Waveform, id) {
                    return Err(EffectError::UndefinedWave(id));
                }
                *v = ParamValue::Int(id as i64);
            }
        }
        EffectKind::Pan => {
            let (min, max) = target.pan_range().unwrap_or((0, 0));
            check_ints(prefix, list, min, max)?;
        }
        EffectKind::Pcm => {
            check_no_loop(prefix, list)?;
            let shape_ok = matches!(list.main.first(), Some(ParamValue::Str(_)))
                && (2..=3).contains(&list.main.len())
                && list.main[1..].iter().all(|v| v.as_int().is_some());
            if !shape_ok {
                return Err(EffectError::Pcm(
                    "@XPCM expects {\"file\", rate [, volume]}".into(),
                ));
            }
        }
    }

    Ok(warnings)
}

/// Negate arpeggio offsets for `#EN-REV 1`
pub fn reverse_arpeggio(list: &mut ParamList) {
    for v in list.main.iter_mut().chain(list.looped.iter_mut()) {
        if let ParamValue::Int(n) = v {
            *n = -*n;
        }
    }
}
