//! JSON view of an MMLB file

use super::reader::{EffectRecord, Module, SongRecord, StreamRecord};
use crate::compiler::command::Command;
use crate::compiler::effects::ApplyFreq;
use crate::compiler::list::ParamList;
use crate::compiler::Metadata;
use crate::error::Result;
use serde::Serialize;
use std::collections::BTreeMap;

/// Top-level JSON structure
#[derive(Debug, Clone, Serialize)]
pub struct MmlbJson {
    pub version: u16,
    pub target: String,
    pub metadata: Metadata,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub callbacks: Vec<String>,
    pub effects: Vec<EffectJson>,
    pub songs: Vec<SongJson>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EffectJson {
    /// Definition name, e.g. `@EN1`
    pub name: String,
    pub freq: ApplyFreq,
    pub refs: u16,
    pub values: ParamList,
    /// Sample length in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SongJson {
    pub number: u8,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tunables: BTreeMap<String, i64>,
    pub channels: Vec<StreamJson>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<StreamJson>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamJson {
    pub name: String,
    pub ticks: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_offset: Option<u32>,
    /// Encoded size in bytes
    pub size: usize,
    pub commands: Vec<Command>,
}

impl MmlbJson {
    /// Build the view, disassembling every stream
    pub fn new(module: &Module) -> Result<Self> {
        Ok(Self {
            version: module.version,
            target: module.target.clone(),
            metadata: module.metadata.clone(),
            callbacks: module.callbacks.clone(),
            effects: module.effects.iter().map(EffectJson::from).collect(),
            songs: module
                .songs
                .iter()
                .map(SongJson::new)
                .collect::<Result<_>>()?,
        })
    }
}

impl From<&EffectRecord> for EffectJson {
    fn from(effect: &EffectRecord) -> Self {
        Self {
            name: format!("{}{}", effect.kind.prefix(), effect.id),
            freq: effect.freq,
            refs: effect.refs,
            values: effect.list.clone(),
            sample_len: effect.sample.as_ref().map(|s| s.data.len()),
            sample_rate: effect.sample.as_ref().map(|s| s.rate),
        }
    }
}

impl SongJson {
    fn new(song: &SongRecord) -> Result<Self> {
        Ok(Self {
            number: song.number,
            tunables: song.tunables.iter().cloned().collect(),
            channels: song
                .channels
                .iter()
                .map(StreamJson::new)
                .collect::<Result<_>>()?,
            patterns: song
                .patterns
                .iter()
                .map(StreamJson::new)
                .collect::<Result<_>>()?,
        })
    }
}

impl StreamJson {
    fn new(stream: &StreamRecord) -> Result<Self> {
        Ok(Self {
            name: stream.name.clone(),
            ticks: stream.ticks,
            loop_offset: stream.loop_offset,
            size: stream.bytes.len(),
            commands: stream.disassemble()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::output::reader::OutputReader;
    use crate::output::writer::to_bytes;

    #[test]
    fn test_json_view() {
        let mut compiler = Compiler::new("nes").unwrap();
        compiler
            .compile_str("test.mml", "#TITLE Demo\n@EN1 = {0 4 7}\nA EN1 c4 L d4\n")
            .unwrap();
        let bytes = to_bytes(&compiler, false).unwrap();
        let module = OutputReader::new(&bytes).parse().unwrap();
        let view = MmlbJson::new(&module).unwrap();

        assert_eq!(view.target, "nes");
        assert_eq!(view.metadata.title, "Demo");
        assert_eq!(view.effects[0].name, "@EN1");
        assert_eq!(view.effects[0].refs, 1);

        let a = &view.songs[0].channels[0];
        assert_eq!(a.name, "A");
        assert_eq!(a.ticks, 16);
        assert!(a.loop_offset.is_some());
        assert_eq!(a.commands.last(), Some(&Command::Jmp(3)));

        let text = serde_json::to_string(&view).unwrap();
        assert!(text.contains("\"target\":\"nes\""));
    }
}
