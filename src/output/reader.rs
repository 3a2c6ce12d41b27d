//! MMLB reader and parser

use super::{value, MAGIC, NO_LOOP, VERSION};
use crate::compiler::command::{disassemble, Command};
use crate::compiler::effects::{ApplyFreq, EffectKind};
use crate::compiler::list::{ParamList, ParamValue};
use crate::compiler::sample::PcmSample;
use crate::compiler::Metadata;
use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::io::Read;

/// A parsed MMLB file
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub version: u16,
    pub target: String,
    pub metadata: Metadata,
    pub callbacks: Vec<String>,
    pub effects: Vec<EffectRecord>,
    pub songs: Vec<SongRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectRecord {
    pub kind: EffectKind,
    pub id: u8,
    pub freq: ApplyFreq,
    pub refs: u16,
    pub list: ParamList,
    pub sample: Option<PcmSample>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SongRecord {
    pub number: u8,
    pub tunables: Vec<(String, i64)>,
    pub channels: Vec<StreamRecord>,
    pub patterns: Vec<StreamRecord>,
}

/// One encoded channel or pattern stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub name: String,
    /// Byte offset of the loop point
    pub loop_offset: Option<u32>,
    pub ticks: u32,
    pub bytes: Vec<u8>,
}

impl StreamRecord {
    /// Decode the stream; jump targets become record indices
    pub fn disassemble(&self) -> Result<Vec<Command>> {
        disassemble(&self.bytes).map_err(|e| Error::Format(format!("{}: {}", self.name, e)))
    }
}

/// Undo `--gzip` if the data starts with the gzip magic
pub fn decompress(data: Vec<u8>) -> Result<Vec<u8>> {
    if data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b {
        let mut decoder = GzDecoder::new(data.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(out)
    } else {
        Ok(data)
    }
}

/// MMLB reader
pub struct OutputReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> OutputReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let data = self.data;
        match data.get(self.pos..self.pos + len) {
            Some(bytes) => {
                self.pos += len;
                Ok(bytes)
            }
            None => Err(Error::Format(format!(
                "Unexpected end of data at offset {}",
                self.pos
            ))),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        Ok(self.read_u32_le()? as i32)
    }

    pub fn read_str(&mut self) -> Result<String> {
        let len = self.read_u16_le()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::Format(format!("Bad string at offset {}: {}", self.pos, e)))
    }

    /// Parse a whole file
    pub fn parse(&mut self) -> Result<Module> {
        if self.read_bytes(4)? != MAGIC {
            return Err(Error::Format("Invalid MMLB magic".into()));
        }
        let version = self.read_u16_le()?;
        if version != VERSION {
            return Err(Error::Format(format!("Unsupported MMLB version {}", version)));
        }
        let target = self.read_str()?;
        let metadata = Metadata {
            title: self.read_str()?,
            composer: self.read_str()?,
            programmer: self.read_str()?,
            game: self.read_str()?,
            album: self.read_str()?,
        };

        let count = self.read_u8()?;
        let callbacks = (0..count)
            .map(|_| self.read_str())
            .collect::<Result<Vec<_>>>()?;

        let count = self.read_u16_le()?;
        let effects = (0..count)
            .map(|_| self.parse_effect())
            .collect::<Result<Vec<_>>>()?;

        let count = self.read_u8()?;
        let songs = (0..count)
            .map(|_| self.parse_song())
            .collect::<Result<Vec<_>>>()?;

        if !self.is_eof() {
            return Err(Error::Format(format!(
                "Trailing data at offset {}",
                self.pos
            )));
        }

        Ok(Module {
            version,
            target,
            metadata,
            callbacks,
            effects,
            songs,
        })
    }

    fn parse_effect(&mut self) -> Result<EffectRecord> {
        let index = self.read_u8()?;
        let kind = EffectKind::from_index(index)
            .ok_or_else(|| Error::Format(format!("Unknown effect kind {}", index)))?;
        let id = self.read_u8()?;
        let freq = match self.read_u8()? {
            0 => ApplyFreq::EveryFrame,
            1 => ApplyFreq::EveryNote,
            other => return Err(Error::Format(format!("Bad effect frequency {}", other))),
        };
        let refs = self.read_u16_le()?;
        let main = self.read_u16_le()?;
        let looped = self.read_u16_le()?;
        let list = ParamList {
            main: (0..main)
                .map(|_| self.parse_value())
                .collect::<Result<_>>()?,
            looped: (0..looped)
                .map(|_| self.parse_value())
                .collect::<Result<_>>()?,
        };
        let sample = match self.read_u8()? {
            0 => None,
            _ => {
                let rate = self.read_u32_le()?;
                let bits = self.read_u8()?;
                let len = self.read_u32_le()? as usize;
                Some(PcmSample {
                    rate,
                    bits,
                    data: self.read_bytes(len)?.to_vec(),
                })
            }
        };
        Ok(EffectRecord {
            kind,
            id,
            freq,
            refs,
            list,
            sample,
        })
    }

    fn parse_value(&mut self) -> Result<ParamValue> {
        match self.read_u8()? {
            value::INT => Ok(ParamValue::Int(self.read_i32_le()? as i64)),
            value::STR => Ok(ParamValue::Str(self.read_str()?)),
            value::WAVE_REF => Ok(ParamValue::WaveRef(self.read_u8()? as u32)),
            tag => Err(Error::Format(format!("Bad value tag {}", tag))),
        }
    }

    fn parse_song(&mut self) -> Result<SongRecord> {
        let number = self.read_u8()?;

        let count = self.read_u8()?;
        let mut tunables = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = self.read_str()?;
            tunables.push((name, self.read_i32_le()? as i64));
        }

        let count = self.read_u8()?;
        let channels = (0..count)
            .map(|_| self.parse_stream())
            .collect::<Result<Vec<_>>>()?;
        let count = self.read_u16_le()?;
        let patterns = (0..count)
            .map(|_| self.parse_stream())
            .collect::<Result<Vec<_>>>()?;

        Ok(SongRecord {
            number,
            tunables,
            channels,
            patterns,
        })
    }

    fn parse_stream(&mut self) -> Result<StreamRecord> {
        let name = self.read_str()?;
        let loop_offset = match self.read_u32_le()? {
            NO_LOOP => None,
            offset => Some(offset),
        };
        let ticks = self.read_u32_le()?;
        let len = self.read_u32_le()? as usize;
        let bytes = self.read_bytes(len)?.to_vec();
        Ok(StreamRecord {
            name,
            loop_offset,
            ticks,
            bytes,
        })
    }
}

/// Read an MMLB file from disk, compressed or not
pub fn read_file(path: &std::path::Path) -> Result<Module> {
    let data = decompress(std::fs::read(path)?)?;
    OutputReader::new(&data).parse()
}
