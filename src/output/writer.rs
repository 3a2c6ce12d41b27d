//! MMLB writer

use super::{value, MAGIC, NO_LOOP, VERSION};
use crate::compiler::channel::Channel;
use crate::compiler::command::CommandBuffer;
use crate::compiler::effects::{ApplyFreq, Effect, EffectTable};
use crate::compiler::list::ParamValue;
use crate::compiler::song::{Pattern, Song};
use crate::compiler::Compiler;
use crate::error::{Error, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::path::Path;

/// Builds an MMLB image in memory
#[derive(Debug, Default)]
pub struct OutputWriter {
    data: Vec<u8>,
}

fn too_many(what: &str, n: usize) -> Error {
    Error::Format(format!("Too many {}: {}", what, n))
}

impl OutputWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_data(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    pub fn write_str(&mut self, s: &str) -> Result<()> {
        let len = u16::try_from(s.len()).map_err(|_| too_many("string bytes", s.len()))?;
        self.write_u16(len);
        self.write_data(s.as_bytes());
        Ok(())
    }

    fn write_count_u8(&mut self, what: &str, n: usize) -> Result<()> {
        let n = u8::try_from(n).map_err(|_| too_many(what, n))?;
        self.write_u8(n);
        Ok(())
    }

    fn write_count_u16(&mut self, what: &str, n: usize) -> Result<()> {
        let n = u16::try_from(n).map_err(|_| too_many(what, n))?;
        self.write_u16(n);
        Ok(())
    }

    /// Serialize everything a compilation produced
    pub fn write_compiler(&mut self, compiler: &Compiler) -> Result<()> {
        self.write_data(MAGIC);
        self.write_u16(VERSION);
        self.write_str(compiler.target().name())?;

        let meta = compiler.metadata();
        for field in [&meta.title, &meta.composer, &meta.programmer, &meta.game, &meta.album] {
            self.write_str(field)?;
        }

        self.write_count_u8("callbacks", compiler.callbacks().len())?;
        for callback in compiler.callbacks() {
            self.write_str(&callback.name)?;
        }

        let tables: Vec<&EffectTable> = compiler.effects().iter().collect();
        let count: usize = tables.iter().map(|t| t.len()).sum();
        self.write_count_u16("effects", count)?;
        for table in tables {
            for effect in table.iter() {
                self.write_effect(table, effect)?;
            }
        }

        self.write_count_u8("songs", compiler.songs().len())?;
        for song in compiler.songs() {
            self.write_song(song)?;
        }
        Ok(())
    }

    fn write_effect(&mut self, table: &EffectTable, effect: &Effect) -> Result<()> {
        self.write_u8(table.kind().index());
        self.write_u8(effect.id as u8);
        self.write_u8(match effect.freq() {
            ApplyFreq::EveryFrame => 0,
            ApplyFreq::EveryNote => 1,
        });
        self.write_u16(effect.ref_count().min(u16::MAX as u32) as u16);
        self.write_count_u16("list values", effect.list.main.len())?;
        self.write_count_u16("list values", effect.list.looped.len())?;
        for v in effect.list.values() {
            match v {
                ParamValue::Int(n) => {
                    let n = i32::try_from(*n)
                        .map_err(|_| Error::Format(format!("List value out of range: {}", n)))?;
                    self.write_u8(value::INT);
                    self.write_i32(n);
                }
                ParamValue::Str(s) => {
                    self.write_u8(value::STR);
                    self.write_str(s)?;
                }
                ParamValue::WaveRef(id) => {
                    self.write_u8(value::WAVE_REF);
                    self.write_u8(*id as u8);
                }
            }
        }
        match &effect.sample {
            Some(sample) => {
                self.write_u8(1);
                self.write_u32(sample.rate);
                self.write_u8(sample.bits);
                self.write_u32(sample.data.len() as u32);
                self.write_data(&sample.data);
            }
            None => self.write_u8(0),
        }
        Ok(())
    }

    fn write_song(&mut self, song: &Song) -> Result<()> {
        self.write_u8(song.number() as u8);
        self.write_count_u8("tunables", song.tunables().len())?;
        for (name, &v) in song.tunables() {
            self.write_str(name)?;
            self.write_i32(v as i32);
        }

        self.write_count_u8("channels", song.channels().len())?;
        for channel in song.channels() {
            self.write_channel(channel)?;
        }

        self.write_count_u16("patterns", song.patterns().len())?;
        for pattern in song.patterns() {
            self.write_pattern(pattern)?;
        }
        Ok(())
    }

    fn write_channel(&mut self, channel: &Channel) -> Result<()> {
        let buffer = channel.buffer();
        let loop_offset = match channel.loop_point() {
            Some(lp) => buffer.byte_offsets()[lp.index] as u32,
            None => NO_LOOP,
        };
        self.write_stream(channel.name(), loop_offset, channel.ticks(), buffer)
    }

    fn write_pattern(&mut self, pattern: &Pattern) -> Result<()> {
        self.write_stream(&pattern.name, NO_LOOP, pattern.ticks, &pattern.commands)
    }

    fn write_stream(
        &mut self,
        name: &str,
        loop_offset: u32,
        ticks: u64,
        buffer: &CommandBuffer,
    ) -> Result<()> {
        let bytes = buffer
            .encode()
            .map_err(|e| Error::Format(format!("{}: {}", name, e)))?;
        self.write_str(name)?;
        self.write_u32(loop_offset);
        self.write_u32(ticks.min(u32::MAX as u64) as u32);
        self.write_u32(bytes.len() as u32);
        self.write_data(&bytes);
        Ok(())
    }

    /// Current size of the image
    pub fn position(&self) -> usize {
        self.data.len()
    }

    /// The finished image, gzip compressed if requested
    pub fn finish(self, gzip: bool) -> Result<Vec<u8>> {
        if !gzip {
            return Ok(self.data);
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&self.data)?;
        Ok(encoder.finish()?)
    }
}

/// Serialize a finished compilation
pub fn to_bytes(compiler: &Compiler, gzip: bool) -> Result<Vec<u8>> {
    let mut writer = OutputWriter::new();
    writer.write_compiler(compiler)?;
    writer.finish(gzip)
}

pub fn write_file(path: &Path, compiler: &Compiler, gzip: bool) -> Result<()> {
    let data = to_bytes(compiler, gzip)?;
    std::fs::write(path, data)?;
    Ok(())
}
