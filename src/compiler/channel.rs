//! Channel state management
//!
//! Every output channel (and the pattern recording channel) owns one
//! [`Channel`]. The driver feeds it notes and settings; the channel keeps
//! the musical state, emits [`Command`] records and keeps the tick and
//! frame totals the player will see.

use super::command::{CallbackFreq, Command, CommandBuffer, CutoffMode, Fixup, NoteKind, Param};
use super::effects::EffectKind;
use crate::targets::ChannelCaps;
use std::collections::BTreeSet;

/// Ticks in a whole note
pub const TICKS_PER_WHOLE: u32 = 32;

/// Ticks in a quarter note (one beat)
pub const TICKS_PER_BEAT: u32 = TICKS_PER_WHOLE / 4;

pub const DEFAULT_OCTAVE: i32 = 4;
pub const DEFAULT_TEMPO: f64 = 120.0;

/// Name of the pattern recording channel
pub const PATTERN_CHANNEL: &str = "Pattern";

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ChannelError {
    #[error("Octave out of range: {octave} (valid range {min}..{max})")]
    OctaveOutOfRange { octave: i32, min: i32, max: i32 },

    #[error("Bad note length: {0}")]
    BadLength(i64),

    #[error("Bad tempo: {0}")]
    BadTempo(f64),

    #[error("Bad volume: {0}")]
    BadVolume(i64),

    #[error("Bad cutoff: {0} (valid range -15..15)")]
    BadCutoff(i64),

    #[error("Bad {name} value: {value} (valid range {min}..{max})")]
    BadParam { name: &'static str, value: i64, min: i64, max: i64 },

    #[error("{0} requires a preceding note")]
    NoPendingNote(&'static str),

    #[error("Bad note: slur requires the same note")]
    BadNote,

    #[error("Cannot mix '&' and '^' in one note")]
    MixedTieSlur,

    #[error("Note is too short to be dotted")]
    BadDot,

    #[error("Note is too long: {0} ticks")]
    NoteTooLong(u32),

    #[error("Loops nested too deeply (max {0})")]
    LoopTooDeep(usize),

    #[error("Loops are not allowed inside tuples")]
    LoopInTuple,

    #[error("Loop end without matching '[' on channel {0}")]
    UnmatchedLoopEnd(String),

    #[error("Loop skip without matching '[' on channel {0}")]
    UnmatchedSkip(String),

    #[error("Only one '|' allowed per loop")]
    DoubleSkip,

    #[error("Bad loop count: {count} (must be at least {min})")]
    BadLoopCount { count: i64, min: i64 },

    #[error("Nested tuples are not allowed")]
    NestedTuple,

    #[error("Tuple end without matching '{{'")]
    UnmatchedTupleEnd,

    #[error("Empty tuple")]
    EmptyTuple,

    #[error("Tuple is too short for {notes} notes: {ticks} ticks")]
    TupleTooShort { notes: usize, ticks: u32 },

    #[error("Loop point not allowed inside a loop")]
    LoopPointInLoop,

    #[error("Loop point not allowed inside a tuple")]
    LoopPointInTuple,

    #[error("Loop point not allowed inside a pattern")]
    LoopPointInPattern,

    #[error("Pattern calls are not allowed inside tuples")]
    PatternInTuple,

    #[error("Unterminated loop on channel {0}")]
    UnterminatedLoop(String),

    #[error("Unterminated tuple on channel {0}")]
    UnterminatedTuple(String),
}

pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

/// Net octave change of a recorded pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum OctaveEffect {
    /// Pattern ends on this octave
    Absolute(i32),
    /// Pattern shifts the octave by this much
    Relative(i32),
}

/// Song loop point set by `L`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopPoint {
    /// Record index the final JMP returns to
    pub index: usize,
    pub ticks: u64,
    pub frames: f64,
}

/// Octave counters, compared between loop boundaries
#[derive(Debug, Clone, Copy, PartialEq)]
struct OctaveMark {
    octave: i32,
    /// Absolute octave settings so far
    absolute: u32,
    /// Sum of relative changes so far
    relative: i32,
}

/// One open `[` ... `]`
#[derive(Debug, Clone)]
pub struct LoopStackElem {
    count: Fixup,
    /// Record index the DJNZ jumps back to
    body: usize,
    ticks: u64,
    frames: f64,
    start: OctaveMark,
    skip: Option<LoopSkip>,
}

#[derive(Debug, Clone)]
struct LoopSkip {
    jump: Fixup,
    ticks: u64,
    frames: f64,
    mark: OctaveMark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Join {
    Tie,
    Slur,
}

#[derive(Debug, Clone, Copy)]
struct PendingNote {
    kind: NoteKind,
    ticks: u32,
    /// Duration added last, halved by a dot
    last: u32,
    join: Option<Join>,
}

#[derive(Debug, Clone)]
pub struct Channel {
    name: String,
    caps: &'static ChannelCaps,
    update_rate: u32,
    buffer: CommandBuffer,
    /// Commands apply to this channel
    pub active: bool,
    octave: i32,
    pending_absolute: bool,
    pending_relative: i32,
    /// The player's octave is known to match ours
    octave_known: bool,
    marks: OctaveMark,
    length: u32,
    tempo: f64,
    volume: i32,
    cutoff: Option<(CutoffMode, u8)>,
    note: Option<PendingNote>,
    loops: Vec<LoopStackElem>,
    tuple: Option<Vec<Command>>,
    loop_point: Option<LoopPoint>,
    ticks: u64,
    frames: f64,
    used: BTreeSet<EffectKind>,
    has_note: bool,
}

impl Channel {
    pub fn new(name: &str, caps: &'static ChannelCaps, update_rate: u32) -> Self {
        let octave = DEFAULT_OCTAVE.clamp(caps.min_octave, caps.max_octave);
        Self {
            name: name.to_string(),
            caps,
            update_rate,
            buffer: CommandBuffer::new(),
            active: false,
            octave,
            pending_absolute: false,
            pending_relative: 0,
            octave_known: false,
            marks: OctaveMark {
                octave,
                absolute: 0,
                relative: 0,
            },
            length: TICKS_PER_BEAT,
            tempo: DEFAULT_TEMPO,
            volume: caps.max_volume,
            cutoff: None,
            note: None,
            loops: Vec::new(),
            tuple: None,
            loop_point: None,
            ticks: 0,
            frames: 0.0,
            used: BTreeSet::new(),
            has_note: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn caps(&self) -> &'static ChannelCaps {
        self.caps
    }

    pub fn is_pattern(&self) -> bool {
        self.name == PATTERN_CHANNEL
    }

    pub fn buffer(&self) -> &CommandBuffer {
        &self.buffer
    }

    pub fn commands(&self) -> &[Command] {
        self.buffer.commands()
    }

    pub fn octave(&self) -> i32 {
        self.octave
    }

    /// Default note duration in ticks
    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    pub fn volume(&self) -> i32 {
        self.volume
    }

    pub fn cutoff(&self) -> Option<(CutoffMode, u8)> {
        self.cutoff
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn frames(&self) -> f64 {
        self.frames
    }

    pub fn loop_point(&self) -> Option<LoopPoint> {
        self.loop_point
    }

    pub fn loop_depth(&self) -> usize {
        self.loops.len()
    }

    pub fn in_tuple(&self) -> bool {
        self.tuple.is_some()
    }

    pub fn has_pending_note(&self) -> bool {
        self.note.is_some()
    }

    pub fn has_note(&self) -> bool {
        self.has_note
    }

    /// Effect kinds selected on this channel so far
    pub fn used_effects(&self) -> &BTreeSet<EffectKind> {
        &self.used
    }

    fn frames_for(&self, ticks: u64) -> f64 {
        ticks as f64 * self.update_rate as f64 * 60.0 / (self.tempo * TICKS_PER_BEAT as f64)
    }

    fn advance(&mut self, ticks: u64) {
        self.ticks += ticks;
        self.frames += self.frames_for(ticks);
    }

    /// Append a command, or buffer it while a tuple is open
    pub fn add_cmd(&mut self, cmd: Command) {
        if cmd.is_note() {
            self.has_note = true;
        }
        match self.tuple.as_mut() {
            Some(tuple) => tuple.push(cmd),
            None => {
                self.buffer.push(cmd);
            }
        }
    }

    fn octave_command(&mut self, force: bool) -> Option<Command> {
        let cmd = if self.pending_absolute || force {
            if !self.pending_absolute {
                // The forced value pins the octave as an explicit `o` would
                self.marks.absolute += 1;
            }
            Some(Command::Octave(self.octave.max(0) as u8))
        } else if self.pending_relative > 0 {
            Some(Command::OctaveUp(self.pending_relative as u8))
        } else if self.pending_relative < 0 {
            Some(Command::OctaveDown(self.pending_relative.unsigned_abs() as u8))
        } else {
            None
        };
        self.pending_absolute = false;
        self.pending_relative = 0;
        cmd
    }

    /// Emit a pending octave change without a note
    pub fn flush_octave(&mut self) {
        if let Some(cmd) = self.octave_command(false) {
            self.add_cmd(cmd);
            self.octave_known = true;
        }
    }

    /// Flush the pending note, preceded by at most one octave change
    pub fn write_note(&mut self, force_octave: bool) -> ChannelResult<()> {
        let Some(note) = self.note.take() else {
            return Ok(());
        };
        if note.ticks > u16::MAX as u32 {
            return Err(ChannelError::NoteTooLong(note.ticks));
        }
        if note.kind.is_pitch() {
            let force = force_octave || !self.octave_known;
            if let Some(cmd) = self.octave_command(force) {
                self.add_cmd(cmd);
            }
            self.octave_known = true;
        }
        self.add_cmd(Command::Note {
            note: note.kind,
            ticks: note.ticks as u16,
        });
        if self.tuple.is_none() {
            self.advance(note.ticks as u64);
        }
        Ok(())
    }

    /// Start a note, or extend the pending one when slurring
    pub fn start_note(&mut self, kind: NoteKind, ticks: u32) -> ChannelResult<()> {
        if let Some(note) = self.note.as_mut() {
            if note.join == Some(Join::Slur) && note.kind == kind {
                note.ticks += ticks;
                note.last = ticks;
                return Ok(());
            }
        }
        self.write_note(false)?;
        self.note = Some(PendingNote {
            kind,
            ticks,
            last: ticks,
            join: None,
        });
        Ok(())
    }

    /// `^`: extend the pending note
    pub fn tie(&mut self, ticks: u32) -> ChannelResult<()> {
        let note = self.note.as_mut().ok_or(ChannelError::NoPendingNote("^"))?;
        if note.join == Some(Join::Slur) {
            return Err(ChannelError::MixedTieSlur);
        }
        note.join = Some(Join::Tie);
        note.ticks += ticks;
        note.last = ticks;
        Ok(())
    }

    /// `&`: extend the pending note with a note of the same pitch
    pub fn slur(&mut self, kind: NoteKind, ticks: u32) -> ChannelResult<()> {
        let note = self.note.as_mut().ok_or(ChannelError::NoPendingNote("&"))?;
        if note.join == Some(Join::Tie) {
            return Err(ChannelError::MixedTieSlur);
        }
        if note.kind != kind {
            return Err(ChannelError::BadNote);
        }
        note.join = Some(Join::Slur);
        note.ticks += ticks;
        note.last = ticks;
        Ok(())
    }

    /// `.`: add half of the last added duration
    pub fn dot(&mut self) -> ChannelResult<()> {
        let note = self.note.as_mut().ok_or(ChannelError::NoPendingNote("."))?;
        let half = note.last / 2;
        if half == 0 {
            return Err(ChannelError::BadDot);
        }
        note.ticks += half;
        note.last = half;
        Ok(())
    }

    pub fn set_octave(&mut self, octave: i32) -> ChannelResult<()> {
        self.check_octave(octave)?;
        self.write_note(false)?;
        self.octave = octave;
        self.pending_absolute = true;
        self.pending_relative = 0;
        self.marks.absolute += 1;
        Ok(())
    }

    pub fn shift_octave(&mut self, delta: i32) -> ChannelResult<()> {
        let octave = self.octave + delta;
        if !self.is_pattern() {
            self.check_octave(octave)?;
        }
        self.write_note(false)?;
        self.octave = octave;
        if !self.pending_absolute {
            self.pending_relative += delta;
        }
        self.marks.relative += delta;
        Ok(())
    }

    fn check_octave(&self, octave: i32) -> ChannelResult<()> {
        if octave < self.caps.min_octave || octave > self.caps.max_octave {
            return Err(ChannelError::OctaveOutOfRange {
                octave,
                min: self.caps.min_octave,
                max: self.caps.max_octave,
            });
        }
        Ok(())
    }

    /// Set the default length from a note value (`l8`)
    pub fn set_length(&mut self, value: i64) -> ChannelResult<()> {
        self.length = note_ticks(value)?;
        Ok(())
    }

    /// Set the default length in ticks (`k`)
    pub fn set_length_ticks(&mut self, ticks: i64) -> ChannelResult<()> {
        if !(1..=u16::MAX as i64).contains(&ticks) {
            return Err(ChannelError::BadLength(ticks));
        }
        self.length = ticks as u32;
        Ok(())
    }

    pub fn set_tempo(&mut self, tempo: f64, max: f64) -> ChannelResult<()> {
        if !(1.0..=max).contains(&tempo) {
            return Err(ChannelError::BadTempo(tempo));
        }
        self.write_note(false)?;
        self.tempo = tempo;
        self.add_cmd(Command::Tempo(tempo.round() as u16));
        Ok(())
    }

    pub fn set_volume(&mut self, volume: i64) -> ChannelResult<()> {
        if volume < 0 || volume > self.caps.max_volume as i64 {
            return Err(ChannelError::BadVolume(volume));
        }
        self.write_note(false)?;
        self.volume = volume as i32;
        let scaled = self.caps.scale_volume(self.volume);
        self.add_cmd(Command::VolSet(scaled));
        Ok(())
    }

    /// `v+n` / `v-n`: resolved now, emitted as an absolute volume
    pub fn adjust_volume(&mut self, delta: i64) -> ChannelResult<()> {
        self.set_volume(self.volume as i64 + delta)
    }

    /// `v++n` / `v--n`: applied by the player
    pub fn step_volume(&mut self, delta: i64) -> ChannelResult<()> {
        let max = self.caps.max_volume as i64;
        if delta == 0 || delta.abs() > max {
            return Err(ChannelError::BadVolume(delta));
        }
        self.write_note(false)?;
        self.volume = (self.volume as i64 + delta).clamp(0, max) as i32;
        let step = delta.unsigned_abs() as u8;
        self.add_cmd(if delta > 0 {
            Command::VolUp(step)
        } else {
            Command::VolDown(step)
        });
        Ok(())
    }

    /// `q`: positive values key off before the note ends, negative after it starts
    pub fn set_cutoff(&mut self, value: i64) -> ChannelResult<()> {
        if !(-15..=15).contains(&value) {
            return Err(ChannelError::BadCutoff(value));
        }
        self.write_note(false)?;
        let cutoff = if value < 0 {
            (CutoffMode::FromStart, value.unsigned_abs() as u8)
        } else {
            (CutoffMode::FromEnd, value as u8)
        };
        self.cutoff = Some(cutoff);
        self.add_cmd(Command::Cutoff {
            mode: cutoff.0,
            value: cutoff.1,
        });
        Ok(())
    }

    pub fn set_param(&mut self, param: Param, value: i64) -> ChannelResult<()> {
        let (min, max) = param_range(param, self.caps);
        if value < min || value > max {
            return Err(ChannelError::BadParam {
                name: param.mnemonic(),
                value,
                min,
                max,
            });
        }
        self.write_note(false)?;
        self.add_cmd(Command::Param {
            param,
            value: value as i16,
        });
        Ok(())
    }

    pub fn select_effect(&mut self, kind: EffectKind, id: u32) -> ChannelResult<()> {
        self.write_note(false)?;
        self.used.insert(kind);
        self.add_cmd(Command::Mac { kind, id: id as u8 });
        Ok(())
    }

    pub fn disable_effect(&mut self, kind: EffectKind) -> ChannelResult<()> {
        self.write_note(false)?;
        self.add_cmd(Command::MacOff(kind));
        Ok(())
    }

    pub fn write_register(&mut self, port: Option<u8>, addr: u16, value: u8) -> ChannelResult<()> {
        self.write_note(false)?;
        self.add_cmd(Command::Write { port, addr, value });
        Ok(())
    }

    pub fn callback(&mut self, index: u8, freq: CallbackFreq) -> ChannelResult<()> {
        self.write_note(false)?;
        self.add_cmd(Command::Callback { index, freq });
        Ok(())
    }

    pub fn open_tuple(&mut self) -> ChannelResult<()> {
        if self.tuple.is_some() {
            return Err(ChannelError::NestedTuple);
        }
        self.write_note(false)?;
        self.tuple = Some(Vec::new());
        Ok(())
    }

    /// Close the tuple, dividing `ticks` evenly among its notes
    pub fn write_tuple(&mut self, ticks: u32) -> ChannelResult<()> {
        if self.tuple.is_none() {
            return Err(ChannelError::UnmatchedTupleEnd);
        }
        self.write_note(false)?;
        let commands = self.tuple.take().unwrap_or_default();

        let notes = commands.iter().filter(|c| c.is_note()).count();
        if notes == 0 {
            return Err(ChannelError::EmptyTuple);
        }
        let base = ticks / notes as u32;
        let mut extra = ticks % notes as u32;
        if base == 0 || base > u16::MAX as u32 {
            return Err(ChannelError::TupleTooShort { notes, ticks });
        }

        for cmd in commands {
            let cmd = match cmd {
                Command::Note { note, .. } => {
                    let mut t = base;
                    if extra > 0 {
                        t += 1;
                        extra -= 1;
                    }
                    Command::Note { note, ticks: t as u16 }
                }
                other => other,
            };
            self.buffer.push(cmd);
        }
        self.advance(ticks as u64);
        Ok(())
    }

    pub fn loop_start(&mut self, max_depth: usize) -> ChannelResult<()> {
        if self.tuple.is_some() {
            return Err(ChannelError::LoopInTuple);
        }
        if self.loops.len() >= max_depth {
            return Err(ChannelError::LoopTooDeep(max_depth));
        }
        self.write_note(false)?;
        self.flush_octave();
        let count = self.buffer.push_fixup(Command::LoopCount(0));
        self.loops.push(LoopStackElem {
            count,
            body: self.buffer.len(),
            ticks: self.ticks,
            frames: self.frames,
            start: self.marks_now(),
            skip: None,
        });
        Ok(())
    }

    pub fn loop_skip(&mut self) -> ChannelResult<()> {
        if self.loops.is_empty() {
            return Err(ChannelError::UnmatchedSkip(self.name.clone()));
        }
        if self.tuple.is_some() {
            return Err(ChannelError::LoopInTuple);
        }
        self.write_note(false)?;
        self.flush_octave();
        let mark = self.marks_now();
        let (ticks, frames) = (self.ticks, self.frames);
        let top = self.loops.last().ok_or_else(|| ChannelError::UnmatchedSkip(self.name.clone()))?;
        if top.skip.is_some() {
            return Err(ChannelError::DoubleSkip);
        }
        let jump = self.buffer.push_fixup(Command::J1(0));
        if let Some(top) = self.loops.last_mut() {
            top.skip = Some(LoopSkip {
                jump,
                ticks,
                frames,
                mark,
            });
        }
        Ok(())
    }

    pub fn loop_end(&mut self, count: i64) -> ChannelResult<()> {
        if self.loops.is_empty() {
            return Err(ChannelError::UnmatchedLoopEnd(self.name.clone()));
        }
        if self.tuple.is_some() {
            return Err(ChannelError::LoopInTuple);
        }
        let min = if self.loops.last().is_some_and(|l| l.skip.is_some()) { 2 } else { 1 };
        if count < min || count > u8::MAX as i64 {
            return Err(ChannelError::BadLoopCount { count, min });
        }
        self.write_note(false)?;
        self.flush_octave();

        let elem = self.loops.pop().ok_or_else(|| ChannelError::UnmatchedLoopEnd(self.name.clone()))?;
        self.buffer.push(Command::Djnz(elem.body));
        self.resolve(|buf| buf.resolve_loop_count(elem.count, count as u8));
        let n = count as u64;
        let body_ticks = self.ticks - elem.ticks;
        let body_frames = self.frames - elem.frames;
        let now = self.marks_now();

        let final_octave = match &elem.skip {
            None => {
                self.ticks += body_ticks * (n - 1);
                self.frames += body_frames * (n - 1) as f64;
                if now.absolute > elem.start.absolute {
                    now.octave
                } else {
                    now.octave + (now.relative - elem.start.relative) * (count as i32 - 1)
                }
            }
            Some(skip) => {
                let end = self.buffer.len();
                self.resolve(|buf| buf.resolve_target(skip.jump, end));
                let to_skip_ticks = skip.ticks - elem.ticks;
                let to_skip_frames = skip.frames - elem.frames;
                self.ticks += body_ticks * (n - 2) + to_skip_ticks;
                self.frames += body_frames * (n - 2) as f64 + to_skip_frames;

                let before = skip.mark.relative - elem.start.relative;
                let after = now.relative - skip.mark.relative;
                if skip.mark.absolute > elem.start.absolute {
                    skip.mark.octave
                } else if now.absolute > skip.mark.absolute {
                    now.octave + before
                } else {
                    now.octave + before * (count as i32 - 1) + after * (count as i32 - 2)
                }
            }
        };

        self.marks.relative += final_octave - self.octave;
        self.octave = final_octave;
        Ok(())
    }

    fn marks_now(&self) -> OctaveMark {
        OctaveMark {
            octave: self.octave,
            ..self.marks
        }
    }

    fn resolve(&mut self, f: impl FnOnce(&mut CommandBuffer) -> Result<(), super::command::CommandError>) {
        // Fixups come from this buffer, so resolving them cannot fail
        let result = f(&mut self.buffer);
        debug_assert!(result.is_ok(), "{:?}", result);
    }

    /// `L`: the song loops back here when it ends
    pub fn set_loop_point(&mut self) -> ChannelResult<()> {
        if self.is_pattern() {
            return Err(ChannelError::LoopPointInPattern);
        }
        if !self.loops.is_empty() {
            return Err(ChannelError::LoopPointInLoop);
        }
        if self.tuple.is_some() {
            return Err(ChannelError::LoopPointInTuple);
        }
        self.write_note(false)?;
        self.flush_octave();
        self.loop_point = Some(LoopPoint {
            index: self.buffer.len(),
            ticks: self.ticks,
            frames: self.frames,
        });
        self.octave_known = false;
        Ok(())
    }

    /// Call a recorded pattern
    pub fn call_pattern(
        &mut self,
        index: u16,
        ticks: u64,
        has_note: bool,
        octave: OctaveEffect,
    ) -> ChannelResult<()> {
        if self.tuple.is_some() {
            return Err(ChannelError::PatternInTuple);
        }
        self.write_note(false)?;
        self.flush_octave();
        self.add_cmd(Command::Jsr(index));
        self.advance(ticks);
        self.has_note |= has_note;
        match octave {
            OctaveEffect::Absolute(o) => {
                self.octave = o;
                self.marks.absolute += 1;
            }
            OctaveEffect::Relative(d) => {
                self.octave += d;
                self.marks.relative += d;
            }
        }
        Ok(())
    }

    /// Reset for a new `\name{` definition; the caller's octave is unknown
    pub fn begin_recording(&mut self) {
        let octave = DEFAULT_OCTAVE.clamp(self.caps.min_octave, self.caps.max_octave);
        self.buffer = CommandBuffer::new();
        self.octave = octave;
        self.pending_absolute = false;
        self.pending_relative = 0;
        self.octave_known = true;
        self.marks = OctaveMark {
            octave,
            absolute: 0,
            relative: 0,
        };
        self.note = None;
        self.loops.clear();
        self.tuple = None;
        self.ticks = 0;
        self.frames = 0.0;
        self.has_note = false;
    }

    /// Close a `\name{` definition and hand back its body
    pub fn end_recording(&mut self) -> ChannelResult<(CommandBuffer, OctaveEffect)> {
        self.check_closed()?;
        self.write_note(false)?;
        self.flush_octave();
        self.buffer.push(Command::Rts);
        let effect = if self.marks.absolute > 0 {
            OctaveEffect::Absolute(self.octave)
        } else {
            OctaveEffect::Relative(self.marks.relative)
        };
        Ok((std::mem::take(&mut self.buffer), effect))
    }

    fn check_closed(&self) -> ChannelResult<()> {
        if !self.loops.is_empty() {
            return Err(ChannelError::UnterminatedLoop(self.name.clone()));
        }
        if self.tuple.is_some() {
            return Err(ChannelError::UnterminatedTuple(self.name.clone()));
        }
        Ok(())
    }

    /// Terminate the stream with a JMP to the loop point or END
    pub fn finalize(&mut self) -> ChannelResult<()> {
        self.check_closed()?;
        self.write_note(false)?;
        self.flush_octave();
        match self.loop_point {
            Some(lp) => self.buffer.push(Command::Jmp(lp.index)),
            None => self.buffer.push(Command::End),
        };
        Ok(())
    }
}

/// Ticks of a note value (`4` = quarter note)
pub fn note_ticks(value: i64) -> ChannelResult<u32> {
    if value < 1 || value > TICKS_PER_WHOLE as i64 || TICKS_PER_WHOLE as i64 % value != 0 {
        return Err(ChannelError::BadLength(value));
    }
    Ok(TICKS_PER_WHOLE / value as u32)
}

/// Accepted values of a parameter on a channel
pub fn param_range(param: Param, caps: &ChannelCaps) -> (i64, i64) {
    match param {
        Param::Duty => (0, caps.max_duty as i64),
        Param::Detune | Param::Transpose => (-127, 127),
        Param::Feedback => (0, 7),
        Param::Am | Param::Ring | Param::Sync => (0, 1),
        Param::Operator | Param::Multiplier | Param::Ssg | Param::Mode => (0, 15),
        Param::RateScale => (0, 3),
        Param::Noise => (0, 31),
        Param::PulseWidth => (0, 4095),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets::create_target;

    fn channel() -> Channel {
        let target = create_target("nes").unwrap();
        Channel::new("A", target.channel("A").unwrap(), 60)
    }

    fn note(pitch: u8, ticks: u16) -> Command {
        Command::Note {
            note: NoteKind::Pitch(pitch),
            ticks,
        }
    }

    #[test]
    fn test_first_note_sets_octave() {
        let mut ch = channel();
        ch.set_octave(4).unwrap();
        ch.start_note(NoteKind::Pitch(0), 8).unwrap();
        ch.write_note(false).unwrap();
        assert_eq!(ch.commands(), &[Command::Octave(4), note(0, 8)]);
        assert_eq!(ch.ticks(), 8);
    }

    #[test]
    fn test_relative_octave_changes() {
        let mut ch = channel();
        ch.start_note(NoteKind::Pitch(0), 8).unwrap();
        ch.shift_octave(1).unwrap();
        ch.shift_octave(1).unwrap();
        ch.start_note(NoteKind::Pitch(2), 8).unwrap();
        ch.shift_octave(-1).unwrap();
        ch.start_note(NoteKind::Rest, 8).unwrap();
        ch.start_note(NoteKind::Pitch(4), 8).unwrap();
        ch.write_note(false).unwrap();
        assert_eq!(
            ch.commands(),
            &[
                Command::Octave(4),
                note(0, 8),
                Command::OctaveUp(2),
                note(2, 8),
                Command::Note { note: NoteKind::Rest, ticks: 8 },
                Command::OctaveDown(1),
                note(4, 8),
            ]
        );
        assert_eq!(ch.octave(), 5);
    }

    #[test]
    fn test_octave_out_of_range() {
        let mut ch = channel();
        assert_eq!(
            ch.set_octave(0),
            Err(ChannelError::OctaveOutOfRange { octave: 0, min: 1, max: 7 })
        );
        ch.set_octave(7).unwrap();
        assert!(ch.shift_octave(1).is_err());
    }

    #[test]
    fn test_tie_slur_dot() {
        let mut ch = channel();
        ch.start_note(NoteKind::Pitch(0), 8).unwrap();
        ch.tie(4).unwrap();
        ch.dot().unwrap();
        assert_eq!(ch.slur(NoteKind::Pitch(0), 8), Err(ChannelError::MixedTieSlur));
        ch.write_note(false).unwrap();
        assert_eq!(ch.commands().last(), Some(&note(0, 14)));

        ch.start_note(NoteKind::Pitch(0), 8).unwrap();
        assert_eq!(ch.slur(NoteKind::Pitch(2), 8), Err(ChannelError::BadNote));
        ch.slur(NoteKind::Pitch(0), 8).unwrap();
        assert_eq!(ch.tie(8), Err(ChannelError::MixedTieSlur));
        // chained slur keeps extending
        ch.start_note(NoteKind::Pitch(0), 4).unwrap();
        ch.write_note(false).unwrap();
        assert_eq!(ch.commands().last(), Some(&note(0, 20)));
        assert_eq!(ch.ticks(), 34);
    }

    #[test]
    fn test_modifiers_need_a_note() {
        let mut ch = channel();
        assert_eq!(ch.tie(8), Err(ChannelError::NoPendingNote("^")));
        assert_eq!(ch.dot(), Err(ChannelError::NoPendingNote(".")));
        ch.start_note(NoteKind::Pitch(0), 1).unwrap();
        assert_eq!(ch.dot(), Err(ChannelError::BadDot));
    }

    #[test]
    fn test_plain_loop_ticks_and_fixups() {
        let mut ch = channel();
        ch.loop_start(8).unwrap();
        ch.start_note(NoteKind::Pitch(0), 8).unwrap();
        ch.start_note(NoteKind::Pitch(2), 8).unwrap();
        ch.loop_end(3).unwrap();
        assert_eq!(ch.ticks(), 48);
        let cmds = ch.commands();
        assert_eq!(cmds[0], Command::LoopCount(3));
        assert_eq!(cmds.last(), Some(&Command::Djnz(1)));
        assert!(ch.buffer().unresolved().is_empty());
    }

    #[test]
    fn test_skip_loop_ticks_and_fixups() {
        let mut ch = channel();
        ch.loop_start(8).unwrap();
        ch.start_note(NoteKind::Pitch(0), 8).unwrap();
        ch.loop_skip().unwrap();
        ch.start_note(NoteKind::Pitch(2), 4).unwrap();
        assert_eq!(ch.loop_end(1), Err(ChannelError::BadLoopCount { count: 1, min: 2 }));
        ch.loop_end(3).unwrap();
        // body 12 * (3-2) + 8 to the skip point, on top of the first pass
        assert_eq!(ch.ticks(), 12 + 12 + 8);
        let skip = ch.commands().iter().position(|c| matches!(c, Command::J1(_))).unwrap();
        assert_eq!(ch.commands()[skip], Command::J1(ch.commands().len()));
    }

    #[test]
    fn test_loop_errors() {
        let mut ch = channel();
        assert_eq!(ch.loop_end(2), Err(ChannelError::UnmatchedLoopEnd("A".into())));
        assert_eq!(ch.loop_skip(), Err(ChannelError::UnmatchedSkip("A".into())));
        ch.loop_start(1).unwrap();
        assert_eq!(ch.loop_start(1), Err(ChannelError::LoopTooDeep(1)));
        ch.loop_skip().unwrap();
        assert_eq!(ch.loop_skip(), Err(ChannelError::DoubleSkip));
        assert_eq!(ch.finalize(), Err(ChannelError::UnterminatedLoop("A".into())));
    }

    #[test]
    fn test_loop_octave_bookkeeping() {
        let mut ch = channel();
        ch.set_octave(2).unwrap();
        ch.loop_start(8).unwrap();
        ch.start_note(NoteKind::Pitch(0), 8).unwrap();
        ch.shift_octave(1).unwrap();
        ch.loop_end(3).unwrap();
        assert_eq!(ch.octave(), 5);

        ch.loop_start(8).unwrap();
        ch.set_octave(3).unwrap();
        ch.start_note(NoteKind::Pitch(0), 8).unwrap();
        ch.shift_octave(1).unwrap();
        ch.loop_end(4).unwrap();
        assert_eq!(ch.octave(), 4);

        // [ > c | > d ]3 from octave 2: last pass stops after the first >
        ch.set_octave(2).unwrap();
        ch.loop_start(8).unwrap();
        ch.shift_octave(1).unwrap();
        ch.start_note(NoteKind::Pitch(0), 8).unwrap();
        ch.loop_skip().unwrap();
        ch.shift_octave(1).unwrap();
        ch.start_note(NoteKind::Pitch(2), 8).unwrap();
        ch.loop_end(3).unwrap();
        assert_eq!(ch.octave(), 2 + 3 + 2);
    }

    #[test]
    fn test_tuple_distribution() {
        let mut ch = channel();
        ch.set_octave(4).unwrap();
        ch.start_note(NoteKind::Pitch(0), 8).unwrap();
        ch.write_note(false).unwrap();
        ch.open_tuple().unwrap();
        ch.start_note(NoteKind::Pitch(0), 8).unwrap();
        ch.set_volume(10).unwrap();
        ch.start_note(NoteKind::Pitch(2), 8).unwrap();
        ch.start_note(NoteKind::Pitch(4), 8).unwrap();
        assert_eq!(ch.open_tuple(), Err(ChannelError::NestedTuple));
        assert_eq!(ch.loop_start(8), Err(ChannelError::LoopInTuple));
        ch.write_tuple(8).unwrap();
        assert_eq!(
            &ch.commands()[2..],
            &[note(0, 3), Command::VolSet(10), note(2, 3), note(4, 2)]
        );
        assert_eq!(ch.ticks(), 16);
    }

    #[test]
    fn test_tuple_errors() {
        let mut ch = channel();
        assert_eq!(ch.write_tuple(8), Err(ChannelError::UnmatchedTupleEnd));
        ch.open_tuple().unwrap();
        assert_eq!(ch.write_tuple(8), Err(ChannelError::EmptyTuple));
        ch.open_tuple().unwrap();
        for _ in 0..3 {
            ch.start_note(NoteKind::Pitch(0), 8).unwrap();
        }
        assert_eq!(
            ch.write_tuple(2),
            Err(ChannelError::TupleTooShort { notes: 3, ticks: 2 })
        );
    }

    #[test]
    fn test_loop_point_and_finalize() {
        let mut ch = channel();
        ch.start_note(NoteKind::Pitch(0), 8).unwrap();
        ch.set_loop_point().unwrap();
        ch.start_note(NoteKind::Pitch(2), 8).unwrap();
        ch.finalize().unwrap();
        let lp = ch.loop_point().unwrap();
        assert_eq!(lp.index, 2);
        assert_eq!(lp.ticks, 8);
        // octave is restated after the loop point
        assert_eq!(ch.commands()[2], Command::Octave(4));
        assert_eq!(ch.commands().last(), Some(&Command::Jmp(2)));

        let mut ch = channel();
        ch.loop_start(8).unwrap();
        assert_eq!(ch.set_loop_point(), Err(ChannelError::LoopPointInLoop));
    }

    #[test]
    fn test_volume_and_settings() {
        let mut ch = channel();
        assert_eq!(ch.set_volume(20), Err(ChannelError::BadVolume(20)));
        assert_eq!(ch.set_volume(20).unwrap_err().to_string(), "Bad volume: 20");
        ch.set_volume(10).unwrap();
        ch.adjust_volume(2).unwrap();
        ch.step_volume(-3).unwrap();
        assert_eq!(ch.volume(), 9);
        assert!(ch.adjust_volume(10).is_err());
        assert!(ch.set_cutoff(16).is_err());
        ch.set_cutoff(-3).unwrap();
        assert_eq!(ch.cutoff(), Some((CutoffMode::FromStart, 3)));
        assert!(ch.set_tempo(0.0, 1000.0).is_err());
        ch.set_tempo(150.0, 1000.0).unwrap();
        assert_eq!(
            &ch.commands()[..3],
            &[Command::VolSet(10), Command::VolSet(12), Command::VolDown(3)]
        );
        assert!(ch.set_param(Param::Duty, 4).is_err());
        ch.set_param(Param::Duty, 2).unwrap();
    }

    #[test]
    fn test_note_lengths() {
        assert_eq!(note_ticks(4), Ok(8));
        assert_eq!(note_ticks(32), Ok(1));
        assert_eq!(note_ticks(3), Err(ChannelError::BadLength(3)));
        assert_eq!(note_ticks(64), Err(ChannelError::BadLength(64)));
    }

    #[test]
    fn test_frames_follow_tempo() {
        let mut ch = channel();
        ch.set_tempo(150.0, 1000.0).unwrap();
        ch.start_note(NoteKind::Pitch(0), 8).unwrap();
        ch.write_note(false).unwrap();
        // one beat at 150 BPM and 60 Hz
        assert!((ch.frames() - 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_pattern_recording() {
        let target = create_target("nes").unwrap();
        let mut ch = Channel::new(PATTERN_CHANNEL, &target.channels()[0], 60);
        ch.begin_recording();
        ch.start_note(NoteKind::Pitch(0), 8).unwrap();
        ch.shift_octave(1).unwrap();
        ch.start_note(NoteKind::Pitch(2), 8).unwrap();
        let (buf, effect) = ch.end_recording().unwrap();
        assert_eq!(effect, OctaveEffect::Relative(1));
        assert_eq!(
            buf.commands(),
            &[note(0, 8), Command::OctaveUp(1), note(2, 8), Command::Rts]
        );
        assert_eq!(ch.set_loop_point(), Err(ChannelError::LoopPointInPattern));
    }
}
