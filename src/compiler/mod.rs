//! MML compiler
//!
//! The compiler reads MML one character at a time. `#` directives, effect
//! definitions and macros update compilation wide state; everything else is
//! applied to the active channels of the current song.

pub mod channel;
pub mod command;
pub mod cursor;
pub mod effects;
pub mod keyword;
pub mod list;
pub mod macros;
pub mod meta;
pub mod sample;
pub mod session;
pub mod song;

use crate::error::{Error, Result};
use crate::targets::{create_target, Target};
use channel::{note_ticks, Channel, ChannelResult};
use command::{CallbackFreq, NoteKind, Param};
use cursor::{parse_float, Cursor, MAX_INCLUDE_DEPTH};
use effects::{
    max_explicit_id, reverse_arpeggio, validate_effect, ApplyFreq, EffectError, EffectKind,
    EffectTables,
};
use keyword::{Keyword, KeywordTrie};
use list::{parse_list, ListOptions, ParamList, ParamValue};
use macros::{Macro, MacroTable};
use meta::{eval_condition, parse_flag, unquote, MetaError};
use sample::{load_pcm, PcmSample};
use serde::Serialize;
use session::{Session, Warning};
use song::{Callback, Pattern, Song, MAX_SONG, MIN_SONG};
use std::path::{Path, PathBuf};
use tracing::debug;

/// `@` definition prefixes, longest first so `@WTM` wins over `@WT`
const DEFINITION_PREFIXES: &[(&str, EffectKind)] = &[
    ("XPCM", EffectKind::Pcm),
    ("ADSR", EffectKind::Adsr),
    ("MOD", EffectKind::Modulation),
    ("WTM", EffectKind::WaveformMacro),
    ("WT", EffectKind::Waveform),
    ("PT", EffectKind::PulseWidth),
    ("MP", EffectKind::Vibrato),
    ("EN", EffectKind::Arpeggio),
    ("EP", EffectKind::Pitch),
    ("FB", EffectKind::Feedback),
    ("FT", EffectKind::Filter),
    ("CS", EffectKind::Pan),
    ("v", EffectKind::Volume),
];

/// Most callbacks one compilation can reference
const MAX_CALLBACKS: usize = 256;

#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub target: String,
    /// Symbols defined before the first line, as with `#DEFINE`
    pub defines: Vec<String>,
    pub warnings_as_errors: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            target: "nes".to_string(),
            defines: Vec::new(),
            warnings_as_errors: false,
        }
    }
}

/// Text fields set by `#TITLE` and friends
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub title: String,
    pub composer: String,
    pub programmer: String,
    pub game: String,
    pub album: String,
}

/// Length written after a note, tie or tuple
#[derive(Debug, Clone, Copy)]
struct Length {
    /// None means the channel's default length
    ticks: Option<u32>,
    dots: u32,
}

impl Length {
    fn resolve(self, channel: &Channel) -> u32 {
        let mut last = self.ticks.unwrap_or(channel.length());
        let mut total = last;
        for _ in 0..self.dots {
            last /= 2;
            total += last;
        }
        total
    }
}

#[derive(Debug, Clone, Copy)]
enum Join {
    Tie(Length),
    Slur(NoteKind, Length),
}

/// `\name{` currently being recorded
#[derive(Debug)]
struct OpenPattern {
    name: String,
    /// Active flags to restore at the closing brace
    saved: Vec<bool>,
}

pub struct Compiler {
    target: Box<dyn Target>,
    session: Session,
    keywords: KeywordTrie,
    metadata: Metadata,
    songs: Vec<Song>,
    current: Option<usize>,
    effects: EffectTables,
    macros: MacroTable,
    callbacks: Vec<Callback>,
    /// Active flags saved while a `(...)` group is open
    group: Option<Vec<bool>>,
    pattern: Option<OpenPattern>,
    base_path: Option<PathBuf>,
    line_start: bool,
}

impl Compiler {
    pub fn new(target: &str) -> Result<Self> {
        Self::with_options(&CompileOptions {
            target: target.to_string(),
            ..CompileOptions::default()
        })
    }

    pub fn with_options(options: &CompileOptions) -> Result<Self> {
        Ok(Self {
            target: create_target(&options.target)?,
            session: Session::new(&options.defines, options.warnings_as_errors),
            keywords: KeywordTrie::new(),
            metadata: Metadata::default(),
            songs: Vec::new(),
            current: None,
            effects: EffectTables::new(),
            macros: MacroTable::new(),
            callbacks: Vec::new(),
            group: None,
            pattern: None,
            base_path: None,
            line_start: true,
        })
    }

    pub fn target(&self) -> &dyn Target {
        self.target.as_ref()
    }

    pub fn songs(&self) -> &[Song] {
        &self.songs
    }

    pub fn song(&self, number: u32) -> Option<&Song> {
        self.songs.iter().find(|s| s.number() == number)
    }

    pub fn effects(&self) -> &EffectTables {
        &self.effects
    }

    pub fn callbacks(&self) -> &[Callback] {
        &self.callbacks
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn warnings(&self) -> &[Warning] {
        self.session.warnings()
    }

    /// Number of macros defined so far
    pub fn macro_count(&self) -> usize {
        self.macros.len()
    }

    /// Compile MML held in memory; `name` is used in diagnostics
    pub fn compile_str(&mut self, name: &str, text: &str) -> Result<()> {
        self.run(Cursor::new(name, text))
    }

    /// Compile a file, resolving `#INCLUDE` relative to its directory
    pub fn compile_file(&mut self, path: &Path) -> Result<()> {
        self.base_path = path.parent().map(Path::to_path_buf);
        let cursor = Cursor::open(path)?;
        self.run(cursor)
    }

    fn run(&mut self, cursor: Cursor) -> Result<()> {
        debug!("Compiling {} for {}", cursor.name(), self.target.name());
        self.session.cursors.push(cursor);
        self.line_start = true;
        let result = self.parse().and_then(|()| self.finish());
        while self.session.cursors.pop().is_some() {}
        result
    }

    // Cursor access

    fn cursor_mut(&mut self) -> Result<&mut Cursor> {
        match self.session.cursors.current_mut() {
            Some(cursor) => Ok(cursor),
            None => Err(Error::Compile {
                pos: Default::default(),
                message: "Unexpected end of input".to_string(),
            }),
        }
    }

    fn getch(&mut self) -> Option<u8> {
        self.session.cursors.current_mut().and_then(Cursor::getch)
    }

    fn ungetch(&mut self) {
        if let Some(cursor) = self.session.cursors.current_mut() {
            cursor.ungetch();
        }
    }

    fn peek(&self) -> Option<u8> {
        self.session.cursor().and_then(Cursor::peek)
    }

    fn skip_blanks(&mut self) {
        if let Some(cursor) = self.session.cursors.current_mut() {
            cursor.skip_blanks();
        }
    }

    fn skip_line(&mut self) {
        if let Some(cursor) = self.session.cursors.current_mut() {
            cursor.get_string_until(b"\n");
        }
    }

    fn expect(&mut self, c: u8) -> Result<()> {
        self.skip_blanks();
        if self.getch() == Some(c) {
            return Ok(());
        }
        Err(self.session.error(format!("Expected '{}'", c as char)))
    }

    fn read_int(&mut self) -> Result<Option<i64>> {
        Ok(self.cursor_mut()?.get_int())
    }

    fn expect_int(&mut self, what: &str) -> Result<i64> {
        match self.read_int()? {
            Some(v) => Ok(v),
            None => Err(self.session.error(format!("{} requires a number", what))),
        }
    }

    fn read_length(&mut self) -> Result<Length> {
        let ticks = match self.peek() {
            Some(c) if c.is_ascii_digit() => {
                let value = self.expect_int("Length")?;
                Some(note_ticks(value).map_err(|e| self.session.error(e))?)
            }
            _ => None,
        };
        let mut dots = 0;
        while self.peek() == Some(b'.') {
            self.getch();
            dots += 1;
        }
        Ok(Length { ticks, dots })
    }

    // Main loop

    fn parse(&mut self) -> Result<()> {
        loop {
            let Some(c) = self.getch() else {
                if self.session.cursors.depth() > 1 {
                    if let Some(done) = self.session.cursors.pop() {
                        debug!("Finished {}", done.name());
                    }
                    continue;
                }
                return Ok(());
            };

            if c == b'\n' {
                self.line_start = true;
                continue;
            }
            if c.is_ascii_whitespace() {
                continue;
            }
            let line_start = std::mem::replace(&mut self.line_start, false);

            if self.session.conditions.suppressed() {
                if c == b'#' && line_start {
                    self.parse_directive()?;
                } else {
                    self.skip_line();
                }
                continue;
            }
            self.dispatch(c, line_start)?;
        }
    }

    fn dispatch(&mut self, c: u8, line_start: bool) -> Result<()> {
        match c {
            b';' => self.skip_line(),
            b'/' if self.peek() == Some(b'*') => self.skip_block_comment()?,
            b'#' if line_start => self.parse_directive()?,
            b'A'..=b'Z' if line_start && self.select_channels(c)? => {}
            b'a'..=b'g' | b'r' | b's' => self.parse_note(c)?,
            b'@' => self.parse_at()?,
            b'(' => self.open_group()?,
            b')' => self.close_group()?,
            b'[' => {
                let max_depth = self.target.max_loop_depth();
                self.apply("[", |ch| ch.loop_start(max_depth))?;
            }
            b'|' => self.apply("|", Channel::loop_skip)?,
            b']' => {
                let Some(count) = self.read_int()? else {
                    return Err(self.session.error("Missing loop count after ]"));
                };
                self.apply("]", |ch| ch.loop_end(count))?;
            }
            b'{' => self.apply("{", Channel::open_tuple)?,
            b'}' => self.close_brace()?,
            b'\\' => self.parse_pattern()?,
            b'$' => self.parse_macro()?,
            b'!' => self.parse_callback()?,
            _ => self.parse_word(c)?,
        }
        Ok(())
    }

    fn skip_block_comment(&mut self) -> Result<()> {
        self.getch();
        let mut prev = 0;
        while let Some(c) = self.getch() {
            if prev == b'*' && c == b'/' {
                return Ok(());
            }
            prev = c;
        }
        Err(self.session.error("Unterminated comment"))
    }

    /// Keywords and single letter commands
    fn parse_word(&mut self, c: u8) -> Result<()> {
        self.ungetch();
        let n = self.keywords.max_len();
        let ahead = self
            .session
            .cursor()
            .map(|cursor| cursor.peek_bytes(n).to_vec())
            .unwrap_or_default();
        if let Some((keyword, len)) = self.keywords.longest_match(&ahead) {
            self.cursor_mut()?.skip_n(len);
            return self.parse_keyword(keyword);
        }
        self.getch();

        match c {
            b'o' => {
                let octave = self.expect_int("o")?;
                self.apply_or_warn("o", |ch| ch.set_octave(octave as i32))
            }
            b'>' | b'<' => {
                let up = (c == b'>') != self.session.octave_rev;
                let delta = if up { 1 } else { -1 };
                self.apply_or_warn(if c == b'>' { ">" } else { "<" }, |ch| {
                    ch.shift_octave(delta)
                })
            }
            b'l' => {
                let value = self.expect_int("l")?;
                self.apply_or_warn("l", |ch| ch.set_length(value))
            }
            b'k' => {
                let ticks = self.expect_int("k")?;
                self.apply_or_warn("k", |ch| ch.set_length_ticks(ticks))
            }
            b't' => {
                let cursor = self.cursor_mut()?;
                cursor.allow_float();
                let token = cursor.get_numeric_string();
                let Some(tempo) = parse_float(&token) else {
                    return Err(self.session.error("t requires a number"));
                };
                let max = self.target.max_tempo();
                self.apply_or_warn("t", |ch| ch.set_tempo(tempo, max))
            }
            b'v' => self.parse_volume(),
            b'q' => {
                let value = self.expect_int("q")?;
                self.apply("q", |ch| ch.set_cutoff(value))
            }
            b'w' => self.parse_write(),
            _ => Err(self
                .session
                .error(format!("Unexpected character '{}'", c as char))),
        }
    }

    fn parse_keyword(&mut self, keyword: Keyword) -> Result<()> {
        match keyword {
            Keyword::Select(EffectKind::Adsr) if self.peek() == Some(b'(') => self.inline_adsr(),
            Keyword::Select(kind) => {
                let id = self.expect_int(kind.selector())?;
                let id = match u32::try_from(id) {
                    Ok(id) => id,
                    Err(_) => {
                        return Err(self
                            .session
                            .error(format!("Bad effect id: {}{}", kind.selector(), id)))
                    }
                };
                self.select_effect(kind, id)
            }
            Keyword::Off(kind) => self.disable_effect(kind),
            Keyword::Param(param) => {
                let value = self.expect_int(param.mnemonic())?;
                self.set_param(param, value)
            }
            Keyword::SsgOff => self.set_param(Param::Ssg, 0),
            Keyword::LoopPoint => self.apply("L", Channel::set_loop_point),
        }
    }

    // Songs and channels

    /// Index of the current song, creating song 1 on first use
    fn song_index(&mut self) -> usize {
        if let Some(index) = self.current {
            return index;
        }
        debug!("Starting song {}", MIN_SONG);
        self.songs.push(Song::new(MIN_SONG, self.target.as_ref()));
        let index = self.songs.len() - 1;
        self.current = Some(index);
        index
    }

    fn active_indices(&mut self) -> (usize, Vec<usize>) {
        let song = self.song_index();
        let active = self.songs[song]
            .all_channels_mut()
            .iter()
            .enumerate()
            .filter(|(_, ch)| ch.active)
            .map(|(i, _)| i)
            .collect();
        (song, active)
    }

    /// Run `f` on every active channel; no active channel is an error
    fn apply<F>(&mut self, what: &str, f: F) -> Result<()>
    where
        F: FnMut(&mut Channel) -> ChannelResult<()>,
    {
        let (song, active) = self.active_indices();
        if active.is_empty() {
            return Err(self
                .session
                .error(format!("{} requires at least one active channel", what)));
        }
        self.apply_to(song, &active, f)
    }

    /// Like [`Compiler::apply`], but only warn when no channel is active
    fn apply_or_warn<F>(&mut self, what: &str, f: F) -> Result<()>
    where
        F: FnMut(&mut Channel) -> ChannelResult<()>,
    {
        let (song, active) = self.active_indices();
        if active.is_empty() {
            return self
                .session
                .warn(format!("{} ignored, no active channels", what));
        }
        self.apply_to(song, &active, f)
    }

    fn apply_to<F>(&mut self, song: usize, active: &[usize], mut f: F) -> Result<()>
    where
        F: FnMut(&mut Channel) -> ChannelResult<()>,
    {
        let channels = self.songs[song].all_channels_mut();
        for &i in active {
            if let Err(e) = f(&mut channels[i]) {
                return Err(self.session.error(e));
            }
        }
        Ok(())
    }

    fn warn_unsupported(&mut self, what: &str, channels: &[String]) -> Result<()> {
        if channels.is_empty() {
            return Ok(());
        }
        self.session.warn(format!(
            "{} is not supported on channel {}, ignored",
            what,
            channels.join("")
        ))
    }

    fn set_active(&mut self, names: &[u8]) {
        let song = self.song_index();
        for ch in self.songs[song].all_channels_mut() {
            ch.active = !ch.is_pattern()
                && ch.name().len() == 1
                && names.contains(&ch.name().as_bytes()[0]);
        }
    }

    fn active_flags(&mut self) -> Vec<bool> {
        let song = self.song_index();
        self.songs[song]
            .all_channels_mut()
            .iter()
            .map(|ch| ch.active)
            .collect()
    }

    fn restore_active(&mut self, flags: &[bool]) {
        let song = self.song_index();
        for (ch, &active) in self.songs[song].all_channels_mut().iter_mut().zip(flags) {
            ch.active = active;
        }
    }

    /// Channel letters at the start of a line, e.g. `ABC c d e`
    fn select_channels(&mut self, first: u8) -> Result<bool> {
        let rest = self
            .cursor_mut()?
            .get_string_in_range(|c| c.is_ascii_uppercase());
        let terminated = self.peek().map_or(true, |c| c.is_ascii_whitespace());
        let mut names = vec![first];
        names.extend(rest.bytes());

        if !terminated || !names.iter().all(|&c| self.target.is_channel_name(c)) {
            for _ in 0..rest.len() {
                self.ungetch();
            }
            return Ok(false);
        }
        if self.pattern.is_some() {
            return Err(self
                .session
                .error("Channel selection inside a pattern definition"));
        }
        if self.group.is_some() {
            return Err(self.session.error("Channel selection inside a channel group"));
        }
        self.set_active(&names);
        Ok(true)
    }

    fn open_group(&mut self) -> Result<()> {
        if self.group.is_some() {
            return Err(self.session.error("Nested channel group"));
        }
        if self.pattern.is_some() {
            return Err(self
                .session
                .error("Channel group inside a pattern definition"));
        }
        let names = self
            .cursor_mut()?
            .get_string_in_range(|c| c.is_ascii_uppercase());
        if names.is_empty() || !names.bytes().all(|c| self.target.is_channel_name(c)) {
            return Err(self.session.error(format!("Bad channel group: ({}", names)));
        }
        let saved = self.active_flags();
        self.group = Some(saved);
        self.set_active(names.as_bytes());
        Ok(())
    }

    fn close_group(&mut self) -> Result<()> {
        let Some(saved) = self.group.take() else {
            return Err(self.session.error("Unmatched )"));
        };
        // Flush notes typed inside the group before they go inactive
        let (song, active) = self.active_indices();
        self.apply_to(song, &active, |ch| ch.write_note(false))?;
        self.restore_active(&saved);
        Ok(())
    }

    // Notes

    fn read_note_kind(&mut self, c: u8) -> NoteKind {
        let base: i32 = match c {
            b'r' => return NoteKind::Rest,
            b's' => return NoteKind::Wait,
            b'c' => 0,
            b'd' => 2,
            b'e' => 4,
            b'f' => 5,
            b'g' => 7,
            b'a' => 9,
            _ => 11,
        };
        let mut semitone = base;
        loop {
            match self.peek() {
                Some(b'+' | b'#') => semitone += 1,
                Some(b'-') => semitone -= 1,
                _ => break,
            }
            self.getch();
        }
        NoteKind::Pitch(semitone.rem_euclid(12) as u8)
    }

    fn parse_note(&mut self, c: u8) -> Result<()> {
        let kind = self.read_note_kind(c);
        let length = self.read_length()?;
        let mut joins = Vec::new();
        loop {
            self.skip_blanks();
            match self.peek() {
                Some(b'^') => {
                    self.getch();
                    joins.push(Join::Tie(self.read_length()?));
                }
                Some(b'&') => {
                    self.getch();
                    self.skip_blanks();
                    let next = match self.getch() {
                        Some(n @ (b'a'..=b'g' | b'r' | b's')) => n,
                        _ => return Err(self.session.error("Expected a note after &")),
                    };
                    let next = self.read_note_kind(next);
                    joins.push(Join::Slur(next, self.read_length()?));
                }
                _ => break,
            }
        }

        self.apply("Note", |ch| {
            ch.start_note(kind, length.ticks.unwrap_or(ch.length()))?;
            for _ in 0..length.dots {
                ch.dot()?;
            }
            for join in &joins {
                let dots = match *join {
                    Join::Tie(l) => {
                        ch.tie(l.ticks.unwrap_or(ch.length()))?;
                        l.dots
                    }
                    Join::Slur(next, l) => {
                        ch.slur(next, l.ticks.unwrap_or(ch.length()))?;
                        l.dots
                    }
                };
                for _ in 0..dots {
                    ch.dot()?;
                }
            }
            Ok(())
        })
    }

    fn close_brace(&mut self) -> Result<()> {
        if self.pattern.is_some() {
            let song = self.song_index();
            let in_tuple = self.songs[song]
                .pattern_channel()
                .is_some_and(Channel::in_tuple);
            if !in_tuple {
                return self.end_pattern();
            }
        }
        let length = self.read_length()?;
        self.apply("}", |ch| ch.write_tuple(length.resolve(ch)))
    }

    fn parse_volume(&mut self) -> Result<()> {
        enum Op {
            Set,
            Adjust(i64),
            Step(i64),
        }
        let ahead = self
            .session
            .cursor()
            .map(|c| c.peek_string(2))
            .unwrap_or_default();
        let (op, skip) = if ahead.starts_with("++") {
            (Op::Step(1), 2)
        } else if ahead.starts_with("--") {
            (Op::Step(-1), 2)
        } else if ahead.starts_with('+') {
            (Op::Adjust(1), 1)
        } else if ahead.starts_with('-') {
            (Op::Adjust(-1), 1)
        } else {
            (Op::Set, 0)
        };
        self.cursor_mut()?.skip_n(skip);

        match op {
            Op::Set => {
                let volume = self.expect_int("v")?;
                self.apply("v", |ch| ch.set_volume(volume))
            }
            Op::Adjust(sign) => {
                let n = self.read_int()?.unwrap_or(1);
                self.apply("v", |ch| ch.adjust_volume(sign * n))
            }
            Op::Step(sign) => {
                let n = self.read_int()?.unwrap_or(1);
                self.apply("v", |ch| ch.step_volume(sign * n))
            }
        }
    }

    /// `w[(port)]addr,value`
    fn parse_write(&mut self) -> Result<()> {
        let port = if self.peek() == Some(b'(') {
            self.getch();
            let port = self.expect_int("w port")?;
            self.expect(b')')?;
            match u8::try_from(port) {
                Ok(p) if p != command::NO_PORT => Some(p),
                _ => return Err(self.session.error(format!("Bad port: {}", port))),
            }
        } else {
            None
        };
        let addr = self.expect_int("w")?;
        self.expect(b',')?;
        self.skip_blanks();
        let value = self.expect_int("w")?;
        let Ok(addr) = u16::try_from(addr) else {
            return Err(self.session.error(format!("Bad register address: {}", addr)));
        };
        let Ok(value) = u8::try_from(value) else {
            return Err(self.session.error(format!("Bad register value: {}", value)));
        };
        self.apply("w", |ch| ch.write_register(port, addr, value))
    }

    // Effects

    fn parse_at(&mut self) -> Result<()> {
        let ahead = self
            .session
            .cursor()
            .map(|c| c.peek_string(4))
            .unwrap_or_default();
        let (skip, kind) = DEFINITION_PREFIXES
            .iter()
            .find(|(p, _)| ahead.starts_with(p))
            .map_or((0, EffectKind::Duty), |&(p, k)| (p.len(), k));
        self.cursor_mut()?.skip_n(skip);

        let Some(id) = self.read_int()? else {
            return Err(self
                .session
                .error(format!("Expected a number after {}", kind.prefix())));
        };
        self.skip_blanks();
        if self.peek() == Some(b'=') {
            self.getch();
            return self.define_effect(kind, id);
        }

        match kind {
            EffectKind::Duty => self.select_duty(id),
            EffectKind::Volume => match u32::try_from(id) {
                Ok(id) => self.select_effect(kind, id),
                Err(_) => Err(self.session.error(format!("Bad effect id: @v{}", id))),
            },
            _ => Err(self
                .session
                .error(format!("Expected '=' after {}{}", kind.prefix(), id))),
        }
    }

    fn define_effect(&mut self, kind: EffectKind, id: i64) -> Result<()> {
        let prefix = kind.prefix();
        let max = max_explicit_id(kind);
        let id = match u32::try_from(id) {
            Ok(id) if id <= max => id,
            _ => return Err(self.session.error(EffectError::BadId { prefix, id, max })),
        };
        if self.effects.is_defined(kind, id) {
            return Err(self.session.error(EffectError::Redefined { prefix, id }));
        }

        let cursor = self.cursor_mut()?;
        cursor.skip_whitespace();
        let ahead = cursor.peek_string(11);
        let freq = if ahead.starts_with("EVERY-FRAME") {
            cursor.skip_n(11);
            Some(ApplyFreq::EveryFrame)
        } else if ahead.starts_with("EVERY-NOTE") {
            cursor.skip_n(10);
            Some(ApplyFreq::EveryNote)
        } else {
            None
        };
        if freq.is_some() && !kind.has_frequency() {
            self.session
                .warn(format!("{} ignores EVERY-NOTE and EVERY-FRAME", prefix))?;
        }

        let opts = ListOptions {
            allow_wave_refs: kind == EffectKind::WaveformMacro,
            base: self.session.base,
            ..ListOptions::default()
        };
        let parsed = parse_list(self.cursor_mut()?, &opts);
        let parsed = parsed.map_err(|e| self.session.error(format!("{}{}: {}", prefix, id, e)))?;
        for warning in parsed.warnings {
            self.session.warn(warning)?;
        }

        let mut list = parsed.list;
        if kind == EffectKind::Arpeggio && self.session.en_rev {
            reverse_arpeggio(&mut list);
        }
        let warnings = validate_effect(kind, &mut list, self.target.as_ref(), &self.effects)
            .map_err(|e| self.session.error(e))?;
        for warning in warnings {
            self.session.warn(warning)?;
        }
        let sample = match kind {
            EffectKind::Pcm => self.load_sample(&list)?,
            _ => None,
        };

        let freq = freq.filter(|_| kind.has_frequency());
        let table = self.effects.table_mut(kind);
        if let Err(e) = store_effect(table, id, list, freq, sample) {
            return Err(self.session.error(e));
        }
        debug!("Defined {}{}", prefix, id);
        Ok(())
    }

    /// Decode the WAV named by an `@XPCM` definition
    fn load_sample(&mut self, list: &ParamList) -> Result<Option<PcmSample>> {
        let Some(spec) = self.target.pcm() else {
            return Ok(None);
        };
        let (Some(ParamValue::Str(file)), Some(rate)) =
            (list.main.first(), list.main.get(1).and_then(ParamValue::as_int))
        else {
            return Ok(None);
        };
        let volume = list.main.get(2).and_then(ParamValue::as_int).unwrap_or(100);
        let path = self.resolve_path(file);
        let rate = u32::try_from(rate).unwrap_or(0);
        debug!("Loading sample {}", path.display());
        load_pcm(&path, rate, volume, spec)
            .map(Some)
            .map_err(|e| self.session.error(e))
    }

    /// Inline `ADSR(a, d, s, r)`
    fn inline_adsr(&mut self) -> Result<()> {
        let opts = ListOptions {
            base: self.session.base,
            ..ListOptions::parens()
        };
        let parsed = parse_list(self.cursor_mut()?, &opts);
        let parsed = parsed.map_err(|e| self.session.error(format!("ADSR: {}", e)))?;
        for warning in parsed.warnings {
            self.session.warn(warning)?;
        }
        let mut list = parsed.list;
        let warnings = validate_effect(EffectKind::Adsr, &mut list, self.target.as_ref(), &self.effects)
            .map_err(|e| self.session.error(e))?;
        for warning in warnings {
            self.session.warn(warning)?;
        }
        let id = self
            .effects
            .define_implicit_adsr(list)
            .map_err(|e| self.session.error(e))?;
        self.select_effect(EffectKind::Adsr, id)
    }

    fn select_effect(&mut self, kind: EffectKind, id: u32) -> Result<()> {
        let selector = kind.selector();
        let (song, active) = self.active_indices();
        if active.is_empty() {
            return Err(self
                .session
                .error(format!("{} requires at least one active channel", selector)));
        }
        if !self.effects.is_defined(kind, id) {
            return Err(self.session.error(EffectError::Undefined { selector, id }));
        }

        let mut unsupported = Vec::new();
        let channels = self.songs[song].all_channels_mut();
        for &i in &active {
            let ch = &mut channels[i];
            if !ch.caps().supports(kind) {
                unsupported.push(ch.name().to_string());
                continue;
            }
            let result = ch
                .select_effect(kind, id)
                .map_err(|e| e.to_string())
                .and_then(|()| {
                    self.effects
                        .table_mut(kind)
                        .add_ref(id)
                        .map_err(|e| e.to_string())
                });
            if let Err(e) = result {
                return Err(self.session.error(e));
            }
        }
        self.warn_unsupported(selector, &unsupported)
    }

    fn disable_effect(&mut self, kind: EffectKind) -> Result<()> {
        let what = format!("{}OF", kind.selector());
        let (song, active) = self.active_indices();
        if active.is_empty() {
            return Err(self
                .session
                .error(format!("{} requires at least one active channel", what)));
        }
        let mut unsupported = Vec::new();
        let channels = self.songs[song].all_channels_mut();
        for &i in &active {
            let ch = &mut channels[i];
            if !ch.caps().supports(kind) {
                unsupported.push(ch.name().to_string());
            } else if let Err(e) = ch.disable_effect(kind) {
                return Err(self.session.error(e));
            }
        }
        self.warn_unsupported(&what, &unsupported)
    }

    /// `@n`: a PCM sample on PCM channels, else a duty macro, else a raw duty
    fn select_duty(&mut self, value: i64) -> Result<()> {
        let (song, active) = self.active_indices();
        if active.is_empty() {
            return Err(self.session.error("@ requires at least one active channel"));
        }
        let id = u32::try_from(value).ok();
        let mut unsupported = Vec::new();
        let channels = self.songs[song].all_channels_mut();
        for &i in &active {
            let ch = &mut channels[i];
            let caps = ch.caps();
            let macro_kind = [EffectKind::Pcm, EffectKind::Duty].into_iter().find(|&kind| {
                caps.supports(kind) && id.is_some_and(|id| self.effects.is_defined(kind, id))
            });
            let result = match (macro_kind, id) {
                (Some(kind), Some(id)) => ch
                    .select_effect(kind, id)
                    .map_err(|e| e.to_string())
                    .and_then(|()| {
                        self.effects
                            .table_mut(kind)
                            .add_ref(id)
                            .map_err(|e| e.to_string())
                    }),
                _ if caps.supports_param(Param::Duty) => {
                    ch.set_param(Param::Duty, value).map_err(|e| e.to_string())
                }
                _ => {
                    unsupported.push(ch.name().to_string());
                    Ok(())
                }
            };
            if let Err(e) = result {
                return Err(self.session.error(e));
            }
        }
        self.warn_unsupported("@", &unsupported)
    }

    fn set_param(&mut self, param: Param, value: i64) -> Result<()> {
        let what = param.mnemonic();
        let (song, active) = self.active_indices();
        if active.is_empty() {
            return Err(self
                .session
                .error(format!("{} requires at least one active channel", what)));
        }
        let mut unsupported = Vec::new();
        let channels = self.songs[song].all_channels_mut();
        for &i in &active {
            let ch = &mut channels[i];
            if !ch.caps().supports_param(param) {
                unsupported.push(ch.name().to_string());
            } else if let Err(e) = ch.set_param(param, value) {
                return Err(self.session.error(e));
            }
        }
        self.warn_unsupported(what, &unsupported)
    }

    // Patterns, macros and callbacks

    fn parse_pattern(&mut self) -> Result<()> {
        let name = self.cursor_mut()?.get_identifier();
        if name.is_empty() {
            return Err(self.session.error("Expected a pattern name after \\"));
        }
        match self.getch() {
            Some(b'{') => self.begin_pattern(name),
            Some(b'(') => {
                self.expect(b')')?;
                self.call_pattern(&name)
            }
            _ => Err(self
                .session
                .error(format!("Expected '{{' or '(' after \\{}", name))),
        }
    }

    fn begin_pattern(&mut self, name: String) -> Result<()> {
        if let Some(open) = &self.pattern {
            return Err(self.session.error(format!(
                "Pattern {} defined inside pattern {}",
                name, open.name
            )));
        }
        if self.group.is_some() {
            return Err(self
                .session
                .error("Pattern definition inside a channel group"));
        }
        let song = self.song_index();
        if self.songs[song].find_pattern(&name).is_some() {
            return Err(self.session.error(format!("Pattern redefinition: {}", name)));
        }
        let saved = self.active_flags();
        let p = self.songs[song].pattern_channel_index();
        let channels = self.songs[song].all_channels_mut();
        for ch in channels.iter_mut() {
            ch.active = false;
        }
        channels[p].active = true;
        channels[p].begin_recording();
        debug!("Recording pattern {}", name);
        self.pattern = Some(OpenPattern { name, saved });
        Ok(())
    }

    fn end_pattern(&mut self) -> Result<()> {
        let Some(open) = self.pattern.take() else {
            return Ok(());
        };
        let song = self.song_index();
        let p = self.songs[song].pattern_channel_index();
        let channel = &mut self.songs[song].all_channels_mut()[p];
        let (commands, octave) = match channel.end_recording() {
            Ok(body) => body,
            Err(e) => return Err(self.session.error(e)),
        };
        let pattern = Pattern {
            name: open.name,
            commands,
            has_note: channel.has_note(),
            ticks: channel.ticks(),
            octave,
        };
        self.restore_active(&open.saved);
        debug!("Pattern {} is {} ticks", pattern.name, pattern.ticks);
        self.songs[song].add_pattern(pattern);
        Ok(())
    }

    fn call_pattern(&mut self, name: &str) -> Result<()> {
        let song = self.song_index();
        let Some(index) = self.songs[song].find_pattern(name) else {
            return Err(self.session.error(format!("Undefined pattern: {}", name)));
        };
        let Ok(id) = u16::try_from(index) else {
            return Err(self.session.error("Too many patterns"));
        };
        let pattern = &self.songs[song].patterns()[index];
        let (ticks, has_note, octave) = (pattern.ticks, pattern.has_note, pattern.octave);
        self.apply(&format!("\\{}", name), |ch| {
            ch.call_pattern(id, ticks, has_note, octave)
        })
    }

    /// Read up to the brace matching an already consumed `{`
    fn read_braced(&mut self, what: &str) -> Result<String> {
        let mut depth = 1;
        let mut body = Vec::new();
        while let Some(c) = self.getch() {
            match c {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(String::from_utf8_lossy(&body).into_owned());
                    }
                }
                _ => {}
            }
            body.push(c);
        }
        Err(self.session.error(format!("Unterminated {}", what)))
    }

    /// `$name(args){body}` defines, `$name(args)` expands
    fn parse_macro(&mut self) -> Result<()> {
        let name = self.cursor_mut()?.get_identifier();
        if name.is_empty() {
            return Err(self.session.error("Expected a macro name after $"));
        }
        let args: Vec<String> = if self.peek() == Some(b'(') {
            self.getch();
            let text = self.cursor_mut()?.get_string_until(b")\n");
            self.expect(b')')?;
            text.split(',').map(|a| a.trim().to_string()).collect()
        } else {
            Vec::new()
        };
        let args = match args.as_slice() {
            [only] if only.is_empty() => Vec::new(),
            _ => args,
        };

        // a body brace must touch the name or argument list; `$m {c d e}4`
        // is an invocation followed by a tuple
        if self.peek() == Some(b'{') {
            self.getch();
            let body = self.read_braced("macro body")?;
            let params = args
                .iter()
                .map(|p| p.split_once('=').map(|(_, default)| default.trim().to_string()))
                .collect();
            let defined = Macro::new(&name, params, &body).and_then(|m| self.macros.define(m));
            defined.map_err(|e| self.session.error(e))?;
            debug!("Defined macro {}", name);
            return Ok(());
        }

        let depth = self.cursor_mut()?.splice_depth();
        let text = self
            .macros
            .expand(&name, &args, depth)
            .map_err(|e| self.session.error(e))?;
        self.cursor_mut()?.insert_string(&text);
        Ok(())
    }

    /// `!name` or `!name(EVERY-NOTE)`
    fn parse_callback(&mut self) -> Result<()> {
        let name = self.cursor_mut()?.get_identifier();
        if name.is_empty() {
            return Err(self.session.error("Expected a callback name after !"));
        }
        let mut freq = CallbackFreq::Once;
        if self.peek() == Some(b'(') {
            self.getch();
            let word = self.cursor_mut()?.get_string_until(b")\n");
            self.expect(b')')?;
            freq = match word.trim() {
                "" | "ONCE" => CallbackFreq::Once,
                "EVERY-NOTE" => CallbackFreq::EveryNote,
                other => {
                    return Err(self
                        .session
                        .error(format!("Bad callback frequency: {}", other)))
                }
            };
        }

        let index = match self.callbacks.iter().position(|c| c.name == name) {
            Some(index) => index,
            None if self.callbacks.len() < MAX_CALLBACKS => {
                self.callbacks.push(Callback { name: name.clone() });
                self.callbacks.len() - 1
            }
            None => return Err(self.session.error("Too many callbacks")),
        };
        let index = index as u8;
        self.apply(&format!("!{}", name), |ch| ch.callback(index, freq))
    }

    // Directives

    fn parse_directive(&mut self) -> Result<()> {
        let cursor = self.cursor_mut()?;
        let name = cursor
            .get_string_in_range(|c| c.is_ascii_alphanumeric() || c == b'-' || c == b'_')
            .to_ascii_uppercase();
        let arg = cursor.get_string_until(b"\n").trim().to_string();
        let suppressed = self.session.conditions.suppressed();

        match name.as_str() {
            "IFDEF" | "IFNDEF" => {
                let defined = if suppressed {
                    false
                } else {
                    self.condition(&name, &arg)?
                };
                let taken = if name == "IFNDEF" { !defined } else { defined };
                self.session.conditions.push_if(taken);
            }
            "ELSIFDEF" => {
                let defined = self.condition(&name, &arg)?;
                self.session
                    .conditions
                    .elsif(defined)
                    .map_err(|e| self.session.error(e))?;
            }
            "ELSE" => self
                .session
                .conditions
                .else_branch()
                .map_err(|e| self.session.error(e))?,
            "ENDIF" => self
                .session
                .conditions
                .endif()
                .map_err(|e| self.session.error(e))?,
            _ if suppressed => {}
            "TITLE" => self.metadata.title = unquote(&arg).to_string(),
            "COMPOSER" => self.metadata.composer = unquote(&arg).to_string(),
            "PROGRAMER" | "PROGRAMMER" => self.metadata.programmer = unquote(&arg).to_string(),
            "GAME" => self.metadata.game = unquote(&arg).to_string(),
            "ALBUM" => self.metadata.album = unquote(&arg).to_string(),
            "SONG" => self.start_song(&name, &arg)?,
            "BASE" => {
                self.session.base = match arg.parse::<i64>() {
                    Ok(base @ (10 | 16)) => base as u32,
                    Ok(base) => return Err(self.session.error(MetaError::BadBase(base))),
                    Err(_) => return Err(self.missing(&name)),
                };
            }
            "INCLUDE" => self.include(&name, &arg)?,
            "DEFINE" | "UNDEF" => {
                let Some(symbol) = arg.split_whitespace().next() else {
                    return Err(self.missing(&name));
                };
                if name == "DEFINE" {
                    self.session.define(symbol);
                } else {
                    self.session.undef(symbol);
                }
            }
            "OCTAVE-REV" => {
                self.session.octave_rev =
                    parse_flag(&name, &arg).map_err(|e| self.session.error(e))?;
            }
            "EN-REV" => {
                self.session.en_rev = parse_flag(&name, &arg).map_err(|e| self.session.error(e))?;
            }
            "EOF" => {
                if let Some(cursor) = self.session.cursors.current_mut() {
                    cursor.skip_to_end();
                }
            }
            _ => match self.target.tunable(&name) {
                Some(tunable) => {
                    let value = match arg.parse::<i64>() {
                        Ok(v) => v,
                        Err(_) => return Err(self.missing(&name)),
                    };
                    if value < tunable.min || value > tunable.max {
                        return Err(self.session.error(MetaError::BadTunable {
                            name,
                            value,
                            min: tunable.min,
                            max: tunable.max,
                        }));
                    }
                    let song = self.song_index();
                    self.songs[song].set_tunable(tunable.name, value);
                }
                None => self.session.warn(format!("Unknown directive: #{}", name))?,
            },
        }
        Ok(())
    }

    fn missing(&self, directive: &str) -> Error {
        self.session
            .error(MetaError::MissingArgument(format!("#{}", directive)))
    }

    fn condition(&self, directive: &str, expr: &str) -> Result<bool> {
        if expr.is_empty() {
            return Err(self.missing(directive));
        }
        eval_condition(expr, |symbol| self.session.is_defined(symbol))
            .map_err(|e| self.session.error(e))
    }

    fn start_song(&mut self, directive: &str, arg: &str) -> Result<()> {
        let number = match arg.parse::<i64>() {
            Ok(n) => n,
            Err(_) => return Err(self.missing(directive)),
        };
        if number < MIN_SONG as i64 || number > MAX_SONG as i64 {
            return Err(self.session.error(MetaError::BadSongNumber(number)));
        }
        let number = number as u32;
        if self.songs.iter().any(|s| s.number() == number) {
            return Err(self.session.error(MetaError::DuplicateSong(number)));
        }
        self.finish_song()?;
        debug!("Starting song {}", number);
        self.songs.push(Song::new(number, self.target.as_ref()));
        self.current = Some(self.songs.len() - 1);
        Ok(())
    }

    /// Path of a file named in the source, relative to the including file
    fn resolve_path(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match self.session.cursor().and_then(Cursor::dir) {
            Some(dir) => dir.join(path),
            None => match &self.base_path {
                Some(base) => base.join(path),
                None => path.to_path_buf(),
            },
        }
    }

    fn include(&mut self, directive: &str, arg: &str) -> Result<()> {
        let file = unquote(arg);
        if file.is_empty() {
            return Err(self.missing(directive));
        }
        if self.session.cursors.depth() >= MAX_INCLUDE_DEPTH {
            return Err(self.session.error(MetaError::IncludeTooDeep));
        }
        let path = self.resolve_path(file);
        let path = path.canonicalize().unwrap_or(path);
        let name = path.display().to_string();
        if self.session.cursors.contains(&name) {
            return Err(self.session.error(MetaError::RecursiveInclude(name)));
        }
        let cursor = Cursor::open(&path).map_err(|e| {
            self.session.error(MetaError::BadInclude {
                file: file.to_string(),
                reason: e.to_string(),
            })
        })?;
        debug!("Including {}", name);
        self.session.cursors.push(cursor);
        self.line_start = true;
        Ok(())
    }

    // End of input

    /// Close the current song
    fn finish_song(&mut self) -> Result<()> {
        if let Some(open) = &self.pattern {
            return Err(self
                .session
                .error(format!("Unterminated pattern definition: {}", open.name)));
        }
        if self.group.is_some() {
            return Err(self.session.error("Unterminated channel group"));
        }
        let Some(song) = self.current.take() else {
            return Ok(());
        };
        if let Err(e) = self.songs[song].finalize() {
            return Err(self.session.error(e));
        }
        debug!(
            "Song {} finished, {} ticks",
            self.songs[song].number(),
            self.songs[song].total_ticks()
        );
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.session.conditions.depth() > 0 {
            return Err(self.session.error(MetaError::UnterminatedIf));
        }
        self.finish_song()
    }
}

fn store_effect(
    table: &mut effects::EffectTable,
    id: u32,
    list: ParamList,
    freq: Option<ApplyFreq>,
    sample: Option<PcmSample>,
) -> std::result::Result<(), EffectError> {
    table.append(id, list)?;
    if let Some(freq) = freq {
        table.set_freq(id, freq)?;
    }
    if let Some(sample) = sample {
        table.set_sample(id, sample)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::command::Command;
    use super::*;

    fn compile(target: &str, text: &str) -> Result<Compiler> {
        let mut compiler = Compiler::new(target)?;
        compiler.compile_str("test.mml", text)?;
        Ok(compiler)
    }

    fn commands<'a>(compiler: &'a Compiler, channel: &str) -> &'a [Command] {
        compiler.songs()[0].channel(channel).unwrap().commands()
    }

    fn note(pitch: u8, ticks: u16) -> Command {
        Command::Note {
            note: NoteKind::Pitch(pitch),
            ticks,
        }
    }

    #[test]
    fn test_basic_notes() {
        let compiler = compile("nes", "A o4 l8 c d4 e.\n").unwrap();
        assert_eq!(
            commands(&compiler, "A"),
            &[
                Command::Octave(4),
                note(0, 4),
                note(2, 8),
                note(4, 6),
                Command::End,
            ]
        );
    }

    #[test]
    fn test_accidentals_and_rests() {
        let compiler = compile("nes", "A c+4 d-4 e#4 r4 s4\n").unwrap();
        let cmds = commands(&compiler, "A");
        assert_eq!(cmds[1], note(1, 8));
        assert_eq!(cmds[2], note(1, 8));
        assert_eq!(cmds[3], note(5, 8));
        assert_eq!(
            cmds[4],
            Command::Note {
                note: NoteKind::Rest,
                ticks: 8
            }
        );
        assert_eq!(
            cmds[5],
            Command::Note {
                note: NoteKind::Wait,
                ticks: 8
            }
        );
    }

    #[test]
    fn test_tie_and_slur() {
        let compiler = compile("nes", "A c4^8 d4&d8\n").unwrap();
        let cmds = commands(&compiler, "A");
        assert_eq!(cmds[1], note(0, 12));
        assert_eq!(cmds[2], note(2, 12));

        let err = compile("nes", "A c4&d4\n").err().unwrap();
        assert_eq!(err.message(), Some("Bad note: slur requires the same note"));
    }

    #[test]
    fn test_channel_selection_persists() {
        let compiler = compile("nes", "AB c4\nd4\n").unwrap();
        assert_eq!(commands(&compiler, "A").len(), 4);
        assert_eq!(commands(&compiler, "B").len(), 4);
        assert_eq!(commands(&compiler, "C"), &[Command::End]);
    }

    #[test]
    fn test_channel_group() {
        let compiler = compile("nes", "A c4 (B d4) e4\n").unwrap();
        assert_eq!(commands(&compiler, "A").len(), 4);
        assert_eq!(commands(&compiler, "B"), &[Command::Octave(4), note(2, 8), Command::End]);
    }

    #[test]
    fn test_loop_point() {
        let compiler = compile("nes", "A c4 L d4\n").unwrap();
        let cmds = commands(&compiler, "A");
        assert_eq!(cmds.last(), Some(&Command::Jmp(2)));
        assert_eq!(cmds[2], Command::Octave(4));
    }

    #[test]
    fn test_no_active_channel() {
        let err = compile("nes", "c4\n").err().unwrap();
        assert_eq!(err.message(), Some("Note requires at least one active channel"));

        let compiler = compile("nes", "o5 l8 k6 t150\n").unwrap();
        assert_eq!(compiler.warnings().len(), 4);

        let err = compile("nes", "q4\n").err().unwrap();
        assert_eq!(err.message(), Some("q requires at least one active channel"));
    }

    #[test]
    fn test_effect_definition_and_selection() {
        let compiler = compile("nes", "@EN1 = {0 4 7}\nAB EN1 c4\n").unwrap();
        let table = compiler.effects().table(EffectKind::Arpeggio);
        assert_eq!(table.ref_count(1), 2);
        assert_eq!(
            commands(&compiler, "A")[0],
            Command::Mac {
                kind: EffectKind::Arpeggio,
                id: 1
            }
        );

        let err = compile("nes", "@EN1 = {0}\n@EN1 = {1}\n").err().unwrap();
        assert_eq!(err.message(), Some("Redefinition of @EN1"));

        let err = compile("nes", "A EP4\n").err().unwrap();
        assert_eq!(err.message(), Some("Undefined effect: EP4"));
    }

    #[test]
    fn test_en_rev() {
        let compiler = compile("nes", "#EN-REV 1\n@EN0 = {0 4 -7}\n").unwrap();
        let effect = compiler.effects().table(EffectKind::Arpeggio).get(0).unwrap();
        assert_eq!(effect.list.main_ints(), Some(vec![0, -4, 7]));
    }

    #[test]
    fn test_duty_resolution() {
        let compiler = compile("nes", "@1 = {0 1 2}\nA @1 @2\n").unwrap();
        let cmds = commands(&compiler, "A");
        assert_eq!(
            cmds[0],
            Command::Mac {
                kind: EffectKind::Duty,
                id: 1
            }
        );
        assert_eq!(
            cmds[1],
            Command::Param {
                param: Param::Duty,
                value: 2
            }
        );
    }

    #[test]
    fn test_unsupported_effect_warns() {
        let compiler = compile("nes", "@EN1 = {0 4}\nE EN1\n").unwrap();
        assert_eq!(compiler.warnings().len(), 1);
        assert_eq!(commands(&compiler, "E"), &[Command::End]);
    }

    #[test]
    fn test_inline_adsr() {
        let compiler = compile("c64", "A ADSR(1, 2, 3, 4) ADSR(1, 2, 3, 4)\n").unwrap();
        let table = compiler.effects().table(EffectKind::Adsr);
        assert_eq!(table.len(), 1);
        assert_eq!(table.ref_count(effects::FIRST_IMPLICIT_ADSR), 2);
    }

    #[test]
    fn test_patterns() {
        let compiler = compile("nes", "\\riff{ c4 d4 }\nA \\riff() \\riff()\n").unwrap();
        let song = &compiler.songs()[0];
        assert_eq!(song.patterns().len(), 1);
        assert_eq!(song.patterns()[0].ticks, 16);
        assert_eq!(song.channel("A").unwrap().ticks(), 32);
        assert_eq!(commands(&compiler, "A")[0], Command::Jsr(0));

        let err = compile("nes", "A \\nope()\n").err().unwrap();
        assert_eq!(err.message(), Some("Undefined pattern: nope"));
    }

    #[test]
    fn test_macros() {
        let compiler = compile("nes", "$arp(n, l=8){ %1%%2% }\nA $arp(c) $arp(d, 4)\n").unwrap();
        assert_eq!(compiler.macro_count(), 1);
        let cmds = commands(&compiler, "A");
        assert_eq!(cmds[1], note(0, 4));
        assert_eq!(cmds[2], note(2, 8));
    }

    #[test]
    fn test_callbacks() {
        let compiler = compile("nes", "A !sfx !fade(EVERY-NOTE) !sfx\n").unwrap();
        assert_eq!(compiler.callbacks().len(), 2);
        assert_eq!(
            commands(&compiler, "A")[1],
            Command::Callback {
                index: 1,
                freq: CallbackFreq::EveryNote
            }
        );
    }

    #[test]
    fn test_conditionals() {
        let text = "#IFDEF PAL\nA c4\n#ELSE\nA d4\n#ENDIF\n";
        let compiler = compile("nes", text).unwrap();
        assert_eq!(commands(&compiler, "A")[1], note(2, 8));

        let mut compiler = Compiler::with_options(&CompileOptions {
            target: "nes".into(),
            defines: vec!["PAL".into()],
            warnings_as_errors: false,
        })
        .unwrap();
        compiler.compile_str("test.mml", text).unwrap();
        assert_eq!(commands(&compiler, "A")[1], note(0, 8));

        let compiler = compile("nes", "#IFNDEF PAL\nA e4\n#ENDIF\n").unwrap();
        assert_eq!(commands(&compiler, "A")[1], note(4, 8));

        let err = compile("nes", "#ENDIF\n").err().unwrap();
        assert_eq!(err.message(), Some("ENDIF with no matching IFDEF"));
        let err = compile("nes", "#IFDEF X\n").err().unwrap();
        assert_eq!(err.message(), Some("Unterminated IFDEF"));
    }

    #[test]
    fn test_songs() {
        let compiler = compile("nes", "#SONG 2\nA c4\n#SONG 5\nB d4\n").unwrap();
        let numbers: Vec<_> = compiler.songs().iter().map(Song::number).collect();
        assert_eq!(numbers, vec![2, 5]);
        assert!(compiler.songs().iter().all(Song::is_finalized));

        assert!(compile("nes", "#SONG 0\n").is_err());
        assert!(compile("nes", "#SONG 3\n#SONG 3\n").is_err());
    }

    #[test]
    fn test_metadata_and_tunables() {
        let compiler = compile(
            "gbc",
            "#TITLE \"Demo\"\n#COMPOSER someone\n#GB-VOLUME-CONTROL 1\n",
        )
        .unwrap();
        assert_eq!(compiler.metadata().title, "Demo");
        assert_eq!(compiler.metadata().composer, "someone");
        assert_eq!(compiler.songs()[0].tunable("GB-VOLUME-CONTROL"), Some(1));
    }

    #[test]
    fn test_unknown_directive_warns() {
        let compiler = compile("nes", "#WHATEVER 1\n").unwrap();
        assert_eq!(compiler.warnings()[0].message, "Unknown directive: #WHATEVER");
    }

    #[test]
    fn test_eof_and_comments() {
        let compiler = compile("nes", "A c4 ; d4\n/* e4\n f4 */ g4\n#EOF\na4\n").unwrap();
        assert_eq!(commands(&compiler, "A").len(), 4);
    }

    #[test]
    fn test_octave_rev() {
        let compiler = compile("nes", "#OCTAVE-REV 1\nA o4 c4 < c4\n").unwrap();
        assert_eq!(commands(&compiler, "A")[2], Command::OctaveUp(1));
    }

    #[test]
    fn test_tuple() {
        let compiler = compile("nes", "A {c d e}4\n").unwrap();
        let cmds = commands(&compiler, "A");
        assert_eq!(cmds[1], note(0, 3));
        assert_eq!(cmds[2], note(2, 3));
        assert_eq!(cmds[3], note(4, 2));
    }

    #[test]
    fn test_register_write() {
        let compiler = compile("gen", "A w(1)0x40,127\n").unwrap();
        assert_eq!(
            commands(&compiler, "A")[0],
            Command::Write {
                port: Some(1),
                addr: 0x40,
                value: 127
            }
        );
    }
}
