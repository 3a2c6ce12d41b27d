//! Songs, patterns and callbacks

use super::channel::{Channel, ChannelResult, OctaveEffect, PATTERN_CHANNEL};
use super::command::CommandBuffer;
use crate::targets::Target;
use std::collections::BTreeMap;

pub const MIN_SONG: u32 = 1;
pub const MAX_SONG: u32 = 99;

/// A recorded `\name{...}` subroutine
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub name: String,
    /// Body, terminated by RTS
    pub commands: CommandBuffer,
    pub has_note: bool,
    pub ticks: u64,
    pub octave: OctaveEffect,
}

/// A host routine referenced by `!name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callback {
    pub name: String,
}

/// One compiled song
#[derive(Debug, Clone)]
pub struct Song {
    number: u32,
    /// Physical channels followed by the pattern channel
    channels: Vec<Channel>,
    patterns: Vec<Pattern>,
    tunables: BTreeMap<String, i64>,
    finalized: bool,
}

impl Song {
    pub fn new(number: u32, target: &dyn Target) -> Self {
        let rate = target.update_rate();
        let mut channels: Vec<Channel> = target
            .channels()
            .iter()
            .map(|caps| Channel::new(caps.name, caps, rate))
            .collect();
        if let Some(first) = target.channels().first() {
            channels.push(Channel::new(PATTERN_CHANNEL, first, rate));
        }
        let tunables = target
            .tunables()
            .iter()
            .map(|t| (t.name.to_string(), t.default))
            .collect();
        Self {
            number,
            channels,
            patterns: Vec::new(),
            tunables,
            finalized: false,
        }
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    /// Physical channels
    pub fn channels(&self) -> &[Channel] {
        &self.channels[..self.channels.len().saturating_sub(1)]
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels().iter().find(|c| c.name() == name)
    }

    /// Physical channels and the pattern channel
    pub(crate) fn all_channels_mut(&mut self) -> &mut [Channel] {
        &mut self.channels
    }

    pub(crate) fn pattern_channel_index(&self) -> usize {
        self.channels.len().saturating_sub(1)
    }

    pub fn pattern_channel(&self) -> Option<&Channel> {
        self.channels.last()
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn find_pattern(&self, name: &str) -> Option<usize> {
        self.patterns.iter().position(|p| p.name == name)
    }

    pub(crate) fn add_pattern(&mut self, pattern: Pattern) -> usize {
        self.patterns.push(pattern);
        self.patterns.len() - 1
    }

    pub fn tunable(&self, name: &str) -> Option<i64> {
        self.tunables.get(name).copied()
    }

    pub fn tunables(&self) -> &BTreeMap<String, i64> {
        &self.tunables
    }

    pub(crate) fn set_tunable(&mut self, name: &str, value: i64) {
        self.tunables.insert(name.to_string(), value);
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Terminate every physical channel
    pub(crate) fn finalize(&mut self) -> ChannelResult<()> {
        let n = self.pattern_channel_index();
        for channel in &mut self.channels[..n] {
            channel.finalize()?;
        }
        self.finalized = true;
        Ok(())
    }

    /// Longest channel in ticks
    pub fn total_ticks(&self) -> u64 {
        self.channels().iter().map(Channel::ticks).max().unwrap_or(0)
    }
}
