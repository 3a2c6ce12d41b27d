//! Multi-letter commands of the note stream, matched longest first

use super::command::Param;
use super::effects::EffectKind;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    /// Select an effect (`EN1`)
    Select(EffectKind),
    /// Turn an effect off (`ENOF`)
    Off(EffectKind),
    /// Set a channel parameter (`D3`)
    Param(Param),
    /// Turn SSG-EG off
    SsgOff,
    /// `L`
    LoopPoint,
}

const KEYWORDS: &[(&str, Keyword)] = &[
    ("ADSR", Keyword::Select(EffectKind::Adsr)),
    ("AM", Keyword::Param(Param::Am)),
    ("CS", Keyword::Select(EffectKind::Pan)),
    ("CSOF", Keyword::Off(EffectKind::Pan)),
    ("D", Keyword::Param(Param::Detune)),
    ("EN", Keyword::Select(EffectKind::Arpeggio)),
    ("ENOF", Keyword::Off(EffectKind::Arpeggio)),
    ("EP", Keyword::Select(EffectKind::Pitch)),
    ("EPOF", Keyword::Off(EffectKind::Pitch)),
    ("FB", Keyword::Param(Param::Feedback)),
    ("FBM", Keyword::Select(EffectKind::Feedback)),
    ("FBMOF", Keyword::Off(EffectKind::Feedback)),
    ("FT", Keyword::Select(EffectKind::Filter)),
    ("FTOF", Keyword::Off(EffectKind::Filter)),
    ("K", Keyword::Param(Param::Transpose)),
    ("L", Keyword::LoopPoint),
    ("M", Keyword::Param(Param::Mode)),
    ("MF", Keyword::Param(Param::Multiplier)),
    ("MOD", Keyword::Select(EffectKind::Modulation)),
    ("MODOF", Keyword::Off(EffectKind::Modulation)),
    ("MP", Keyword::Select(EffectKind::Vibrato)),
    ("MPOF", Keyword::Off(EffectKind::Vibrato)),
    ("OP", Keyword::Param(Param::Operator)),
    ("PT", Keyword::Select(EffectKind::PulseWidth)),
    ("PTOF", Keyword::Off(EffectKind::PulseWidth)),
    ("RING", Keyword::Param(Param::Ring)),
    ("RS", Keyword::Param(Param::RateScale)),
    ("SSG", Keyword::Param(Param::Ssg)),
    ("SSGOF", Keyword::SsgOff),
    ("SYNC", Keyword::Param(Param::Sync)),
    ("WT", Keyword::Select(EffectKind::Waveform)),
    ("WTM", Keyword::Select(EffectKind::WaveformMacro)),
    ("WTOF", Keyword::Off(EffectKind::Waveform)),
    ("n", Keyword::Param(Param::Noise)),
    ("pw", Keyword::Param(Param::PulseWidth)),
];

#[derive(Debug, Default)]
struct Node {
    children: BTreeMap<u8, usize>,
    keyword: Option<Keyword>,
}

/// Byte trie over the keyword table
#[derive(Debug)]
pub struct KeywordTrie {
    nodes: Vec<Node>,
}

impl Default for KeywordTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordTrie {
    pub fn new() -> Self {
        let mut trie = Self {
            nodes: vec![Node::default()],
        };
        for &(text, keyword) in KEYWORDS {
            trie.insert(text, keyword);
        }
        trie
    }

    fn insert(&mut self, text: &str, keyword: Keyword) {
        let mut node = 0;
        for &b in text.as_bytes() {
            node = match self.nodes[node].children.get(&b) {
                Some(&next) => next,
                None => {
                    self.nodes.push(Node::default());
                    let next = self.nodes.len() - 1;
                    self.nodes[node].children.insert(b, next);
                    next
                }
            };
        }
        self.nodes[node].keyword = Some(keyword);
    }

    /// Longest keyword at the start of `input` and its length
    pub fn longest_match(&self, input: &[u8]) -> Option<(Keyword, usize)> {
        let mut node = 0;
        let mut best = None;
        for (i, b) in input.iter().enumerate() {
            match self.nodes[node].children.get(b) {
                Some(&next) => node = next,
                None => break,
            }
            if let Some(keyword) = self.nodes[node].keyword {
                best = Some((keyword, i + 1));
            }
        }
        best
    }

    /// Longest keyword length, for sizing lookahead
    pub fn max_len(&self) -> usize {
        KEYWORDS.iter().map(|(t, _)| t.len()).max().unwrap_or(0)
    }
}
