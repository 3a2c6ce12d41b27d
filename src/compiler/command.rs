//! Compiled command records and their byte encoding
//!
//! A channel's output is kept as a list of fixed-size [`Command`] records.
//! Branch instructions refer to other records by index; the byte offsets the
//! player sees only exist once a buffer is encoded.

use super::effects::EffectKind;
use serde::Serialize;

/// Opcode bytes of the encoded stream
pub mod opcode {
    /// `NOTE + pitch` (0..=11), followed by a 16-bit tick count
    pub const NOTE: u8 = 0x00;
    pub const REST: u8 = 0x0C;
    pub const WAIT: u8 = 0x0D;
    pub const OCTAVE: u8 = 0x10;
    pub const OCTUP: u8 = 0x11;
    pub const OCTDN: u8 = 0x12;
    pub const VOLSET: u8 = 0x20;
    pub const VOLUP: u8 = 0x21;
    pub const VOLDN: u8 = 0x22;
    pub const TEMPO: u8 = 0x28;
    pub const CUTOFF: u8 = 0x29;
    pub const LOPCNT: u8 = 0x30;
    pub const DJNZ: u8 = 0x31;
    pub const J1: u8 = 0x32;
    pub const JMP: u8 = 0x33;
    pub const JSR: u8 = 0x34;
    pub const RTS: u8 = 0x35;
    pub const END: u8 = 0x36;
    /// `MAC + kind`, followed by the effect id
    pub const MAC: u8 = 0x40;
    /// `MACOFF + kind`
    pub const MACOFF: u8 = 0x50;
    /// `PARAM + param`, followed by a signed 16-bit value
    pub const PARAM: u8 = 0x60;
    pub const WRITE: u8 = 0x70;
    pub const CALLBACK: u8 = 0x78;
}

/// Port byte used by WRITE when no port was given
pub const NO_PORT: u8 = 0xFF;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Fixup slot {0} does not hold a patchable instruction")]
    BadFixup(usize),

    #[error("Jump target {0} is out of range")]
    BadTarget(usize),

    #[error("Jump target {target} lies at byte offset {offset}, past the 16-bit operand range")]
    TargetTooFar { target: usize, offset: usize },

    #[error("Unknown opcode 0x{opcode:02X} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("Truncated instruction at offset {0}")]
    Truncated(usize),

    #[error("Jump at offset {offset} lands inside an instruction (0x{target:04X})")]
    MisalignedTarget { offset: usize, target: usize },
}

/// Pitch class or rest kind of a note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoteKind {
    /// Semitone within the octave, 0 = C
    Pitch(u8),
    Rest,
    /// Rest without key-off
    Wait,
}

impl NoteKind {
    fn opcode(self) -> u8 {
        match self {
            NoteKind::Pitch(p) => opcode::NOTE + p,
            NoteKind::Rest => opcode::REST,
            NoteKind::Wait => opcode::WAIT,
        }
    }

    pub fn is_pitch(self) -> bool {
        matches!(self, NoteKind::Pitch(_))
    }
}

/// Single-value channel parameters carried by PARAM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Param {
    Duty,
    Detune,
    Transpose,
    Feedback,
    Am,
    Operator,
    RateScale,
    Multiplier,
    Ssg,
    Ring,
    Sync,
    Mode,
    Noise,
    PulseWidth,
}

impl Param {
    pub const ALL: [Param; 14] = [
        Param::Duty,
        Param::Detune,
        Param::Transpose,
        Param::Feedback,
        Param::Am,
        Param::Operator,
        Param::RateScale,
        Param::Multiplier,
        Param::Ssg,
        Param::Ring,
        Param::Sync,
        Param::Mode,
        Param::Noise,
        Param::PulseWidth,
    ];

    pub fn index(self) -> u8 {
        Self::ALL.iter().position(|&p| p == self).unwrap_or(0) as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Command name as written in MML
    pub fn mnemonic(self) -> &'static str {
        match self {
            Param::Duty => "@",
            Param::Detune => "D",
            Param::Transpose => "K",
            Param::Feedback => "FB",
            Param::Am => "AM",
            Param::Operator => "OP",
            Param::RateScale => "RS",
            Param::Multiplier => "MF",
            Param::Ssg => "SSG",
            Param::Ring => "RING",
            Param::Sync => "SYNC",
            Param::Mode => "M",
            Param::Noise => "n",
            Param::PulseWidth => "pw",
        }
    }
}

/// How `q` cuts a note short
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CutoffMode {
    /// Key off `value` frames after the note starts
    FromStart,
    /// Key off `value` frames before the note ends
    FromEnd,
}

/// How often a callback fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallbackFreq {
    Once,
    EveryNote,
}

/// One compiled instruction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Command {
    Note { note: NoteKind, ticks: u16 },
    Octave(u8),
    OctaveUp(u8),
    OctaveDown(u8),
    VolSet(u8),
    VolUp(u8),
    VolDown(u8),
    Tempo(u16),
    Cutoff { mode: CutoffMode, value: u8 },
    LoopCount(u8),
    /// Decrement the loop counter and jump to the record index while non-zero
    Djnz(usize),
    /// Jump to the record index on the last loop iteration
    J1(usize),
    Jmp(usize),
    /// Call pattern by index
    Jsr(u16),
    Rts,
    End,
    Mac { kind: EffectKind, id: u8 },
    MacOff(EffectKind),
    Param { param: Param, value: i16 },
    Write { port: Option<u8>, addr: u16, value: u8 },
    Callback { index: u8, freq: CallbackFreq },
}

impl Command {
    /// Size of the instruction in the encoded stream
    pub fn encoded_len(&self) -> usize {
        match self {
            Command::Rts | Command::End | Command::MacOff(_) => 1,
            Command::Octave(_)
            | Command::OctaveUp(_)
            | Command::OctaveDown(_)
            | Command::VolSet(_)
            | Command::VolUp(_)
            | Command::VolDown(_)
            | Command::LoopCount(_)
            | Command::Mac { .. } => 2,
            Command::Note { .. }
            | Command::Tempo(_)
            | Command::Cutoff { .. }
            | Command::Djnz(_)
            | Command::J1(_)
            | Command::Jmp(_)
            | Command::Jsr(_)
            | Command::Param { .. }
            | Command::Callback { .. } => 3,
            Command::Write { .. } => 5,
        }
    }

    /// Record index this instruction branches to, if any
    pub fn target(&self) -> Option<usize> {
        match *self {
            Command::Djnz(t) | Command::J1(t) | Command::Jmp(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_note(&self) -> bool {
        matches!(self, Command::Note { .. })
    }

    fn encode_into(&self, out: &mut Vec<u8>, offsets: &[usize]) -> Result<(), CommandError> {
        let branch = |t: usize| -> Result<u16, CommandError> {
            let offset = *offsets.get(t).ok_or(CommandError::BadTarget(t))?;
            u16::try_from(offset).map_err(|_| CommandError::TargetTooFar { target: t, offset })
        };
        match *self {
            Command::Note { note, ticks } => {
                out.push(note.opcode());
                out.extend_from_slice(&ticks.to_le_bytes());
            }
            Command::Octave(n) => out.extend_from_slice(&[opcode::OCTAVE, n]),
            Command::OctaveUp(n) => out.extend_from_slice(&[opcode::OCTUP, n]),
            Command::OctaveDown(n) => out.extend_from_slice(&[opcode::OCTDN, n]),
            Command::VolSet(v) => out.extend_from_slice(&[opcode::VOLSET, v]),
            Command::VolUp(v) => out.extend_from_slice(&[opcode::VOLUP, v]),
            Command::VolDown(v) => out.extend_from_slice(&[opcode::VOLDN, v]),
            Command::Tempo(t) => {
                out.push(opcode::TEMPO);
                out.extend_from_slice(&t.to_le_bytes());
            }
            Command::Cutoff { mode, value } => {
                let mode = match mode {
                    CutoffMode::FromStart => 0,
                    CutoffMode::FromEnd => 1,
                };
                out.extend_from_slice(&[opcode::CUTOFF, mode, value]);
            }
            Command::LoopCount(n) => out.extend_from_slice(&[opcode::LOPCNT, n]),
            Command::Djnz(t) => {
                out.push(opcode::DJNZ);
                out.extend_from_slice(&branch(t)?.to_le_bytes());
            }
            Command::J1(t) => {
                out.push(opcode::J1);
                out.extend_from_slice(&branch(t)?.to_le_bytes());
            }
            Command::Jmp(t) => {
                out.push(opcode::JMP);
                out.extend_from_slice(&branch(t)?.to_le_bytes());
            }
            Command::Jsr(p) => {
                out.push(opcode::JSR);
                out.extend_from_slice(&p.to_le_bytes());
            }
            Command::Rts => out.push(opcode::RTS),
            Command::End => out.push(opcode::END),
            Command::Mac { kind, id } => out.extend_from_slice(&[opcode::MAC + kind.index(), id]),
            Command::MacOff(kind) => out.push(opcode::MACOFF + kind.index()),
            Command::Param { param, value } => {
                out.push(opcode::PARAM + param.index());
                out.extend_from_slice(&value.to_le_bytes());
            }
            Command::Write { port, addr, value } => {
                out.push(opcode::WRITE);
                out.push(port.unwrap_or(NO_PORT));
                out.extend_from_slice(&addr.to_le_bytes());
                out.push(value);
            }
            Command::Callback { index, freq } => {
                let freq = match freq {
                    CallbackFreq::Once => 0,
                    CallbackFreq::EveryNote => 1,
                };
                out.extend_from_slice(&[opcode::CALLBACK, index, freq]);
            }
        }
        Ok(())
    }
}

/// Pending patch location inside a [`CommandBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixup {
    pub slot: usize,
}

/// Append-only list of command records with explicit fixups
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommandBuffer {
    commands: Vec<Command>,
    #[serde(skip)]
    pending: Vec<usize>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn last(&self) -> Option<&Command> {
        self.commands.last()
    }

    /// Append a record and return its index
    pub fn push(&mut self, command: Command) -> usize {
        self.commands.push(command);
        self.commands.len() - 1
    }

    /// Append a record whose operand is filled in later
    pub fn push_fixup(&mut self, command: Command) -> Fixup {
        let slot = self.push(command);
        self.pending.push(slot);
        Fixup { slot }
    }

    pub fn resolve_loop_count(&mut self, fixup: Fixup, count: u8) -> Result<(), CommandError> {
        match self.commands.get_mut(fixup.slot) {
            Some(Command::LoopCount(n)) => *n = count,
            _ => return Err(CommandError::BadFixup(fixup.slot)),
        }
        self.pending.retain(|&s| s != fixup.slot);
        Ok(())
    }

    pub fn resolve_target(&mut self, fixup: Fixup, target: usize) -> Result<(), CommandError> {
        if target > self.commands.len() {
            return Err(CommandError::BadTarget(target));
        }
        match self.commands.get_mut(fixup.slot) {
            Some(Command::J1(t)) | Some(Command::Jmp(t)) | Some(Command::Djnz(t)) => *t = target,
            _ => return Err(CommandError::BadFixup(fixup.slot)),
        }
        self.pending.retain(|&s| s != fixup.slot);
        Ok(())
    }

    /// Slots whose operand was never resolved
    pub fn unresolved(&self) -> &[usize] {
        &self.pending
    }

    pub fn extend(&mut self, commands: impl IntoIterator<Item = Command>) {
        self.commands.extend(commands);
    }

    /// Byte offset of every record, plus the end of the stream
    pub fn byte_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.commands.len() + 1);
        let mut pos = 0;
        for cmd in &self.commands {
            offsets.push(pos);
            pos += cmd.encoded_len();
        }
        offsets.push(pos);
        offsets
    }

    /// Encode to the player's byte stream
    pub fn encode(&self) -> Result<Vec<u8>, CommandError> {
        let offsets = self.byte_offsets();
        let mut out = Vec::with_capacity(offsets[offsets.len() - 1]);
        for cmd in &self.commands {
            cmd.encode_into(&mut out, &offsets)?;
        }
        Ok(out)
    }
}

fn read_u16(bytes: &[u8], pos: usize) -> Result<u16, CommandError> {
    match bytes.get(pos..pos + 2) {
        Some(b) => Ok(u16::from_le_bytes([b[0], b[1]])),
        None => Err(CommandError::Truncated(pos)),
    }
}

fn read_u8(bytes: &[u8], pos: usize) -> Result<u8, CommandError> {
    bytes.get(pos).copied().ok_or(CommandError::Truncated(pos))
}

/// Decode an encoded stream back into records
///
/// Branch operands are converted from byte offsets back to record indices.
pub fn disassemble(bytes: &[u8]) -> Result<Vec<Command>, CommandError> {
    let mut raw = Vec::new();
    let mut offsets = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let op = bytes[pos];
        offsets.push(pos);
        let (cmd, len) = match op {
            0x00..=0x0D => {
                let note = match op {
                    opcode::REST => NoteKind::Rest,
                    opcode::WAIT => NoteKind::Wait,
                    p => NoteKind::Pitch(p),
                };
                (Command::Note { note, ticks: read_u16(bytes, pos + 1)? }, 3)
            }
            opcode::OCTAVE => (Command::Octave(read_u8(bytes, pos + 1)?), 2),
            opcode::OCTUP => (Command::OctaveUp(read_u8(bytes, pos + 1)?), 2),
            opcode::OCTDN => (Command::OctaveDown(read_u8(bytes, pos + 1)?), 2),
            opcode::VOLSET => (Command::VolSet(read_u8(bytes, pos + 1)?), 2),
            opcode::VOLUP => (Command::VolUp(read_u8(bytes, pos + 1)?), 2),
            opcode::VOLDN => (Command::VolDown(read_u8(bytes, pos + 1)?), 2),
            opcode::TEMPO => (Command::Tempo(read_u16(bytes, pos + 1)?), 3),
            opcode::CUTOFF => {
                let mode = if read_u8(bytes, pos + 1)? == 0 {
                    CutoffMode::FromStart
                } else {
                    CutoffMode::FromEnd
                };
                (Command::Cutoff { mode, value: read_u8(bytes, pos + 2)? }, 3)
            }
            opcode::LOPCNT => (Command::LoopCount(read_u8(bytes, pos + 1)?), 2),
            opcode::DJNZ => (Command::Djnz(read_u16(bytes, pos + 1)? as usize), 3),
            opcode::J1 => (Command::J1(read_u16(bytes, pos + 1)? as usize), 3),
            opcode::JMP => (Command::Jmp(read_u16(bytes, pos + 1)? as usize), 3),
            opcode::JSR => (Command::Jsr(read_u16(bytes, pos + 1)?), 3),
            opcode::RTS => (Command::Rts, 1),
            opcode::END => (Command::End, 1),
            opcode::WRITE => {
                let port = match read_u8(bytes, pos + 1)? {
                    NO_PORT => None,
                    p => Some(p),
                };
                let cmd = Command::Write {
                    port,
                    addr: read_u16(bytes, pos + 2)?,
                    value: read_u8(bytes, pos + 4)?,
                };
                (cmd, 5)
            }
            opcode::CALLBACK => {
                let freq = if read_u8(bytes, pos + 2)? == 0 {
                    CallbackFreq::Once
                } else {
                    CallbackFreq::EveryNote
                };
                (Command::Callback { index: read_u8(bytes, pos + 1)?, freq }, 3)
            }
            _ if (opcode::MAC..opcode::MACOFF).contains(&op) => {
                match EffectKind::from_index(op - opcode::MAC) {
                    Some(kind) => (Command::Mac { kind, id: read_u8(bytes, pos + 1)? }, 2),
                    None => return Err(CommandError::UnknownOpcode { opcode: op, offset: pos }),
                }
            }
            _ if (opcode::MACOFF..opcode::PARAM).contains(&op) => {
                match EffectKind::from_index(op - opcode::MACOFF) {
                    Some(kind) => (Command::MacOff(kind), 1),
                    None => return Err(CommandError::UnknownOpcode { opcode: op, offset: pos }),
                }
            }
            _ if (opcode::PARAM..opcode::WRITE).contains(&op) => {
                match Param::from_index(op - opcode::PARAM) {
                    Some(param) => {
                        let value = read_u16(bytes, pos + 1)? as i16;
                        (Command::Param { param, value }, 3)
                    }
                    None => return Err(CommandError::UnknownOpcode { opcode: op, offset: pos }),
                }
            }
            _ => return Err(CommandError::UnknownOpcode { opcode: op, offset: pos }),
        };
        raw.push(cmd);
        pos += len;
    }
    offsets.push(pos);

    let to_index = |at: usize, target: usize| -> Result<usize, CommandError> {
        offsets
            .binary_search(&target)
            .map_err(|_| CommandError::MisalignedTarget { offset: offsets[at], target })
    };

    for i in 0..raw.len() {
        raw[i] = match raw[i] {
            Command::Djnz(t) => Command::Djnz(to_index(i, t)?),
            Command::J1(t) => Command::J1(to_index(i, t)?),
            Command::Jmp(t) => Command::Jmp(to_index(i, t)?),
            ref other => other.clone(),
        };
    }

    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_encoding() {
        let mut buf = CommandBuffer::new();
        buf.push(Command::Octave(4));
        buf.push(Command::Note { note: NoteKind::Pitch(0), ticks: 8 });
        assert_eq!(buf.encode().unwrap(), vec![0x10, 4, 0x00, 8, 0]);
    }

    #[test]
    fn test_fixup_resolution() {
        let mut buf = CommandBuffer::new();
        let count = buf.push_fixup(Command::LoopCount(0));
        buf.push(Command::Note { note: NoteKind::Rest, ticks: 4 });
        buf.push(Command::Djnz(1));
        assert_eq!(buf.unresolved(), &[0]);
        buf.resolve_loop_count(count, 3).unwrap();
        assert!(buf.unresolved().is_empty());
        assert_eq!(buf.commands()[0], Command::LoopCount(3));
        assert_eq!(buf.resolve_loop_count(Fixup { slot: 1 }, 2), Err(CommandError::BadFixup(1)));
    }

    #[test]
    fn test_disassemble_restores_jump_targets() {
        let mut buf = CommandBuffer::new();
        let count = buf.push_fixup(Command::LoopCount(0));
        buf.push(Command::Note { note: NoteKind::Pitch(2), ticks: 8 });
        let skip = buf.push_fixup(Command::J1(0));
        buf.push(Command::Write { port: None, addr: 0x4000, value: 0x3F });
        buf.push(Command::Djnz(1));
        let end = buf.len();
        buf.resolve_loop_count(count, 2).unwrap();
        buf.resolve_target(skip, end).unwrap();
        buf.push(Command::End);

        let bytes = buf.encode().unwrap();
        // J1 operand is the byte offset of END
        assert_eq!(&bytes[5..8], &[opcode::J1, 16, 0]);

        let decoded = disassemble(&bytes).unwrap();
        assert_eq!(decoded, buf.commands());
    }

    #[test]
    fn test_disassemble_rejects_misaligned_jump() {
        let bytes = [opcode::JMP, 1, 0];
        assert!(matches!(
            disassemble(&bytes),
            Err(CommandError::MisalignedTarget { target: 1, .. })
        ));
    }

    #[test]
    fn test_far_jump_is_rejected() {
        let rest = Command::Note { note: NoteKind::Rest, ticks: 1 };
        let mut buf = CommandBuffer::new();
        for _ in 0..21845 {
            buf.push(rest.clone());
        }
        // last byte offset a 16-bit operand can hold
        let edge = buf.push(Command::Jmp(0));
        buf.push(Command::Jmp(edge));
        assert_eq!(buf.byte_offsets()[edge], 65535);
        assert!(buf.encode().is_ok());

        let past = buf.push(rest);
        buf.push(Command::Jmp(past));
        assert_eq!(
            buf.encode(),
            Err(CommandError::TargetTooFar { target: past, offset: 65541 })
        );
    }

    #[test]
    fn test_mac_opcodes() {
        let mut buf = CommandBuffer::new();
        buf.push(Command::Mac { kind: EffectKind::Pitch, id: 3 });
        buf.push(Command::MacOff(EffectKind::Pitch));
        let bytes = buf.encode().unwrap();
        assert_eq!(bytes[0], opcode::MAC + EffectKind::Pitch.index());
        assert_eq!(disassemble(&bytes).unwrap(), buf.commands());
    }
}
