//! Integration tests for MML compilation and the MMLB container
//!
//! These tests compile MML end to end and check the channel streams, then
//! write MMLB, read it back with OutputReader and compare.

use mmlc::compiler::command::{disassemble, Command, NoteKind};
use mmlc::compiler::effects::EffectKind;
use mmlc::output::reader::{decompress, read_file, Module, OutputReader};
use mmlc::output::writer::{to_bytes, write_file};
use mmlc::output::MmlbJson;
use mmlc::{CompileOptions, Compiler, Error};
use std::fs;
use tempfile::tempdir;

/// Helper to compile MML held in memory
fn compile(target: &str, mml: &str) -> Compiler {
    let mut compiler = Compiler::new(target).expect("Unknown target");
    compiler
        .compile_str("test.mml", mml)
        .expect("Compilation failed");
    compiler
}

/// Helper to compile MML that must fail and return the error message
fn compile_err(target: &str, mml: &str) -> String {
    let mut compiler = Compiler::new(target).expect("Unknown target");
    let err = compiler
        .compile_str("test.mml", mml)
        .expect_err("Compilation should have failed");
    err.message().unwrap_or_default().to_string()
}

fn compile_with_defines(mml: &str, defines: &[&str]) -> Compiler {
    let options = CompileOptions {
        defines: defines.iter().map(|s| s.to_string()).collect(),
        ..CompileOptions::default()
    };
    let mut compiler = Compiler::with_options(&options).unwrap();
    compiler.compile_str("test.mml", mml).expect("Compilation failed");
    compiler
}

fn commands<'a>(compiler: &'a Compiler, channel: &str) -> &'a [Command] {
    compiler.songs()[0].channel(channel).unwrap().commands()
}

fn ticks(compiler: &Compiler, channel: &str) -> u64 {
    compiler.songs()[0].channel(channel).unwrap().ticks()
}

/// Write MMLB and parse it back
fn round_trip(compiler: &Compiler) -> Module {
    let bytes = to_bytes(compiler, false).expect("Failed to write MMLB");
    OutputReader::new(&bytes).parse().expect("Failed to parse MMLB")
}

fn count_commands<F>(cmds: &[Command], predicate: F) -> usize
where
    F: Fn(&Command) -> bool,
{
    cmds.iter().filter(|c| predicate(c)).count()
}

fn note(pitch: u8, ticks: u16) -> Command {
    Command::Note {
        note: NoteKind::Pitch(pitch),
        ticks,
    }
}

// =============================================================================
// Loops
// =============================================================================

#[test]
fn test_loop_ticks() {
    let compiler = compile("nes", "A [c4 d4]3\n");
    assert_eq!(ticks(&compiler, "A"), 48);
}

#[test]
fn test_loop_ticks_with_skip() {
    // body is 24 ticks, 16 of them before the skip point
    let compiler = compile("nes", "A [c4 d4 | e4]3\n");
    assert_eq!(ticks(&compiler, "A"), 24 + 24 + 16);
}

#[test]
fn test_nested_loop_ticks() {
    let compiler = compile("nes", "A [[c8]2 d4]2\n");
    assert_eq!(ticks(&compiler, "A"), 32);
}

#[test]
fn test_loop_skip_needs_two_iterations() {
    let msg = compile_err("nes", "A [c4 | d4]1\n");
    assert_eq!(msg, "Bad loop count: 1 (must be at least 2)");
}

#[test]
fn test_unmatched_loop_end() {
    let msg = compile_err("nes", "A c4 ]2\n");
    assert_eq!(msg, "Loop end without matching '[' on channel A");
}

#[test]
fn test_unterminated_loop() {
    let msg = compile_err("nes", "A [c4 d4\n");
    assert_eq!(msg, "Unterminated loop on channel A");
}

#[test]
fn test_loop_fixups_survive_encoding() {
    let compiler = compile("nes", "A c4 [d4 [e8]2 | f4]3 L g4\n");
    let buffer = compiler.songs()[0].channel("A").unwrap().buffer();
    let bytes = buffer.encode().unwrap();
    assert_eq!(disassemble(&bytes).unwrap(), buffer.commands());

    let cmds = buffer.commands();
    let count = cmds
        .iter()
        .position(|c| *c == Command::LoopCount(3))
        .expect("Missing outer loop count");
    let djnz = cmds
        .iter()
        .rposition(|c| matches!(c, Command::Djnz(_)))
        .unwrap();
    assert_eq!(cmds[djnz], Command::Djnz(count + 1));

    let skip = cmds.iter().position(|c| matches!(c, Command::J1(_))).unwrap();
    assert_eq!(cmds[skip], Command::J1(djnz + 1));
}

#[test]
fn test_loop_point_round_trip() {
    let compiler = compile("nes", "A c4 L d4 e4\n");
    let module = round_trip(&compiler);
    let stream = &module.songs[0].channels[0];
    assert_eq!(stream.name, "A");
    assert_eq!(stream.ticks, 24);

    let cmds = stream.disassemble().unwrap();
    assert_eq!(cmds, commands(&compiler, "A"));
    let Some(Command::Jmp(target)) = cmds.last() else {
        panic!("Channel does not end with a jump: {:?}", cmds.last());
    };

    // loop offset points at the jump target
    let offset: usize = cmds[..*target].iter().map(Command::encoded_len).sum();
    assert_eq!(stream.loop_offset, Some(offset as u32));
}

// =============================================================================
// Notes, ties and slurs
// =============================================================================

#[test]
fn test_tie_accumulates() {
    let compiler = compile("nes", "A c4^8^16\n");
    assert_eq!(commands(&compiler, "A")[1], note(0, 14));
}

#[test]
fn test_slur_requires_same_note() {
    let compiler = compile("nes", "A c4&c4 r4&r8\n");
    let cmds = commands(&compiler, "A");
    assert_eq!(cmds[1], note(0, 16));
    assert_eq!(
        cmds[2],
        Command::Note {
            note: NoteKind::Rest,
            ticks: 12
        }
    );

    let msg = compile_err("nes", "A c4&r4\n");
    assert_eq!(msg, "Bad note: slur requires the same note");
}

#[test]
fn test_tie_and_slur_cannot_mix() {
    assert_eq!(
        compile_err("nes", "A c4^8&c8\n"),
        "Cannot mix '&' and '^' in one note"
    );
    assert_eq!(
        compile_err("nes", "A c4&c8^8\n"),
        "Cannot mix '&' and '^' in one note"
    );
}

#[test]
fn test_one_octave_per_change() {
    let compiler = compile("nes", "AB o4 c4 d4 e4 o5 c4 > d4\n");
    for name in ["A", "B"] {
        let cmds = commands(&compiler, name);
        let notes = count_commands(cmds, |c| matches!(c, Command::Note { .. }));
        let octaves = count_commands(cmds, |c| {
            matches!(
                c,
                Command::Octave(_) | Command::OctaveUp(_) | Command::OctaveDown(_)
            )
        });
        assert_eq!(notes, 5);
        assert_eq!(octaves, 3);
    }
}

#[test]
fn test_octave_and_note_length() {
    let compiler = compile("nes", "A o4 c4\n");
    assert_eq!(
        commands(&compiler, "A"),
        &[Command::Octave(4), note(0, 8), Command::End]
    );
}

#[test]
fn test_octave_below_minimum() {
    let msg = compile_err("nes", "A o0 c4\n");
    assert_eq!(msg, "Octave out of range: 0 (valid range 1..7)");
}

// =============================================================================
// Volume
// =============================================================================

#[test]
fn test_volume_out_of_range() {
    assert_eq!(compile_err("nes", "A v20\n"), "Bad volume: 20");
}

#[test]
fn test_volume_is_scaled() {
    // YM2612 channels take 0..15 in MML and 0..127 in the player
    let compiler = compile("gen", "A v10 c4\n");
    assert_eq!(commands(&compiler, "A")[0], Command::VolSet(85));

    let compiler = compile("nes", "A v10 c4\n");
    assert_eq!(commands(&compiler, "A")[0], Command::VolSet(10));
}

// =============================================================================
// Effects
// =============================================================================

#[test]
fn test_effect_redefinition() {
    let msg = compile_err("nes", "@EN1 = {0 4 7}\n@EN1 = {0 3 7}\n");
    assert_eq!(msg, "Redefinition of @EN1");
}

#[test]
fn test_undefined_effect() {
    assert_eq!(compile_err("nes", "A EN1 c4\n"), "Undefined effect: EN1");
}

#[test]
fn test_effect_needs_active_channel() {
    let msg = compile_err("nes", "@EP3 = {0 10 20}\nEP3\n");
    assert_eq!(msg, "EP requires at least one active channel");
}

#[test]
fn test_effect_selection_counts_refs() {
    let compiler = compile("nes", "@EP3 = {0 10 20}\nA EP3 c4\n");
    assert_eq!(
        commands(&compiler, "A")[0],
        Command::Mac {
            kind: EffectKind::Pitch,
            id: 3
        }
    );
    assert_eq!(compiler.effects().table(EffectKind::Pitch).ref_count(3), 1);

    let compiler = compile("nes", "@EP3 = {0 10 20}\nAB EP3 c4\nA EP3\n");
    assert_eq!(compiler.effects().table(EffectKind::Pitch).ref_count(3), 3);

    let module = round_trip(&compiler);
    let effect = &module.effects[0];
    assert_eq!(effect.kind, EffectKind::Pitch);
    assert_eq!(effect.id, 3);
    assert_eq!(effect.refs, 3);
    assert_eq!(effect.list.main_ints(), Some(vec![0, 10, 20]));
}

#[test]
fn test_pcm_sample_loading() {
    let dir = tempdir().unwrap();
    let wav_path = dir.path().join("kick.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&wav_path, spec).unwrap();
    for i in 0..100 {
        writer.write_sample(((i % 20) * 1000 - 10000) as i16).unwrap();
    }
    writer.finalize().unwrap();

    let mml_path = dir.path().join("song.mml");
    fs::write(&mml_path, "@XPCM1 = {\"kick.wav\" 8000}\nF @1 c4\n").unwrap();

    let mut compiler = Compiler::new("gen").unwrap();
    compiler.compile_file(&mml_path).unwrap();

    let effect = compiler.effects().table(EffectKind::Pcm).get(1).unwrap();
    let sample = effect.sample.as_ref().expect("Sample not loaded");
    assert_eq!(sample.rate, 8000);
    assert_eq!(sample.bits, 8);
    assert_eq!(sample.data.len(), 100);
    assert_eq!(
        commands(&compiler, "F")[0],
        Command::Mac {
            kind: EffectKind::Pcm,
            id: 1
        }
    );

    let module = round_trip(&compiler);
    let record = &module.effects[0];
    assert_eq!(record.sample.as_ref(), Some(sample));
}

#[test]
fn test_missing_pcm_file() {
    let dir = tempdir().unwrap();
    let mml_path = dir.path().join("song.mml");
    fs::write(&mml_path, "@XPCM1 = {\"missing.wav\" 8000}\n").unwrap();

    let mut compiler = Compiler::new("gen").unwrap();
    assert!(compiler.compile_file(&mml_path).is_err());
}

// =============================================================================
// Conditionals
// =============================================================================

#[test]
fn test_ifdef_and() {
    let mml = "#IFDEF PAL & FAST\nA c4\n#ELSE\nA d4\n#ENDIF\n";
    let compiler = compile_with_defines(mml, &["PAL"]);
    assert_eq!(commands(&compiler, "A")[1], note(2, 8));

    let compiler = compile_with_defines(mml, &["PAL", "FAST"]);
    assert_eq!(commands(&compiler, "A")[1], note(0, 8));
}

#[test]
fn test_ifndef_inverts_polarity() {
    let mml = "#IFNDEF PAL & FAST\nA c4\n#ENDIF\n";
    let compiler = compile_with_defines(mml, &["PAL"]);
    assert_eq!(commands(&compiler, "A")[1], note(0, 8));

    let compiler = compile_with_defines(mml, &["PAL", "FAST"]);
    assert_eq!(commands(&compiler, "A"), &[Command::End]);
}

#[test]
fn test_elsifdef() {
    let mml = "#IFDEF PAL\nA c4\n#ELSIFDEF NTSC\nA d4\n#ELSE\nA e4\n#ENDIF\n";
    let compiler = compile_with_defines(mml, &["NTSC"]);
    assert_eq!(commands(&compiler, "A")[1], note(2, 8));

    let compiler = compile_with_defines(mml, &[]);
    assert_eq!(commands(&compiler, "A")[1], note(4, 8));
}

#[test]
fn test_unmatched_conditionals() {
    assert_eq!(compile_err("nes", "#ENDIF\n"), "ENDIF with no matching IFDEF");
    assert_eq!(compile_err("nes", "#ELSE\n"), "ELSE with no matching IFDEF");
    assert_eq!(
        compile_err("nes", "#ELSIFDEF X\n"),
        "ELSIFDEF with no matching IFDEF"
    );
}

#[test]
fn test_define_directive() {
    let compiler = compile("nes", "#DEFINE FAST\n#IFDEF FAST\nA t200 c4\n#ENDIF\n");
    assert_eq!(commands(&compiler, "A")[0], Command::Tempo(200));
}

// =============================================================================
// Patterns
// =============================================================================

#[test]
fn test_pattern_call() {
    let compiler = compile("nes", "\\intro{c d e}\nA c4 \\intro()\n");
    let song = &compiler.songs()[0];
    let pattern = &song.patterns()[0];
    assert_eq!(pattern.name, "intro");
    assert_eq!(pattern.ticks, 24);

    let cmds = commands(&compiler, "A");
    assert!(cmds.contains(&Command::Jsr(0)));
    assert_eq!(ticks(&compiler, "A"), 8 + 24);

    let module = round_trip(&compiler);
    let stream = &module.songs[0].patterns[0];
    assert_eq!(stream.name, "intro");
    assert_eq!(stream.ticks, 24);
    assert_eq!(stream.disassemble().unwrap().last(), Some(&Command::Rts));
}

#[test]
fn test_pattern_inside_loop() {
    let compiler = compile("nes", "\\riff{c8 d8}\nA [\\riff()]4\n");
    assert_eq!(ticks(&compiler, "A"), 64);
}

// =============================================================================
// Macros and lists
// =============================================================================

#[test]
fn test_macro_call_before_tuple() {
    let compiler = compile("nes", "$m(n){%1%4}\nA $m(c) {d e f}4\n");
    assert_eq!(compiler.macro_count(), 1);
    let cmds = commands(&compiler, "A");
    assert_eq!(&cmds[1..5], &[note(0, 8), note(2, 3), note(4, 3), note(5, 2)]);

    let compiler = compile("nes", "$m{c4}\nA $m {d e f}4\n");
    let cmds = commands(&compiler, "A");
    assert_eq!(&cmds[1..5], &[note(0, 8), note(2, 3), note(4, 3), note(5, 2)]);
}

#[test]
fn test_macro_used_many_times() {
    let mml = format!("$n{{r32}}\nA {}\n", "$n ".repeat(12000));
    let compiler = compile("nes", &mml);
    assert_eq!(ticks(&compiler, "A"), 12000);
}

#[test]
fn test_recursive_macro() {
    assert_eq!(
        compile_err("nes", "$r{c8 $r}\nA $r\n"),
        "Macro r nested too deeply (max 64)"
    );
}

#[test]
fn test_list_value_out_of_range() {
    assert_eq!(
        compile_err("nes", "@EN1 = {9223372036854775807}+1\n"),
        "@EN1: Value out of range: 9223372036854775807+1"
    );
    assert_eq!(
        compile_err("nes", "@EN1 = {1}*9223372036854775807*2\n"),
        "@EN1: Value out of range: 9223372036854775807*2"
    );
}

#[test]
fn test_list_too_long() {
    assert_eq!(
        compile_err("nes", "@EN1 = {1'999999999}\n"),
        "@EN1: List is too long (max 2048 values)"
    );
    assert_eq!(
        compile_err("nes", "@EN1 = {0:9223372036854775807}\n"),
        "@EN1: List is too long (max 2048 values)"
    );
}

// =============================================================================
// Includes and output files
// =============================================================================

#[test]
fn test_include() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("lib")).unwrap();
    fs::write(
        dir.path().join("lib").join("effects.mml"),
        "@EN1 = {0 4 7}\n#INCLUDE \"more.mml\"\n",
    )
    .unwrap();
    fs::write(dir.path().join("lib").join("more.mml"), "@EP2 = {1 2}\n").unwrap();
    let main = dir.path().join("song.mml");
    fs::write(&main, "#INCLUDE \"lib/effects.mml\"\nA EN1 EP2 c4\n").unwrap();

    let mut compiler = Compiler::new("nes").unwrap();
    compiler.compile_file(&main).unwrap();
    assert_eq!(compiler.effects().table(EffectKind::Arpeggio).ref_count(1), 1);
    assert_eq!(compiler.effects().table(EffectKind::Pitch).ref_count(2), 1);
}

#[test]
fn test_recursive_include() {
    let dir = tempdir().unwrap();
    let main = dir.path().join("loop.mml");
    fs::write(&main, "#INCLUDE \"loop.mml\"\n").unwrap();

    let mut compiler = Compiler::new("nes").unwrap();
    let err = compiler.compile_file(&main).unwrap_err();
    assert!(err.message().unwrap().starts_with("Recursive include"));
}

#[test]
fn test_gzip_output() {
    let compiler = compile("nes", "#TITLE Packed\nA c4 d4 e4 f4\n");
    let plain = to_bytes(&compiler, false).unwrap();
    let packed = to_bytes(&compiler, true).unwrap();
    assert_eq!(&packed[..2], &[0x1f, 0x8b]);
    assert_eq!(decompress(packed).unwrap(), plain);
    assert_eq!(decompress(plain.clone()).unwrap(), plain);

    let dir = tempdir().unwrap();
    let path = dir.path().join("song.mmlb");
    write_file(&path, &compiler, true).unwrap();
    let module = read_file(&path).unwrap();
    assert_eq!(module, round_trip(&compiler));
    assert_eq!(module.metadata.title, "Packed");
}

#[test]
fn test_stream_past_jump_range() {
    // 2 + 22001 * 3 bytes precede the loop point
    let mml = format!("A c {}L d\n", "c ".repeat(22000));
    let compiler = compile("nes", &mml);
    let cmds = commands(&compiler, "A");
    assert_eq!(cmds.last(), Some(&Command::Jmp(22002)));

    match to_bytes(&compiler, false) {
        Err(Error::Format(msg)) => assert_eq!(
            msg,
            "A: Jump target 22002 lies at byte offset 66005, past the 16-bit operand range"
        ),
        other => panic!("Expected a format error, got {:?}", other.map(|b| b.len())),
    }
}

#[test]
fn test_bad_magic() {
    let err = OutputReader::new(b"RIFF\x01\x00").parse().unwrap_err();
    assert!(matches!(err, Error::Format(_)));
}

#[test]
fn test_multiple_songs_in_output() {
    let compiler = compile("sms", "#SONG 1\nA c4\n#SONG 2\nB d4 e4\n");
    let module = round_trip(&compiler);
    assert_eq!(module.target, "sms");
    let numbers: Vec<_> = module.songs.iter().map(|s| s.number).collect();
    assert_eq!(numbers, vec![1, 2]);

    let view = MmlbJson::new(&module).unwrap();
    let b = view.songs[1]
        .channels
        .iter()
        .find(|c| c.name == "B")
        .unwrap();
    assert_eq!(b.ticks, 16);
    assert_eq!(b.loop_offset, None);
}

// =============================================================================
// Diagnostics
// =============================================================================

#[test]
fn test_warnings_as_errors() {
    let compiler = compile("nes", "#WHATEVER 1\nA c4\n");
    assert_eq!(compiler.warnings().len(), 1);

    let options = CompileOptions {
        warnings_as_errors: true,
        ..CompileOptions::default()
    };
    let mut compiler = Compiler::with_options(&options).unwrap();
    let err = compiler
        .compile_str("test.mml", "#WHATEVER 1\nA c4\n")
        .unwrap_err();
    assert_eq!(err.message(), Some("Unknown directive: #WHATEVER"));
}

#[test]
fn test_error_position() {
    let mut compiler = Compiler::new("nes").unwrap();
    let err = compiler
        .compile_str("song.mml", "A c4\nA v99\n")
        .unwrap_err();
    let text = err.to_string();
    assert!(text.starts_with("[song.mml:2,"), "{}", text);
    assert!(text.ends_with("Error: Bad volume: 99"), "{}", text);
}

#[test]
fn test_unknown_target() {
    assert!(matches!(
        Compiler::new("zx81"),
        Err(Error::UnknownTarget(_))
    ));
}
