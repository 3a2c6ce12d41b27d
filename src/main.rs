use clap::Parser;
use mmlc::output::reader::OutputReader;
use mmlc::output::writer::to_bytes;
use mmlc::output::MmlbJson;
use mmlc::{CompileOptions, Compiler};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mmlc")]
#[command(version = "0.1.0")]
#[command(about = "MML to chiptune byte-code compiler", long_about = None)]
struct Args {
    /// Input MML file
    #[arg(required_unless_present = "list_targets")]
    input: Option<PathBuf>,

    /// Output file (defaults to the input with an .mmlb or .json extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Target platform
    #[arg(short, long, default_value = "nes")]
    target: String,

    /// Define a symbol for #IFDEF
    #[arg(short = 'D', long = "define")]
    defines: Vec<String>,

    /// Treat warnings as errors
    #[arg(short = 'W', long)]
    warnings_as_errors: bool,

    /// Write the JSON view instead of MMLB
    #[arg(long)]
    json: bool,

    /// Compress MMLB output with gzip
    #[arg(long, conflicts_with = "json")]
    gzip: bool,

    /// List available targets
    #[arg(short = 'L', long)]
    list_targets: bool,
}

fn print_summary(compiler: &Compiler) {
    for song in compiler.songs() {
        tracing::info!(
            "Song {}: {} channels, {} patterns, {} ticks",
            song.number(),
            song.channels().len(),
            song.patterns().len(),
            song.total_ticks()
        );
        for channel in song.channels() {
            if channel.commands().is_empty() {
                continue;
            }
            let looped = match channel.loop_point() {
                Some(lp) => format!("{}", channel.ticks() - lp.ticks),
                None => "-".to_string(),
            };
            println!(
                "|  {}  |  {:8}  |  {:8}  |",
                channel.name(),
                channel.ticks(),
                looped
            );
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if args.list_targets {
        for (name, description) in mmlc::targets::list_targets() {
            println!("{:4} {}", name, description);
        }
        return Ok(());
    }

    let Some(input) = args.input else {
        return Err("no input file".into());
    };
    let output = args
        .output
        .unwrap_or_else(|| input.with_extension(if args.json { "json" } else { "mmlb" }));

    let options = CompileOptions {
        target: args.target,
        defines: args.defines,
        warnings_as_errors: args.warnings_as_errors,
    };
    let mut compiler = Compiler::with_options(&options)?;
    compiler.compile_file(&input)?;
    print_summary(&compiler);

    if args.json {
        let bytes = to_bytes(&compiler, false)?;
        let module = OutputReader::new(&bytes).parse()?;
        let json = serde_json::to_string_pretty(&MmlbJson::new(&module)?)?;
        std::fs::write(&output, json + "\n")?;
    } else {
        std::fs::write(&output, to_bytes(&compiler, args.gzip)?)?;
    }
    tracing::info!("Wrote {}", output.display());

    Ok(())
}
