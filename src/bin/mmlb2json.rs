//! MMLB to JSON converter

use clap::Parser;
use mmlc::output::reader::read_file;
use mmlc::output::MmlbJson;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mmlb2json")]
#[command(version = "0.1.0")]
#[command(about = "Convert MMLB files to JSON", long_about = None)]
struct Args {
    /// Input MMLB file, optionally gzip compressed
    input: PathBuf,

    /// Output JSON file (writes to stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output compact JSON (default is pretty-printed)
    #[arg(short, long)]
    compact: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let module = read_file(&args.input)?;
    let view = MmlbJson::new(&module)?;

    let json_string = if args.compact {
        serde_json::to_string(&view)?
    } else {
        serde_json::to_string_pretty(&view)?
    };

    match args.output {
        Some(path) => {
            let mut file = File::create(path)?;
            file.write_all(json_string.as_bytes())?;
            file.write_all(b"\n")?;
        }
        None => {
            println!("{}", json_string);
        }
    }

    Ok(())
}
