//! Command-line player for "Json Midi Player" timeline files
//!
//! Reads one or more timeline JSON files, concatenates their documents
//! and plays them back. Exit codes: 0 on success, 1 on invalid input or
//! nothing playable, 2 when help was shown.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use serde_json::Value;

use json_midi_player::{play_documents, PlayOptions, PlayerError};

#[derive(Parser, Debug)]
#[command(name = "json-midi-player", version, about = "Plays Json Midi Player timeline files")]
struct Args {
    /// Delay playback start by this many milliseconds
    #[arg(short, long, value_name = "MS", default_value_t = 0)]
    delay: u64,

    /// Verbose output (port listing, playback statistics)
    #[arg(short, long)]
    verbose: bool,

    /// Timeline files to play
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Help gets its own exit code; version is a normal exit.
            let code = match e.kind() {
                ErrorKind::DisplayHelp => 2,
                ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    let default_filter = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();

    if args.files.is_empty() {
        eprintln!("Error: missing input file(s)");
        eprintln!("Run with --help for usage.");
        return ExitCode::from(1);
    }

    let mut documents: Vec<Value> = Vec::new();
    for path in &args.files {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("could not open {}: {}", path.display(), e);
                continue;
            }
        };
        match serde_json::from_str::<Value>(&text) {
            // A file may hold one document or an array of them.
            Ok(Value::Array(items)) => documents.extend(items),
            Ok(document) => documents.push(document),
            Err(e) => log::warn!("skipping {}: invalid JSON: {}", path.display(), e),
        }
    }

    if documents.is_empty() {
        eprintln!("Error: no readable timeline documents");
        return ExitCode::from(1);
    }

    let options = PlayOptions {
        delay_ms: args.delay as f64,
        ..Default::default()
    };
    match play_documents(&documents, &options) {
        Ok(_) => ExitCode::SUCCESS,
        Err(PlayerError::NothingToPlay) => {
            eprintln!("Error: no playable content");
            ExitCode::from(1)
        }
        Err(e) => {
            log::error!("playback failed: {}", e);
            ExitCode::from(1)
        }
    }
}
