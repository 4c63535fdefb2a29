use std::path::PathBuf;

use clap::Parser;

/// Extracts a JSON ABI corpus describing how every exported function's
/// parameters and return value, and every exported variable, are
/// placed by the x86-64 System V calling convention.
#[derive(Debug, Parser)]
#[command(name = "abi-corpus", version, about)]
pub struct Opts {
    /// Path to the ELF shared library to analyze.
    pub library: PathBuf,

    /// Where to write the JSON corpus. Defaults to stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Increase log verbosity. Can be passed multiple times.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Pretty-print the JSON corpus instead of emitting it compact.
    #[arg(long)]
    pub pretty: bool,
}

impl Opts {
    pub fn log_level(&self) -> log::Level {
        match self.verbose {
            0 => log::Level::Warn,
            1 => log::Level::Info,
            2 => log::Level::Debug,
            _ => log::Level::Trace,
        }
    }
}
