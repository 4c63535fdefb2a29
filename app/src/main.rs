mod cli;
mod logging;

use std::fs::File;
use std::io::{self, Write};

use anyhow::Context;
use clap::Parser;

fn main() -> anyhow::Result<()> {
    let opts = cli::Opts::parse();

    logging::AppLogger::init(opts.log_level()).context("failed to initialize logger")?;

    let corpus = abi::build_corpus(&opts.library)
        .with_context(|| format!("failed to analyze `{}`", opts.library.display()))?;

    let json = if opts.pretty {
        serde_json::to_string_pretty(&corpus)
    } else {
        serde_json::to_string(&corpus)
    }
    .context("failed to serialize corpus to JSON")?;

    match &opts.output {
        Some(path) => {
            let mut file = File::create(path).with_context(|| format!("failed to create `{}`", path.display()))?;
            file.write_all(json.as_bytes())?;
            file.write_all(b"\n")?;
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle.write_all(json.as_bytes())?;
            handle.write_all(b"\n")?;
        }
    }

    Ok(())
}
