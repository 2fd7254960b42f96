//! schedsi-replay — convert a binary event log to text or SVG.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use schedsi::{replay, GanttLog, TextAlign, TextLog};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Svg,
}

/// Convert a schedsi binary log to a readable rendering.
#[derive(Parser)]
#[command(name = "schedsi-replay")]
struct Cli {
    /// Input log file; `-` reads from stdin.
    input: PathBuf,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Output file; `-` writes to stdout.
    #[arg(short, long, default_value = "-")]
    output: PathBuf,

    /// Decimal places for times in the text rendering.
    #[arg(long, default_value_t = 2)]
    precision: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let input: Box<dyn Read> = if cli.input.as_os_str() == "-" {
        Box::new(io::stdin().lock())
    } else {
        Box::new(
            File::open(&cli.input)
                .with_context(|| format!("failed to open {}", cli.input.display()))?,
        )
    };
    let output: Box<dyn Write> = if cli.output.as_os_str() == "-" {
        Box::new(io::stdout().lock())
    } else {
        Box::new(
            File::create(&cli.output)
                .with_context(|| format!("failed to create {}", cli.output.display()))?,
        )
    };

    match cli.format {
        Format::Text => {
            let mut sink = TextLog::new(output, TextAlign::default(), cli.precision);
            replay(input, &mut sink).context("replay failed")?;
        }
        Format::Svg => {
            let mut sink = GanttLog::new();
            replay(input, &mut sink).context("replay failed")?;
            let mut output = output;
            sink.write(&mut output).context("failed to write the chart")?;
        }
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .try_init();
}
