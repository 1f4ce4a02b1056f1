use anyhow::{Context, Result};
use deneb_planning::plan::{decompress, parse_plan};
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use structopt::StructOpt;

/// Removes compiler-introduced artifacts (compressed macro-actions,
/// compressed methods, artificial tasks and methods) from an emitted plan.
#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "plan-decompress", rename_all = "kebab-case")]
pub struct Opt {
    /// Path to the plan file; stdin when absent.
    plan: Option<PathBuf>,
    /// If set, the converted plan is written to the file instead of stdout.
    #[structopt(long = "output", short = "o")]
    out_file: Option<PathBuf>,
    /// Suppress info and warning output.
    #[structopt(long, short)]
    quiet: bool,
    /// Logging level to use: one of "error", "warn", "info", "debug", "trace"
    #[structopt(short, long, default_value = "info")]
    log_level: tracing::Level,
}

fn main() -> Result<()> {
    let opt: Opt = Opt::from_args();

    let level = if opt.quiet {
        tracing::Level::ERROR
    } else {
        opt.log_level
    };
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let input = match &opt.plan {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("cannot read plan file {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("cannot read the plan from stdin")?;
            buf
        }
    };

    let mut plan = parse_plan(&input)?;
    decompress::convert(&mut plan);
    let output = plan.to_string();

    match &opt.out_file {
        Some(path) => {
            let mut file = File::create(path)
                .with_context(|| format!("cannot open output file {}", path.display()))?;
            file.write_all(output.as_bytes())?;
        }
        None => print!("{output}"),
    }
    Ok(())
}
