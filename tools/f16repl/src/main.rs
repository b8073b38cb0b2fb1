use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Stdout},
    path::{Path, PathBuf},
};

use clap::Parser;
use forth16::{Forth, Halt, Params, PRELUDE};
use miette::{Context, IntoDiagnostic};
use tracing::level_filters::LevelFilter;

type Repl = Forth<Box<dyn BufRead>, Stdout>;

/// Runs forth source files, then stdin, through a forth16 VM.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source files to run, in order, before reading stdin.
    files: Vec<PathBuf>,

    /// Directory holding block files (`0000.blk`, `0001.blk`, ...).
    #[arg(short, long = "blocks", env = "F16_BLOCKS", default_value = ".")]
    block_dir: PathBuf,

    /// Don't load the bundled prelude. Only the primitive words will exist,
    /// so there is no way to leave compile mode after the first `:`.
    #[arg(long)]
    bare: bool,

    /// Start from a snapshot written by `--dump` instead of a fresh machine.
    /// The prelude is not loaded on top of it.
    #[arg(long, value_name = "FILE")]
    restore: Option<PathBuf>,

    /// Write a snapshot of the machine here on exit, even if it failed.
    #[arg(long, value_name = "FILE")]
    dump: Option<PathBuf>,

    /// Exit after running the source files, without reading stdin.
    #[arg(long)]
    no_stdin: bool,

    /// a comma-separated list of `tracing` targets and levels to enable.
    ///
    /// for example, `warn,forth16::vm=debug` enables the `WARN` level
    /// globally and the `DEBUG` level for the VM module. `forth16=trace`
    /// logs every instruction.
    ///
    /// see <https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/targets/struct.Targets.html#filtering-with-targets>
    /// for more details on this syntax.
    #[arg(
        short,
        long = "trace",
        env = "F16_TRACE",
        default_value_t = tracing_subscriber::filter::Targets::new().with_default(LevelFilter::WARN),
    )]
    trace_filter: tracing_subscriber::filter::Targets,
}

fn main() -> miette::Result<()> {
    use tracing_subscriber::prelude::*;

    let args = Args::parse();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(io::stderr),
        )
        .with(args.trace_filter.clone())
        .init();

    let mut forth = boot(&args)?;
    let res = run_all(&mut forth, &args);

    if let Some(path) = args.dump.as_deref() {
        dump(&forth, path)?;
    }
    res
}

fn boot(args: &Args) -> miette::Result<Repl> {
    let params = Params::new().with_block_dir(&args.block_dir);
    if let Some(path) = args.restore.as_deref() {
        let file = File::open(path)
            .into_diagnostic()
            .with_context(|| format!("failed to open snapshot {}", path.display()))?;
        let forth = Forth::restore(BufReader::new(file), empty(), io::stdout(), params)
            .into_diagnostic()
            .with_context(|| format!("failed to restore snapshot {}", path.display()))?;
        tracing::info!(path = %path.display(), "restored snapshot");
        return Ok(forth);
    }

    let mut forth = Forth::new(empty(), io::stdout(), params)
        .into_diagnostic()
        .context("failed to bootstrap the VM")?;
    if !args.bare {
        forth.set_input(Box::new(PRELUDE.as_bytes()));
        run_source(&mut forth, "prelude")?;
    }
    Ok(forth)
}

fn run_all(forth: &mut Repl, args: &Args) -> miette::Result<()> {
    for path in &args.files {
        let file = File::open(path)
            .into_diagnostic()
            .with_context(|| format!("failed to open {}", path.display()))?;
        forth.set_input(Box::new(BufReader::new(file)));
        run_source(forth, &path.display().to_string())?;
    }

    if !args.no_stdin {
        forth.set_input(Box::new(io::stdin().lock()));
        run_source(forth, "stdin")?;
    }
    Ok(())
}

/// Run the current input to its end.
fn run_source(forth: &mut Repl, name: &str) -> miette::Result<()> {
    loop {
        let halt = forth
            .run()
            .into_diagnostic()
            .with_context(|| format!("fatal error while running {name}"))?;
        match halt {
            Halt::EndOfInput => break,
            Halt::NullInstruction => {
                tracing::info!(source = name, "null instruction, back to the outer interpreter");
            }
        }
    }
    // diagnostics were already logged as they happened
    let diags = forth.take_diagnostics();
    if !diags.is_empty() {
        tracing::debug!(source = name, count = diags.len(), "finished with diagnostics");
    }
    Ok(())
}

fn dump(forth: &Repl, path: &Path) -> miette::Result<()> {
    let file = File::create(path)
        .into_diagnostic()
        .with_context(|| format!("failed to create {}", path.display()))?;
    forth
        .snapshot(BufWriter::new(file))
        .into_diagnostic()
        .with_context(|| format!("failed to write snapshot to {}", path.display()))?;
    tracing::info!(path = %path.display(), "wrote snapshot");
    Ok(())
}

fn empty() -> Box<dyn BufRead> {
    Box::new(io::empty())
}
