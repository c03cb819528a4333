use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use git_sqlite_codec::{CleanSource, FilterConfig, Sections, clean, smudge};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "git-sqlite")]
#[command(about = "Git clean/smudge filter storing SQLite databases as canonical SQL")]
#[command(version)]
struct Cli {
    /// Log debug diagnostics to stderr (also enabled by GIT_TRACE).
    #[arg(long, global = true)]
    debug: bool,
    /// YAML file with filter settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Convert a database into canonical SQL text (check-in).
    Clean(CleanArgs),
    /// Rebuild a database from SQL text on stdin (check-out).
    Smudge(SmudgeArgs),
    /// Print canonical SQL for a database file (textconv for git diff).
    Diff(DiffArgs),
}

#[derive(Debug, Args)]
struct CleanArgs {
    /// Database file in the working tree; stdin is read when absent.
    path: Option<PathBuf>,
    #[command(flatten)]
    dump: DumpFlags,
}

#[derive(Debug, Args)]
struct SmudgeArgs {
    /// Working-tree path passed by git; accepted and ignored.
    path: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct DiffArgs {
    /// Database file to render.
    path: PathBuf,
    #[command(flatten)]
    dump: DumpFlags,
}

#[derive(Debug, Args)]
struct DumpFlags {
    /// Round REAL values to this many decimal digits.
    #[arg(long)]
    float_precision: Option<u32>,
    /// Emit DDL only.
    #[arg(long, conflicts_with = "data_only")]
    schema_only: bool,
    /// Emit rows only.
    #[arg(long)]
    data_only: bool,
    /// Give up on a locked database after this many milliseconds.
    #[arg(long)]
    lock_timeout_ms: Option<u64>,
}

impl DumpFlags {
    fn apply(&self, config: &mut FilterConfig) {
        if let Some(precision) = self.float_precision {
            config.float_precision = Some(precision);
        }
        if self.schema_only {
            config.sections = Sections::SchemaOnly;
        } else if self.data_only {
            config.sections = Sections::DataOnly;
        }
        if let Some(timeout) = self.lock_timeout_ms {
            config.lock_timeout_ms = timeout;
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Command::Clean(args) => run_clean(args, config),
        Command::Smudge(args) => run_smudge(args, config),
        Command::Diff(args) => run_diff(args, config),
    });

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let default_directive = if debug || git_trace_enabled() {
        "git_sqlite=debug,git_sqlite_codec=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_env("GIT_SQLITE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    // stdout carries the filter payload, so diagnostics must stay on stderr.
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn git_trace_enabled() -> bool {
    std::env::var("GIT_TRACE")
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "2" | "true"))
        .unwrap_or(false)
}

fn load_config(path: Option<&Path>) -> Result<FilterConfig, String> {
    match path {
        Some(path) => FilterConfig::load(path)
            .map_err(|err| format!("Failed to load config '{}': {err}", path.display())),
        None => Ok(FilterConfig::default()),
    }
}

fn run_clean(args: CleanArgs, mut config: FilterConfig) -> Result<(), String> {
    args.dump.apply(&mut config);
    let source = match args.path {
        Some(path) if path.is_file() => CleanSource::Path(path),
        other => {
            if let Some(path) = other {
                debug!(path = %path.display(), "Path is not a file; reading stdin");
            }
            CleanSource::Bytes(read_stdin()?)
        }
    };
    let cleaned = clean(&source, &config).map_err(|err| err.to_string())?;
    write_stdout(cleaned.bytes())
}

fn run_smudge(args: SmudgeArgs, config: FilterConfig) -> Result<(), String> {
    if let Some(path) = &args.path {
        debug!(path = %path.display(), "Smudging");
    }
    let input = read_stdin()?;
    let smudged = smudge(&input, &config).map_err(|err| err.to_string())?;
    write_stdout(smudged.bytes())
}

fn run_diff(args: DiffArgs, mut config: FilterConfig) -> Result<(), String> {
    args.dump.apply(&mut config);
    let cleaned = clean(&CleanSource::Path(args.path), &config).map_err(|err| err.to_string())?;
    write_stdout(cleaned.bytes())
}

fn read_stdin() -> Result<Vec<u8>, String> {
    let mut input = Vec::new();
    std::io::stdin()
        .lock()
        .read_to_end(&mut input)
        .map_err(|err| format!("Failed to read stdin: {err}"))?;
    Ok(input)
}

fn write_stdout(bytes: &[u8]) -> Result<(), String> {
    let mut out = std::io::stdout().lock();
    out.write_all(bytes)
        .and_then(|()| out.flush())
        .map_err(|err| format!("Failed to write stdout: {err}"))
}
