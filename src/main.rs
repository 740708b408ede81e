use clap::{ArgGroup, Parser};
use hamarc::{Archive, ArchiveError, ErrorCategory, DEFAULT_CHUNK_BITS};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const EXIT_INVALID_ARGUMENTS:   u8 = 1;
const EXIT_INVALID_ARCHIVE:     u8 = 2;
const EXIT_INVALID_SOURCE:      u8 = 3;
const EXIT_INVALID_DESTINATION: u8 = 4;

#[derive(Parser)]
#[command(name = "hamarc", about = "Archiver with per-chunk Hamming error correction")]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["create", "list", "extract", "append", "test"]),
))]
struct Cli {
    /// Create a new archive from FILES
    #[arg(short, long)]
    create: bool,
    /// List archive contents
    #[arg(short, long)]
    list: bool,
    /// Extract FILES (or everything when none are given)
    #[arg(short = 'x', long)]
    extract: bool,
    /// Append FILES to an existing archive
    #[arg(short, long)]
    append: bool,
    /// Decode every chunk and report repaired bits
    #[arg(short, long)]
    test: bool,
    /// Archive path
    #[arg(short = 'f', long = "file")]
    archive: PathBuf,
    /// Extraction destination directory
    #[arg(short = 'p', long = "extract-path")]
    extract_path: Option<PathBuf>,
    /// Payload chunk width in bits (8, 16, 64, ...)
    #[arg(long, default_value_t = DEFAULT_CHUNK_BITS)]
    chunk_bits: u16,
    /// Print list/test output as JSON
    #[arg(long)]
    json: bool,
    /// Log progress at info level (RUST_LOG overrides)
    #[arg(short, long)]
    verbose: bool,
    files: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(EXIT_INVALID_ARGUMENTS);
        }
    };

    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("hamarc: {err}");
            ExitCode::from(match err.category() {
                ErrorCategory::Argument    => EXIT_INVALID_ARGUMENTS,
                ErrorCategory::Archive     => EXIT_INVALID_ARCHIVE,
                ErrorCategory::Source      => EXIT_INVALID_SOURCE,
                ErrorCategory::Destination => EXIT_INVALID_DESTINATION,
            })
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, ArchiveError> {
    // ── Create / Append ──────────────────────────────────────────────────────
    if cli.create || cli.append {
        let mut ar = if cli.create {
            Archive::create(&cli.archive)?
        } else {
            Archive::open_append(&cli.archive)?
        };
        for path in &cli.files {
            ar.append_file(path, cli.chunk_bits)?;
            println!("  added  {}", path.display());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mut ar = Archive::open(&cli.archive)?;

    // ── List ─────────────────────────────────────────────────────────────────
    if cli.list {
        let entries = ar.entries()?;
        if cli.json {
            println!("{}", to_json(&entries));
        } else {
            for entry in entries {
                println!("{}", entry.name);
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    // ── Test ─────────────────────────────────────────────────────────────────
    if cli.test {
        let report = ar.verify()?;
        if cli.json {
            println!("{}", to_json(&report));
        } else {
            println!("Files        {}", report.files);
            println!("Chunks       {}", report.chunks);
            println!("Corrections  {}", report.corrections.len());
            for fix in &report.corrections {
                println!("  {:<14} bit {}", fix.field, fix.bit_offset);
            }
            if report.trailing_data {
                println!("Trailing data after the last entry");
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    // ── Extract ──────────────────────────────────────────────────────────────
    let Some(dest) = cli.extract_path else {
        eprintln!("hamarc: --extract-path is required with --extract");
        return Ok(ExitCode::from(EXIT_INVALID_ARGUMENTS));
    };
    let extracted = if cli.files.is_empty() {
        ar.extract_all_files(&dest)?
    } else {
        let names: Vec<String> = cli.files.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        ar.extract_files(&names, &dest)?
    };
    for name in extracted {
        println!("  extracted  {}", dest.join(name).display());
    }
    Ok(ExitCode::SUCCESS)
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}
