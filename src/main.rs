//! CLI for thesis-tools - Keep a LaTeX thesis and its bibliography consistent.

use std::fmt;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use thesis_tools::config::{LibraryType, DEFAULT_CONFIG_FILE};
use thesis_tools::sync::SyncError;
use thesis_tools::{
    check_consistency, discover_tex_files, find_unused, load_config, load_defined_keys, render,
    sanitize_file, scan_documents, sync_bibliography, CitationStats, CitedKeys, DefinedKeys,
    OutputFormat, ProjectConfig, SyncConfig, ZoteroClient,
};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Check citations and maintain the bibliography of a LaTeX thesis
#[derive(Parser)]
#[command(name = "thesis-tools")]
#[command(version)]
#[command(after_help = "\
Examples:
  thesis-tools check content/prestudy --bib content/resources/bibliography.bib
  thesis-tools unused --format json
  thesis-tools sync --collection 6ABWTZEP
  thesis-tools sanitize content/resources/bibliography.bib")]
struct Cli {
    /// Configuration file (default: ./thesis-tools.toml, if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ScanArgs {
    /// LaTeX files or directories to scan (default: [documents].roots)
    documents: Vec<PathBuf>,

    /// Bibliography file (default: [bibliography].path)
    #[arg(short, long)]
    bib: Option<PathBuf>,

    /// Skip .tex files whose name contains this text (repeatable)
    #[arg(long)]
    exclude: Vec<String>,

    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Fail when a citation has no bibliography entry
    #[command(after_help = "\
Examples:
  thesis-tools check
  thesis-tools check main.tex sections/ -b refs.bib
  thesis-tools check --exclude quellenverzeichnis --format json

Exit status 13 means at least one cited key is undefined.")]
    Check(ScanArgs),

    /// List bibliography entries that are never cited
    Unused(ScanArgs),

    /// Count unique citations and bibliography entries
    Stats(ScanArgs),

    /// Remove invisible left-to-right marks from a bibliography file
    Sanitize {
        /// Bibliography file (default: [bibliography].path)
        bib: Option<PathBuf>,
    },

    /// Overwrite the bibliography with entries from Zotero collections
    #[command(after_help = "\
Examples:
  ZOTERO_API_KEY=... ZOTERO_USER_ID=... thesis-tools sync --collection 6ABWTZEP
  thesis-tools sync --collection A --collection B --local-entries local.bib

Missing credentials are prompted for when running in a terminal.")]
    Sync {
        /// Zotero API key
        #[arg(long, env = "ZOTERO_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Zotero user or group id
        #[arg(long, env = "ZOTERO_USER_ID")]
        user_id: Option<String>,

        /// Library type
        #[arg(long, value_enum)]
        library_type: Option<LibraryType>,

        /// Collection id (repeatable; default: [sync].collections)
        #[arg(short, long = "collection")]
        collections: Vec<String>,

        /// Output file (default: [sync].output, then [bibliography].path)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Manually maintained entries appended after the fetched ones
        #[arg(long)]
        local_entries: Option<PathBuf>,

        /// Keep duplicate keys instead of keeping the first occurrence
        #[arg(long)]
        no_dedupe: bool,

        /// Items requested per collection
        #[arg(long)]
        limit: Option<u32>,
    },
}

// ---------------------------------------------------------------------------
// AppError: semantic exit codes
// ---------------------------------------------------------------------------

enum AppError {
    /// Exit 10: document not found / unreadable
    Document(String),
    /// Exit 11: bibliography file unreadable
    BibFile(String),
    /// Exit 12: configuration file invalid
    Config(String),
    /// Exit 13: citation keys missing from the bibliography
    MissingCitations(usize),
    /// Exit 14: sync failed
    Sync(String),
    /// Exit 15: cannot write output
    Output(String),
    /// Exit 16: no citations or no bibliography entries
    Stats(String),
}

impl AppError {
    fn exit_code(&self) -> i32 {
        match self {
            AppError::Document(_) => 10,
            AppError::BibFile(_) => 11,
            AppError::Config(_) => 12,
            AppError::MissingCitations(_) => 13,
            AppError::Sync(_) => 14,
            AppError::Output(_) => 15,
            AppError::Stats(_) => 16,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Document(msg) => {
                write!(f, "{}\n  hint: verify the document path is correct", msg)
            }
            AppError::BibFile(msg) => {
                write!(f, "{}\n  hint: check the bibliography file permissions", msg)
            }
            AppError::Config(msg) => {
                write!(
                    f,
                    "{}\n  hint: see the [documents], [bibliography] and [sync] sections of {}",
                    msg, DEFAULT_CONFIG_FILE
                )
            }
            AppError::MissingCitations(count) => {
                write!(
                    f,
                    "{} cited key(s) missing from the bibliography\n  hint: add the entries, or fix the keys in the text",
                    count
                )
            }
            AppError::Sync(msg) => {
                write!(
                    f,
                    "{}\n  hint: check ZOTERO_API_KEY, ZOTERO_USER_ID and the collection ids",
                    msg
                )
            }
            AppError::Output(msg) => {
                write!(
                    f,
                    "{}\n  hint: check that the output directory exists and is writable",
                    msg
                )
            }
            AppError::Stats(msg) => write!(f, "{}", msg),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("thesis_tools={}", default_level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn run(cli: Cli) -> Result<(), AppError> {
    let config = match &cli.config {
        Some(path) => load_config(path, true),
        None => load_config(Path::new(DEFAULT_CONFIG_FILE), false),
    }
    .map_err(|e| AppError::Config(e.to_string()))?;

    match cli.command {
        Commands::Check(args) => check_command(&config, &args),
        Commands::Unused(args) => unused_command(&config, &args),
        Commands::Stats(args) => stats_command(&config, &args),
        Commands::Sanitize { bib } => {
            let path = bib.unwrap_or_else(|| config.bibliography.path.clone());
            sanitize_command(&path)
        }
        Commands::Sync {
            api_key,
            user_id,
            library_type,
            collections,
            output,
            local_entries,
            no_dedupe,
            limit,
        } => {
            let section = &config.sync;
            let sync_config = SyncConfig {
                api_key: credential(api_key, "Zotero API key")?,
                library_id: credential(user_id, "Zotero user id")?,
                library_type: library_type.unwrap_or(section.library_type),
                collections: if collections.is_empty() {
                    section.collections.clone()
                } else {
                    collections
                },
                output: output
                    .or_else(|| section.output.clone())
                    .unwrap_or_else(|| config.bibliography.path.clone()),
                local_entries: local_entries.or_else(|| section.local_entries.clone()),
                dedupe: section.dedupe && !no_dedupe,
                limit: limit.unwrap_or(section.limit),
                api_base: section.api_base.clone(),
            };
            sync_command(&sync_config)
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Check that every cited key is defined.
fn check_command(config: &ProjectConfig, args: &ScanArgs) -> Result<(), AppError> {
    let (cited, defined) = load_key_sets(config, args)?;

    let report = check_consistency(&cited, &defined);
    print_report(&report, args.format)?;

    if report.passed() {
        Ok(())
    } else {
        Err(AppError::MissingCitations(report.missing.len()))
    }
}

/// List entries that are never cited. Informational only.
fn unused_command(config: &ProjectConfig, args: &ScanArgs) -> Result<(), AppError> {
    let (cited, defined) = load_key_sets(config, args)?;
    let report = find_unused(&cited, &defined);
    if report.wildcard {
        info!("\\nocite{{*}} is present, every entry is printed");
    }
    print_report(&report, args.format)
}

/// Report the sizes of the cited-only and full bibliographies.
fn stats_command(config: &ProjectConfig, args: &ScanArgs) -> Result<(), AppError> {
    let (cited, defined) = load_key_sets(config, args)?;
    let stats = CitationStats::new(&cited, &defined);
    print_report(&stats, args.format)?;
    stats.validate().map_err(|e| AppError::Stats(e.to_string()))
}

fn sanitize_command(path: &Path) -> Result<(), AppError> {
    let removed = sanitize_file(path).map_err(|e| AppError::BibFile(e.to_string()))?;
    if removed == 0 {
        eprintln!("no left-to-right marks found in {}", path.display());
    } else {
        eprintln!("removed {} left-to-right mark(s) from {}", removed, path.display());
    }
    Ok(())
}

fn sync_command(config: &SyncConfig) -> Result<(), AppError> {
    let client = ZoteroClient::new(config);

    let summary = sync_bibliography(config, &client).map_err(|e| match e {
        SyncError::Write { .. } => AppError::Output(e.to_string()),
        _ => AppError::Sync(e.to_string()),
    })?;

    eprintln!(
        "synced {} collection(s) ({} empty, {} failed), wrote {} entr{} to {}",
        summary.fetched.len(),
        summary.empty.len(),
        summary.failed.len(),
        summary.entries,
        if summary.entries == 1 { "y" } else { "ies" },
        summary.output.display()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Scans the documents and loads the bibliography named by the arguments,
/// falling back to the configuration.
fn load_key_sets(
    config: &ProjectConfig,
    args: &ScanArgs,
) -> Result<(CitedKeys, DefinedKeys), AppError> {
    let roots = if args.documents.is_empty() {
        &config.documents.roots
    } else {
        &args.documents
    };
    let exclude: Vec<String> = config
        .documents
        .exclude
        .iter()
        .chain(args.exclude.iter())
        .cloned()
        .collect();

    let mut files = Vec::new();
    for root in roots {
        if !root.exists() {
            return Err(AppError::Document(format!(
                "'{}': no such file or directory",
                root.display()
            )));
        }
        files.extend(discover_tex_files(root, &exclude));
    }
    if files.is_empty() {
        warn!("no .tex files found");
    }

    let cited = scan_documents(&files).map_err(|e| AppError::Document(e.to_string()))?;
    eprintln!(
        "found {} unique citation(s) in {} document(s)",
        cited.len(),
        files.len()
    );

    let bib = args.bib.as_ref().unwrap_or(&config.bibliography.path);
    let defined = load_defined_keys(bib).map_err(|e| AppError::BibFile(e.to_string()))?;
    if defined.exists() {
        eprintln!(
            "found {} entr{} in {} ({} parser)",
            defined.len(),
            if defined.len() == 1 { "y" } else { "ies" },
            bib.display(),
            defined.strategy()
        );
    } else {
        eprintln!("bibliography {} not found, no entries defined", bib.display());
    }

    Ok((cited, defined))
}

fn print_report<T>(report: &T, format: OutputFormat) -> Result<(), AppError>
where
    T: serde::Serialize + fmt::Display,
{
    let rendered = render(report, format).map_err(|e| AppError::Output(e.to_string()))?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{}", rendered).map_err(|e| AppError::Output(format!("stdout: {}", e)))
}

/// Returns the given credential, or prompts for it on an interactive terminal.
fn credential(value: Option<String>, label: &str) -> Result<String, AppError> {
    if let Some(value) = value {
        return Ok(value.trim().to_string());
    }
    if !io::stdin().is_terminal() {
        return Err(AppError::Sync(format!("{} not set", label)));
    }

    eprint!("{}: ", label);
    io::stderr()
        .flush()
        .map_err(|e| AppError::Sync(format!("failed to prompt for {}: {}", label, e)))?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| AppError::Sync(format!("failed to read {}: {}", label, e)))?;
    Ok(line.trim().to_string())
}
