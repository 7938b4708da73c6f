//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use parking_lot::Mutex;
use serde_json::{Value, json};
use thiserror::Error;

use nebby::core::config::{Config, IndexSection};
use nebby::core::errors::NebbyError;
use nebby::core::paths::{absolute_path, with_db_extension};
use nebby::core::recent::RecentDatabaseStore;
use nebby::indexer::cancel::CancellationToken;
use nebby::indexer::session::{IndexRequest, IndexingSession, SessionOutcome};
use nebby::logger::jsonl::{JsonlConfig, JsonlWriter};
use nebby::store::columns::{ColumnSpec, Splitter};
use nebby::store::reader::{IndexReader, TableView};
use nebby::store::writer::WriteOptions;

/// How often the index command refreshes the progress line.
const PROGRESS_TICK: Duration = Duration::from_millis(100);
/// Widest a table cell is drawn in human output.
const MAX_CELL_WIDTH: usize = 48;

/// nebby: index a directory tree into a SQLite database.
#[derive(Debug, Parser)]
#[command(
    name = "nebby",
    author,
    version,
    about = "Index directory names into a searchable SQLite table",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Walk a directory tree and write every subdirectory into a database.
    Index(IndexArgs),
    /// Print the `valid` table of a database.
    Show(ShowArgs),
    /// List records whose names did not split into the configured columns.
    Invalid(InvalidArgs),
    /// Print the most recently created or opened database.
    Recent,
    /// View configuration state.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct IndexArgs {
    /// Directory to index.
    #[arg(value_name = "ROOT")]
    root: PathBuf,
    /// Destination database; `.db` is appended when missing.
    #[arg(short, long, value_name = "DB")]
    output: PathBuf,
    /// Single character separating fields in directory names. Empty disables
    /// splitting.
    #[arg(short, long, value_name = "CHAR")]
    splitter: Option<String>,
    /// Comma-separated column names, one per field.
    #[arg(short, long, value_name = "NAMES")]
    columns: Option<String>,
    /// Drop records that do not split into the columns instead of storing them
    /// in the `invalid` table.
    #[arg(long)]
    skip_invalid: bool,
}

#[derive(Debug, Clone, Args)]
struct ShowArgs {
    /// Database to read (defaults to the most recent one).
    #[arg(value_name = "DB")]
    database: Option<PathBuf>,
    /// Only rows where some cell matches this case-insensitive regex.
    #[arg(long, value_name = "REGEX")]
    search: Option<String>,
    /// Print at most this many rows.
    #[arg(long, value_name = "N")]
    limit: Option<usize>,
}

#[derive(Debug, Clone, Args)]
struct InvalidArgs {
    /// Database to read (defaults to the most recent one).
    #[arg(value_name = "DB")]
    database: Option<PathBuf>,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// The run was interrupted.
    #[error("{0}")]
    Cancelled(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Cancelled(_) => 130,
        }
    }

    /// Configuration problems are the user's to fix; everything else is a
    /// runtime failure.
    fn from_nebby(err: &NebbyError) -> Self {
        match err {
            NebbyError::InvalidConfig { .. }
            | NebbyError::MissingConfig { .. }
            | NebbyError::ConfigParse { .. }
            | NebbyError::InvalidColumns { .. }
            | NebbyError::InvalidSplitter { .. } => Self::User(err.to_string()),
            _ => Self::Runtime(err.to_string()),
        }
    }
}

pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Index(args) => run_index(cli, args),
        Command::Show(args) => run_show(cli, args),
        Command::Invalid(args) => run_invalid(cli, args),
        Command::Recent => run_recent(cli),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    let config = Config::load(cli.config.as_deref()).map_err(|e| CliError::from_nebby(&e))?;
    if cli.verbose {
        eprintln!(
            "[NEBBY-CONFIG] source={} parallelism={} follow_symlinks={}",
            config.paths.config_file.display(),
            config.walker.parallelism,
            config.walker.follow_symlinks,
        );
    }
    Ok(config)
}

// ──────────────────── index ────────────────────

fn run_index(cli: &Cli, args: &IndexArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let mode = output_mode(cli);

    let root = absolute_path(&args.root);
    if !root.is_dir() {
        return Err(CliError::User(format!(
            "{} is not a readable directory",
            root.display()
        )));
    }
    let database = absolute_path(&with_db_extension(&args.output));
    let options = resolve_write_options(&config.index, args)?;

    let activity = Arc::new(Mutex::new(JsonlWriter::open(JsonlConfig::new(
        &config.paths.activity_log,
    ))));
    let session = IndexingSession::new(
        IndexRequest {
            root: root.clone(),
            database: database.clone(),
            options,
        },
        config.walker.walker_config(),
    )
    .with_activity_log(activity);
    register_cancel_signals(&session.token());

    let draw_progress = mode == OutputMode::Human && !cli.quiet && io::stderr().is_terminal();
    let progress = session.progress();
    let mut handle = session.start().map_err(|e| CliError::Runtime(e.to_string()))?;

    let outcome = loop {
        match handle.wait_timeout(PROGRESS_TICK) {
            Ok(outcome) => break outcome,
            Err(pending) => {
                handle = pending;
                if draw_progress && let Some(pct) = progress.try_iter().last() {
                    render_progress(pct);
                }
            }
        }
    };
    if draw_progress {
        eprint!("\r{}\r", " ".repeat(48));
    }

    if let SessionOutcome::Completed(summary) = &outcome {
        remember_database(&config, &summary.database, cli.verbose);
    }

    match mode {
        OutputMode::Human => {
            if !cli.quiet {
                print_index_outcome(&root, &outcome);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "index",
                "root": root.to_string_lossy(),
                "database": database.to_string_lossy(),
                "result": serde_json::to_value(&outcome)?,
            });
            write_json_line(&payload)?;
        }
    }

    match outcome {
        SessionOutcome::Completed(_) | SessionOutcome::NothingToIndex => Ok(()),
        SessionOutcome::Cancelled => Err(CliError::Cancelled("indexing cancelled".to_string())),
        SessionOutcome::Failed { message, .. } => Err(CliError::Runtime(message)),
    }
}

/// Command-line flags override the `[index]` config section.
fn resolve_write_options(defaults: &IndexSection, args: &IndexArgs) -> Result<WriteOptions, CliError> {
    let mut options = defaults.write_options();
    if let Some(raw) = &args.splitter {
        options.splitter = Splitter::parse(raw).map_err(|e| CliError::from_nebby(&e))?;
    }
    if let Some(raw) = &args.columns {
        options.columns = ColumnSpec::parse(raw);
    }
    if args.skip_invalid {
        options.keep_invalid = false;
    }

    let explicit_splitter = args.splitter.as_deref().is_some_and(|raw| !raw.is_empty());
    if explicit_splitter && options.columns.is_empty() {
        return Err(CliError::User(
            "--splitter needs --columns (or [index] columns in the config)".to_string(),
        ));
    }
    options
        .columns
        .validate()
        .map_err(|e| CliError::from_nebby(&e))?;
    Ok(options)
}

fn register_cancel_signals(token: &CancellationToken) {
    use signal_hook::consts::{SIGINT, SIGTERM};

    for signal in [SIGINT, SIGTERM] {
        // A second signal while the first is still being honoured exits at once.
        if let Err(e) = signal_hook::flag::register_conditional_shutdown(signal, 130, token.flag()) {
            eprintln!("[NEBBY-SIGNAL] failed to register shutdown for signal {signal}: {e}");
        }
        if let Err(e) = signal_hook::flag::register(signal, token.flag()) {
            eprintln!("[NEBBY-SIGNAL] failed to register signal {signal}: {e}");
        }
    }
}

fn render_progress(pct: u8) {
    const WIDTH: usize = 30;
    let filled = usize::from(pct.min(100)) * WIDTH / 100;
    let bar = format!("{}{}", "#".repeat(filled), "-".repeat(WIDTH - filled));
    let mut stderr = io::stderr().lock();
    let _ = write!(stderr, "\rIndexing [{bar}] {pct:>3}%");
    let _ = stderr.flush();
}

fn print_index_outcome(root: &Path, outcome: &SessionOutcome) {
    match outcome {
        SessionOutcome::Completed(summary) => {
            println!(
                "{} {}",
                "Indexed".green().bold(),
                summary.database.display()
            );
            println!("  Valid rows:   {}", summary.valid_rows);
            println!("  Invalid rows: {}", summary.invalid_rows);
            if summary.dropped_rows > 0 {
                println!("  Dropped:      {}", summary.dropped_rows);
            }
        }
        SessionOutcome::NothingToIndex => {
            println!(
                "{} no directories found under {}",
                "Nothing to index:".yellow().bold(),
                root.display()
            );
        }
        SessionOutcome::Cancelled => {
            println!("{} no database was written", "Cancelled:".yellow().bold());
        }
        SessionOutcome::Failed { code, message } => {
            eprintln!("{} [{code}] {message}", "Indexing failed:".red().bold());
        }
    }
}

fn remember_database(config: &Config, database: &Path, verbose: bool) {
    let store = RecentDatabaseStore::new(config.paths.recent_file.clone());
    match store.store(database) {
        Ok(_) if verbose => eprintln!(
            "[NEBBY-RECENT] recorded {} in {}",
            database.display(),
            store.path().display()
        ),
        Ok(_) => {}
        Err(e) => eprintln!("[NEBBY-RECENT] failed to record recent database: {e}"),
    }
}

// ──────────────────── show / invalid / recent ────────────────────

/// Explicit argument, else the recorded recent database.
fn resolve_database(config: &Config, explicit: Option<&Path>) -> Result<PathBuf, CliError> {
    if let Some(path) = explicit {
        return Ok(absolute_path(path));
    }
    let recent = RecentDatabaseStore::new(config.paths.recent_file.clone())
        .load()
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    recent.map(|entry| entry.database).ok_or_else(|| {
        CliError::User("no database given and no recent database recorded".to_string())
    })
}

fn open_reader(path: &Path) -> Result<IndexReader, CliError> {
    IndexReader::open(path).map_err(|e| match e {
        NebbyError::Io { .. } => CliError::User(e.to_string()),
        other => CliError::Runtime(other.to_string()),
    })
}

fn run_show(cli: &Cli, args: &ShowArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let database = resolve_database(&config, args.database.as_deref())?;
    let reader = open_reader(&database)?;

    let mut view = reader
        .search(args.search.as_deref().unwrap_or(""))
        .map_err(|e| CliError::from_nebby(&e))?;
    let matched = view.rows.len();
    if let Some(limit) = args.limit {
        view.rows.truncate(limit);
    }
    let invalid_count = reader
        .count_invalid()
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    remember_database(&config, &database, cli.verbose);

    match output_mode(cli) {
        OutputMode::Human => {
            print_table(&view);
            if !cli.quiet {
                println!();
                println!(
                    "  {matched} row(s) in {}, {invalid_count} invalid record(s)",
                    database.display()
                );
                if view.rows.len() < matched {
                    println!("  (showing first {})", view.rows.len());
                }
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "show",
                "database": database.to_string_lossy(),
                "columns": view.columns,
                "rows": view.rows,
                "matched_rows": matched,
                "invalid_count": invalid_count,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_invalid(cli: &Cli, args: &InvalidArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let database = resolve_database(&config, args.database.as_deref())?;
    let reader = open_reader(&database)?;
    let records = reader
        .invalid_records()
        .map_err(|e| CliError::Runtime(e.to_string()))?;

    match output_mode(cli) {
        OutputMode::Human => {
            let view = TableView {
                columns: vec!["filename".to_string(), "path".to_string()],
                rows: records
                    .iter()
                    .map(|r| vec![r.filename.clone(), r.path.clone()])
                    .collect(),
            };
            print_table(&view);
            if !cli.quiet {
                println!();
                println!("  {} invalid record(s)", records.len());
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "invalid",
                "database": database.to_string_lossy(),
                "records": serde_json::to_value(&records)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_recent(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let recent = RecentDatabaseStore::new(config.paths.recent_file.clone())
        .load()
        .map_err(|e| CliError::Runtime(e.to_string()))?;

    match output_mode(cli) {
        OutputMode::Human => match &recent {
            Some(entry) => println!("{}", entry.database.display()),
            None => println!("No recent database."),
        },
        OutputMode::Json => {
            let payload = json!({
                "command": "recent",
                "database": recent.as_ref().map(|e| e.database.to_string_lossy().into_owned()),
                "recorded_at": recent.as_ref().map(|e| e.recorded_at.to_rfc3339()),
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn print_table(view: &TableView) {
    let mut widths: Vec<usize> = view.columns.iter().map(|c| c.chars().count()).collect();
    for row in &view.rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count()).min(MAX_CELL_WIDTH);
        }
    }

    let header: Vec<String> = view
        .columns
        .iter()
        .zip(&widths)
        .map(|(name, width)| format!("{:<width$}", truncate_cell(name, *width)))
        .collect();
    println!("  {}", header.join("  ").bold());
    let rule: usize = widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1);
    println!("  {}", "-".repeat(rule));

    for row in &view.rows {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", truncate_cell(cell, *width)))
            .collect();
        println!("  {}", cells.join("  "));
    }
}

/// Keep the tail of long cells, which for paths is the informative part.
fn truncate_cell(cell: &str, max_len: usize) -> String {
    let len = cell.chars().count();
    if len <= max_len {
        return cell.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let tail: String = cell.chars().skip(len - keep).collect();
    format!("...{tail}")
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = load_config(cli)?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config
                    .stable_hash()
                    .map_err(|e| CliError::Runtime(e.to_string()))?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("Configuration is INVALID: {e}"),
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                            "code": e.code(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── output ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("NEBBY_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
