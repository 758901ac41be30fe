pub mod api;
pub mod batch;
pub mod config;
pub mod deck;
pub mod errors;
pub mod focus;
pub mod hotkeys;
pub mod job_identity;
pub mod job_store;
pub mod lifecycle;
pub mod log_retention;
pub mod logging;
pub mod runtime;
pub mod tags;
pub mod tailor;
pub mod tui;
pub mod types;
pub mod view;

use api::{JobApi, SqliteJobApi, SqliteJobApiOptions};
use batch::BatchSource;
use clap::{error::ErrorKind, Parser};
use config::{load_config, AppConfig, CliOverrides};
use deck::{Deck, DeckOptions};
use errors::DeckError;
use logging::{append_run_log, init_run_log, structured_fallback_line, JsonlLogger};
use runtime::ProductionRuntime;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use types::{JobId, Outcome};
use view::View;

pub const DEFAULT_CONFIG_FILE: &str = "jobdeck.toml";
const FALLBACK_SCREEN: (u16, u16) = (120, 40);

#[derive(Debug, Clone, Parser)]
#[command(name = "jobdeck")]
#[command(about = "Review, tag and tailor job postings from the terminal")]
pub struct Cli {
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub db: Option<PathBuf>,
    /// new, refinery, factory, delivered or denied
    #[arg(long)]
    pub view: Option<String>,
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long)]
    pub temperature: Option<f32>,
    #[arg(long, default_value_t = false)]
    pub list_only: bool,
    #[arg(long, default_value_t = false, conflicts_with = "process")]
    pub process_all: bool,
    #[arg(long, num_args = 1..)]
    pub process: Vec<String>,
}

pub fn run() -> Result<i32, DeckError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| DeckError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    cwd: &Path,
    runtime: &ProductionRuntime,
) -> Result<i32, DeckError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(DeckError::Cli(error.to_string())),
        },
    };

    let view = match cli.view.as_deref() {
        Some(name) => Some(
            View::parse(name).ok_or_else(|| DeckError::Cli(format!("unknown view `{name}`")))?,
        ),
        None => None,
    };
    let default_config = cwd.join(DEFAULT_CONFIG_FILE);
    let config_path = match &cli.config {
        Some(path) => Some(cwd.join(path)),
        None if runtime.file_system.exists(&default_config) => Some(default_config),
        None => None,
    };
    let overrides = CliOverrides {
        config_path,
        db_path: cli.db.clone(),
        view,
        model: cli.model.clone(),
        temperature: cli.temperature,
    };
    let cfg = load_config(&overrides, runtime.file_system.as_ref())?.anchored_at(cwd);

    init_run_log(JsonlLogger {
        path: cfg.logging.path.clone(),
        max_payload_bytes: cfg.logging.max_payload_bytes,
        budget_bytes: cfg.logging.budget_bytes,
    });
    append_run_log(
        "info",
        "run.started",
        json!({ "db_path": cfg.store.db_path.display().to_string() }),
    );

    let api: Arc<dyn JobApi> = Arc::new(SqliteJobApi::open(
        SqliteJobApiOptions::from_config(&cfg),
        Arc::clone(&runtime.clock),
        Arc::clone(&runtime.file_system),
        Arc::clone(&runtime.process_runner),
    )?);

    if cli.process_all || !cli.process.is_empty() {
        return run_headless_batch(&cli, &cfg, api, runtime);
    }

    let mut deck = Deck::open(api, Arc::clone(&runtime.clock), deck_options(&cfg, None))?;
    if cli.list_only || !runtime.terminal.stdin_is_tty() {
        for job in deck.store().jobs() {
            runtime.terminal.write_line(&structured_fallback_line(
                job.id.as_str(),
                job.stage.as_str(),
                &format!("{} {} @ {}", job.score, job.title, job.company),
            ))?;
        }
        return Ok(0);
    }

    let (width, height) = crossterm::terminal::size().unwrap_or(FALLBACK_SCREEN);
    tui::run_interactive(&mut deck, runtime.terminal.as_ref(), width, height)?;
    Ok(0)
}

fn deck_options(cfg: &AppConfig, view: Option<View>) -> DeckOptions {
    DeckOptions {
        initial_view: view.unwrap_or(cfg.ui.initial_view),
        page_size: cfg.ui.page_size,
        model: cfg.model_config(),
        restore_target: cfg.lifecycle.restore_target,
    }
}

/// Processes jobs without the TUI, one structured line per log entry.
/// Exits 1 when any item failed.
fn run_headless_batch(
    cli: &Cli,
    cfg: &AppConfig,
    api: Arc<dyn JobApi>,
    runtime: &ProductionRuntime,
) -> Result<i32, DeckError> {
    let mut deck = Deck::open(
        api,
        Arc::clone(&runtime.clock),
        deck_options(cfg, Some(View::ApprovedTailoring)),
    )?;
    let mut run = if cli.process_all {
        deck.start_batch(BatchSource::All)?
    } else {
        deck.start_batch_for(cli.process.iter().map(|id| JobId::new(id.as_str())).collect())?
    };

    let mut failed = false;
    let mut write_error = None;
    deck.run_batch(&mut run, |entry| {
        if let batch::BatchLogEntry::Item {
            outcome: Outcome::Failure,
            ..
        } = entry
        {
            failed = true;
        }
        if let Err(err) = runtime.terminal.write_line(&entry.structured_line()) {
            write_error.get_or_insert(err);
        }
    });
    if let Some(err) = write_error {
        return Err(err);
    }
    Ok(i32::from(failed))
}
