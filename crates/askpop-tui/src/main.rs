use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use askpop_core::{Config, GeminiClient};
use clap::Parser;
use log::{info, warn};

mod app;
mod handler;
mod images;
mod tui;
mod ui;

use app::App;
use tui::{EventHandler, TerminalGuard};

#[derive(Parser)]
#[command(name = "askpop")]
#[command(about = "Popup assistant for quick AI questions by text, voice, or image")]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Gemini model to query
    #[arg(short, long)]
    model: Option<String>,
    /// Where to write the log
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Show the popup right away
    #[arg(long)]
    open: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(model) = cli.model {
        config.model = Some(model);
    }
    if let Some(log_file) = cli.log_file {
        config.log_file = Some(log_file);
    }

    init_logging(&config.log_file())?;
    info!("Starting askpop with model {}", config.model());

    let api_key = config.api_key();
    if api_key.is_none() {
        warn!("No Gemini API key configured; set GEMINI_API_KEY or gemini_api_key in the config file");
    }
    let client = GeminiClient::new(config.base_url(), config.model(), api_key);
    let api_configured = client.is_configured();

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let _guard = TerminalGuard;

    let mut events = EventHandler::new(config.reveal_interval());
    let mut app = App::new(config, Arc::new(client), api_configured, events.session_sender());
    if cli.open {
        app.open_popup();
    }

    terminal.draw(|frame| ui::render(&mut app, frame))?;

    while !app.should_quit {
        let Some(event) = events.next().await else {
            break;
        };
        if handler::handle_event(&mut app, event)? {
            terminal.draw(|frame| ui::render(&mut app, frame))?;
        }
    }

    // Release the microphone and any in-flight request before the terminal goes back
    app.close_popup();
    info!("Exiting askpop");
    Ok(())
}

/// Log to a file; the terminal belongs to the UI
fn init_logging(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
    Ok(())
}
