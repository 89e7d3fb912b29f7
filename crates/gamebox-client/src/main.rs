mod app;
mod event;
mod input;
mod network;
mod provider;
mod ui;

use std::io;
use std::path::PathBuf;

use clap::Parser;
use crossterm::{
    event::DisableMouseCapture,
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;

use gamebox_common::player;

/// Gamebox client - play Minesweeper or Chinese chess with friends over a relay
#[derive(Parser, Debug)]
#[command(name = "gamebox-client", version, about)]
struct Args {
    /// Relay address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:9876")]
    server: String,

    /// Player name (saved to the identity file)
    #[arg(short, long)]
    name: Option<String>,

    /// Where this player's identity is kept between sessions
    #[arg(long, default_value = "gamebox-identity.json")]
    identity: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stderr shares the terminal with the UI; redirect it to keep debug output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gamebox_client=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut me = player::load_or_create(&args.identity, &mut rand::thread_rng())?;
    if let Some(name) = args.name.filter(|n| !n.trim().is_empty()) {
        me.username = name.trim().to_string();
        player::save(&args.identity, &me)?;
    }

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = app::run(&mut terminal, args.server, me, args.identity).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
    }

    Ok(())
}
