//! Main application entry point (native).

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use inkboard_app::{App, AppConfig};
use inkboard_core::ItemId;

#[derive(Parser, Debug)]
#[command(name = "inkboard", about = "Headless client for an inkboard server")]
struct Cli {
    /// Base URL of the board server.
    #[arg(long, env = "INKBOARD_SERVER", default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Board to join.
    #[arg(long, env = "INKBOARD_BOARD", default_value = "default")]
    board: String,

    /// Name shown to other participants.
    #[arg(long, env = "INKBOARD_NAME", default_value = "inkboard")]
    name: String,

    /// Leave after this many seconds.
    #[arg(long)]
    seconds: Option<u64>,

    #[arg(long, default_value_t = 20)]
    poll_ms: u64,

    /// Item ids to select once the board is loaded.
    #[arg(long, value_delimiter = ',')]
    select: Vec<u32>,
}

impl Cli {
    fn into_config(self) -> AppConfig {
        AppConfig {
            server: self.server,
            board: self.board,
            name: self.name,
            duration: self.seconds.map(Duration::from_secs),
            poll_interval: Duration::from_millis(self.poll_ms),
            select: self.select.into_iter().map(ItemId).collect(),
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    log::info!("Starting inkboard");

    let config = Cli::parse().into_config();
    match App::new(config).run() {
        Ok(summary) => {
            println!("{summary}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            eprintln!("inkboard: {e}");
            ExitCode::FAILURE
        }
    }
}
