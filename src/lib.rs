pub mod config;
pub mod debounce;
pub mod error;
pub mod guard;
pub mod notify;
pub mod probe;
pub mod state;
pub mod worker;

use log::{error, info};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

pub use config::Config;
pub use error::Error;
pub use worker::{run_invocation, InvocationStatus};

/// Exit codes for the external periodic trigger. Transient probe or
/// delivery failures never affect the exit status on their own.
pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_LOCK_HELD: i32 = 2;

/// Entry point for one invocation: load and validate configuration, wire
/// Ctrl-C to a cancellation token, run the guarded monitoring loop, and
/// map the outcome to an exit code.
pub async fn run() -> i32 {
    let config_path = std::env::args()
        .nth(1)
        .map_or_else(default_config_path, PathBuf::from);

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration at {}: {e}", config_path.display());
            return EXIT_FAILURE;
        }
    };

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    match run_invocation(&config, &data_dir(), token).await {
        Ok(InvocationStatus::Completed) => EXIT_OK,
        Ok(InvocationStatus::SkippedLockHeld) => EXIT_LOCK_HELD,
        Err(e) => {
            error!("Monitoring invocation failed: {e}");
            EXIT_FAILURE
        }
    }
}

fn default_config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    let path = base.join("hostwatch").join("config.toml");
    info!("No config path given, using {}", path.display());
    path
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hostwatch")
}
