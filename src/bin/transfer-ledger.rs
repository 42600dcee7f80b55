use std::{fs::File, time::Duration};

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tracing::info;
use transfer_ledger::{
    bin_utils::{RowError, Service},
    transfer::{ErrorKind, TransferSettings},
};

fn duration_from_env(name: &str, default: Duration) -> Result<Duration> {
    match std::env::var(name) {
        Ok(value) => {
            let millis = value
                .parse::<u64>()
                .with_context(|| format!("`{name}` must be a number of milliseconds, got `{value}`"))?;
            Ok(Duration::from_millis(millis))
        }
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("Failed to read `{name}`")),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let filename = std::env::args()
        .nth(1)
        .context("Expected a file name as the first argument")?;
    let file = File::open(&filename).with_context(|| format!("Failed to open `{filename}`"))?;

    let defaults = TransferSettings::default();
    let settings = TransferSettings {
        lock_wait: duration_from_env("TRANSFER_LOCK_WAIT_MS", defaults.lock_wait)?,
        lock_hold: duration_from_env("TRANSFER_LOCK_HOLD_MS", defaults.lock_hold)?,
    };

    let service = Service {
        input: file,
        output: &mut std::io::stdout(),
        settings,
        error_printer: Box::new(|line, err| match err {
            RowError::Transfer(err) if err.kind() == ErrorKind::Validation => {
                info!(line, "{err}")
            }
            err => eprintln!("Error at line {line}: {err}"),
        }),
    };
    service.run()
}
