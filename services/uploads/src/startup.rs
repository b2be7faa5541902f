use crate::config::StartupConfig;
use anyhow::bail;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::fmt::Display;
use std::future::Future;
use tracing::{error, info, warn};

/// Connect to a backing store, retrying with exponential backoff.
///
/// Gives up after `max_attempts` failed attempts and returns the last error.
pub async fn connect_with_backoff<T, E, F, Fut>(
    what: &str,
    config: &StartupConfig,
    mut connect: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut backoff = ExponentialBackoff {
        initial_interval: config.initial_backoff(),
        max_interval: config.max_backoff(),
        max_elapsed_time: None,
        ..Default::default()
    };

    let max_attempts = config.max_attempts.max(1);
    let mut attempts = 0u32;

    loop {
        match connect().await {
            Ok(value) => {
                info!(store = what, attempts = attempts + 1, "Connected");
                return Ok(value);
            }
            Err(e) => {
                attempts += 1;

                if attempts >= max_attempts {
                    error!(store = what, attempts, error = %e, "Max connection attempts exceeded");
                    bail!("could not connect to {what} after {attempts} attempts: {e}");
                }

                let delay = backoff.next_backoff().unwrap_or_else(|| config.max_backoff());
                warn!(
                    store = what,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "Connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
