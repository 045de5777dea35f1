//! Time-bounded presence and absence checks over a live log buffer.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

use crate::error::HarnessError;
use crate::stream::{LogBuffer, TokenScanner};

/// How often the buffer is re-examined.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Wait until `token` shows up in `buffer`, for at most `budget`.
///
/// Returns how long it took. The buffer is checked once more at the deadline
/// so a token arriving during the last poll interval still counts.
pub async fn await_token(
    buffer: &LogBuffer,
    token: &str,
    budget: Duration,
) -> Result<Duration, HarnessError> {
    await_token_polling(buffer, token, budget, POLL_INTERVAL).await
}

/// Watch `buffer` for the whole `window`, failing as soon as `token` appears.
///
/// Any occurrence since the stream opened counts, including lines buffered
/// before the window started. Never succeeds before the window has fully
/// elapsed.
pub async fn assert_token_absent(
    buffer: &LogBuffer,
    token: &str,
    window: Duration,
) -> Result<(), HarnessError> {
    assert_absent_polling(buffer, token, window, POLL_INTERVAL).await
}

pub(crate) async fn await_token_polling(
    buffer: &LogBuffer,
    token: &str,
    budget: Duration,
    poll: Duration,
) -> Result<Duration, HarnessError> {
    let start = Instant::now();
    let deadline = start + budget;
    let mut scanner = TokenScanner::new(buffer, token);

    loop {
        if scanner.found() {
            let waited = start.elapsed();
            tracing::debug!(token, waited_ms = waited.as_millis() as u64, "token observed");
            return Ok(waited);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(HarnessError::TokenNotObserved {
                token: token.to_string(),
                budget,
            });
        }
        sleep_until((now + poll).min(deadline)).await;
    }
}

pub(crate) async fn assert_absent_polling(
    buffer: &LogBuffer,
    token: &str,
    window: Duration,
    poll: Duration,
) -> Result<(), HarnessError> {
    let start = Instant::now();
    let deadline = start + window;
    let mut scanner = TokenScanner::new(buffer, token);

    loop {
        if scanner.found() {
            return Err(HarnessError::ForbiddenTokenObserved {
                token: token.to_string(),
                after: start.elapsed(),
            });
        }
        let now = Instant::now();
        if now >= deadline {
            tracing::debug!(token, window_ms = window.as_millis() as u64, "token stayed absent");
            return Ok(());
        }
        sleep_until((now + poll).min(deadline)).await;
    }
}
