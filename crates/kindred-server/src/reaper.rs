use std::time::Duration;

use tracing::{debug, info, warn};

use kindred_api::auth::AppState;

/// Background task that finalizes expired entities.
///
/// Runs on an interval; each pass flips pending match requests past their
/// deadline to `expired` and expired group/private discussions to inactive.
/// The sweep itself is row-by-row and idempotent, so overlapping with lazy
/// expiry checks (or a forced admin sweep) is harmless: whoever flips a
/// row first wins and the other pass sees a no-op. Rows are never deleted.
pub async fn run_sweep_loop(state: AppState, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        let now = chrono::Utc::now();
        let db = state.clone();
        match tokio::task::spawn_blocking(move || db.db.sweep_expired(now)).await {
            Ok(report) => {
                if report.total() > 0 {
                    info!(
                        "Sweep: expired {} requests, closed {} rooms, {} private discussions",
                        report.match_requests,
                        report.group_discussions,
                        report.private_discussions
                    );
                } else {
                    debug!("Sweep: nothing to do");
                }
            }
            Err(e) => {
                warn!("Sweep task panicked: {}", e);
            }
        }
    }
}
