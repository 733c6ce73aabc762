//! Periodic scanning.
//!
//! A scan runs immediately, then on every tick. Scans are awaited inline so
//! two never overlap; ticks that fall due while a scan is running are dropped.

use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::pipeline::{Pipeline, ProcessingResult};

/// Run `scan` every `period` until `shutdown` resolves. Returns the number of
/// completed scans.
pub async fn run_every<S, F, Fut>(period: Duration, shutdown: S, mut scan: F) -> usize
where
    S: Future<Output = ()>,
    F: FnMut() -> Fut,
    Fut: Future<Output = ProcessingResult>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    let mut completed = 0usize;
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested, stopping after {} scans", completed);
                return completed;
            }
            _ = ticker.tick() => {}
        }

        let result = scan().await;
        completed += 1;
        if result.success {
            tracing::info!(
                "Scan #{}: {} drafts, {} errors",
                completed,
                result.processed_count,
                result.errors.len()
            );
        } else {
            tracing::error!("Scan #{} failed: {}", completed, result.message);
        }
    }
}

/// Scheduled mode: scan every `interval_minutes` until Ctrl-C
pub async fn run(pipeline: &Pipeline, interval_minutes: u64) -> usize {
    let period = Duration::from_secs(interval_minutes.max(1) * 60);
    tracing::info!(
        "Scheduler started: every {} minutes, composer '{}'",
        interval_minutes.max(1),
        pipeline.composer_name()
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    run_every(period, shutdown, || pipeline.process_emails()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn ok_result() -> ProcessingResult {
        ProcessingResult {
            success: true,
            ..ProcessingResult::default()
        }
    }

    #[tokio::test]
    async fn test_first_scan_runs_immediately() {
        let stop = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let completed = run_every(
            Duration::from_secs(3600),
            {
                let stop = stop.clone();
                async move { stop.notified().await }
            },
            || {
                let calls = calls.clone();
                let stop = stop.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    stop.notify_one();
                    ok_result()
                }
            },
        )
        .await;

        assert_eq!(completed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scans_never_overlap() {
        let stop = Arc::new(Notify::new());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));

        let completed = run_every(
            Duration::from_millis(5),
            {
                let stop = stop.clone();
                async move { stop.notified().await }
            },
            || {
                let running = running.clone();
                let peak = peak.clone();
                let calls = calls.clone();
                let stop = stop.clone();
                async move {
                    let now_running = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now_running, Ordering::SeqCst);
                    // Longer than the period, so ticks pile up
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    if calls.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                        stop.notify_one();
                    }
                    ok_result()
                }
            },
        )
        .await;

        assert_eq!(completed, 3);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_scan_does_not_stop_loop() {
        let stop = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let completed = run_every(
            Duration::from_millis(1),
            {
                let stop = stop.clone();
                async move { stop.notified().await }
            },
            || {
                let calls = calls.clone();
                let stop = stop.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
                        stop.notify_one();
                    }
                    ProcessingResult {
                        success: false,
                        message: "Failed to authenticate with mailbox".to_string(),
                        ..ProcessingResult::default()
                    }
                }
            },
        )
        .await;

        assert_eq!(completed, 2);
    }
}
