//! Log emission workers.
//!
//! One tokio task per producer keeps requesting `/log/<tag>` until its own
//! cancel handle fires. Workers share nothing but the producer driver.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{panic_message, HarnessError};
use crate::platform::ProducerDriver;

/// Cadence and per-request bound of an emission worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmissionSettings {
    pub interval: Duration,
    pub request_timeout: Duration,
}

impl Default for EmissionSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Cancel handle of one worker. Cancelling twice is the same as once.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn cancel(&self) {
        // send_replace never fails, even once the worker has gone away.
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Path requested from a producer to make it log `tag`.
pub fn log_path(tag: &str) -> String {
    format!("/log/{tag}")
}

/// Request log lines tagged `tag` from `producer` until cancelled.
///
/// Returns the number of requests issued. Request failures are logged and
/// do not stop the loop. A request in flight is allowed to finish; the
/// cadence wait is cut short by cancellation.
pub async fn emit_until_cancelled(
    mut cancel: watch::Receiver<bool>,
    driver: Arc<dyn ProducerDriver>,
    producer: String,
    tag: String,
    settings: EmissionSettings,
) -> u64 {
    let path = log_path(&tag);
    let mut sent = 0u64;

    loop {
        if *cancel.borrow_and_update() {
            break;
        }

        let request = driver.trigger_log_line(&producer, &path, settings.request_timeout);
        match tokio::time::timeout(settings.request_timeout, request).await {
            Ok(Ok(())) => tracing::trace!(producer = %producer, path = %path, "log line requested"),
            Ok(Err(e)) => {
                tracing::warn!(producer = %producer, error = %format!("{e:#}"), "log request failed")
            }
            Err(_) => tracing::warn!(
                producer = %producer,
                timeout_ms = settings.request_timeout.as_millis() as u64,
                "log request timed out"
            ),
        }
        sent += 1;

        tokio::select! {
            _ = tokio::time::sleep(settings.interval) => {}
            changed = cancel.changed() => {
                // Every handle dropped: nobody is left to cancel us.
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    tracing::debug!(producer = %producer, requests = sent, "emission worker stopped");
    sent
}

/// A running worker as seen by its owner.
#[derive(Debug)]
pub struct EmissionJob {
    pub producer: String,
    pub tag: String,
    cancel: CancelHandle,
    handle: JoinHandle<u64>,
}

impl EmissionJob {
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// How a worker ended.
#[derive(Debug)]
pub struct WorkerReport {
    pub producer: String,
    pub tag: String,
    /// Requests issued, or `None` if the worker had to be aborted.
    pub requests: Option<u64>,
}

/// Owns every emission worker of a scenario.
pub struct EmissionController {
    driver: Arc<dyn ProducerDriver>,
    settings: EmissionSettings,
    jobs: Vec<EmissionJob>,
}

impl EmissionController {
    pub fn new(driver: Arc<dyn ProducerDriver>, settings: EmissionSettings) -> Self {
        Self {
            driver,
            settings,
            jobs: Vec::new(),
        }
    }

    /// Start a worker emitting `tag` through `producer`.
    pub fn spawn(&mut self, producer: &str, tag: &str) -> CancelHandle {
        let (cancel, rx) = CancelHandle::new();
        let handle = tokio::spawn(emit_until_cancelled(
            rx,
            self.driver.clone(),
            producer.to_string(),
            tag.to_string(),
            self.settings,
        ));
        tracing::info!(producer, tag, "emission worker started");

        self.jobs.push(EmissionJob {
            producer: producer.to_string(),
            tag: tag.to_string(),
            cancel: cancel.clone(),
            handle,
        });
        cancel
    }

    pub fn jobs(&self) -> &[EmissionJob] {
        &self.jobs
    }

    pub fn cancel_all(&self) {
        for job in &self.jobs {
            job.cancel();
        }
    }

    /// Cancel every worker and wait up to `grace` for each to stop.
    ///
    /// Panicked workers come back as [`HarnessError::WorkerFault`]. A worker
    /// still stuck in a request after `grace` is aborted; that is logged but
    /// is not a fault.
    pub async fn shutdown(mut self, grace: Duration) -> (Vec<WorkerReport>, Vec<HarnessError>) {
        self.cancel_all();

        let jobs = std::mem::take(&mut self.jobs);
        let mut reports = Vec::with_capacity(jobs.len());
        let mut faults = Vec::new();
        let deadline = tokio::time::Instant::now() + grace;

        for job in jobs {
            let EmissionJob {
                producer,
                tag,
                mut handle,
                ..
            } = job;

            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(requests)) => reports.push(WorkerReport {
                    producer,
                    tag,
                    requests: Some(requests),
                }),
                Ok(Err(join_err)) if join_err.is_panic() => {
                    let message = panic_message(join_err.into_panic().as_ref());
                    tracing::error!(producer = %producer, message = %message, "emission worker panicked");
                    faults.push(HarnessError::WorkerFault { producer, message });
                }
                Ok(Err(join_err)) => faults.push(HarnessError::WorkerFault {
                    producer,
                    message: join_err.to_string(),
                }),
                Err(_) => {
                    handle.abort();
                    tracing::warn!(
                        producer = %producer,
                        grace_ms = grace.as_millis() as u64,
                        "emission worker still busy after cancellation, aborted"
                    );
                    reports.push(WorkerReport {
                        producer,
                        tag,
                        requests: None,
                    });
                }
            }
        }

        (reports, faults)
    }
}

impl Drop for EmissionController {
    fn drop(&mut self) {
        // Never leave workers hammering producers behind an early return.
        for job in &self.jobs {
            job.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDriver;
    use tokio::time::Instant;

    fn settings() -> EmissionSettings {
        EmissionSettings {
            interval: Duration::from_secs(3),
            request_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn worker_emits_at_cadence_until_cancelled() {
        let driver = Arc::new(RecordingDriver::new());
        let (cancel, rx) = CancelHandle::new();
        let task = tokio::spawn(emit_until_cancelled(
            rx,
            driver.clone(),
            "writer-1".into(),
            "TAG-A".into(),
            settings(),
        ));

        // Requests at t=0, 3, 6, 9.
        tokio::time::sleep(Duration::from_millis(9500)).await;
        cancel.cancel();
        let sent = task.await.unwrap();

        assert_eq!(sent, 4);
        let calls = driver.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls
            .iter()
            .all(|(producer, path)| producer == "writer-1" && path == "/log/TAG-A"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_wakes_a_sleeping_worker() {
        let driver = Arc::new(RecordingDriver::new());
        let (cancel, rx) = CancelHandle::new();
        let task = tokio::spawn(emit_until_cancelled(
            rx,
            driver,
            "writer-1".into(),
            "TAG-A".into(),
            settings(),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let cancelled_at = Instant::now();
        cancel.cancel();
        task.await.unwrap();
        assert!(cancelled_at.elapsed() < settings().interval);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let driver = Arc::new(RecordingDriver::new());
        let mut controller = EmissionController::new(driver, settings());
        let handle = controller.spawn("writer-1", "TAG-A");

        handle.cancel();
        handle.cancel();
        controller.cancel_all();
        assert!(handle.is_cancelled());

        let (reports, faults) = controller.shutdown(Duration::from_secs(1)).await;
        assert_eq!(reports.len(), 1);
        assert!(faults.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_and_slow_requests_do_not_stop_the_worker() {
        let driver = Arc::new(RecordingDriver::new());
        driver.fail_for("writer-1");
        driver.delay_for("writer-2", Duration::from_secs(60));

        let mut controller = EmissionController::new(driver.clone(), settings());
        controller.spawn("writer-1", "TAG-A");
        controller.spawn("writer-2", "TAG-B");

        tokio::time::sleep(Duration::from_secs(10)).await;
        let (reports, faults) = controller.shutdown(Duration::from_secs(5)).await;

        assert!(faults.is_empty(), "{faults:?}");
        for report in reports {
            assert!(report.requests.unwrap_or(0) >= 3, "{report:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn worker_panic_is_reported_as_fault() {
        let driver = Arc::new(RecordingDriver::new());
        driver.panic_for("writer-2");

        let mut controller = EmissionController::new(driver, settings());
        controller.spawn("writer-1", "TAG-A");
        controller.spawn("writer-2", "TAG-B");
        tokio::time::sleep(Duration::from_secs(1)).await;

        let (reports, faults) = controller.shutdown(Duration::from_secs(5)).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].producer, "writer-1");
        match &faults[..] {
            [HarnessError::WorkerFault { producer, message }] => {
                assert_eq!(producer, "writer-2");
                assert!(message.contains("writer-2"), "{message}");
            }
            other => panic!("unexpected faults: {other:?}"),
        }
    }

    #[test]
    fn log_path_embeds_tag() {
        assert_eq!(log_path("RANDOM-MESSAGE-A-1"), "/log/RANDOM-MESSAGE-A-1");
    }
}
