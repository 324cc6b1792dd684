use super::{ClipMetadata, NotificationSink};
use crate::config::NotifyConfig;
use crate::events::{EventBus, SentrycamEvent};
use crate::recorder::{ClosedSegment, JobState, SegmentLedger};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A queued clip delivery
#[derive(Debug)]
struct NotificationJob {
    segment_id: Uuid,
    path: PathBuf,
}

/// Non-blocking enqueue side of the dispatcher.
///
/// Held by the recording controller; `enqueue` appends the job and returns
/// immediately, so a slow or dead relay never stalls frame ingestion.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<NotificationJob>,
    ledger: SegmentLedger,
}

impl DispatchHandle {
    pub fn enqueue(&self, closed: &ClosedSegment) {
        let job = NotificationJob {
            segment_id: closed.segment.id,
            path: closed.segment.path.clone(),
        };

        self.ledger.set_job_state(job.segment_id, JobState::Pending);

        if self.tx.send(job).is_err() {
            // Only happens during shutdown; the file stays for the sweeper
            warn!(
                "Dispatch queue closed, clip {} will not be delivered",
                closed.segment.path.display()
            );
            self.ledger
                .set_job_state(closed.segment.id, JobState::Abandoned);
        }
    }
}

/// Background worker delivering finished clips to a notification sink.
///
/// A single worker drains the queue in FIFO order. Each job gets up to
/// `max_dispatch_attempts` tries with doubling backoff; exhausting them
/// abandons the job and keeps the file for the retention window. Delivery
/// failure is never fatal to the pipeline.
pub struct NotificationDispatcher {
    handle: DispatchHandle,
    worker: JoinHandle<()>,
}

impl NotificationDispatcher {
    pub fn start(
        sink: Arc<dyn NotificationSink>,
        config: &NotifyConfig,
        ledger: SegmentLedger,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = tokio::spawn(dispatch_worker(
            rx,
            sink,
            config.clone(),
            ledger.clone(),
            event_bus,
        ));

        Self {
            handle: DispatchHandle { tx, ledger },
            worker,
        }
    }

    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    /// Close the queue and give the worker a bounded grace period to
    /// drain jobs already enqueued.
    pub async fn shutdown(self, grace: Duration) {
        info!("Stopping notification dispatcher (grace: {:?})", grace);
        drop(self.handle);

        match timeout(grace, self.worker).await {
            Ok(Ok(())) => info!("Notification dispatcher drained and stopped"),
            Ok(Err(e)) => error!("Notification dispatcher worker panicked: {}", e),
            Err(_) => {
                warn!("Notification dispatcher did not drain within grace period, aborting");
            }
        }
    }
}

async fn dispatch_worker(
    mut rx: mpsc::UnboundedReceiver<NotificationJob>,
    sink: Arc<dyn NotificationSink>,
    config: NotifyConfig,
    ledger: SegmentLedger,
    event_bus: Arc<EventBus>,
) {
    info!("Notification dispatcher worker started");

    while let Some(job) = rx.recv().await {
        deliver_job(&job, sink.as_ref(), &config, &ledger, &event_bus).await;
    }

    info!("Notification dispatcher worker stopped");
}

async fn deliver_job(
    job: &NotificationJob,
    sink: &dyn NotificationSink,
    config: &NotifyConfig,
    ledger: &SegmentLedger,
    event_bus: &EventBus,
) {
    ledger.set_job_state(job.segment_id, JobState::InFlight);

    let mut attempts = 0u32;
    loop {
        attempts += 1;

        let metadata = ClipMetadata {
            user_id: config.user_id.clone(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::ZERO)
                .as_secs(),
        };

        match sink.send(&job.path, &metadata).await {
            Ok(()) => {
                ledger.set_job_state(job.segment_id, JobState::Delivered);
                publish(
                    event_bus,
                    SentrycamEvent::ClipDispatched {
                        segment_id: job.segment_id.to_string(),
                        attempts,
                        timestamp: SystemTime::now(),
                    },
                )
                .await;
                return;
            }
            Err(e) if attempts < config.max_dispatch_attempts => {
                let backoff = backoff_for_attempt(
                    config.base_backoff(),
                    config.max_backoff(),
                    attempts,
                );
                warn!(
                    "Delivery attempt {}/{} for clip {} failed ({}), retrying in {:?}",
                    attempts,
                    config.max_dispatch_attempts,
                    job.path.display(),
                    e,
                    backoff
                );
                sleep(backoff).await;
            }
            Err(e) => {
                error!(
                    "Abandoning clip {} after {} delivery attempt(s): {}",
                    job.path.display(),
                    attempts,
                    e
                );
                ledger.set_job_state(job.segment_id, JobState::Abandoned);
                publish(
                    event_bus,
                    SentrycamEvent::DispatchAbandoned {
                        segment_id: job.segment_id.to_string(),
                        attempts,
                        timestamp: SystemTime::now(),
                    },
                )
                .await;
                return;
            }
        }
    }
}

/// Doubling backoff: base * 2^(attempt-1), capped
fn backoff_for_attempt(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
    base.saturating_mul(factor).min(max)
}

async fn publish(event_bus: &EventBus, event: SentrycamEvent) {
    if let Err(e) = event_bus.publish(event).await {
        debug!("No subscribers for dispatch event: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotifyError;
    use crate::recorder::{Segment, SegmentState};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Sink that fails a scripted number of times before succeeding
    struct FlakySink {
        calls: AtomicU32,
        failures_before_success: u32,
    }

    impl FlakySink {
        fn new(failures_before_success: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                failures_before_success,
            })
        }
    }

    #[async_trait]
    impl NotificationSink for FlakySink {
        async fn send(&self, _file: &Path, _metadata: &ClipMetadata) -> Result<(), NotifyError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures_before_success {
                Err(NotifyError::send("scripted failure"))
            } else {
                Ok(())
            }
        }
    }

    fn config(max_attempts: u32) -> NotifyConfig {
        NotifyConfig {
            url: "http://127.0.0.1:1/clips".to_string(),
            user_id: "123456".to_string(),
            max_dispatch_attempts: max_attempts,
            dispatch_backoff_seconds: 0,
            max_backoff_seconds: 0,
            request_timeout_seconds: 1,
            shutdown_grace_seconds: 1,
        }
    }

    fn closed_segment(ledger: &SegmentLedger, path: &str) -> ClosedSegment {
        let segment = Segment::open(PathBuf::from(path), SystemTime::now());
        ledger.register_open(&segment);
        ledger.mark_closed(segment.id, SystemTime::now());
        let mut closed = segment;
        closed.state = SegmentState::Closed;
        ClosedSegment {
            segment: closed,
            frames: 10,
        }
    }

    #[tokio::test]
    async fn test_retries_then_delivers() {
        let ledger = SegmentLedger::new();
        let event_bus = Arc::new(EventBus::new(16));
        let mut events = event_bus.subscribe();

        let sink = FlakySink::new(2);
        let dispatcher = NotificationDispatcher::start(
            Arc::clone(&sink) as Arc<dyn NotificationSink>,
            &config(3),
            ledger.clone(),
            Arc::clone(&event_bus),
        );

        let closed = closed_segment(&ledger, "/tmp/clips/motion_2026-01-02_10-00-00.mjpeg");
        dispatcher.handle().enqueue(&closed);

        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("dispatch finished in time")
            .unwrap();
        match event {
            SentrycamEvent::ClipDispatched { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected ClipDispatched, got {:?}", other),
        }

        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            ledger.job_state_of(closed.segment.id),
            Some(JobState::Delivered)
        );
        assert_eq!(
            ledger.state_of(closed.segment.id),
            Some(SegmentState::Dispatched)
        );

        dispatcher.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_exhausted_attempts_abandon_job() {
        let ledger = SegmentLedger::new();
        let event_bus = Arc::new(EventBus::new(16));
        let mut events = event_bus.subscribe();

        let sink = FlakySink::new(u32::MAX);
        let dispatcher = NotificationDispatcher::start(
            Arc::clone(&sink) as Arc<dyn NotificationSink>,
            &config(3),
            ledger.clone(),
            Arc::clone(&event_bus),
        );

        let closed = closed_segment(&ledger, "/tmp/clips/motion_2026-01-02_10-05-00.mjpeg");
        dispatcher.handle().enqueue(&closed);

        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("dispatch concluded in time")
            .unwrap();
        match event {
            SentrycamEvent::DispatchAbandoned { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected DispatchAbandoned, got {:?}", other),
        }

        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            ledger.job_state_of(closed.segment.id),
            Some(JobState::Abandoned)
        );
        assert_eq!(
            ledger.state_of(closed.segment.id),
            Some(SegmentState::DispatchFailed)
        );

        dispatcher.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_jobs_deliver_in_fifo_order() {
        let ledger = SegmentLedger::new();
        let event_bus = Arc::new(EventBus::new(16));
        let mut events = event_bus.subscribe();

        let sink = FlakySink::new(0);
        let dispatcher = NotificationDispatcher::start(
            Arc::clone(&sink) as Arc<dyn NotificationSink>,
            &config(3),
            ledger.clone(),
            Arc::clone(&event_bus),
        );

        let first = closed_segment(&ledger, "/tmp/clips/motion_2026-01-02_11-00-00.mjpeg");
        let second = closed_segment(&ledger, "/tmp/clips/motion_2026-01-02_11-01-00.mjpeg");
        dispatcher.handle().enqueue(&first);
        dispatcher.handle().enqueue(&second);

        let mut delivered = Vec::new();
        for _ in 0..2 {
            let event = timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("delivery in time")
                .unwrap();
            if let SentrycamEvent::ClipDispatched { segment_id, .. } = event {
                delivered.push(segment_id);
            }
        }
        assert_eq!(
            delivered,
            vec![first.segment.id.to_string(), second.segment.id.to_string()]
        );

        dispatcher.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_pending_jobs() {
        let ledger = SegmentLedger::new();
        let event_bus = Arc::new(EventBus::new(16));

        let sink = FlakySink::new(0);
        let dispatcher = NotificationDispatcher::start(
            Arc::clone(&sink) as Arc<dyn NotificationSink>,
            &config(3),
            ledger.clone(),
            Arc::clone(&event_bus),
        );

        let closed = closed_segment(&ledger, "/tmp/clips/motion_2026-01-02_12-00-00.mjpeg");
        dispatcher.handle().enqueue(&closed);
        dispatcher.shutdown(Duration::from_secs(2)).await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            ledger.job_state_of(closed.segment.id),
            Some(JobState::Delivered)
        );
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_secs(10);
        let max = Duration::from_secs(300);
        assert_eq!(backoff_for_attempt(base, max, 1), Duration::from_secs(10));
        assert_eq!(backoff_for_attempt(base, max, 2), Duration::from_secs(20));
        assert_eq!(backoff_for_attempt(base, max, 3), Duration::from_secs(40));
        assert_eq!(backoff_for_attempt(base, max, 10), max);
    }
}
