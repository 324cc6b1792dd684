use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use uuid::Uuid;

/// Lifecycle state of a clip segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// The ingestion loop is appending frames to the file
    Open,
    /// The file is finalized; delivery (if any) has not concluded
    Closed,
    /// The clip was delivered to the notification sink
    Dispatched,
    /// Delivery attempts were exhausted; the file stays for the sweeper
    DispatchFailed,
    /// The file was removed by the retention sweeper
    Deleted,
}

/// Delivery state of a segment's notification job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    InFlight,
    Delivered,
    Abandoned,
}

/// One clip segment and the file backing it
#[derive(Debug, Clone)]
pub struct Segment {
    pub id: Uuid,
    pub start_ts: SystemTime,
    pub end_ts: Option<SystemTime>,
    pub path: PathBuf,
    pub state: SegmentState,
}

impl Segment {
    pub fn open(path: PathBuf, start_ts: SystemTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_ts,
            end_ts: None,
            path,
            state: SegmentState::Open,
        }
    }
}

/// A finalized segment handed to a downstream consumer
#[derive(Debug, Clone)]
pub struct ClosedSegment {
    pub segment: Segment,
    pub frames: u64,
}

struct SegmentRecord {
    segment: Segment,
    job: Option<JobState>,
}

#[derive(Default)]
struct LedgerInner {
    segments: HashMap<Uuid, SegmentRecord>,
    /// Paths of deleted segments; never handed out again
    retired_paths: HashSet<PathBuf>,
}

/// Shared registry of segment and job states.
///
/// The ledger is the only state shared between the ingestion loop, the
/// dispatcher and the sweeper: transitions recorded here gate file access
/// instead of directory-level locking. Critical sections are tiny and
/// synchronous, so a `parking_lot` lock suffices.
#[derive(Clone, Default)]
pub struct SegmentLedger {
    inner: Arc<RwLock<LedgerInner>>,
}

impl SegmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly opened segment.
    ///
    /// Panics in debug builds if a segment is already open; the controller
    /// owns all `Open` transitions and never opens two at once.
    pub fn register_open(&self, segment: &Segment) {
        let mut inner = self.inner.write();
        debug_assert!(
            !inner
                .segments
                .values()
                .any(|r| r.segment.state == SegmentState::Open),
            "a segment is already open"
        );
        inner.segments.insert(
            segment.id,
            SegmentRecord {
                segment: segment.clone(),
                job: None,
            },
        );
    }

    /// True when the path belongs to any known or retired segment
    pub fn path_in_use(&self, path: &Path) -> bool {
        let inner = self.inner.read();
        inner.retired_paths.contains(path)
            || inner.segments.values().any(|r| r.segment.path == path)
    }

    pub fn mark_closed(&self, id: Uuid, end_ts: SystemTime) {
        let mut inner = self.inner.write();
        if let Some(record) = inner.segments.get_mut(&id) {
            record.segment.state = SegmentState::Closed;
            record.segment.end_ts = Some(end_ts);
        }
    }

    pub fn set_job_state(&self, id: Uuid, state: JobState) {
        let mut inner = self.inner.write();
        if let Some(record) = inner.segments.get_mut(&id) {
            record.job = Some(state);
            match state {
                JobState::Delivered => record.segment.state = SegmentState::Dispatched,
                JobState::Abandoned => record.segment.state = SegmentState::DispatchFailed,
                JobState::Pending | JobState::InFlight => {}
            }
        }
    }

    /// Record a deletion, retiring the path permanently
    pub fn mark_deleted(&self, path: &Path) {
        let mut inner = self.inner.write();
        for record in inner.segments.values_mut() {
            if record.segment.path == path {
                record.segment.state = SegmentState::Deleted;
            }
        }
        inner.retired_paths.insert(path.to_path_buf());
    }

    /// Whether the sweeper must leave this file alone regardless of age.
    ///
    /// Protected: the segment is still `Open`, or a delivery job for it is
    /// `Pending` or `InFlight`. Files with no ledger record belong to a
    /// previous run and are unprotected.
    pub fn is_protected(&self, path: &Path) -> bool {
        let inner = self.inner.read();
        inner.segments.values().any(|record| {
            record.segment.path == path
                && (record.segment.state == SegmentState::Open
                    || matches!(record.job, Some(JobState::Pending | JobState::InFlight)))
        })
    }

    pub fn state_of(&self, id: Uuid) -> Option<SegmentState> {
        self.inner.read().segments.get(&id).map(|r| r.segment.state)
    }

    pub fn job_state_of(&self, id: Uuid) -> Option<JobState> {
        self.inner.read().segments.get(&id).and_then(|r| r.job)
    }

    /// Number of segments currently in `Open` state
    pub fn open_count(&self) -> usize {
        self.inner
            .read()
            .segments
            .values()
            .filter(|r| r.segment.state == SegmentState::Open)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_segment(path: &str) -> Segment {
        Segment::open(PathBuf::from(path), SystemTime::now())
    }

    #[test]
    fn test_segment_lifecycle_states() {
        let ledger = SegmentLedger::new();
        let segment = open_segment("/tmp/clips/motion_2026-01-01_00-00-00.mjpeg");
        ledger.register_open(&segment);

        assert_eq!(ledger.state_of(segment.id), Some(SegmentState::Open));
        assert_eq!(ledger.open_count(), 1);

        ledger.mark_closed(segment.id, SystemTime::now());
        assert_eq!(ledger.state_of(segment.id), Some(SegmentState::Closed));
        assert_eq!(ledger.open_count(), 0);

        ledger.set_job_state(segment.id, JobState::Pending);
        ledger.set_job_state(segment.id, JobState::InFlight);
        ledger.set_job_state(segment.id, JobState::Delivered);
        assert_eq!(ledger.state_of(segment.id), Some(SegmentState::Dispatched));
    }

    #[test]
    fn test_abandoned_job_marks_dispatch_failed() {
        let ledger = SegmentLedger::new();
        let segment = open_segment("/tmp/clips/motion_2026-01-01_00-00-01.mjpeg");
        ledger.register_open(&segment);
        ledger.mark_closed(segment.id, SystemTime::now());
        ledger.set_job_state(segment.id, JobState::Abandoned);
        assert_eq!(
            ledger.state_of(segment.id),
            Some(SegmentState::DispatchFailed)
        );
    }

    #[test]
    fn test_open_and_inflight_paths_are_protected() {
        let ledger = SegmentLedger::new();
        let open = open_segment("/tmp/clips/motion_2026-01-01_00-00-02.mjpeg");
        ledger.register_open(&open);
        assert!(ledger.is_protected(&open.path));

        ledger.mark_closed(open.id, SystemTime::now());
        assert!(!ledger.is_protected(&open.path));

        ledger.set_job_state(open.id, JobState::Pending);
        assert!(ledger.is_protected(&open.path));
        ledger.set_job_state(open.id, JobState::InFlight);
        assert!(ledger.is_protected(&open.path));
        ledger.set_job_state(open.id, JobState::Delivered);
        assert!(!ledger.is_protected(&open.path));

        // Unknown files are fair game for the sweeper
        assert!(!ledger.is_protected(Path::new("/tmp/clips/orphan.mjpeg")));
    }

    #[test]
    fn test_deleted_paths_are_retired_forever() {
        let ledger = SegmentLedger::new();
        let segment = open_segment("/tmp/clips/motion_2026-01-01_00-00-03.mjpeg");
        ledger.register_open(&segment);
        ledger.mark_closed(segment.id, SystemTime::now());

        assert!(ledger.path_in_use(&segment.path));
        ledger.mark_deleted(&segment.path);
        assert_eq!(ledger.state_of(segment.id), Some(SegmentState::Deleted));
        assert!(ledger.path_in_use(&segment.path));
    }
}
