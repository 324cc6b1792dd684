use crate::config::{RecordingConfig, RetentionConfig};
use crate::error::{Result, SentrycamError};
use crate::events::{EventBus, SentrycamEvent};
use crate::recorder::SegmentLedger;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one sweep pass
#[derive(Debug, Clone, Default)]
pub struct SweepOutcome {
    pub files_deleted: u64,
    pub bytes_freed: u64,
    pub errors: Vec<String>,
}

/// Deletes clip files whose age exceeds the retention window.
///
/// Eligibility is by file modification time, and only files whose names
/// have the timestamped clip shape are ever touched; anything else in the
/// storage directory is left alone. The ledger vetoes deletion of files
/// that are still open or awaiting delivery, whatever their age.
pub struct RetentionSweeper {
    directory: PathBuf,
    extension: String,
    config: RetentionConfig,
    ledger: SegmentLedger,
    event_bus: Arc<EventBus>,
}

impl RetentionSweeper {
    pub fn new(
        recording: &RecordingConfig,
        config: &RetentionConfig,
        ledger: SegmentLedger,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            directory: PathBuf::from(&recording.storage_directory),
            extension: recording.file_extension.clone(),
            config: config.clone(),
            ledger,
            event_bus,
        }
    }

    /// Run one sweep against the configured retention window
    pub async fn sweep_once(&self) -> Result<SweepOutcome> {
        let retention =
            Duration::from_secs(self.config.retention_days as u64 * 24 * 3600);
        let cutoff = SystemTime::now()
            .checked_sub(retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        self.sweep_with_cutoff(cutoff).await
    }

    /// Delete eligible clip files older than `cutoff`.
    ///
    /// Fails only when the storage directory cannot be read; individual
    /// file failures are collected and the pass continues.
    async fn sweep_with_cutoff(&self, cutoff: SystemTime) -> Result<SweepOutcome> {
        debug!(
            "Sweeping {} for clips modified before {:?}",
            self.directory.display(),
            cutoff
        );

        let mut entries = fs::read_dir(&self.directory).await.map_err(|e| {
            SentrycamError::component(
                "retention".to_string(),
                format!("cannot read {}: {}", self.directory.display(), e),
            )
        })?;

        let mut outcome = SweepOutcome::default();

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    outcome.errors.push(format!("directory entry: {}", e));
                    continue;
                }
            };

            let path = entry.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            if !is_clip_filename(&name, &self.extension) {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    outcome.errors.push(format!("{}: {}", name, e));
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }

            // Modification time is the age signal; a clip still being
            // appended to stays fresh on its own.
            let modified = match metadata.modified() {
                Ok(modified) => modified,
                Err(e) => {
                    outcome.errors.push(format!("{}: no mtime: {}", name, e));
                    continue;
                }
            };
            if modified >= cutoff {
                continue;
            }

            if self.ledger.is_protected(&path) {
                debug!("Sweep skipping protected clip {}", name);
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => {
                    self.ledger.mark_deleted(&path);
                    outcome.files_deleted += 1;
                    outcome.bytes_freed += metadata.len();
                    debug!("Swept clip {} ({} bytes)", name, metadata.len());
                }
                Err(e) => {
                    let message = format!("delete {}: {}", name, e);
                    error!("Sweep failed to {}", message);
                    outcome.errors.push(message);
                }
            }
        }

        info!(
            "Sweep completed: {} file(s) deleted, {} bytes freed, {} error(s)",
            outcome.files_deleted,
            outcome.bytes_freed,
            outcome.errors.len()
        );

        let event = SentrycamEvent::SweepCompleted {
            files_deleted: outcome.files_deleted,
            bytes_freed: outcome.bytes_freed,
            timestamp: SystemTime::now(),
        };
        if let Err(e) = self.event_bus.publish(event).await {
            debug!("No subscribers for sweep event: {}", e);
        }

        Ok(outcome)
    }

    /// Spawn the periodic sweep scheduler.
    ///
    /// Sweeps run at the configured interval after an initial settling
    /// delay. A failed sweep doubles the interval up to the configured
    /// ceiling; a successful one resets it.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let base_interval = Duration::from_secs(self.config.sweep_interval_seconds);
            let max_interval = Duration::from_secs(self.config.max_interval_seconds);
            let initial_delay = Duration::from_secs(self.config.initial_delay_seconds);
            let mut current_interval = base_interval;
            let mut consecutive_failures = 0u32;

            info!(
                "Retention sweeper started (retention: {} days, interval: {:?})",
                self.config.retention_days, base_interval
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Retention sweeper stopped before first sweep");
                    return;
                }
                _ = tokio::time::sleep(initial_delay) => {}
            }

            loop {
                match self.sweep_once().await {
                    Ok(outcome) => {
                        current_interval = base_interval;
                        consecutive_failures = 0;
                        if !outcome.errors.is_empty() {
                            warn!(
                                "Sweep finished with {} error(s): {:?}",
                                outcome.errors.len(),
                                outcome.errors
                            );
                        }
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(
                            "Sweep failed (consecutive failure {}): {}",
                            consecutive_failures, e
                        );
                        current_interval = (current_interval * 2).min(max_interval);
                        warn!(
                            "Backing off sweep interval to {:?}",
                            current_interval
                        );
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Retention sweeper stopped");
                        return;
                    }
                    _ = tokio::time::sleep(current_interval) => {}
                }
            }
        })
    }
}

/// Whether a filename has the timestamped clip shape
/// `<prefix>_YYYY-MM-DD_HH-MM-SS.<ext>`.
fn is_clip_filename(name: &str, extension: &str) -> bool {
    let stem = match name
        .strip_suffix(extension)
        .and_then(|s| s.strip_suffix('.'))
    {
        Some(stem) => stem,
        None => return false,
    };

    // Prefix followed by `_YYYY-MM-DD_HH-MM-SS` (20 chars)
    if stem.len() < 21 {
        return false;
    }
    let (prefix, stamp) = stem.split_at(stem.len() - 20);
    if prefix.is_empty() {
        return false;
    }

    stamp.chars().enumerate().all(|(i, c)| match i {
        0 | 11 => c == '_',
        5 | 8 | 14 | 17 => c == '-',
        _ => c.is_ascii_digit(),
    })
}
