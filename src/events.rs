use crate::error::EventBusError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Events that can occur in the sentrycam system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SentrycamEvent {
    /// The classifier score crossed the activity threshold
    ActivityDetected { score: f64, timestamp: SystemTime },
    /// A new clip segment was opened
    SegmentOpened {
        segment_id: String,
        path: String,
        timestamp: SystemTime,
    },
    /// A clip segment was closed
    SegmentClosed {
        segment_id: String,
        path: String,
        frames: u64,
        reason: String,
        timestamp: SystemTime,
    },
    /// A finished clip was delivered to the notification sink
    ClipDispatched {
        segment_id: String,
        attempts: u32,
        timestamp: SystemTime,
    },
    /// Delivery attempts for a clip were exhausted
    DispatchAbandoned {
        segment_id: String,
        attempts: u32,
        timestamp: SystemTime,
    },
    /// Frame source connection status changed
    SourceStatusChanged {
        connected: bool,
        timestamp: SystemTime,
    },
    /// A retention sweep finished
    SweepCompleted {
        files_deleted: u64,
        bytes_freed: u64,
        timestamp: SystemTime,
    },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
    /// System shutdown requested
    ShutdownRequested {
        timestamp: SystemTime,
        reason: String,
    },
}

impl SentrycamEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> SystemTime {
        match self {
            SentrycamEvent::ActivityDetected { timestamp, .. } => *timestamp,
            SentrycamEvent::SegmentOpened { timestamp, .. } => *timestamp,
            SentrycamEvent::SegmentClosed { timestamp, .. } => *timestamp,
            SentrycamEvent::ClipDispatched { timestamp, .. } => *timestamp,
            SentrycamEvent::DispatchAbandoned { timestamp, .. } => *timestamp,
            SentrycamEvent::SourceStatusChanged { timestamp, .. } => *timestamp,
            SentrycamEvent::SweepCompleted { timestamp, .. } => *timestamp,
            SentrycamEvent::SystemError { .. } => SystemTime::now(),
            SentrycamEvent::ShutdownRequested { timestamp, .. } => *timestamp,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            SentrycamEvent::ActivityDetected { score, .. } => {
                format!("Activity detected with score: {:.2}", score)
            }
            SentrycamEvent::SegmentOpened { segment_id, path, .. } => {
                format!("Segment {} opened: {}", segment_id, path)
            }
            SentrycamEvent::SegmentClosed {
                segment_id,
                frames,
                reason,
                ..
            } => {
                format!(
                    "Segment {} closed after {} frames ({})",
                    segment_id, frames, reason
                )
            }
            SentrycamEvent::ClipDispatched {
                segment_id,
                attempts,
                ..
            } => {
                format!("Clip {} dispatched after {} attempt(s)", segment_id, attempts)
            }
            SentrycamEvent::DispatchAbandoned {
                segment_id,
                attempts,
                ..
            } => {
                format!(
                    "Clip {} abandoned after {} attempt(s)",
                    segment_id, attempts
                )
            }
            SentrycamEvent::SourceStatusChanged { connected, .. } => {
                format!(
                    "Frame source {}",
                    if *connected {
                        "connected"
                    } else {
                        "disconnected"
                    }
                )
            }
            SentrycamEvent::SweepCompleted {
                files_deleted,
                bytes_freed,
                ..
            } => {
                format!(
                    "Retention sweep deleted {} file(s), freed {} bytes",
                    files_deleted, bytes_freed
                )
            }
            SentrycamEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            SentrycamEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            SentrycamEvent::ActivityDetected { .. } => "activity_detected",
            SentrycamEvent::SegmentOpened { .. } => "segment_opened",
            SentrycamEvent::SegmentClosed { .. } => "segment_closed",
            SentrycamEvent::ClipDispatched { .. } => "clip_dispatched",
            SentrycamEvent::DispatchAbandoned { .. } => "dispatch_abandoned",
            SentrycamEvent::SourceStatusChanged { .. } => "source_status_changed",
            SentrycamEvent::SweepCompleted { .. } => "sweep_completed",
            SentrycamEvent::SystemError { .. } => "system_error",
            SentrycamEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Async event bus for component coordination using broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<SentrycamEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<SentrycamEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers
    pub async fn publish(&self, event: SentrycamEvent) -> Result<usize, EventBusError> {
        if self.debug_logging {
            debug!("Publishing event: {}", event.description());
        }

        // Log important events at appropriate levels
        match &event {
            SentrycamEvent::SegmentOpened { segment_id, path, .. } => {
                info!("Segment {} opened: {}", segment_id, path);
            }
            SentrycamEvent::SegmentClosed {
                segment_id,
                frames,
                reason,
                ..
            } => {
                info!(
                    "Segment {} closed after {} frames ({})",
                    segment_id, frames, reason
                );
            }
            SentrycamEvent::ClipDispatched {
                segment_id,
                attempts,
                ..
            } => {
                info!(
                    "Clip {} dispatched after {} attempt(s)",
                    segment_id, attempts
                );
            }
            SentrycamEvent::DispatchAbandoned {
                segment_id,
                attempts,
                ..
            } => {
                error!(
                    "Clip {} abandoned after {} delivery attempt(s)",
                    segment_id, attempts
                );
            }
            SentrycamEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            SentrycamEvent::SourceStatusChanged { connected, .. } => {
                if *connected {
                    info!("Frame source connected");
                } else {
                    warn!("Frame source disconnected");
                }
            }
            SentrycamEvent::ShutdownRequested { reason, .. } => {
                info!("Shutdown requested: {}", reason);
            }
            _ => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Accept events from specific components (for SystemError events)
    Components(Vec<String>),
    /// Custom filter function
    Custom(fn(&SentrycamEvent) -> bool),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &SentrycamEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Components(components) => {
                if let SentrycamEvent::SystemError { component, .. } = event {
                    components.contains(component)
                } else {
                    false
                }
            }
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering capabilities
pub struct EventReceiver {
    receiver: broadcast::Receiver<SentrycamEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    /// Create a new event receiver with a filter
    pub fn new(
        receiver: broadcast::Receiver<SentrycamEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<SentrycamEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                    // Continue loop to get next event if this one doesn't match filter
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::PublishFailed {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<SentrycamEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(Some(event));
                    }
                    // Continue loop to check next event
                }
                Err(broadcast::error::TryRecvError::Empty) => {
                    return Ok(None);
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::PublishFailed {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let event = SentrycamEvent::ActivityDetected {
            score: 1500.0,
            timestamp: SystemTime::now(),
        };

        // Publish event
        let subscriber_count = event_bus.publish(event.clone()).await.unwrap();
        assert_eq!(subscriber_count, 1);

        // Receive event
        let received_event = receiver.recv().await.unwrap();
        match received_event {
            SentrycamEvent::ActivityDetected { score, .. } => {
                assert_eq!(score, 1500.0);
            }
            _ => panic!("Unexpected event type"),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        assert_eq!(event_bus.subscriber_count(), 2);

        let event = SentrycamEvent::SourceStatusChanged {
            connected: true,
            timestamp: SystemTime::now(),
        };

        event_bus.publish(event).await.unwrap();

        // Both receivers should get the event
        let _ = timeout(Duration::from_millis(100), receiver1.recv())
            .await
            .unwrap()
            .unwrap();
        let _ = timeout(Duration::from_millis(100), receiver2.recv())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_event_filter() {
        let filter = EventFilter::EventTypes(vec!["segment_opened", "segment_closed"]);

        let opened_event = SentrycamEvent::SegmentOpened {
            segment_id: "abc".to_string(),
            path: "/tmp/motion_2026-01-01_00-00-00.mjpeg".to_string(),
            timestamp: SystemTime::now(),
        };

        let activity_event = SentrycamEvent::ActivityDetected {
            score: 1.0,
            timestamp: SystemTime::now(),
        };

        assert!(filter.matches(&opened_event));
        assert!(!filter.matches(&activity_event));
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let event_bus = EventBus::new(10);
        let receiver = event_bus.subscribe();
        let filter = EventFilter::EventTypes(vec!["dispatch_abandoned"]);
        let mut filtered_receiver = EventReceiver::new(receiver, filter, "test".to_string());

        // Publish events of different types
        event_bus
            .publish(SentrycamEvent::ActivityDetected {
                score: 1.0,
                timestamp: SystemTime::now(),
            })
            .await
            .unwrap();

        event_bus
            .publish(SentrycamEvent::DispatchAbandoned {
                segment_id: "abc".to_string(),
                attempts: 3,
                timestamp: SystemTime::now(),
            })
            .await
            .unwrap();

        // Should only receive the abandoned event
        let received = timeout(Duration::from_millis(100), filtered_receiver.recv())
            .await
            .unwrap()
            .unwrap();
        match received {
            SentrycamEvent::DispatchAbandoned { attempts, .. } => {
                assert_eq!(attempts, 3);
            }
            _ => panic!("Unexpected event type"),
        }
    }

    #[test]
    fn test_event_properties() {
        let event = SentrycamEvent::ActivityDetected {
            score: 1500.0,
            timestamp: SystemTime::now(),
        };

        assert_eq!(event.event_type(), "activity_detected");
        assert!(event.description().contains("1500.00"));
    }
}
