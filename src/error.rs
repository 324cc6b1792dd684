use thiserror::Error;

#[derive(Error, Debug)]
pub enum SentrycamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    #[error("Frame source error: {0}")]
    Source(#[from] SourceError),

    #[error("Segment error: {0}")]
    Segment(#[from] SegmentError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl SentrycamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Failures raised by a frame source or the stream handle it returns.
///
/// `Connect` is retried forever by the supervisor; `Read` consumes one of
/// the bounded transient retries before escalating to a reconnect.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to connect to frame source: {details}")]
    Connect { details: String },

    #[error("Failed to read frame: {details}")]
    Read { details: String },
}

impl SourceError {
    pub fn connect<S: Into<String>>(details: S) -> Self {
        Self::Connect {
            details: details.into(),
        }
    }

    pub fn read<S: Into<String>>(details: S) -> Self {
        Self::Read {
            details: details.into(),
        }
    }

    /// True for failures that count against the bounded read-retry budget.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Read { .. })
    }
}

/// Failures while opening, appending to, or finalizing a clip file.
#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("Failed to create segment file {path}: {source}")]
    Create {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write segment data: {details}")]
    Write { details: String },

    #[error("Unsupported frame format for segment sink: {details}")]
    UnsupportedFormat { details: String },

    #[error("Could not derive a unique segment filename under {directory}")]
    FilenameExhausted { directory: String },
}

impl SegmentError {
    pub fn write<S: Into<String>>(details: S) -> Self {
        Self::Write {
            details: details.into(),
        }
    }
}

/// Failures while delivering a finished clip to the notification sink.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to send notification: {details}")]
    Send { details: String },

    #[error("Notification rejected with status {status}")]
    Rejected { status: u16 },
}

impl NotifyError {
    pub fn send<S: Into<String>>(details: S) -> Self {
        Self::Send {
            details: details.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Frame processing failed: {details}")]
    FrameProcessing { details: String },
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event channel closed")]
    ChannelClosed,
}

impl ClassifierError {
    pub fn frame_processing<S: Into<String>>(details: S) -> Self {
        Self::FrameProcessing {
            details: details.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SentrycamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_error_display() {
        let err = SentrycamError::component("dispatcher", "queue closed");
        assert_eq!(
            err.to_string(),
            "Component error in dispatcher: queue closed"
        );
    }

    #[test]
    fn test_source_error_transience() {
        assert!(SourceError::read("timeout").is_transient());
        assert!(!SourceError::connect("refused").is_transient());
    }

    #[test]
    fn test_sub_error_conversion() {
        fn fails() -> Result<()> {
            Err(SegmentError::write("disk full"))?
        }
        match fails() {
            Err(SentrycamError::Segment(SegmentError::Write { details })) => {
                assert_eq!(details, "disk full");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
