use super::types::ComponentState;
use crate::classify::{ActivityClassifier, FrameDeltaClassifier};
use crate::config::{RecordingMode, SentrycamConfig};
use crate::error::Result;
use crate::events::EventBus;
use crate::notify::{HttpNotificationSink, NotificationDispatcher};
use crate::pipeline::IngestionPipeline;
use crate::recorder::{MjpegClipSink, RecordingController, SegmentLedger, SegmentWriter};
use crate::retention::RetentionSweeper;
use crate::source::{MjpegHttpSource, ReconnectSupervisor};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Main application coordinator.
///
/// Owns the three long-running pieces of the system: the ingestion
/// pipeline, the notification dispatcher and the retention sweeper. The
/// dispatcher and classifier only exist in activity mode; continuous mode
/// rotates segments with neither.
pub struct SentrycamOrchestrator {
    pub(super) config: SentrycamConfig,
    pub(super) event_bus: Arc<EventBus>,

    // Components, consumed when their tasks are spawned
    pub(super) pipeline: Option<IngestionPipeline>,
    pub(super) sweeper: Option<RetentionSweeper>,
    pub(super) dispatcher: Option<NotificationDispatcher>,
    pub(super) pipeline_task: Option<JoinHandle<()>>,
    pub(super) sweeper_task: Option<JoinHandle<()>>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<super::types::ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<super::types::ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl SentrycamOrchestrator {
    /// Wire up all components from the configuration.
    ///
    /// The dispatcher worker starts immediately but idles until the
    /// pipeline task spawned by `start` produces finished clips.
    pub fn new(config: SentrycamConfig) -> Result<Self> {
        let event_bus = Arc::new(EventBus::new(config.system.event_bus_capacity));
        let ledger = SegmentLedger::new();
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        let source = Arc::new(MjpegHttpSource::new(&config.source)?);
        let supervisor =
            ReconnectSupervisor::new(source, &config.source, Arc::clone(&event_bus));

        let classifier: Option<Box<dyn ActivityClassifier>> = match config.recording.mode {
            RecordingMode::Activity => Some(Box::new(FrameDeltaClassifier::new(
                config.classifier.clone(),
            ))),
            RecordingMode::Continuous => None,
        };

        let dispatcher = match config.recording.mode {
            RecordingMode::Activity => {
                let sink = Arc::new(HttpNotificationSink::new(&config.notify)?);
                Some(NotificationDispatcher::start(
                    sink,
                    &config.notify,
                    ledger.clone(),
                    Arc::clone(&event_bus),
                ))
            }
            RecordingMode::Continuous => None,
        };

        let writer = SegmentWriter::new(
            &config.recording,
            Box::new(MjpegClipSink::new()),
            ledger.clone(),
        )?;
        let controller = RecordingController::new(
            &config.recording,
            writer,
            dispatcher.as_ref().map(|d| d.handle()),
            Arc::clone(&event_bus),
        );
        let pipeline = IngestionPipeline::new(
            supervisor,
            classifier,
            controller,
            &config.recording,
            Arc::clone(&event_bus),
        );
        let sweeper = RetentionSweeper::new(
            &config.recording,
            &config.retention,
            ledger.clone(),
            Arc::clone(&event_bus),
        );

        Ok(Self {
            config,
            event_bus,
            pipeline: Some(pipeline),
            sweeper: Some(sweeper),
            dispatcher,
            pipeline_task: None,
            sweeper_task: None,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Prepare the filesystem and component state tracking.
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing sentrycam components");

        let storage = PathBuf::from(&self.config.recording.storage_directory);
        if !storage.exists() {
            fs::create_dir_all(&storage).await?;
            info!("Created storage directory: {}", storage.display());
        }

        let mut states = self.component_states.lock().await;
        states.insert("pipeline".to_string(), ComponentState::Stopped);
        states.insert("sweeper".to_string(), ComponentState::Stopped);
        if self.dispatcher.is_some() {
            states.insert("dispatcher".to_string(), ComponentState::Stopped);
        }
        drop(states);

        info!("All components initialized");
        Ok(())
    }

    /// Spawn the long-running tasks.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting sentrycam system");

        if self.dispatcher.is_some() {
            // The worker has been draining an empty queue since `new`
            self.set_component_state("dispatcher", ComponentState::Running)
                .await;
        }

        self.set_component_state("pipeline", ComponentState::Starting)
            .await;
        let pipeline = self.pipeline.take().ok_or_else(|| {
            crate::error::SentrycamError::system("pipeline already started")
        })?;
        self.pipeline_task = Some(tokio::spawn(
            pipeline.run(self.cancellation_token.clone()),
        ));
        self.set_component_state("pipeline", ComponentState::Running)
            .await;

        self.set_component_state("sweeper", ComponentState::Starting)
            .await;
        let sweeper = self.sweeper.take().ok_or_else(|| {
            crate::error::SentrycamError::system("sweeper already started")
        })?;
        self.sweeper_task = Some(sweeper.spawn(self.cancellation_token.clone()));
        self.set_component_state("sweeper", ComponentState::Running)
            .await;

        info!("Sentrycam system started");
        Ok(())
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub(super) async fn set_component_state(&mut self, component: &str, state: ComponentState) {
        let mut states = self.component_states.lock().await;
        debug!("Component '{}' state changed to: {:?}", component, state);
        states.insert(component.to_string(), state);
    }

    pub async fn get_component_state(&self, component: &str) -> Option<ComponentState> {
        let states = self.component_states.lock().await;
        states.get(component).cloned()
    }
}
