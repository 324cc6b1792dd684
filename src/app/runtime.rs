use super::{SentrycamOrchestrator, ShutdownReason};
use crate::error::{Result, SentrycamError};
use crate::events::SentrycamEvent;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tracing::info;

impl SentrycamOrchestrator {
    /// Run until a shutdown signal arrives, then stop everything.
    ///
    /// Returns the process exit code: 0 for a clean stop, 1 when any
    /// component failed to stop in time.
    pub async fn run(&mut self) -> Result<i32> {
        info!("Sentrycam is running");

        let shutdown_sender = self
            .shutdown_sender
            .take()
            .ok_or_else(|| SentrycamError::system("shutdown sender already taken"))?;
        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| SentrycamError::system("shutdown receiver already taken"))?;

        self.setup_shutdown_triggers(shutdown_sender);

        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| SentrycamError::system("shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let exit_code = self.shutdown().await?;

        info!("Sentrycam shutdown complete");
        Ok(exit_code)
    }

    /// Arm the shutdown triggers: SIGTERM, Ctrl+C, and a
    /// `ShutdownRequested` event on the bus. Whichever fires first wins.
    fn setup_shutdown_triggers(&self, shutdown_sender: oneshot::Sender<ShutdownReason>) {
        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));

        // SIGTERM (systemd stop) - Unix only
        #[cfg(unix)]
        {
            let sender = Arc::clone(&shutdown_sender);
            tokio::spawn(async move {
                let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate())
                {
                    Ok(sigterm) => sigterm,
                    Err(e) => {
                        tracing::error!("Failed to register SIGTERM handler: {}", e);
                        return;
                    }
                };
                if sigterm.recv().await.is_some() {
                    info!("Received SIGTERM signal");
                    if let Some(sender) = sender.lock().await.take() {
                        let _ = sender.send(ShutdownReason::Signal("SIGTERM".to_string()));
                    }
                }
            });
        }

        // SIGINT (Ctrl+C)
        {
            let sender = Arc::clone(&shutdown_sender);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received SIGINT signal (Ctrl+C)");
                    if let Some(sender) = sender.lock().await.take() {
                        let _ = sender.send(ShutdownReason::Signal("SIGINT".to_string()));
                    }
                }
            });
        }

        // ShutdownRequested published on the event bus
        {
            let sender = Arc::clone(&shutdown_sender);
            let mut events = self.event_bus.subscribe();
            tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    if let SentrycamEvent::ShutdownRequested { reason, .. } = event {
                        info!("Shutdown requested via event bus: {}", reason);
                        if let Some(sender) = sender.lock().await.take() {
                            let _ = sender.send(ShutdownReason::UserRequest);
                        }
                        return;
                    }
                }
            });
        }
    }
}
