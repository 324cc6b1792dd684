use super::{ComponentState, SentrycamOrchestrator};
use crate::error::{Result, SentrycamError};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

impl SentrycamOrchestrator {
    /// Stop all components in reverse dependency order.
    ///
    /// The pipeline goes first so no new clips get enqueued; the
    /// dispatcher then drains whatever is already queued within its grace
    /// period; the sweeper stops last. Returns the exit code.
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        self.cancellation_token.cancel();

        let stop_timeout = Duration::from_secs(self.config.system.shutdown_timeout_seconds);
        let mut exit_code = 0;

        if let Err(e) = self.stop_pipeline(stop_timeout).await {
            error!("Error stopping pipeline: {}", e);
            exit_code = 1;
        }

        if let Some(dispatcher) = self.dispatcher.take() {
            self.set_component_state("dispatcher", ComponentState::Stopping)
                .await;
            let grace = Duration::from_secs(self.config.notify.shutdown_grace_seconds);
            dispatcher.shutdown(grace).await;
            self.set_component_state("dispatcher", ComponentState::Stopped)
                .await;
        }

        if let Err(e) = self.stop_sweeper(stop_timeout).await {
            error!("Error stopping sweeper: {}", e);
            exit_code = 1;
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    async fn stop_pipeline(&mut self, stop_timeout: Duration) -> Result<()> {
        let task = self.pipeline_task.take();
        self.stop_task("pipeline", task, stop_timeout).await
    }

    async fn stop_sweeper(&mut self, stop_timeout: Duration) -> Result<()> {
        let task = self.sweeper_task.take();
        self.stop_task("sweeper", task, stop_timeout).await
    }

    /// Wait for a cancelled task to finish, bounded by the stop timeout.
    async fn stop_task(
        &mut self,
        component: &str,
        task: Option<tokio::task::JoinHandle<()>>,
        stop_timeout: Duration,
    ) -> Result<()> {
        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping)
            .await;

        let task = match task {
            Some(task) => task,
            None => {
                self.set_component_state(component, ComponentState::Stopped)
                    .await;
                return Ok(());
            }
        };

        match timeout(stop_timeout, task).await {
            Ok(Ok(())) => {
                self.set_component_state(component, ComponentState::Stopped)
                    .await;
                info!("{} component stopped", component);
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                Err(SentrycamError::component(
                    component.to_string(),
                    format!("task panicked: {}", e),
                ))
            }
            Err(_) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                Err(SentrycamError::component(
                    component.to_string(),
                    "stop timeout".to_string(),
                ))
            }
        }
    }
}
