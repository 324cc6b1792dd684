mod orchestrator;
mod runtime;
mod shutdown;
mod types;

#[cfg(test)]
mod tests;

pub use orchestrator::SentrycamOrchestrator;
pub use types::{ComponentState, ShutdownReason};
