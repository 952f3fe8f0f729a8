//! Lifecycle of the external bridge daemon.

use std::process::ExitStatus;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{action} {unit} failed: {status}")]
    Failed {
        action: &'static str,
        unit: String,
        status: ExitStatus,
    },
}

/// Starts and stops the bridge daemon.
#[async_trait]
pub trait ServiceControl: Send + Sync {
    async fn start(&self) -> Result<(), ServiceError>;

    async fn stop(&self) -> Result<(), ServiceError>;
}

/// Controls a systemd unit through `systemctl`.
#[derive(Debug, Clone)]
pub struct Systemctl {
    program: String,
    unit: String,
}

impl Systemctl {
    pub fn new(unit: impl Into<String>) -> Self {
        Self::with_program("systemctl", unit)
    }

    /// Use another executable in place of `systemctl`. It is called with
    /// the action and the unit as arguments.
    pub fn with_program(program: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            unit: unit.into(),
        }
    }

    async fn run(&self, action: &'static str) -> Result<(), ServiceError> {
        info!("Running {} {} {}", self.program, action, self.unit);
        let status = Command::new(&self.program)
            .arg(action)
            .arg(&self.unit)
            .status()
            .await
            .map_err(|source| ServiceError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(ServiceError::Failed {
                action,
                unit: self.unit.clone(),
                status,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceControl for Systemctl {
    async fn start(&self) -> Result<(), ServiceError> {
        self.run("start").await
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.run("stop").await
    }
}
