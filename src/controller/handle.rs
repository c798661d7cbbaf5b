//! Cloneable front door to the controller task

use tokio::sync::{mpsc, oneshot};

use super::machine::{Command, ControlError, Input, TorchStatus};
use super::pattern::PatternKind;

/// Sends commands into the controller inbox and waits for the outcome
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Input>,
}

impl ControllerHandle {
    pub fn new(tx: mpsc::Sender<Input>) -> Self {
        Self { tx }
    }

    pub async fn execute(&self, command: Command) -> Result<(), ControlError> {
        let (reply, rx) = oneshot::channel();
        self.send(Input::Command {
            command,
            reply: Some(reply),
        })
        .await?;
        rx.await.map_err(|_| ControlError::ControllerGone)?
    }

    pub async fn toggle(&self) -> Result<(), ControlError> {
        self.execute(Command::Toggle).await
    }

    pub async fn select_pattern(&self, kind: PatternKind) -> Result<(), ControlError> {
        self.execute(Command::SelectPattern(kind)).await
    }

    pub async fn set_speed(&self, period_ms: u64) -> Result<(), ControlError> {
        self.execute(Command::SetSpeed(period_ms)).await
    }

    pub async fn status(&self) -> Result<TorchStatus, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.send(Input::Status(reply)).await?;
        rx.await.map_err(|_| ControlError::ControllerGone)
    }

    /// Stop the session and end the controller task
    pub async fn dispose(&self) -> Result<(), ControlError> {
        let (done, rx) = oneshot::channel();
        self.send(Input::Dispose(done)).await?;
        rx.await.map_err(|_| ControlError::ControllerGone)
    }

    async fn send(&self, input: Input) -> Result<(), ControlError> {
        self.tx.send(input).await.map_err(|_| ControlError::ControllerGone)
    }
}
