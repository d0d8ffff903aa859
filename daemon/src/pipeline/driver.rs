use shared::ListeningMode;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::orchestrator::{PipelineStatus, WakeWordOrchestrator};
use super::subscription::{Slot, Subscription};
use crate::error::PipelineError;

enum Control {
    /// Initialize if needed, then start listening.
    Start(oneshot::Sender<Result<(), PipelineError>>),
    Stop(oneshot::Sender<()>),
    Destroy(oneshot::Sender<()>),
    StartCommandListening(oneshot::Sender<bool>),
    StopCommandListening(oneshot::Sender<bool>),
    Status(oneshot::Sender<PipelineStatus>),
}

/// Cloneable front end to the pipeline task.
#[derive(Clone)]
pub struct PipelineHandle {
    control: mpsc::UnboundedSender<Control>,
    mode: watch::Receiver<ListeningMode>,
    activation: Slot<()>,
    command: Slot<String>,
}

impl PipelineHandle {
    async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Control) -> Option<R> {
        let (tx, rx) = oneshot::channel();
        self.control.send(make(tx)).ok()?;
        rx.await.ok()
    }

    pub async fn start(&self) -> Result<(), PipelineError> {
        self.request(Control::Start)
            .await
            .unwrap_or(Err(PipelineError::Shutdown))
    }

    pub async fn stop(&self) {
        self.request(Control::Stop).await;
    }

    pub async fn destroy(&self) {
        self.request(Control::Destroy).await;
    }

    pub async fn start_command_listening(&self) -> bool {
        self.request(Control::StartCommandListening)
            .await
            .unwrap_or(false)
    }

    pub async fn stop_command_listening(&self) -> bool {
        self.request(Control::StopCommandListening)
            .await
            .unwrap_or(false)
    }

    pub async fn status(&self) -> Option<PipelineStatus> {
        self.request(Control::Status).await
    }

    pub fn mode(&self) -> ListeningMode {
        *self.mode.borrow()
    }

    pub fn mode_changes(&self) -> watch::Receiver<ListeningMode> {
        self.mode.clone()
    }

    pub fn is_listening_for_command(&self) -> bool {
        self.mode() == ListeningMode::ActiveCommand
    }

    pub fn subscribe_activation(&self) -> Subscription<()> {
        self.activation.subscribe()
    }

    pub fn subscribe_commands(&self) -> Subscription<String> {
        self.command.subscribe()
    }
}

/// Moves `orchestrator` onto its own task. The task tears the pipeline down
/// and exits once every handle is dropped.
pub fn spawn(orchestrator: WakeWordOrchestrator) -> (PipelineHandle, JoinHandle<()>) {
    let (control, control_rx) = mpsc::unbounded_channel();
    let handle = PipelineHandle {
        control,
        mode: orchestrator.watch_mode(),
        activation: orchestrator.activation_slot(),
        command: orchestrator.command_slot(),
    };

    let task = tokio::spawn(run(orchestrator, control_rx));
    (handle, task)
}

async fn run(mut orchestrator: WakeWordOrchestrator, mut control_rx: mpsc::UnboundedReceiver<Control>) {
    debug!("Pipeline task started");

    loop {
        tokio::select! {
            control = control_rx.recv() => {
                match control {
                    Some(control) => handle_control(&mut orchestrator, control).await,
                    None => break,
                }
            }
            Some(event) = orchestrator.next_event() => {
                orchestrator.handle_event(event).await;
            }
        }
    }

    orchestrator.destroy();
    info!("Pipeline task finished");
}

async fn handle_control(orchestrator: &mut WakeWordOrchestrator, control: Control) {
    match control {
        Control::Start(reply) => {
            let result = match orchestrator.initialize().await {
                Ok(()) => orchestrator.start().await,
                Err(e) => Err(e),
            };
            let _ = reply.send(result);
        }
        Control::Stop(reply) => {
            orchestrator.stop();
            let _ = reply.send(());
        }
        Control::Destroy(reply) => {
            orchestrator.destroy();
            let _ = reply.send(());
        }
        Control::StartCommandListening(reply) => {
            let _ = reply.send(orchestrator.start_command_listening());
        }
        Control::StopCommandListening(reply) => {
            let _ = reply.send(orchestrator.stop_command_listening());
        }
        Control::Status(reply) => {
            let _ = reply.send(orchestrator.status());
        }
    }
}
