pub mod gemini;
pub mod resolver;

use shared::ListeningMode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::pipeline::PipelineHandle;
pub use gemini::{GeminiClient, QuestionAnswerer};
pub use resolver::{find_app, resolve_app, App};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Exchange {
    pub command: Option<String>,
    pub reply: Option<String>,
}

/// Turns finalized commands into replies: app launches first, everything
/// else goes to the question answerer.
pub struct Assistant {
    answerer: Arc<dyn QuestionAnswerer>,
    last: Mutex<Exchange>,
}

impl Assistant {
    pub fn new(answerer: Arc<dyn QuestionAnswerer>) -> Self {
        Self {
            answerer,
            last: Mutex::new(Exchange::default()),
        }
    }

    pub async fn handle(&self, command: &str) -> String {
        let command = command.trim();
        {
            let mut last = self.last.lock().await;
            last.command = Some(command.to_string());
            last.reply = None;
        }

        let reply = match resolve_app(command).and_then(find_app) {
            Some(app) => {
                info!("Launching {} ({})", app.name, app.url);
                format!("Opening {}...", app.name)
            }
            None => self.answerer.ask(command).await,
        };

        info!("Reply: {}", reply);
        self.last.lock().await.reply = Some(reply.clone());
        reply
    }

    pub async fn last_exchange(&self) -> Exchange {
        self.last.lock().await.clone()
    }
}

/// Application loop. Consumes activations and commands from the pipeline
/// and closes command windows that stay open longer than `command_timeout`.
pub async fn run(pipeline: PipelineHandle, assistant: Arc<Assistant>, command_timeout: Duration) {
    let mut activations = pipeline.subscribe_activation();
    let mut commands = pipeline.subscribe_commands();
    let mut modes = pipeline.mode_changes();

    let window = sleep_until(Instant::now() + command_timeout);
    tokio::pin!(window);
    let mut window_open = pipeline.mode() == ListeningMode::ActiveCommand;

    loop {
        tokio::select! {
            activation = activations.recv() => {
                if activation.is_none() {
                    break;
                }
                info!("Wake phrase heard, listening for a command");
                if pipeline.start_command_listening().await {
                    window.as_mut().reset(Instant::now() + command_timeout);
                    window_open = true;
                }
            }
            command = commands.recv() => {
                let Some(command) = command else { break };
                // Answers can take seconds; the window timer keeps running meanwhile.
                let assistant = Arc::clone(&assistant);
                tokio::spawn(async move {
                    assistant.handle(&command).await;
                });
            }
            changed = modes.changed() => {
                if changed.is_err() {
                    break;
                }
                let mode = *modes.borrow_and_update();
                let open = mode == ListeningMode::ActiveCommand;
                if open && !window_open {
                    window.as_mut().reset(Instant::now() + command_timeout);
                }
                window_open = open;
            }
            _ = &mut window, if window_open => {
                window_open = false;
                if pipeline.stop_command_listening().await {
                    info!("No command within {:?}, back to wake listening", command_timeout);
                }
            }
        }
    }

    debug!("Assistant loop finished");
}
