pub mod driver;
pub mod orchestrator;
pub mod subscription;
pub mod wake;

pub use driver::{spawn, PipelineHandle};
pub use orchestrator::{Collaborators, PipelineEvent, PipelineStatus, WakeWordOrchestrator};
pub use subscription::{Slot, Subscription};
pub use wake::WakePhrases;
