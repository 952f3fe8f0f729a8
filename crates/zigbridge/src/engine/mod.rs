#[allow(clippy::module_inception)]
mod engine;
mod message;
mod scheduler;

pub use engine::Engine;
pub use engine::EngineHandle;
pub use message::Command;
pub use message::Input;
pub use message::InputSender;
pub use scheduler::TokioScheduler;
