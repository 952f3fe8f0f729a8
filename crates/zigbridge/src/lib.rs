pub mod api;
pub mod bridge;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod mqtt;
pub mod registry;
pub mod service;
pub mod telemetry;

pub use bridge::Bridge;
pub use bridge::BridgeSettings;
pub use bridge::Collaborators;
pub use config::Config;
pub use config::LogLevel;
pub use engine::Engine;
pub use engine::EngineHandle;
pub use error::BridgeError;
pub use event::BridgeEvent;
pub use event::EventBus;
