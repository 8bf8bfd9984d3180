pub mod adapters;
pub mod config;
pub mod detector;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod location;
pub mod models;
pub mod orchestrator;
pub mod render;
pub mod traits;

pub use config::EngineConfig;
pub use error::EngineError;
pub use orchestrator::DiscoveryOrchestrator;
