pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::cli::CliConfig;
pub use config::{ConfigOverrides, EffectiveConfig};

pub use adapters::{ComposeLifecycle, LocalStorage, SocketProbe};
pub use core::{
    descriptors::DescriptorStore, emitter::PlanEmitter, engine::StackEngine,
    orchestrator::StartupOrchestrator, registry::PortRegistry, resolver::ConflictResolver,
};
pub use utils::error::{Result, StackError};
