pub mod descriptors;
pub mod emitter;
pub mod engine;
pub mod orchestrator;
pub mod registry;
pub mod resolver;

pub use crate::domain::model::{
    BindScope, HealthCheck, HostPortInventory, PlannedService, PortBinding, Protocol,
    ResolvedPlan, ServiceDescriptor, ServiceHandle, ServiceState,
};
pub use crate::domain::ports::{ConfigStore, ContainerLifecycle, HostPortProbe};
pub use crate::utils::error::Result;
