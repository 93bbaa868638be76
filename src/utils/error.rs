use crate::domain::model::Protocol;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("Duplicate service name: '{name}'")]
    DuplicateServiceName { name: String },

    #[error("Port {port}/{protocol} already reserved by '{owner}' (requested by '{requested_by}')")]
    PortAlreadyReserved {
        port: u16,
        protocol: Protocol,
        owner: String,
        requested_by: String,
    },

    #[error("No free {protocol} port for '{service}' in range {start}-{end}")]
    NoFreePortFound {
        service: String,
        protocol: Protocol,
        start: u16,
        end: u16,
    },

    #[error("Dependency cycle detected: {}", .cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("Service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("Unknown {kind} '{name}'")]
    UnknownSelection { kind: String, name: String },

    #[error("Service '{service}' not healthy after {waited:?}; blocked: [{}]", .blocked.join(", "))]
    HealthTimeout {
        service: String,
        waited: Duration,
        blocked: Vec<String>,
    },

    #[error("{operation} failed for '{service}': {message}")]
    ExternalCollaboratorFailure {
        operation: String,
        service: String,
        message: String,
    },

    #[error("Orchestration cancelled; stopped: [{}]", .stopped.join(", "))]
    Cancelled { stopped: Vec<String> },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("YAML rendering error: {0}")]
    YamlError(#[from] serde_yaml_ng::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error in '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    PortAllocation,
    Dependency,
    Health,
    External,
    Cancellation,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl StackError {
    pub fn collaborator(
        operation: impl Into<String>,
        service: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        StackError::ExternalCollaboratorFailure {
            operation: operation.into(),
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            StackError::DuplicateServiceName { .. }
            | StackError::UnknownSelection { .. }
            | StackError::TomlError(_)
            | StackError::ConfigValidationError { .. }
            | StackError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            StackError::PortAlreadyReserved { .. } | StackError::NoFreePortFound { .. } => {
                ErrorCategory::PortAllocation
            }
            StackError::DependencyCycle { .. } | StackError::UnknownDependency { .. } => {
                ErrorCategory::Dependency
            }
            StackError::HealthTimeout { .. } => ErrorCategory::Health,
            StackError::ExternalCollaboratorFailure { .. } => ErrorCategory::External,
            StackError::Cancelled { .. } => ErrorCategory::Cancellation,
            StackError::IoError(_)
            | StackError::YamlError(_)
            | StackError::SerializationError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Cancellation => ErrorSeverity::Low,
            ErrorCategory::Health | ErrorCategory::External => ErrorSeverity::Medium,
            ErrorCategory::Configuration
            | ErrorCategory::PortAllocation
            | ErrorCategory::Dependency => ErrorSeverity::High,
            ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            StackError::NoFreePortFound {
                service,
                start,
                end,
                ..
            } => format!(
                "Could not find a free host port for '{}' (tried {}-{})",
                service, start, end
            ),
            StackError::HealthTimeout {
                service, blocked, ..
            } if !blocked.is_empty() => format!(
                "'{}' never became healthy, so {} could not start",
                service,
                blocked.join(", ")
            ),
            StackError::HealthTimeout { service, .. } => {
                format!("'{}' never became healthy", service)
            }
            StackError::DependencyCycle { cycle } => {
                format!("Services depend on each other in a loop: {}", cycle.join(" -> "))
            }
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            StackError::DuplicateServiceName { .. } => {
                "Rename one of the services so every name is unique"
            }
            StackError::PortAlreadyReserved { .. } => {
                "Two pinned services share an external port; unpin one or change its port"
            }
            StackError::NoFreePortFound { .. } => {
                "Free some host ports or raise probe_window in the stack file"
            }
            StackError::DependencyCycle { .. } | StackError::UnknownDependency { .. } => {
                "Fix the depends_on lists in the stack file"
            }
            StackError::UnknownSelection { .. } => {
                "Check the --profile / --environment value against the stack file"
            }
            StackError::HealthTimeout { .. } => {
                "Inspect the service logs (docker compose logs <service>) or raise the health timeout"
            }
            StackError::ExternalCollaboratorFailure { .. } => {
                "Make sure the container engine is running and reachable"
            }
            StackError::Cancelled { .. } => "Run again when ready",
            StackError::TomlError(_)
            | StackError::ConfigValidationError { .. }
            | StackError::InvalidConfigValueError { .. } => "Check the stack file syntax and values",
            StackError::IoError(_) | StackError::YamlError(_) | StackError::SerializationError(_) => {
                "Check file permissions and available disk space"
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, StackError>;
