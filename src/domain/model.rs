use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BindScope {
    #[default]
    Loopback,
    AllInterfaces,
}

impl BindScope {
    pub fn host_ip(&self) -> Option<&'static str> {
        match self {
            BindScope::Loopback => Some("127.0.0.1"),
            BindScope::AllInterfaces => None,
        }
    }
}

/// 健康檢查輪詢策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheck {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(120),
        }
    }
}

/// A service in the stack. The internal port is fixed at construction;
/// only the external port is ever subject to conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    name: String,
    internal_port: u16,
    pub default_external_port: u16,
    pub protocol: Protocol,
    pub depends_on: BTreeSet<String>,
    pub health_check: HealthCheck,
    pub profiles: Vec<String>,
    pub environments: Vec<String>,
    pub pinned: bool,
    pub internal_var: Option<String>,
    pub external_var: Option<String>,
    pub url_scheme: Option<String>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, internal_port: u16, default_external_port: u16) -> Self {
        Self {
            name: name.into(),
            internal_port,
            default_external_port,
            protocol: Protocol::Tcp,
            depends_on: BTreeSet::new(),
            health_check: HealthCheck::default(),
            profiles: Vec::new(),
            environments: Vec::new(),
            pinned: false,
            internal_var: None,
            external_var: None,
            url_scheme: None,
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_health_check(mut self, health_check: HealthCheck) -> Self {
        self.health_check = health_check;
        self
    }

    pub fn with_profiles<I, S>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profiles = profiles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_environments<I, S>(mut self, environments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.environments = environments.into_iter().map(Into::into).collect();
        self
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    pub fn with_vars(mut self, internal_var: Option<String>, external_var: Option<String>) -> Self {
        self.internal_var = internal_var;
        self.external_var = external_var;
        self
    }

    pub fn with_url_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.url_scheme = Some(scheme.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn internal_port(&self) -> u16 {
        self.internal_port
    }

    /// `open-webui` -> `OPEN_WEBUI`
    pub fn var_prefix(&self) -> String {
        self.name
            .chars()
            .map(|c| match c {
                '-' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect()
    }

    pub fn internal_var_name(&self) -> String {
        self.internal_var
            .clone()
            .unwrap_or_else(|| format!("{}_PORT", self.var_prefix()))
    }

    pub fn external_var_name(&self) -> String {
        self.external_var
            .clone()
            .unwrap_or_else(|| format!("{}_EXTERNAL_PORT", self.var_prefix()))
    }

    pub fn in_profile(&self, profile: Option<&str>) -> bool {
        match profile {
            _ if self.profiles.is_empty() => true,
            Some(p) => self.profiles.iter().any(|own| own == p),
            None => false,
        }
    }

    pub fn in_environment(&self, environment: &str) -> bool {
        self.environments.is_empty() || self.environments.iter().any(|e| e == environment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortBinding {
    pub external_port: u16,
    pub internal_port: u16,
    pub protocol: Protocol,
    pub scope: BindScope,
}

impl PortBinding {
    /// compose `ports:` entry, e.g. `127.0.0.1:5433:5432` or `8081:8080/udp`
    pub fn compose_entry(&self) -> String {
        let mut entry = match self.scope.host_ip() {
            Some(ip) => format!("{}:{}:{}", ip, self.external_port, self.internal_port),
            None => format!("{}:{}", self.external_port, self.internal_port),
        };
        if self.protocol == Protocol::Udp {
            entry.push_str("/udp");
        }
        entry
    }
}

/// Ports already bound on the host. Built once per run, never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostPortInventory {
    occupied: HashSet<(u16, Protocol)>,
}

impl HostPortInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ports<I>(ports: I) -> Self
    where
        I: IntoIterator<Item = (u16, Protocol)>,
    {
        Self {
            occupied: ports.into_iter().collect(),
        }
    }

    pub fn contains(&self, port: u16, protocol: Protocol) -> bool {
        self.occupied.contains(&(port, protocol))
    }

    /// The same inventory minus the given ports.
    pub fn excluding(&self, ports: &HashSet<(u16, Protocol)>) -> Self {
        Self {
            occupied: self.occupied.difference(ports).copied().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.occupied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occupied.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedService {
    pub descriptor: ServiceDescriptor,
    pub binding: PortBinding,
}

impl PlannedService {
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn moved(&self) -> bool {
        self.binding.external_port != self.descriptor.default_external_port
    }
}

/// 解析完成的計畫，按宣告順序排列
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlan {
    services: Vec<PlannedService>,
}

impl ResolvedPlan {
    pub fn new(services: Vec<PlannedService>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &[PlannedService] {
        &self.services
    }

    pub fn get(&self, name: &str) -> Option<&PlannedService> {
        self.services.iter().find(|s| s.name() == name)
    }

    pub fn binding(&self, name: &str) -> Option<&PortBinding> {
        self.get(name).map(|s| &s.binding)
    }

    pub fn descriptors(&self) -> Vec<ServiceDescriptor> {
        self.services.iter().map(|s| s.descriptor.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ServiceState {
    Pending,
    Starting,
    HealthChecking,
    Healthy,
    Failed,
}

impl ServiceState {
    pub fn can_transition_to(&self, next: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, next),
            (Pending, Starting)
                | (Starting, HealthChecking)
                | (Starting, Failed)
                | (HealthChecking, Healthy)
                | (HealthChecking, Failed)
                // 綁定變更時必須重建，不能原地重啟
                | (Healthy, Pending)
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ServiceState::Pending => "pending",
            ServiceState::Starting => "starting",
            ServiceState::HealthChecking => "health-checking",
            ServiceState::Healthy => "healthy",
            ServiceState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Opaque reference to a running instance, produced by the lifecycle collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceHandle {
    pub service: String,
    pub instance_id: String,
}

impl ServiceHandle {
    pub fn new(service: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            instance_id: instance_id.into(),
        }
    }
}
