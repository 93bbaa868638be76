use crate::core::registry::PortRegistry;
use crate::domain::model::{
    BindScope, HostPortInventory, PlannedService, PortBinding, Protocol, ResolvedPlan,
    ServiceDescriptor,
};
use crate::domain::ports::HostPortProbe;
use crate::utils::error::{Result, StackError};
use std::collections::{BTreeSet, HashMap};

pub const DEFAULT_PROBE_WINDOW: u16 = 1000;

/// Assigns conflict-free external ports. Internal ports are copied through untouched.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    window: u16,
    scope: BindScope,
}

impl ConflictResolver {
    pub fn new(scope: BindScope) -> Self {
        Self {
            window: DEFAULT_PROBE_WINDOW,
            scope,
        }
    }

    pub fn with_window(mut self, window: u16) -> Self {
        self.window = window;
        self
    }

    /// Inclusive range searched for a service whose default port is taken.
    pub fn search_range(&self, descriptor: &ServiceDescriptor) -> (u16, u16) {
        let start = descriptor.default_external_port;
        if descriptor.pinned {
            (start, start)
        } else {
            (start, start.saturating_add(self.window))
        }
    }

    /// 探測每個服務可能用到的埠號範圍，建立主機已佔用清單
    pub fn scan_inventory<P: HostPortProbe + ?Sized>(
        &self,
        probe: &P,
        services: &[ServiceDescriptor],
        known_occupied: &[(u16, Protocol)],
    ) -> Result<HostPortInventory> {
        let mut candidates = BTreeSet::new();
        for service in services {
            let (start, end) = self.search_range(service);
            candidates.extend((start..=end).map(|port| (port, service.protocol)));
        }

        let mut occupied: BTreeSet<(u16, Protocol)> = known_occupied.iter().copied().collect();
        for (port, protocol) in candidates {
            if occupied.contains(&(port, protocol)) {
                continue;
            }
            if probe.is_bound(port, protocol)? {
                tracing::debug!("Host port {}/{} is in use", port, protocol);
                occupied.insert((port, protocol));
            }
        }

        tracing::info!("🔎 Host inventory: {} occupied port(s) in the candidate ranges", occupied.len());
        Ok(HostPortInventory::from_ports(occupied))
    }

    pub fn resolve(
        &self,
        services: &[ServiceDescriptor],
        inventory: &HostPortInventory,
    ) -> Result<ResolvedPlan> {
        let mut registry = PortRegistry::new();
        for service in services {
            registry.register(service)?;
        }

        let mut assigned: HashMap<&str, u16> = HashMap::new();

        // 固定埠先保留，避免被先宣告的一般服務搶走
        for service in services.iter().filter(|s| s.pinned) {
            let port = service.default_external_port;
            if inventory.contains(port, service.protocol) {
                return Err(StackError::NoFreePortFound {
                    service: service.name().to_string(),
                    protocol: service.protocol,
                    start: port,
                    end: port,
                });
            }
            registry.reserve(port, service.protocol, service.name())?;
            assigned.insert(service.name(), port);
        }

        for service in services.iter().filter(|s| !s.pinned) {
            let port = self.claim_port(service, inventory, &mut registry)?;
            assigned.insert(service.name(), port);
        }

        let planned = services
            .iter()
            .map(|service| {
                let external_port = assigned[service.name()];
                PlannedService {
                    descriptor: service.clone(),
                    binding: PortBinding {
                        external_port,
                        internal_port: service.internal_port(),
                        protocol: service.protocol,
                        scope: self.scope,
                    },
                }
            })
            .collect();

        Ok(ResolvedPlan::new(planned))
    }

    fn claim_port(
        &self,
        service: &ServiceDescriptor,
        inventory: &HostPortInventory,
        registry: &mut PortRegistry,
    ) -> Result<u16> {
        let (start, end) = self.search_range(service);
        let protocol = service.protocol;
        let is_free =
            |port: u16, registry: &PortRegistry| !inventory.contains(port, protocol) && !registry.is_reserved(port, protocol);

        for port in start..=end {
            if !is_free(port, registry) {
                continue;
            }
            registry.reserve(port, protocol, service.name())?;
            if port != start {
                let reason = match registry.owner_of(start, protocol) {
                    Some(owner) => format!("claimed by '{}'", owner),
                    None => "in use on the host".to_string(),
                };
                tracing::warn!(
                    "⚠️ {}: port {} is {}, moved to {}",
                    service.name(),
                    start,
                    reason,
                    port
                );
            }
            return Ok(port);
        }

        Err(StackError::NoFreePortFound {
            service: service.name().to_string(),
            protocol,
            start,
            end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingProbe {
        bound: Vec<u16>,
        calls: Mutex<usize>,
    }

    impl HostPortProbe for RecordingProbe {
        fn is_bound(&self, port: u16, _protocol: Protocol) -> Result<bool> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.bound.contains(&port))
        }
    }

    #[test]
    fn test_default_port_taken_on_host_moves_up() {
        let services = vec![ServiceDescriptor::new("postgres", 5432, 5432)];
        let inventory = HostPortInventory::from_ports([(5432, Protocol::Tcp)]);

        let plan = ConflictResolver::new(BindScope::Loopback)
            .resolve(&services, &inventory)
            .unwrap();

        let binding = plan.binding("postgres").unwrap();
        assert_eq!(binding.external_port, 5433);
        assert_eq!(binding.internal_port, 5432);
    }

    #[test]
    fn test_first_declared_service_wins_default() {
        let services = vec![
            ServiceDescriptor::new("supabase-db", 5432, 5432),
            ServiceDescriptor::new("postgres", 5432, 5432),
        ];
        let plan = ConflictResolver::new(BindScope::Loopback)
            .resolve(&services, &HostPortInventory::new())
            .unwrap();

        assert_eq!(plan.binding("supabase-db").unwrap().external_port, 5432);
        assert_eq!(plan.binding("postgres").unwrap().external_port, 5433);
        assert!(plan.get("postgres").unwrap().moved());
    }

    #[test]
    fn test_pinned_port_beats_earlier_service() {
        let services = vec![
            ServiceDescriptor::new("dev-proxy", 8080, 80),
            ServiceDescriptor::new("caddy", 80, 80).pinned(),
        ];
        let plan = ConflictResolver::new(BindScope::AllInterfaces)
            .resolve(&services, &HostPortInventory::new())
            .unwrap();

        assert_eq!(plan.binding("caddy").unwrap().external_port, 80);
        assert_eq!(plan.binding("dev-proxy").unwrap().external_port, 81);
        // 計畫順序維持宣告順序
        assert_eq!(plan.services()[0].name(), "dev-proxy");
    }

    #[test]
    fn test_two_pinned_services_on_one_port_fail() {
        let services = vec![
            ServiceDescriptor::new("caddy", 443, 443).pinned(),
            ServiceDescriptor::new("traefik", 443, 443).pinned(),
        ];
        let err = ConflictResolver::new(BindScope::AllInterfaces)
            .resolve(&services, &HostPortInventory::new())
            .unwrap_err();
        assert!(matches!(err, StackError::PortAlreadyReserved { port: 443, .. }));
    }

    #[test]
    fn test_pinned_port_occupied_on_host_fails() {
        let services = vec![ServiceDescriptor::new("caddy", 80, 80).pinned()];
        let inventory = HostPortInventory::from_ports([(80, Protocol::Tcp)]);
        let err = ConflictResolver::new(BindScope::AllInterfaces)
            .resolve(&services, &inventory)
            .unwrap_err();
        assert!(matches!(err, StackError::NoFreePortFound { start: 80, end: 80, .. }));
    }

    #[test]
    fn test_exhausted_window_reports_range() {
        let services = vec![ServiceDescriptor::new("neo4j", 7474, 7474)];
        let inventory = HostPortInventory::from_ports((7474..=7477).map(|p| (p, Protocol::Tcp)));

        let err = ConflictResolver::new(BindScope::Loopback)
            .with_window(3)
            .resolve(&services, &inventory)
            .unwrap_err();
        match err {
            StackError::NoFreePortFound {
                service, start, end, ..
            } => {
                assert_eq!(service, "neo4j");
                assert_eq!((start, end), (7474, 7477));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_window_stops_at_highest_port() {
        let services = vec![ServiceDescriptor::new("edge", 65535, 65534)];
        let inventory = HostPortInventory::from_ports([(65534, Protocol::Tcp)]);
        let plan = ConflictResolver::new(BindScope::Loopback)
            .resolve(&services, &inventory)
            .unwrap();
        assert_eq!(plan.binding("edge").unwrap().external_port, 65535);
    }

    #[test]
    fn test_udp_and_tcp_do_not_collide() {
        let services = vec![
            ServiceDescriptor::new("dns-udp", 53, 5353).with_protocol(Protocol::Udp),
            ServiceDescriptor::new("dns-tcp", 53, 5353),
        ];
        let plan = ConflictResolver::new(BindScope::Loopback)
            .resolve(&services, &HostPortInventory::new())
            .unwrap();
        assert_eq!(plan.binding("dns-udp").unwrap().external_port, 5353);
        assert_eq!(plan.binding("dns-tcp").unwrap().external_port, 5353);
    }

    #[test]
    fn test_scan_inventory_probes_each_candidate_once() {
        let probe = RecordingProbe {
            bound: vec![5678],
            calls: Mutex::new(0),
        };
        let services = vec![
            ServiceDescriptor::new("n8n", 5678, 5678),
            ServiceDescriptor::new("n8n-worker", 5679, 5679),
        ];
        let resolver = ConflictResolver::new(BindScope::Loopback).with_window(2);

        let inventory = resolver
            .scan_inventory(&probe, &services, &[(5680, Protocol::Tcp)])
            .unwrap();

        // 5678..=5681 共四個候選，5680 已知佔用不需探測
        assert_eq!(*probe.calls.lock().unwrap(), 3);
        assert!(inventory.contains(5678, Protocol::Tcp));
        assert!(inventory.contains(5680, Protocol::Tcp));
        assert!(!inventory.contains(5679, Protocol::Tcp));
    }
}
