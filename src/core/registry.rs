use crate::domain::model::{Protocol, ServiceDescriptor};
use crate::utils::error::{Result, StackError};
use std::collections::{HashMap, HashSet};

/// Per-run catalog of registered services and the external ports they claim.
///
/// The registry only knows about claims made in this run; host occupancy is
/// the resolver's concern.
#[derive(Debug, Default)]
pub struct PortRegistry {
    services: HashSet<String>,
    reservations: HashMap<(u16, Protocol), String>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: &ServiceDescriptor) -> Result<()> {
        if !self.services.insert(descriptor.name().to_string()) {
            return Err(StackError::DuplicateServiceName {
                name: descriptor.name().to_string(),
            });
        }
        Ok(())
    }

    pub fn reserve(&mut self, port: u16, protocol: Protocol, service: &str) -> Result<()> {
        if let Some(owner) = self.reservations.get(&(port, protocol)) {
            return Err(StackError::PortAlreadyReserved {
                port,
                protocol,
                owner: owner.clone(),
                requested_by: service.to_string(),
            });
        }
        self.reservations.insert((port, protocol), service.to_string());
        tracing::debug!("Reserved {}/{} for {}", port, protocol, service);
        Ok(())
    }

    pub fn is_reserved(&self, port: u16, protocol: Protocol) -> bool {
        self.reservations.contains_key(&(port, protocol))
    }

    pub fn owner_of(&self, port: u16, protocol: Protocol) -> Option<&str> {
        self.reservations.get(&(port, protocol)).map(String::as_str)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.services.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_rejects_duplicate_names() {
        let mut registry = PortRegistry::new();
        let postgres = ServiceDescriptor::new("postgres", 5432, 5432);

        registry.register(&postgres).unwrap();
        assert!(registry.is_registered("postgres"));

        let err = registry.register(&postgres).unwrap_err();
        assert!(matches!(err, StackError::DuplicateServiceName { name } if name == "postgres"));
    }

    #[test]
    fn test_reserve_tracks_owner_per_protocol() {
        let mut registry = PortRegistry::new();
        registry.reserve(53, Protocol::Udp, "dns").unwrap();

        // 同一個埠號不同協定互不衝突
        registry.reserve(53, Protocol::Tcp, "dns-tcp").unwrap();
        assert_eq!(registry.owner_of(53, Protocol::Udp), Some("dns"));

        let err = registry.reserve(53, Protocol::Udp, "other").unwrap_err();
        match err {
            StackError::PortAlreadyReserved {
                port,
                owner,
                requested_by,
                ..
            } => {
                assert_eq!(port, 53);
                assert_eq!(owner, "dns");
                assert_eq!(requested_by, "other");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!registry.is_reserved(54, Protocol::Udp));
    }
}
