//! Property tests for port conflict resolution.

use proptest::prelude::*;
use stackplan::domain::model::{BindScope, HostPortInventory, Protocol, ServiceDescriptor};
use stackplan::ConflictResolver;
use std::collections::HashSet;

fn services_from(defaults: &[(u16, bool)]) -> Vec<ServiceDescriptor> {
    defaults
        .iter()
        .enumerate()
        .map(|(idx, (port, udp))| {
            let protocol = if *udp { Protocol::Udp } else { Protocol::Tcp };
            // 內部埠刻意與外部不同，確認不會被改寫
            ServiceDescriptor::new(format!("svc-{}", idx), 10_000 + idx as u16, *port)
                .with_protocol(protocol)
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    /// PROPERTY: without any collision every service keeps its default external port.
    #[test]
    fn property_no_conflict_keeps_defaults(
        ports in proptest::collection::hash_set(1024u16..60000, 1..12),
    ) {
        let defaults: Vec<(u16, bool)> = ports.into_iter().map(|p| (p, false)).collect();
        let services = services_from(&defaults);

        let plan = ConflictResolver::new(BindScope::Loopback)
            .resolve(&services, &HostPortInventory::new())
            .unwrap();

        for planned in plan.services() {
            prop_assert_eq!(planned.binding.external_port, planned.descriptor.default_external_port);
            prop_assert!(!planned.moved());
        }
    }

    /// PROPERTY: resolved ports never collide with each other or with the host,
    /// stay inside the search window and leave internal ports untouched.
    #[test]
    fn property_resolution_is_conflict_free(
        defaults in proptest::collection::vec((1000u16..1100, any::<bool>()), 1..10),
        occupied in proptest::collection::vec((1000u16..1200, any::<bool>()), 0..30),
    ) {
        let services = services_from(&defaults);
        let inventory = HostPortInventory::from_ports(occupied.iter().map(|(port, udp)| {
            (*port, if *udp { Protocol::Udp } else { Protocol::Tcp })
        }));
        let window = 200;

        let plan = ConflictResolver::new(BindScope::Loopback)
            .with_window(window)
            .resolve(&services, &inventory)
            .unwrap();

        let mut claimed = HashSet::new();
        for planned in plan.services() {
            let binding = planned.binding;
            prop_assert!(claimed.insert((binding.external_port, binding.protocol)));
            prop_assert!(!inventory.contains(binding.external_port, binding.protocol));
            prop_assert_eq!(binding.internal_port, planned.descriptor.internal_port());
            prop_assert!(binding.external_port >= planned.descriptor.default_external_port);
            prop_assert!(binding.external_port <= planned.descriptor.default_external_port + window);
        }
        prop_assert_eq!(plan.len(), services.len());
    }

    /// PROPERTY: the same inputs always produce the same plan.
    #[test]
    fn property_resolution_is_deterministic(
        defaults in proptest::collection::vec((1000u16..1050, any::<bool>()), 1..10),
        occupied in proptest::collection::vec(1000u16..1100, 0..20),
    ) {
        let services = services_from(&defaults);
        let inventory = HostPortInventory::from_ports(occupied.iter().map(|p| (*p, Protocol::Tcp)));
        let resolver = ConflictResolver::new(BindScope::AllInterfaces);

        let first = resolver.resolve(&services, &inventory).unwrap();
        let second = resolver.resolve(&services, &inventory).unwrap();
        prop_assert_eq!(first, second);
    }
}
