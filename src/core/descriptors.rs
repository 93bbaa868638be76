use crate::domain::model::ServiceDescriptor;
use crate::utils::error::{Result, StackError};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Declarative catalog of every service the stack knows about, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct DescriptorStore {
    descriptors: Vec<ServiceDescriptor>,
}

impl DescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptors<I>(descriptors: I) -> Result<Self>
    where
        I: IntoIterator<Item = ServiceDescriptor>,
    {
        let mut store = Self::new();
        for descriptor in descriptors {
            store.insert(descriptor)?;
        }
        store.validate()?;
        Ok(store)
    }

    pub fn insert(&mut self, descriptor: ServiceDescriptor) -> Result<()> {
        if self.get(descriptor.name()).is_some() {
            return Err(StackError::DuplicateServiceName {
                name: descriptor.name().to_string(),
            });
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.descriptors.iter().find(|d| d.name() == name)
    }

    pub fn all(&self) -> &[ServiceDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// 檢查未知依賴與循環依賴
    pub fn validate(&self) -> Result<()> {
        ensure_known_dependencies(&self.descriptors)?;
        ensure_acyclic(&self.descriptors)
    }

    /// Services admitted by the profile and environment, plus whatever they
    /// transitively depend on.
    pub fn select(&self, profile: Option<&str>, environment: &str) -> Result<Vec<ServiceDescriptor>> {
        let mut selected: HashSet<&str> = self
            .descriptors
            .iter()
            .filter(|d| d.in_profile(profile) && d.in_environment(environment))
            .map(|d| d.name())
            .collect();

        let mut frontier: Vec<&str> = selected.iter().copied().collect();
        while let Some(name) = frontier.pop() {
            let Some(descriptor) = self.get(name) else {
                continue;
            };
            for dep in &descriptor.depends_on {
                let dep_descriptor = self.get(dep).ok_or_else(|| StackError::UnknownDependency {
                    service: name.to_string(),
                    dependency: dep.clone(),
                })?;
                if selected.insert(dep_descriptor.name()) {
                    tracing::info!(
                        "➕ Including '{}' because '{}' depends on it",
                        dep_descriptor.name(),
                        name
                    );
                    frontier.push(dep_descriptor.name());
                }
            }
        }

        Ok(self
            .descriptors
            .iter()
            .filter(|d| selected.contains(d.name()))
            .cloned()
            .collect())
    }

    pub fn profiles(&self) -> BTreeSet<&str> {
        self.descriptors
            .iter()
            .flat_map(|d| d.profiles.iter().map(String::as_str))
            .collect()
    }
}

pub fn ensure_known_dependencies(services: &[ServiceDescriptor]) -> Result<()> {
    let names: HashSet<&str> = services.iter().map(|d| d.name()).collect();
    for service in services {
        if let Some(missing) = service.depends_on.iter().find(|d| !names.contains(d.as_str())) {
            return Err(StackError::UnknownDependency {
                service: service.name().to_string(),
                dependency: missing.clone(),
            });
        }
    }
    Ok(())
}

/// Rejects any dependency cycle, naming the services on it (`a -> b -> a`).
pub fn ensure_acyclic(services: &[ServiceDescriptor]) -> Result<()> {
    let by_name: HashMap<&str, &ServiceDescriptor> =
        services.iter().map(|d| (d.name(), d)).collect();
    let mut visited = HashSet::new();
    let mut stack: Vec<&str> = Vec::new();

    for service in services {
        if !visited.contains(service.name()) {
            if let Some(cycle) = find_cycle(service.name(), &by_name, &mut visited, &mut stack) {
                return Err(StackError::DependencyCycle { cycle });
            }
        }
    }
    Ok(())
}

fn find_cycle<'a>(
    name: &'a str,
    by_name: &HashMap<&'a str, &'a ServiceDescriptor>,
    visited: &mut HashSet<&'a str>,
    stack: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(name);
    stack.push(name);

    if let Some(descriptor) = by_name.get(name).copied() {
        for dep in &descriptor.depends_on {
            let dep = dep.as_str();
            if let Some(pos) = stack.iter().position(|s| *s == dep) {
                let mut cycle: Vec<String> = stack[pos..].iter().map(|s| s.to_string()).collect();
                cycle.push(dep.to_string());
                return Some(cycle);
            }
            // 依賴不在這批服務中時略過，由 ensure_known_dependencies 報錯
            if !by_name.contains_key(dep) {
                continue;
            }
            if !visited.contains(dep) {
                if let Some(cycle) = find_cycle(dep, by_name, visited, stack) {
                    return Some(cycle);
                }
            }
        }
    }

    stack.pop();
    None
}

/// Kahn's algorithm; among services that are ready at the same time the
/// earlier-declared one comes first.
pub fn topological_order(services: &[ServiceDescriptor]) -> Result<Vec<String>> {
    ensure_known_dependencies(services)?;
    ensure_acyclic(services)?;

    let mut remaining: HashMap<&str, usize> = services
        .iter()
        .map(|d| (d.name(), d.depends_on.len()))
        .collect();
    let mut order = Vec::with_capacity(services.len());

    while order.len() < services.len() {
        let next = services
            .iter()
            .find(|d| remaining.get(d.name()) == Some(&0))
            .map(|d| d.name());
        let Some(next) = next else {
            // 已排除循環，理論上不會到這裡
            break;
        };
        remaining.remove(next);
        for dependent in services.iter().filter(|d| d.depends_on.contains(next)) {
            if let Some(count) = remaining.get_mut(dependent.name()) {
                *count -= 1;
            }
        }
        order.push(next.to_string());
    }

    Ok(order)
}

/// Every service that (transitively) depends on `name`, in declaration order.
pub fn transitive_dependents(services: &[ServiceDescriptor], name: &str) -> Vec<String> {
    let mut affected: HashSet<&str> = HashSet::from([name]);
    let mut changed = true;
    while changed {
        changed = false;
        for service in services {
            if !affected.contains(service.name())
                && service.depends_on.iter().any(|d| affected.contains(d.as_str()))
            {
                affected.insert(service.name());
                changed = true;
            }
        }
    }

    services
        .iter()
        .map(|d| d.name())
        .filter(|n| *n != name && affected.contains(n))
        .map(str::to_string)
        .collect()
}
