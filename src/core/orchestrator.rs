use crate::core::descriptors::{topological_order, transitive_dependents};
use crate::domain::model::{
    HealthCheck, PortBinding, ResolvedPlan, ServiceDescriptor, ServiceHandle, ServiceState,
};
use crate::domain::ports::ContainerLifecycle;
use crate::utils::error::{Result, StackError};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::{AbortHandle, Id, JoinSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub service: String,
    pub from: ServiceState,
    pub to: ServiceState,
}

#[derive(Debug)]
pub struct ServiceFailure {
    pub service: String,
    pub error: StackError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningService {
    pub handle: ServiceHandle,
    pub binding: PortBinding,
}

/// 一次啟動執行的結果
#[derive(Debug)]
pub struct OrchestrationReport {
    pub run_id: String,
    pub states: BTreeMap<String, ServiceState>,
    pub transitions: Vec<Transition>,
    pub failures: Vec<ServiceFailure>,
    /// failed service -> services left `Pending` because of it
    pub blocked: BTreeMap<String, Vec<String>>,
    pub running: BTreeMap<String, RunningService>,
}

impl OrchestrationReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn state_of(&self, service: &str) -> Option<ServiceState> {
        self.states.get(service).copied()
    }

    pub fn transitions_of(&self, service: &str) -> Vec<ServiceState> {
        self.transitions
            .iter()
            .filter(|t| t.service == service)
            .map(|t| t.to)
            .collect()
    }

    /// The first failure becomes the run's error.
    pub fn into_result(mut self) -> Result<Self> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(self.failures.remove(0).error)
        }
    }
}

enum Step {
    Started {
        service: String,
        result: Result<ServiceHandle>,
    },
    HealthResolved {
        service: String,
        handle: ServiceHandle,
        result: Result<bool>,
    },
}

struct RunState {
    descriptors: Vec<ServiceDescriptor>,
    states: HashMap<String, ServiceState>,
    transitions: Vec<Transition>,
    handles: HashMap<String, ServiceHandle>,
    failures: Vec<ServiceFailure>,
}

impl RunState {
    fn new(plan: &ResolvedPlan) -> Self {
        Self {
            descriptors: plan.descriptors(),
            states: plan
                .services()
                .iter()
                .map(|s| (s.name().to_string(), ServiceState::Pending))
                .collect(),
            transitions: Vec::new(),
            handles: HashMap::new(),
            failures: Vec::new(),
        }
    }

    fn state(&self, service: &str) -> ServiceState {
        self.states
            .get(service)
            .copied()
            .unwrap_or(ServiceState::Pending)
    }

    fn transition(&mut self, service: &str, to: ServiceState) {
        let from = self.state(service);
        debug_assert!(
            from.can_transition_to(to),
            "illegal transition {} -> {} for {}",
            from,
            to,
            service
        );
        tracing::debug!("{}: {} -> {}", service, from, to);
        self.states.insert(service.to_string(), to);
        self.transitions.push(Transition {
            service: service.to_string(),
            from,
            to,
        });
    }

    fn is_ready(&self, descriptor: &ServiceDescriptor) -> bool {
        self.state(descriptor.name()) == ServiceState::Pending
            && descriptor
                .depends_on
                .iter()
                .all(|dep| self.state(dep) == ServiceState::Healthy)
    }

    fn blocked_by(&self, service: &str) -> Vec<String> {
        transitive_dependents(&self.descriptors, service)
            .into_iter()
            .filter(|s| self.state(s) == ServiceState::Pending)
            .collect()
    }

    fn fail(&mut self, service: &str, error: StackError) {
        self.transition(service, ServiceState::Failed);
        tracing::error!("❌ {}: {}", service, error);
        self.failures.push(ServiceFailure {
            service: service.to_string(),
            error,
        });
    }
}

/// Brings a resolved plan up in dependency order, health-gating every edge.
pub struct StartupOrchestrator {
    lifecycle: Arc<dyn ContainerLifecycle>,
}

impl StartupOrchestrator {
    pub fn new(lifecycle: Arc<dyn ContainerLifecycle>) -> Self {
        Self { lifecycle }
    }

    /// 依相依順序啟動整個計畫
    pub async fn run(
        &self,
        plan: &ResolvedPlan,
        cancel: watch::Receiver<bool>,
    ) -> Result<OrchestrationReport> {
        let order = topological_order(&plan.descriptors())?;
        let state = RunState::new(plan);
        self.drive(plan, order, state, cancel).await
    }

    /// Re-applies a plan on top of a previous run. Services whose binding
    /// changed are torn down and created again; the rest keep their instance.
    pub async fn recreate_changed(
        &self,
        previous: &BTreeMap<String, RunningService>,
        plan: &ResolvedPlan,
        cancel: watch::Receiver<bool>,
    ) -> Result<OrchestrationReport> {
        let order = topological_order(&plan.descriptors())?;
        let mut state = RunState::new(plan);

        for planned in plan.services() {
            let Some(running) = previous.get(planned.name()) else {
                continue;
            };
            state
                .states
                .insert(planned.name().to_string(), ServiceState::Healthy);

            if running.binding == planned.binding {
                state
                    .handles
                    .insert(planned.name().to_string(), running.handle.clone());
                continue;
            }

            tracing::info!(
                "♻️ {}: binding changed ({} -> {}), recreating",
                planned.name(),
                running.binding.external_port,
                planned.binding.external_port
            );
            state.transition(planned.name(), ServiceState::Pending);
            self.lifecycle.stop(&running.handle).await?;
        }

        self.drive(plan, order, state, cancel).await
    }

    /// Stops whatever instances of the given services exist, dependents first.
    /// Ports play no part here.
    pub async fn teardown(&self, services: &[ServiceDescriptor]) -> Result<Vec<String>> {
        let order = topological_order(services)?;
        let mut handles = Vec::new();
        for name in order.iter().rev() {
            let Some(descriptor) = services.iter().find(|d| d.name() == name) else {
                continue;
            };
            if let Some(handle) = self.lifecycle.attach(descriptor).await? {
                handles.push(handle);
            } else {
                tracing::debug!("{}: no instance to stop", name);
            }
        }
        self.stop_all(&handles).await
    }

    async fn drive(
        &self,
        plan: &ResolvedPlan,
        order: Vec<String>,
        mut state: RunState,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<OrchestrationReport> {
        let run_id = format!("run_{}", chrono::Utc::now().format("%Y%m%d_%H%M%S"));
        let started_at = Instant::now();
        tracing::info!("🚀 Starting {} service(s) [{}]", plan.len(), run_id);

        let mut tasks: JoinSet<Step> = JoinSet::new();
        // task id -> 服務名稱，task panic 時才知道是誰
        let mut task_names: HashMap<Id, String> = HashMap::new();
        let mut health_checks: Vec<AbortHandle> = Vec::new();

        loop {
            for name in &order {
                let Some(planned) = plan.get(name) else {
                    continue;
                };
                if !state.is_ready(&planned.descriptor) {
                    continue;
                }
                state.transition(name, ServiceState::Starting);
                tracing::info!("▶️ Starting {}", name);

                let lifecycle = Arc::clone(&self.lifecycle);
                let descriptor = planned.descriptor.clone();
                let binding = planned.binding;
                let task = tasks.spawn(async move {
                    let result = lifecycle.start(&descriptor, &binding).await;
                    Step::Started {
                        service: descriptor.name().to_string(),
                        result,
                    }
                });
                task_names.insert(task.id(), name.clone());
            }

            if tasks.is_empty() {
                break;
            }

            let joined = tokio::select! {
                biased;
                _ = wait_cancelled(&mut cancel) => {
                    tracing::warn!("🛑 Cancellation requested, tearing down started services");
                    self.drain(&mut tasks, &health_checks, &mut state).await;
                    return Err(self.roll_back(&order, &state).await);
                }
                joined = tasks.join_next_with_id() => joined,
            };

            let step = match joined {
                Some(Ok((id, step))) => {
                    task_names.remove(&id);
                    step
                }
                Some(Err(join_error)) => {
                    let Some(service) = task_names.remove(&join_error.id()) else {
                        tracing::error!("❌ Unknown startup task aborted: {}", join_error);
                        continue;
                    };
                    let error = StackError::collaborator("startup task", &service, &join_error);
                    state.fail(&service, error);
                    if let Some(handle) = state.handles.get(&service).cloned() {
                        self.stop_failed(&mut state, &service, &handle).await;
                    }
                    continue;
                }
                None => continue,
            };

            match step {
                Step::Started { service, result } => match result {
                    Ok(handle) => {
                        state.handles.insert(service.clone(), handle.clone());
                        state.transition(&service, ServiceState::HealthChecking);

                        let check = plan
                            .get(&service)
                            .map(|p| p.descriptor.health_check)
                            .unwrap_or_default();
                        let lifecycle = Arc::clone(&self.lifecycle);
                        let name = service.clone();
                        let task = tasks.spawn(async move {
                            let result = wait_healthy(lifecycle.as_ref(), &handle, check).await;
                            Step::HealthResolved {
                                service,
                                handle,
                                result,
                            }
                        });
                        task_names.insert(task.id(), name);
                        health_checks.push(task);
                    }
                    Err(error) => state.fail(&service, error),
                },
                Step::HealthResolved {
                    service,
                    handle,
                    result,
                } => match result {
                    Ok(true) => {
                        state.transition(&service, ServiceState::Healthy);
                        tracing::info!("✅ {} is healthy", service);
                    }
                    Ok(false) => {
                        let waited = plan
                            .get(&service)
                            .map(|p| p.descriptor.health_check.timeout)
                            .unwrap_or_default();
                        let blocked = state.blocked_by(&service);
                        state.fail(
                            &service,
                            StackError::HealthTimeout {
                                service: service.clone(),
                                waited,
                                blocked,
                            },
                        );
                        self.stop_failed(&mut state, &service, &handle).await;
                    }
                    Err(error) => {
                        state.fail(&service, error);
                        self.stop_failed(&mut state, &service, &handle).await;
                    }
                },
            }
        }

        let mut blocked = BTreeMap::new();
        for failure in &state.failures {
            let chain = state.blocked_by(&failure.service);
            if !chain.is_empty() {
                tracing::warn!("⛔ {} blocked by {}", chain.join(", "), failure.service);
                blocked.insert(failure.service.clone(), chain);
            }
        }

        let running = plan
            .services()
            .iter()
            .filter(|p| state.state(p.name()) == ServiceState::Healthy)
            .filter_map(|p| {
                state.handles.get(p.name()).map(|handle| {
                    (
                        p.name().to_string(),
                        RunningService {
                            handle: handle.clone(),
                            binding: p.binding,
                        },
                    )
                })
            })
            .collect();

        tracing::info!(
            "🏁 Run {} finished in {:?}: {} healthy, {} failed",
            run_id,
            started_at.elapsed(),
            state
                .states
                .values()
                .filter(|s| **s == ServiceState::Healthy)
                .count(),
            state.failures.len()
        );

        Ok(OrchestrationReport {
            run_id,
            states: state.states.into_iter().collect(),
            transitions: state.transitions,
            failures: state.failures,
            blocked,
            running,
        })
    }

    /// Stops health polling but lets in-flight starts finish, so every
    /// instance that came up has its handle recorded before roll-back.
    async fn drain(
        &self,
        tasks: &mut JoinSet<Step>,
        health_checks: &[AbortHandle],
        state: &mut RunState,
    ) {
        for check in health_checks {
            check.abort();
        }
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Step::Started {
                service,
                result: Ok(handle),
            }) = joined
            {
                tracing::debug!("{}: started during cancellation", service);
                state.handles.insert(service, handle);
            }
        }
    }

    async fn stop_failed(&self, state: &mut RunState, service: &str, handle: &ServiceHandle) {
        state.handles.remove(service);
        if let Err(error) = self.lifecycle.stop(handle).await {
            tracing::error!("❌ Could not stop failed service {}: {}", service, error);
            state.failures.push(ServiceFailure {
                service: service.to_string(),
                error,
            });
        }
    }

    /// 取消時依反向相依順序停止所有已啟動的服務
    async fn roll_back(&self, order: &[String], state: &RunState) -> StackError {
        let handles: Vec<ServiceHandle> = order
            .iter()
            .rev()
            .filter_map(|name| state.handles.get(name).cloned())
            .collect();

        match self.stop_all(&handles).await {
            Ok(stopped) => StackError::Cancelled { stopped },
            Err(error) => error,
        }
    }

    /// Stops every handle in the given order. All stops are attempted; the
    /// first failure is returned afterwards.
    async fn stop_all(&self, handles: &[ServiceHandle]) -> Result<Vec<String>> {
        let mut stopped = Vec::new();
        let mut first_error = None;
        for handle in handles {
            match self.lifecycle.stop(handle).await {
                Ok(()) => {
                    tracing::info!("⏹️ Stopped {}", handle.service);
                    stopped.push(handle.service.clone());
                }
                Err(error) => {
                    tracing::error!("❌ Could not stop {}: {}", handle.service, error);
                    first_error.get_or_insert(error);
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(stopped),
        }
    }
}

/// Polls until healthy. `Ok(false)` means the timeout ran out.
async fn wait_healthy(
    lifecycle: &dyn ContainerLifecycle,
    handle: &ServiceHandle,
    check: HealthCheck,
) -> Result<bool> {
    let poll = async {
        loop {
            if lifecycle.is_healthy(handle).await? {
                return Ok::<(), StackError>(());
            }
            tokio::time::sleep(check.interval).await;
        }
    };

    match tokio::time::timeout(check.timeout, poll).await {
        Ok(result) => result.map(|()| true),
        Err(_) => Ok(false),
    }
}

async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    // sender 被丟棄代表不會再取消
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// A receiver that never fires, for callers without an abort path.
pub fn never_cancelled() -> watch::Receiver<bool> {
    let (_tx, rx) = watch::channel(false);
    rx
}
