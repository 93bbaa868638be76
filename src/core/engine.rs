use crate::config::EffectiveConfig;
use crate::core::emitter::{parse_env_file, EmittedConfig, PlanEmitter};
use crate::core::orchestrator::{OrchestrationReport, RunningService, StartupOrchestrator};
use crate::core::resolver::ConflictResolver;
use crate::domain::model::{HostPortInventory, PortBinding, Protocol, ResolvedPlan};
use crate::domain::ports::{ConfigStore, ContainerLifecycle, HostPortProbe};
use crate::utils::error::{Result, StackError};
use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub plan: ResolvedPlan,
    pub emitted: EmittedConfig,
}

/// Ties resolution, emission and startup together for one effective configuration.
pub struct StackEngine {
    config: EffectiveConfig,
    emitter: PlanEmitter,
}

impl StackEngine {
    pub fn new(config: EffectiveConfig) -> Self {
        let emitter = PlanEmitter::new().with_project(config.project.clone());
        Self { config, emitter }
    }

    pub fn config(&self) -> &EffectiveConfig {
        &self.config
    }

    /// 解析埠號並產生設定內容，不寫檔也不呼叫容器
    pub fn plan(&self, probe: Option<&dyn HostPortProbe>) -> Result<PlanOutcome> {
        self.plan_around(probe, &BTreeMap::new())
    }

    /// Like [`StackEngine::plan`], but ports published by this project's own
    /// running instances do not count as taken, so a re-run keeps them.
    pub fn plan_around(
        &self,
        probe: Option<&dyn HostPortProbe>,
        running: &BTreeMap<String, RunningService>,
    ) -> Result<PlanOutcome> {
        let services = self.config.selected_services()?;
        tracing::info!(
            "📋 Planning {} service(s) of '{}' for environment '{}'{}",
            services.len(),
            self.config.stack_name,
            self.config.environment,
            self.config
                .profile
                .as_deref()
                .map(|p| format!(", profile '{}'", p))
                .unwrap_or_default()
        );

        let resolver = ConflictResolver::new(self.config.scope).with_window(self.config.probe_window);
        let inventory = match probe {
            Some(probe) => resolver.scan_inventory(probe, &services, &self.config.occupied)?,
            None => HostPortInventory::from_ports(self.config.occupied.iter().copied()),
        };

        let own: HashSet<(u16, Protocol)> = running
            .values()
            .map(|r| (r.binding.external_port, r.binding.protocol))
            .collect();
        let inventory = if own.is_empty() {
            inventory
        } else {
            tracing::debug!("Ignoring {} port(s) held by this project", own.len());
            inventory.excluding(&own)
        };

        let plan = resolver.resolve(&services, &inventory)?;
        for moved in plan.services().iter().filter(|s| s.moved()) {
            tracing::info!(
                "🔀 {}: {} -> {} (internal {})",
                moved.name(),
                moved.descriptor.default_external_port,
                moved.binding.external_port,
                moved.binding.internal_port
            );
        }

        let emitted = self.emitter.emit(&plan);
        Ok(PlanOutcome { plan, emitted })
    }

    /// Instances left by an earlier `up`: bindings come from the env file that
    /// run wrote, handles from the lifecycle. No env file means no earlier run.
    pub async fn previous_run<S: ConfigStore>(
        &self,
        store: &S,
        lifecycle: &dyn ContainerLifecycle,
    ) -> Result<BTreeMap<String, RunningService>> {
        let content = match store.read_file(&self.config.env_file).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(StackError::IoError(e)) if e.kind() == ErrorKind::NotFound => {
                return Ok(BTreeMap::new());
            }
            Err(e) => return Err(e),
        };
        let previous = parse_env_file(&content);

        let mut running = BTreeMap::new();
        for service in self.config.selected_services()? {
            let Some(port) = previous
                .get(&service.external_var_name())
                .and_then(|v| v.parse::<u16>().ok())
            else {
                continue;
            };
            let Some(handle) = lifecycle.attach(&service).await? else {
                continue;
            };
            tracing::debug!("{} already running on {}", service.name(), port);
            running.insert(
                service.name().to_string(),
                RunningService {
                    handle,
                    binding: PortBinding {
                        external_port: port,
                        internal_port: service.internal_port(),
                        protocol: service.protocol,
                        scope: self.config.scope,
                    },
                },
            );
        }
        Ok(running)
    }

    pub async fn write<S: ConfigStore>(&self, outcome: &PlanOutcome, store: &S) -> Result<()> {
        self.emitter
            .write(
                &outcome.emitted,
                store,
                &self.config.env_file,
                &self.config.override_file,
            )
            .await
    }

    /// Writes the files, then starts the plan. With instances from an earlier
    /// run only services whose binding changed are recreated.
    pub async fn up<S: ConfigStore>(
        &self,
        outcome: &PlanOutcome,
        store: &S,
        lifecycle: Arc<dyn ContainerLifecycle>,
        running: &BTreeMap<String, RunningService>,
        cancel: watch::Receiver<bool>,
    ) -> Result<OrchestrationReport> {
        // 先寫設定檔，容器建立時才讀得到新的埠號
        self.write(outcome, store).await?;
        let orchestrator = StartupOrchestrator::new(lifecycle);
        if running.is_empty() {
            orchestrator.run(&outcome.plan, cancel).await
        } else {
            orchestrator
                .recreate_changed(running, &outcome.plan, cancel)
                .await
        }
    }

    pub async fn down(&self, lifecycle: Arc<dyn ContainerLifecycle>) -> Result<Vec<String>> {
        let services = self.config.teardown_services()?;
        tracing::info!("⏹️ Stopping up to {} service(s)", services.len());
        StartupOrchestrator::new(lifecycle).teardown(&services).await
    }
}
