#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

use crate::adapters::compose::DEFAULT_PROJECT;
use crate::core::descriptors::DescriptorStore;
use crate::core::resolver::DEFAULT_PROBE_WINDOW;
use crate::domain::model::{BindScope, HealthCheck, Protocol, ServiceDescriptor};
use crate::utils::error::{Result, StackError};
use crate::utils::validation::{self, Validate};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use toml_config::StackFile;

pub const DEFAULT_ENVIRONMENT: &str = "private";
pub const DEFAULT_ENV_FILE: &str = ".env.ports";
pub const DEFAULT_OVERRIDE_FILE: &str = "docker-compose.override.ports.yml";

/// Values given on the command line. `None` means "not given, fall through".
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub profile: Option<String>,
    pub environment: Option<String>,
    pub project: Option<String>,
    pub probe_window: Option<u16>,
    pub health_timeout_secs: Option<u64>,
    pub health_interval_ms: Option<u64>,
    pub occupied: Vec<u16>,
}

/// The one configuration every component reads, resolved once at load time.
///
/// Precedence, lowest first: built-in defaults, stack file, process
/// environment, command line.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub stack_name: String,
    pub project: String,
    pub profile: Option<String>,
    pub environment: String,
    pub scope: BindScope,
    pub compose_files: Vec<PathBuf>,
    pub env_file: String,
    pub override_file: String,
    pub probe_window: u16,
    pub health: HealthCheck,
    pub occupied: Vec<(u16, Protocol)>,
    pub store: DescriptorStore,
    /// 每一筆套用的覆寫，供日誌與除錯
    pub applied_overrides: Vec<String>,
}

impl EffectiveConfig {
    pub fn resolve(
        file: &StackFile,
        env: &HashMap<String, String>,
        cli: &ConfigOverrides,
    ) -> Result<Self> {
        file.validate()?;
        let mut applied = Vec::new();

        let profile = pick(
            "profile",
            cli.profile.clone(),
            env.get("STACKPLAN_PROFILE").cloned(),
            file.stack.default_profile.clone(),
            &mut applied,
        )
        .filter(|p| p != "none");

        let environment = pick(
            "environment",
            cli.environment.clone(),
            env.get("STACKPLAN_ENVIRONMENT").cloned(),
            file.stack.default_environment.clone(),
            &mut applied,
        )
        .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());

        let project = pick(
            "project",
            cli.project.clone(),
            env.get("STACKPLAN_PROJECT").cloned(),
            file.stack.project.clone(),
            &mut applied,
        )
        .unwrap_or_else(|| DEFAULT_PROJECT.to_string());

        let probe_window = pick(
            "probe_window",
            cli.probe_window,
            parse_env(env, "STACKPLAN_PROBE_WINDOW")?,
            file.stack.probe_window,
            &mut applied,
        )
        .unwrap_or(DEFAULT_PROBE_WINDOW);
        validation::validate_positive_number("probe_window", probe_window.into(), 1)?;

        let file_health = file.health_defaults();
        let timeout_override = pick(
            "health_timeout_secs",
            cli.health_timeout_secs,
            parse_env(env, "STACKPLAN_HEALTH_TIMEOUT_SECS")?,
            None,
            &mut applied,
        );
        if let Some(secs) = timeout_override {
            validation::validate_positive_number("health_timeout_secs", secs, 1)?;
        }
        let interval_override = cli.health_interval_ms;
        if let Some(ms) = interval_override {
            validation::validate_positive_number("health_interval_ms", ms, 1)?;
        }
        let override_health = |base: HealthCheck| HealthCheck {
            interval: interval_override
                .map(Duration::from_millis)
                .unwrap_or(base.interval),
            timeout: timeout_override
                .map(Duration::from_secs)
                .unwrap_or(base.timeout),
        };
        let health = override_health(file_health);

        let environments = file.environments();
        let selected_env =
            environments
                .get(&environment)
                .ok_or_else(|| StackError::UnknownSelection {
                    kind: "environment".to_string(),
                    name: environment.clone(),
                })?;

        let env_file = file
            .stack
            .env_file
            .clone()
            .unwrap_or_else(|| DEFAULT_ENV_FILE.to_string());
        let override_file = file
            .stack
            .override_file
            .clone()
            .unwrap_or_else(|| DEFAULT_OVERRIDE_FILE.to_string());

        let mut compose_files: Vec<PathBuf> = file
            .stack
            .compose_files
            .clone()
            .unwrap_or_else(|| vec!["docker-compose.yml".to_string()])
            .into_iter()
            .map(PathBuf::from)
            .collect();
        compose_files.extend(selected_env.compose_files.iter().map(PathBuf::from));
        // 產生的 override 放最後，確保它的 ports 生效
        compose_files.push(PathBuf::from(&override_file));

        let descriptors = file
            .services
            .iter()
            .map(|section| {
                let mut descriptor = section.to_descriptor(file_health);
                descriptor.health_check = override_health(descriptor.health_check);
                apply_port_override(descriptor, env, &mut applied)
            })
            .collect::<Result<Vec<ServiceDescriptor>>>()?;
        let store = DescriptorStore::from_descriptors(descriptors)?;

        if let Some(profile) = &profile {
            if !store.profiles().contains(profile.as_str()) {
                return Err(StackError::UnknownSelection {
                    kind: "profile".to_string(),
                    name: profile.clone(),
                });
            }
        }

        let mut occupied: Vec<(u16, Protocol)> =
            cli.occupied.iter().map(|p| (*p, Protocol::Tcp)).collect();
        occupied.extend(cli.occupied.iter().map(|p| (*p, Protocol::Udp)));

        for line in &applied {
            tracing::info!("⚙️ {}", line);
        }

        Ok(Self {
            stack_name: file.stack.name.clone(),
            project,
            profile,
            environment,
            scope: selected_env.scope,
            compose_files,
            env_file,
            override_file,
            probe_window,
            health,
            occupied,
            store,
            applied_overrides: applied,
        })
    }

    pub fn selected_services(&self) -> Result<Vec<ServiceDescriptor>> {
        self.store.select(self.profile.as_deref(), &self.environment)
    }

    /// What `--down` stops. Without a profile that is every declared service,
    /// across all profiles and environments; with one it is the selection.
    pub fn teardown_services(&self) -> Result<Vec<ServiceDescriptor>> {
        match &self.profile {
            None => Ok(self.store.all().to_vec()),
            Some(_) => self.selected_services(),
        }
    }
}

/// CLI wins over environment, environment over the file.
fn pick<T: std::fmt::Debug>(
    field: &str,
    cli: Option<T>,
    env: Option<T>,
    file: Option<T>,
    applied: &mut Vec<String>,
) -> Option<T> {
    if let Some(value) = cli {
        applied.push(format!("{} = {:?} (command line)", field, value));
        return Some(value);
    }
    if let Some(value) = env {
        applied.push(format!("{} = {:?} (environment)", field, value));
        return Some(value);
    }
    file
}

fn parse_env<T: std::str::FromStr>(env: &HashMap<String, String>, key: &str) -> Result<Option<T>> {
    match env.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| StackError::InvalidConfigValueError {
                field: key.to_string(),
                value: raw.clone(),
                reason: "Not a valid number".to_string(),
            }),
    }
}

/// A shell variable named like the service's external-port variable replaces
/// the default external port from the file.
fn apply_port_override(
    mut descriptor: ServiceDescriptor,
    env: &HashMap<String, String>,
    applied: &mut Vec<String>,
) -> Result<ServiceDescriptor> {
    let var = descriptor.external_var_name();
    if let Some(port) = parse_env::<u16>(env, &var)? {
        validation::validate_port(&var, port)?;
        applied.push(format!(
            "{}.external_port = {} (environment {})",
            descriptor.name(),
            port,
            var
        ));
        descriptor.default_external_port = port;
    }
    Ok(descriptor)
}

impl Validate for EffectiveConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_non_empty_string("project", &self.project)?;
        validation::validate_non_empty_string("env_file", &self.env_file)?;
        validation::validate_non_empty_string("override_file", &self.override_file)?;
        validation::validate_range("probe_window", self.probe_window, 1, u16::MAX)?;
        self.store.validate()
    }
}
