use crate::domain::model::{BindScope, HealthCheck, Protocol, ServiceDescriptor};
use crate::utils::error::{Result, StackError};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackFile {
    pub stack: StackSection,
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentSection>,
    #[serde(default)]
    pub services: Vec<ServiceSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackSection {
    pub name: String,
    pub project: Option<String>,
    pub probe_window: Option<u16>,
    pub default_profile: Option<String>,
    pub default_environment: Option<String>,
    pub env_file: Option<String>,
    pub override_file: Option<String>,
    pub compose_files: Option<Vec<String>>,
    pub health: Option<HealthSection>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HealthSection {
    pub interval_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
}

impl HealthSection {
    pub fn apply(&self, base: HealthCheck) -> HealthCheck {
        HealthCheck {
            interval: self
                .interval_ms
                .map(Duration::from_millis)
                .unwrap_or(base.interval),
            timeout: self
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(base.timeout),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSection {
    #[serde(default)]
    pub scope: BindScope,
    #[serde(default)]
    pub compose_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSection {
    pub name: String,
    pub internal_port: u16,
    /// 未設定時與 internal_port 相同
    pub external_port: Option<u16>,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub profiles: Vec<String>,
    #[serde(default)]
    pub environments: Vec<String>,
    #[serde(default)]
    pub pinned: bool,
    pub internal_var: Option<String>,
    pub external_var: Option<String>,
    pub url_scheme: Option<String>,
    pub health: Option<HealthSection>,
}

impl ServiceSection {
    pub fn to_descriptor(&self, health_defaults: HealthCheck) -> ServiceDescriptor {
        let health = self
            .health
            .map(|h| h.apply(health_defaults))
            .unwrap_or(health_defaults);

        let mut descriptor = ServiceDescriptor::new(
            self.name.clone(),
            self.internal_port,
            self.external_port.unwrap_or(self.internal_port),
        )
        .with_protocol(self.protocol)
        .depends_on(self.depends_on.iter().cloned())
        .with_health_check(health)
        .with_profiles(self.profiles.iter().cloned())
        .with_environments(self.environments.iter().cloned())
        .with_vars(self.internal_var.clone(), self.external_var.clone());

        if self.pinned {
            descriptor = descriptor.pinned();
        }
        if let Some(scheme) = &self.url_scheme {
            descriptor = descriptor.with_url_scheme(scheme.clone());
        }
        descriptor
    }
}

impl StackFile {
    /// 從 TOML 檔案載入，使用目前行程的環境變數做替換
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::from_toml_str(&content, &env)
    }

    pub fn from_toml_str(content: &str, env: &HashMap<String, String>) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content, env)?;
        Ok(toml::from_str(&processed_content)?)
    }

    /// 替換 `${VAR}`；找不到的變數保留原樣
    fn substitute_env_vars(content: &str, env: &HashMap<String, String>) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| StackError::ConfigValidationError {
            field: "env_substitution".to_string(),
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            env.get(var_name)
                .cloned()
                .unwrap_or_else(|| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// Declared environments, or the built-in `private`/`public` pair.
    pub fn environments(&self) -> BTreeMap<String, EnvironmentSection> {
        if !self.environments.is_empty() {
            return self.environments.clone();
        }
        BTreeMap::from([
            (
                "private".to_string(),
                EnvironmentSection {
                    scope: BindScope::Loopback,
                    compose_files: Vec::new(),
                },
            ),
            (
                "public".to_string(),
                EnvironmentSection {
                    scope: BindScope::AllInterfaces,
                    compose_files: Vec::new(),
                },
            ),
        ])
    }

    pub fn health_defaults(&self) -> HealthCheck {
        self.stack
            .health
            .map(|h| h.apply(HealthCheck::default()))
            .unwrap_or_default()
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_non_empty_string("stack.name", &self.stack.name)?;

        if let Some(window) = self.stack.probe_window {
            validation::validate_positive_number("stack.probe_window", window.into(), 1)?;
        }
        if let Some(health) = &self.stack.health {
            validate_health("stack.health", health)?;
        }

        let mut seen = HashSet::new();
        for service in &self.services {
            let field = format!("services.{}", service.name);
            validation::validate_service_name("services.name", &service.name)?;
            if !seen.insert(service.name.as_str()) {
                return Err(StackError::DuplicateServiceName {
                    name: service.name.clone(),
                });
            }
            validation::validate_port(&format!("{}.internal_port", field), service.internal_port)?;
            if let Some(port) = service.external_port {
                validation::validate_port(&format!("{}.external_port", field), port)?;
            }
            for var in [&service.internal_var, &service.external_var].into_iter().flatten() {
                validation::validate_env_var_name(&format!("{}.vars", field), var)?;
            }
            if let Some(health) = &service.health {
                validate_health(&format!("{}.health", field), health)?;
            }
        }

        let environments = self.environments();
        if let Some(default_env) = &self.stack.default_environment {
            if !environments.contains_key(default_env) {
                return Err(StackError::ConfigValidationError {
                    field: "stack.default_environment".to_string(),
                    message: format!("Environment '{}' is not declared", default_env),
                });
            }
        }

        Ok(())
    }
}

fn validate_health(field: &str, health: &HealthSection) -> Result<()> {
    if let Some(interval) = health.interval_ms {
        validation::validate_positive_number(&format!("{}.interval_ms", field), interval, 1)?;
    }
    if let Some(timeout) = health.timeout_secs {
        validation::validate_positive_number(&format!("{}.timeout_secs", field), timeout, 1)?;
    }
    Ok(())
}

impl Validate for StackFile {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
