use crate::domain::model::ResolvedPlan;
use crate::domain::ports::ConfigStore;
use crate::utils::error::Result;
use serde::Serialize;
use serde_yaml_ng::value::{Tag, TaggedValue};
use serde_yaml_ng::{Mapping, Value};
use std::collections::BTreeMap;

const GENERATED_HEADER: &str = "# Generated by stackplan. Edit the stack file, not this file.";

/// What the compose side gets to see of a resolved plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmittedConfig {
    /// variable name -> value, for the `.env` file
    pub env: BTreeMap<String, String>,
    /// service name -> bound external port
    pub external_ports: BTreeMap<String, u16>,
    /// service name -> compose `ports:` entry
    pub port_entries: BTreeMap<String, String>,
}

impl EmittedConfig {
    pub fn render_env_file(&self) -> String {
        let mut out = String::from(GENERATED_HEADER);
        out.push('\n');
        for (key, value) in &self.env {
            out.push_str(&format!("{}={}\n", key, value));
        }
        out
    }

    /// Compose override replacing each planned service's `ports:` list.
    pub fn render_override_file(&self) -> Result<String> {
        let mut services = Mapping::new();
        for (name, entry) in &self.port_entries {
            let ports = Value::Tagged(Box::new(TaggedValue {
                tag: Tag::new("override"),
                value: Value::Sequence(vec![Value::String(entry.clone())]),
            }));
            let mut service = Mapping::new();
            service.insert(Value::String("ports".to_string()), ports);
            services.insert(Value::String(name.clone()), Value::Mapping(service));
        }

        let mut root = Mapping::new();
        root.insert(Value::String("services".to_string()), Value::Mapping(services));

        let body = serde_yaml_ng::to_string(&Value::Mapping(root))?;
        Ok(format!("{}\n{}", GENERATED_HEADER, body))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlanEmitter {
    project: Option<String>,
}

impl PlanEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Internal-port variables always carry the fixed value; external ones
    /// carry the resolved port.
    pub fn emit(&self, plan: &ResolvedPlan) -> EmittedConfig {
        let mut env = BTreeMap::new();
        let mut external_ports = BTreeMap::new();
        let mut port_entries = BTreeMap::new();

        if let Some(project) = &self.project {
            env.insert("COMPOSE_PROJECT_NAME".to_string(), project.clone());
        }

        for planned in plan.services() {
            let descriptor = &planned.descriptor;
            env.insert(
                descriptor.internal_var_name(),
                descriptor.internal_port().to_string(),
            );
            env.insert(
                descriptor.external_var_name(),
                planned.binding.external_port.to_string(),
            );
            external_ports.insert(planned.name().to_string(), planned.binding.external_port);
            port_entries.insert(planned.name().to_string(), planned.binding.compose_entry());
        }

        EmittedConfig {
            env,
            external_ports,
            port_entries,
        }
    }

    /// 寫入 .env 與 override 檔，寫入錯誤原樣回傳
    pub async fn write<W: ConfigStore>(
        &self,
        emitted: &EmittedConfig,
        writer: &W,
        env_file: &str,
        override_file: &str,
    ) -> Result<()> {
        writer
            .write_file(env_file, emitted.render_env_file().as_bytes())
            .await?;
        writer
            .write_file(override_file, emitted.render_override_file()?.as_bytes())
            .await?;
        tracing::info!("💾 Wrote {} and {}", env_file, override_file);
        Ok(())
    }
}

/// Reads back a file written by [`EmittedConfig::render_env_file`].
/// Comments, blank lines and lines without `=` are skipped.
pub fn parse_env_file(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

/// Operator-facing list of where each service can be reached.
pub fn render_access_table(plan: &ResolvedPlan) -> String {
    let width = plan
        .services()
        .iter()
        .map(|s| s.name().len())
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    for planned in plan.services() {
        let host = planned.binding.scope.host_ip().unwrap_or("0.0.0.0");
        let host = if host == "127.0.0.1" { "localhost" } else { host };
        let address = match &planned.descriptor.url_scheme {
            Some(scheme) => format!("{}://{}:{}", scheme, host, planned.binding.external_port),
            None => format!("{}:{}", host, planned.binding.external_port),
        };
        out.push_str(&format!(
            "  - {:<width$}  {}\n",
            format!("{}:", planned.name()),
            address,
            width = width + 1
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{BindScope, PlannedService, PortBinding, Protocol, ServiceDescriptor};

    fn plan() -> ResolvedPlan {
        let postgres = ServiceDescriptor::new("postgres", 5432, 5432);
        let n8n = ServiceDescriptor::new("n8n", 5678, 5678).with_url_scheme("http");
        ResolvedPlan::new(vec![
            PlannedService {
                binding: PortBinding {
                    external_port: 5433,
                    internal_port: 5432,
                    protocol: Protocol::Tcp,
                    scope: BindScope::Loopback,
                },
                descriptor: postgres,
            },
            PlannedService {
                binding: PortBinding {
                    external_port: 5678,
                    internal_port: 5678,
                    protocol: Protocol::Tcp,
                    scope: BindScope::Loopback,
                },
                descriptor: n8n,
            },
        ])
    }

    #[test]
    fn test_internal_vars_keep_canonical_values() {
        let emitted = PlanEmitter::new().emit(&plan());
        assert_eq!(emitted.env["POSTGRES_PORT"], "5432");
        assert_eq!(emitted.env["POSTGRES_EXTERNAL_PORT"], "5433");
        assert_eq!(emitted.external_ports["postgres"], 5433);
        assert_eq!(emitted.port_entries["postgres"], "127.0.0.1:5433:5432");
        assert!(!emitted.env.contains_key("COMPOSE_PROJECT_NAME"));
    }

    #[test]
    fn test_env_file_is_sorted() {
        let text = PlanEmitter::new().with_project("localai").emit(&plan()).render_env_file();
        let lines: Vec<&str> = text.lines().skip(1).collect();
        assert_eq!(
            lines,
            vec![
                "COMPOSE_PROJECT_NAME=localai",
                "N8N_EXTERNAL_PORT=5678",
                "N8N_PORT=5678",
                "POSTGRES_EXTERNAL_PORT=5433",
                "POSTGRES_PORT=5432",
            ]
        );
    }

    #[test]
    fn test_override_replaces_ports() {
        let yaml = PlanEmitter::new().emit(&plan()).render_override_file().unwrap();
        assert!(yaml.starts_with(GENERATED_HEADER));
        assert!(yaml.contains("!override"));
        assert!(yaml.contains("127.0.0.1:5433:5432"));
        assert!(yaml.find("n8n").unwrap() < yaml.find("postgres").unwrap());
    }

    #[test]
    fn test_env_file_reads_back() {
        let emitted = PlanEmitter::new().with_project("localai").emit(&plan());
        assert_eq!(parse_env_file(&emitted.render_env_file()), emitted.env);
        assert!(parse_env_file("# only a comment\n\nnot a pair\n").is_empty());
    }

    #[test]
    fn test_access_table() {
        let table = render_access_table(&plan());
        assert!(table.contains("http://localhost:5678"));
        assert!(table.contains("localhost:5433"));
    }
}
