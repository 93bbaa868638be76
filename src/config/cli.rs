use crate::config::ConfigOverrides;
use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "stackplan")]
#[command(about = "Conflict-free port planning and health-gated startup for compose stacks")]
pub struct CliConfig {
    /// Path to the stack file
    #[arg(short, long, default_value = "stack.toml")]
    pub config: String,

    /// Profile to activate (e.g. gpu-nvidia, cpu, none)
    #[arg(long)]
    pub profile: Option<String>,

    /// Environment to plan for (e.g. private, public)
    #[arg(long)]
    pub environment: Option<String>,

    /// Compose project name
    #[arg(long)]
    pub project: Option<String>,

    /// Resolve and render the plan without touching files or containers
    #[arg(long)]
    pub dry_run: bool,

    /// Stop the selected services, dependents first
    #[arg(long, conflicts_with = "dry_run")]
    pub down: bool,

    /// Host ports to treat as occupied in addition to the probe (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub occupied: Vec<u16>,

    /// How far above a taken default port to search
    #[arg(long)]
    pub probe_window: Option<u16>,

    /// Skip probing host sockets; only --occupied counts as taken
    #[arg(long)]
    pub no_probe: bool,

    #[arg(long)]
    pub health_timeout_secs: Option<u64>,

    #[arg(long)]
    pub health_interval_ms: Option<u64>,

    /// Directory the generated files are written to
    #[arg(long, default_value = ".")]
    pub output_dir: String,

    /// Print the dry-run plan as JSON
    #[arg(long)]
    pub json: bool,

    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,
}

impl CliConfig {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            profile: self.profile.clone(),
            environment: self.environment.clone(),
            project: self.project.clone(),
            probe_window: self.probe_window,
            health_timeout_secs: self.health_timeout_secs,
            health_interval_ms: self.health_interval_ms,
            occupied: self.occupied.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_selection_flags() {
        let cli = CliConfig::parse_from([
            "stackplan",
            "--profile",
            "gpu-nvidia",
            "--environment",
            "public",
            "--dry-run",
            "--occupied",
            "5432,8080",
        ]);
        let overrides = cli.overrides();
        assert_eq!(overrides.profile.as_deref(), Some("gpu-nvidia"));
        assert_eq!(overrides.environment.as_deref(), Some("public"));
        assert!(cli.dry_run);
        assert_eq!(overrides.occupied, vec![5432, 8080]);
        assert_eq!(cli.config, "stack.toml");
    }

    #[test]
    fn test_down_conflicts_with_dry_run() {
        assert!(CliConfig::try_parse_from(["stackplan", "--down", "--dry-run"]).is_err());
    }
}
