use crate::domain::model::{PortBinding, ServiceDescriptor, ServiceHandle};
use crate::domain::ports::ContainerLifecycle;
use crate::utils::error::{Result, StackError};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

pub const DEFAULT_PROJECT: &str = "localai";

const HEALTH_FORMAT: &str =
    "{{if .State.Health}}{{.State.Health.Status}}{{else}}{{.State.Status}}{{end}}";

/// Lifecycle collaborator backed by `docker compose`.
#[derive(Debug, Clone)]
pub struct ComposeLifecycle {
    program: String,
    project: String,
    files: Vec<PathBuf>,
    env_file: Option<PathBuf>,
    profile: Option<String>,
    working_dir: PathBuf,
}

impl ComposeLifecycle {
    pub fn new(project: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: "docker".to_string(),
            project: project.into(),
            files: Vec::new(),
            env_file: None,
            profile: None,
            working_dir: working_dir.into(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.files.extend(files.into_iter().map(Into::into));
        self
    }

    /// Relative paths resolve against the working directory, like the compose files.
    pub fn with_env_file(mut self, env_file: impl Into<PathBuf>) -> Self {
        self.env_file = Some(env_file.into());
        self
    }

    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    /// `compose -p <project> [--env-file <file>] -f <file>... [--profile <p>] <tail>`
    pub fn compose_args(&self, tail: &[&str]) -> Vec<String> {
        let mut args = vec![
            "compose".to_string(),
            "-p".to_string(),
            self.project.clone(),
        ];
        if let Some(env_file) = &self.env_file {
            args.push("--env-file".to_string());
            args.push(env_file.display().to_string());
        }
        for file in &self.files {
            args.push("-f".to_string());
            args.push(file.display().to_string());
        }
        if let Some(profile) = &self.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        args.extend(tail.iter().map(|s| s.to_string()));
        args
    }

    async fn run(&self, operation: &str, service: &str, args: Vec<String>) -> Result<String> {
        tracing::info!("Running: {} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(&args)
            .current_dir(&self.working_dir)
            .output()
            .await
            .map_err(|e| StackError::collaborator(operation, service, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StackError::collaborator(
                operation,
                service,
                format!("{} ({})", stderr.trim(), output.status),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn container_id(&self, service: &str) -> Result<Option<String>> {
        let stdout = self
            .run("compose ps", service, self.compose_args(&["ps", "-q", service]))
            .await?;
        Ok(stdout.lines().next().map(str::to_string).filter(|id| !id.is_empty()))
    }
}

/// Maps `docker inspect` health/state output to "ready yet?".
pub fn interpret_status(service: &str, status: &str) -> Result<bool> {
    match status.trim() {
        "healthy" => Ok(true),
        // 沒有定義 healthcheck 的容器，執行中即視為就緒
        "running" => Ok(true),
        "starting" | "unhealthy" | "created" | "restarting" => Ok(false),
        other => Err(StackError::collaborator(
            "health check",
            service,
            format!("container is {}", other),
        )),
    }
}

#[async_trait]
impl ContainerLifecycle for ComposeLifecycle {
    async fn start(&self, service: &ServiceDescriptor, binding: &PortBinding) -> Result<ServiceHandle> {
        tracing::debug!(
            "{}: publishing {}",
            service.name(),
            binding.compose_entry()
        );
        // 重建而非重啟，環境變數變更才會生效
        self.run(
            "compose up",
            service.name(),
            self.compose_args(&["up", "-d", "--no-deps", "--force-recreate", service.name()]),
        )
        .await?;

        let id = self.container_id(service.name()).await?.ok_or_else(|| {
            StackError::collaborator("compose up", service.name(), "no container after up")
        })?;
        Ok(ServiceHandle::new(service.name(), id))
    }

    async fn stop(&self, handle: &ServiceHandle) -> Result<()> {
        self.run(
            "compose rm",
            &handle.service,
            self.compose_args(&["rm", "--stop", "--force", &handle.service]),
        )
        .await
        .map(drop)
    }

    async fn is_healthy(&self, handle: &ServiceHandle) -> Result<bool> {
        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            HEALTH_FORMAT.to_string(),
            handle.instance_id.clone(),
        ];
        let status = self.run("docker inspect", &handle.service, args).await?;
        interpret_status(&handle.service, &status)
    }

    async fn attach(&self, service: &ServiceDescriptor) -> Result<Option<ServiceHandle>> {
        Ok(self
            .container_id(service.name())
            .await?
            .map(|id| ServiceHandle::new(service.name(), id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_args_include_files_and_profile() {
        let compose = ComposeLifecycle::new(DEFAULT_PROJECT, ".")
            .with_files(["docker-compose.yml", "docker-compose.override.private.yml"])
            .with_env_file(".env.ports")
            .with_profile(Some("gpu-nvidia".to_string()));

        let args = compose.compose_args(&["up", "-d", "n8n"]);
        assert_eq!(
            args,
            vec![
                "compose",
                "-p",
                "localai",
                "--env-file",
                ".env.ports",
                "-f",
                "docker-compose.yml",
                "-f",
                "docker-compose.override.private.yml",
                "--profile",
                "gpu-nvidia",
                "up",
                "-d",
                "n8n",
            ]
        );
    }

    #[test]
    fn test_interpret_status() {
        assert!(interpret_status("db", "healthy\n").unwrap());
        assert!(interpret_status("searxng", "running").unwrap());
        assert!(!interpret_status("db", "starting").unwrap());
        assert!(!interpret_status("db", "unhealthy").unwrap());
        assert!(matches!(
            interpret_status("db", "exited"),
            Err(StackError::ExternalCollaboratorFailure { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_command_surfaces_stderr() {
        let compose = ComposeLifecycle::new(DEFAULT_PROJECT, ".").with_program("false");
        let err = compose
            .attach(&ServiceDescriptor::new("n8n", 5678, 5678))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StackError::ExternalCollaboratorFailure { operation, service, .. }
                if operation == "compose ps" && service == "n8n"
        ));
    }
}
