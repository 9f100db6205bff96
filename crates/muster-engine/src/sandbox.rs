use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use muster_core::ids::ProjectId;
use muster_core::runtime::{CommandResult, Plan, PlanStep, Runtime, RuntimeError};

/// Provisions one isolated runtime per worker so workers never share
/// mutable execution context.
pub trait RuntimeFactory: Send + Sync {
    fn provision(&self) -> Arc<dyn Runtime>;
}

async fn run_process(
    program: &str,
    args: &[&str],
    workdir: Option<&PathBuf>,
    timeout: Duration,
) -> Result<CommandResult, RuntimeError> {
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args);
    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| RuntimeError::Timeout(timeout))?
        .map_err(|e| RuntimeError::CommandFailed(e.to_string()))?;

    Ok(CommandResult {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

/// Runtime that executes commands in a local shell. No isolation beyond a
/// working directory; meant for development and tests.
pub struct LocalRuntime {
    workdir: PathBuf,
    plan: Mutex<Vec<PlanStep>>,
}

impl LocalRuntime {
    pub fn new(workdir: PathBuf) -> Self {
        Self {
            workdir,
            plan: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Runtime for LocalRuntime {
    fn environment(&self) -> String {
        format!("local shell ({})", std::env::consts::OS)
    }

    async fn start(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn execute_command(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, RuntimeError> {
        run_process("sh", &["-c", command], Some(&self.workdir), timeout).await
    }

    fn push_plan_step(&self, step: PlanStep) {
        self.plan.lock().push(step);
    }

    fn plan(&self) -> Option<Plan> {
        let steps = self.plan.lock().clone();
        if steps.is_empty() {
            None
        } else {
            Some(Plan { steps })
        }
    }
}

pub struct LocalRuntimeFactory {
    workdir: PathBuf,
}

impl LocalRuntimeFactory {
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

impl RuntimeFactory for LocalRuntimeFactory {
    fn provision(&self) -> Arc<dyn Runtime> {
        Arc::new(LocalRuntime::new(self.workdir.clone()))
    }
}

const CONTAINER_WORKDIR: &str = "/loot";
const DEFAULT_IMAGE: &str = "kalilinux/kali-rolling";

/// Runtime that executes commands inside an ephemeral Docker container.
/// Network-isolated by default; a host loot directory is mounted at /loot.
pub struct ContainerRuntime {
    image: String,
    project: ProjectId,
    host_loot_dir: PathBuf,
    container_id: Mutex<Option<String>>,
    plan: Mutex<Vec<PlanStep>>,
}

impl ContainerRuntime {
    pub fn new(image: Option<&str>, project: ProjectId, host_loot_dir: PathBuf) -> Self {
        Self {
            image: image.unwrap_or(DEFAULT_IMAGE).to_string(),
            project,
            host_loot_dir,
            container_id: Mutex::new(None),
            plan: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Runtime for ContainerRuntime {
    fn environment(&self) -> String {
        format!("docker container {} (network isolated)", self.image)
    }

    async fn start(&self) -> Result<(), RuntimeError> {
        if self.container_id.lock().is_some() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.host_loot_dir)
            .map_err(|e| RuntimeError::StartFailed(format!("loot dir: {e}")))?;

        let name = format!(
            "muster-worker-{}-{}",
            self.project,
            &uuid::Uuid::now_v7().simple().to_string()[..8]
        );
        let mount = format!("{}:{CONTAINER_WORKDIR}", self.host_loot_dir.display());

        let result = run_process(
            "docker",
            &[
                "run", "-d", "--rm", "--network", "none", "-v", &mount, "--name", &name,
                &self.image, "tail", "-f", "/dev/null",
            ],
            None,
            Duration::from_secs(120),
        )
        .await?;

        if !result.success() {
            return Err(RuntimeError::StartFailed(result.stderr));
        }

        let id = result.stdout.trim().to_string();
        info!(container = %id, image = %self.image, "container runtime started");
        *self.container_id.lock() = Some(id);
        Ok(())
    }

    async fn stop(&self) -> Result<(), RuntimeError> {
        let id = match self.container_id.lock().take() {
            Some(id) => id,
            None => return Ok(()),
        };
        run_process("docker", &["stop", &id], None, Duration::from_secs(60)).await?;
        Ok(())
    }

    async fn execute_command(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, RuntimeError> {
        let id = self
            .container_id
            .lock()
            .clone()
            .ok_or(RuntimeError::NotRunning)?;

        run_process(
            "docker",
            &["exec", "-w", CONTAINER_WORKDIR, &id, "sh", "-c", command],
            None,
            timeout,
        )
        .await
    }

    fn push_plan_step(&self, step: PlanStep) {
        self.plan.lock().push(step);
    }

    fn plan(&self) -> Option<Plan> {
        let steps = self.plan.lock().clone();
        if steps.is_empty() {
            None
        } else {
            Some(Plan { steps })
        }
    }
}

pub struct ContainerRuntimeFactory {
    image: Option<String>,
    project: ProjectId,
    host_loot_dir: PathBuf,
}

impl ContainerRuntimeFactory {
    pub fn new(image: Option<String>, project: ProjectId, host_loot_dir: PathBuf) -> Self {
        Self {
            image,
            project,
            host_loot_dir,
        }
    }
}

impl RuntimeFactory for ContainerRuntimeFactory {
    fn provision(&self) -> Arc<dyn Runtime> {
        Arc::new(ContainerRuntime::new(
            self.image.as_deref(),
            self.project.clone(),
            self.host_loot_dir.clone(),
        ))
    }
}
