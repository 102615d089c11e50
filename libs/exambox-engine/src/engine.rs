/// Sandbox Launcher - Isolated Execution of Submitted Code
///
/// **Core Responsibility:**
/// Run one submission in one fresh container and hand back what it printed.
///
/// **Boundary:**
/// - Engine knows HOW to execute (Docker, resource limits, timeouts)
/// - Engine does NOT interpret output; that is the classifier's job
/// - Engine errors mean the sandbox itself could not be run
///
/// The [`ExecutionEngine`] trait is the seam the executor depends on;
/// [`DockerEngine`] is the production implementation.

use crate::config::{ProfileConfig, ProfileConfigManager};
use anyhow::{Context, Result};
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use exambox_common::config::Config as ServiceConfig;
use exambox_common::types::{ExecutionRequest, Profile};
use futures_util::stream::StreamExt;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Raw result of one sandbox run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the run timed out or the runtime never reported a status
    pub exit_code: Option<i64>,
    pub timed_out: bool,
    /// At least one stream hit the capture limit
    pub truncated: bool,
    pub elapsed_ms: u64,
}

/// Runs a request in an isolated environment.
///
/// Implementations return `Err` only when the environment could not be
/// provisioned or driven; whatever the submitted program does is reported
/// through [`SandboxOutput`].
pub trait ExecutionEngine: Send + Sync {
    fn run(
        &self,
        request: &ExecutionRequest,
    ) -> impl Future<Output = Result<SandboxOutput>> + Send;
}

/// stdout/stderr bytes collected under a per-stream byte limit.
///
/// Docker frames can split a multi-byte character, so bytes stay raw until
/// the run is over and each stream is decoded once.
#[derive(Debug, Default)]
struct Capture {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    truncated: bool,
}

impl Capture {
    fn push_stdout(&mut self, bytes: &[u8], limit: usize) {
        if append_bounded(&mut self.stdout, bytes, limit) {
            self.truncated = true;
        }
    }

    fn push_stderr(&mut self, bytes: &[u8], limit: usize) {
        if append_bounded(&mut self.stderr, bytes, limit) {
            self.truncated = true;
        }
    }

    /// Decoded `(stdout, stderr)`
    fn into_text(self) -> (String, String) {
        (decode(self.stdout), decode(self.stderr))
    }
}

/// Append as much of `bytes` as fits under `limit`. Returns true when
/// anything was dropped.
fn append_bounded(buf: &mut Vec<u8>, bytes: &[u8], limit: usize) -> bool {
    let remaining = limit.saturating_sub(buf.len());
    let take = bytes.len().min(remaining);
    buf.extend_from_slice(&bytes[..take]);
    take < bytes.len()
}

/// UTF-8 text of a captured stream. A character cut off by the capture
/// limit is dropped rather than replaced.
fn decode(mut bytes: Vec<u8>) -> String {
    let tail = bytes.len().saturating_sub(3);
    if let Some(lead) = (tail..bytes.len()).rev().find(|&i| bytes[i] & 0xC0 != 0x80) {
        let width = match bytes[lead] {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        if bytes.len() - lead < width {
            bytes.truncate(lead);
        }
    }
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Force-removes the container it guards.
///
/// Normal paths call [`ContainerGuard::remove`] and wait for it. If the
/// owning future is dropped first (request cancelled, panic), `Drop` spawns
/// the removal instead.
struct ContainerGuard {
    docker: Docker,
    container_id: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(docker: Docker, container_id: String) -> Self {
        Self {
            docker,
            container_id,
            armed: true,
        }
    }

    async fn remove(mut self) {
        self.armed = false;
        remove_container(&self.docker, &self.container_id).await;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let docker = self.docker.clone();
        let container_id = self.container_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    remove_container(&docker, &container_id).await;
                });
            }
            Err(_) => warn!(container_id = %container_id, "No runtime available to remove container"),
        }
    }
}

async fn remove_container(docker: &Docker, container_id: &str) {
    let options = RemoveContainerOptions {
        force: true,
        ..Default::default()
    };
    match docker.remove_container(container_id, Some(options)).await {
        Ok(()) => debug!(container_id = %container_id, "Container removed"),
        Err(e) => warn!(container_id = %container_id, error = %e, "Failed to remove container"),
    }
}

/// Docker-backed sandbox
///
/// **Per-run isolation:**
/// - Networking disabled
/// - Memory ceiling with swap pinned to the same value
/// - CPU share and process count capped
/// - `no-new-privileges`, all capabilities dropped
/// - Wall-clock timeout, after which the container is killed
/// - Bounded capture of stdout/stderr
///
/// Source code travels in the container's environment array through the
/// Docker API. It is never placed in a shell command line.
pub struct DockerEngine {
    docker: Docker,
    profiles: ProfileConfigManager,
    timeout: Duration,
    capture_limit: usize,
}

impl DockerEngine {
    /// Connect to the local container runtime
    pub fn new(profiles: ProfileConfigManager, config: &ServiceConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;

        Ok(Self {
            docker,
            profiles,
            timeout: config.timeout(),
            capture_limit: config.capture_limit_bytes,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Check that the container runtime answers
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .context("Container runtime is not reachable")?;
        Ok(())
    }

    /// Runner images that are not present locally
    pub async fn missing_images(&self) -> Vec<String> {
        let mut missing = Vec::new();
        for profile in Profile::ALL {
            let image = self.profiles.get_image(profile);
            if self.docker.inspect_image(&image).await.is_err() {
                missing.push(image);
            }
        }
        missing
    }

    /// Runner images are provisioned out-of-band; a missing one is a launch
    /// failure, never a reason to pull or build during a request.
    async fn ensure_image(&self, image: &str) -> Result<()> {
        self.docker
            .inspect_image(image)
            .await
            .with_context(|| format!("Runner image '{}' is not available", image))?;
        debug!("Image present: {}", image);
        Ok(())
    }

    fn container_config(&self, profile: &ProfileConfig, source_code: &str) -> Config<String> {
        let memory = profile.memory_limit_bytes();

        Config {
            image: Some(profile.image.clone()),
            env: Some(vec![format!("{}={}", profile.source_env, source_code)]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                memory: Some(memory),
                memory_swap: Some(memory),
                nano_cpus: Some(profile.nano_cpus()),
                pids_limit: Some(profile.pids_limit),
                network_mode: Some("none".to_string()),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                cap_drop: Some(vec!["ALL".to_string()]),
                readonly_rootfs: Some(false), // runners compile into the container fs
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Follow the container's logs until it exits, then read its status
    async fn collect(&self, container_id: &str, capture: &mut Capture) -> Option<i64> {
        let logs_options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        });

        let mut logs = self.docker.logs(container_id, logs_options);
        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message }) => capture.push_stdout(&message, self.capture_limit),
                Ok(LogOutput::StdErr { message }) => capture.push_stderr(&message, self.capture_limit),
                Ok(_) => {}
                Err(e) => {
                    warn!(container_id = %container_id, error = %e, "Error reading container logs");
                    break;
                }
            }
        }

        let wait_options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut wait = self.docker.wait_container(container_id, Some(wait_options));
        match wait.next().await {
            Some(Ok(response)) => Some(response.status_code),
            // bollard reports non-zero exits as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Some(code),
            Some(Err(e)) => {
                warn!(container_id = %container_id, error = %e, "Failed to read container exit status");
                None
            }
            None => {
                warn!(container_id = %container_id, "No wait response from container");
                None
            }
        }
    }

    #[instrument(skip(self, request), fields(profile = %request.profile, container_id = tracing::field::Empty))]
    async fn run_container(&self, request: &ExecutionRequest) -> Result<SandboxOutput> {
        let profile = self.profiles.get_config(request.profile);
        self.ensure_image(&profile.image).await?;

        let container_name = format!("exambox-{}", uuid::Uuid::new_v4());
        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(
                Some(create_options),
                self.container_config(&profile, &request.source_code),
            )
            .await
            .context("Failed to create sandbox container")?;

        let container_id = container.id;
        // Registered before anything else can fail so the container never leaks
        let guard = ContainerGuard::new(self.docker.clone(), container_id.clone());
        tracing::Span::current().record("container_id", container_id.as_str());

        let start = Instant::now();

        if let Err(e) = self
            .docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
        {
            guard.remove().await;
            return Err(e).context("Failed to start sandbox container");
        }

        let mut capture = Capture::default();
        let outcome = tokio::time::timeout(self.timeout, self.collect(&container_id, &mut capture)).await;

        let (exit_code, timed_out) = match outcome {
            Ok(code) => (code, false),
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Execution timed out, killing container"
                );
                if let Err(e) = self
                    .docker
                    .kill_container(&container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(error = %e, "Failed to kill timed-out container");
                }
                (None, true)
            }
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        guard.remove().await;

        if capture.truncated {
            warn!(limit_bytes = self.capture_limit, "Output exceeded capture limit and was truncated");
        }

        let truncated = capture.truncated;
        let (stdout, stderr) = capture.into_text();

        info!(
            exit_code = ?exit_code,
            timed_out,
            elapsed_ms,
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            "Sandbox run finished"
        );

        Ok(SandboxOutput {
            stdout,
            stderr,
            exit_code,
            timed_out,
            truncated,
            elapsed_ms,
        })
    }
}

impl ExecutionEngine for DockerEngine {
    async fn run(&self, request: &ExecutionRequest) -> Result<SandboxOutput> {
        self.run_container(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_bounded_within_limit() {
        let mut buf = Vec::new();
        assert!(!append_bounded(&mut buf, b"hello ", 16));
        assert!(!append_bounded(&mut buf, b"world", 16));
        assert_eq!(buf, b"hello world");
    }

    #[test]
    fn test_append_bounded_truncates() {
        let mut buf = b"abc".to_vec();
        assert!(append_bounded(&mut buf, b"defgh", 5));
        assert_eq!(buf, b"abcde");
        assert!(append_bounded(&mut buf, b"more", 5));
        assert_eq!(buf, b"abcde");
        assert!(!append_bounded(&mut buf, b"", 5));
    }

    #[test]
    fn test_character_split_across_frames() {
        let bytes = "é".as_bytes();
        let mut capture = Capture::default();
        capture.push_stdout(&bytes[..1], 64);
        capture.push_stdout(&bytes[1..], 64);
        let (stdout, stderr) = capture.into_text();
        assert_eq!(stdout, "é");
        assert_eq!(stderr, "");
    }

    #[test]
    fn test_limit_cut_drops_partial_character() {
        let mut capture = Capture::default();
        // "é" is two bytes; a limit of 2 cannot fit "aé"
        capture.push_stdout("aé".as_bytes(), 2);
        assert!(capture.truncated);
        assert_eq!(capture.into_text().0, "a");
    }

    #[test]
    fn test_decode_keeps_complete_multibyte_tail() {
        assert_eq!(decode("naïve €".as_bytes().to_vec()), "naïve €");
        assert_eq!(decode("🦀".as_bytes()[..3].to_vec()), "");
        assert_eq!(decode(vec![b'a', 0xFF, b'b']), "a\u{FFFD}b");
    }

    #[test]
    fn test_capture_flags_either_stream() {
        let mut capture = Capture::default();
        capture.push_stdout(b"ok", 4);
        assert!(!capture.truncated);
        capture.push_stderr(b"too long", 4);
        assert!(capture.truncated);
        assert_eq!(capture.into_text().1, "too ");
    }
}
