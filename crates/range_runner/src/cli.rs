//! Process-based command runner.
//!
//! Runs external tools as child processes on the host, or through
//! `docker run`/`podman run` when the command spec names an image.

use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::command::{CommandSpec, ContainerImage, RunConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandRunner, ExecutionResult};

/// Mount point of the working directory inside a tool container.
const CONTAINER_WORKDIR: &str = "/workspace";

/// Program used to start tool containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    #[default]
    Docker,
    Podman,
}

impl ContainerRuntime {
    pub fn program(&self) -> &'static str {
        match self {
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::Podman => "podman",
        }
    }
}

impl fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogStream::Stdout => f.write_str("stdout"),
            LogStream::Stderr => f.write_str("stderr"),
        }
    }
}

/// One line of tool output.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub message: String,
}

/// Receives every output line as it is read.
pub type LogHandler = Arc<dyn Fn(LogLine) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliRunnerOptions {
    pub container_runtime: ContainerRuntime,
    /// Log commands instead of running them
    pub dry_run: bool,
    /// Echo output lines to stdout with timestamps
    pub ci_mode: bool,
}

impl Default for CliRunnerOptions {
    fn default() -> Self {
        Self {
            container_runtime: ContainerRuntime::default(),
            dry_run: false,
            ci_mode: std::env::var("CI").is_ok(),
        }
    }
}

impl CliRunnerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn ci_mode(mut self) -> Self {
        self.ci_mode = true;
        self
    }

    pub fn with_runtime(mut self, runtime: ContainerRuntime) -> Self {
        self.container_runtime = runtime;
        self
    }
}

#[derive(Clone)]
struct LineSink {
    ci_mode: bool,
    handler: Option<LogHandler>,
}

impl LineSink {
    fn emit(&self, stream: LogStream, message: &str) {
        let line = LogLine {
            timestamp: Utc::now(),
            stream,
            message: message.to_string(),
        };
        debug!("[{}] {}", line.stream, line.message);
        if self.ci_mode {
            println!(
                "[{}] [{}] {}",
                line.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                line.stream,
                line.message
            );
        }
        if let Some(handler) = &self.handler {
            handler(line);
        }
    }
}

async fn collect_lines<R>(reader: R, stream: LogStream, sink: LineSink) -> String
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut captured = String::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                // tools may print non-UTF-8 bytes; keep reading past them
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']);
                sink.emit(stream, line);
                captured.push_str(line);
                captured.push('\n');
            }
            Err(e) => {
                warn!("Stopped reading {}: {}", stream, e);
                break;
            }
        }
    }
    captured
}

/// Runs commands as child processes.
pub struct CliRunner {
    options: CliRunnerOptions,
    log_handler: Option<LogHandler>,
}

impl CliRunner {
    pub fn new(options: CliRunnerOptions) -> Self {
        Self {
            options,
            log_handler: None,
        }
    }

    pub fn with_log_handler(mut self, handler: LogHandler) -> Self {
        self.log_handler = Some(handler);
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }

    /// `run` arguments for `spec` inside `image`, working directory mounted
    /// at `/workspace`.
    fn container_args(spec: &CommandSpec, image: &ContainerImage) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--rm".to_string()];

        if let Some(workdir) = &spec.workdir {
            args.extend([
                "-v".to_string(),
                format!("{}:{}", workdir.display(), CONTAINER_WORKDIR),
                "-w".to_string(),
                CONTAINER_WORKDIR.to_string(),
            ]);
        }
        for (key, value) in &spec.env {
            args.extend(["-e".to_string(), format!("{}={}", key, value)]);
        }

        args.extend(["--entrypoint".to_string(), spec.program.clone(), image.to_string()]);
        args.extend(spec.args.iter().cloned());
        args
    }

    async fn spawn_and_wait(&self, spec: &CommandSpec, run_config: &RunConfig) -> RunnerResult<(i64, String, String)> {
        let mut cmd = match &spec.container {
            Some(image) => {
                let mut cmd = Command::new(self.options.container_runtime.program());
                cmd.args(Self::container_args(spec, image));
                cmd
            }
            None => {
                let mut cmd = Command::new(&spec.program);
                cmd.args(&spec.args).envs(&spec.env);
                if let Some(dir) = &spec.workdir {
                    cmd.current_dir(dir);
                }
                cmd
            }
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RunnerError::ProgramNotAvailable(spec.program.clone()),
            _ => RunnerError::ExecutionFailed(format!("could not start {}: {}", spec.program, e)),
        })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(RunnerError::ExecutionFailed("output pipes were not captured".to_string()));
        };
        let sink = LineSink {
            ci_mode: self.options.ci_mode,
            handler: self.log_handler.clone(),
        };
        let stdout_task = tokio::spawn(collect_lines(stdout, LogStream::Stdout, sink.clone()));
        let stderr_task = tokio::spawn(collect_lines(stderr, LogStream::Stderr, sink));

        let status = if run_config.timeout_seconds == 0 {
            child.wait().await?
        } else {
            let limit = Duration::from_secs(run_config.timeout_seconds);
            match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        warn!("Could not kill {}: {}", spec.program, e);
                    }
                    return Err(RunnerError::Timeout {
                        command: spec.command_line(),
                        seconds: run_config.timeout_seconds,
                    });
                }
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        Ok((status.code().map(i64::from).unwrap_or(-1), stdout, stderr))
    }
}

#[async_trait]
impl CommandRunner for CliRunner {
    async fn is_available(&self, program: &str) -> RunnerResult<bool> {
        let status = Command::new(program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        Ok(matches!(status, Ok(s) if s.success()))
    }

    async fn run(&self, spec: &CommandSpec, run_config: &RunConfig) -> RunnerResult<ExecutionResult> {
        let command = spec.command_line();
        let started_at = Utc::now();

        if self.options.dry_run {
            info!("[DRY-RUN] {}", command);
            return Ok(ExecutionResult {
                stdout: format!("[DRY-RUN] {}", command),
                command,
                exit_code: 0,
                stderr: String::new(),
                started_at,
                finished_at: started_at,
                duration_ms: 0,
            });
        }

        match &spec.container {
            Some(image) => debug!("Running in {} ({}): {}", image, self.options.container_runtime, command),
            None => debug!("Running: {}", command),
        }
        let (exit_code, stdout, stderr) = self.spawn_and_wait(spec, run_config).await?;
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

        if exit_code == 0 {
            debug!("`{}` finished in {}ms", command, duration_ms);
        } else {
            warn!("`{}` exited with {} after {}ms", command, exit_code, duration_ms);
        }

        Ok(ExecutionResult {
            command,
            exit_code,
            stdout,
            stderr,
            started_at,
            finished_at,
            duration_ms,
        })
    }
}
