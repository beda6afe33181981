use std::fs::OpenOptions;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use crate::domain::ProvisioningOutcome;
use crate::error::AnyVideoError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs `command` to completion, killing it once `timeout` elapses.
pub fn run_with_timeout(command: &mut Command, timeout: Duration) -> Result<Output, AnyVideoError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = command
        .spawn()
        .map_err(|err| AnyVideoError::Process(err.to_string()))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_reader = thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stdout {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    });
    let stderr_reader = thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stderr {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    });

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if started.elapsed() >= timeout => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(AnyVideoError::OperationTimeout(format!(
                    "{:?} exceeded {}s",
                    command.get_program(),
                    timeout.as_secs()
                )));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(err) => return Err(AnyVideoError::Process(err.to_string())),
        }
    };

    Ok(Output {
        status,
        stdout: stdout_reader.join().unwrap_or_default(),
        stderr: stderr_reader.join().unwrap_or_default(),
    })
}

/// Last non-empty line of a tool's stderr, or a generic message.
pub fn stderr_summary(output: &Output, program: &str) -> String {
    String::from_utf8_lossy(&output.stderr)
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("command failed: {program}"))
}

/// Work that outlives the invocation that starts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachedTask {
    Setup,
    Update,
}

impl DetachedTask {
    pub fn subcommand(&self) -> &'static str {
        match self {
            DetachedTask::Setup => "run-setup",
            DetachedTask::Update => "run-update",
        }
    }
}

/// Starts detached tasks. Completion is never awaited; later invocations
/// observe it through lock and marker files.
pub trait Launcher: Send + Sync {
    fn launch(&self, task: DetachedTask) -> ProvisioningOutcome;
}

/// Re-executes a program (normally the current executable) with a hidden
/// worker subcommand, detached from the caller's process group.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    base_args: Vec<String>,
    log_path: Option<PathBuf>,
}

impl ProcessLauncher {
    pub fn new(program: PathBuf, base_args: Vec<String>, log_path: Option<PathBuf>) -> Self {
        Self {
            program,
            base_args,
            log_path,
        }
    }

    pub fn current_exe(base_args: Vec<String>, log_path: Option<PathBuf>) -> Result<Self, AnyVideoError> {
        let program =
            std::env::current_exe().map_err(|err| AnyVideoError::Process(err.to_string()))?;
        Ok(Self::new(program, base_args, log_path))
    }

    fn command(&self, task: DetachedTask) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.base_args).arg(task.subcommand());
        command
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, task: DetachedTask) -> ProvisioningOutcome {
        let mut command = self.command(task);
        command.stdin(Stdio::null()).stdout(Stdio::null());
        let log = self.log_path.as_ref().and_then(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
        match log {
            Some(file) => command.stderr(Stdio::from(file)),
            None => command.stderr(Stdio::null()),
        };
        detach(&mut command);

        match command.spawn() {
            Ok(child) => {
                info!(task = task.subcommand(), pid = child.id(), "detached task started");
                ProvisioningOutcome::Ready
            }
            Err(err) => ProvisioningOutcome::Failed(AnyVideoError::Process(err.to_string())),
        }
    }
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;

    command.process_group(0);
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;

    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut Command) {}
