//! Subprocess plumbing behind [`SystemRunner`](crate::effects::SystemRunner).

use std::io::{self, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};

use crate::effects::Invocation;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Whether `needle` appears on either stream.
    #[must_use]
    pub fn mentions(&self, needle: &str) -> bool {
        self.stdout.contains(needle) || self.stderr.contains(needle)
    }
}

/// Run to completion with both streams captured.
///
/// # Errors
/// Returns an error when the program cannot be started or its output
/// cannot be read.
pub fn capture(invocation: &Invocation) -> Result<RunOutput> {
    collect(invocation, false)
}

/// Like [`capture`], echoing both streams to the terminal as they arrive.
///
/// # Errors
/// Returns an error when the program cannot be started or its output
/// cannot be read.
pub fn stream(invocation: &Invocation) -> Result<RunOutput> {
    collect(invocation, true)
}

/// Run attached to the parent's stdio; only the exit code comes back.
///
/// # Errors
/// Returns an error when the program cannot be started.
pub fn passthrough(invocation: &Invocation) -> Result<RunOutput> {
    let status = command(invocation)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .with_context(|| format!("failed to start {}", invocation.display()))?;
    Ok(RunOutput {
        code: exit_code(status),
        ..RunOutput::default()
    })
}

fn command(invocation: &Invocation) -> Command {
    let mut command = Command::new(&invocation.program);
    command.args(&invocation.args);
    command.envs(invocation.envs.iter().map(|(key, value)| (key, value)));
    if !invocation.cwd.as_os_str().is_empty() {
        command.current_dir(&invocation.cwd);
    }
    command
}

fn collect(invocation: &Invocation, echo: bool) -> Result<RunOutput> {
    let mut child = command(invocation)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to start {}", invocation.display()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout of {} is not piped", invocation.program))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr of {} is not piped", invocation.program))?;
    let stdout = drain(stdout, echo.then(io::stdout));
    let stderr = drain(stderr, echo.then(io::stderr));
    let status = child
        .wait()
        .with_context(|| format!("failed to wait for {}", invocation.display()))?;
    Ok(RunOutput {
        code: exit_code(status),
        stdout: join(stdout, "stdout")?,
        stderr: join(stderr, "stderr")?,
    })
}

/// Read `reader` to the end on its own thread, copying into `echo` if set.
fn drain<R, W>(mut reader: R, mut echo: Option<W>) -> JoinHandle<io::Result<String>>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    thread::spawn(move || {
        let mut captured = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let read = reader.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            if let Some(echo) = echo.as_mut() {
                echo.write_all(&chunk[..read])?;
            }
            captured.extend_from_slice(&chunk[..read]);
        }
        if let Some(echo) = echo.as_mut() {
            echo.flush()?;
        }
        Ok(String::from_utf8_lossy(&captured).into_owned())
    })
}

fn join(handle: JoinHandle<io::Result<String>>, stream: &str) -> Result<String> {
    handle
        .join()
        .map_err(|_| anyhow!("{stream} reader panicked"))?
        .with_context(|| format!("failed to read {stream}"))
}

/// Signal terminations have no code.
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
