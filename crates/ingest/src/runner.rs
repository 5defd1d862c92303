//! Process runner for external tools.
//!
//! Launches a subprocess, drains stdout and stderr concurrently (each split
//! into lines on `\r` or `\n`), and returns the combined output together with
//! the exit status. Both readers feed a single collector over a channel, so
//! the accumulated output has exactly one owner.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;

/// Error type for process execution
#[derive(Debug, Error)]
pub enum RunError {
    /// The process could not be started (missing binary, permissions)
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exceeded its time limit and was killed
    #[error("{program} timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    /// Waiting on the process failed
    #[error("IO error waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Which pipe a captured line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A fully described external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program name or path
    pub program: String,
    /// Arguments, passed verbatim
    pub args: Vec<String>,
    /// `nice` increment; `None` runs at normal priority
    pub niceness: Option<i32>,
    /// Kill the process if it runs longer than this
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            niceness: None,
            timeout: None,
        }
    }

    /// Append a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn niceness(mut self, niceness: Option<i32>) -> Self {
        self.niceness = niceness;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The bare program name, for log fields and error messages.
    pub fn program_name(&self) -> &str {
        std::path::Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program)
    }

    /// Human-readable command line (not shell-escaped)
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.contains(' ') {
                line.push('"');
                line.push_str(arg);
                line.push('"');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// Output captured from a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` if terminated by a signal
    pub exit_code: Option<i32>,
    /// Whether the process exited successfully
    pub success: bool,
    /// Stdout lines only, newline-joined
    pub stdout: String,
    /// Stdout and stderr lines in arrival order, newline-joined
    pub combined: String,
}

impl ProcessOutput {
    /// The last `lines` lines of combined output, for error reports.
    pub fn tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.combined.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// Runs external processes. The seam every component that shells out goes through.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run the invocation to completion (or until its timeout).
    ///
    /// A non-zero exit is not an error at this level; callers inspect
    /// `ProcessOutput::success`.
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, RunError>;
}

/// Runs invocations as real child processes via tokio.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    fn build_command(invocation: &Invocation) -> Command {
        let mut cmd = match invocation.niceness {
            Some(niceness) if cfg!(unix) => {
                let mut cmd = Command::new("nice");
                cmd.arg("-n").arg(niceness.to_string()).arg(&invocation.program);
                cmd
            }
            _ => Command::new(&invocation.program),
        };
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, RunError> {
        let program = invocation.program_name().to_string();
        tracing::debug!(command = %invocation.command_line(), "Running");

        let mut child = Self::build_command(invocation)
            .spawn()
            .map_err(|source| RunError::Spawn {
                program: program.clone(),
                source,
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(read_lines(stdout, OutputStream::Stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(read_lines(stderr, OutputStream::Stderr, tx.clone())));
        }
        drop(tx);
        let collector = tokio::spawn(collect(rx, program.clone()));

        let waited = match invocation.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(waited) => waited,
                Err(_) => {
                    tracing::warn!(program = %program, timeout = ?limit, "Process timed out, killing it");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(program = %program, error = %e, "Failed to kill timed out process");
                    }
                    for reader in readers {
                        reader.abort();
                    }
                    collector.abort();
                    return Err(RunError::TimedOut {
                        program,
                        timeout: limit,
                    });
                }
            },
            None => child.wait().await,
        };
        let status = waited.map_err(|source| RunError::Wait {
            program: program.clone(),
            source,
        })?;

        for reader in readers {
            let _ = reader.await;
        }
        let captured = collector.await.unwrap_or_default();

        tracing::debug!(program = %program, status = %status, "Process exited");
        Ok(ProcessOutput {
            exit_code: status.code(),
            success: status.success(),
            stdout: captured.stdout,
            combined: captured.combined,
        })
    }
}

#[derive(Debug, Default)]
struct Captured {
    stdout: String,
    combined: String,
}

/// Sole owner of the captured output; both pipe readers send into it.
async fn collect(mut rx: mpsc::UnboundedReceiver<(OutputStream, String)>, program: String) -> Captured {
    let mut captured = Captured::default();
    while let Some((stream, line)) = rx.recv().await {
        tracing::debug!(program = %program, "{}", line.trim_end());
        if stream == OutputStream::Stdout {
            captured.stdout.push_str(&line);
            captured.stdout.push('\n');
        }
        captured.combined.push_str(&line);
        captured.combined.push('\n');
    }
    captured
}

async fn read_lines<R>(mut reader: R, stream: OutputStream, tx: mpsc::UnboundedSender<(OutputStream, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut pending = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                for line in drain_lines(&mut pending) {
                    if tx.send((stream, line)).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::debug!(?stream, error = %e, "Pipe read failed");
                break;
            }
        }
    }
    if !pending.is_empty() {
        let _ = tx.send((stream, String::from_utf8_lossy(&pending).into_owned()));
    }
}

/// Splits complete lines off the front of `buf`, leaving any unterminated
/// tail in place. Lines end at `\r` or `\n`; empty segments are dropped.
pub(crate) fn drain_lines(buf: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, byte) in buf.iter().enumerate() {
        if *byte == b'\r' || *byte == b'\n' {
            if i > start {
                lines.push(String::from_utf8_lossy(&buf[start..i]).into_owned());
            }
            start = i + 1;
        }
    }
    buf.drain(..start);
    lines
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted stand-in for external tools.

    use super::*;
    use std::sync::Mutex;

    type Responder = Box<dyn Fn(&Invocation) -> Result<ProcessOutput, RunError> + Send + Sync>;

    /// Answers every invocation with a closure and records what was asked.
    pub struct ScriptedRunner {
        responder: Responder,
        calls: Mutex<Vec<Invocation>>,
    }

    impl ScriptedRunner {
        pub fn new<F>(responder: F) -> Self
        where
            F: Fn(&Invocation) -> Result<ProcessOutput, RunError> + Send + Sync + 'static,
        {
            Self {
                responder: Box::new(responder),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().unwrap().clone()
        }

        pub fn calls_to(&self, program: &str) -> Vec<Invocation> {
            self.calls()
                .into_iter()
                .filter(|inv| inv.program == program)
                .collect()
        }
    }

    #[async_trait]
    impl ProcessRunner for ScriptedRunner {
        async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, RunError> {
            self.calls.lock().unwrap().push(invocation.clone());
            (self.responder)(invocation)
        }
    }

    pub fn ok(stdout: &str) -> ProcessOutput {
        ProcessOutput {
            exit_code: Some(0),
            success: true,
            stdout: stdout.to_string(),
            combined: stdout.to_string(),
        }
    }

    pub fn failed(code: i32, output: &str) -> ProcessOutput {
        ProcessOutput {
            exit_code: Some(code),
            success: false,
            stdout: String::new(),
            combined: output.to_string(),
        }
    }

    /// Create the file an ffmpeg invocation writes (its last argument).
    pub fn touch_output(invocation: &Invocation) {
        if let Some(last) = invocation.args.last() {
            let path = std::path::Path::new(last);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, b"#EXTM3U\n").unwrap();
        }
    }
}
