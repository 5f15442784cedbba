//! Child-process plumbing for external codec tools.
//!
//! A decoder is a child whose stdout is the decoded stream; an encoder is a
//! child whose stdin accepts it. stderr is drained on a helper thread so a
//! chatty tool can never block on a full pipe while we wait on stdout/stdin.

use super::{DecodeStream, EncodeSink};
use crate::error::CodecError;
use std::io::{self, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Longest stderr excerpt kept in error messages.
const MAX_STDERR_LEN: usize = 500;

/// Drains a child's stderr in the background.
struct StderrCollector {
    handle: JoinHandle<String>,
}

impl StderrCollector {
    fn start(mut stderr: impl Read + Send + 'static) -> Self {
        let handle = std::thread::spawn(move || {
            let mut output = String::new();
            if let Err(e) = stderr.read_to_string(&mut output) {
                output.push_str(&format!("(failed to read stderr: {})", e));
            }
            output
        });
        Self { handle }
    }

    fn collect(self) -> String {
        self.handle
            .join()
            .unwrap_or_else(|_| "(stderr reader panicked)".to_string())
    }
}

fn truncate_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.len() > MAX_STDERR_LEN {
        let mut end = MAX_STDERR_LEN;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &trimmed[..end])
    } else {
        trimmed.to_string()
    }
}

fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {}", code),
        None => "signal".to_string(),
    }
}

fn spawn(tool: &str, command: &mut Command) -> Result<Child, CodecError> {
    debug!(tool, command = ?command, "Spawning codec process");
    command.spawn().map_err(|source| CodecError::Spawn {
        tool: tool.to_string(),
        source,
    })
}

fn kill_and_reap(tool: &str, child: &mut Child) {
    // kill() fails if the child already exited; wait() reaps it either way
    let _ = child.kill();
    if let Err(e) = child.wait() {
        warn!(tool, error = %e, "Failed to reap codec process");
    }
}

// ============================================================================
// Decoder side
// ============================================================================

/// Decoded stream read from a child's stdout.
pub struct ChildStream {
    tool: String,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr: Option<StderrCollector>,
}

impl ChildStream {
    /// Spawn `command` with stdout piped as the decoded stream.
    pub fn spawn(tool: &str, mut command: Command) -> Result<Self, CodecError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = spawn(tool, &mut command)?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take().map(StderrCollector::start);
        Ok(Self {
            tool: tool.to_string(),
            child: Some(child),
            stdout,
            stderr,
        })
    }
}

impl Read for ChildStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stdout.as_mut() {
            Some(stdout) => stdout.read(buf),
            None => Ok(0),
        }
    }
}

impl DecodeStream for ChildStream {
    fn finish(mut self: Box<Self>) -> Result<(), CodecError> {
        drop(self.stdout.take());
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait()?;
        let stderr = self.stderr.take().map(StderrCollector::collect).unwrap_or_default();

        if !status.success() {
            return Err(CodecError::Failed {
                tool: self.tool.clone(),
                status: describe_status(status),
                stderr: truncate_stderr(&stderr),
            });
        }
        if !stderr.trim().is_empty() {
            // Non-fatal decoder diagnostics
            warn!(tool = %self.tool, "Decode: {}", truncate_stderr(&stderr));
        }
        Ok(())
    }

    fn abort(mut self: Box<Self>) {
        drop(self.stdout.take());
        if let Some(mut child) = self.child.take() {
            kill_and_reap(&self.tool, &mut child);
        }
    }
}

impl Drop for ChildStream {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            kill_and_reap(&self.tool, &mut child);
        }
    }
}

// ============================================================================
// Encoder side
// ============================================================================

/// Encoder fed through a child's stdin.
pub struct ChildSink {
    tool: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr: Option<StderrCollector>,
    stderr_is_error: bool,
}

impl ChildSink {
    /// Spawn `command` with stdin piped as the encoder input.
    ///
    /// With `stderr_is_error`, any stderr output fails the encode even when
    /// the exit status is zero (LAME reports some errors that way).
    pub fn spawn(tool: &str, mut command: Command, stderr_is_error: bool) -> Result<Self, CodecError> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let mut child = spawn(tool, &mut command)?;
        let stdin = child.stdin.take();
        let stderr = child.stderr.take().map(StderrCollector::start);
        Ok(Self {
            tool: tool.to_string(),
            child: Some(child),
            stdin,
            stderr,
            stderr_is_error,
        })
    }

    fn stdin(&mut self) -> io::Result<&mut ChildStdin> {
        self.stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "encoder input closed"))
    }
}

impl Write for ChildSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stdin()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stdin()?.flush()
    }
}

impl EncodeSink for ChildSink {
    fn finish(mut self: Box<Self>) -> Result<(), CodecError> {
        // Closing stdin signals end of input
        drop(self.stdin.take());
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait()?;
        let stderr = self.stderr.take().map(StderrCollector::collect).unwrap_or_default();

        if !status.success() {
            return Err(CodecError::Failed {
                tool: self.tool.clone(),
                status: describe_status(status),
                stderr: truncate_stderr(&stderr),
            });
        }
        if self.stderr_is_error && !stderr.trim().is_empty() {
            return Err(CodecError::Diagnostics {
                tool: self.tool.clone(),
                stderr: truncate_stderr(&stderr),
            });
        }
        Ok(())
    }

    fn abort(mut self: Box<Self>) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            kill_and_reap(&self.tool, &mut child);
        }
    }
}

impl Drop for ChildSink {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            kill_and_reap(&self.tool, &mut child);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[test]
    fn test_stream_reads_stdout_and_succeeds() {
        let mut stream = Box::new(ChildStream::spawn("sh", sh("printf hello")).unwrap());
        let mut output = String::new();
        stream.read_to_string(&mut output).unwrap();
        assert_eq!(output, "hello");
        stream.finish().unwrap();
    }

    #[test]
    fn test_stream_nonzero_exit_is_error() {
        let mut stream = Box::new(
            ChildStream::spawn("sh", sh("printf partial; echo 'bad frame' >&2; exit 3")).unwrap(),
        );
        let mut output = Vec::new();
        stream.read_to_end(&mut output).unwrap();
        assert_eq!(output, b"partial");

        match stream.finish() {
            Err(CodecError::Failed { status, stderr, .. }) => {
                assert_eq!(status, "exit code 3");
                assert_eq!(stderr, "bad frame");
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn test_sink_writes_through_stdin() {
        let temp = tempfile::tempdir().unwrap();
        let out = temp.path().join("out.bin");
        let mut sink = Box::new(
            ChildSink::spawn("sh", sh(&format!("cat > '{}'", out.display())), true).unwrap(),
        );
        sink.write_all(b"encoded bytes").unwrap();
        sink.finish().unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"encoded bytes");
    }

    #[test]
    fn test_sink_stderr_counts_as_failure_when_strict() {
        let sink = Box::new(ChildSink::spawn("sh", sh("cat > /dev/null; echo warning >&2"), true).unwrap());
        assert!(matches!(sink.finish(), Err(CodecError::Diagnostics { .. })));

        let lenient = Box::new(ChildSink::spawn("sh", sh("cat > /dev/null; echo warning >&2"), false).unwrap());
        assert!(lenient.finish().is_ok());
    }

    #[test]
    fn test_abort_kills_long_running_child() {
        let stream = Box::new(ChildStream::spawn("sh", sh("sleep 30")).unwrap());
        let started = std::time::Instant::now();
        stream.abort();
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let result = ChildStream::spawn("nope", Command::new("/nonexistent/harmonize-tool"));
        assert!(matches!(result, Err(CodecError::Spawn { .. })));
    }

    #[test]
    fn test_truncate_stderr() {
        let long = "x".repeat(MAX_STDERR_LEN + 10);
        let truncated = truncate_stderr(&long);
        assert!(truncated.ends_with("... (truncated)"));
        assert_eq!(truncate_stderr("  short \n"), "short");
    }
}
