//! Capturing and draining a composer child's stdout/stderr.

use crate::platform::OutputMode;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempPath;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::time;

/// How long a status peek may wait for output that is not there.
const PEEK_TIMEOUT: Duration = Duration::from_millis(10);
/// Most a single peek takes off a pipe.
const PEEK_LIMIT: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

/// One end of a pipe plus everything already peeked from it, so a final
/// drain still sees the whole output.
#[derive(Debug)]
pub struct Pipe<R> {
    reader: Option<R>,
    seen: Vec<u8>,
}

impl<R: AsyncRead + Unpin> Pipe<R> {
    fn new(reader: Option<R>) -> Self {
        Self {
            reader,
            seen: vec![],
        }
    }

    async fn peek(&mut self) -> String {
        let mut peeked = vec![];
        let mut buf = [0u8; 4096];
        while peeked.len() < PEEK_LIMIT {
            let Some(reader) = self.reader.as_mut() else {
                break;
            };
            match time::timeout(PEEK_TIMEOUT, reader.read(&mut buf)).await {
                Ok(Ok(0)) => self.reader = None,
                Ok(Ok(n)) => peeked.extend_from_slice(&buf[..n]),
                Ok(Err(e)) => {
                    debug!("error peeking at child output: {e}");
                    break;
                }
                Err(_) => break,
            }
        }
        self.seen.extend_from_slice(&peeked);
        String::from_utf8_lossy(&peeked).into_owned()
    }

    async fn drain(mut self, deadline: time::Instant) -> String {
        if let Some(mut reader) = self.reader.take() {
            // bytes read before the deadline stay in `seen`
            if time::timeout_at(deadline, reader.read_to_end(&mut self.seen))
                .await
                .is_err()
            {
                debug!("timed out draining child output");
            }
        }
        String::from_utf8_lossy(&self.seen).into_owned()
    }
}

/// A child's captured output, in whichever mode the platform uses.
#[derive(Debug)]
pub enum CapturedOutput {
    Pipes {
        stdout: Pipe<ChildStdout>,
        stderr: Pipe<ChildStderr>,
    },
    TempFiles {
        stdout: TempPath,
        stderr: TempPath,
    },
}

impl CapturedOutput {
    /// Points the command's stdio at the capture. Call [`attach`](Self::attach)
    /// once the child is spawned.
    pub fn prepare(mode: OutputMode, cmd: &mut Command) -> io::Result<Self> {
        match mode {
            OutputMode::Pipes => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
                Ok(Self::Pipes {
                    stdout: Pipe::new(None),
                    stderr: Pipe::new(None),
                })
            }
            OutputMode::TempFiles => {
                let (stdout, stdout_file) = temp_log("stdout")?;
                let (stderr, stderr_file) = temp_log("stderr")?;
                cmd.stdout(stdout_file).stderr(stderr_file);
                Ok(Self::TempFiles { stdout, stderr })
            }
        }
    }

    pub fn attach(&mut self, child: &mut Child) {
        if let Self::Pipes { stdout, stderr } = self {
            stdout.reader = child.stdout.take();
            stderr.reader = child.stderr.take();
        }
    }

    pub fn mode(&self) -> OutputMode {
        match self {
            Self::Pipes { .. } => OutputMode::Pipes,
            Self::TempFiles { .. } => OutputMode::TempFiles,
        }
    }

    /// Whatever output is buffered right now, without waiting for more.
    ///
    /// Always empty for temp files: the child may be mid-write.
    pub async fn read_available(&mut self, stream: Stream) -> String {
        match (self, stream) {
            (Self::Pipes { stdout, .. }, Stream::Stdout) => stdout.peek().await,
            (Self::Pipes { stderr, .. }, Stream::Stderr) => stderr.peek().await,
            (Self::TempFiles { .. }, _) => String::new(),
        }
    }

    /// Reads everything left and releases the capture. Returns `(stdout, stderr)`.
    ///
    /// Only call this once the child is dead or dying. Read failures become
    /// empty strings; temp files are deleted whether or not reading worked.
    pub async fn drain_and_close(self, timeout: Duration) -> (String, String) {
        match self {
            Self::Pipes { stdout, stderr } => {
                let deadline = time::Instant::now() + timeout;
                tokio::join!(stdout.drain(deadline), stderr.drain(deadline))
            }
            Self::TempFiles { stdout, stderr } => {
                let read = tokio::task::spawn_blocking(move || {
                    let out = (read_lossy(&stdout), read_lossy(&stderr));
                    for path in [stdout, stderr] {
                        let display = path.display().to_string();
                        if let Err(e) = path.close() {
                            debug!("failed to remove temp output {display}: {e}");
                        }
                    }
                    out
                });
                match time::timeout(timeout, read).await {
                    Ok(Ok(out)) => out,
                    Ok(Err(e)) => {
                        warn!("failed to read child output files: {e}");
                        Default::default()
                    }
                    Err(_) => {
                        warn!("timed out reading child output files");
                        Default::default()
                    }
                }
            }
        }
    }

    /// Hands output of a healthy child off for the rest of its life.
    ///
    /// Pipes are forwarded to the log by a background task so the child never
    /// blocks on a full pipe. Temp files cannot be removed while the child
    /// holds them open, so they are returned for the caller to keep until the
    /// child is stopped.
    pub fn forward(self, project_id: &str) -> Option<Self> {
        match self {
            Self::Pipes { stdout, stderr } => {
                if !stdout.seen.is_empty() || !stderr.seen.is_empty() {
                    trace!("{project_id}: discarding already-logged startup output");
                }
                if let Some(reader) = stdout.reader {
                    tokio::spawn(forward_lines(project_id.to_string(), Stream::Stdout, reader));
                }
                if let Some(reader) = stderr.reader {
                    tokio::spawn(forward_lines(project_id.to_string(), Stream::Stderr, reader));
                }
                None
            }
            temp @ Self::TempFiles { .. } => Some(temp),
        }
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(project_id: String, stream: Stream, reader: R) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if stream == Stream::Stderr && line.to_lowercase().contains("error") {
                    error!("MCP Composer {project_id} {stream}: {line}");
                } else {
                    debug!("MCP Composer {project_id} {stream}: {line}");
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("stopped forwarding {stream} for {project_id}: {e}");
                break;
            }
        }
    }
}

fn temp_log(stream: &str) -> io::Result<(TempPath, std::fs::File)> {
    let file = tempfile::Builder::new()
        .prefix(&format!("mcp_composer_{stream}_"))
        .suffix(".log")
        .tempfile()?;
    let handle = file.reopen()?;
    Ok((file.into_temp_path(), handle))
}

fn read_lossy(path: &TempPath) -> String {
    match std::fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            debug!("failed to read {}: {e}", path.display());
            String::new()
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn spawn(mode: OutputMode, script: &str) -> (Child, CapturedOutput) {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script).kill_on_drop(true);
        let mut output = CapturedOutput::prepare(mode, &mut cmd).unwrap();
        let mut child = cmd.spawn().unwrap();
        output.attach(&mut child);
        (child, output)
    }

    #[tokio::test]
    async fn test_pipes_drain_includes_peeked_output() {
        let (mut child, mut output) = spawn(
            OutputMode::Pipes,
            "echo started >&2; sleep 0.3; echo done; echo boom >&2",
        );
        time::sleep(Duration::from_millis(150)).await;
        let peeked = output.read_available(Stream::Stderr).await;
        assert_eq!(peeked, "started\n");

        child.wait().await.unwrap();
        let (stdout, stderr) = output.drain_and_close(Duration::from_secs(2)).await;
        assert_eq!(stdout, "done\n");
        assert_eq!(stderr, "started\nboom\n");
    }

    #[tokio::test]
    async fn test_peek_takes_everything_buffered() {
        let (mut child, mut output) = spawn(OutputMode::Pipes, "head -c 20000 /dev/zero | tr '\\0' x");
        child.wait().await.unwrap();
        assert_eq!(output.read_available(Stream::Stdout).await.len(), 20000);
        assert_eq!(output.read_available(Stream::Stdout).await, "");
    }

    #[tokio::test]
    async fn test_peek_does_not_block_on_silent_child() {
        let (mut child, mut output) = spawn(OutputMode::Pipes, "sleep 5");
        let started = time::Instant::now();
        assert_eq!(output.read_available(Stream::Stdout).await, "");
        assert!(started.elapsed() < Duration::from_secs(1));
        child.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_drain_is_bounded_when_pipe_stays_open() {
        // the background sleep inherits the pipe and keeps it open
        let (mut child, output) = spawn(OutputMode::Pipes, "echo partial; sleep 5 & exit 1");
        child.wait().await.unwrap();
        let started = time::Instant::now();
        let (stdout, _) = output.drain_and_close(Duration::from_millis(300)).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(stdout, "partial\n");
    }

    #[tokio::test]
    async fn test_temp_files_are_read_then_deleted() {
        let (mut child, mut output) = spawn(
            OutputMode::TempFiles,
            "echo out; echo 'address already in use' >&2; exit 3",
        );
        let paths = match &output {
            CapturedOutput::TempFiles { stdout, stderr } => {
                vec![stdout.to_path_buf(), stderr.to_path_buf()]
            }
            CapturedOutput::Pipes { .. } => panic!("expected temp files"),
        };
        assert!(paths[0].file_name().unwrap().to_string_lossy().starts_with("mcp_composer_"));

        child.wait().await.unwrap();
        assert_eq!(output.read_available(Stream::Stderr).await, "");
        let (stdout, stderr) = output.drain_and_close(Duration::from_secs(2)).await;
        assert_eq!(stdout, "out\n");
        assert_eq!(stderr, "address already in use\n");
        for path in paths {
            assert!(!path.exists(), "{} was not deleted", path.display());
        }
    }

    #[tokio::test]
    async fn test_forward_keeps_temp_files_only() {
        let (mut child, output) = spawn(OutputMode::Pipes, "echo hi");
        assert!(output.forward("p1").is_none());
        child.wait().await.unwrap();

        let (mut child, output) = spawn(OutputMode::TempFiles, "echo hi");
        let kept = output.forward("p1").unwrap();
        assert_eq!(kept.mode(), OutputMode::TempFiles);
        child.wait().await.unwrap();
        kept.drain_and_close(Duration::from_secs(2)).await;
    }
}
