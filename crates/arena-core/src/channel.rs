//! Process transport.
//!
//! [`ProcessChannel`] is the line-oriented view of an engine process that the
//! adapter relies on. [`ChildProcess`] implements it on top of
//! `std::process::Child`: a reader thread forwards stdout lines into a
//! channel so reads can be bounded with `recv_timeout`.

use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::error::ChannelError;
use crate::lock;

/// Interval between exit checks while waiting for a process to finish.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Line-oriented transport to one engine process.
///
/// All methods take `&self`; implementations synchronise internally so a
/// writer and the single reader can run on different threads.
pub trait ProcessChannel: Send + Sync + fmt::Debug {
    /// Write one line, appending the newline. Returns the bytes written.
    fn write_line(&self, line: &str) -> Result<usize, ChannelError>;

    /// Wait up to `timeout` for the next line. `Ok(None)` means nothing
    /// arrived in time; `Err(ChannelError::Closed)` means the output ended.
    fn read_line(&self, timeout: Duration) -> Result<Option<String>, ChannelError>;

    /// Wait up to `timeout` for the process to exit. Returns whether it did.
    fn wait_for_exit(&self, timeout: Duration) -> Result<bool, ChannelError>;

    /// Kill the process. Returns `false` if it had already exited and no
    /// kill was needed.
    fn terminate(&self) -> Result<bool, ChannelError>;

    fn is_running(&self) -> bool;

    /// Resident memory of the process in bytes.
    fn memory_usage(&self) -> Result<u64, ChannelError>;
}

/// Everything needed to start an engine process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub command: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

/// Creates process channels; the seam the pool uses to start engines.
pub trait ChannelSpawner: Send + Sync + fmt::Debug {
    fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessChannel>, ChannelError>;
}

/// Spawns real OS processes as [`ChildProcess`] channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSpawner;

impl ChannelSpawner for ProcessSpawner {
    fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessChannel>, ChannelError> {
        Ok(Box::new(ChildProcess::spawn(spec)?))
    }
}

// ── Child Process ────────────────────────────────────────────

/// An engine running as a child process with piped stdin and stdout.
#[derive(Debug)]
pub struct ChildProcess {
    pid: u32,
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    lines: Mutex<Receiver<String>>,
}

impl ChildProcess {
    /// Start the process and its stdout reader thread.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Spawn` if the executable cannot be started.
    pub fn spawn(spec: &LaunchSpec) -> Result<Self, ChannelError> {
        let spawn_error = |source: std::io::Error| ChannelError::Spawn {
            command: spec.command.display().to_string(),
            source,
        };

        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(spawn_error)?;
        let pid = child.id();

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(spawn_error(std::io::Error::other("engine pipes unavailable")));
        };

        let (tx, rx) = mpsc::channel();
        let reader = thread::Builder::new()
            .name(format!("engine-reader-{pid}"))
            .spawn(move || {
                let mut reader = BufReader::new(stdout);
                let mut buf = Vec::new();
                loop {
                    buf.clear();
                    match reader.read_until(b'\n', &mut buf) {
                        Ok(0) => break,
                        Ok(_) => {
                            let line = String::from_utf8_lossy(&buf);
                            let line = line.trim_end_matches(['\r', '\n']).to_owned();
                            if tx.send(line).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            trace!(pid, error = %e, "engine stdout read failed");
                            break;
                        }
                    }
                }
            });
        if let Err(e) = reader {
            let _ = child.kill();
            return Err(spawn_error(e));
        }

        debug!(pid, command = %spec.command.display(), "engine process started");

        Ok(Self {
            pid,
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            lines: Mutex::new(rx),
        })
    }

    /// OS process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl ProcessChannel for ChildProcess {
    fn write_line(&self, line: &str) -> Result<usize, ChannelError> {
        let mut stdin = lock(&self.stdin);
        stdin
            .write_all(line.as_bytes())
            .map_err(ChannelError::Write)?;
        stdin.write_all(b"\n").map_err(ChannelError::Write)?;
        stdin.flush().map_err(ChannelError::Write)?;
        Ok(line.len() + 1)
    }

    fn read_line(&self, timeout: Duration) -> Result<Option<String>, ChannelError> {
        match lock(&self.lines).recv_timeout(timeout) {
            Ok(line) => Ok(Some(line)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ChannelError::Closed),
        }
    }

    fn wait_for_exit(&self, timeout: Duration) -> Result<bool, ChannelError> {
        let deadline = Instant::now() + timeout;
        loop {
            if lock(&self.child).try_wait()?.is_some() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(EXIT_POLL_INTERVAL.min(deadline - now));
        }
    }

    fn terminate(&self) -> Result<bool, ChannelError> {
        let mut child = lock(&self.child);
        if child.try_wait()?.is_some() {
            return Ok(false);
        }
        child.kill().map_err(ChannelError::Terminate)?;
        child.wait().map_err(ChannelError::Terminate)?;
        Ok(true)
    }

    fn is_running(&self) -> bool {
        matches!(lock(&self.child).try_wait(), Ok(None))
    }

    fn memory_usage(&self) -> Result<u64, ChannelError> {
        resident_memory(self.pid)
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        let child = match self.child.get_mut() {
            Ok(child) => child,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Ok(None) = child.try_wait() {
            warn!(pid = self.pid, "engine process still running on drop, killing");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(target_os = "linux")]
fn resident_memory(pid: u32) -> Result<u64, ChannelError> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status"))?;
    parse_vm_rss(&status)
        .ok_or_else(|| ChannelError::Memory(format!("no VmRSS entry for pid {pid}")))
}

#[cfg(not(target_os = "linux"))]
fn resident_memory(pid: u32) -> Result<u64, ChannelError> {
    Err(ChannelError::Memory(format!(
        "memory query not supported on this platform (pid {pid})"
    )))
}

/// Extract `VmRSS` from `/proc/<pid>/status` contents, in bytes.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> LaunchSpec {
        LaunchSpec {
            command: PathBuf::from("sh"),
            args: vec!["-c".to_owned(), script.to_owned()],
            working_dir: None,
        }
    }

    #[test]
    fn test_should_parse_vm_rss_from_status() {
        let status = "Name:\tstockfish\nVmPeak:\t  9000 kB\nVmRSS:\t  2048 kB\nThreads:\t1\n";
        assert_eq!(parse_vm_rss(status), Some(2048 * 1024));
        assert_eq!(parse_vm_rss("Name:\tx\n"), None);
    }

    #[test]
    fn test_should_fail_to_spawn_missing_executable() {
        let spec = LaunchSpec {
            command: PathBuf::from("/nonexistent/engine"),
            args: Vec::new(),
            working_dir: None,
        };
        let result = ChildProcess::spawn(&spec);
        assert!(matches!(result, Err(ChannelError::Spawn { .. })));
    }

    #[test]
    fn test_should_echo_lines_through_child_process() {
        let process = ChildProcess::spawn(&shell("while read line; do echo \"got $line\"; done"))
            .expect("should spawn sh");

        assert_eq!(process.write_line("uci").expect("should write"), 4);
        let line = process
            .read_line(Duration::from_secs(5))
            .expect("should read");
        assert_eq!(line.as_deref(), Some("got uci"));
        assert!(process.is_running());

        assert!(process.terminate().expect("should kill"));
        assert!(!process.is_running());
        assert!(!process.terminate().expect("already exited"));
    }

    #[test]
    fn test_should_time_out_read_without_output() {
        let process = ChildProcess::spawn(&shell("sleep 5")).expect("should spawn sh");
        let line = process
            .read_line(Duration::from_millis(20))
            .expect("should not fail");
        assert!(line.is_none());
        process.terminate().expect("should kill");
    }

    #[test]
    fn test_should_report_closed_output_and_exit() {
        let process = ChildProcess::spawn(&shell("echo bye")).expect("should spawn sh");
        assert_eq!(
            process
                .read_line(Duration::from_secs(5))
                .expect("should read")
                .as_deref(),
            Some("bye")
        );
        assert!(matches!(
            process.read_line(Duration::from_secs(5)),
            Err(ChannelError::Closed)
        ));
        assert!(
            process
                .wait_for_exit(Duration::from_secs(5))
                .expect("should wait")
        );
    }

    #[test]
    fn test_should_not_kill_process_that_already_exited() {
        let process = ChildProcess::spawn(&shell("exit 0")).expect("should spawn sh");
        assert!(
            process
                .wait_for_exit(Duration::from_secs(5))
                .expect("should wait")
        );
        assert!(!process.terminate().expect("should not fail"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_should_read_memory_usage_of_running_process() {
        let process = ChildProcess::spawn(&shell("sleep 5")).expect("should spawn sh");
        let bytes = process.memory_usage().expect("should read memory");
        assert!(bytes > 0);
        process.terminate().expect("should kill");
    }
}
