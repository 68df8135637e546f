//! Scripted engines for unit tests.
//!
//! A [`ScriptHandle`] describes how a fake engine answers each command; the
//! [`ScriptedChannel`] it hands out implements [`ProcessChannel`] against
//! that script, and the handle stays behind to inspect what was written.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::channel::{ChannelSpawner, LaunchSpec, ProcessChannel};
use crate::config::Timeouts;
use crate::error::ChannelError;
use crate::lock;

/// Short timeouts so failing handshakes do not slow the suite down.
pub fn test_timeouts() -> Timeouts {
    Timeouts::builder()
        .handshake_ms(200)
        .poll_ms(5)
        .quit_grace_ms(50)
        .build()
}

#[derive(Debug)]
struct Script {
    /// Keyed by the first token of a command.
    replies: HashMap<String, Vec<String>>,
    pending: VecDeque<String>,
    written: Vec<String>,
    alive: bool,
    exit_on_quit: bool,
    exits_late: bool,
    kill_fails: bool,
    closed: bool,
    kills: usize,
    memory: u64,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            replies: HashMap::new(),
            pending: VecDeque::new(),
            written: Vec::new(),
            alive: true,
            exit_on_quit: true,
            exits_late: false,
            kill_fails: false,
            closed: false,
            kills: 0,
            memory: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptHandle(Arc<Mutex<Script>>);

impl ScriptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// A well-behaved engine with one spin option.
    pub fn uci_engine(name: &str) -> Self {
        Self::new()
            .reply_to(
                "uci",
                &[
                    &format!("id name {name}"),
                    "id author Tester",
                    "option name Hash type spin default 1 min 1 max 2",
                    "uciok",
                ],
            )
            .reply_to("isready", &["readyok"])
    }

    pub fn reply_to(self, command: &str, lines: &[&str]) -> Self {
        lock(&self.0).replies.insert(
            command.to_owned(),
            lines.iter().map(|l| (*l).to_owned()).collect(),
        );
        self
    }

    pub fn channel(&self) -> ScriptedChannel {
        ScriptedChannel(self.clone())
    }

    pub fn written(&self) -> Vec<String> {
        lock(&self.0).written.clone()
    }

    pub fn clear_written(&self) {
        lock(&self.0).written.clear();
    }

    pub fn push_output(&self, line: &str) {
        lock(&self.0).pending.push_back(line.to_owned());
    }

    /// End the output stream once pending lines are drained.
    pub fn close_output(&self) {
        lock(&self.0).closed = true;
    }

    pub fn set_alive(&self, alive: bool) {
        lock(&self.0).alive = alive;
    }

    pub fn set_exit_on_quit(&self, exit: bool) {
        lock(&self.0).exit_on_quit = exit;
    }

    /// The engine ignores `quit` long enough to miss the grace period, then
    /// exits on its own before it is killed.
    pub fn set_exits_late(&self, late: bool) {
        let mut script = lock(&self.0);
        script.exits_late = late;
        if late {
            script.exit_on_quit = false;
        }
    }

    pub fn set_kill_fails(&self, fails: bool) {
        lock(&self.0).kill_fails = fails;
    }

    pub fn set_memory(&self, bytes: u64) {
        lock(&self.0).memory = bytes;
    }

    /// Number of kill attempts.
    pub fn kills(&self) -> usize {
        lock(&self.0).kills
    }

    pub fn is_alive(&self) -> bool {
        lock(&self.0).alive
    }
}

#[derive(Debug)]
pub struct ScriptedChannel(ScriptHandle);

impl ProcessChannel for ScriptedChannel {
    fn write_line(&self, line: &str) -> Result<usize, ChannelError> {
        let mut script = lock(&(self.0).0);
        if !script.alive {
            return Err(ChannelError::Write(io::Error::from(io::ErrorKind::BrokenPipe)));
        }
        script.written.push(line.to_owned());

        let command = line.split_whitespace().next().unwrap_or_default();
        if command == "quit" && script.exit_on_quit {
            script.alive = false;
            script.closed = true;
        }
        if let Some(replies) = script.replies.get(command).cloned() {
            script.pending.extend(replies);
        }
        Ok(line.len() + 1)
    }

    fn read_line(&self, timeout: Duration) -> Result<Option<String>, ChannelError> {
        {
            let mut script = lock(&(self.0).0);
            if let Some(line) = script.pending.pop_front() {
                return Ok(Some(line));
            }
            if script.closed {
                return Err(ChannelError::Closed);
            }
        }
        thread::sleep(timeout.min(Duration::from_millis(2)));
        Ok(None)
    }

    fn wait_for_exit(&self, timeout: Duration) -> Result<bool, ChannelError> {
        if !self.0.is_alive() {
            return Ok(true);
        }
        thread::sleep(timeout.min(Duration::from_millis(5)));
        let mut script = lock(&(self.0).0);
        if script.exits_late {
            script.alive = false;
            script.closed = true;
            return Ok(false);
        }
        Ok(!script.alive)
    }

    fn terminate(&self) -> Result<bool, ChannelError> {
        let mut script = lock(&(self.0).0);
        if !script.alive {
            return Ok(false);
        }
        script.kills += 1;
        if script.kill_fails {
            return Err(ChannelError::Terminate(io::Error::from(
                io::ErrorKind::PermissionDenied,
            )));
        }
        script.alive = false;
        script.closed = true;
        Ok(true)
    }

    fn is_running(&self) -> bool {
        self.0.is_alive()
    }

    fn memory_usage(&self) -> Result<u64, ChannelError> {
        Ok(lock(&(self.0).0).memory)
    }
}

type ScriptFactory = dyn Fn(usize) -> Option<ScriptHandle> + Send + Sync;

/// Spawner whose n-th attempt (counting from zero) gets the script returned
/// by the closure, or a spawn failure when it returns `None`.
pub struct ScriptedSpawner {
    factory: Box<ScriptFactory>,
    attempts: AtomicUsize,
    handles: Mutex<Vec<ScriptHandle>>,
}

impl std::fmt::Debug for ScriptedSpawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedSpawner")
            .field("attempts", &self.attempts())
            .finish_non_exhaustive()
    }
}

impl ScriptedSpawner {
    pub fn new(factory: impl Fn(usize) -> Option<ScriptHandle> + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            attempts: AtomicUsize::new(0),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Scripts handed out so far, in spawn order.
    pub fn handles(&self) -> Vec<ScriptHandle> {
        lock(&self.handles).clone()
    }
}

impl ChannelSpawner for ScriptedSpawner {
    fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessChannel>, ChannelError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        match (self.factory)(attempt) {
            Some(handle) => {
                lock(&self.handles).push(handle.clone());
                Ok(Box::new(handle.channel()))
            }
            None => Err(ChannelError::Spawn {
                command: spec.command.display().to_string(),
                source: io::Error::from(io::ErrorKind::NotFound),
            }),
        }
    }
}
