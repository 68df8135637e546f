//! Protocol adapters.
//!
//! [`EngineAdapter`] is the capability set a worker needs from one engine,
//! independent of the protocol it speaks. [`UciAdapter`] is the UCI
//! implementation: it owns the [`ProcessChannel`], runs the handshake, keeps
//! the declared options, formats commands and classifies output.
//!
//! # Concurrency
//!
//! Commands may be sent from any number of threads; every outbound line goes
//! through the state mutex, so lines never interleave and nothing is written
//! once termination has begun. [`EngineAdapter::read_event`] expects a single
//! caller (the worker's read loop).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use arena_uci::{
    EngineEvent, EngineLine, EngineOptionSet, GameState, GoLimits, IS_READY, Identity,
    NEW_GAME, PONDER_HIT, ProtocolError, QUIT, STOP, UCI, context, format_go, format_go_ponder,
    format_position, format_set_option,
};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::channel::ProcessChannel;
use crate::config::{EngineConfig, Timeouts};
use crate::error::{ChannelError, CoreError};
use crate::lock;
use crate::naming::{IdentityAttributes, NAME_KEY};

/// Direction of a protocol line, as seen by the line hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToEngine,
    FromEngine,
}

/// Observer invoked for every line sent to or received from an engine.
pub type LineHook = Arc<dyn Fn(&str, Direction) + Send + Sync>;

/// Lifecycle of an adapter.
///
/// `Uninitialized → Initialized` happens once, when the handshake succeeds.
/// `Terminating` is entered on the first termination request and never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Uninitialized,
    Initialized,
    Terminating,
}

// ── Error Log ────────────────────────────────────────────────

/// Append-only record of the protocol errors of one adapter.
///
/// Readers get a snapshot, which may miss entries appended concurrently.
#[derive(Debug, Default)]
pub struct ErrorLog {
    entries: Mutex<Vec<ProtocolError>>,
}

impl ErrorLog {
    pub fn push(&self, error: ProtocolError) {
        lock(&self.entries).push(error);
    }

    pub fn snapshot(&self) -> Vec<ProtocolError> {
        lock(&self.entries).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries tagged with `context`.
    pub fn count(&self, context: &str) -> usize {
        lock(&self.entries)
            .iter()
            .filter(|e| e.context == context)
            .count()
    }
}

// ── Adapter Capability ───────────────────────────────────────

/// What a worker or pool needs from one engine, whatever its protocol.
///
/// Command methods return the number of bytes written; `Ok(0)` means the
/// adapter is terminating and the command was dropped.
pub trait EngineAdapter: Send + Sync + fmt::Debug {
    /// Run the handshake and bring the engine to a ready state.
    fn start(&mut self) -> Result<(), CoreError>;

    /// Ask the engine to quit, killing it if it does not. Repeated calls
    /// have no further effect.
    fn terminate(&self) -> Result<(), CoreError>;

    /// True while the adapter is initialized and the process is alive.
    fn is_running(&self) -> bool;

    fn state(&self) -> AdapterState;

    /// Wait briefly for one line of output and classify it.
    fn read_event(&self) -> EngineEvent;

    fn new_game(&self) -> Result<usize, CoreError>;

    /// Send the position and start a search with the given limits.
    fn compute_move(&self, game: &GameState, limits: &GoLimits) -> Result<usize, CoreError>;

    /// Start pondering on the position after `ponder_move`.
    fn compute_ponder(
        &self,
        game: &GameState,
        ponder_move: &str,
        limits: &GoLimits,
    ) -> Result<usize, CoreError>;

    fn ponder_hit(&self) -> Result<usize, CoreError>;

    fn stop(&self) -> Result<usize, CoreError>;

    /// Send an option without validating it against the declarations.
    fn set_option(&self, name: &str, value: Option<&str>) -> Result<usize, CoreError>;

    /// Send `isready`; the answer arrives as [`EngineEvent::ReadyOk`].
    fn request_ready(&self) -> Result<usize, CoreError>;

    /// Name announced by the engine itself.
    fn engine_name(&self) -> Option<&str>;

    fn engine_author(&self) -> Option<&str>;

    fn options(&self) -> &EngineOptionSet;

    /// Flat attributes used to disambiguate display names.
    fn identity_attributes(&self) -> IdentityAttributes;

    fn display_name(&self) -> &str;

    fn set_display_name(&mut self, name: String);

    fn errors(&self) -> Vec<ProtocolError>;

    fn memory_usage(&self) -> Result<u64, CoreError>;
}

// ── UCI Adapter ──────────────────────────────────────────────

/// UCI driver for one engine process.
pub struct UciAdapter {
    config: EngineConfig,
    timeouts: Timeouts,
    channel: Box<dyn ProcessChannel>,
    /// Guards both the state and the write path.
    state: Mutex<AdapterState>,
    options: EngineOptionSet,
    id_name: Option<String>,
    id_author: Option<String>,
    display_name: String,
    errors: ErrorLog,
    line_hook: Option<LineHook>,
}

impl fmt::Debug for UciAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UciAdapter")
            .field("display_name", &self.display_name)
            .field("state", &self.state())
            .field("id_name", &self.id_name)
            .field("options", &self.options.len())
            .field("errors", &self.errors.len())
            .finish_non_exhaustive()
    }
}

impl UciAdapter {
    /// Wrap a process channel. Nothing is sent until [`start`](EngineAdapter::start)
    /// or [`handshake`](Self::handshake).
    pub fn new(config: EngineConfig, channel: Box<dyn ProcessChannel>, timeouts: Timeouts) -> Self {
        let display_name = config.name().to_owned();
        Self {
            config,
            timeouts,
            channel,
            state: Mutex::new(AdapterState::Uninitialized),
            options: EngineOptionSet::new(),
            id_name: None,
            id_author: None,
            display_name,
            errors: ErrorLog::default(),
            line_hook: None,
        }
    }

    pub fn with_line_hook(mut self, hook: LineHook) -> Self {
        self.line_hook = Some(hook);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn error_log(&self) -> &ErrorLog {
        &self.errors
    }

    /// Send `uci` and consume output until `uciok`.
    ///
    /// Identity lines fill in the engine name and author, option lines are
    /// parsed into the option set. Malformed options and unexpected lines are
    /// recorded as protocol errors without aborting the handshake.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::HandshakeTimeout` if `uciok` does not arrive before
    /// the handshake deadline, and `CoreError::EngineExited` if the engine
    /// output closes first. The adapter stays uninitialized in both cases.
    /// Returns `CoreError::InvalidState` unless the adapter is uninitialized,
    /// or if it starts terminating before `uciok` arrives.
    #[instrument(skip(self), fields(engine = %self.display_name))]
    pub fn handshake(&mut self) -> Result<(), CoreError> {
        self.require_uninitialized("handshake")?;
        self.write_lines(&[UCI])?;

        let deadline = self.timeouts.handshake();
        let started = Instant::now();

        loop {
            let elapsed = started.elapsed();
            if elapsed >= deadline {
                self.record(
                    context::INITIALIZATION,
                    format!("no uciok within {deadline:?}"),
                );
                return Err(CoreError::HandshakeTimeout {
                    engine: self.display_name.clone(),
                    timeout: deadline,
                });
            }

            let line = match self.channel.read_line(self.timeouts.poll().min(deadline - elapsed)) {
                Ok(Some(line)) => line,
                Ok(None) => continue,
                Err(ChannelError::Closed) => {
                    self.record(context::INITIALIZATION, "engine exited during handshake");
                    return Err(CoreError::EngineExited(self.display_name.clone()));
                }
                Err(e) => return Err(e.into()),
            };
            self.mirror(&line, Direction::FromEngine);

            match EngineLine::parse(&line) {
                EngineLine::UciOk => {
                    {
                        let mut state = lock(&self.state);
                        if *state != AdapterState::Uninitialized {
                            return Err(self.invalid_state("complete handshake", *state));
                        }
                        *state = AdapterState::Initialized;
                    }
                    info!(
                        id_name = self.id_name.as_deref().unwrap_or("-"),
                        options = self.options.len(),
                        "handshake complete"
                    );
                    return Ok(());
                }
                EngineLine::Id(Identity::Name(name)) => self.id_name = Some(name),
                EngineLine::Id(Identity::Author(author)) => self.id_author = Some(author),
                EngineLine::Option(Ok(option)) => {
                    debug!(option = %option.name, kind = %option.kind, "option declared");
                    self.options.insert(option);
                }
                EngineLine::Option(Err(e)) => {
                    warn!(error = %e, "ignoring malformed option declaration");
                    self.record(context::INITIALIZATION, e.to_string());
                }
                _ => {
                    debug!(line = %line, "unexpected line during handshake");
                    self.record(
                        context::INITIALIZATION,
                        format!("unexpected line during handshake: {line}"),
                    );
                }
            }
        }
    }

    /// Send every configured option, checking each against the declarations.
    ///
    /// Undeclared or invalid values are recorded but still sent; the engine
    /// decides what to do with them.
    fn apply_configured_options(&self) -> Result<(), CoreError> {
        for (name, value) in self.config.options() {
            let value = value.to_string();
            match self.options.get(name) {
                Some(declared) => {
                    if let Err(e) = declared.validate_value(Some(&value)) {
                        warn!(engine = %self.display_name, error = %e, "configured option value is invalid");
                        self.record(context::OPTIONS, e.to_string());
                    }
                }
                None => {
                    warn!(engine = %self.display_name, option = %name, "engine does not declare configured option");
                    self.record(
                        context::OPTIONS,
                        format!("option {name} is not declared by the engine"),
                    );
                }
            }
            self.set_option(name, Some(&value))?;
        }
        Ok(())
    }

    /// Send `isready` and wait for `readyok` within the handshake deadline.
    fn sync_ready(&self) -> Result<(), CoreError> {
        self.write_lines(&[IS_READY])?;

        let deadline = self.timeouts.handshake();
        let started = Instant::now();
        while started.elapsed() < deadline {
            let wait = self.timeouts.poll().min(deadline.saturating_sub(started.elapsed()));
            match self.channel.read_line(wait) {
                Ok(Some(line)) => {
                    self.mirror(&line, Direction::FromEngine);
                    match EngineLine::parse(&line) {
                        EngineLine::ReadyOk => return Ok(()),
                        EngineLine::Info(_) => {}
                        _ => self.record(
                            context::INITIALIZATION,
                            format!("unexpected line while waiting for readyok: {line}"),
                        ),
                    }
                }
                Ok(None) => {}
                Err(ChannelError::Closed) => {
                    return Err(CoreError::EngineExited(self.display_name.clone()));
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.record(
            context::INITIALIZATION,
            format!("no readyok within {deadline:?}"),
        );
        Err(CoreError::ReadyTimeout {
            engine: self.display_name.clone(),
            timeout: deadline,
        })
    }

    /// Write lines back to back under the state lock.
    ///
    /// Holding the lock for the whole batch keeps multi-line commands
    /// together and makes the terminating check atomic with the write.
    fn write_lines(&self, lines: &[&str]) -> Result<usize, CoreError> {
        let state = lock(&self.state);
        if *state == AdapterState::Terminating {
            debug!(engine = %self.display_name, command = lines.first().copied().unwrap_or_default(), "dropping command, engine is terminating");
            return Ok(0);
        }

        let mut written = 0;
        for line in lines {
            self.mirror(line, Direction::ToEngine);
            written += self.channel.write_line(line)?;
        }
        Ok(written)
    }

    fn require_uninitialized(&self, operation: &'static str) -> Result<(), CoreError> {
        let state = *lock(&self.state);
        if state == AdapterState::Uninitialized {
            Ok(())
        } else {
            Err(self.invalid_state(operation, state))
        }
    }

    fn invalid_state(&self, operation: &'static str, state: AdapterState) -> CoreError {
        CoreError::InvalidState {
            engine: self.display_name.clone(),
            operation,
            state,
        }
    }

    fn mirror(&self, line: &str, direction: Direction) {
        trace!(engine = %self.display_name, ?direction, line, "protocol line");
        if let Some(hook) = &self.line_hook {
            hook(line, direction);
        }
    }

    fn record(&self, context: &str, message: impl Into<String>) {
        self.errors.push(ProtocolError::new(context, message));
    }

    fn protocol_error(&self, context: &str, message: String) -> EngineEvent {
        let error = ProtocolError::new(context, message);
        self.errors.push(error.clone());
        EngineEvent::ProtocolError(error)
    }

    fn base_name(&self) -> String {
        if !self.config.name().is_empty() {
            return self.config.name().to_owned();
        }
        if let Some(name) = &self.id_name {
            return name.clone();
        }
        self.config
            .cmd()
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl EngineAdapter for UciAdapter {
    #[instrument(skip(self), fields(engine = %self.display_name))]
    fn start(&mut self) -> Result<(), CoreError> {
        self.handshake()?;
        self.apply_configured_options()?;
        self.sync_ready()?;
        debug!("engine ready");
        Ok(())
    }

    #[instrument(skip(self), fields(engine = %self.display_name))]
    fn terminate(&self) -> Result<(), CoreError> {
        {
            let mut state = lock(&self.state);
            if *state == AdapterState::Terminating {
                return Ok(());
            }
            *state = AdapterState::Terminating;

            self.mirror(QUIT, Direction::ToEngine);
            if let Err(e) = self.channel.write_line(QUIT) {
                debug!(error = %e, "quit not delivered, engine presumably gone");
            }
        }

        let grace = self.timeouts.quit_grace();
        match self.channel.wait_for_exit(grace) {
            Ok(true) => {
                debug!("engine exited");
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => debug!(error = %e, "could not wait for engine exit"),
        }

        match self.channel.terminate() {
            Ok(false) => {
                debug!("engine exited before it had to be killed");
                Ok(())
            }
            Ok(true) => {
                warn!(?grace, "engine did not exit after quit, killed");
                self.record(
                    context::TERMINATION,
                    format!("engine did not exit within {grace:?} and was killed"),
                );
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to kill engine, process may be orphaned");
                self.record(context::TERMINATION, format!("failed to kill engine: {e}"));
                Err(CoreError::ForceKillFailed {
                    engine: self.display_name.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn is_running(&self) -> bool {
        *lock(&self.state) == AdapterState::Initialized && self.channel.is_running()
    }

    fn state(&self) -> AdapterState {
        *lock(&self.state)
    }

    fn read_event(&self) -> EngineEvent {
        let line = match self.channel.read_line(self.timeouts.poll()) {
            Ok(Some(line)) => line,
            Ok(None) => return EngineEvent::ReadTimeout,
            Err(ChannelError::Closed) => return EngineEvent::EngineExited,
            Err(e) => return self.protocol_error(context::READ, e.to_string()),
        };
        self.mirror(&line, Direction::FromEngine);

        match EngineLine::parse(&line) {
            EngineLine::BestMove { mv, ponder } => EngineEvent::BestMove { mv, ponder },
            EngineLine::Info(info) => EngineEvent::SearchInfo(info),
            EngineLine::ReadyOk => EngineEvent::ReadyOk,
            EngineLine::UciOk => EngineEvent::HandshakeComplete,
            EngineLine::Id(identity) => EngineEvent::Identity(identity),
            // The option set is frozen after the handshake; late declarations
            // are reported but not stored.
            EngineLine::Option(Ok(option)) => EngineEvent::OptionDeclared(option),
            EngineLine::Option(Err(e)) => self.protocol_error(context::OPTIONS, e.to_string()),
            EngineLine::Unknown(line) => {
                self.protocol_error(context::UNKNOWN_COMMAND, format!("unrecognised line: {line}"))
            }
        }
    }

    fn new_game(&self) -> Result<usize, CoreError> {
        self.write_lines(&[NEW_GAME])
    }

    fn compute_move(&self, game: &GameState, limits: &GoLimits) -> Result<usize, CoreError> {
        let position = format_position(game, None);
        let go = format_go(limits);
        self.write_lines(&[&position, &go])
    }

    fn compute_ponder(
        &self,
        game: &GameState,
        ponder_move: &str,
        limits: &GoLimits,
    ) -> Result<usize, CoreError> {
        let position = format_position(game, Some(ponder_move));
        let go = format_go_ponder(limits);
        self.write_lines(&[&position, &go])
    }

    fn ponder_hit(&self) -> Result<usize, CoreError> {
        self.write_lines(&[PONDER_HIT])
    }

    fn stop(&self) -> Result<usize, CoreError> {
        self.write_lines(&[STOP])
    }

    fn set_option(&self, name: &str, value: Option<&str>) -> Result<usize, CoreError> {
        self.write_lines(&[&format_set_option(name, value)])
    }

    fn request_ready(&self) -> Result<usize, CoreError> {
        self.write_lines(&[IS_READY])
    }

    fn engine_name(&self) -> Option<&str> {
        self.id_name.as_deref()
    }

    fn engine_author(&self) -> Option<&str> {
        self.id_author.as_deref()
    }

    fn options(&self) -> &EngineOptionSet {
        &self.options
    }

    fn identity_attributes(&self) -> IdentityAttributes {
        let mut attributes: BTreeMap<String, String> = self.config.identity_attributes();
        attributes.insert(NAME_KEY.to_owned(), self.base_name());
        attributes
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn set_display_name(&mut self, name: String) {
        self.display_name = name;
    }

    fn errors(&self) -> Vec<ProtocolError> {
        self.errors.snapshot()
    }

    fn memory_usage(&self) -> Result<u64, CoreError> {
        Ok(self.channel.memory_usage()?)
    }
}

impl Drop for UciAdapter {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            error!(engine = %self.display_name, error = %e, "engine termination failed on drop");
        }
    }
}
