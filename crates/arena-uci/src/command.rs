//! Outbound command formatting.
//!
//! Pure functions that render the commands a harness sends to an engine. The
//! token order produced here is relied upon by logs and tests, so it is fixed
//! even where UCI itself is lenient.

use serde::{Deserialize, Serialize};

/// Identification request that opens the handshake.
pub const UCI: &str = "uci";
/// Synchronisation request, answered by `readyok`.
pub const IS_READY: &str = "isready";
/// Announces that the next search belongs to a different game.
pub const NEW_GAME: &str = "ucinewgame";
/// Ends the current search as soon as possible.
pub const STOP: &str = "stop";
/// The opponent played the expected move while pondering.
pub const PONDER_HIT: &str = "ponderhit";
/// Asks the engine process to exit.
pub const QUIT: &str = "quit";

// ── Game State ───────────────────────────────────────────────

/// The part of a game an engine needs to know: where it started and which
/// moves were played since, in UCI long algebraic notation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    /// Starting position as FEN, `None` for the standard start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_fen: Option<String>,

    /// Moves played from the starting position, in play order.
    #[serde(default)]
    pub moves: Vec<String>,
}

impl GameState {
    /// A game from the standard starting position with no moves played.
    pub fn startpos() -> Self {
        Self::default()
    }

    /// A game starting from an explicit FEN.
    pub fn from_fen(fen: impl Into<String>) -> Self {
        Self {
            start_fen: Some(fen.into()),
            moves: Vec::new(),
        }
    }

    /// Append a played move.
    pub fn push(&mut self, mv: impl Into<String>) {
        self.moves.push(mv.into());
    }
}

/// Build the `position` command for a game.
///
/// When `ponder` is set, that move is appended after the history so the
/// engine searches the position after the expected reply.
///
/// # Examples
///
/// ```
/// use arena_uci::{GameState, format_position};
///
/// let mut game = GameState::startpos();
/// game.push("e2e4");
/// assert_eq!(format_position(&game, None), "position startpos moves e2e4");
/// ```
pub fn format_position(game: &GameState, ponder: Option<&str>) -> String {
    let mut parts = vec!["position".to_owned()];

    match game.start_fen.as_deref().map(str::trim) {
        Some(fen) if !fen.is_empty() => {
            parts.push("fen".to_owned());
            parts.push(fen.to_owned());
        }
        _ => parts.push("startpos".to_owned()),
    }

    if !game.moves.is_empty() || ponder.is_some() {
        parts.push("moves".to_owned());
        parts.extend(game.moves.iter().cloned());
        parts.extend(ponder.map(str::to_owned));
    }

    parts.join(" ")
}

// ── Search Limits ────────────────────────────────────────────

/// Constraints for one search.
///
/// Only one of `infinite`, `movetime`, `depth`, `nodes` and `mate` is
/// normally meaningful, but nothing here enforces that: whatever is set gets
/// emitted. Clock fields are always sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoLimits {
    #[serde(default)]
    pub infinite: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movetime: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u64>,
    /// Search for a mate in this many moves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mate: Option<u32>,
    /// White's remaining time in milliseconds.
    #[serde(default)]
    pub wtime: u64,
    /// Black's remaining time in milliseconds.
    #[serde(default)]
    pub btime: u64,
    #[serde(default)]
    pub winc: u64,
    #[serde(default)]
    pub binc: u64,
    /// Moves until the next time control, `0` when not applicable.
    #[serde(default)]
    pub moves_to_go: u32,
}

/// Build the `go` command for the given limits.
///
/// # Examples
///
/// ```
/// use arena_uci::{GoLimits, format_go};
///
/// let limits = GoLimits { movetime: Some(100), ..GoLimits::default() };
/// assert_eq!(format_go(&limits), "go movetime 100 wtime 0 btime 0 winc 0 binc 0");
/// ```
pub fn format_go(limits: &GoLimits) -> String {
    render_go(limits, false)
}

/// Build a `go ponder …` command; the engine searches until `ponderhit` or
/// `stop`.
pub fn format_go_ponder(limits: &GoLimits) -> String {
    render_go(limits, true)
}

fn render_go(limits: &GoLimits, ponder: bool) -> String {
    let mut parts = vec!["go".to_owned()];

    if ponder {
        parts.push("ponder".to_owned());
    }
    if limits.infinite {
        parts.push("infinite".to_owned());
    }
    if let Some(movetime) = limits.movetime {
        parts.push(format!("movetime {movetime}"));
    }
    if let Some(depth) = limits.depth {
        parts.push(format!("depth {depth}"));
    }
    if let Some(nodes) = limits.nodes {
        parts.push(format!("nodes {nodes}"));
    }
    if let Some(mate) = limits.mate {
        parts.push(format!("mate {mate}"));
    }

    parts.push(format!(
        "wtime {} btime {} winc {} binc {}",
        limits.wtime, limits.btime, limits.winc, limits.binc
    ));

    if limits.moves_to_go > 0 {
        parts.push(format!("movestogo {}", limits.moves_to_go));
    }

    parts.join(" ")
}

/// Build a `setoption` command.
///
/// No check against the engine's declared options happens here; sending
/// options an engine never declared is a legitimate conformance test.
pub fn format_set_option(name: &str, value: Option<&str>) -> String {
    match value {
        Some(value) => format!("setoption name {name} value {value}"),
        None => format!("setoption name {name}"),
    }
}
