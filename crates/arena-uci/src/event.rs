//! Engine output classification.
//!
//! [`EngineLine::parse`] recognises a single line of engine output without
//! any knowledge of the adapter state; the adapter then decides which
//! [`EngineEvent`] the line becomes for the phase it is in.

use std::fmt;

use serde::Serialize;

use crate::error::UciError;
use crate::option::EngineOption;

/// Coarse phase tags used for [`ProtocolError::context`].
pub mod context {
    pub const INITIALIZATION: &str = "initialization";
    pub const OPTIONS: &str = "options";
    pub const TERMINATION: &str = "termination";
    pub const UNKNOWN_COMMAND: &str = "unknown command";
    pub const READ: &str = "read";
}

// ── Protocol Error ───────────────────────────────────────────

/// A non-fatal protocol problem, kept for later diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolError {
    /// Phase tag, see [`context`].
    pub context: String,
    pub message: String,
}

impl ProtocolError {
    pub fn new(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.context, self.message)
    }
}

// ── Search Info ──────────────────────────────────────────────

/// Evaluation reported in an `info` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Score {
    /// Centipawns from the engine's point of view.
    Cp(i32),
    /// Mate in this many moves, negative when the engine is getting mated.
    Mate(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bound {
    Lower,
    Upper,
}

/// Fields parsed from an `info` line. Anything the engine did not send, or
/// sent in an unreadable form, stays `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchInfo {
    pub depth: Option<u32>,
    pub seldepth: Option<u32>,
    pub multipv: Option<u32>,
    pub score: Option<Score>,
    pub bound: Option<Bound>,
    pub nodes: Option<u64>,
    pub nps: Option<u64>,
    pub hashfull: Option<u32>,
    pub tbhits: Option<u64>,
    /// Search time in milliseconds.
    pub time: Option<u64>,
    pub currmove: Option<String>,
    /// Principal variation.
    pub pv: Vec<String>,
    /// Free text following `string`, up to the end of the line.
    pub string: Option<String>,
}

const INFO_KEYWORDS: &[&str] = &[
    "depth",
    "seldepth",
    "multipv",
    "score",
    "nodes",
    "nps",
    "hashfull",
    "tbhits",
    "time",
    "currmove",
    "currmovenumber",
    "cpuload",
    "pv",
    "string",
    "refutation",
    "currline",
    "wdl",
];

impl SearchInfo {
    /// Parse the tokens after `info`.
    pub fn parse(rest: &str) -> Self {
        let tokens: Vec<&str> = rest.split_whitespace().collect();
        let mut info = Self::default();
        let mut i = 0;

        while i < tokens.len() {
            let token = tokens[i];
            i += 1;
            match token {
                "depth" => info.depth = number_at(&tokens, &mut i),
                "seldepth" => info.seldepth = number_at(&tokens, &mut i),
                "multipv" => info.multipv = number_at(&tokens, &mut i),
                "nodes" => info.nodes = number_at(&tokens, &mut i),
                "nps" => info.nps = number_at(&tokens, &mut i),
                "hashfull" => info.hashfull = number_at(&tokens, &mut i),
                "tbhits" => info.tbhits = number_at(&tokens, &mut i),
                "time" => info.time = number_at(&tokens, &mut i),
                "currmove" => {
                    info.currmove = tokens.get(i).map(|mv| (*mv).to_owned());
                    i += 1;
                }
                "score" => {
                    let score: Option<fn(i32) -> Score> = match tokens.get(i).copied() {
                        Some("cp") => Some(Score::Cp),
                        Some("mate") => Some(Score::Mate),
                        _ => None,
                    };
                    let Some(score) = score else {
                        info.score = None;
                        continue;
                    };
                    i += 1;
                    let Some(value) = tokens.get(i).and_then(|v| v.parse::<i32>().ok()) else {
                        info.score = None;
                        continue;
                    };
                    i += 1;
                    info.score = Some(score(value));
                    match tokens.get(i).copied() {
                        Some("lowerbound") => {
                            info.bound = Some(Bound::Lower);
                            i += 1;
                        }
                        Some("upperbound") => {
                            info.bound = Some(Bound::Upper);
                            i += 1;
                        }
                        _ => {}
                    }
                }
                "pv" => {
                    while i < tokens.len() && !INFO_KEYWORDS.contains(&tokens[i]) {
                        info.pv.push(tokens[i].to_owned());
                        i += 1;
                    }
                }
                "string" => {
                    info.string = Some(tokens[i..].join(" "));
                    i = tokens.len();
                }
                _ => {}
            }
        }

        info
    }
}

fn number_at<T: std::str::FromStr>(tokens: &[&str], i: &mut usize) -> Option<T> {
    let value = tokens.get(*i).and_then(|t| t.parse().ok());
    *i += 1;
    value
}

// ── Engine Lines ─────────────────────────────────────────────

/// Identity announced during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Identity {
    Name(String),
    Author(String),
}

/// One line of engine output, recognised but not yet interpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineLine {
    Id(Identity),
    Option(Result<EngineOption, UciError>),
    UciOk,
    ReadyOk,
    BestMove { mv: String, ponder: Option<String> },
    Info(SearchInfo),
    /// Anything not part of the recognised grammar, including blank lines.
    Unknown(String),
}

impl EngineLine {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        let (head, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim_start()),
            None => (trimmed, ""),
        };

        match head {
            "uciok" if rest.is_empty() => Self::UciOk,
            "readyok" if rest.is_empty() => Self::ReadyOk,
            "info" => Self::Info(SearchInfo::parse(rest)),
            "option" => Self::Option(EngineOption::parse(trimmed)),
            "id" => parse_id(rest).unwrap_or_else(|| Self::Unknown(line.to_owned())),
            "bestmove" => parse_bestmove(rest).unwrap_or_else(|| Self::Unknown(line.to_owned())),
            _ => Self::Unknown(line.to_owned()),
        }
    }
}

fn parse_id(rest: &str) -> Option<EngineLine> {
    let (key, value) = rest.split_once(char::is_whitespace)?;
    let value = value.trim().to_owned();
    match key {
        "name" => Some(EngineLine::Id(Identity::Name(value))),
        "author" => Some(EngineLine::Id(Identity::Author(value))),
        _ => None,
    }
}

fn parse_bestmove(rest: &str) -> Option<EngineLine> {
    let mut tokens = rest.split_whitespace();
    let mv = tokens.next()?.to_owned();
    let ponder = match tokens.next() {
        Some("ponder") => tokens.next().map(str::to_owned),
        _ => None,
    };
    Some(EngineLine::BestMove { mv, ponder })
}

// ── Engine Events ────────────────────────────────────────────

/// What one call to the adapter's blocking read produced.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Identity(Identity),
    OptionDeclared(EngineOption),
    HandshakeComplete,
    SearchInfo(SearchInfo),
    BestMove { mv: String, ponder: Option<String> },
    ReadyOk,
    ProtocolError(ProtocolError),
    /// No line arrived before the poll deadline.
    ReadTimeout,
    EngineExited,
}
