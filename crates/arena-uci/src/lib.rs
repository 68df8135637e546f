//! UCI protocol text model.
//!
//! Everything in this crate is pure: option declarations are parsed into
//! [`EngineOption`], commands are rendered from [`GameState`] and [`GoLimits`],
//! and engine output lines are classified into [`EngineLine`]. The process
//! plumbing and the adapter state machine live in `arena-core`.

mod command;
mod error;
mod event;
mod option;

pub use command::{
    GameState, GoLimits, IS_READY, NEW_GAME, PONDER_HIT, QUIT, STOP, UCI, format_go,
    format_go_ponder, format_position, format_set_option,
};
pub use error::UciError;
pub use event::{
    Bound, EngineEvent, EngineLine, Identity, ProtocolError, Score, SearchInfo, context,
};
pub use option::{EngineOption, EngineOptionSet, OptionKind};
