//! Engine lifecycle core.
//!
//! [`UciAdapter`] drives one engine process through the UCI handshake and
//! translates commands and output; [`PoolFactory`] starts several adapters
//! for one configuration with bounded retries and gives them distinct display
//! names. Process I/O sits behind the [`ProcessChannel`] trait.

use std::sync::{Mutex, MutexGuard, PoisonError};

mod adapter;
mod channel;
mod config;
mod diagnostics;
mod error;
mod factory;
mod monitor;
mod naming;
mod pool;
mod ticker;

#[cfg(test)]
mod testing;

pub use adapter::{AdapterState, Direction, EngineAdapter, ErrorLog, LineHook, UciAdapter};
pub use channel::{ChannelSpawner, ChildProcess, LaunchSpec, ProcessChannel, ProcessSpawner};
pub use config::{ArenaConfig, EngineConfig, OptionValue, Protocol, Timeouts, load_config};
pub use diagnostics::{CheckRecord, CheckRecorder, DiagnosticSink};
pub use error::{ChannelError, CoreError};
pub use factory::{build_adapter, create_adapters};
pub use monitor::MemoryMonitor;
pub use naming::{IdentityAttributes, NAME_KEY, disambiguate};
pub use pool::{Pool, PoolFactory, STARTUP_CHECK, STARTUP_ROUNDS};
pub use ticker::Ticker;

/// Lock a mutex, recovering the data if another thread panicked while
/// holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
