use std::time::Duration;

use thiserror::Error;

use crate::adapter::AdapterState;

/// Failures of the process transport.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine output closed")]
    Closed,

    #[error("failed to write to engine: {0}")]
    Write(#[source] std::io::Error),

    #[error("failed to kill engine process: {0}")]
    Terminate(#[source] std::io::Error),

    #[error("memory usage unavailable: {0}")]
    Memory(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("engine {engine} did not send uciok within {timeout:?}")]
    HandshakeTimeout { engine: String, timeout: Duration },

    #[error("engine {engine} did not answer isready within {timeout:?}")]
    ReadyTimeout { engine: String, timeout: Duration },

    #[error("engine {0} exited during startup")]
    EngineExited(String),

    #[error("engine {engine} cannot {operation} while {state:?}")]
    InvalidState {
        engine: String,
        operation: &'static str,
        state: AdapterState,
    },

    #[error("engine {0} is not running after startup")]
    NotRunning(String),

    #[error("engine {engine} could not be killed and may be orphaned: {reason}")]
    ForceKillFailed { engine: String, reason: String },

    #[error("engine not found in config: {0}")]
    EngineNotFound(String),

    #[error("startup task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
