//! Adapter construction.

use std::path::Path;

use tracing::{debug, instrument};

use crate::adapter::{EngineAdapter, LineHook, UciAdapter};
use crate::channel::{ChannelSpawner, ProcessChannel};
use crate::config::{EngineConfig, Protocol, Timeouts};
use crate::error::CoreError;

/// Wrap a channel in the adapter for the configured protocol.
///
/// The adapter is returned unstarted.
pub fn build_adapter(
    config: EngineConfig,
    channel: Box<dyn ProcessChannel>,
    timeouts: Timeouts,
    line_hook: Option<LineHook>,
) -> Box<dyn EngineAdapter> {
    match config.protocol() {
        Protocol::Uci => {
            let adapter = UciAdapter::new(config, channel, timeouts);
            match line_hook {
                Some(hook) => Box::new(adapter.with_line_hook(hook)),
                None => Box::new(adapter),
            }
        }
    }
}

/// Start `count` processes of one executable and wrap each in an unstarted
/// [`UciAdapter`].
///
/// No handshake, retry or naming happens here; callers that want those use
/// [`PoolFactory`](crate::PoolFactory).
///
/// # Errors
///
/// Returns `CoreError::Channel` for the first process that fails to spawn.
/// Adapters created before the failure are dropped, which terminates them.
#[instrument(skip(spawner, timeouts), fields(command = %command.display()))]
pub fn create_adapters(
    spawner: &dyn ChannelSpawner,
    command: &Path,
    working_dir: Option<&Path>,
    count: usize,
    timeouts: Timeouts,
) -> Result<Vec<UciAdapter>, CoreError> {
    let name = command
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let config = EngineConfig::builder()
        .name(name)
        .cmd(command)
        .dir(working_dir.map(Path::to_path_buf))
        .build();
    let spec = config.launch_spec();

    let adapters = (0..count)
        .map(|_| -> Result<UciAdapter, CoreError> {
            let channel = spawner.spawn(&spec)?;
            Ok(UciAdapter::new(config.clone(), channel, timeouts))
        })
        .collect::<Result<Vec<_>, _>>()?;

    debug!(count = adapters.len(), "adapters created");
    Ok(adapters)
}
