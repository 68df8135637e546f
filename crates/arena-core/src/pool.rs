//! Engine pools.
//!
//! A [`PoolFactory`] starts several engine instances concurrently, either
//! copies of one configuration or one per given configuration. Each instance gets up to [`STARTUP_ROUNDS`] attempts; slots
//! that still fail after the last round are left out, so a pool can be
//! smaller than requested. Every failure is reported to the factory's
//! [`DiagnosticSink`] under [`STARTUP_CHECK`].

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};
use typed_builder::TypedBuilder;

use crate::adapter::{EngineAdapter, LineHook};
use crate::channel::{ChannelSpawner, ProcessSpawner};
use crate::config::{EngineConfig, Timeouts};
use crate::diagnostics::DiagnosticSink;
use crate::error::CoreError;
use crate::factory::build_adapter;
use crate::naming::disambiguate;

/// Startup attempts per slot.
pub const STARTUP_ROUNDS: usize = 3;

/// Check name used for startup failures.
pub const STARTUP_CHECK: &str = "engine startup";

/// Builds [`Pool`]s. `config` is the configuration [`PoolFactory::create`]
/// starts copies of.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use arena_core::{CheckRecorder, EngineConfig, PoolFactory};
///
/// # async fn example() {
/// let factory = PoolFactory::builder()
///     .config(EngineConfig::builder().name("Foo").cmd("/usr/bin/foo").build())
///     .diagnostics(Arc::new(CheckRecorder::new()))
///     .build();
///
/// let pool = factory.create(4).await;
/// for engine in &pool {
///     println!("{}", engine.display_name());
/// }
/// # }
/// ```
#[derive(Clone, TypedBuilder)]
pub struct PoolFactory {
    config: EngineConfig,

    #[builder(default)]
    timeouts: Timeouts,

    /// How engine processes are started.
    #[builder(default = Arc::new(ProcessSpawner) as Arc<dyn ChannelSpawner>)]
    spawner: Arc<dyn ChannelSpawner>,

    /// Receives one failure record per failed slot per round.
    diagnostics: Arc<dyn DiagnosticSink>,

    /// Installed on every adapter before it starts.
    #[builder(default, setter(strip_option))]
    line_hook: Option<LineHook>,
}

impl fmt::Debug for PoolFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolFactory")
            .field("config", &self.config)
            .field("timeouts", &self.timeouts)
            .field("spawner", &self.spawner)
            .field("line_hook", &self.line_hook.is_some())
            .finish_non_exhaustive()
    }
}

impl PoolFactory {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start `count` engines of the factory's configuration and return
    /// those that came up.
    pub async fn create(&self, count: usize) -> Pool {
        self.create_each(vec![self.config.clone(); count]).await
    }

    /// Start one engine per configuration and return those that came up.
    ///
    /// All pending slots of a round start concurrently on the blocking pool
    /// and the round completes only when every one has finished. Later
    /// rounds retry only the failed slots. Survivors keep their slot order
    /// and get display names disambiguated across the whole pool, so members
    /// sharing a name but not a configuration are told apart.
    #[instrument(skip_all, fields(engine = %self.config.name(), slots = configs.len()))]
    pub async fn create_each(&self, configs: Vec<EngineConfig>) -> Pool {
        let count = configs.len();
        let mut slots: Vec<Option<Box<dyn EngineAdapter>>> = (0..count).map(|_| None).collect();

        for round in 1..=STARTUP_ROUNDS {
            let pending: Vec<usize> = slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.is_none())
                .map(|(index, _)| index)
                .collect();
            if pending.is_empty() {
                break;
            }
            debug!(round, pending = pending.len(), "starting engines");

            let tasks = pending.iter().map(|&index| {
                let config = configs[index].clone();
                let spawner = Arc::clone(&self.spawner);
                let timeouts = self.timeouts;
                let hook = self.line_hook.clone();
                tokio::task::spawn_blocking(move || {
                    start_engine(spawner.as_ref(), config, timeouts, hook)
                })
            });
            let results = join_all(tasks).await;

            for (index, result) in pending.into_iter().zip(results) {
                let outcome = result.unwrap_or_else(|e| Err(CoreError::Task(e.to_string())));
                match outcome {
                    Ok(adapter) => slots[index] = Some(adapter),
                    Err(e) => {
                        warn!(slot = index, round, error = %e, "engine failed to start");
                        let message = format!(
                            "{} slot {index} round {round}/{STARTUP_ROUNDS}: {e}",
                            configs[index].name()
                        );
                        self.diagnostics.record(STARTUP_CHECK, false, &message);
                    }
                }
            }
        }

        let mut adapters: Vec<Box<dyn EngineAdapter>> = slots.into_iter().flatten().collect();
        if adapters.len() < count {
            warn!(
                requested = count,
                started = adapters.len(),
                "some engines never started and were dropped"
            );
        }

        let attributes: Vec<_> = adapters.iter().map(|a| a.identity_attributes()).collect();
        for (adapter, name) in adapters.iter_mut().zip(disambiguate(&attributes)) {
            adapter.set_display_name(name);
        }

        info!(requested = count, started = adapters.len(), "pool ready");
        Pool { adapters }
    }
}

/// Spawn a process, wrap it and run startup. A failed adapter is dropped
/// here, which terminates its process.
fn start_engine(
    spawner: &dyn ChannelSpawner,
    config: EngineConfig,
    timeouts: Timeouts,
    line_hook: Option<LineHook>,
) -> Result<Box<dyn EngineAdapter>, CoreError> {
    let channel = spawner.spawn(&config.launch_spec())?;
    let mut adapter = build_adapter(config, channel, timeouts, line_hook);
    adapter.start()?;
    if !adapter.is_running() {
        return Err(CoreError::NotRunning(adapter.display_name().to_owned()));
    }
    Ok(adapter)
}

// ── Pool ─────────────────────────────────────────────────────

/// Started engines, in slot order.
#[derive(Debug, Default)]
pub struct Pool {
    adapters: Vec<Box<dyn EngineAdapter>>,
}

impl Pool {
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&dyn EngineAdapter> {
        self.adapters.get(index).map(|adapter| &**adapter)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn EngineAdapter> {
        self.adapters.iter().map(|adapter| &**adapter)
    }

    pub fn into_inner(self) -> Vec<Box<dyn EngineAdapter>> {
        self.adapters
    }
}

impl IntoIterator for Pool {
    type Item = Box<dyn EngineAdapter>;
    type IntoIter = std::vec::IntoIter<Box<dyn EngineAdapter>>;

    fn into_iter(self) -> Self::IntoIter {
        self.adapters.into_iter()
    }
}

impl<'a> IntoIterator for &'a Pool {
    type Item = &'a Box<dyn EngineAdapter>;
    type IntoIter = std::slice::Iter<'a, Box<dyn EngineAdapter>>;

    fn into_iter(self) -> Self::IntoIter {
        self.adapters.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::adapter::AdapterState;
    use crate::diagnostics::CheckRecorder;
    use crate::testing::{ScriptHandle, ScriptedSpawner, test_timeouts};

    fn factory(
        config: EngineConfig,
        spawner: ScriptedSpawner,
    ) -> (PoolFactory, Arc<CheckRecorder>, Arc<ScriptedSpawner>) {
        let recorder = Arc::new(CheckRecorder::new());
        let spawner = Arc::new(spawner);
        let factory = PoolFactory::builder()
            .config(config)
            .timeouts(test_timeouts())
            .spawner(Arc::clone(&spawner) as Arc<dyn ChannelSpawner>)
            .diagnostics(Arc::clone(&recorder) as Arc<dyn DiagnosticSink>)
            .build();
        (factory, recorder, spawner)
    }

    fn foo_config() -> EngineConfig {
        EngineConfig::builder().name("Foo").cmd("/opt/foo").build()
    }

    #[tokio::test]
    async fn test_should_start_all_engines() {
        let (factory, recorder, spawner) = factory(
            foo_config(),
            ScriptedSpawner::new(|_| Some(ScriptHandle::uci_engine("Foo"))),
        );

        let pool = factory.create(3).await;

        assert_eq!(pool.len(), 3);
        assert_eq!(spawner.attempts(), 3);
        assert!(recorder.records().is_empty());
        for engine in pool.iter() {
            assert_eq!(engine.state(), AdapterState::Initialized);
            // identical configurations keep the plain name
            assert_eq!(engine.display_name(), "Foo");
        }
    }

    #[tokio::test]
    async fn test_should_return_empty_pool_when_every_attempt_fails() {
        let (factory, recorder, spawner) = factory(foo_config(), ScriptedSpawner::new(|_| None));

        let pool = factory.create(2).await;

        assert!(pool.is_empty());
        assert_eq!(spawner.attempts(), 2 * STARTUP_ROUNDS);
        let failures = recorder.failures();
        assert_eq!(failures.len(), 2 * STARTUP_ROUNDS);
        assert!(failures.iter().all(|f| f.check == STARTUP_CHECK));
        assert!(failures[0].message.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_should_retry_only_failed_slots() {
        // the second spawn fails once, every later one succeeds
        let (factory, recorder, spawner) = factory(
            foo_config(),
            ScriptedSpawner::new(|n| (n != 1).then(|| ScriptHandle::uci_engine("Foo"))),
        );

        let pool = factory.create(3).await;

        assert_eq!(pool.len(), 3);
        assert_eq!(spawner.attempts(), 4);
        assert_eq!(recorder.failures().len(), 1);
    }

    #[tokio::test]
    async fn test_should_count_handshake_timeout_as_failure() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let (factory, recorder, _spawner) = factory(
            foo_config(),
            ScriptedSpawner::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                // never answers uci
                Some(ScriptHandle::new())
            }),
        );

        let pool = factory.create(1).await;

        assert!(pool.is_empty());
        assert_eq!(attempts.load(Ordering::SeqCst), STARTUP_ROUNDS);
        let failures = recorder.failures();
        assert_eq!(failures.len(), STARTUP_ROUNDS);
        assert!(failures.iter().all(|f| f.message.contains("uciok")));
    }

    #[tokio::test]
    async fn test_should_drop_slot_that_keeps_failing() {
        // slot 0 always succeeds, the slot on every other attempt never answers
        let (factory, recorder, spawner) = factory(
            foo_config(),
            ScriptedSpawner::new(|n| {
                Some(if n == 0 {
                    ScriptHandle::uci_engine("Foo")
                } else {
                    ScriptHandle::new()
                })
            }),
        );

        let pool = factory.create(2).await;

        assert_eq!(pool.len(), 1);
        assert_eq!(spawner.attempts(), 1 + STARTUP_ROUNDS);
        assert_eq!(recorder.failures().len(), STARTUP_ROUNDS);
        // failed adapters were terminated on drop
        let alive = spawner.handles().iter().filter(|h| h.is_alive()).count();
        assert_eq!(alive, 1);
    }

    #[tokio::test]
    async fn test_should_keep_base_name_for_identical_pool_members() {
        let config = EngineConfig::builder()
            .name("Foo")
            .cmd("/opt/foo")
            .build()
            .with_option("Hash", 2);
        let (factory, _recorder, _spawner) = factory(
            config,
            ScriptedSpawner::new(|_| Some(ScriptHandle::uci_engine("Foo"))),
        );

        let pool = factory.create(2).await;

        let names: Vec<_> = pool.iter().map(|e| e.display_name().to_owned()).collect();
        assert_eq!(names, ["Foo", "Foo"]);
    }

    #[tokio::test]
    async fn test_should_disambiguate_members_with_differing_configurations() {
        let hash = |value: i32| foo_config().with_option("Hash", value);
        let (factory, recorder, spawner) = factory(
            foo_config(),
            ScriptedSpawner::new(|_| Some(ScriptHandle::uci_engine("Foo"))),
        );

        let pool = factory.create_each(vec![hash(1), hash(2), hash(1)]).await;

        assert!(recorder.records().is_empty());
        let names: Vec<_> = pool.iter().map(|e| e.display_name().to_owned()).collect();
        assert_eq!(names, ["Foo [Hash=1]", "Foo [Hash=2]", "Foo [Hash=1]"]);
        // spawn order across a round is not slot order
        let mut sent: Vec<_> = spawner
            .handles()
            .iter()
            .filter_map(|h| {
                h.written()
                    .into_iter()
                    .find(|line| line.starts_with("setoption"))
            })
            .collect();
        sent.sort();
        assert_eq!(
            sent,
            [
                "setoption name Hash value 1",
                "setoption name Hash value 1",
                "setoption name Hash value 2",
            ]
        );
    }

    #[tokio::test]
    async fn test_should_name_failures_after_slot_configuration() {
        let bar = EngineConfig::builder().name("Bar").cmd("/opt/bar").build();
        let (factory, recorder, _spawner) = factory(foo_config(), ScriptedSpawner::new(|_| None));

        let pool = factory.create_each(vec![foo_config(), bar]).await;

        assert!(pool.is_empty());
        let failures = recorder.failures();
        assert_eq!(failures.len(), 2 * STARTUP_ROUNDS);
        assert!(failures[0].message.starts_with("Foo slot 0 round 1/"));
        assert!(failures[1].message.starts_with("Bar slot 1 round 1/"));
    }

    #[tokio::test]
    async fn test_should_create_empty_pool_for_zero_count() {
        let (factory, recorder, spawner) = factory(
            foo_config(),
            ScriptedSpawner::new(|_| Some(ScriptHandle::uci_engine("Foo"))),
        );

        let pool = factory.create(0).await;

        assert!(pool.is_empty());
        assert_eq!(spawner.attempts(), 0);
        assert!(recorder.records().is_empty());
    }

    #[tokio::test]
    async fn test_should_terminate_engines_when_pool_is_dropped() {
        let (factory, _recorder, spawner) = factory(
            foo_config(),
            ScriptedSpawner::new(|_| Some(ScriptHandle::uci_engine("Foo"))),
        );

        let pool = factory.create(2).await;
        drop(pool);

        for handle in spawner.handles() {
            assert!(!handle.is_alive());
            assert_eq!(handle.written().last().map(String::as_str), Some("quit"));
        }
    }
}
