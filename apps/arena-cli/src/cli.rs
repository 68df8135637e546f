use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use arena_core::{
    ArenaConfig, CheckRecorder, Direction, EngineAdapter, LineHook, MemoryMonitor, PoolFactory,
    load_config,
};
use arena_uci::{EngineEvent, EngineOption, GameState, GoLimits, Score, SearchInfo};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

/// Interval between memory samples during a search.
const MEMORY_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

/// Extra time an engine gets after `stop` before the search is abandoned.
const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "arena", about = "Probe and drive UCI chess engines")]
pub struct Cli {
    /// Also write JSON logs to this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start engines from a config file and report what they declare
    Probe {
        /// Path to engines.yaml
        #[arg(short, long)]
        config: PathBuf,

        /// Engine name as configured
        #[arg(short, long)]
        engine: String,

        /// Number of instances to start
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,

        /// Print every protocol line
        #[arg(long)]
        show_protocol: bool,
    },

    /// Run one search and print the best move
    Search {
        /// Path to engines.yaml
        #[arg(short, long)]
        config: PathBuf,

        /// Engine name as configured
        #[arg(short, long)]
        engine: String,

        /// Search time in milliseconds
        #[arg(long, default_value_t = 1000)]
        movetime: u64,

        /// Search depth limit
        #[arg(long)]
        depth: Option<u32>,

        /// Starting position (standard start if omitted)
        #[arg(long)]
        fen: Option<String>,

        /// Warn when the engine's resident memory exceeds this many bytes
        #[arg(long)]
        memory_limit: Option<u64>,

        /// Print every protocol line
        #[arg(long)]
        show_protocol: bool,

        /// Moves played from the starting position
        moves: Vec<String>,
    },

    /// Parse an option declaration and print its canonical form
    ParseOption {
        /// The declaration, e.g. "option name Hash type spin default 16 min 1 max 1024"
        line: String,
    },
}

impl Cli {
    /// Name used for the log file of this invocation.
    pub fn log_name(&self) -> &'static str {
        match self.command {
            Commands::Probe { .. } => "probe",
            Commands::Search { .. } => "search",
            Commands::ParseOption { .. } => "parse-option",
        }
    }

    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Probe {
                config,
                engine,
                count,
                show_protocol,
            } => probe(&config, &engine, count, show_protocol).await,
            Commands::Search {
                config,
                engine,
                movetime,
                depth,
                fen,
                memory_limit,
                show_protocol,
                moves,
            } => {
                let game = GameState {
                    start_fen: fen,
                    moves,
                };
                let limits = GoLimits {
                    movetime: Some(movetime),
                    depth,
                    ..GoLimits::default()
                };
                let request = SearchRequest {
                    game,
                    limits,
                    memory_limit,
                };
                search(&config, &engine, request, show_protocol).await
            }
            Commands::ParseOption { line } => {
                let option = EngineOption::parse(&line).context("invalid option declaration")?;
                println!("{option}");
                Ok(())
            }
        }
    }
}

fn load(path: &Path) -> Result<ArenaConfig> {
    load_config(path).with_context(|| format!("failed to load config: {}", path.display()))
}

fn pool_factory(
    config: &ArenaConfig,
    engine: &str,
    recorder: Arc<CheckRecorder>,
    show_protocol: bool,
) -> Result<PoolFactory> {
    let engine_config = config.engine(engine)?.clone();
    let factory = PoolFactory::builder()
        .config(engine_config)
        .timeouts(config.timeouts)
        .diagnostics(recorder);

    Ok(if show_protocol {
        factory.line_hook(protocol_printer()).build()
    } else {
        factory.build()
    })
}

fn protocol_printer() -> LineHook {
    Arc::new(|line: &str, direction: Direction| {
        let arrow = match direction {
            Direction::ToEngine => ">",
            Direction::FromEngine => "<",
        };
        eprintln!("{arrow} {line}");
    })
}

fn report_failures(recorder: &CheckRecorder) {
    for failure in recorder.failures() {
        eprintln!("startup failure: {}", failure.message);
    }
}

async fn probe(path: &Path, engine: &str, count: usize, show_protocol: bool) -> Result<()> {
    let config = load(path)?;
    let recorder = Arc::new(CheckRecorder::new());
    let factory = pool_factory(&config, engine, Arc::clone(&recorder), show_protocol)?;

    let pool = factory.create(count).await;
    report_failures(&recorder);
    if pool.is_empty() {
        bail!("no instance of {engine} started");
    }

    for adapter in &pool {
        println!("{}", adapter.display_name());
        println!("  id name   {}", adapter.engine_name().unwrap_or("-"));
        println!("  id author {}", adapter.engine_author().unwrap_or("-"));
        for option in adapter.options().iter() {
            println!("  {option}");
        }
        for error in adapter.errors() {
            println!("  error {error}");
        }
    }
    println!("{} of {count} started", pool.len());

    info!(engine, started = pool.len(), "probe finished");
    Ok(())
}

struct SearchRequest {
    game: GameState,
    limits: GoLimits,
    memory_limit: Option<u64>,
}

async fn search(path: &Path, engine: &str, request: SearchRequest, show_protocol: bool) -> Result<()> {
    let config = load(path)?;
    let recorder = Arc::new(CheckRecorder::new());
    let factory = pool_factory(&config, engine, Arc::clone(&recorder), show_protocol)?;

    let pool = factory.create(1).await;
    report_failures(&recorder);
    let Some(adapter) = pool.into_inner().pop() else {
        bail!("{engine} did not start");
    };
    let adapter: Arc<dyn EngineAdapter> = Arc::from(adapter);

    let mut monitor = MemoryMonitor::new(
        Arc::clone(&adapter),
        MEMORY_SAMPLE_INTERVAL,
        request.memory_limit,
    );
    monitor.start().context("failed to start memory monitor")?;

    let worker = Arc::clone(&adapter);
    let outcome = tokio::task::spawn_blocking(move || run_search(worker.as_ref(), &request))
        .await
        .context("search task panicked")?;

    monitor.stop();
    if monitor.samples() > 0 {
        println!("peak memory {} KiB", monitor.peak() / 1024);
    }
    adapter.terminate()?;

    let (mv, ponder) = outcome?;
    match ponder {
        Some(ponder) => println!("bestmove {mv} ponder {ponder}"),
        None => println!("bestmove {mv}"),
    }
    Ok(())
}

/// The worker loop: start a search, then poll events until `bestmove`.
///
/// When the requested movetime has passed the engine is told to stop; if no
/// move arrives within [`STOP_GRACE`] after that, the search is abandoned.
fn run_search(adapter: &dyn EngineAdapter, request: &SearchRequest) -> Result<(String, Option<String>)> {
    adapter.new_game()?;
    adapter.compute_move(&request.game, &request.limits)?;

    let started = Instant::now();
    let budget = Duration::from_millis(request.limits.movetime.unwrap_or_default());
    let mut stopped_at: Option<Instant> = None;

    loop {
        match adapter.read_event() {
            EngineEvent::BestMove { mv, ponder } => return Ok((mv, ponder)),
            EngineEvent::SearchInfo(info) => {
                if let Some(summary) = summarize_info(&info) {
                    println!("{summary}");
                }
            }
            EngineEvent::ProtocolError(e) => warn!(error = %e, "protocol error during search"),
            EngineEvent::EngineExited => bail!("{} exited during search", adapter.display_name()),
            EngineEvent::ReadTimeout
            | EngineEvent::ReadyOk
            | EngineEvent::Identity(_)
            | EngineEvent::OptionDeclared(_)
            | EngineEvent::HandshakeComplete => {}
        }

        match stopped_at {
            None if started.elapsed() > budget => {
                adapter.stop()?;
                stopped_at = Some(Instant::now());
            }
            Some(at) if at.elapsed() > STOP_GRACE => {
                bail!("{} sent no bestmove after stop", adapter.display_name())
            }
            _ => {}
        }
    }
}

/// One-line summary of an `info` line, or `None` when it carries no depth.
fn summarize_info(info: &SearchInfo) -> Option<String> {
    let depth = info.depth?;
    let score = match info.score {
        Some(Score::Cp(cp)) => format!("cp {cp}"),
        Some(Score::Mate(n)) => format!("mate {n}"),
        None => "-".to_owned(),
    };
    let mut line = format!("depth {depth} score {score}");
    if let Some(nodes) = info.nodes {
        line.push_str(&format!(" nodes {nodes}"));
    }
    if !info.pv.is_empty() {
        line.push_str(" pv ");
        line.push_str(&info.pv.join(" "));
    }
    Some(line)
}
