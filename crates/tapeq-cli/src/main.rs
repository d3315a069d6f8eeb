use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tapeq_core::{
    CollectionOptions, FnHooks, PoolSnapshot, QueryCollection, QueryRecord, TapeqError,
    WorkerHooks, WorkerPool, WorkerPoolOptions,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "tapeq",
    version,
    about = "Tape restore query planner",
    long_about = "Deduplicate restore queries, order them by tape position and replay them through a worker pool."
)]
struct Cli {
    /// Enable debug logging.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the restore order for a file of query records.
    Plan {
        /// JSON array of query records.
        input: PathBuf,

        /// Keep only the newest version of each object.
        #[arg(long, default_value_t = false)]
        latest: bool,

        /// Write the plan as JSON instead of printing it.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Initial record capacity of the collection.
        #[arg(long, default_value_t = tapeq_core::query::DEFAULT_INITIAL_CAPACITY)]
        initial_capacity: usize,
    },
    /// Plan, then replay every record through a worker pool.
    Replay {
        /// JSON array of query records.
        input: PathBuf,

        /// Keep only the newest version of each object.
        #[arg(long, default_value_t = false)]
        latest: bool,

        /// Number of worker sessions (defaults to CPU count).
        #[arg(long, default_value_t = num_cpus::get())]
        workers: usize,

        /// Idle worker poll interval in milliseconds.
        #[arg(long, default_value_t = 1000)]
        poll_interval_ms: u64,

        /// Simulated restore time per record in milliseconds.
        #[arg(long, default_value_t = 0)]
        job_delay_ms: u64,
    },
}

/// Outcome of loading and ordering a record file.
#[derive(Debug, Serialize)]
struct Plan {
    loaded: usize,
    skipped: usize,
    records: Vec<QueryRecord<Value>>,
}

/// Per-worker simulated restore session.
#[derive(Debug)]
struct Session {
    opened_at: Instant,
    restored: usize,
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Plan {
            input,
            latest,
            output,
            initial_capacity,
        } => plan_command(&input, latest, output.as_deref(), initial_capacity)?,
        Commands::Replay {
            input,
            latest,
            workers,
            poll_interval_ms,
            job_delay_ms,
        } => replay_command(&input, latest, workers, poll_interval_ms, job_delay_ms)?,
    }

    Ok(())
}

fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("tapeq=debug,tapeq_core=debug,warn")
    } else {
        EnvFilter::new("tapeq=info,tapeq_core=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_thread_names(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn plan_command(
    input: &Path,
    latest: bool,
    output: Option<&Path>,
    initial_capacity: usize,
) -> Result<()> {
    let started_at = Instant::now();
    let plan = load_plan(input, latest, CollectionOptions { initial_capacity })?;

    match output {
        Some(path) => write_plan(&plan, path)?,
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for (position, record) in plan.records.iter().enumerate() {
                let key = record.order_key;
                writeln!(
                    out,
                    "{position:>6}  {}:{}:{}:{}:{}  {}",
                    key.top,
                    key.hi_hi,
                    key.hi_lo,
                    key.hi,
                    key.lo,
                    record.object_key()
                )?;
            }
        }
    }

    eprintln!("plan complete");
    eprintln!("  input: {}", input.display());
    if let Some(path) = output {
        eprintln!("  output: {}", path.display());
    }
    eprintln!("  records loaded: {}", plan.loaded);
    eprintln!("  records skipped: {}", plan.skipped);
    eprintln!("  records planned: {}", plan.records.len());
    eprintln!("  elapsed: {}", format_duration(started_at.elapsed()));
    Ok(())
}

fn replay_command(
    input: &Path,
    latest: bool,
    workers: usize,
    poll_interval_ms: u64,
    job_delay_ms: u64,
) -> Result<()> {
    let plan = load_plan(input, latest, CollectionOptions::default())?;
    let planned = plan.records.len();

    let per_worker = Arc::new(Mutex::new(BTreeMap::<usize, usize>::new()));
    let cleanup_totals = Arc::clone(&per_worker);
    let hooks = FnHooks::new(
        |worker_id| {
            tracing::debug!(worker_id, "opening restore session");
            Ok(Session {
                opened_at: Instant::now(),
                restored: 0,
            })
        },
        move |worker_id, session: Option<Session>| {
            let Some(session) = session else {
                return Ok(());
            };
            tracing::debug!(
                worker_id,
                restored = session.restored,
                open_for_ms = session.opened_at.elapsed().as_millis() as u64,
                "closing restore session"
            );
            cleanup_totals
                .lock()
                .map_err(|_| anyhow!("session totals lock poisoned"))?
                .insert(worker_id, session.restored);
            Ok(())
        },
    );

    let options = WorkerPoolOptions {
        idle_poll_interval: Duration::from_millis(poll_interval_ms.max(1)),
        ..WorkerPoolOptions::default()
    };
    let workers = workers.max(1);
    let pool = WorkerPool::with_options(workers, hooks, options)?;

    let started_at = Instant::now();
    let job_delay = Duration::from_millis(job_delay_ms);
    pool.submit_records(plan.records, move |worker, record| {
        if !job_delay.is_zero() {
            thread::sleep(job_delay);
        }
        let worker_id = worker.id();
        let session = worker
            .state_mut()
            .ok_or_else(|| anyhow!("worker {worker_id} has no open session"))?;
        session.restored += 1;
        tracing::debug!(
            worker_id,
            object = %record.object_key(),
            inserted_secs = record.inserted_secs(),
            "restored object"
        );
        Ok(())
    })?;

    let snapshot = wait_for_replay(&pool, planned);
    eprintln!();
    pool.join()?;
    let elapsed = started_at.elapsed();

    let per_worker = per_worker
        .lock()
        .map_err(|_| anyhow!("session totals lock poisoned"))?;
    print_replay_summary(
        input,
        plan.loaded,
        plan.skipped,
        &snapshot,
        &per_worker,
        elapsed,
    );
    Ok(())
}

fn wait_for_replay<H: WorkerHooks>(pool: &WorkerPool<H>, planned: usize) -> PoolSnapshot {
    loop {
        let snapshot = pool.snapshot();
        let done = snapshot.completed + snapshot.failed;
        let progress = if planned > 0 {
            (done as f64 / planned as f64) * 100.0
        } else {
            100.0
        };
        eprint!(
            "\r\x1b[2K[{progress:6.2}%] records {done}/{planned} | failed {} | pending {} | workers {}/{}",
            snapshot.failed, snapshot.pending, snapshot.current, snapshot.desired,
        );
        let _ = io::stderr().flush();

        if done >= planned {
            return snapshot;
        }
        thread::sleep(Duration::from_millis(250));
    }
}

fn print_replay_summary(
    input: &Path,
    loaded: usize,
    skipped: usize,
    snapshot: &PoolSnapshot,
    per_worker: &BTreeMap<usize, usize>,
    elapsed: Duration,
) {
    let elapsed_secs = elapsed.as_secs_f64().max(1e-6);
    let rate = snapshot.completed as f64 / elapsed_secs;

    println!("replay complete");
    println!("  input: {}", input.display());
    println!("  records loaded: {loaded} (skipped {skipped})");
    println!(
        "  records replayed: {} (failed {})",
        snapshot.completed, snapshot.failed
    );
    println!("  elapsed: {}", format_duration(elapsed));
    println!("  throughput: {rate:.1} records/s");

    let max_restored = per_worker.values().copied().max().unwrap_or(0);
    let min_restored = per_worker.values().copied().min().unwrap_or(0);
    println!(
        "  sessions: {} | balance min/max {min_restored}/{max_restored}",
        per_worker.len()
    );
    for (worker_id, restored) in per_worker {
        println!("    w{worker_id:02} restored {restored:>6}");
    }
}

/// Loads records from `path` and orders them for replay.
///
/// Records rejected by the collection are logged and skipped; any other
/// failure aborts the load.
fn load_plan(path: &Path, latest: bool, options: CollectionOptions) -> Result<Plan> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let records: Vec<QueryRecord<Value>> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing query records from {}", path.display()))?;
    let loaded = records.len();

    let mut queries = QueryCollection::with_options(options)?;
    let mut skipped = 0;
    for (position, record) in records.into_iter().enumerate() {
        match queries.add(record, latest) {
            Ok(_) => {}
            Err(error @ (TapeqError::OrderViolation { .. } | TapeqError::StaleVersion { .. })) => {
                tracing::warn!(position, %error, "skipping query record");
                skipped += 1;
            }
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("adding record {position} from {}", path.display()));
            }
        }
    }

    queries.sort_for_locality();
    tracing::info!(loaded, skipped, planned = queries.len(), "restore plan built");

    Ok(Plan {
        loaded,
        skipped,
        records: queries.into_records(),
    })
}

fn write_plan(plan: &Plan, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, plan)?;
    writer.flush()?;
    Ok(())
}

fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let millis = duration.subsec_millis();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else if minutes > 0 {
        format!("{minutes:02}:{seconds:02}")
    } else {
        format!("{seconds}.{millis:03}s")
    }
}
