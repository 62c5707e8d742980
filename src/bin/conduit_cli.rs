use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use conduit::record::{OrderKind, OrderStatus, Side};
use conduit::{EngineConfig, Order, OrderQueue, OrderRecord, QueueConfig, RingBuffer, SharedHandle};
use log::info;

#[derive(Parser)]
#[command(name = "conduit-cli", version, about = "Shared-memory order ring tooling")]
struct Cli {
    /// JSON engine config; its `queue` section sizes new rings.
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a file-backed order ring.
    Create {
        path: PathBuf,
        #[arg(long = "capacity")]
        capacity: Option<u64>,
    },
    /// Print the ring's counters.
    Stats {
        path: PathBuf,
        #[arg(long = "json")]
        json: bool,
    },
    /// Dequeue and print orders.
    Drain {
        path: PathBuf,
        #[arg(long = "limit")]
        limit: Option<usize>,
        /// Keep waiting this long for more orders once the ring runs dry.
        #[arg(long = "wait-ms", default_value_t = 0)]
        wait_ms: u64,
    },
    /// Enqueue synthetic limit orders until `count` or FULL.
    Load {
        path: PathBuf,
        #[arg(long = "count", default_value_t = 1_000)]
        count: u64,
        #[arg(long = "symbol", default_value = "BTC-USD")]
        symbol: String,
        #[arg(long = "venue", default_value = "SIM")]
        venue: String,
    },
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let mut out = io::BufWriter::new(io::stdout());
    match cli.command {
        Commands::Create { path, capacity } => cmd_create(&path, capacity, config.queue, &mut out)?,
        Commands::Stats { path, json } => cmd_stats(&path, json, &mut out)?,
        Commands::Drain {
            path,
            limit,
            wait_ms,
        } => cmd_drain(&path, limit, Duration::from_millis(wait_ms), config.queue, &mut out)?,
        Commands::Load {
            path,
            count,
            symbol,
            venue,
        } => cmd_load(&path, count, &symbol, &venue, config.queue, &mut out)?,
    }
    out.flush()?;
    Ok(())
}

fn cmd_create(path: &Path, capacity: Option<u64>, mut config: QueueConfig, out: &mut dyn Write) -> Result<()> {
    if let Some(capacity) = capacity {
        config.capacity = capacity;
    }
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    let (queue, _handle) = OrderQueue::create_file(path, &config)
        .with_context(|| format!("creating ring at {}", path.display()))?;
    info!("created {} with capacity {}", path.display(), queue.capacity());
    writeln!(out, "created={} capacity={}", path.display(), queue.capacity())?;
    Ok(())
}

fn attach(path: &Path, config: QueueConfig) -> Result<OrderQueue> {
    let handle = SharedHandle::open(path).with_context(|| format!("opening {}", path.display()))?;
    let config = QueueConfig {
        capacity: handle.capacity(),
        ..config
    };
    Ok(OrderQueue::attach(&handle, &config)?)
}

fn cmd_stats(path: &Path, json: bool, out: &mut dyn Write) -> Result<()> {
    let handle = SharedHandle::open(path).with_context(|| format!("opening {}", path.display()))?;
    let ring = RingBuffer::<OrderRecord>::attach(&handle, handle.capacity())?;
    let stats = ring.stats();
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&stats)?)?;
        return Ok(());
    }
    writeln!(out, "ring={}", path.display())?;
    writeln!(
        out,
        "size={} capacity={} head={} tail={}",
        stats.size, stats.capacity, stats.head, stats.tail
    )?;
    writeln!(
        out,
        "producers={} consumers={} sequence={}",
        stats.producers, stats.consumers, stats.sequence
    )?;
    writeln!(
        out,
        "write_count={} read_count={} conflated_count={} evicted_count={} reclaimed_count={}",
        stats.write_count,
        stats.read_count,
        stats.conflated_count,
        stats.evicted_count,
        stats.reclaimed_count
    )?;
    Ok(())
}

fn cmd_drain(
    path: &Path,
    limit: Option<usize>,
    wait: Duration,
    config: QueueConfig,
    out: &mut dyn Write,
) -> Result<()> {
    let queue = attach(path, config)?;
    let limit = limit.unwrap_or(usize::MAX);
    let mut drained = 0usize;
    let mut last_seq = 0u64;
    while drained < limit {
        let next = if wait.is_zero() {
            queue.dequeue()?
        } else {
            queue.dequeue_wait(wait)?
        };
        let Some(entry) = next else {
            break;
        };
        if last_seq != 0 && entry.seq != last_seq + 1 {
            writeln!(out, "gap: {} -> {}", last_seq, entry.seq)?;
        }
        last_seq = entry.seq;
        let order = entry.record.decode()?;
        writeln!(
            out,
            "seq={} id={} side={:?} type={:?} qty={} px={} ts={} status={:?}",
            entry.seq,
            order.order_id,
            order.side,
            order.kind,
            order.quantity,
            order.price,
            order.timestamp_ns,
            order.status
        )?;
        drained += 1;
    }
    writeln!(out, "drained={drained}")?;
    Ok(())
}

fn cmd_load(
    path: &Path,
    count: u64,
    symbol: &str,
    venue: &str,
    config: QueueConfig,
    out: &mut dyn Write,
) -> Result<()> {
    let queue = attach(path, config)?;
    let start = Instant::now();
    let mut accepted = 0u64;
    for id in 0..count {
        let order = Order {
            symbol: symbol.to_string(),
            side: if id % 2 == 0 { Side::Buy } else { Side::Sell },
            kind: OrderKind::Limit,
            quantity: 1.0 + (id % 10) as f64,
            price: 100.0 + (id % 100) as f64 * 0.25,
            timestamp_ns: now_ns(),
            status: OrderStatus::New,
            venue: venue.to_string(),
            order_id: id as u128 + 1,
            client_id: 1,
        };
        if !queue.enqueue_order(&order)? {
            info!("ring full after {accepted} orders");
            break;
        }
        accepted += 1;
    }
    let elapsed = start.elapsed();
    let rate = accepted as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    writeln!(
        out,
        "accepted={accepted} rejected={} elapsed_us={} rate={rate:.0}/s",
        count - accepted,
        elapsed.as_micros()
    )?;
    Ok(())
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
