mod scene;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use glam::Vec3;
use tracing_subscriber::EnvFilter;
use updatecast_common::EntityId;
use updatecast_queue::{Lane, OutboundItem, Outbox, PriorityQueue};
use updatecast_sched::{UpdatecastConfig, ViewpointScheduler};

use crate::scene::{SceneRng, populate};

#[derive(Parser)]
#[command(name = "updatecast-cli", about = "CLI tool for updatecast operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Walk through aging insertion step by step
    Trace,
    /// Run producers, one viewpoint scheduler and a throttled sender
    Simulate {
        /// Number of entities in the scene
        #[arg(short, long, default_value = "500")]
        entities: usize,
        /// Number of producer threads reporting changes
        #[arg(short, long, default_value = "4")]
        producers: usize,
        /// Number of simulation ticks
        #[arg(short, long, default_value = "200")]
        ticks: u64,
        /// Milliseconds per tick
        #[arg(long, default_value = "10")]
        tick_ms: u64,
        /// Seed for the scene layout and churn
        #[arg(short, long, default_value = "42")]
        seed: u64,
        /// JSON config file (scheduler + throttle)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// Serialized entity update as the transmission layer sees it.
#[derive(Debug)]
struct UpdatePacket {
    entity: EntityId,
    bytes: usize,
    lane: Lane,
}

impl OutboundItem for UpdatePacket {
    fn lane(&self) -> Lane {
        self.lane
    }

    fn size_bytes(&self) -> usize {
        self.bytes
    }
}

/// Bytes for one object update on the wire.
const UPDATE_BYTES: usize = 180;
/// Bytes for a keep-alive ping.
const PING_BYTES: usize = 16;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("updatecast-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", updatecast_common::crate_info());
            println!("queue: {}", updatecast_queue::crate_info());
            println!("sched: {}", updatecast_sched::crate_info());
        }
        Commands::Trace => run_trace(),
        Commands::Simulate {
            entities,
            producers,
            ticks,
            tick_ms,
            seed,
            config,
        } => {
            let config = match config {
                Some(path) => UpdatecastConfig::load(&path)?,
                None => UpdatecastConfig::default(),
            };
            run_simulation(
                &config,
                entities,
                producers.max(1),
                ticks,
                Duration::from_millis(tick_ms),
                seed,
            )?;
        }
    }

    Ok(())
}

fn run_trace() {
    let queue = PriorityQueue::new();
    let print = |step: &str, queue: &PriorityQueue<char>| {
        let seq: Vec<String> = queue
            .snapshot()
            .iter()
            .map(|(item, priority)| format!("{item}:{priority}"))
            .collect();
        println!("{step:<22} [{}]", seq.join(", "));
    };

    queue.enqueue('A', 1);
    print("enqueue A priority=1", &queue);
    queue.enqueue('B', 1);
    print("enqueue B priority=1", &queue);
    queue.enqueue('C', 5);
    print("enqueue C priority=5", &queue);
    if let Ok(head) = queue.try_dequeue() {
        print(&format!("dequeue -> {head}"), &queue);
    }
}

fn run_simulation(
    config: &UpdatecastConfig,
    entities: usize,
    producers: usize,
    ticks: u64,
    tick: Duration,
    seed: u64,
) -> anyhow::Result<()> {
    let extent = 128.0;
    let shards = populate(entities, producers, extent, seed);
    let scheduler = ViewpointScheduler::new(config.scheduler.clone());
    let outbox: Outbox<UpdatePacket> = Outbox::new(config.throttle.clone());
    let sent_bytes = AtomicUsize::new(0);
    let sent_updates = AtomicUsize::new(0);

    println!("Simulating {entities} entities, {producers} producers, {ticks} ticks of {tick:?}");
    println!("Link budget: {} B/period", outbox.budget());
    let started = Instant::now();

    thread::scope(|s| -> anyhow::Result<()> {
        let producer_handles: Vec<_> = shards
            .into_iter()
            .enumerate()
            .map(|(shard, mut owned)| {
                let scheduler = &scheduler;
                s.spawn(move || {
                    let mut rng = SceneRng::new(seed ^ (shard as u64 + 1));
                    for _ in 0..ticks {
                        for entity in owned.iter_mut() {
                            // Roughly a quarter of the scene changes per tick.
                            if rng.next_u64() % 4 != 0 {
                                continue;
                            }
                            let step = Vec3::new(rng.range(-1.0, 1.0), 0.0, rng.range(-1.0, 1.0));
                            entity.position += step;
                            scheduler.mark_dirty(entity.id, entity.position, entity.bounding_size);
                        }
                        thread::sleep(tick);
                    }
                })
            })
            .collect();

        // Send loop: scheduler -> outbox, one update per free slot. The
        // backlog stays in the scheduler where it is ranked and coalesced.
        let sender = s.spawn(|| {
            while outbox.wait_for_room().is_ok() {
                let Ok(entity) = scheduler.pop_next() else {
                    break;
                };
                outbox.enqueue(UpdatePacket {
                    entity,
                    bytes: UPDATE_BYTES,
                    lane: Lane::Prioritized,
                });
            }
        });

        // Transmission: outbox -> "wire".
        let transmitter = s.spawn(|| {
            while let Ok(packet) = outbox.dequeue() {
                tracing::trace!(entity = %packet.entity, bytes = packet.bytes, "transmitted");
                sent_bytes.fetch_add(packet.bytes, Ordering::Relaxed);
                if packet.lane == Lane::Prioritized {
                    sent_updates.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        // Session loop: the avatar walks a circle and the link refreshes its budget.
        let refresh_every = outbox.refresh_interval();
        let mut last_refresh = Instant::now();
        for t in 0..ticks {
            let angle = t as f32 * 0.02;
            let radius = extent * 0.5;
            let viewpoint = Vec3::new(angle.cos() * radius, 0.0, angle.sin() * radius);
            scheduler.update_viewpoint(viewpoint);

            if last_refresh.elapsed() >= refresh_every {
                outbox.refresh();
                outbox.enqueue(UpdatePacket {
                    entity: EntityId::from_u128(0),
                    bytes: PING_BYTES,
                    lane: Lane::Unthrottled,
                });
                last_refresh = Instant::now();
            }
            thread::sleep(tick);
        }

        let producers_ok = producer_handles
            .into_iter()
            .fold(true, |ok, handle| handle.join().is_ok() && ok);
        scheduler.close();
        outbox.close();
        if !producers_ok {
            anyhow::bail!("producer thread panicked");
        }
        sender
            .join()
            .map_err(|_| anyhow::anyhow!("sender thread panicked"))?;
        transmitter
            .join()
            .map_err(|_| anyhow::anyhow!("transmitter thread panicked"))?;
        Ok(())
    })?;

    let stats = scheduler.stats();
    println!("Elapsed: {:?}", started.elapsed());
    println!(
        "Scheduler: marked={}, coalesced={}, dispatched={}, resorts={}",
        stats.marked, stats.coalesced, stats.dispatched, stats.resorts
    );
    println!(
        "Last re-rank: {} entities in {:?}",
        stats.last_resort_len, stats.last_resort_time
    );
    println!(
        "Link: {} updates, {} bytes sent, {} queued in outbox, budget now {} B/period",
        sent_updates.load(Ordering::Relaxed),
        sent_bytes.load(Ordering::Relaxed),
        outbox.len(),
        outbox.budget()
    );
    println!(
        "Backlog held in the ranked working set: {} entities",
        scheduler.pending_count()
    );
    Ok(())
}
