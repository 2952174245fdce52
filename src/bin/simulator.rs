use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{App, Arg};
use colored::*;
use tracing::{info, warn};

use agrimesh::clock::SystemClock;
use agrimesh::config::{GatewayConfig, GroundTriggerMode, NodeConfig};
use agrimesh::gateway::GatewayCoordinator;
use agrimesh::identity::{NodeIdentity, DEFAULT_BLACKLIST};
use agrimesh::node::{NodeAgent, SyntheticSensors};
use agrimesh::scheduler::IntervalTrigger;
use agrimesh::sink::LogSink;
use agrimesh::storage::MemoryStore;
use agrimesh::transport::MeshHub;

const GATEWAY_MAC: [u8; 6] = [0xA0, 0x20, 0xA6, 0x00, 0x00, 0x01];
const NODE_MAC_PREFIX: [u8; 5] = [0x5C, 0xCF, 0x7F, 0x10, 0x20];

const TICK_SLEEP_MS: u64 = 10;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let matches = App::new("agrimesh-sim")
        .version("0.1.0")
        .about("Runs one gateway and N sensor nodes over an in-memory mesh")
        .arg(
            Arg::with_name("nodes")
                .short("n")
                .long("nodes")
                .takes_value(true)
                .default_value("3")
                .help("Number of sensor nodes to simulate"),
        )
        .arg(
            Arg::with_name("duration")
                .short("d")
                .long("duration")
                .takes_value(true)
                .default_value("30")
                .help("Simulation length in seconds"),
        )
        .get_matches();

    let node_count: usize = matches
        .value_of("nodes")
        .unwrap()
        .parse()
        .expect("--nodes must be a number");
    let duration_s: u64 = matches
        .value_of("duration")
        .unwrap()
        .parse()
        .expect("--duration must be a number");

    println!("{}", "Agrimesh field simulator".green().bold());
    println!("  nodes:    {}", node_count);
    println!("  duration: {}s", duration_s);

    let hub = MeshHub::new();
    let running = Arc::new(AtomicBool::new(true));

    // Simulation profile: every period squeezed far below the bench
    // profile so a full announce/register/poll round fits in seconds.
    let gateway_config = GatewayConfig {
        announce_interval_ms: 1_000,
        atmospheric_interval_ms: 4_000,
        ground_interval_ms: 7_000,
        response_timeout_ms: 400,
        connection_retries: 2,
        atmospheric_retry_delay_ms: 50,
        ground_retry_delay_ms: 50,
        inter_node_delay_ms: 20,
        ground_trigger_mode: GroundTriggerMode::Interval,
        ..GatewayConfig::accelerated()
    };
    let node_config = NodeConfig {
        hello_interval_ms: 2_000,
    };

    // Gateway identity mirrors the device: address derived from its MAC,
    // no persistence.
    let gateway_identity = NodeIdentity::new(GATEWAY_MAC, MemoryStore::new());
    let gateway_address = gateway_identity.generate_address(&DEFAULT_BLACKLIST).address;

    let mut tasks = Vec::new();

    for i in 0..node_count {
        let mut mac = [0u8; 6];
        mac[..5].copy_from_slice(&NODE_MAC_PREFIX);
        mac[5] = i as u8;

        let identity = NodeIdentity::new(mac, MemoryStore::new());
        let endpoint = hub.endpoint(identity.generate_address(&DEFAULT_BLACKLIST).address);
        let sensors = SyntheticSensors::new(i as u8);
        let config = node_config.clone();
        let running = Arc::clone(&running);

        tasks.push(tokio::task::spawn_blocking(move || {
            let mut agent =
                NodeAgent::new(identity, endpoint, SystemClock::new(), sensors, config);
            while running.load(Ordering::SeqCst) {
                agent.tick();
                std::thread::sleep(Duration::from_millis(TICK_SLEEP_MS));
            }
            info!(
                address = agent.address(),
                hellos = agent.stats().hellos_sent,
                atmospheric = agent.stats().atmospheric_requests_served,
                ground = agent.stats().ground_requests_served,
                "node loop finished"
            );
        }));
    }

    let gateway_endpoint = hub.endpoint(gateway_address);
    let gateway_running = Arc::clone(&running);
    let gateway_task = tokio::task::spawn_blocking(move || {
        let clock = SystemClock::new();
        let trigger = IntervalTrigger::new(gateway_config.ground_interval_ms, 0);
        let mut gateway = GatewayCoordinator::new(
            gateway_address,
            gateway_config,
            gateway_endpoint,
            clock,
            LogSink,
            Box::new(trigger),
        );
        while gateway_running.load(Ordering::SeqCst) {
            gateway.tick();
            std::thread::sleep(Duration::from_millis(TICK_SLEEP_MS));
        }
        gateway
    });

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(duration_s)) => {
            info!("simulation time elapsed");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "ctrl-c handler failed, stopping anyway");
            } else {
                info!("interrupted, shutting down");
            }
        }
    }
    running.store(false, Ordering::SeqCst);

    for task in tasks {
        let _ = task.await;
    }
    let gateway = gateway_task.await.expect("gateway loop panicked");

    let stats = gateway.stats();
    println!();
    println!("{}", "Simulation summary".green().bold());
    println!(
        "  registered nodes:   {}",
        gateway.registry().len().to_string().cyan()
    );
    println!(
        "  announces sent:     {}",
        stats.announces_sent.to_string().cyan()
    );
    println!(
        "  hellos received:    {}",
        stats.hellos_received.to_string().cyan()
    );
    println!(
        "  polls ok / failed:  {} / {}",
        stats.polls_succeeded.to_string().green(),
        stats.polls_failed.to_string().red()
    );
    println!(
        "  samples published:  {}",
        stats.samples_published.to_string().cyan()
    );
    if stats.collisions_detected > 0 {
        println!(
            "  collisions handled: {}",
            stats.collisions_detected.to_string().yellow()
        );
    }
}
