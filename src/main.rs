use phasework::workload::HeavyMath;
use phasework::{
    DependencyMask, EngineConfig, FnJob, JobId, Oracle, Orchestrator, ThroughputOracle, Topology,
};
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const ITEMS: usize = 200_000;
const COMPLEXITY: u32 = 32;
const FRAMES: usize = 30;

fn load_config() -> Result<EngineConfig, Box<dyn std::error::Error>> {
    match std::env::var_os("PHASEWORK_CONFIG") {
        Some(path) => Ok(EngineConfig::from_toml_str(&std::fs::read_to_string(path)?)?),
        None => Ok(EngineConfig::default()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("phasework - Phase-Scheduled Parallel Job Engine\n");

    let config = load_config()?;
    let topology = Topology::detect();
    println!(
        "Hardware: {} logical / {} physical cores, {} B cache lines, {:?}",
        topology.logical_cores, topology.physical_cores, topology.cache_line_size, topology.simd
    );

    // Serial baseline
    let mut baseline = HeavyMath::new(ITEMS, COMPLEXITY);
    let start = Instant::now();
    baseline.run_serial();
    let serial = start.elapsed();
    println!("Serial: one system over {ITEMS} items in {serial:?}\n");

    let oracle: Box<dyn Oracle> = Box::new(ThroughputOracle::default());
    let mut engine = Orchestrator::with_parts(config, topology, Some(oracle))?;
    println!("Initialized engine with {} workers", engine.num_workers());

    // Two independent systems followed by a reducer that reads both.
    let left_data = HeavyMath::new(ITEMS, COMPLEXITY).register(
        &mut engine,
        JobId::new(0),
        DependencyMask::new(),
        DependencyMask::new().with(0),
    )?;
    let right_data = HeavyMath::new(ITEMS, COMPLEXITY).register(
        &mut engine,
        JobId::new(1),
        DependencyMask::new(),
        DependencyMask::new().with(1),
    )?;
    // Fixed-point sum of the last frame's reduction, in thousandths.
    let checksum = Arc::new(AtomicI64::new(0));
    let sum = Arc::clone(&checksum);
    engine.register(
        JobId::new(2),
        DependencyMask::from_indices([0, 1]),
        DependencyMask::new().with(2),
        FnJob::fixed(ITEMS, move |range: Range<usize>| {
            // Both columns are only read in this phase.
            let (l, r) = unsafe { (left_data.slice(range.clone()), right_data.slice(range)) };
            let partial: f64 = l.iter().zip(r).map(|(a, b)| f64::from(a + b)).sum();
            sum.fetch_add((partial * 1000.0) as i64, Ordering::Relaxed);
        }),
    )?;

    let plan = engine.build_plan()?;
    for (phase, jobs) in plan.phases().enumerate() {
        println!("  phase {phase}: {jobs:?}");
    }

    let start = Instant::now();
    for _ in 0..FRAMES {
        checksum.store(0, Ordering::Relaxed);
        engine.execute_frame()?;
    }
    let elapsed = start.elapsed();
    let per_frame = elapsed / FRAMES as u32;
    let strategy = engine.strategy();

    println!("\nExecuted {FRAMES} frames in {elapsed:?} ({per_frame:?} per frame)");
    println!(
        "Speedup over running both systems serially: {:.2}x",
        serial.as_secs_f64() * 2.0 / per_frame.as_secs_f64()
    );
    println!(
        "Active strategy: batch {} x {} threads (confidence {:.2})",
        strategy.batch_size, strategy.thread_count, strategy.confidence
    );
    println!("Telemetry samples dropped: {}", engine.telemetry_dropped());
    println!(
        "Reduction of last frame: {:.3}",
        checksum.load(Ordering::Relaxed) as f64 / 1000.0
    );

    println!("\nShutting down engine...");
    engine.shutdown()?;
    println!("Done!");
    Ok(())
}
