use phasework::Topology;

fn main() {
    let topo = Topology::detect();
    println!("CPU: {}", topo.cpu_brand);
    println!(
        "Logical cores: {} (physical {}, performance {})",
        topo.logical_cores, topo.physical_cores, topo.performance_cores
    );
    println!("SMT: {}", topo.has_smt());
    println!("Cache line: {} B", topo.cache_line_size);
    match topo.l3_cache_bytes {
        0 => println!("L3 cache: unknown"),
        bytes => println!("L3 cache: {} KiB", bytes / 1024),
    }
    println!("SIMD: {:?}", topo.simd);
}
