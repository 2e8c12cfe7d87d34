use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use shongo_booking::acl::InMemoryAclManager;
use shongo_booking::engine::{now_ms, Engine, ResourceDescriptor, ResourceReservationTask};
use shongo_booking::identifier::LocalDomain;
use shongo_booking::model::*;
use shongo_booking::specification::Specification;
use ulid::Ulid;

const HOUR: i64 = 3_600_000; // 1 hour in ms

fn open_engine() -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("shongo_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("cannot create bench directory");
    let engine = Engine::open(
        &dir.join("controller.wal"),
        LocalDomain::new("bench.local"),
        Arc::new(InMemoryAclManager::new()),
    )
    .expect("cannot open journal");
    Arc::new(engine)
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn task(resource: u64) -> ResourceReservationTask {
    ResourceReservationTask::new(ResourceDescriptor {
        id: ResourceId(resource),
        technologies: BTreeSet::new(),
        is_endpoint: false,
    })
}

/// Request and allocate `resource` for the hour starting `hours` after `base`.
async fn book(engine: &Engine, resource: u64, base: Ms, hours: i64) -> Option<ReservationRequestId> {
    let slot = Span::new(base + hours * HOUR, base + (hours + 1) * HOUR);
    let draft = ReservationRequestDraft::single(slot, "bench", Specification::resource(ResourceId(resource)));
    let request = engine.create_reservation_request(draft).await.ok()?;
    engine.allocate(request, &mut task(resource)).await.ok()?;
    Some(request)
}

async fn phase1_sequential(engine: &Engine, base: Ms) {
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        book(engine, 1, base, i as i64).await.expect("sequential booking failed");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} allocations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("allocation latency", &mut latencies);
}

async fn phase2_concurrent(engine: &Arc<Engine>, base: Ms) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                book(&engine, 100 + i, base, j).await.expect("concurrent booking failed");
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks as i64 * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} allocations = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_read_under_load(engine: &Arc<Engine>, base: Ms) {
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let engine = engine.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let mut i = 0;
            while !stop.load(Ordering::Relaxed) {
                let _ = book(&engine, 200 + w, base, i).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let engine = engine.clone();
        reader_handles.push(tokio::spawn(async move {
            let window = Span::new(base, base + 200 * HOUR);
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                engine.list_by_interval(window, ReservationType::Resource).await;
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }
    print_latency("interval listing", &mut all_latencies);
}

async fn phase4_cleanup(engine: &Engine) {
    let requests: Vec<ReservationRequestId> = engine.read(|s| {
        s.requests()
            .filter(|r| r.state == RequestState::Active)
            .map(|r| r.id)
            .collect()
    })
    .await;

    let start = Instant::now();
    for request in &requests {
        engine
            .delete_reservation_request(*request)
            .await
            .expect("request deletion failed");
    }
    let deleted = start.elapsed();

    let start = Instant::now();
    let report = engine.run_cleanup(now_ms()).await.expect("cleanup failed");
    println!(
        "  deleted {} requests in {:.2}s, cleanup removed {} reservations in {:.2}s",
        requests.len(),
        deleted.as_secs_f64(),
        report.reservations_deleted,
        start.elapsed().as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    println!("=== shongo booking stress benchmark ===\n");
    let engine = open_engine();
    let base = now_ms() + HOUR;

    println!("[phase 1] sequential allocation throughput");
    phase1_sequential(&engine, base).await;

    println!("\n[phase 2] concurrent allocation throughput");
    phase2_concurrent(&engine, base).await;

    println!("\n[phase 3] read latency under allocation load");
    phase3_read_under_load(&engine, base).await;

    println!("\n[phase 4] delete and clean up everything");
    phase4_cleanup(&engine).await;

    let t = Instant::now();
    engine.compact().await.expect("compaction failed");
    println!("\n  journal compacted in {:.2}ms", t.elapsed().as_secs_f64() * 1000.0);
}
