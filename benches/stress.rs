use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use wicket::clock::ManualClock;
use wicket::coaching::InMemoryCoaching;
use wicket::config::{AvailabilityPolicy, SchedulingRules};
use wicket::engine::{Engine, EngineError};
use wicket::model::{BookingType, Ground, NewBooking, NewGround};
use wicket::time::{Span, TimeOfDay};

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
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
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 1).expect("valid date")
}

/// One-hour span starting at `hour`.
fn hour_span(hour: u16) -> Span {
    Span::new(
        TimeOfDay::hm(hour, 0).expect("hour in range"),
        TimeOfDay::hm(hour + 1, 0).expect("hour in range"),
    )
}

async fn open_engine(name: &str) -> Arc<Engine> {
    let dir = std::env::temp_dir().join("wicket_bench");
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    let clock = Arc::new(ManualClock::new(
        NaiveDate::from_ymd_opt(2029, 12, 1)
            .expect("valid date")
            .and_hms_opt(0, 0, 0)
            .expect("valid time"),
    ));
    Arc::new(
        Engine::new(path, SchedulingRules::default(), clock, Arc::new(InMemoryCoaching::new()))
            .expect("open engine"),
    )
}

async fn ground(engine: &Engine, name: &str, slots: u8) -> Ground {
    engine
        .create_ground(NewGround {
            name: name.into(),
            location: "bench".into(),
            price_per_slot: 1000,
            total_slots: slots,
            facilities: vec![],
            equipment: vec![],
        })
        .await
        .expect("create ground")
}

async fn phase1_sequential() {
    let engine = open_engine("sequential.wal").await;
    let g = ground(&engine, "Sequential", 1).await;

    let days = 200;
    let mut latencies = Vec::with_capacity(days * 16);
    let start = Instant::now();
    for day in 0..days {
        let date = base_date() + chrono::Duration::days(day as i64);
        for hour in 6..22 {
            let t = Instant::now();
            engine
                .create_booking(NewBooking::new(g.id, 1, date, hour_span(hour), BookingType::Practice))
                .await
                .expect("free slot");
            latencies.push(t.elapsed());
        }
    }
    let elapsed = start.elapsed();
    let n = latencies.len();
    println!(
        "  {n} bookings in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        n as f64 / elapsed.as_secs_f64()
    );
    print_latency("write latency", &mut latencies);
}

/// Many tasks racing for the same slot-days: exactly one winner per hour.
async fn phase2_contended() {
    let engine = open_engine("contended.wal").await;
    let g = ground(&engine, "Contended", 4).await;

    let n_tasks = 32;
    let won = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();
    for task in 0..n_tasks {
        let engine = engine.clone();
        let won = won.clone();
        let lost = lost.clone();
        let gid = g.id;
        handles.push(tokio::spawn(async move {
            for day in 0..10 {
                let date = base_date() + chrono::Duration::days(day);
                for hour in 6..22 {
                    let slot = 1 + (task % 4) as u8;
                    let req = NewBooking::new(gid, slot, date, hour_span(hour), BookingType::Match);
                    match engine.create_booking(req).await {
                        Ok(_) => won.fetch_add(1, Ordering::Relaxed),
                        Err(EngineError::Conflict(_)) => lost.fetch_add(1, Ordering::Relaxed),
                        Err(e) => panic!("unexpected error: {e}"),
                    };
                }
            }
        }));
    }
    for h in handles {
        h.await.expect("task panicked");
    }

    let elapsed = start.elapsed();
    let won = won.load(Ordering::Relaxed);
    let lost = lost.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks: {won} committed, {lost} conflicts in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(won, 4 * 10 * 16, "one winner per slot-hour");
    assert!(engine.audit_overlaps().await.is_empty());
}

async fn phase3_availability_under_load() {
    let engine = open_engine("read_load.wal").await;
    let g = ground(&engine, "Busy", 12).await;
    for slot in 1..=12u8 {
        for hour in (6..22).step_by(2) {
            engine
                .create_booking(NewBooking::new(g.id, slot, base_date(), hour_span(hour), BookingType::Training))
                .await
                .expect("free slot");
        }
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut writers = Vec::new();
    for w in 0..4 {
        let engine = engine.clone();
        let stop = stop.clone();
        let gid = g.id;
        writers.push(tokio::spawn(async move {
            let mut day = 1i64;
            while !stop.load(Ordering::Relaxed) {
                let date = base_date() + chrono::Duration::days(day * 4 + w);
                let _ = engine
                    .create_booking(NewBooking::new(gid, 1, date, hour_span(10), BookingType::Practice))
                    .await;
                day += 1;
            }
        }));
    }

    let policy = AvailabilityPolicy::combined();
    let mut readers = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let gid = g.id;
        readers.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(500);
            for _ in 0..500 {
                let t = Instant::now();
                engine
                    .availability(gid, base_date(), &policy)
                    .await
                    .expect("availability");
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        all.extend(h.await.expect("reader panicked"));
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }
    print_latency("availability grid", &mut all);
}

#[tokio::main]
async fn main() {
    println!("=== wicket stress benchmark ===\n");

    println!("[phase 1] sequential write throughput");
    phase1_sequential().await;

    println!("\n[phase 2] contended writes");
    phase2_contended().await;

    println!("\n[phase 3] availability latency under write load");
    phase3_availability_under_load().await;
}
