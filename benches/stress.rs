use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Client, Config, NoTls};
use ulid::Ulid;

async fn connect(host: &str, port: u16, dbname: &str) -> Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(dbname)
        .user("carshare")
        .password("carshare");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn fresh_tenant() -> String {
    format!("bench_{}", Ulid::new())
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

fn day(offset: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() + Days::new(offset)
}

/// Comma list of `len` consecutive dates starting `offset` days into 2025.
fn stay(offset: u64, len: u64) -> String {
    (0..len)
        .map(|i| day(offset + i).to_string())
        .collect::<Vec<_>>()
        .join(",")
}

async fn list_vehicle(client: &Client) -> Ulid {
    let vid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO vehicles (id, owner_id, price_per_day, availability, make, model, location) \
             VALUES ('{vid}', '{}', 4500, '', 'Bench', 'Car', 'Nowhere')",
            Ulid::new()
        ))
        .await
        .unwrap();
    vid
}

async fn book(client: &Client, vid: Ulid, offset: u64, len: u64) -> Result<(), tokio_postgres::Error> {
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, vehicle_id, renter_id, dates, total_price) \
             VALUES ('{}', '{vid}', '{}', '{}', {})",
            Ulid::new(),
            Ulid::new(),
            stay(offset, len),
            len * 4500
        ))
        .await
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port, &fresh_tenant()).await;
    let vid = list_vehicle(&client).await;

    let n = 2000u64;
    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        book(&client, vid, i * 2, 2).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(host: &str, port: u16) {
    let n_tasks = 10;
    let n_per_task = 200u64;

    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &fresh_tenant()).await;
            let vid = list_vehicle(&client).await;
            for j in 0..n_per_task {
                book(&client, vid, j * 3, 3).await.unwrap();
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks as u64 * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

/// Many renters race for the same week of one vehicle. Exactly one wins per round.
async fn phase3_contention(host: &str, port: u16) {
    let tenant = fresh_tenant();
    let setup = connect(host, port, &tenant).await;
    let vid = list_vehicle(&setup).await;
    drop(setup);

    let n_renters = 20;
    let rounds = 50u64;
    let won = Arc::new(AtomicUsize::new(0));
    let refused = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..n_renters {
        let host = host.to_string();
        let tenant = tenant.clone();
        let won = won.clone();
        let refused = refused.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &tenant).await;
            for round in 0..rounds {
                match book(&client, vid, round * 7, 7).await {
                    Ok(()) => won.fetch_add(1, Ordering::Relaxed),
                    Err(_) => refused.fetch_add(1, Ordering::Relaxed),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let won = won.load(Ordering::Relaxed);
    let refused = refused.load(Ordering::Relaxed);
    println!(
        "  {n_renters} renters x {rounds} weeks: {won} booked, {refused} refused in {:.2}s",
        start.elapsed().as_secs_f64()
    );
    assert_eq!(won as u64, rounds, "each week must be booked exactly once");
}

async fn phase4_read_under_load(host: &str, port: u16) {
    let tenant = fresh_tenant();
    let setup = connect(host, port, &tenant).await;
    let vid = list_vehicle(&setup).await;
    for i in 0..100 {
        book(&setup, vid, i * 3, 2).await.unwrap();
    }
    drop(setup);

    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &fresh_tenant()).await;
            let wvid = list_vehicle(&client).await;
            let mut i = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let _ = book(&client, wvid, i, 1).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let host = host.to_string();
        let tenant = tenant.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &tenant).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .batch_execute(&format!(
                        r#"SELECT * FROM availability WHERE vehicle_id = '{vid}' AND "date" >= '{}' AND "date" <= '{}'"#,
                        day(0),
                        day(364)
                    ))
                    .await
                    .unwrap();
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

    print_latency("availability query", &mut all_latencies);
}

async fn phase5_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10u64;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &fresh_tenant()).await;
            let vid = list_vehicle(&client).await;
            for i in 0..ops_per_conn {
                book(&client, vid, i, 1).await.unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("CARSHARE_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("CARSHARE_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid CARSHARE_PORT");

    println!("=== carshare stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] concurrent booking throughput");
    phase2_concurrent(&host, port).await;

    println!("\n[phase 3] contention on one vehicle");
    phase3_contention(&host, port).await;

    println!("\n[phase 4] read latency under write load");
    phase4_read_under_load(&host, port).await;

    println!("\n[phase 5] connection storm");
    phase5_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
