use chrono::{Duration, Utc};
use clap::Parser;
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Connects N websocket clients to a running redis2ws bridge and reports frame rates", long_about = None)]
struct Args {
    /// Bridge websocket URL
    #[clap(long, default_value = "ws://127.0.0.1:9292/websocket")]
    url: String,

    /// Number of concurrent clients
    #[clap(short, long, default_value_t = 10)]
    clients: usize,

    /// Report interval in minutes
    #[clap(short, long, default_value_t = 1)]
    report_interval_minutes: u64,
}

struct Stats {
    global_timestamps: VecDeque<chrono::DateTime<Utc>>,
    per_client_totals: Vec<u64>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let stats = Arc::new(Mutex::new(Stats {
        global_timestamps: VecDeque::new(),
        per_client_totals: vec![0; args.clients],
    }));

    // Clone for the reporter task
    let stats_reporter = Arc::clone(&stats);
    let report_interval_seconds = args.report_interval_minutes * 60;
    tokio::spawn(async move {
        loop {
            sleep(std::time::Duration::from_secs(report_interval_seconds)).await;
            let now = Utc::now();
            let one_minute_ago = now - Duration::minutes(1);

            let mut data = stats_reporter.lock().unwrap();

            // Keep only the last minute of timestamps
            while data
                .global_timestamps
                .front()
                .is_some_and(|&t| t < one_minute_ago)
            {
                data.global_timestamps.pop_front();
            }
            let global_rate = data.global_timestamps.len();

            let totals = data
                .per_client_totals
                .iter()
                .enumerate()
                .map(|(i, total)| format!("client_{}: {} frames", i, total))
                .collect::<Vec<_>>()
                .join(", ");

            println!("\n----- 1-Minute Summary -----");
            println!("Global rate: {} frames/min", global_rate);
            println!("Totals: {}", totals);
            println!("----------------------------\n");
        }
    });

    println!("Connecting {} client(s) to {}...", args.clients, args.url);

    let mut handles = Vec::with_capacity(args.clients);
    for client_id in 0..args.clients {
        let url = args.url.clone();
        let stats = Arc::clone(&stats);

        handles.push(tokio::spawn(async move {
            let (ws_stream, _) = connect_async(url).await.expect("Failed to connect");
            let (_write, mut read) = ws_stream.split();

            while let Some(Ok(msg)) = read.next().await {
                if let Message::Text(_) = msg {
                    let now = Utc::now();
                    let mut data = stats.lock().unwrap();
                    data.global_timestamps.push_back(now);
                    data.per_client_totals[client_id] += 1;
                }
            }
            println!("client_{} stream ended", client_id);
        }));
    }

    println!("Connected. Press Ctrl+C to stop.");
    for handle in handles {
        let _ = handle.await;
    }
}
