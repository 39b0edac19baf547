//! Live monitor: scan, connect to the first sensor, watch it, then capture.
//!
//! Run with: cargo run --example live_monitor

use spectro_ble::{counts_to_millivolts, Pipeline, PipelineConfig, Result, SensorId};
use std::time::Duration;

const LIVE_SECONDS: u32 = 5;
const CAPTURE_SECONDS: u32 = 10;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("spectro_ble=debug".parse().unwrap()),
        )
        .init();

    println!("Starting spectroscopy sensor monitor...");
    println!("Make sure the sensor is powered and advertising!\n");

    let pipeline = Pipeline::new(PipelineConfig::default()).await?;
    if let Some(e) = pipeline.startup_error() {
        println!("Bluetooth unavailable: {}", e);
        return Ok(());
    }

    let _connection_handle = pipeline.on_connection_changed(|event| {
        println!("Connection: {} -> {}", event.previous, event.state);
    });

    let devices = pipeline.scan_default().await;
    if devices.is_empty() {
        println!("No sensors found.");
        return Ok(());
    }

    for (name, device) in &devices {
        println!("Found {} ({}) RSSI: {:?} dBm", name, device.address, device.rssi);
    }

    let Some((name, device)) = devices.iter().next() else {
        return Ok(());
    };
    pipeline.connect(&device.address, name);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    println!("\nLive view for {} seconds:", LIVE_SECONDS);
    for _ in 0..LIVE_SECONDS {
        ticker.tick().await;
        pipeline.tick();

        let latest = pipeline.get_latest_values();
        let line: Vec<String> = SensorId::ALL
            .iter()
            .map(|&sensor| match latest[sensor] {
                Some(v) => format!(
                    "{}={:.0} ({:.0} mV)",
                    sensor.key(),
                    v,
                    counts_to_millivolts(v as u16)
                ),
                None => format!("{}=--", sensor.key()),
            })
            .collect();
        println!("  {}", line.join("  "));
    }

    println!("\nCapturing for {} seconds...", CAPTURE_SECONDS);
    pipeline.set_system_state(true);
    for _ in 0..CAPTURE_SECONDS {
        ticker.tick().await;
        let summary = pipeline.tick();
        println!(
            "  tick: {} readings, {} row(s)",
            summary.readings, summary.rows_appended
        );
    }
    pipeline.set_system_state(false);

    println!("\nCaptured {} rows", pipeline.data_count());
    let stats = pipeline.get_data_statistics();
    for sensor in SensorId::ALL {
        let s = &stats[sensor];
        println!(
            "  {:<11} n={:<3} mean={:>8.1} std={:>7.1} min={:>8.1} max={:>8.1}",
            sensor.key(),
            s.count,
            s.mean,
            s.std_dev,
            s.min,
            s.max
        );
    }

    pipeline.shutdown().await;
    println!("\nDone.");

    Ok(())
}
