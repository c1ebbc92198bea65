//! Live sensor tag monitor
//!
//! Scans for nearby peripherals, connects to the first one (or the one whose
//! name contains the first argument), and prints readings and alerts.
//!
//! Run with: cargo run --example sensor_monitor -- [name] [threshold_celsius]

use sensortag_ble::{
    ClientConfig, Error, Metric, Permission, Result, SensorClient, SessionEvent,
};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let name_filter = args.next();
    let threshold = match args.next() {
        Some(raw) => Some(raw.parse::<f64>().map_err(|_| Error::InvalidParameter {
            name: "threshold".to_string(),
            value: raw.clone(),
        })?),
        None => None,
    };

    println!("Sensor Monitor");
    println!("==============\n");

    let client = SensorClient::with_btleplug(ClientConfig::default()).await?;
    client.set_alert_threshold(threshold)?;

    println!(
        "Scanning for {:?}...\n",
        client.config().scan_duration
    );
    client.start_scan(Permission::Granted).await?;
    let devices = client.wait_for_scan().await?;

    for (i, device) in devices.iter().enumerate() {
        println!("  {}. {}", i + 1, device);
    }

    let device = devices
        .iter()
        .find(|d| match &name_filter {
            Some(filter) => d.display_name().contains(filter.as_str()),
            None => true,
        })
        .ok_or_else(|| Error::PeripheralNotFound {
            identifier: name_filter.clone().unwrap_or_else(|| "any".to_string()),
        })?;

    println!("\nConnecting to {}...", device);
    let mut events = client.subscribe();
    client.connect(device).await?;
    println!("Connected! Press Ctrl+C to exit.\n");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nExiting...");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Reading { metric: Metric::Temperature, reading }) => {
                    println!(
                        "Temperature: {} ({:.2}°F)",
                        reading,
                        reading.fahrenheit().unwrap_or_default()
                    );
                }
                Ok(SessionEvent::Reading { metric: Metric::Humidity, reading }) => {
                    println!("Humidity:    {}", reading);
                }
                Ok(SessionEvent::ReadFailed { metric, error }) => {
                    println!("Failed to read {}: {}", metric, error);
                }
                Ok(SessionEvent::Alert(alert)) => {
                    println!("ALERT: {}", alert);
                }
                Ok(SessionEvent::StateChanged { to, .. }) => {
                    println!("Connection: {}", to);
                    if to.is_terminal() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    println!("(skipped {} events)", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    let history = client.history(Metric::Temperature);
    println!("\nCollected {} temperature readings", history.len());

    client.shutdown().await?;

    Ok(())
}
